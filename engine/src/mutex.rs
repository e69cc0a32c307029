use std::cell::UnsafeCell;

/// Interior mutability without locking, for state shared between the audio
/// thread and the message thread whose accesses the host serializes itself.
///
/// Callers guarantee that no two `lock` borrows overlap. In this crate the
/// audio thread owns the processor while it runs, and lifecycle calls are
/// only made while the audio thread is paused.
#[derive(Debug)]
pub struct UnsafeMutex<T> {
    data: UnsafeCell<T>,
}

impl<T> UnsafeMutex<T> {
    pub fn new(data: T) -> Self {
        UnsafeMutex {
            data: UnsafeCell::new(data),
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

unsafe impl<T: Send> Send for UnsafeMutex<T> {}
unsafe impl<T: Send> Sync for UnsafeMutex<T> {}
