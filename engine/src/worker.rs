use std::{cell::UnsafeCell, ffi::c_void};

use crate::bridge::{EventReader, EventWriter, event_bridge};

pub type Lv2WorkerStatus = u32;
pub const LV2_WORKER_SUCCESS: Lv2WorkerStatus = 0;
pub const LV2_WORKER_ERR_UNKNOWN: Lv2WorkerStatus = 1;
pub const LV2_WORKER_ERR_NO_SPACE: Lv2WorkerStatus = 2;

#[repr(C)]
pub struct Lv2WorkerSchedule {
    pub handle: *mut c_void,
    pub schedule_work:
        Option<unsafe extern "C" fn(handle: *mut c_void, size: u32, data: *const c_void) -> u32>,
}

pub type Lv2WorkerRespondFunc =
    Option<unsafe extern "C" fn(handle: *mut c_void, size: u32, data: *const c_void) -> u32>;

#[repr(C)]
pub struct Lv2WorkerInterface {
    pub work: Option<
        unsafe extern "C" fn(
            handle: *mut c_void,
            respond: Lv2WorkerRespondFunc,
            respond_handle: *mut c_void,
            size: u32,
            data: *const c_void,
        ) -> u32,
    >,
    pub work_response:
        Option<unsafe extern "C" fn(handle: *mut c_void, size: u32, data: *const c_void) -> u32>,
    pub end_run: Option<unsafe extern "C" fn(handle: *mut c_void)>,
}

/// Job and response rings. Each half is only touched from the audio thread
/// while a cycle runs, so the cells are never aliased.
struct WorkerQueues {
    job_writer: UnsafeCell<EventWriter>,
    job_reader: UnsafeCell<EventReader>,
    response_writer: UnsafeCell<EventWriter>,
    response_reader: UnsafeCell<EventReader>,
}

/// Host side of `worker:schedule`. Jobs are performed synchronously right
/// after the plugin's run, inside the same cycle.
pub struct Worker {
    schedule: Box<Lv2WorkerSchedule>,
    queues: Box<WorkerQueues>,
}

unsafe impl Send for Worker {}

impl Worker {
    pub fn new(capacity: usize, payload_ceiling: usize) -> Self {
        let (job_writer, job_reader) = event_bridge(capacity, payload_ceiling);
        let (response_writer, response_reader) = event_bridge(capacity, payload_ceiling);
        let queues = Box::new(WorkerQueues {
            job_writer: UnsafeCell::new(job_writer),
            job_reader: UnsafeCell::new(job_reader),
            response_writer: UnsafeCell::new(response_writer),
            response_reader: UnsafeCell::new(response_reader),
        });
        let schedule = Box::new(Lv2WorkerSchedule {
            handle: (&*queues as *const WorkerQueues).cast_mut().cast::<c_void>(),
            schedule_work: Some(lv2_worker_schedule_work_callback),
        });
        Self { schedule, queues }
    }

    /// `worker:schedule` feature data.
    pub fn schedule_data(&self) -> *mut c_void {
        (&*self.schedule as *const Lv2WorkerSchedule)
            .cast_mut()
            .cast::<c_void>()
    }

    /// Runs pending jobs, delivers their responses, then signals end of run.
    ///
    /// # Safety
    /// Must be called from the thread that runs the plugin, with `handle`
    /// being the live plugin instance `interface` belongs to.
    pub unsafe fn run_cycle(&self, handle: *mut c_void, interface: Option<&Lv2WorkerInterface>) {
        let job_reader = unsafe { &mut *self.queues.job_reader.get() };
        let Some(interface) = interface else {
            job_reader.drain(|_| {});
            return;
        };
        let Some(work_fn) = interface.work else {
            job_reader.drain(|_| {});
            return;
        };
        if handle.is_null() {
            return;
        }

        let respond_handle = (&*self.queues as *const WorkerQueues)
            .cast_mut()
            .cast::<c_void>();
        job_reader.drain(|job| unsafe {
            work_fn(
                handle,
                Some(lv2_worker_respond_callback),
                respond_handle,
                job.size(),
                job.payload.as_ptr().cast::<c_void>(),
            );
        });

        let response_reader = unsafe { &mut *self.queues.response_reader.get() };
        match interface.work_response {
            Some(work_response_fn) => {
                response_reader.drain(|response| unsafe {
                    work_response_fn(
                        handle,
                        response.size(),
                        response.payload.as_ptr().cast::<c_void>(),
                    );
                });
            }
            None => {
                response_reader.drain(|_| {});
            }
        }

        if let Some(end_run_fn) = interface.end_run {
            unsafe {
                end_run_fn(handle);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        let jobs = unsafe { &*self.queues.job_writer.get() };
        let responses = unsafe { &*self.queues.response_writer.get() };
        jobs.stats().dropped() + responses.stats().dropped()
    }
}

fn push_message(writer: &UnsafeCell<EventWriter>, size: u32, data: *const c_void) -> u32 {
    if size > 0 && data.is_null() {
        return LV2_WORKER_ERR_UNKNOWN;
    }
    let bytes = if size == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) }
    };
    let writer = unsafe { &mut *writer.get() };
    if writer.write(0, 0, bytes) {
        LV2_WORKER_SUCCESS
    } else {
        LV2_WORKER_ERR_NO_SPACE
    }
}

unsafe extern "C" fn lv2_worker_schedule_work_callback(
    handle: *mut c_void,
    size: u32,
    data: *const c_void,
) -> u32 {
    if handle.is_null() {
        return LV2_WORKER_ERR_UNKNOWN;
    }
    let queues = unsafe { &*(handle as *const WorkerQueues) };
    push_message(&queues.job_writer, size, data)
}

unsafe extern "C" fn lv2_worker_respond_callback(
    handle: *mut c_void,
    size: u32,
    data: *const c_void,
) -> u32 {
    if handle.is_null() {
        return LV2_WORKER_ERR_UNKNOWN;
    }
    let queues = unsafe { &*(handle as *const WorkerQueues) };
    push_message(&queues.response_writer, size, data)
}
