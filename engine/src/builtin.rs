//! Reference stereo amplifier hosted without any native LV2 library.

use std::{ffi::c_void, sync::Arc};

use crate::error::Result;
use crate::features::FeatureSet;
use crate::metadata::PluginDescriptor;
use crate::plugin::{NativeInstance, PluginProvider};
use crate::port::{PortDescriptor, PortFlow, PortRange};

pub const AMP_URI: &str = "urn:lv2host:amp";

pub const AMP_IN_L: u32 = 0;
pub const AMP_IN_R: u32 = 1;
pub const AMP_OUT_L: u32 = 2;
pub const AMP_OUT_R: u32 = 3;
pub const AMP_GAIN: u32 = 4;

pub struct Amp {
    descriptor: Arc<PluginDescriptor>,
}

impl Amp {
    pub fn new() -> Result<Self> {
        let ports = vec![
            PortDescriptor::audio(AMP_IN_L, PortFlow::Input, "in_l").with_name("In L"),
            PortDescriptor::audio(AMP_IN_R, PortFlow::Input, "in_r").with_name("In R"),
            PortDescriptor::audio(AMP_OUT_L, PortFlow::Output, "out_l").with_name("Out L"),
            PortDescriptor::audio(AMP_OUT_R, PortFlow::Output, "out_r").with_name("Out R"),
            PortDescriptor::control(AMP_GAIN, PortFlow::Input, "gain", PortRange::new(0.0, 2.0, 1.0))
                .with_name("Gain")
                .with_scale_point("Mute", 0.0)
                .with_scale_point("Unity", 1.0)
                .with_scale_point("+6 dB", 2.0),
        ];
        let descriptor = PluginDescriptor::new(AMP_URI, "Stereo Amp", ports)?
            .with_class("Amplifier")
            .with_author("lv2host");
        Ok(Self {
            descriptor: Arc::new(descriptor),
        })
    }
}

impl PluginProvider for Amp {
    fn descriptor(&self) -> Arc<PluginDescriptor> {
        self.descriptor.clone()
    }

    fn instantiate(&self, sample_rate: f64, _features: &FeatureSet) -> Option<Box<dyn NativeInstance>> {
        if sample_rate <= 0.0 {
            return None;
        }
        Some(Box::new(AmpInstance::default()))
    }
}

struct AmpInstance {
    inputs: [*const f32; 2],
    outputs: [*mut f32; 2],
    gain: *const f32,
}

unsafe impl Send for AmpInstance {}

impl Default for AmpInstance {
    fn default() -> Self {
        Self {
            inputs: [std::ptr::null(); 2],
            outputs: [std::ptr::null_mut(); 2],
            gain: std::ptr::null(),
        }
    }
}

impl NativeInstance for AmpInstance {
    fn handle(&self) -> *mut c_void {
        (self as *const Self).cast_mut().cast()
    }

    unsafe fn connect_port(&mut self, port: u32, data: *mut c_void) {
        match port {
            AMP_IN_L => self.inputs[0] = data.cast(),
            AMP_IN_R => self.inputs[1] = data.cast(),
            AMP_OUT_L => self.outputs[0] = data.cast(),
            AMP_OUT_R => self.outputs[1] = data.cast(),
            AMP_GAIN => self.gain = data.cast(),
            _ => {}
        }
    }

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    unsafe fn run(&mut self, frames: u32) {
        let gain = if self.gain.is_null() {
            1.0
        } else {
            unsafe { *self.gain }
        };
        for (input, output) in self.inputs.iter().zip(self.outputs.iter()) {
            if input.is_null() || output.is_null() {
                continue;
            }
            for i in 0..frames as usize {
                unsafe {
                    *output.add(i) = *input.add(i) * gain;
                }
            }
        }
    }

    fn extension_data(&self, _uri: &str) -> *const c_void {
        std::ptr::null()
    }
}
