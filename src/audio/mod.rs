//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod device;

pub use backend::{
    AudioContext, CaptureBackend, CaptureConstraints, ContextState, CpalBackend,
};
pub use buffer::{BlockQueue, CaptureBlock, SharedBlockQueue};
pub use device::{is_headset_label, list_input_devices, DeviceDescriptor, DeviceRegistry};
