//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod playback;
pub mod recorder;

pub use buffer::PcmRingBuffer;
pub use device::{list_output_devices, AudioDeviceInfo};
pub use playback::{
    CpalOutputFactory, InterleavedOutput, OutputFactory, OutputHandle, PlaybackStream,
    SessionOutput,
};
pub use recorder::Recorder;
