//! Opus codec wrapper
//!
//! Fixed voice profile: 48kHz, mono, 960-sample frames.

pub mod encoder;
pub mod decoder;

pub use encoder::OpusEncoder;
pub use decoder::OpusDecoder;
