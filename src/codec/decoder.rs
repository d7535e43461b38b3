//! Opus decoder wrapper
//!
//! One decoder per voice session; decoders carry prediction state and are
//! never shared between sessions.

use opus::{Channels, Decoder};

use crate::constants::{CHANNELS, FRAME_SIZE, SAMPLE_RATE};
use crate::error::CodecError;

/// Opus decoder producing i16 PCM
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    errors: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, channels: u16, frame_size: usize) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::DecoderInit(
                format!("Unsupported channel count: {}", channels)
            )),
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate,
            channels,
            frame_size,
            decode_buffer: vec![0i16; frame_size * channels as usize],
            frames_decoded: 0,
            errors: 0,
        })
    }

    /// Decoder for the relayed voice format (48kHz mono, 960 samples)
    pub fn voice() -> Result<Self, CodecError> {
        Self::new(SAMPLE_RATE, CHANNELS, FRAME_SIZE)
    }

    /// Decode one packet. The returned slice borrows the internal buffer.
    ///
    /// Packets holding more than one frame's worth of audio are rejected.
    pub fn decode(&mut self, data: &[u8]) -> Result<&[i16], CodecError> {
        let samples = match self.decoder.decode(data, &mut self.decode_buffer, false) {
            Ok(0) => {
                self.errors += 1;
                return Err(CodecError::DecodingFailed("no samples produced".to_string()));
            }
            Ok(samples) => samples,
            Err(e) => {
                self.errors += 1;
                return Err(CodecError::DecodingFailed(e.to_string()));
            }
        };

        self.frames_decoded += 1;
        Ok(&self.decode_buffer[..samples * self.channels as usize])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frame size in samples (per channel)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpusEncoder;

    #[test]
    fn test_decoder_creation() {
        let decoder = OpusDecoder::voice().unwrap();
        assert_eq!(decoder.sample_rate(), 48000);
        assert_eq!(decoder.channels(), 1);
        assert_eq!(decoder.frame_size(), 960);
    }

    #[test]
    fn test_unsupported_channels() {
        assert!(OpusDecoder::new(48000, 3, 960).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip_duration() {
        let mut encoder = OpusEncoder::voice().unwrap();
        let mut decoder = OpusDecoder::voice().unwrap();

        let samples: Vec<i16> = (0..FRAME_SIZE)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let encoded = encoder.encode(&samples).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();

        // 960 samples at 48kHz mono is 20ms, whatever the exact PCM
        assert_eq!(decoded.len(), FRAME_SIZE);
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn test_invalid_packet_is_an_error() {
        let mut decoder = OpusDecoder::voice().unwrap();

        // Code 3 packet declaring zero frames
        assert!(decoder.decode(&[0x03, 0x00]).is_err());
        assert_eq!(decoder.errors(), 1);
        assert_eq!(decoder.frames_decoded(), 0);
    }

    #[test]
    fn test_decoder_usable_after_error() {
        let mut encoder = OpusEncoder::voice().unwrap();
        let mut decoder = OpusDecoder::voice().unwrap();

        assert!(decoder.decode(&[0x03, 0x00]).is_err());

        let encoded = encoder.encode(&[0i16; FRAME_SIZE]).unwrap();
        assert_eq!(decoder.decode(&encoded).unwrap().len(), FRAME_SIZE);
    }
}
