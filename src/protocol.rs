//! Wire protocol
//!
//! Three datagram shapes share the relay socket and are told apart by
//! content alone:
//!
//! - registration: the shared password, raw bytes
//! - keepalive: the [`KEEPALIVE`] sentinel, raw bytes
//! - voice batch: one or more voice frame records, relay to listener only
//!
//! ```text
//! ┌────────────┬──────────────────┬───────────────────┐
//! │ length u16 │ session_id u64   │ payload [length]  │  ... repeated
//! └────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! Integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{KEEPALIVE, MAX_DATAGRAM_SIZE};
use crate::error::NetworkError;

/// Size of a voice frame record header (length + session id)
pub const FRAME_HEADER_LEN: usize = 2 + 8;

/// One encoded voice frame tagged with its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    pub session_id: u64,
    pub payload: Bytes,
}

impl VoiceFrame {
    pub fn new(session_id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            session_id,
            payload: payload.into(),
        }
    }

    /// Size of this frame once written as a record
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Append this frame as a record
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<(), NetworkError> {
        let length = u16::try_from(self.payload.len())
            .map_err(|_| NetworkError::FrameTooLarge(self.payload.len()))?;

        buf.reserve(self.encoded_len());
        buf.put_u16(length);
        buf.put_u64(self.session_id);
        buf.put_slice(&self.payload);
        Ok(())
    }
}

/// A voice frame record borrowed from a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef<'a> {
    pub session_id: u64,
    pub payload: &'a [u8],
}

/// Iterates over the records of a voice batch datagram.
///
/// A truncated record, either in its header or in its payload, ends the
/// iteration; the remaining bytes are ignored.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    truncated: bool,
}

impl<'a> FrameReader<'a> {
    pub fn new(datagram: &'a [u8]) -> Self {
        Self {
            buf: datagram,
            truncated: false,
        }
    }

    /// Whether iteration stopped on a truncated record
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = FrameRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        if self.buf.len() < FRAME_HEADER_LEN {
            self.truncated = true;
            self.buf = &[];
            return None;
        }

        let mut header = &self.buf[..FRAME_HEADER_LEN];
        let length = header.get_u16() as usize;
        let session_id = header.get_u64();

        let rest = &self.buf[FRAME_HEADER_LEN..];
        if rest.len() < length {
            self.truncated = true;
            self.buf = &[];
            return None;
        }

        let (payload, remaining) = rest.split_at(length);
        self.buf = remaining;

        Some(FrameRef {
            session_id,
            payload,
        })
    }
}

/// Packs voice frames into batch datagrams of bounded size
pub struct BatchBuilder {
    max_size: usize,
    current: BytesMut,
    datagrams: Vec<Bytes>,
}

impl BatchBuilder {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            current: BytesMut::with_capacity(max_size),
            datagrams: Vec::new(),
        }
    }

    /// Append a frame, starting a new datagram when it would not fit.
    ///
    /// A frame larger than the size bound gets a datagram of its own.
    pub fn push(&mut self, frame: &VoiceFrame) -> Result<(), NetworkError> {
        if !self.current.is_empty() && self.current.len() + frame.encoded_len() > self.max_size {
            self.flush();
        }
        frame.write_to(&mut self.current)
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.datagrams.push(self.current.split().freeze());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.datagrams.is_empty()
    }

    /// Finish and return every datagram built so far
    pub fn finish(mut self) -> Vec<Bytes> {
        self.flush();
        self.datagrams
    }
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(MAX_DATAGRAM_SIZE)
    }
}

/// Classification of a datagram received by the relay server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerDatagram {
    /// Liveness refresh from a registered listener
    Keepalive,
    /// Shared password, the sender wants to listen
    Registration,
    /// Anything else
    Unrecognized,
}

impl ServerDatagram {
    /// Classify a datagram. The keepalive sentinel wins over the password.
    pub fn classify(data: &[u8], password: &[u8]) -> Self {
        if data == KEEPALIVE {
            Self::Keepalive
        } else if data == password {
            Self::Registration
        } else {
            Self::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn batch(frames: &[VoiceFrame]) -> BytesMut {
        let mut buf = BytesMut::new();
        for frame in frames {
            frame.write_to(&mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_record_layout_is_big_endian() {
        let buf = batch(&[VoiceFrame::new(0x0102030405060708, vec![0xAA, 0xBB])]);
        assert_eq!(
            &buf[..],
            &[0x00, 0x02, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_reader_yields_records_in_order() {
        let buf = batch(&[
            VoiceFrame::new(7, vec![1, 2, 3]),
            VoiceFrame::new(9, vec![4]),
            VoiceFrame::new(7, Vec::new()),
        ]);

        let frames: Vec<_> = FrameReader::new(&buf).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].session_id, 7);
        assert_eq!(frames[0].payload, &[1, 2, 3]);
        assert_eq!(frames[1].session_id, 9);
        assert_eq!(frames[1].payload, &[4]);
        assert_eq!(frames[2].session_id, 7);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn test_truncated_payload_stops_parsing() {
        let mut buf = batch(&[VoiceFrame::new(1, vec![1, 2, 3, 4])]);
        buf.put_u16(100);
        buf.put_u64(2);
        buf.put_slice(&[0; 10]);

        let mut reader = FrameReader::new(&buf);
        assert_eq!(reader.next().map(|f| f.session_id), Some(1));
        assert!(reader.next().is_none());
        assert!(reader.is_truncated());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_header_stops_parsing() {
        let data = [0x00, 0x01, 0x00];
        let mut reader = FrameReader::new(&data);
        assert!(reader.next().is_none());
        assert!(reader.is_truncated());
    }

    #[test]
    fn test_empty_datagram() {
        let mut reader = FrameReader::new(&[]);
        assert!(reader.next().is_none());
        assert!(!reader.is_truncated());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = VoiceFrame::new(1, vec![0u8; u16::MAX as usize + 1]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            frame.write_to(&mut buf),
            Err(NetworkError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_batch_builder_splits_on_size() {
        let mut builder = BatchBuilder::new(64);
        for id in 0..5 {
            // 10 byte header + 20 byte payload = 30 bytes, two per datagram
            builder.push(&VoiceFrame::new(id, vec![0u8; 20])).unwrap();
        }

        let datagrams = builder.finish();
        assert_eq!(datagrams.len(), 3);
        assert!(datagrams.iter().all(|d| d.len() <= 64));

        let ids: Vec<u64> = datagrams
            .iter()
            .flat_map(|d| FrameReader::new(d).map(|f| f.session_id).collect::<Vec<_>>())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_batch_builder_oversized_frame_gets_own_datagram() {
        let mut builder = BatchBuilder::new(32);
        builder.push(&VoiceFrame::new(1, vec![0u8; 4])).unwrap();
        builder.push(&VoiceFrame::new(2, vec![0u8; 100])).unwrap();
        let datagrams = builder.finish();
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[1].len(), 110);
    }

    #[test]
    fn test_classify() {
        assert_eq!(ServerDatagram::classify(b"Ping", b"secret"), ServerDatagram::Keepalive);
        assert_eq!(ServerDatagram::classify(b"secret", b"secret"), ServerDatagram::Registration);
        assert_eq!(ServerDatagram::classify(b"secre", b"secret"), ServerDatagram::Unrecognized);
        assert_eq!(ServerDatagram::classify(b"secret!", b"secret"), ServerDatagram::Unrecognized);
        assert_eq!(ServerDatagram::classify(b"Ping", b"Ping"), ServerDatagram::Keepalive);
    }

    proptest! {
        #[test]
        fn prop_reader_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let count = FrameReader::new(&data).count();
            prop_assert!(count * FRAME_HEADER_LEN <= data.len());
        }

        #[test]
        fn prop_well_formed_batch_parses_fully(
            frames in proptest::collection::vec(
                (any::<u64>(), proptest::collection::vec(any::<u8>(), 0..64)),
                0..16,
            )
        ) {
            let frames: Vec<VoiceFrame> = frames
                .into_iter()
                .map(|(id, payload)| VoiceFrame::new(id, payload))
                .collect();
            let buf = batch(&frames);

            let mut reader = FrameReader::new(&buf);
            let parsed: Vec<_> = reader.by_ref().collect();
            prop_assert!(!reader.is_truncated());
            prop_assert_eq!(parsed.len(), frames.len());
            for (parsed, frame) in parsed.iter().zip(&frames) {
                prop_assert_eq!(parsed.session_id, frame.session_id);
                prop_assert_eq!(parsed.payload, &frame.payload[..]);
            }
        }
    }
}
