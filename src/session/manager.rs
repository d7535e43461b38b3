//! Session manager: the listener's decode pipeline
//!
//! Demultiplexes voice batches by session id, owns one decoder and one
//! playback output per session, and keeps the pipeline counters. The
//! session table sits behind a single mutex shared by the network task and
//! the front-end; the playback callbacks never take it.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::audio::buffer::create_shared_buffer;
use crate::audio::playback::{OutputFactory, SessionOutput};
use crate::audio::recorder::Recorder;
use crate::codec::OpusDecoder;
use crate::constants::{BYTES_PER_SAMPLE, RING_BUFFER_CAPACITY};
use crate::protocol::FrameReader;
use crate::session::voice_session::{Capability, SessionFlags, SessionInfo, VoiceSession};

/// Notifications for the front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First frame of a previously unseen session arrived
    NewSession { session_id: u64 },
}

/// Read-only pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub decoded_frames: u64,
    pub decoded_bytes: u64,
    pub decode_errors: u64,
    pub sessions: usize,
}

/// What happened to one voice frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Decoded and queued for playback, with the sample count
    Decoded(usize),
    /// Neither listening nor recording, the decoder was not run
    Gated,
    /// The session's decoder or output failed to open
    Unusable,
    /// The codec rejected the payload
    DecodeFailed,
}

/// Capabilities given to sessions when they are created
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionDefaults {
    pub listen: bool,
    pub save: bool,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<u64, VoiceSession>>,
    factory: Arc<dyn OutputFactory>,
    save_dir: PathBuf,
    defaults: SessionDefaults,
    decoded_frames: AtomicU64,
    decoded_bytes: AtomicU64,
    decode_errors: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn OutputFactory>, save_dir: PathBuf) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            save_dir,
            defaults: SessionDefaults::default(),
            decoded_frames: AtomicU64::new(0),
            decoded_bytes: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            events,
        }
    }

    /// Capabilities applied to every new session
    pub fn with_defaults(mut self, defaults: SessionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Receive new-session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create the session on first sight and return its snapshot
    pub fn ensure_session(&self, id: u64) -> SessionInfo {
        self.with_session(id, |session| session.info())
    }

    /// Run `f` on the session, creating it on first sight.
    ///
    /// The decoder and output of a new session are opened without holding
    /// the session table, so capability toggles never wait on a device.
    pub(crate) fn with_session<R>(&self, id: u64, f: impl FnOnce(&mut VoiceSession) -> R) -> R {
        if let Some(session) = self.sessions.lock().get_mut(&id) {
            return f(session);
        }

        let session = self.open_session(id);
        let (result, spare) = {
            let mut sessions = self.sessions.lock();
            match sessions.entry(id) {
                Entry::Occupied(mut entry) => (f(entry.get_mut()), Some(session)),
                Entry::Vacant(entry) => (f(entry.insert(session)), None),
            }
        };

        match spare {
            // Lost a race with another creator of the same id
            Some(spare) => drop(spare),
            None => {
                tracing::info!("New voice session {}", id);
                // No receivers is fine
                let _ = self.events.send(SessionEvent::NewSession { session_id: id });
            }
        }
        result
    }

    fn open_session(&self, id: u64) -> VoiceSession {
        let buffer = create_shared_buffer(RING_BUFFER_CAPACITY);
        let flags = Arc::new(SessionFlags::new(self.defaults.listen, self.defaults.save));

        let decoder = match OpusDecoder::voice() {
            Ok(decoder) => Some(decoder),
            Err(e) => {
                tracing::error!("Session {}: failed to create decoder: {}", id, e);
                None
            }
        };

        let output = SessionOutput::new(
            id,
            buffer.clone(),
            flags.clone(),
            Recorder::for_session(&self.save_dir, id),
        );
        let output = match self.factory.open(output) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Session {}: failed to open playback: {}", id, e);
                None
            }
        };

        VoiceSession::new(id, decoder, output, buffer, flags)
    }

    /// Decode one frame of a session and queue it for playback
    pub fn decode_and_feed(&self, id: u64, payload: &[u8]) -> FeedOutcome {
        self.with_session(id, |session| self.feed(session, payload))
    }

    fn feed(&self, session: &mut VoiceSession, payload: &[u8]) -> FeedOutcome {
        if !session.flags.any_enabled() {
            return FeedOutcome::Gated;
        }

        let decoder = match (&mut session.decoder, &session.output) {
            (Some(decoder), Some(_)) => decoder,
            _ => return FeedOutcome::Unusable,
        };

        match decoder.decode(payload) {
            Ok(pcm) => {
                self.decoded_frames.fetch_add(1, Ordering::Relaxed);
                self.decoded_bytes
                    .fetch_add((pcm.len() * BYTES_PER_SAMPLE) as u64, Ordering::Relaxed);
                session.buffer.push_slice(pcm);
                FeedOutcome::Decoded(pcm.len())
            }
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Session {}: dropped frame: {}", session.id(), e);
                FeedOutcome::DecodeFailed
            }
        }
    }

    /// Feed every record of a voice batch datagram, in order.
    /// Returns the number of records processed.
    pub fn handle_datagram(&self, datagram: &[u8]) -> usize {
        let mut reader = FrameReader::new(datagram);
        let mut count = 0;

        for frame in reader.by_ref() {
            self.decode_and_feed(frame.session_id, frame.payload);
            count += 1;
        }

        if reader.is_truncated() {
            tracing::debug!(
                "Truncated voice batch ({} bytes), {} records kept",
                datagram.len(),
                count
            );
        }
        count
    }

    /// Toggle a capability. Returns false if the session does not exist.
    pub fn set_capability(&self, id: u64, capability: Capability, enabled: bool) -> bool {
        match self.sessions.lock().get(&id) {
            Some(session) => {
                session.flags.set(capability, enabled);
                tracing::info!("Session {}: {:?} set to {}", id, capability, enabled);
                true
            }
            None => false,
        }
    }

    pub fn session_info(&self, id: u64) -> Option<SessionInfo> {
        self.sessions.lock().get(&id).map(VoiceSession::info)
    }

    /// All sessions ordered by id
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.lock().values().map(VoiceSession::info).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoded_frames.load(Ordering::Relaxed)
    }

    pub fn decoded_bytes(&self) -> u64 {
        self.decoded_bytes.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            decoded_frames: self.decoded_frames(),
            decoded_bytes: self.decoded_bytes(),
            decode_errors: self.decode_errors(),
            sessions: self.session_count(),
        }
    }
}
