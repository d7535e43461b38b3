//! A single voice session
//!
//! Sessions move from unknown to active when their first frame arrives and
//! stay active until the manager is dropped. There is no closed state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::buffer::SharedPcmBuffer;
use crate::audio::playback::OutputHandle;
use crate::codec::OpusDecoder;

/// Per-session capability that can be toggled at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Play the session on the audio output
    Listen,
    /// Append the session to its recording file
    Save,
}

/// Capability flags shared between the network task and the playback callback
#[derive(Debug, Default)]
pub struct SessionFlags {
    listen: AtomicBool,
    save: AtomicBool,
}

impl SessionFlags {
    pub fn new(listen: bool, save: bool) -> Self {
        Self {
            listen: AtomicBool::new(listen),
            save: AtomicBool::new(save),
        }
    }

    pub fn listen_enabled(&self) -> bool {
        self.listen.load(Ordering::Acquire)
    }

    pub fn save_enabled(&self) -> bool {
        self.save.load(Ordering::Acquire)
    }

    /// Whether frames of this session need decoding at all
    pub fn any_enabled(&self) -> bool {
        self.listen_enabled() || self.save_enabled()
    }

    pub fn set(&self, capability: Capability, enabled: bool) {
        match capability {
            Capability::Listen => self.listen.store(enabled, Ordering::Release),
            Capability::Save => self.save.store(enabled, Ordering::Release),
        }
    }
}

/// Decoder, playback output and flags of one speaker
pub struct VoiceSession {
    id: u64,
    /// Dropped first: stops the playback thread and closes the recording
    pub(crate) output: Option<Box<dyn OutputHandle>>,
    pub(crate) decoder: Option<OpusDecoder>,
    pub(crate) buffer: SharedPcmBuffer,
    pub(crate) flags: Arc<SessionFlags>,
}

impl VoiceSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn new(
        id: u64,
        decoder: Option<OpusDecoder>,
        output: Option<Box<dyn OutputHandle>>,
        buffer: SharedPcmBuffer,
        flags: Arc<SessionFlags>,
    ) -> Self {
        Self {
            id,
            output,
            decoder,
            buffer,
            flags,
        }
    }

    /// A session whose decoder or output failed to open never decodes
    pub fn is_usable(&self) -> bool {
        self.decoder.is_some() && self.output.is_some()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            listen: self.flags.listen_enabled(),
            save: self.flags.save_enabled(),
            usable: self.is_usable(),
            buffered_samples: self.buffer.len(),
        }
    }
}

/// Snapshot of a session for the front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub listen: bool,
    pub save: bool,
    pub usable: bool,
    pub buffered_samples: usize,
}
