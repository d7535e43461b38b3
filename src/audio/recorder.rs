//! Raw PCM recording sink
//!
//! One file per session, `<dir>/<session id>.pcm`, holding little-endian
//! i16 mono samples at 48kHz with no header. The file is opened on the first
//! write and appended to synchronously from the playback callback.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::AudioError;

const SCRATCH_SAMPLES: usize = 2048;

pub struct Recorder {
    path: PathBuf,
    file: Option<File>,
    /// Set after a failed open so the callback does not retry every frame
    failed: bool,
    bytes_written: u64,
}

impl Recorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            failed: false,
            bytes_written: 0,
        }
    }

    /// Recorder writing to the deterministic file of `session_id` in `dir`
    pub fn for_session(dir: &Path, session_id: u64) -> Self {
        Self::new(Self::path_for(dir, session_id))
    }

    pub fn path_for(dir: &Path, session_id: u64) -> PathBuf {
        dir.join(format!("{}.pcm", session_id))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn open(&mut self) -> Result<&mut File, AudioError> {
        if self.failed {
            return Err(AudioError::Recording(format!(
                "{} could not be opened",
                self.path.display()
            )));
        }

        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
                .map_err(|e| {
                    self.failed = true;
                    AudioError::Recording(format!("{}: {}", self.path.display(), e))
                })?;
            tracing::info!("Recording to {}", self.path.display());
            self.file = Some(file);
        }

        self.file
            .as_mut()
            .ok_or_else(|| AudioError::Recording("file not open".to_string()))
    }

    /// Append samples, opening the file first if needed
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        let file = self.open()?;
        let mut scratch = [0u8; SCRATCH_SAMPLES * 2];
        let mut written = 0u64;

        for chunk in samples.chunks(SCRATCH_SAMPLES) {
            for (sample, bytes) in chunk.iter().zip(scratch.chunks_exact_mut(2)) {
                bytes.copy_from_slice(&sample.to_le_bytes());
            }
            let len = chunk.len() * 2;
            file.write_all(&scratch[..len])
                .map_err(|e| AudioError::Recording(e.to_string()))?;
            written += len as u64;
        }

        self.bytes_written += written;
        Ok(())
    }
}
