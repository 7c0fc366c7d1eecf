use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::error::ExpectError;

/// Default wait for a pattern before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How much trailing output to attach to a failed expect.
const TRAILING_LEN: usize = 200;

/// Result of polling the stream for the next chunk of raw output.
pub enum Chunk {
    /// Bytes arrived from the child.
    Data(Vec<u8>),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The child's output stream has closed.
    Closed,
}

/// Pattern matching over a child process output stream.
///
/// The stream arrives as raw chunks on a channel (fed by whatever thread
/// reads the PTY). Decoupling the matching from the PTY keeps timeout and
/// end-of-stream behavior testable against a plain channel.
pub struct OutputStream {
    rx: Receiver<Vec<u8>>,
    buffer: String,
}

impl OutputStream {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buffer: String::new(),
        }
    }

    /// Block until `pattern` appears in the output, or fail.
    ///
    /// On a match, everything up to and including the match is consumed;
    /// output after the match stays buffered for the next call. Timeout
    /// and stream-end are distinct errors, both carrying the pattern and
    /// the trailing captured output.
    pub fn await_pattern(&mut self, pattern: &str, timeout: Duration) -> Result<(), ExpectError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buffer.find(pattern) {
                self.buffer = self.buffer.split_off(pos + pattern.len());
                return Ok(());
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO);
            match self.rx.recv_timeout(remaining) {
                Ok(bytes) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ExpectError::Timeout {
                        pattern: pattern.to_string(),
                        timeout,
                        trailing: self.trailing(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ExpectError::Eof {
                        pattern: pattern.to_string(),
                        trailing: self.trailing(),
                    });
                }
            }
        }
    }

    /// Wait up to `wait` for the next raw chunk. Used by interactive mode,
    /// which forwards bytes verbatim instead of matching them.
    pub fn poll(&self, wait: Duration) -> Chunk {
        match self.rx.recv_timeout(wait) {
            Ok(bytes) => Chunk::Data(bytes),
            Err(RecvTimeoutError::Timeout) => Chunk::Idle,
            Err(RecvTimeoutError::Disconnected) => Chunk::Closed,
        }
    }

    /// Take whatever matched-but-unconsumed output is still buffered.
    /// Interactive mode prints this before going raw so the user sees the
    /// shell prompt that followed the last login marker.
    pub fn take_buffered(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// The last stretch of captured output, for error context.
    fn trailing(&self) -> String {
        let start = self
            .buffer
            .char_indices()
            .rev()
            .nth(TRAILING_LEN - 1)
            .map_or(0, |(i, _)| i);
        self.buffer[start..].to_string()
    }
}
