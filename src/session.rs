use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use portable_pty::{Child, CommandBuilder, ExitStatus, MasterPty, PtySize, native_pty_system};
use terminal_size::{Height, Width, terminal_size};

use crate::chain::SessionDriver;
use crate::expect::{Chunk, DEFAULT_TIMEOUT, OutputStream};

/// How often interactive mode wakes up to service resize requests.
const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// Current terminal dimensions as (rows, cols). Falls back to 24x80 when
/// there is no real terminal to ask (pipes, CI).
pub fn current_terminal_size() -> (u16, u16) {
    match terminal_size() {
        Some((Width(w), Height(h))) => (h, w),
        None => (24, 80),
    }
}

/// The live PTY pieces, present once the first hop has been spawned.
struct Pty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: OutputStream,
}

/// One interactive terminal session, possibly with several chained ssh
/// logins layered inside it. Created empty; the PTY itself appears on the
/// first `spawn` and is extended (never replaced) by every later hop's
/// `send_line`.
pub struct PtySession {
    rows: u16,
    cols: u16,
    pty: Option<Pty>,
}

impl PtySession {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            pty: None,
        }
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    fn pty_mut(&mut self) -> Result<&mut Pty> {
        self.pty.as_mut().context("session was never started")
    }

    /// Start the child process in a fresh PTY sized to this session.
    ///
    /// The command line is split on whitespace; the commands we build
    /// (`ssh user@host -pNN`) never need quoting. A reader thread drains
    /// the PTY into the output channel for the session's lifetime.
    fn spawn_child(&mut self, command: &str) -> Result<()> {
        let mut parts = command.split_whitespace();
        let program = parts.next().context("empty command line")?;
        let mut cmd = CommandBuilder::new(program);
        cmd.args(parts);
        // CommandBuilder starts from an empty environment; the child needs
        // the caller's (PATH, TERM, SSH_AUTH_SOCK, locale).
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("could not allocate a pseudo-terminal")?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("could not spawn '{command}'"))?;
        drop(pair.slave);

        let writer = pair.master.take_writer()?;
        let mut reader = pair.master.try_clone_reader()?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
            // tx drops here; the receiver sees the stream as closed
        });

        self.pty = Some(Pty {
            master: pair.master,
            child,
            writer,
            output: OutputStream::new(rx),
        });
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let pty = self.pty_mut()?;
        pty.writer.write_all(line.as_bytes())?;
        pty.writer.write_all(b"\n")?;
        pty.writer.flush()?;
        Ok(())
    }

    /// Block until `pattern` shows up in the child's output.
    pub fn await_pattern_timeout(&mut self, pattern: &str, timeout: Duration) -> Result<()> {
        let pty = self.pty_mut()?;
        pty.output.await_pattern(pattern, timeout)?;
        Ok(())
    }

    /// Propagate new terminal dimensions into the PTY. Bookkeeping is
    /// updated even before the session is spawned, so the next spawn uses
    /// the new size.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        self.rows = rows;
        self.cols = cols;
        if let Some(pty) = &self.pty {
            pty.master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })?;
        }
        Ok(())
    }

    /// Hand the local terminal over to the session until it ends.
    ///
    /// Raw mode for the duration, a helper thread pumping stdin into the
    /// PTY, and the main loop pumping PTY output to stdout. A SIGWINCH
    /// flag is serviced between chunks: the new size is read from the
    /// local terminal and pushed into the PTY before any further input
    /// reaches the child.
    pub fn interact(mut self) -> Result<ExitStatus> {
        let mut pty = self.pty.take().context("session was never started")?;
        let mut stdout = io::stdout();

        let resized = Arc::new(AtomicBool::new(false));
        #[cfg(unix)]
        signal_hook::flag::register(signal_hook::consts::SIGWINCH, Arc::clone(&resized))
            .context("could not register the terminal-resize handler")?;

        let _raw = RawModeGuard::enter()?;

        // Output captured after the last login marker belongs on screen
        let pending = pty.output.take_buffered();
        if !pending.is_empty() {
            stdout.write_all(pending.as_bytes())?;
            stdout.flush()?;
        }

        let mut writer = pty.writer;
        thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if writer.write_all(&buf[..n]).is_err() || writer.flush().is_err() {
                            break;
                        }
                    }
                }
            }
        });

        loop {
            if resized.swap(false, Ordering::Relaxed) {
                let (rows, cols) = current_terminal_size();
                self.rows = rows;
                self.cols = cols;
                let _ = pty.master.resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                });
            }
            match pty.output.poll(POLL_INTERVAL) {
                Chunk::Data(bytes) => {
                    stdout.write_all(&bytes)?;
                    stdout.flush()?;
                }
                Chunk::Idle => {}
                Chunk::Closed => break,
            }
        }

        let status = pty.child.wait()?;
        Ok(status)
    }
}

impl SessionDriver for PtySession {
    fn spawn(&mut self, command: &str) -> Result<()> {
        self.spawn_child(command)
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.write_line(line)
    }

    fn await_pattern(&mut self, pattern: &str) -> Result<()> {
        self.await_pattern_timeout(pattern, DEFAULT_TIMEOUT)
    }
}

/// Puts the local terminal in raw mode for the lifetime of the guard.
/// Restores on drop so a failed write can't strand the user's shell.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("could not enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}
