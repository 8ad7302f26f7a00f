//! PTY spawning and low-level I/O.
//!
//! Wraps one child process attached to a freshly allocated PTY pair.
//! The master side is held here; the session layer drives reads through
//! the cloned reader returned at spawn time.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Initial window size before the first client resize arrives.
const INITIAL_COLS: u16 = 80;
const INITIAL_ROWS: u16 = 24;

/// Errors raised by session and PTY operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The host platform has no PTY abstraction.
    #[error("PTY is not supported on this platform")]
    Unsupported,

    /// Failed to allocate the PTY or spawn the child.
    #[error("failed to start pty: {0}")]
    Spawn(String),

    /// Failed to write input to the PTY master.
    #[error("failed to write to pty: {0}")]
    Write(String),

    /// Failed to change the PTY window size.
    #[error("failed to resize pty: {0}")]
    Resize(String),

    /// The PTY has already been closed.
    #[error("pty is closed")]
    Closed,
}

/// Handle to the master side of a spawned PTY and its child process.
pub struct PtyHandle {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    size: std::sync::Mutex<(u16, u16)>,
}

impl PtyHandle {
    /// Spawns `command` attached to a new PTY pair.
    ///
    /// The child runs with the slave as its stdio and `TERM` set for a
    /// 256-color terminal. Returns the handle and a reader over the
    /// master device.
    pub fn spawn(command: &str) -> Result<(Self, Box<dyn Read + Send>), SessionError> {
        if cfg!(windows) {
            return Err(SessionError::Unsupported);
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: INITIAL_ROWS,
                cols: INITIAL_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let handle = PtyHandle {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            size: std::sync::Mutex::new((INITIAL_COLS, INITIAL_ROWS)),
        };

        Ok((handle, reader))
    }

    /// Writes input bytes to the PTY master.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;
        writer
            .write_all(data)
            .map_err(|e| SessionError::Write(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::Write(e.to_string()))?;
        Ok(())
    }

    /// Changes the PTY window size.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = self.master.lock().await;
        let master = master.as_ref().ok_or(SessionError::Closed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Resize(e.to_string()))?;
        *self.size.lock().unwrap() = (cols, rows);
        Ok(())
    }

    /// Last size applied to the PTY, as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    /// Drops the master device and its writer, closing the PTY.
    pub async fn close_master(&self) {
        self.writer.lock().await.take();
        self.master.lock().await.take();
    }

    /// Force-terminates the child if it is still running, then reaps it.
    pub async fn kill_and_reap(&self) {
        let mut child = self.child.lock().await;
        if let Some(mut child) = child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }

    /// Whether the child process is still running.
    pub async fn child_running(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}
