//! Portable PTY: spawn a session's argv inside a pseudo-terminal and bridge
//! its stdout/stdin to the owning async task.
//!
//! The output side uses a bounded(1) channel rather than the unbounded queue
//! a naive bridge would reach for: the reader thread blocks on `send` until
//! the previous chunk has actually been written to the WebSocket, so a slow
//! client applies backpressure all the way back to the PTY's read(2) loop
//! instead of the server buffering output it can't yet deliver (spec 4.2).

use std::io::{Read, Write};
use std::sync::{self, Arc, Mutex};

use bytes::Bytes;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

use crate::error::CoreError;

/// Rows/cols (and, where the frontend provides them, pixel dimensions) for a
/// PTY. `0` pixel dimensions are legal and simply mean "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Default for WinSize {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl From<WinSize> for PtySize {
    fn from(w: WinSize) -> Self {
        PtySize {
            rows: w.rows,
            cols: w.cols,
            pixel_width: w.pixel_width,
            pixel_height: w.pixel_height,
        }
    }
}

/// One event out of the PTY's read side.
#[derive(Debug)]
pub enum PtyEvent {
    Chunk(Bytes),
    /// The reader hit EOF or an I/O error; no further `Chunk`s will follow.
    Closed(std::io::Result<()>),
}

/// Sender to request a PTY resize. A dedicated thread owns the master side
/// and applies `master.resize()`, matching the teacher's split between the
/// blocking PTY handle and the async-facing bridge.
pub type ResizeSender = sync::mpsc::Sender<WinSize>;

/// A spawned session's handle: write to its stdin, resize it, or tear it down.
pub struct PtyHandle {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    resize_tx: ResizeSender,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    pid: Option<u32>,
}

impl PtyHandle {
    pub fn write(&self, data: &[u8]) -> Result<(), CoreError> {
        let mut w = self
            .writer
            .lock()
            .map_err(|_| CoreError::ChildLifecycle("pty writer mutex poisoned".into()))?;
        w.write_all(data).map_err(CoreError::Io)
    }

    /// Zero dimensions are rejected silently, matching the original ignoring
    /// a resize it can't apply via `ioctl`.
    pub fn resize(&self, size: WinSize) {
        if size.rows == 0 || size.cols == 0 {
            return;
        }
        let _ = self.resize_tx.send(size);
    }

    /// Send `signal_code` to the child and reap it. Mirrors the original's
    /// `kill(pid, sig)` followed by `waitpid`; a signal delivered to an
    /// already-exited child is not an error (section 4.5, once the child has
    /// exited on its own between the check and the kill).
    pub fn shutdown(&self, signal_code: i32) -> Result<(), CoreError> {
        if let Some(pid) = self.pid {
            let signal = Signal::try_from(signal_code)
                .map_err(|e| CoreError::ChildLifecycle(format!("invalid signal {signal_code}: {e}")))?;
            match signal::kill(Pid::from_raw(pid as i32), signal) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => return Err(CoreError::ChildLifecycle(format!("kill failed: {e}"))),
            }
        }
        let mut guard = self
            .child
            .lock()
            .map_err(|_| CoreError::ChildLifecycle("child mutex poisoned".into()))?;
        guard
            .wait()
            .map(|_| ())
            .map_err(|e| CoreError::ChildLifecycle(format!("wait failed: {e}")))
    }
}

/// Spawn `argv` inside a new PTY sized to `initial_size`, with `term_env` set
/// as `TERM`. Returns a handle plus a bounded(1) receiver of PTY output.
pub fn spawn(
    argv: &[String],
    term_env: &str,
    initial_size: WinSize,
) -> Result<(PtyHandle, mpsc::Receiver<PtyEvent>), CoreError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(initial_size.into())
        .map_err(|e| CoreError::ChildLifecycle(format!("openpty failed: {e}")))?;

    let mut cmd = CommandBuilder::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.env("TERM", term_env);

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| CoreError::ChildLifecycle(format!("spawn failed: {e}")))?;
    let pid = child.process_id();
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| CoreError::ChildLifecycle(format!("clone reader failed: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| CoreError::ChildLifecycle(format!("take writer failed: {e}")))?;
    let master = pair.master;

    let (tx, rx) = mpsc::channel::<PtyEvent>(1);
    let (resize_tx, resize_rx) = sync::mpsc::channel::<WinSize>();
    let child = Arc::new(Mutex::new(child));

    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.blocking_send(PtyEvent::Closed(Ok(())));
                    break;
                }
                Ok(n) => {
                    if tx
                        .blocking_send(PtyEvent::Chunk(Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(PtyEvent::Closed(Err(e)));
                    break;
                }
            }
        }
    });

    std::thread::spawn(move || {
        while let Ok(size) = resize_rx.recv() {
            let _ = master.resize(size.into());
        }
    });

    let handle = PtyHandle {
        writer: Arc::new(Mutex::new(writer)),
        resize_tx,
        child,
        pid,
    };
    Ok((handle, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn spawns_and_reads_output() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo hello".to_string()];
        let (_handle, mut rx) = spawn(&argv, "xterm-256color", WinSize::default()).unwrap();
        let mut collected = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            match event {
                PtyEvent::Chunk(b) => collected.extend_from_slice(&b),
                PtyEvent::Closed(_) => break,
            }
        }
        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("hello"), "got: {text:?}");
    }

    #[test]
    fn write_reaches_child_stdin() {
        let argv = vec!["cat".to_string()];
        let (handle, mut rx) = spawn(&argv, "xterm-256color", WinSize::default()).unwrap();
        handle.write(b"ping\n").unwrap();
        let mut collected = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            match event {
                PtyEvent::Chunk(b) => {
                    collected.extend_from_slice(&b);
                    if collected.len() >= 5 {
                        break;
                    }
                }
                PtyEvent::Closed(_) => break,
            }
        }
        handle.shutdown(1).ok();
        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("ping"), "got: {text:?}");
    }
}
