// src/target/connection.rs

//! Byte-stream connection to a MicroPython board
//!
//! A background thread reads the stream and publishes what arrives into a
//! shared buffer. In text mode the listener answers the board's ENQ
//! flow-control byte with ACK right away, and holds back an incomplete
//! trailing UTF-8 sequence until the rest of it arrives.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const OUTPUT_ENQ: u8 = 0x05;
pub const OUTPUT_ACK: u8 = 0x06;

const READ_CHUNK: usize = 1024;

/// Transport contract the raw REPL protocol is written against
pub trait Connection: Send {
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to and including the earliest occurrence of any marker
    fn read_until(&mut self, markers: &[&[u8]], timeout: Duration) -> Result<Vec<u8>>;

    /// Read exactly `size` bytes
    fn read(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Take whatever has been received so far
    fn read_all(&mut self) -> Vec<u8>;

    fn set_text_mode(&mut self, text_mode: bool);

    fn incoming_is_empty(&self) -> bool;

    fn outgoing_is_empty(&self) -> bool;

    fn close(&mut self) -> Result<()>;
}

#[derive(Default)]
struct Incoming {
    data: Vec<u8>,
    error: Option<String>,
}

struct Shared {
    incoming: Mutex<Incoming>,
    available: Condvar,
    text_mode: AtomicBool,
    stopped: AtomicBool,
}

/// Connection over any readable and writable stream pair
pub struct StreamConnection {
    shared: Arc<Shared>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    writing: Arc<AtomicBool>,
    listener: Option<thread::JoinHandle<()>>,
}

impl StreamConnection {
    /// Start listening on `reader`; `writer` is shared with the listener
    /// so it can acknowledge flow control
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            incoming: Mutex::new(Incoming::default()),
            available: Condvar::new(),
            text_mode: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        let writer: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(writer)));

        let listener = {
            let shared = Arc::clone(&shared);
            let writer = Arc::clone(&writer);
            thread::Builder::new()
                .name("pipkin-serial".to_string())
                .spawn(move || listen(reader, shared, writer))
                .ok()
        };
        if listener.is_none() {
            warn!("Could not start connection listener thread");
        }

        Self {
            shared,
            writer,
            writing: Arc::new(AtomicBool::new(false)),
            listener,
        }
    }

    /// Open a serial device node
    ///
    /// USB CDC boards ignore line settings, so the device is used as is.
    pub fn open_serial(port: &str) -> Result<Self> {
        debug!("Opening serial port {}", port);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(port)
            .map_err(|e| Error::Communication(format!("Unable to connect to {port}: {e}")))?;
        let reader = file
            .try_clone()
            .map_err(|e| Error::Communication(format!("Unable to connect to {port}: {e}")))?;
        Ok(Self::new(reader, file))
    }

    fn wait_for<T>(
        &self,
        timeout: Duration,
        mut take: impl FnMut(&mut Vec<u8>) -> Option<T>,
    ) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut incoming = self.shared.incoming.lock();
        loop {
            if let Some(value) = take(&mut incoming.data) {
                return Ok(value);
            }
            if let Some(error) = &incoming.error {
                return Err(Error::Communication(format!(
                    "connection closed: {error} (pending {:?})",
                    String::from_utf8_lossy(&incoming.data)
                )));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Communication(format!(
                    "timed out after {:?}, read {:?}",
                    timeout,
                    String::from_utf8_lossy(&incoming.data)
                )));
            }
            self.shared
                .available
                .wait_for(&mut incoming, deadline - now);
        }
    }
}

impl Connection for StreamConnection {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.writing.store(true, Ordering::SeqCst);
        let result = {
            let mut writer = self.writer.lock();
            writer.write_all(data).and_then(|_| writer.flush())
        };
        self.writing.store(false, Ordering::SeqCst);
        result.map_err(|e| Error::Communication(format!("write failed: {e}")))?;
        Ok(data.len())
    }

    fn read_until(&mut self, markers: &[&[u8]], timeout: Duration) -> Result<Vec<u8>> {
        self.wait_for(timeout, |data| {
            let end = markers
                .iter()
                .filter_map(|m| find(data, m).map(|pos| pos + m.len()))
                .min()?;
            Some(data.drain(..end).collect())
        })
    }

    fn read(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.wait_for(timeout, |data| {
            (data.len() >= size).then(|| data.drain(..size).collect())
        })
    }

    fn read_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.shared.incoming.lock().data)
    }

    fn set_text_mode(&mut self, text_mode: bool) {
        self.shared.text_mode.store(text_mode, Ordering::SeqCst);
    }

    fn incoming_is_empty(&self) -> bool {
        self.shared.incoming.lock().data.is_empty()
    }

    fn outgoing_is_empty(&self) -> bool {
        !self.writing.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.writer
            .lock()
            .flush()
            .map_err(|e| Error::Communication(format!("flush failed: {e}")))?;
        // The listener may be blocked in read; it exits on the next byte or EOF
        if let Some(listener) = self.listener.take() {
            if listener.is_finished() {
                let _ = listener.join();
            }
        }
        Ok(())
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}

fn listen<R: Read>(mut reader: R, shared: Arc<Shared>, writer: Arc<Mutex<Box<dyn Write + Send>>>) {
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_CHUNK];

    while !shared.stopped.load(Ordering::SeqCst) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                publish_error(&shared, "EOF".to_string());
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                publish_error(&shared, e.to_string());
                return;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        let text_mode = shared.text_mode.load(Ordering::SeqCst);
        if text_mode && pending.last() == Some(&OUTPUT_ENQ) {
            debug!("Read ENQ, responding with ACK");
            let mut w = writer.lock();
            if let Err(e) = w.write_all(&[OUTPUT_ACK]).and_then(|_| w.flush()) {
                publish_error(&shared, e.to_string());
                return;
            }
            pending.pop();
        }

        let ready = if text_mode {
            split_complete_utf8(&mut pending)
        } else {
            std::mem::take(&mut pending)
        };
        if !ready.is_empty() {
            let mut incoming = shared.incoming.lock();
            incoming.data.extend_from_slice(&ready);
            shared.available.notify_all();
        }
    }
}

fn publish_error(shared: &Shared, error: String) {
    debug!("Connection listener stopped: {}", error);
    let mut incoming = shared.incoming.lock();
    incoming.error = Some(error);
    shared.available.notify_all();
}

/// Take the publishable prefix of `pending`, leaving an incomplete trailing
/// UTF-8 sequence behind. Invalid bytes are published as they are.
fn split_complete_utf8(pending: &mut Vec<u8>) -> Vec<u8> {
    match incomplete_tail_start(pending) {
        Some(start) => {
            let rest = pending.split_off(start);
            std::mem::replace(pending, rest)
        }
        None => std::mem::take(pending),
    }
}

/// Start of the last 1..=3 bytes when they are the prefix of a valid
/// multi-byte character, whatever precedes them
fn incomplete_tail_start(bytes: &[u8]) -> Option<usize> {
    (bytes.len().saturating_sub(3)..bytes.len()).find(|&start| {
        matches!(
            std::str::from_utf8(&bytes[start..]),
            Err(e) if e.valid_up_to() == 0 && e.error_len().is_none()
        )
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
