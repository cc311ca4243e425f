// Scripted serial backend shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eltako_gateway_lib::serial::{GatewayLink, SerialBackend, SerialError, SerialPortCandidate};

#[derive(Debug, Clone)]
pub enum Reply {
    /// Bytes returned by the first read, then silence
    Bytes(Vec<u8>),
    /// Every read times out
    Silence,
    /// Every read fails with a hard I/O error
    Broken,
}

#[derive(Default)]
pub struct MockBackend {
    ports: Vec<String>,
    replies: HashMap<String, Reply>,
    enumeration_fails: bool,
    pub opened: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub opened_at: Mutex<Vec<(String, u32)>>,
    pub written: Arc<Mutex<Vec<u8>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, path: &str, reply: Reply) -> Self {
        self.ports.push(path.to_string());
        self.replies.insert(path.to_string(), reply);
        self
    }

    pub fn failing_enumeration(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl SerialBackend for MockBackend {
    fn available_ports(&self) -> Result<Vec<SerialPortCandidate>, SerialError> {
        if self.enumeration_fails {
            return Err(SerialError::IoError(io::Error::other("udev unavailable")));
        }
        Ok(self.ports.iter().map(SerialPortCandidate::from_path).collect())
    }

    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        _read_timeout: Duration,
    ) -> Result<Box<dyn GatewayLink>, SerialError> {
        let reply = self
            .replies
            .get(path)
            .cloned()
            .ok_or_else(|| SerialError::PortNotFound(path.to_string()))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened_at.lock().unwrap().push((path.to_string(), baud_rate));

        Ok(Box::new(MockLink {
            reply,
            delivered: false,
            live: self.live.clone(),
            written: self.written.clone(),
        }))
    }
}

struct MockLink {
    reply: Reply,
    delivered: bool,
    live: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.reply {
            Reply::Bytes(bytes) if !self.delivered => {
                self.delivered = true;
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Reply::Broken => Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")),
            _ => {
                std::thread::sleep(Duration::from_millis(5));
                Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
            }
        }
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
