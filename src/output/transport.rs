// src/output/transport.rs - Byte-stream transports to the device
//!
//! [`Connector`] opens a fresh [`Transport`] for every connection attempt.
//! The serial implementation sits on `serial2-tokio`; the loopback one keeps
//! everything in memory and backs both the visualizer output and the tests.

use crate::tcode::DeviceState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

pub const DEFAULT_BAUD: u32 = 115200;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No serial port available")]
    NoPortAvailable,
    #[error("Failed to open '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport closed")]
    Closed,
}

/// An open, full-duplex byte stream. Reads and writes may run concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError>;

    async fn write_all(&self, buf: &[u8]) -> Result<(), TransportError> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            let n = self.write(remaining).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            remaining = &remaining[n..];
        }
        Ok(())
    }

    /// Release the underlying port.
    async fn close(&self) -> Result<(), TransportError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Transport>, TransportError>;

    fn describe(&self) -> String;
}

/// Paths of every serial port the OS reports.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    let ports = serial2_tokio::SerialPort::available_ports()?;
    Ok(ports.iter().map(|p| p.display().to_string()).collect())
}

/// Opens a serial port at a fixed baud rate.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: Option<String>,
    baud: u32,
}

impl SerialConnector {
    /// `port: None` picks the first available port at connect time.
    pub fn new(port: Option<String>, baud: u32) -> Self {
        Self { port, baud }
    }

    fn resolve_port(&self) -> Result<String, TransportError> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }
        list_ports()?
            .into_iter()
            .next()
            .ok_or(TransportError::NoPortAvailable)
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let path = self.resolve_port()?;
        tracing::info!("Opening serial port {} @ {} baud", path, self.baud);
        let port = serial2_tokio::SerialPort::open(&path, self.baud).map_err(|source| {
            TransportError::Open {
                port: path.clone(),
                source,
            }
        })?;
        Ok(Arc::new(SerialTransport { port, path }))
    }

    fn describe(&self) -> String {
        match &self.port {
            Some(port) => format!("serial {} @ {}", port, self.baud),
            None => format!("first serial port @ {}", self.baud),
        }
    }
}

pub struct SerialTransport {
    port: serial2_tokio::SerialPort,
    path: String,
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.port.read(buf).await?;
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let n = self.port.write(buf).await?;
        Ok(n)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // the OS handle is released when the last reference drops
        tracing::debug!("Closing serial port {}", self.path);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.path
    }
}

#[derive(Default)]
struct LoopbackInner {
    written: Mutex<Vec<u8>>,
    lines: Mutex<Vec<String>>,
    device: Mutex<DeviceState>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
    open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    log_frames: AtomicBool,
}

/// The far end of a loopback link: everything the host wrote, decoded, plus
/// a way to inject device output.
#[derive(Clone, Default)]
pub struct LoopbackDevice {
    inner: Arc<LoopbackInner>,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete newline-terminated lines received so far.
    pub fn lines(&self) -> Vec<String> {
        self.inner.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Last commanded position per axis.
    pub fn state(&self) -> DeviceState {
        self.inner.device.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Queue bytes for the host to read. Dropped when not open.
    pub fn push_inbound(&self, bytes: &[u8]) -> bool {
        match self.inner.inbound.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|tx| tx.send(bytes.to_vec()).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    fn receive(&self, buf: &[u8]) {
        let complete: Vec<String> = match self.inner.written.lock() {
            Ok(mut written) => {
                written.extend_from_slice(buf);
                let mut complete = Vec::new();
                while let Some(pos) = written.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = written.drain(..=pos).collect();
                    complete.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
                }
                complete
            }
            Err(_) => return,
        };

        for line in complete {
            if let Ok(mut device) = self.inner.device.lock() {
                if let Err(e) = device.apply(&line) {
                    tracing::warn!("Loopback device received a bad frame '{}': {}", line, e);
                }
                if self.inner.log_frames.load(Ordering::Relaxed) {
                    let positions: Vec<String> = device
                        .positions
                        .iter()
                        .map(|(axis, value)| format!("{}={}", axis, value))
                        .collect();
                    tracing::info!("visualizer: {}", positions.join(" "));
                }
            }
            if let Ok(mut lines) = self.inner.lines.lock() {
                lines.push(line);
            }
        }
    }
}

/// In-memory connector. Every `open` creates a new transport onto the same
/// [`LoopbackDevice`].
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    device: LoopbackDevice,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loopback that logs the decoded device position for every frame.
    pub fn visualizer() -> Self {
        let connector = Self::default();
        connector.device.inner.log_frames.store(true, Ordering::Relaxed);
        connector
    }

    pub fn device(&self) -> LoopbackDevice {
        self.device.clone()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let inner = &self.device.inner;
        if inner.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                port: "loopback".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "loopback refused"),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inbound) = inner.inbound.lock() {
            *inbound = Some(tx);
        }
        inner.open.store(true, Ordering::SeqCst);
        inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LoopbackTransport {
            device: self.device.clone(),
            inbound: tokio::sync::Mutex::new(InboundBuffer {
                rx,
                pending: Vec::new(),
            }),
        }))
    }

    fn describe(&self) -> String {
        if self.device.inner.log_frames.load(Ordering::Relaxed) {
            "visualizer".to_string()
        } else {
            "loopback".to_string()
        }
    }
}

struct InboundBuffer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

pub struct LoopbackTransport {
    device: LoopbackDevice,
    inbound: tokio::sync::Mutex<InboundBuffer>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inbound = self.inbound.lock().await;
        if inbound.pending.is_empty() {
            match inbound.rx.recv().await {
                Some(bytes) => inbound.pending = bytes,
                None => return Ok(0),
            }
        }
        let n = inbound.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&inbound.pending[..n]);
        inbound.pending.drain(..n);
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let inner = &self.device.inner;
        if !inner.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if inner.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "loopback write failure",
            )));
        }
        self.device.receive(buf);
        Ok(buf.len())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let inner = &self.device.inner;
        if let Ok(mut inbound) = inner.inbound.lock() {
            inbound.take();
        }
        inner.open.store(false, Ordering::SeqCst);
        inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "loopback"
    }
}
