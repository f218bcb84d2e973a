use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use super::ByteChannel;

/// In-memory channel: reads drain scripted input and report a timeout once
/// it runs dry, writes are captured (and looped back when echoing).
#[derive(Clone, Default)]
pub(crate) struct MemoryChannel {
    input: Arc<Mutex<VecDeque<u8>>>,
    written: Arc<Mutex<Vec<u8>>>,
    echo: bool,
    open: Arc<AtomicBool>,
    timeout: Arc<Mutex<Option<Duration>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let channel = Self::default();
        channel.open.store(true, Ordering::SeqCst);
        channel
    }

    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn pending_input(&self) -> usize {
        self.input.lock().len()
    }

    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }
}

impl ByteChannel for MemoryChannel {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.clone()))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.clone()))
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        *self.timeout.lock() = Some(timeout);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> io::Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn peer(&self) -> String {
        "memory".to_string()
    }
}

impl Read for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = self.input.lock();
        if input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no scripted input"));
        }
        let n = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().extend_from_slice(buf);
        if self.echo {
            self.input.lock().extend(buf.iter().copied());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
