use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serialport::{DataBits, Parity, SerialPort, StopBits};

use super::ByteChannel;

/// Serial line carrying ASCII frames, opened 7E1 as Modbus ASCII expects.
pub struct SerialChannel {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    name: String,
    open: AtomicBool,
}

impl SerialChannel {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
        let builder = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(timeout);

        #[cfg(unix)]
        let port: Box<dyn SerialPort> = {
            let mut handle = builder.open_native().map_err(io::Error::from)?;
            handle.set_exclusive(true).map_err(io::Error::from)?;
            Box::new(handle)
        };

        #[cfg(not(unix))]
        let port = builder.open().map_err(io::Error::from)?;

        log::info!("Opened serial port {port_name} at {baud_rate} baud");
        Ok(Self::from_port(port_name, port))
    }

    pub fn from_port(name: &str, port: Box<dyn SerialPort>) -> Self {
        Self {
            port: Arc::new(Mutex::new(port)),
            name: name.to_string(),
            open: AtomicBool::new(true),
        }
    }
}

impl ByteChannel for SerialChannel {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        // Timeouts live on the handle, so the reader shares the primary one.
        Ok(Box::new(SharedPort(self.port.clone())))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        let cloned = self.port.lock().try_clone().map_err(io::Error::from)?;
        Ok(Box::new(OwnedPort(cloned)))
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.port
            .lock()
            .set_timeout(timeout)
            .map_err(io::Error::from)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> io::Result<()> {
        // The device is released when the last handle drops.
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}

struct SharedPort(Arc<Mutex<Box<dyn SerialPort>>>);

impl Read for SharedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().read(buf)
    }
}

struct OwnedPort(Box<dyn SerialPort>);

impl Write for OwnedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
