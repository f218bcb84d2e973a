use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::ByteChannel;

/// TCP stream carrying ASCII frames.
#[derive(Debug)]
pub struct SocketChannel {
    stream: TcpStream,
    peer: SocketAddr,
    open: Arc<AtomicBool>,
}

impl SocketChannel {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        // Accepted streams may inherit non-blocking mode from the listener.
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            open: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::new(stream),
                Err(err) => {
                    log::debug!("Connect to {candidate} failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        }))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn half(&self) -> io::Result<TrackedStream> {
        Ok(TrackedStream {
            stream: self.stream.try_clone()?,
            open: self.open.clone(),
        })
    }
}

impl ByteChannel for SocketChannel {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.half()?))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.half()?))
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> io::Result<()> {
        self.open.store(false, Ordering::SeqCst);
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Cloned stream handle that flags the channel closed once the peer goes away.
struct TrackedStream {
    stream: TcpStream,
    open: Arc<AtomicBool>,
}

impl TrackedStream {
    fn observe<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if let Err(err) = &result {
            if matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ) {
                self.open.store(false, Ordering::SeqCst);
            }
        }
        result
    }
}

impl Read for TrackedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.stream.read(buf);
        if matches!(result, Ok(0)) && !buf.is_empty() {
            self.open.store(false, Ordering::SeqCst);
        }
        self.observe(result)
    }
}

impl Write for TrackedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.stream.write(buf);
        self.observe(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.stream.flush();
        self.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_peer_hangup_marks_channel_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = SocketChannel::connect(addr, Duration::from_secs(1)).unwrap();
        let (server, _) = listener.accept().unwrap();

        assert!(client.is_open());
        assert_eq!(client.peer(), addr.to_string());
        drop(server);

        let mut reader = client.reader().unwrap();
        client.set_timeout(Duration::from_secs(1)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert!(!client.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client =
            SocketChannel::connect(listener.local_addr().unwrap(), Duration::from_secs(1)).unwrap();
        client.close().unwrap();
        assert!(!client.is_open());
        client.close().unwrap();
    }
}
