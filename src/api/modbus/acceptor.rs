use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::RwLock;

use super::traits::{PooledTransport, TransportFactory};
use crate::protocol::{channel::SocketChannel, error::ModbusResult};

/// Sleep between accept attempts while no connection is pending.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stop flag and transport pool shared between an acceptor and its callers.
pub struct AcceptorControl<T> {
    running: Arc<AtomicBool>,
    pool: Arc<RwLock<Vec<Arc<T>>>>,
}

impl<T> Clone for AcceptorControl<T> {
    fn clone(&self) -> Self {
        Self {
            running: self.running.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<T: PooledTransport> AcceptorControl<T> {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            pool: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Asks the accept loop to exit after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the pooled transports.
    pub fn transports(&self) -> Vec<Arc<T>> {
        self.pool.read().clone()
    }
}

/// Accepts TCP connections and keeps one live transport per identity.
///
/// Each accepted socket is handed to the factory. Before the new transport
/// joins the pool, any pooled transport equal to it is disconnected and
/// dropped, and so is every pooled transport whose channel has closed.
pub struct ConnectionAcceptor<F: TransportFactory> {
    host: String,
    port: u16,
    poll_interval: Duration,
    factory: F,
    control: AcceptorControl<F::Transport>,
}

impl<F: TransportFactory> ConnectionAcceptor<F> {
    pub fn new(host: impl Into<String>, port: u16, factory: F) -> Self {
        Self {
            host: host.into(),
            port,
            poll_interval: DEFAULT_POLL_INTERVAL,
            factory,
            control: AcceptorControl::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn control(&self) -> AcceptorControl<F::Transport> {
        self.control.clone()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn transports(&self) -> Vec<Arc<F::Transport>> {
        self.control.transports()
    }

    pub fn bind(&self) -> ModbusResult<TcpListener> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).map_err(|err| {
            log::error!("Failed to bind {}:{}: {err}", self.host, self.port);
            err
        })?;
        listener.set_nonblocking(true)?;
        log::info!("Accepting connections on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Binds and runs the accept loop on the calling thread until stopped.
    pub fn run(&self) -> ModbusResult<()> {
        let listener = self.bind()?;
        self.serve(listener);
        Ok(())
    }

    /// Binds on the calling thread, so bind failures surface here, then
    /// runs the accept loop on a dedicated thread.
    pub fn spawn(self) -> ModbusResult<AcceptorHandle<F::Transport>> {
        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;
        let control = self.control();
        let thread = thread::Builder::new()
            .name(format!("acceptor-{local_addr}"))
            .spawn(move || self.serve(listener))?;
        Ok(AcceptorHandle {
            control,
            local_addr,
            thread: Some(thread),
        })
    }

    pub fn serve(&self, listener: TcpListener) {
        while self.control.is_running() {
            match listener.accept() {
                Ok((stream, addr)) => self.accept_connection(stream, addr),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.poll_interval)
                }
                Err(err) => {
                    log::error!("Accept failed on {}:{}: {err}", self.host, self.port);
                    thread::sleep(self.poll_interval);
                }
            }
        }
        self.shutdown();
    }

    fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        log::info!("Accepted connection from {addr}");
        let transport = match SocketChannel::new(stream)
            .map_err(Into::into)
            .and_then(|channel| self.factory.create(channel))
        {
            Ok(transport) => transport,
            Err(err) => {
                log::error!("Failed to set up transport for {addr}: {err}");
                return;
            }
        };

        let mut pool = self.control.pool.write();
        pool.retain(|existing| {
            if **existing == *transport {
                log::info!(
                    "Replacing {} with the connection from {addr}",
                    existing.describe()
                );
                if let Err(err) = existing.disconnect() {
                    log::error!("Failed to close {}: {err}", existing.describe());
                }
                return false;
            }
            let live = existing.is_connected();
            if !live {
                log::debug!("Dropping closed transport {}", existing.describe());
            }
            live
        });
        pool.push(transport);
        log::info!(
            "Pooled transports: [{}]",
            pool.iter()
                .map(|transport| transport.describe())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    fn shutdown(&self) {
        let mut pool = self.control.pool.write();
        for transport in pool.drain(..) {
            if let Err(err) = transport.disconnect() {
                log::warn!("Failed to close {}: {err}", transport.describe());
            }
        }
        log::info!("Stopped accepting on {}:{}", self.host, self.port);
    }
}

/// Running acceptor thread. Dropping the handle stops and joins it.
pub struct AcceptorHandle<T: PooledTransport> {
    control: AcceptorControl<T>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl<T: PooledTransport> AcceptorHandle<T> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> &AcceptorControl<T> {
        &self.control
    }

    pub fn transports(&self) -> Vec<Arc<T>> {
        self.control.transports()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stop(mut self) {
        self.halt();
    }

    pub(super) fn halt(&mut self) {
        self.control.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Acceptor thread on {} panicked", self.local_addr);
            }
        }
    }
}

impl<T: PooledTransport> Drop for AcceptorHandle<T> {
    fn drop(&mut self) {
        self.halt();
    }
}
