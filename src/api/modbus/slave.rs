use chrono::{DateTime, Local};
use serde::Serialize;
use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    acceptor::{AcceptorHandle, ConnectionAcceptor},
    traits::{PooledTransport, TransportFactory},
};
use crate::{
    core::config::SlaveConfig,
    protocol::{
        channel::{ByteChannel, SerialChannel, SocketChannel},
        error::ModbusResult,
        modbus::{Message, ResponsePdu},
        procimg::SlaveStore,
        transport::{AsciiTransport, ModbusTransport},
    },
};

/// Events kept for a slave handle that nobody drains.
const EVENT_BACKLOG: usize = 1024;

/// One request served by a slave.
#[derive(Debug, Clone, Serialize)]
pub struct SlaveEvent {
    pub timestamp: DateTime<Local>,
    pub peer: String,
    pub unit_id: u8,
    pub function_code: u8,
    pub request: String,
    pub response: String,
    pub exception: bool,
}

/// Serves requests on `transport` until its channel fails or closes.
///
/// Read timeouts and malformed requests do not end the loop; each pass
/// rechecks whether the channel is still open.
pub fn serve_connection(
    transport: &AsciiTransport,
    store: &SlaveStore,
    events: Option<&flume::Sender<SlaveEvent>>,
) {
    let peer = ModbusTransport::peer(transport);
    log::info!("Serving units {:?} to {peer}", store.unit_ids());

    while ModbusTransport::is_open(transport) {
        let request = match transport.read_request(store) {
            Ok(request) => request,
            Err(err) if err.is_timeout() => continue,
            Err(err) if !err.is_channel_failure() => {
                log::warn!("Dropping request from {peer}: {err}");
                continue;
            }
            Err(err) => {
                log::info!("Connection to {peer} ended: {err}");
                break;
            }
        };

        let response = store.execute(&request);
        if let Err(err) = transport.write_message(&response) {
            log::warn!("Failed to answer {peer}: {err}");
            break;
        }

        if let Some(events) = events {
            let event = SlaveEvent {
                timestamp: Local::now(),
                peer: peer.clone(),
                unit_id: request.unit_id,
                function_code: request.function_code(),
                request: request.hex_message(),
                response: response.hex_message(),
                exception: matches!(response.pdu, ResponsePdu::Exception { .. }),
            };
            if events.try_send(event).is_err() {
                log::trace!("Slave event dropped, receiver is full or gone");
            }
        }
    }

    if let Err(err) = ModbusTransport::close(transport) {
        log::debug!("Closing {peer} failed: {err}");
    }
}

impl PooledTransport for AsciiTransport {
    fn is_connected(&self) -> bool {
        self.is_open()
    }

    fn disconnect(&self) -> ModbusResult<()> {
        self.close()
    }

    fn describe(&self) -> String {
        self.peer()
    }
}

/// Serves each accepted connection on its own thread.
pub struct SlaveConnectionFactory {
    store: Arc<SlaveStore>,
    read_timeout: Duration,
    echo: bool,
    events: Option<flume::Sender<SlaveEvent>>,
}

impl SlaveConnectionFactory {
    pub fn new(store: Arc<SlaveStore>, config: &SlaveConfig) -> Self {
        Self {
            store,
            read_timeout: config.read_timeout(),
            echo: config.echo,
            events: None,
        }
    }

    pub fn with_events(mut self, events: flume::Sender<SlaveEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

impl TransportFactory for SlaveConnectionFactory {
    type Transport = AsciiTransport;

    fn create(&self, channel: SocketChannel) -> ModbusResult<Arc<AsciiTransport>> {
        channel.set_timeout(self.read_timeout)?;
        let peer = channel.peer();
        let transport = Arc::new(AsciiTransport::new(Arc::new(channel))?.with_echo(self.echo));

        let serving = transport.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        thread::Builder::new()
            .name(format!("slave-{peer}"))
            .spawn(move || serve_connection(&serving, &store, events.as_ref()))?;
        Ok(transport)
    }
}

enum SlaveBackend {
    Tcp(AcceptorHandle<AsciiTransport>),
    Serial {
        transport: Arc<AsciiTransport>,
        thread: Option<JoinHandle<()>>,
    },
}

/// Handle to a running ASCII slave, with an iterator-like view of the
/// requests it serves.
pub struct ModbusSlave {
    receiver: flume::Receiver<SlaveEvent>,
    store: Arc<SlaveStore>,
    backend: SlaveBackend,
}

impl ModbusSlave {
    /// Listens on `host:port` and serves every connection that dials in.
    pub fn start(
        host: &str,
        port: u16,
        store: Arc<SlaveStore>,
        config: &SlaveConfig,
    ) -> ModbusResult<Self> {
        let (sender, receiver) = flume::bounded(EVENT_BACKLOG);
        let factory = SlaveConnectionFactory::new(store.clone(), config).with_events(sender);
        let handle = ConnectionAcceptor::new(host, port, factory).spawn()?;
        log::info!(
            "Slave for units {:?} listening on {}",
            store.unit_ids(),
            handle.local_addr()
        );
        Ok(Self {
            receiver,
            store,
            backend: SlaveBackend::Tcp(handle),
        })
    }

    /// Serves a serial line on a dedicated thread.
    pub fn start_serial(
        port_name: &str,
        baud_rate: u32,
        store: Arc<SlaveStore>,
        config: &SlaveConfig,
    ) -> ModbusResult<Self> {
        let channel = SerialChannel::open(port_name, baud_rate, config.read_timeout())?;
        let transport = AsciiTransport::new(Arc::new(channel))?.with_echo(config.echo);
        Self::serve_line(Arc::new(transport), store, port_name)
    }

    /// Serves an already framed line on a thread named after `line`.
    pub(crate) fn serve_line(
        transport: Arc<AsciiTransport>,
        store: Arc<SlaveStore>,
        line: &str,
    ) -> ModbusResult<Self> {
        let (sender, receiver) = flume::bounded(EVENT_BACKLOG);
        let serving = transport.clone();
        let serving_store = store.clone();
        let thread = thread::Builder::new()
            .name(format!("slave-{line}"))
            .spawn(move || serve_connection(&serving, &serving_store, Some(&sender)))?;
        Ok(Self {
            receiver,
            store,
            backend: SlaveBackend::Serial {
                transport,
                thread: Some(thread),
            },
        })
    }

    /// Bound address of a TCP slave.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.backend {
            SlaveBackend::Tcp(handle) => Some(handle.local_addr()),
            SlaveBackend::Serial { .. } => None,
        }
    }

    pub fn store(&self) -> &Arc<SlaveStore> {
        &self.store
    }

    pub fn transports(&self) -> Vec<Arc<AsciiTransport>> {
        match &self.backend {
            SlaveBackend::Tcp(handle) => handle.transports(),
            SlaveBackend::Serial { transport, .. } => vec![transport.clone()],
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<SlaveEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SlaveEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn receiver(&self) -> &flume::Receiver<SlaveEvent> {
        &self.receiver
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        match &mut self.backend {
            SlaveBackend::Tcp(handle) => handle.halt(),
            SlaveBackend::Serial { transport, thread } => {
                let Some(thread) = thread.take() else {
                    return;
                };
                if let Err(err) = transport.disconnect() {
                    log::warn!("Failed to close serial slave: {err}");
                }
                if thread.join().is_err() {
                    log::error!("Serial slave thread panicked");
                }
            }
        }
    }
}

impl Drop for ModbusSlave {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        channel::memory::MemoryChannel,
        modbus::{ModbusResponse, Pdu},
        procimg::ProcessImage,
        transport::encode_frame,
    };

    #[test]
    fn test_serve_answers_until_channel_ends() {
        let channel = MemoryChannel::new();
        // A request for another unit, a corrupted frame, then a good request.
        channel.feed(&encode_frame(&[0x0B, 0x04, 0x00, 0x00, 0x00, 0x01]));
        channel.feed(b":0A0400000001F0\r\n");
        channel.feed(&encode_frame(&[0x0A, 0x04, 0x00, 0x00, 0x00, 0x02]));

        let transport = AsciiTransport::new(Arc::new(channel.clone())).unwrap();
        let store = SlaveStore::single(10, ProcessImage::new().with_input_registers([45; 13]));
        let (sender, receiver) = flume::unbounded();

        // Once drained the memory channel keeps timing out until closed.
        let watcher = channel.clone();
        let handle = thread::spawn(move || serve_connection(&transport, &store, Some(&sender)));
        let event = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        watcher.close().unwrap();
        handle.join().unwrap();

        assert_eq!(event.unit_id, 10);
        assert_eq!(event.function_code, 0x04);
        assert!(!event.exception);
        assert_eq!(
            channel.written(),
            encode_frame(&[0x0A, 0x04, 0x04, 0x00, 0x2D, 0x00, 0x2D])
        );
    }

    #[test]
    fn test_bad_coil_value_gets_illegal_data_value() {
        let channel = MemoryChannel::new();
        channel.feed(&encode_frame(&[0x0A, 0x05, 0x00, 0x00, 0x12, 0x34]));
        let transport = AsciiTransport::new(Arc::new(channel.clone())).unwrap();
        let store = SlaveStore::single(10, ProcessImage::new().with_coils([false; 4]));
        let (sender, receiver) = flume::unbounded();

        let watcher = channel.clone();
        let handle = thread::spawn(move || serve_connection(&transport, &store, Some(&sender)));
        let event = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        watcher.close().unwrap();
        handle.join().unwrap();

        assert!(event.exception);
        assert_eq!(event.function_code, 0x05);
        assert_eq!(channel.written(), encode_frame(&[0x0A, 0x85, 0x03]));
    }

    #[test]
    fn test_dropping_serial_slave_joins_its_thread() {
        let channel = MemoryChannel::new();
        channel.feed(&encode_frame(&[0x0A, 0x04, 0x00, 0x00, 0x00, 0x01]));
        let transport = Arc::new(AsciiTransport::new(Arc::new(channel.clone())).unwrap());
        let store = Arc::new(SlaveStore::single(10, ProcessImage::new().with_input_registers([7; 2])));

        let slave = ModbusSlave::serve_line(transport, store, "memory").unwrap();
        let events = slave.receiver().clone();
        assert_eq!(events.recv_timeout(Duration::from_secs(5)).unwrap().unit_id, 10);
        drop(slave);

        assert!(!channel.is_open());
        // The serving thread held the only sender.
        assert!(matches!(
            events.recv_timeout(Duration::from_millis(100)),
            Err(flume::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_slave_answers_with_exception_for_unknown_function() {
        let channel = MemoryChannel::new();
        channel.feed(&encode_frame(&[0x0A, 0x2B, 0x0E, 0x01, 0x00]));
        let transport = AsciiTransport::new(Arc::new(channel.clone())).unwrap();
        let store = SlaveStore::single(10, ProcessImage::new());
        let request = transport.read_request(&store).unwrap();
        assert_eq!(request.pdu.function_code(), 0x2B);
        let response = store.execute(&request);
        transport.write_message(&response).unwrap();

        channel.feed(&channel.written());
        let echoed: ModbusResponse = transport.read_response().unwrap();
        assert_eq!(
            echoed.pdu,
            ResponsePdu::Exception {
                function_code: 0x2B,
                exception_code: 0x01
            }
        );
    }
}
