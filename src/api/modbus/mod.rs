pub mod acceptor;
pub mod discovery;
pub mod slave;
pub mod traits;

// Re-export core traits (API layer - abstract interfaces)
pub use traits::{ModbusCommands, PooledTransport, TransportFactory};

// Re-export concrete implementations
pub use acceptor::{AcceptorControl, AcceptorHandle, ConnectionAcceptor, DEFAULT_POLL_INTERVAL};
pub use discovery::{DiscoveryFactory, DiscoveryTransport};
pub use slave::{serve_connection, ModbusSlave, SlaveConnectionFactory, SlaveEvent};

// Re-export the protocol types callers need alongside the API
pub use crate::core::config::{DiscoveryConfig, ProbeOverrides, ProbeSettings, SlaveConfig};
pub use crate::protocol::{
    channel::{ByteChannel, SerialChannel, SocketChannel},
    error::{ModbusError, ModbusResult},
    modbus::{Message, ModbusRequest, ModbusResponse, RequestPdu, ResponsePdu},
    procimg::{ProcessImage, SlaveStore, UnitRegistry},
    transport::{AsciiTransport, ModbusTransport, UnitFilter},
};
