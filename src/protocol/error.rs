use std::io;

use thiserror::Error;

/// Errors raised by the ASCII transport, the discovery façade and the slave
/// side process images.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// The byte channel failed, timed out or hit end-of-stream.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unit {0} is not registered")]
    UnitNotFound(u8),

    #[error("a unit registry needs at least one unit id")]
    EmptyUnitSet,

    #[error("illegal address: offset {offset} count {count} exceeds {len} entries")]
    IllegalAddress {
        offset: usize,
        count: usize,
        len: usize,
    },

    #[error("illegal quantity {count} (allowed 1..={max})")]
    IllegalQuantity { count: usize, max: usize },

    /// The remote unit answered with a Modbus exception response.
    #[error("exception 0x{exception_code:02x} for function 0x{function_code:02x}")]
    Exception { function_code: u8, exception_code: u8 },

    #[error("expected a response for function 0x{expected:02x}, got 0x{received:02x}")]
    UnexpectedResponse { expected: u8, received: u8 },

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// A façade command failed; `request` is the hex rendering of what was sent.
    #[error("Modbus processing error [request: {request}]: {source}")]
    Command {
        request: String,
        #[source]
        source: Box<ModbusError>,
    },
}

impl ModbusError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ModbusError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            ModbusError::Command { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    pub fn is_channel_failure(&self) -> bool {
        match self {
            ModbusError::Io(_) => true,
            ModbusError::Command { source, .. } => source.is_channel_failure(),
            _ => false,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ModbusError::MalformedMessage(message.into())
    }
}

pub type ModbusResult<T> = Result<T, ModbusError>;
