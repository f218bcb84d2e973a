//! Byte channels: the raw, bidirectional byte streams framed by the ASCII
//! transport. A channel hands out independent reader and writer halves so
//! reads and writes can be serialized separately.

#[cfg(test)]
pub(crate) mod memory;
mod serial;
mod socket;

use std::{
    io::{Read, Write},
    time::Duration,
};

pub use serial::SerialChannel;
pub use socket::SocketChannel;

pub trait ByteChannel: Send + Sync {
    fn reader(&self) -> std::io::Result<Box<dyn Read + Send>>;
    fn writer(&self) -> std::io::Result<Box<dyn Write + Send>>;

    /// Read timeout applied to subsequent reads on the reader half.
    fn set_timeout(&self, timeout: Duration) -> std::io::Result<()>;

    fn is_open(&self) -> bool;
    fn close(&self) -> std::io::Result<()>;

    /// Remote endpoint or device name, used as the connection identity.
    fn peer(&self) -> String;
}
