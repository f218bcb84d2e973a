pub mod channel;
pub mod error;
pub mod modbus;
pub mod procimg;
pub mod transport;
