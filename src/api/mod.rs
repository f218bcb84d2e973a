pub mod modbus;

pub use modbus::*;
