mod ascii;
mod token;

use std::{collections::BTreeSet, time::Duration};

use crate::protocol::{
    error::ModbusResult,
    modbus::{Message, ModbusRequest, ModbusResponse},
};

pub use ascii::{AsciiTransport, FRAME_CAPACITY};
pub use token::encode_frame;

/// Decides which unit ids a reader answers to; frames for other units are
/// skipped while reading requests.
pub trait UnitFilter {
    fn accepts(&self, unit_id: u8) -> bool;
}

impl UnitFilter for u8 {
    fn accepts(&self, unit_id: u8) -> bool {
        *self == unit_id
    }
}

impl UnitFilter for BTreeSet<u8> {
    fn accepts(&self, unit_id: u8) -> bool {
        self.contains(&unit_id)
    }
}

/// Message-level transport over a byte channel.
pub trait ModbusTransport: Send + Sync {
    fn write_message(&self, message: &dyn Message) -> ModbusResult<()>;
    fn read_request(&self, units: &dyn UnitFilter) -> ModbusResult<ModbusRequest>;
    fn read_response(&self) -> ModbusResult<ModbusResponse>;
    fn set_timeout(&self, timeout: Duration) -> ModbusResult<()>;
    fn is_open(&self) -> bool;
    fn close(&self) -> ModbusResult<()>;
    fn peer(&self) -> String;
}
