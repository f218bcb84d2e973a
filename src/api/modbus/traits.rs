/// Core API traits: the command façade a master drives, and the seams the
/// connection acceptor uses to build and manage pooled transports.
use std::sync::Arc;

use crate::protocol::{
    channel::SocketChannel,
    error::{ModbusError, ModbusResult},
};

/// High-level Modbus master operations addressed to one unit.
///
/// Implementations perform one request/response exchange per call. The
/// operations with default bodies are not supported over ASCII here; they
/// fail with `NotImplemented` without touching the wire.
pub trait ModbusCommands {
    fn read_coils(&self, unit_id: u8, reference: u16, count: u16) -> ModbusResult<Vec<bool>>;

    fn read_discrete_inputs(
        &self,
        unit_id: u8,
        reference: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>>;

    fn read_holding_registers(
        &self,
        unit_id: u8,
        reference: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>>;

    fn read_input_registers(
        &self,
        unit_id: u8,
        reference: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>>;

    /// Returns the coil state echoed back by the unit.
    fn write_single_coil(&self, unit_id: u8, reference: u16, value: bool) -> ModbusResult<bool>;

    fn write_single_register(&self, unit_id: u8, reference: u16, value: u16) -> ModbusResult<()>;

    fn write_multiple_coils(&self, unit_id: u8, reference: u16, coils: &[bool])
        -> ModbusResult<()>;

    fn write_multiple_registers(
        &self,
        unit_id: u8,
        reference: u16,
        values: &[u16],
    ) -> ModbusResult<()>;

    fn read_exception_status(&self, _unit_id: u8) -> ModbusResult<u8> {
        Err(ModbusError::NotImplemented("read exception status"))
    }

    fn diagnostics(&self, _unit_id: u8, _sub_function: u16, _data: &[u16]) -> ModbusResult<Vec<u16>> {
        Err(ModbusError::NotImplemented("diagnostics"))
    }

    fn comm_event_counter(&self, _unit_id: u8) -> ModbusResult<(u16, u16)> {
        Err(ModbusError::NotImplemented("get comm event counter"))
    }

    fn comm_event_log(&self, _unit_id: u8) -> ModbusResult<Vec<u8>> {
        Err(ModbusError::NotImplemented("get comm event log"))
    }

    fn report_slave_id(&self, _unit_id: u8) -> ModbusResult<Vec<u8>> {
        Err(ModbusError::NotImplemented("report slave id"))
    }

    fn read_file_record(
        &self,
        _unit_id: u8,
        _file_number: u16,
        _record_number: u16,
        _record_length: u16,
    ) -> ModbusResult<Vec<u16>> {
        Err(ModbusError::NotImplemented("read file record"))
    }
}

/// A transport held in the acceptor's pool.
///
/// `PartialEq` is the pool identity: a newly accepted transport equal to a
/// pooled one replaces it, and the pooled one is closed first.
pub trait PooledTransport: PartialEq + Send + Sync + 'static {
    fn is_connected(&self) -> bool;
    fn disconnect(&self) -> ModbusResult<()>;
    fn describe(&self) -> String;
}

/// Builds a pooled transport for each accepted connection.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PooledTransport;

    fn create(&self, channel: SocketChannel) -> ModbusResult<Arc<Self::Transport>>;
}
