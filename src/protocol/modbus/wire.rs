use bytes::Buf;

use crate::protocol::error::{ModbusError, ModbusResult};

pub(crate) fn take_u8(data: &mut &[u8], field: &str) -> ModbusResult<u8> {
    if data.remaining() < 1 {
        return Err(ModbusError::malformed(format!("truncated before {field}")));
    }
    Ok(data.get_u8())
}

pub(crate) fn take_u16(data: &mut &[u8], field: &str) -> ModbusResult<u16> {
    if data.remaining() < 2 {
        return Err(ModbusError::malformed(format!("truncated before {field}")));
    }
    Ok(data.get_u16())
}

pub(crate) fn take_bytes<'a>(data: &mut &'a [u8], len: usize, field: &str) -> ModbusResult<&'a [u8]> {
    if data.len() < len {
        return Err(ModbusError::malformed(format!(
            "{field} needs {len} bytes, {} available",
            data.len()
        )));
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

pub(crate) fn expect_end(data: &[u8]) -> ModbusResult<()> {
    if !data.is_empty() {
        return Err(ModbusError::malformed(format!(
            "{} trailing bytes after payload",
            data.len()
        )));
    }
    Ok(())
}

pub(crate) fn coil_value(raw: u16) -> ModbusResult<bool> {
    match raw {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        other => Err(ModbusError::malformed(format!(
            "coil value 0x{other:04x} is neither 0xff00 nor 0x0000"
        ))),
    }
}

pub(crate) fn coil_word(value: bool) -> u16 {
    if value {
        0xFF00
    } else {
        0x0000
    }
}
