use bytes::{BufMut, BytesMut};

use super::{
    bits::{pack_bits, unpack_bits},
    function::FunctionCode,
    message::Pdu,
    wire::{coil_value, coil_word, expect_end, take_bytes, take_u16, take_u8},
};
use crate::protocol::error::{ModbusError, ModbusResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPdu {
    ReadCoils { reference: u16, count: u16 },
    ReadDiscreteInputs { reference: u16, count: u16 },
    ReadHoldingRegisters { reference: u16, count: u16 },
    ReadInputRegisters { reference: u16, count: u16 },
    WriteSingleCoil { reference: u16, value: bool },
    WriteSingleRegister { reference: u16, value: u16 },
    WriteMultipleCoils { reference: u16, coils: Vec<bool> },
    WriteMultipleRegisters { reference: u16, values: Vec<u16> },
    /// A function code this stack does not serve; answered with Illegal Function.
    Unsupported { function_code: u8, data: Vec<u8> },
    /// Well-framed request carrying a value the function does not allow;
    /// answered with Illegal Data Value.
    IllegalValue { function_code: u8, data: Vec<u8> },
}

impl Pdu for RequestPdu {
    fn function_code(&self) -> u8 {
        let code = match self {
            RequestPdu::ReadCoils { .. } => FunctionCode::ReadCoils,
            RequestPdu::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            RequestPdu::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            RequestPdu::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            RequestPdu::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            RequestPdu::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            RequestPdu::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            RequestPdu::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            RequestPdu::Unsupported { function_code, .. }
            | RequestPdu::IllegalValue { function_code, .. } => return *function_code,
        };
        code.into()
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            RequestPdu::ReadCoils { reference, count }
            | RequestPdu::ReadDiscreteInputs { reference, count }
            | RequestPdu::ReadHoldingRegisters { reference, count }
            | RequestPdu::ReadInputRegisters { reference, count } => {
                buf.put_u16(*reference);
                buf.put_u16(*count);
            }
            RequestPdu::WriteSingleCoil { reference, value } => {
                buf.put_u16(*reference);
                buf.put_u16(coil_word(*value));
            }
            RequestPdu::WriteSingleRegister { reference, value } => {
                buf.put_u16(*reference);
                buf.put_u16(*value);
            }
            RequestPdu::WriteMultipleCoils { reference, coils } => {
                let packed = pack_bits(coils);
                buf.put_u16(*reference);
                buf.put_u16(coils.len() as u16);
                buf.put_u8(packed.len() as u8);
                buf.put_slice(&packed);
            }
            RequestPdu::WriteMultipleRegisters { reference, values } => {
                buf.put_u16(*reference);
                buf.put_u16(values.len() as u16);
                buf.put_u8((values.len() * 2) as u8);
                for value in values {
                    buf.put_u16(*value);
                }
            }
            RequestPdu::Unsupported { data, .. } | RequestPdu::IllegalValue { data, .. } => {
                buf.put_slice(data)
            }
        }
    }

    fn decode(function_code: u8, mut data: &[u8]) -> ModbusResult<Self> {
        let payload = data;
        let Ok(code) = FunctionCode::try_from(function_code) else {
            return Ok(RequestPdu::Unsupported {
                function_code,
                data: data.to_vec(),
            });
        };
        let cursor = &mut data;
        let pdu = match code {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let reference = take_u16(cursor, "reference")?;
                let count = take_u16(cursor, "count")?;
                match code {
                    FunctionCode::ReadCoils => RequestPdu::ReadCoils { reference, count },
                    FunctionCode::ReadDiscreteInputs => {
                        RequestPdu::ReadDiscreteInputs { reference, count }
                    }
                    FunctionCode::ReadHoldingRegisters => {
                        RequestPdu::ReadHoldingRegisters { reference, count }
                    }
                    _ => RequestPdu::ReadInputRegisters { reference, count },
                }
            }
            FunctionCode::WriteSingleCoil => {
                let reference = take_u16(cursor, "reference")?;
                match coil_value(take_u16(cursor, "coil value")?) {
                    Ok(value) => RequestPdu::WriteSingleCoil { reference, value },
                    Err(err) => {
                        log::debug!("Rejecting single coil write: {err}");
                        RequestPdu::IllegalValue {
                            function_code,
                            data: payload.to_vec(),
                        }
                    }
                }
            }
            FunctionCode::WriteSingleRegister => RequestPdu::WriteSingleRegister {
                reference: take_u16(cursor, "reference")?,
                value: take_u16(cursor, "register value")?,
            },
            FunctionCode::WriteMultipleCoils => {
                let reference = take_u16(cursor, "reference")?;
                let count = take_u16(cursor, "count")? as usize;
                let byte_count = take_u8(cursor, "byte count")? as usize;
                if byte_count != count.div_ceil(8) {
                    return Err(ModbusError::malformed(format!(
                        "byte count {byte_count} does not cover {count} coils"
                    )));
                }
                let packed = take_bytes(cursor, byte_count, "coil data")?;
                RequestPdu::WriteMultipleCoils {
                    reference,
                    coils: unpack_bits(packed, count),
                }
            }
            FunctionCode::WriteMultipleRegisters => {
                let reference = take_u16(cursor, "reference")?;
                let count = take_u16(cursor, "count")? as usize;
                let byte_count = take_u8(cursor, "byte count")? as usize;
                if byte_count != count * 2 {
                    return Err(ModbusError::malformed(format!(
                        "byte count {byte_count} does not cover {count} registers"
                    )));
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(take_u16(cursor, "register value")?);
                }
                RequestPdu::WriteMultipleRegisters { reference, values }
            }
        };
        expect_end(*cursor)?;
        Ok(pdu)
    }
}
