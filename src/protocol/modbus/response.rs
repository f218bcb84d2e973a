use bytes::{BufMut, BytesMut};

use super::{
    bits::{pack_bits, unpack_bits},
    function::{ExceptionCode, FunctionCode, EXCEPTION_FLAG},
    message::Pdu,
    wire::{coil_value, coil_word, expect_end, take_bytes, take_u16, take_u8},
};
use crate::protocol::error::{ModbusError, ModbusResult};

/// Response payloads. Bit reads decode to whole bytes worth of bits; callers
/// truncate to the quantity they asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePdu {
    ReadCoils { coils: Vec<bool> },
    ReadDiscreteInputs { inputs: Vec<bool> },
    ReadHoldingRegisters { values: Vec<u16> },
    ReadInputRegisters { values: Vec<u16> },
    WriteSingleCoil { reference: u16, value: bool },
    WriteSingleRegister { reference: u16, value: u16 },
    WriteMultipleCoils { reference: u16, count: u16 },
    WriteMultipleRegisters { reference: u16, count: u16 },
    Exception { function_code: u8, exception_code: u8 },
}

impl ResponsePdu {
    pub fn exception(function_code: u8, code: ExceptionCode) -> Self {
        ResponsePdu::Exception {
            function_code: function_code & !EXCEPTION_FLAG,
            exception_code: code.into(),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, ResponsePdu::Exception { .. })
    }
}

fn put_registers(buf: &mut BytesMut, values: &[u16]) {
    buf.put_u8((values.len() * 2) as u8);
    for value in values {
        buf.put_u16(*value);
    }
}

fn take_registers(data: &mut &[u8]) -> ModbusResult<Vec<u16>> {
    let byte_count = take_u8(data, "byte count")? as usize;
    if byte_count % 2 != 0 {
        return Err(ModbusError::malformed(format!(
            "odd register byte count {byte_count}"
        )));
    }
    let mut values = Vec::with_capacity(byte_count / 2);
    for _ in 0..byte_count / 2 {
        values.push(take_u16(data, "register value")?);
    }
    Ok(values)
}

fn take_bits(data: &mut &[u8]) -> ModbusResult<Vec<bool>> {
    let byte_count = take_u8(data, "byte count")? as usize;
    let packed = take_bytes(data, byte_count, "bit data")?;
    Ok(unpack_bits(packed, byte_count * 8))
}

impl Pdu for ResponsePdu {
    fn function_code(&self) -> u8 {
        let code = match self {
            ResponsePdu::ReadCoils { .. } => FunctionCode::ReadCoils,
            ResponsePdu::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            ResponsePdu::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            ResponsePdu::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            ResponsePdu::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            ResponsePdu::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            ResponsePdu::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            ResponsePdu::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            ResponsePdu::Exception { function_code, .. } => {
                return *function_code | EXCEPTION_FLAG
            }
        };
        code.into()
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            ResponsePdu::ReadCoils { coils: bits } | ResponsePdu::ReadDiscreteInputs { inputs: bits } => {
                let packed = pack_bits(bits);
                buf.put_u8(packed.len() as u8);
                buf.put_slice(&packed);
            }
            ResponsePdu::ReadHoldingRegisters { values }
            | ResponsePdu::ReadInputRegisters { values } => put_registers(buf, values),
            ResponsePdu::WriteSingleCoil { reference, value } => {
                buf.put_u16(*reference);
                buf.put_u16(coil_word(*value));
            }
            ResponsePdu::WriteSingleRegister { reference, value } => {
                buf.put_u16(*reference);
                buf.put_u16(*value);
            }
            ResponsePdu::WriteMultipleCoils { reference, count }
            | ResponsePdu::WriteMultipleRegisters { reference, count } => {
                buf.put_u16(*reference);
                buf.put_u16(*count);
            }
            ResponsePdu::Exception { exception_code, .. } => buf.put_u8(*exception_code),
        }
    }

    fn decode(function_code: u8, mut data: &[u8]) -> ModbusResult<Self> {
        let cursor = &mut data;
        if function_code & EXCEPTION_FLAG != 0 {
            let exception_code = take_u8(cursor, "exception code")?;
            expect_end(*cursor)?;
            return Ok(ResponsePdu::Exception {
                function_code: function_code & !EXCEPTION_FLAG,
                exception_code,
            });
        }
        let code = FunctionCode::try_from(function_code).map_err(|_| {
            ModbusError::malformed(format!("unknown response function 0x{function_code:02x}"))
        })?;
        let pdu = match code {
            FunctionCode::ReadCoils => ResponsePdu::ReadCoils {
                coils: take_bits(cursor)?,
            },
            FunctionCode::ReadDiscreteInputs => ResponsePdu::ReadDiscreteInputs {
                inputs: take_bits(cursor)?,
            },
            FunctionCode::ReadHoldingRegisters => ResponsePdu::ReadHoldingRegisters {
                values: take_registers(cursor)?,
            },
            FunctionCode::ReadInputRegisters => ResponsePdu::ReadInputRegisters {
                values: take_registers(cursor)?,
            },
            FunctionCode::WriteSingleCoil => ResponsePdu::WriteSingleCoil {
                reference: take_u16(cursor, "reference")?,
                value: coil_value(take_u16(cursor, "coil value")?)?,
            },
            FunctionCode::WriteSingleRegister => ResponsePdu::WriteSingleRegister {
                reference: take_u16(cursor, "reference")?,
                value: take_u16(cursor, "register value")?,
            },
            FunctionCode::WriteMultipleCoils => ResponsePdu::WriteMultipleCoils {
                reference: take_u16(cursor, "reference")?,
                count: take_u16(cursor, "count")?,
            },
            FunctionCode::WriteMultipleRegisters => ResponsePdu::WriteMultipleRegisters {
                reference: take_u16(cursor, "reference")?,
                count: take_u16(cursor, "count")?,
            },
        };
        expect_end(*cursor)?;
        Ok(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_response_layout() {
        let pdu = ResponsePdu::ReadInputRegisters { values: vec![45, 0x1234] };
        let mut buf = BytesMut::new();
        pdu.encode_payload(&mut buf);
        assert_eq!(&buf[..], &[0x04, 0x00, 0x2D, 0x12, 0x34]);
        assert_eq!(ResponsePdu::decode(0x04, &buf).unwrap(), pdu);
    }

    #[test]
    fn test_exception_response() {
        let pdu = ResponsePdu::exception(0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(pdu.function_code(), 0x83);
        let mut buf = BytesMut::new();
        pdu.encode_payload(&mut buf);
        assert_eq!(&buf[..], &[0x02]);
        let decoded = ResponsePdu::decode(0x83, &buf).unwrap();
        assert!(decoded.is_exception());
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_coil_response_pads_to_bytes() {
        let decoded = ResponsePdu::decode(0x01, &[0x01, 0b0000_0101]).unwrap();
        let ResponsePdu::ReadCoils { coils } = decoded else {
            panic!("expected coils");
        };
        assert_eq!(coils.len(), 8);
        assert_eq!(&coils[..3], &[true, false, true]);
    }

    #[test]
    fn test_malformed_responses() {
        assert!(ResponsePdu::decode(0x04, &[0x03, 0x00, 0x2D, 0x00]).is_err());
        assert!(ResponsePdu::decode(0x04, &[0x04, 0x00, 0x2D]).is_err());
        assert!(ResponsePdu::decode(0x2B, &[0x00]).is_err());
        assert!(ResponsePdu::decode(0x83, &[]).is_err());
    }
}
