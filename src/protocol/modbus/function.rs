use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::{Display, EnumIter};

use crate::protocol::error::{ModbusError, ModbusResult};

pub const MAX_READ_BITS: usize = 2000;
pub const MAX_READ_REGISTERS: usize = 125;
pub const MAX_WRITE_COILS: usize = 1968;
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Display, EnumIter,
)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Display)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
}

pub fn check_quantity(count: usize, max: usize) -> ModbusResult<()> {
    if count == 0 || count > max {
        return Err(ModbusError::IllegalQuantity { count, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_function_codes_round_trip_through_u8() {
        for code in FunctionCode::iter() {
            let raw: u8 = code.into();
            assert_eq!(FunctionCode::try_from(raw).unwrap(), code);
            assert_eq!(raw & EXCEPTION_FLAG, 0);
        }
        assert!(FunctionCode::try_from(0x2B).is_err());
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(check_quantity(1, MAX_READ_REGISTERS).is_ok());
        assert!(check_quantity(125, MAX_READ_REGISTERS).is_ok());
        assert!(check_quantity(0, MAX_READ_REGISTERS).is_err());
        assert!(matches!(
            check_quantity(126, MAX_READ_REGISTERS),
            Err(ModbusError::IllegalQuantity { count: 126, max: 125 })
        ));
    }
}
