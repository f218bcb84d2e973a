use parking_lot::Mutex;

use super::{ProcessImage, UnitRegistry};
use crate::protocol::{
    error::{ModbusError, ModbusResult},
    modbus::{
        check_quantity, ExceptionCode, ModbusRequest, ModbusResponse, Pdu, RequestPdu,
        ResponsePdu, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
    },
    transport::UnitFilter,
};

/// Data served by a slave: a single unit, or several behind a registry.
pub enum SlaveStore {
    Single {
        unit_id: u8,
        image: Mutex<ProcessImage>,
    },
    Multiple(UnitRegistry),
}

impl SlaveStore {
    pub fn single(unit_id: u8, image: ProcessImage) -> Self {
        SlaveStore::Single {
            unit_id,
            image: Mutex::new(image),
        }
    }

    pub fn multiple(registry: UnitRegistry) -> Self {
        SlaveStore::Multiple(registry)
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        match self {
            SlaveStore::Single { unit_id, .. } => vec![*unit_id],
            SlaveStore::Multiple(registry) => registry.unit_ids(),
        }
    }

    /// Runs `f` on the image of `unit_id` while holding its lock.
    pub fn with_unit<R>(
        &self,
        unit_id: u8,
        f: impl FnOnce(&mut ProcessImage) -> R,
    ) -> ModbusResult<R> {
        match self {
            SlaveStore::Single { unit_id: id, image } if *id == unit_id => Ok(f(&mut image.lock())),
            SlaveStore::Single { .. } => Err(ModbusError::UnitNotFound(unit_id)),
            SlaveStore::Multiple(registry) => registry.with_unit(unit_id, f),
        }
    }

    /// Answers a request against the addressed unit's image.
    pub fn execute(&self, request: &ModbusRequest) -> ModbusResponse {
        let pdu = self
            .with_unit(request.unit_id, |image| apply(image, &request.pdu))
            .unwrap_or_else(|_| {
                ResponsePdu::exception(request.pdu.function_code(), ExceptionCode::SlaveDeviceFailure)
            });
        ModbusResponse::new(request.unit_id, pdu)
    }
}

impl UnitFilter for SlaveStore {
    fn accepts(&self, unit_id: u8) -> bool {
        match self {
            SlaveStore::Single { unit_id: id, .. } => *id == unit_id,
            SlaveStore::Multiple(registry) => registry.contains_unit(unit_id),
        }
    }
}

fn exception_for(err: &ModbusError) -> ExceptionCode {
    match err {
        ModbusError::IllegalAddress { .. } => ExceptionCode::IllegalDataAddress,
        ModbusError::IllegalQuantity { .. } => ExceptionCode::IllegalDataValue,
        _ => ExceptionCode::SlaveDeviceFailure,
    }
}

fn apply(image: &mut ProcessImage, request: &RequestPdu) -> ResponsePdu {
    match try_apply(image, request) {
        Ok(response) => response,
        Err(err) => {
            log::debug!("Request {request:?} failed: {err}");
            ResponsePdu::exception(request.function_code(), exception_for(&err))
        }
    }
}

fn try_apply(image: &mut ProcessImage, request: &RequestPdu) -> ModbusResult<ResponsePdu> {
    let response = match request {
        RequestPdu::ReadCoils { reference, count } => {
            check_quantity(*count as usize, MAX_READ_BITS)?;
            ResponsePdu::ReadCoils {
                coils: image
                    .coil_range(*reference as usize, *count as usize)?
                    .to_vec(),
            }
        }
        RequestPdu::ReadDiscreteInputs { reference, count } => {
            check_quantity(*count as usize, MAX_READ_BITS)?;
            ResponsePdu::ReadDiscreteInputs {
                inputs: image
                    .discrete_input_range(*reference as usize, *count as usize)?
                    .to_vec(),
            }
        }
        RequestPdu::ReadHoldingRegisters { reference, count } => {
            check_quantity(*count as usize, MAX_READ_REGISTERS)?;
            ResponsePdu::ReadHoldingRegisters {
                values: image
                    .holding_register_range(*reference as usize, *count as usize)?
                    .to_vec(),
            }
        }
        RequestPdu::ReadInputRegisters { reference, count } => {
            check_quantity(*count as usize, MAX_READ_REGISTERS)?;
            ResponsePdu::ReadInputRegisters {
                values: image
                    .input_register_range(*reference as usize, *count as usize)?
                    .to_vec(),
            }
        }
        RequestPdu::WriteSingleCoil { reference, value } => {
            image.set_coil(*reference as usize, *value)?;
            ResponsePdu::WriteSingleCoil {
                reference: *reference,
                value: *value,
            }
        }
        RequestPdu::WriteSingleRegister { reference, value } => {
            image.set_holding_register(*reference as usize, *value)?;
            ResponsePdu::WriteSingleRegister {
                reference: *reference,
                value: *value,
            }
        }
        RequestPdu::WriteMultipleCoils { reference, coils } => {
            check_quantity(coils.len(), MAX_WRITE_COILS)?;
            image.write_coils(*reference as usize, coils)?;
            ResponsePdu::WriteMultipleCoils {
                reference: *reference,
                count: coils.len() as u16,
            }
        }
        RequestPdu::WriteMultipleRegisters { reference, values } => {
            check_quantity(values.len(), MAX_WRITE_REGISTERS)?;
            image.write_holding_registers(*reference as usize, values)?;
            ResponsePdu::WriteMultipleRegisters {
                reference: *reference,
                count: values.len() as u16,
            }
        }
        RequestPdu::Unsupported { function_code, .. } => {
            ResponsePdu::exception(*function_code, ExceptionCode::IllegalFunction)
        }
        RequestPdu::IllegalValue { function_code, .. } => {
            ResponsePdu::exception(*function_code, ExceptionCode::IllegalDataValue)
        }
    };
    Ok(response)
}
