mod bits;
mod function;
mod lrc;
mod message;
mod request;
mod response;
mod wire;

pub use bits::{pack_bits, unpack_bits};
pub use function::{
    check_quantity, ExceptionCode, FunctionCode, EXCEPTION_FLAG, MAX_READ_BITS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
pub use lrc::{lrc, verify_lrc};
pub use message::{to_hex, Message, ModbusMessage, ModbusRequest, ModbusResponse, Pdu};
pub use request::RequestPdu;
pub use response::ResponsePdu;
