use std::fmt;

use bytes::{BufMut, BytesMut};

use super::{request::RequestPdu, response::ResponsePdu};
use crate::protocol::error::{ModbusError, ModbusResult};

pub trait Pdu: fmt::Debug + Clone + Send + Sync {
    fn function_code(&self) -> u8;
    fn encode_payload(&self, buf: &mut BytesMut);
    fn decode(function_code: u8, data: &[u8]) -> ModbusResult<Self>
    where
        Self: Sized;
}

/// Object safe view of a message used by transports that write both
/// requests and responses.
pub trait Message: fmt::Debug + Send + Sync {
    fn unit_id(&self) -> u8;
    fn function_code(&self) -> u8;
    /// Unit id, function code and payload; the only layout ASCII framing
    /// carries.
    fn write_headless(&self, buf: &mut BytesMut);

    fn hex_message(&self) -> String {
        let mut buf = BytesMut::new();
        self.write_headless(&mut buf);
        to_hex(&buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusMessage<P> {
    pub unit_id: u8,
    pub pdu: P,
}

pub type ModbusRequest = ModbusMessage<RequestPdu>;
pub type ModbusResponse = ModbusMessage<ResponsePdu>;

impl<P: Pdu> ModbusMessage<P> {
    pub fn new(unit_id: u8, pdu: P) -> Self {
        Self { unit_id, pdu }
    }

    pub fn decode_headless(body: &[u8]) -> ModbusResult<Self> {
        let [unit_id, function_code, payload @ ..] = body else {
            return Err(ModbusError::malformed(format!(
                "{} byte frame has no function code",
                body.len()
            )));
        };
        Ok(Self::new(*unit_id, P::decode(*function_code, payload)?))
    }
}

impl<P: Pdu> Message for ModbusMessage<P> {
    fn unit_id(&self) -> u8 {
        self.unit_id
    }

    fn function_code(&self) -> u8 {
        self.pdu.function_code()
    }

    fn write_headless(&self, buf: &mut BytesMut) {
        buf.put_u8(self.unit_id);
        buf.put_u8(self.pdu.function_code());
        self.pdu.encode_payload(buf);
    }
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
