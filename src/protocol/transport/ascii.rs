use std::{io::Write, sync::Arc, time::Duration};

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;

use super::{
    token::{encode_frame, Token, TokenReader},
    ModbusTransport, UnitFilter,
};
use crate::protocol::{
    channel::ByteChannel,
    error::{ModbusError, ModbusResult},
    modbus::{to_hex, verify_lrc, Message, ModbusRequest, ModbusResponse},
};

/// Unit id, PDU and LRC of the largest legal ASCII frame, with headroom.
pub const FRAME_CAPACITY: usize = 256;

struct InputState {
    tokens: TokenReader,
    frame: BytesMut,
}

struct OutputState {
    sink: Box<dyn Write + Send>,
    staging: BytesMut,
}

/// Modbus ASCII framing over any byte channel.
///
/// Reads and writes are serialized by separate locks, so one reader and one
/// writer may work on the same channel at once. Frames failing the LRC check
/// or addressed to units outside the filter are dropped and the reader
/// resynchronizes on the next start token; only channel failures surface.
pub struct AsciiTransport {
    channel: Arc<dyn ByteChannel>,
    input: Mutex<InputState>,
    output: Mutex<OutputState>,
    echo: bool,
}

impl AsciiTransport {
    pub fn new(channel: Arc<dyn ByteChannel>) -> ModbusResult<Self> {
        if !channel.is_open() {
            return Err(ModbusError::Configuration(format!(
                "channel {} is closed",
                channel.peer()
            )));
        }
        let input = InputState {
            tokens: TokenReader::new(channel.reader()?),
            frame: BytesMut::with_capacity(FRAME_CAPACITY),
        };
        let output = OutputState {
            sink: channel.writer()?,
            staging: BytesMut::with_capacity(FRAME_CAPACITY),
        };
        Ok(Self {
            channel,
            input: Mutex::new(input),
            output: Mutex::new(output),
            echo: false,
        })
    }

    /// Half-duplex lines read back every frame they send; drain that echo.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn channel(&self) -> &Arc<dyn ByteChannel> {
        &self.channel
    }

    /// Reads until a frame passes the LRC check (and the unit filter, if
    /// any). Leaves the body without its checksum in `input.frame`.
    fn read_frame(input: &mut InputState, units: Option<&dyn UnitFilter>) -> ModbusResult<()> {
        loop {
            while input.tokens.next_token()? != Token::Start {}

            input.frame.clear();
            let complete = loop {
                match input.tokens.next_token()? {
                    Token::Byte(byte) => {
                        if input.frame.len() == FRAME_CAPACITY {
                            log::debug!("Frame exceeds {FRAME_CAPACITY} bytes, resyncing");
                            break false;
                        }
                        input.frame.put_u8(byte);
                    }
                    Token::End => break true,
                    Token::Start => input.frame.clear(),
                    Token::Invalid => {
                        log::debug!("Invalid character inside frame, resyncing");
                        break false;
                    }
                }
            };
            if !complete {
                continue;
            }

            // Unit id, function code and LRC at minimum.
            if input.frame.len() < 3 {
                log::debug!("Dropping {} byte frame", input.frame.len());
                continue;
            }
            let body_len = input.frame.len() - 1;
            if !verify_lrc(&input.frame[..body_len], input.frame[body_len]) {
                log::debug!("LRC is wrong for frame {}", to_hex(&input.frame));
                continue;
            }
            input.frame.truncate(body_len);

            if let Some(units) = units {
                let unit_id = input.frame[0];
                if !units.accepts(unit_id) {
                    log::trace!("Skipping frame for unit {unit_id}");
                    continue;
                }
            }
            log::debug!("Received frame {}", to_hex(&input.frame));
            return Ok(());
        }
    }

    fn drain_echo(input: &mut InputState, tokens: usize) -> ModbusResult<()> {
        for _ in 0..tokens {
            input.tokens.next_token()?;
        }
        Ok(())
    }
}

impl ModbusTransport for AsciiTransport {
    fn write_message(&self, message: &dyn Message) -> ModbusResult<()> {
        let mut output = self.output.lock();
        let OutputState { sink, staging } = &mut *output;
        staging.clear();
        message.write_headless(staging);
        let frame = encode_frame(staging);
        sink.write_all(&frame)?;
        sink.flush()?;
        log::debug!("Sent frame {}", to_hex(staging));

        if self.echo {
            // Start, body bytes, LRC, end.
            let mut input = self.input.lock();
            Self::drain_echo(&mut input, staging.len() + 3)?;
        }
        Ok(())
    }

    fn read_request(&self, units: &dyn UnitFilter) -> ModbusResult<ModbusRequest> {
        let mut input = self.input.lock();
        Self::read_frame(&mut input, Some(units))?;
        ModbusRequest::decode_headless(&input.frame)
    }

    fn read_response(&self) -> ModbusResult<ModbusResponse> {
        let mut input = self.input.lock();
        Self::read_frame(&mut input, None)?;
        ModbusResponse::decode_headless(&input.frame)
    }

    fn set_timeout(&self, timeout: Duration) -> ModbusResult<()> {
        Ok(self.channel.set_timeout(timeout)?)
    }

    fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    fn close(&self) -> ModbusResult<()> {
        Ok(self.channel.close()?)
    }

    fn peer(&self) -> String {
        self.channel.peer()
    }
}

impl PartialEq for AsciiTransport {
    fn eq(&self, other: &Self) -> bool {
        self.channel.peer() == other.channel.peer()
    }
}

impl std::fmt::Debug for AsciiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsciiTransport")
            .field("peer", &self.channel.peer())
            .field("echo", &self.echo)
            .finish()
    }
}
