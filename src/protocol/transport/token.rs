use std::io::{self, BufReader, Read};

use crate::protocol::modbus::lrc;

pub(crate) const FRAME_START: u8 = b':';
pub(crate) const FRAME_END: &[u8; 2] = b"\r\n";

/// One decoded unit of the ASCII stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Start,
    End,
    Byte(u8),
    Invalid,
}

pub(crate) struct TokenReader {
    inner: BufReader<Box<dyn Read + Send>>,
}

impl TokenReader {
    pub fn new(inner: Box<dyn Read + Send>) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    fn read_char(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "channel reached end of stream",
                    ))
                }
                Ok(_) => return Ok(byte[0]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn next_token(&mut self) -> io::Result<Token> {
        let token = match self.read_char()? {
            FRAME_START => Token::Start,
            b'\r' => match self.read_char()? {
                b'\n' => Token::End,
                FRAME_START => Token::Start,
                _ => Token::Invalid,
            },
            high => {
                let low = self.read_char()?;
                if low == FRAME_START {
                    return Ok(Token::Start);
                }
                let mut out = [0u8; 1];
                match hex::decode_to_slice([high, low], &mut out) {
                    Ok(()) => Token::Byte(out[0]),
                    Err(_) => Token::Invalid,
                }
            }
        };
        Ok(token)
    }
}

/// Renders `body` as a complete frame: start token, uppercase hex body, LRC, CRLF.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() * 2 + 5);
    frame.push(FRAME_START);
    frame.extend_from_slice(hex::encode_upper(body).as_bytes());
    frame.extend_from_slice(hex::encode_upper([lrc(body)]).as_bytes());
    frame.extend_from_slice(FRAME_END);
    frame
}
