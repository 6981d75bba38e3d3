//! Packet codec.
//!
//! Pure encode/decode for the five wire messages, no I/O and no state.
//! Every packet starts with a 2-byte big-endian opcode; anything shorter
//! than 4 bytes is malformed regardless of kind.

use bytes::Bytes;
use thiserror::Error;

/// Opcodes, big-endian on the wire.
const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;

/// Transfer mode appended to every request. Octet only, no text translation.
const MODE_OCTET: &[u8] = b"octet";

/// Malformed wire data. Local only, never sent to the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },

    #[error("unknown opcode: {0}")]
    UnknownOpcode(u16),

    #[error("unknown error code: {0}")]
    UnknownErrorCode(u16),

    #[error("request carries an empty filename")]
    EmptyFilename,
}

/// Protocol error codes carried by `ERROR` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// One wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest { filename: String },
    WriteRequest { filename: String },
    Data { block: u16, payload: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
}

impl Packet {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::ReadRequest { .. } => "RRQ",
            Packet::WriteRequest { .. } => "WRQ",
            Packet::Data { .. } => "DATA",
            Packet::Ack { .. } => "ACK",
            Packet::Error { .. } => "ERROR",
        }
    }

    /// Encode to wire bytes. Total for every well-formed in-memory value.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::ReadRequest { filename } => encode_request(OP_RRQ, filename),
            Packet::WriteRequest { filename } => encode_request(OP_WRQ, filename),
            Packet::Data { block, payload } => {
                let mut buf = Vec::with_capacity(4 + payload.len());
                buf.extend_from_slice(&OP_DATA.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            Packet::Ack { block } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&OP_ACK.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf
            }
            Packet::Error { code, message } => {
                let mut buf = Vec::with_capacity(4 + message.len() + 1);
                buf.extend_from_slice(&OP_ERROR.to_be_bytes());
                buf.extend_from_slice(&code.as_u16().to_be_bytes());
                buf.extend_from_slice(message.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Decode one datagram.
    ///
    /// The data payload length is exactly `len - 4`; the 512-byte cap is the
    /// transfer loop's policy, not the codec's. Request and error strings run
    /// to the first NUL, or to the end of the datagram if none appears.
    pub fn decode(data: &[u8]) -> Result<Packet, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::TooShort { len: data.len() });
        }

        let opcode = u16::from_be_bytes([data[0], data[1]]);
        match opcode {
            OP_RRQ => Ok(Packet::ReadRequest {
                filename: decode_filename(data)?,
            }),
            OP_WRQ => Ok(Packet::WriteRequest {
                filename: decode_filename(data)?,
            }),
            OP_DATA => Ok(Packet::Data {
                block: u16::from_be_bytes([data[2], data[3]]),
                payload: Bytes::copy_from_slice(&data[4..]),
            }),
            OP_ACK => Ok(Packet::Ack {
                block: u16::from_be_bytes([data[2], data[3]]),
            }),
            OP_ERROR => {
                let raw = u16::from_be_bytes([data[2], data[3]]);
                let code =
                    ErrorCode::from_u16(raw).ok_or(DecodeError::UnknownErrorCode(raw))?;
                Ok(Packet::Error {
                    code,
                    message: take_cstr(&data[4..]),
                })
            }
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

fn encode_request(opcode: u16, filename: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + filename.len() + 1 + MODE_OCTET.len() + 1);
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(MODE_OCTET);
    buf.push(0);
    buf
}

fn decode_filename(data: &[u8]) -> Result<String, DecodeError> {
    // The mode field after the terminator is not validated; octet is assumed.
    let filename = take_cstr(&data[2..]);
    if filename.is_empty() {
        return Err(DecodeError::EmptyFilename);
    }
    Ok(filename)
}

/// Best-effort zero-terminated string: the scan never runs past the datagram.
fn take_cstr(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let bytes = packet.encode();
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        roundtrip(Packet::ReadRequest {
            filename: "a.txt".into(),
        });
        roundtrip(Packet::WriteRequest {
            filename: "dir/b.bin".into(),
        });
        roundtrip(Packet::Data {
            block: 1,
            payload: Bytes::from(vec![1, 2, 3]),
        });
        roundtrip(Packet::Data {
            block: 65535,
            payload: Bytes::from(vec![0u8; 512]),
        });
        roundtrip(Packet::Data {
            block: 7,
            payload: Bytes::new(),
        });
        roundtrip(Packet::Ack { block: 0 });
        roundtrip(Packet::Ack { block: 65535 });
        roundtrip(Packet::Error {
            code: ErrorCode::FileNotFound,
            message: "no such file".into(),
        });
        roundtrip(Packet::Error {
            code: ErrorCode::Undefined,
            message: String::new(),
        });
    }

    #[test]
    fn test_short_input_always_fails() {
        for len in 0..4 {
            let buf = vec![0u8; len];
            assert_eq!(Packet::decode(&buf), Err(DecodeError::TooShort { len }));
        }
        // Even with a valid opcode in front.
        assert!(Packet::decode(&[0, 3, 0]).is_err());
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(
            Packet::decode(&[0, 9, 0, 1]),
            Err(DecodeError::UnknownOpcode(9))
        );
    }

    #[test]
    fn test_unknown_error_code() {
        assert_eq!(
            Packet::decode(&[0, 5, 0, 42, b'x', 0]),
            Err(DecodeError::UnknownErrorCode(42))
        );
    }

    #[test]
    fn test_request_without_terminator_takes_rest() {
        // opcode RRQ + "abc" with no NUL and no mode.
        let decoded = Packet::decode(&[0, 1, b'a', b'b', b'c']).unwrap();
        assert_eq!(
            decoded,
            Packet::ReadRequest {
                filename: "abc".into()
            }
        );
    }

    #[test]
    fn test_request_empty_filename_rejected() {
        assert_eq!(
            Packet::decode(&[0, 2, 0, b'o']),
            Err(DecodeError::EmptyFilename)
        );
    }

    #[test]
    fn test_error_message_stops_at_terminator() {
        let decoded = Packet::decode(&[0, 5, 0, 1, b'h', b'i', 0, b'j', b'u', b'n', b'k']).unwrap();
        assert_eq!(
            decoded,
            Packet::Error {
                code: ErrorCode::FileNotFound,
                message: "hi".into()
            }
        );
    }

    #[test]
    fn test_oversized_payload_accepted_by_codec() {
        let mut buf = vec![0, 3, 0, 1];
        buf.extend_from_slice(&vec![0xAB; 600]);
        match Packet::decode(&buf).unwrap() {
            Packet::Data { block, payload } => {
                assert_eq!(block, 1);
                assert_eq!(payload.len(), 600);
            }
            other => panic!("expected DATA, got {other:?}"),
        }
    }
}
