//! OSC 1.0 message encoding and decoding.
//!
//! Only the `i`, `f` and `s` argument types are understood. A datagram that
//! ends after its address is accepted as a message without arguments.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

/// Errors decoding an OSC datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OscError {
    #[error("OSC message truncated")]
    Truncated,
    #[error("OSC type tag string must start with ',', found {0:?}")]
    BadTypeTag(char),
    #[error("unsupported OSC argument type '{0}'")]
    UnsupportedType(char),
    #[error("OSC string is not valid UTF-8")]
    InvalidString,
}

/// One message argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
}

impl OscArg {
    fn tag(&self) -> u8 {
        match self {
            Self::Int(_) => b'i',
            Self::Float(_) => b'f',
            Self::String(_) => b's',
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Guess a type for a command line word: int, then float, else string.
    pub fn parse(word: &str) -> Self {
        if let Ok(i) = word.parse::<i32>() {
            Self::Int(i)
        } else if let Ok(f) = word.parse::<f32>() {
            Self::Float(f)
        } else {
            Self::String(word.to_string())
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// An OSC message: address pattern plus arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        write_string(&mut buf, &self.address);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        tags.extend(self.args.iter().map(|a| a.tag() as char));
        write_string(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(i) => buf.extend_from_slice(&i.to_be_bytes()),
                OscArg::Float(f) => buf.extend_from_slice(&f.to_be_bytes()),
                OscArg::String(s) => write_string(&mut buf, s),
            }
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        let mut cursor = Cursor::new(data);
        let address = read_string(&mut cursor)?;

        if cursor.position() as usize >= data.len() {
            return Ok(Self { address, args: Vec::new() });
        }

        let tags = read_string(&mut cursor)?;
        let mut chars = tags.chars();
        match chars.next() {
            Some(',') => {}
            Some(c) => return Err(OscError::BadTypeTag(c)),
            None => return Err(OscError::Truncated),
        }

        let args = chars
            .map(|tag| match tag {
                'i' => cursor.read_i32::<BigEndian>().map(OscArg::Int).map_err(|_| OscError::Truncated),
                'f' => cursor.read_f32::<BigEndian>().map(OscArg::Float).map_err(|_| OscError::Truncated),
                's' => read_string(&mut cursor).map(OscArg::String),
                other => Err(OscError::UnsupportedType(other)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { address, args })
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}

/// NUL-terminated, zero-padded to a multiple of four bytes.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    let pad = padded_len(s.len()) - s.len();
    buf.extend(std::iter::repeat(0u8).take(pad));
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, OscError> {
    let start = cursor.position() as usize;
    let rest = cursor.get_ref().get(start..).ok_or(OscError::Truncated)?;
    let len = rest.iter().position(|&b| b == 0).ok_or(OscError::Truncated)?;
    let padded = padded_len(len);
    if padded > rest.len() {
        return Err(OscError::Truncated);
    }
    let mut bytes = vec![0u8; padded];
    cursor.read_exact(&mut bytes).map_err(|_| OscError::Truncated)?;
    bytes.truncate(len);
    String::from_utf8(bytes).map_err(|_| OscError::InvalidString)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cue_play_round_trip() {
        let msg = OscMessage::new("/cue/play", vec!["1.000".into()]);
        let bytes = msg.encode();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(OscMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_exact_layout() {
        let bytes = OscMessage::new("/go", vec![OscArg::Int(1)]).encode();
        assert_eq!(
            bytes,
            vec![b'/', b'g', b'o', 0, b',', b'i', 0, 0, 0, 0, 0, 1]
        );
        let bytes = OscMessage::new("/go", vec![OscArg::Int(-2), OscArg::Float(1.0)]).encode();
        assert_eq!(&bytes[8..], &[0xFF, 0xFF, 0xFF, 0xFE, 0x3F, 0x80, 0, 0]);
    }

    #[test]
    fn test_four_byte_string_gets_full_pad() {
        let bytes = OscMessage::new("/abc", vec![]).encode();
        assert_eq!(&bytes[..8], b"/abc\0\0\0\0");
        assert_eq!(&bytes[8..], b",\0\0\0");
    }

    #[test]
    fn test_missing_type_tags_is_zero_args() {
        let msg = OscMessage::decode(b"/list/go\0\0\0\0").unwrap();
        assert_eq!(msg.address, "/list/go");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(OscMessage::decode(b"/abc"), Err(OscError::Truncated));
        assert_eq!(
            OscMessage::decode(b"/a\0\0xi\0\0\0\0\0\x01"),
            Err(OscError::BadTypeTag('x'))
        );
        assert_eq!(
            OscMessage::decode(b"/a\0\0,b\0\0\0\0\0\x01"),
            Err(OscError::UnsupportedType('b'))
        );
        assert_eq!(OscMessage::decode(b"/a\0\0,i\0\0\0\0"), Err(OscError::Truncated));
    }

    #[test]
    fn test_matches_rosc_encoding() {
        let ours = OscMessage::new(
            "/cue/stop",
            vec![OscArg::String("2.500".into()), OscArg::Int(-3), OscArg::Float(0.5)],
        )
        .encode();
        let theirs = rosc::encoder::encode(&rosc::OscPacket::Message(rosc::OscMessage {
            addr: "/cue/stop".to_string(),
            args: vec![
                rosc::OscType::String("2.500".to_string()),
                rosc::OscType::Int(-3),
                rosc::OscType::Float(0.5),
            ],
        }))
        .unwrap();
        assert_eq!(ours, theirs);
    }

    #[test]
    fn test_arg_parse() {
        assert_eq!(OscArg::parse("42"), OscArg::Int(42));
        assert_eq!(OscArg::parse("0.5"), OscArg::Float(0.5));
        assert_eq!(OscArg::parse("1.000x"), OscArg::String("1.000x".into()));
    }
}
