//! Primitive wire encodings shared by every message type (spec §6).
//!
//! `bool = u8 ∈ {0,1}`; `string = u16 length || utf8 bytes`;
//! `optional<T> = u8 present || T if present`; `timestamp = i64 milliseconds`.
//! Arrays are `u16 count || element*` unless a type calls out `u32 count`.
//!
//! Trailing optional fields must decode "absent on EOF" rather than erroring
//! (spec §4.2) — `Reader::read_bool_or_absent` and friends implement that
//! rule; everything else is a hard error on truncation.

use crate::error::ServerError;

pub const NICKNAME_MIN: usize = 3;
pub const NICKNAME_MAX: usize = 20;
pub const CONTENT_MAX: usize = 4096;

pub fn validate_nickname(nickname: &str) -> Result<(), ServerError> {
    let len = nickname.chars().count();
    if !(NICKNAME_MIN..=NICKNAME_MAX).contains(&len) {
        return Err(ServerError::InvalidNickname);
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<(), ServerError> {
    let len = content.len();
    if len == 0 || len > CONTENT_MAX {
        return Err(ServerError::InvalidContentLength);
    }
    Ok(())
}

/// A cursor over an in-memory payload. Every read advances the cursor;
/// truncation is an error except where noted (trailing optionals).
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ServerError> {
        if self.remaining() < n {
            return Err(ServerError::Protocol("unexpected end of payload".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ServerError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ServerError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ServerError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ServerError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ServerError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, ServerError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_timestamp(&mut self) -> Result<i64, ServerError> {
        self.read_i64()
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ServerError> {
        let len = self.read_u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Length-prefixed byte string with a `u32` length, for payloads that
    /// can legitimately exceed 64KiB (e.g. message content, public keys).
    pub fn read_bytes32(&mut self) -> Result<Vec<u8>, ServerError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, ServerError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| ServerError::Protocol("invalid utf8 in string field".into()))
    }

    pub fn read_string32(&mut self) -> Result<String, ServerError> {
        let bytes = self.read_bytes32()?;
        String::from_utf8(bytes).map_err(|_| ServerError::Protocol("invalid utf8 in string field".into()))
    }

    pub fn read_optional_i64(&mut self) -> Result<Option<i64>, ServerError> {
        if self.read_bool()? {
            Ok(Some(self.read_i64()?))
        } else {
            Ok(None)
        }
    }

    pub fn read_optional_string(&mut self) -> Result<Option<String>, ServerError> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    pub fn read_optional_bytes(&mut self) -> Result<Option<Vec<u8>>, ServerError> {
        if self.read_bool()? {
            Ok(Some(self.read_bytes()?))
        } else {
            Ok(None)
        }
    }

    /// A trailing optional `bool` field appended to a payload after this
    /// type was first frozen. A v1 sender simply never wrote it, so EOF
    /// here means "absent", not malformed — never a hard error.
    pub fn read_trailing_bool_or(&mut self, default: bool) -> bool {
        if self.is_empty() {
            return default;
        }
        self.read_bool().unwrap_or(default)
    }
}

/// Append-only payload builder. Encoding never fails: validation happens
/// before encoding is attempted.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    pub fn write_timestamp(&mut self, v: i64) {
        self.write_i64(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_bytes32(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_string32(&mut self, s: &str) {
        self.write_bytes32(s.as_bytes());
    }

    pub fn write_optional_i64(&mut self, v: Option<i64>) {
        match v {
            Some(v) => {
                self.write_bool(true);
                self.write_i64(v);
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_optional_string(&mut self, v: Option<&str>) {
        match v {
            Some(v) => {
                self.write_bool(true);
                self.write_string(v);
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_optional_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            Some(v) => {
                self.write_bool(true);
                self.write_bytes(v);
            }
            None => self.write_bool(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_primitive() {
        let mut w = Writer::new();
        w.write_bool(true);
        w.write_u16(1234);
        w.write_u32(567_890);
        w.write_i64(-42);
        w.write_string("hello");
        w.write_optional_i64(Some(7));
        w.write_optional_i64(None);
        w.write_optional_string(None);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u16().unwrap(), 1234);
        assert_eq!(r.read_u32().unwrap(), 567_890);
        assert_eq!(r.read_i64().unwrap(), -42);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_optional_i64().unwrap(), Some(7));
        assert_eq!(r.read_optional_i64().unwrap(), None);
        assert_eq!(r.read_optional_string().unwrap(), None);
        assert!(r.is_empty());
    }

    #[test]
    fn trailing_optional_absent_on_eof() {
        let w = Writer::new();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_trailing_bool_or(false), false);
    }

    #[test]
    fn nickname_length_bounds() {
        assert!(validate_nickname("ab").is_err());
        assert!(validate_nickname("abc").is_ok());
        assert!(validate_nickname(&"a".repeat(20)).is_ok());
        assert!(validate_nickname(&"a".repeat(21)).is_err());
    }

    #[test]
    fn content_length_bounds() {
        assert!(validate_content("").is_err());
        assert!(validate_content("hi").is_ok());
        assert!(validate_content(&"a".repeat(4096)).is_ok());
        assert!(validate_content(&"a".repeat(4097)).is_err());
    }
}
