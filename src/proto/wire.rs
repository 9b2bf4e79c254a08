//! Binary wire format for the command protocol.
//!
//! Everything is little-endian. Integers and floats are 32-bit, booleans are a
//! 0/1 i32, strings and blobs carry an i32 byte-length prefix. Replies are a
//! status word with the top bit set; the remaining bits are zero for success
//! and hold the UTF-8 message length for an error. Reply payload fields
//! follow the success word as ordinary records.

use std::io::{ErrorKind, Read, Write};

use crate::foundation::error::{BridgeError, BridgeResult};

/// Status word marker bit for replies.
pub const REPLY_MARKER: u32 = 0x8000_0000;

/// Decoded reply status, as seen by the host side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Success,
    Error(String),
}

/// Typed reader/writer pair over the byte-stream channel.
///
/// Reads block until the record is complete. A truncated record is a
/// [`BridgeError::Protocol`]; any other stream failure is
/// [`BridgeError::TransportIo`]. Both are fatal to the session.
pub struct Wire<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> Wire<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Read the opcode that starts the next command. `None` means the peer
    /// closed the stream at a record boundary (orderly end of session).
    pub fn read_command(&mut self) -> BridgeResult<Option<u32>> {
        let mut buf = [0u8; 4];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(BridgeError::transport_io(e.to_string())),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> BridgeResult<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                BridgeError::protocol("truncated record")
            } else {
                BridgeError::transport_io(e.to_string())
            }
        })
    }

    pub fn read_u32(&mut self) -> BridgeResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> BridgeResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> BridgeResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bool(&mut self) -> BridgeResult<bool> {
        Ok(self.read_i32()? != 0)
    }

    pub fn read_blob(&mut self) -> BridgeResult<Vec<u8>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(BridgeError::protocol(format!("negative length {len}")));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_string(&mut self) -> BridgeResult<String> {
        String::from_utf8(self.read_blob()?)
            .map_err(|_| BridgeError::protocol("string field is not valid utf-8"))
    }

    fn write_all(&mut self, buf: &[u8]) -> BridgeResult<()> {
        self.writer
            .write_all(buf)
            .map_err(|e| BridgeError::transport_io(e.to_string()))
    }

    pub fn write_u32(&mut self, v: u32) -> BridgeResult<()> {
        self.write_all(&v.to_le_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> BridgeResult<()> {
        self.write_all(&v.to_le_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> BridgeResult<()> {
        self.write_u32(v.to_bits())
    }

    pub fn write_bool(&mut self, v: bool) -> BridgeResult<()> {
        self.write_i32(i32::from(v))
    }

    pub fn write_string(&mut self, s: &str) -> BridgeResult<()> {
        self.write_i32(s.len() as i32)?;
        self.write_all(s.as_bytes())
    }

    pub fn write_binary(&mut self, b: &[u8]) -> BridgeResult<()> {
        self.write_i32(b.len() as i32)?;
        self.write_all(b)
    }

    /// Success sentinel: marker bit set, zero payload length.
    pub fn write_success(&mut self) -> BridgeResult<()> {
        self.write_u32(REPLY_MARKER)
    }

    /// Error reply: marker bit plus message length, then the message bytes.
    pub fn write_error(&mut self, message: &str) -> BridgeResult<()> {
        self.write_u32(REPLY_MARKER | (message.len() as u32 & !REPLY_MARKER))?;
        self.write_all(message.as_bytes())
    }

    /// Flush the reply out before the next command is read; replies are
    /// written whole and never interleave.
    pub fn flush(&mut self) -> BridgeResult<()> {
        self.writer
            .flush()
            .map_err(|e| BridgeError::transport_io(e.to_string()))
    }

    /// Host-side decode of a status word written by [`Wire::write_success`] or
    /// [`Wire::write_error`].
    pub fn read_reply(&mut self) -> BridgeResult<Reply> {
        let word = self.read_u32()?;
        if word & REPLY_MARKER == 0 {
            return Err(BridgeError::protocol(format!(
                "reply status word {word:#x} is missing the marker bit"
            )));
        }
        let len = (word & !REPLY_MARKER) as usize;
        if len == 0 {
            return Ok(Reply::Success);
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        let message = String::from_utf8(buf)
            .map_err(|_| BridgeError::protocol("error message is not valid utf-8"))?;
        Ok(Reply::Error(message))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn loopback(bytes: Vec<u8>) -> Wire<Cursor<Vec<u8>>, Vec<u8>> {
        Wire::new(Cursor::new(bytes), Vec::new())
    }

    #[test]
    fn numeric_fields_round_trip() {
        let mut w = loopback(Vec::new());
        w.write_i32(-123).unwrap();
        w.write_u32(0xdead_beef).unwrap();
        w.write_f32(1.5).unwrap();
        w.write_bool(true).unwrap();
        w.write_bool(false).unwrap();
        let (_, out) = w.into_parts();

        let mut r = loopback(out);
        assert_eq!(r.read_i32().unwrap(), -123);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert!(r.read_bool().unwrap());
        assert!(!r.read_bool().unwrap());
    }

    #[test]
    fn truncated_record_is_protocol_error() {
        let mut r = loopback(vec![1, 2]);
        assert!(matches!(
            r.read_i32().unwrap_err(),
            BridgeError::Protocol(_)
        ));
    }

    #[test]
    fn eof_at_command_boundary_is_clean() {
        let mut r = loopback(Vec::new());
        assert_eq!(r.read_command().unwrap(), None);
    }

    #[test]
    fn negative_blob_length_is_rejected() {
        let mut w = loopback(Vec::new());
        w.write_i32(-1).unwrap();
        let (_, out) = w.into_parts();
        let mut r = loopback(out);
        assert!(matches!(
            r.read_blob().unwrap_err(),
            BridgeError::Protocol(_)
        ));
    }
}
