//! RESP2 framing for talking to a Redis-compatible store
//!
//! Only the client side is needed: commands are encoded as arrays of bulk
//! strings, replies are decoded incrementally from the read buffer.

use crate::error::StoreError;
use bytes::{Buf, BufMut, BytesMut};
use memchr::memchr;
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

/// Largest bulk string a server may send (Redis `proto-max-bulk-len`)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Bulk-string payload as text, `None` for nil
    pub fn into_text(self) -> Result<Option<String>, StoreError> {
        match self {
            RespValue::BulkString(None) => Ok(None),
            RespValue::BulkString(Some(data)) => {
                Ok(Some(String::from_utf8_lossy(&data).into_owned()))
            }
            RespValue::SimpleString(s) => Ok(Some(s)),
            RespValue::Integer(n) => Ok(Some(n.to_string())),
            RespValue::Error(e) => Err(StoreError::Protocol(e)),
            other => Err(StoreError::Protocol(format!(
                "expected bulk string, got {:?}",
                other
            ))),
        }
    }

    /// Fail on an error reply, pass everything else through
    pub fn check(self) -> Result<RespValue, StoreError> {
        match self {
            RespValue::Error(e) => Err(StoreError::Protocol(e)),
            other => Ok(other),
        }
    }
}

/// Build a command frame from its arguments
pub fn command<S: AsRef<[u8]>>(args: &[S]) -> RespValue {
    RespValue::Array(Some(
        args.iter()
            .map(|a| RespValue::BulkString(Some(a.as_ref().to_vec())))
            .collect(),
    ))
}

fn line(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.put_u8(tag);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

pub fn encode_resp_into(value: &RespValue, buf: &mut BytesMut) {
    match value {
        RespValue::SimpleString(s) => line(buf, b'+', s.as_bytes()),
        RespValue::Error(s) => line(buf, b'-', s.as_bytes()),
        RespValue::Integer(n) => line(buf, b':', n.to_string().as_bytes()),
        RespValue::BulkString(None) => line(buf, b'$', b"-1"),
        RespValue::BulkString(Some(data)) => {
            line(buf, b'$', data.len().to_string().as_bytes());
            buf.extend_from_slice(data);
            buf.extend_from_slice(CRLF);
        }
        RespValue::Array(None) => line(buf, b'*', b"-1"),
        RespValue::Array(Some(items)) => {
            line(buf, b'*', items.len().to_string().as_bytes());
            for item in items {
                encode_resp_into(item, buf);
            }
        }
    }
}

/// Parse one value from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only part of a frame.
pub fn parse(buf: &[u8]) -> Result<Option<(RespValue, usize)>, StoreError> {
    parse_at(buf, 0)
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, StoreError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    let line_end = match find_crlf(buf, pos + 1) {
        Some(i) => i,
        None => return Ok(None),
    };
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match buf[pos] {
        b'+' => Ok(Some((RespValue::SimpleString(text(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(text(line)?), next))),
        b':' => Ok(Some((RespValue::Integer(int(line)?), next))),
        b'$' => {
            let len = int(line)?;
            if len < 0 {
                return Ok(Some((RespValue::BulkString(None), next)));
            }
            let end = usize::try_from(len)
                .ok()
                .filter(|_| len <= MAX_BULK_LEN)
                .and_then(|len| next.checked_add(len))
                .ok_or_else(|| StoreError::Protocol(format!("bulk length {} out of range", len)))?;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != CRLF {
                return Err(StoreError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            Ok(Some((RespValue::BulkString(Some(buf[next..end].to_vec())), end + 2)))
        }
        b'*' => {
            let count = int(line)?;
            if count < 0 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            let mut items = Vec::with_capacity((count as usize).min(1024));
            let mut cursor = next;
            for _ in 0..count {
                match parse_at(buf, cursor)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(StoreError::Protocol(format!(
            "unexpected RESP type byte {:?}",
            other as char
        ))),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < buf.len() {
        let idx = i + memchr(b'\r', &buf[i..])?;
        if idx + 1 >= buf.len() {
            return None;
        }
        if buf[idx + 1] == b'\n' {
            return Some(idx);
        }
        i = idx + 1;
    }
    None
}

fn text(line: &[u8]) -> Result<String, StoreError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| StoreError::Protocol(format!("invalid utf-8 in reply: {}", e)))
}

fn int(line: &[u8]) -> Result<i64, StoreError> {
    text(line)?
        .parse()
        .map_err(|e| StoreError::Protocol(format!("invalid integer in reply: {}", e)))
}

/// Codec for `tokio_util::codec::Framed`
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = StoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, StoreError> {
        match parse(&src[..])? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = StoreError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), StoreError> {
        encode_resp_into(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let mut buf = BytesMut::new();
        encode_resp_into(&command(&["HGETALL", "orders"]), &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$7\r\nHGETALL\r\n$6\r\norders\r\n");
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            parse(b"+OK\r\n").unwrap(),
            Some((RespValue::SimpleString("OK".to_string()), 5))
        );
        assert_eq!(
            parse(b":-42\r\n").unwrap(),
            Some((RespValue::Integer(-42), 6))
        );
        assert_eq!(
            parse(b"$-1\r\n").unwrap(),
            Some((RespValue::BulkString(None), 5))
        );
        assert_eq!(
            parse(b"-ERR wrong type\r\n").unwrap().map(|(v, _)| v),
            Some(RespValue::Error("ERR wrong type".to_string()))
        );
    }

    #[test]
    fn test_parse_hgetall_reply() {
        let reply = b"*4\r\n$5\r\nshoes\r\n$1\r\n7\r\n$2\r\n_Z\r\n$1\r\n7\r\n";
        let (value, consumed) = parse(reply).unwrap().unwrap();
        assert_eq!(consumed, reply.len());
        match value {
            RespValue::Array(Some(items)) => {
                assert_eq!(items.len(), 4);
                assert_eq!(items[0], RespValue::BulkString(Some(b"shoes".to_vec())));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_partial_frames_wait_for_more() {
        let reply = b"*2\r\n$5\r\nshoes\r\n$1\r\n7\r\n";
        for cut in 0..reply.len() {
            assert_eq!(parse(&reply[..cut]).unwrap(), None, "cut at {}", cut);
        }
    }

    #[test]
    fn test_bulk_string_with_embedded_cr() {
        let reply = b"$3\r\na\rb\r\n";
        let (value, _) = parse(reply).unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Some(b"a\rb".to_vec())));
    }

    #[test]
    fn test_decoder_consumes_pipelined_replies() {
        let mut codec = RespCodec;
        let mut buf = BytesMut::from(&b"+OK\r\n+QUEUED\r\n:1"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("QUEUED".to_string()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::Integer(1)));
    }

    #[test]
    fn test_rejects_oversized_bulk_length() {
        // a length this large would otherwise leave the decoder waiting forever
        assert!(matches!(
            parse(b"$9223372036854775807\r\n"),
            Err(StoreError::Protocol(_))
        ));
        assert!(parse(b"$536870913\r\n").is_err());
        assert_eq!(parse(b"$536870912\r\n").unwrap(), None);
    }

    #[test]
    fn test_unknown_type_byte() {
        assert!(parse(b"?what\r\n").is_err());
    }

    #[test]
    fn test_into_text() {
        assert_eq!(
            RespValue::BulkString(Some(b"0.9".to_vec())).into_text().unwrap(),
            Some("0.9".to_string())
        );
        assert_eq!(RespValue::BulkString(None).into_text().unwrap(), None);
        assert!(RespValue::Error("ERR".to_string()).into_text().is_err());
    }
}
