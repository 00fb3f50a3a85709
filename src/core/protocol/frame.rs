// src/core/protocol/frame.rs

//! RESP-style frames and the `tokio_util` codec used to talk to admin agents.
//!
//! Requests are arrays of bulk strings. Replies are simple strings, errors,
//! integers, bulk strings (JSON payloads for structured data), nulls or arrays.

use crate::core::errors::ClusterAdminError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

// Agents only ever send small administrative payloads.
const MAX_ARRAY_LEN: usize = 64 * 1024;
const MAX_BULK_LEN: usize = 64 * 1024 * 1024;
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Builds a request frame from command words.
    pub fn command<I, S>(words: I) -> Frame
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        Frame::Array(words.into_iter().map(|w| Frame::Bulk(w.into())).collect())
    }

    /// Returns the payload of a bulk or simple string reply as UTF-8 text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::Simple(s) => Some(s.clone()),
            Frame::Bulk(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = ClusterAdminError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

fn write_frame(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => write_line(dst, b'+', s.as_bytes()),
        Frame::Error(s) => write_line(dst, b'-', s.as_bytes()),
        Frame::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
        Frame::Bulk(b) => {
            write_line(dst, b'$', b.len().to_string().as_bytes());
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            write_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_frame(item, dst);
            }
        }
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(body);
    dst.extend_from_slice(CRLF);
}

/// Outcome of a parse attempt over a buffer that may hold a partial frame.
enum Parse {
    Incomplete,
    Invalid(String),
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ClusterAdminError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut cursor: &[u8] = &src[..];
        match parse_frame(&mut cursor, 0) {
            Ok(frame) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(Parse::Incomplete) => Ok(None),
            Err(Parse::Invalid(reason)) => Err(ClusterAdminError::Protocol(reason)),
        }
    }
}

fn parse_frame(cursor: &mut &[u8], depth: usize) -> Result<Frame, Parse> {
    if depth > MAX_DEPTH {
        return Err(Parse::Invalid("frame nesting too deep".into()));
    }
    let Some((&prefix, rest)) = cursor.split_first() else {
        return Err(Parse::Incomplete);
    };
    *cursor = rest;
    let line = take_line(cursor)?;

    match prefix {
        b'+' => Ok(Frame::Simple(String::from_utf8_lossy(line).into_owned())),
        b'-' => Ok(Frame::Error(String::from_utf8_lossy(line).into_owned())),
        b':' => parse_number(line).map(Frame::Integer),
        b'$' => {
            let len = parse_number(line)?;
            if len < 0 {
                return Ok(Frame::Null);
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(Parse::Invalid(format!("bulk string of {len} bytes")));
            }
            if cursor.len() < len + CRLF.len() {
                return Err(Parse::Incomplete);
            }
            if &cursor[len..len + CRLF.len()] != CRLF {
                return Err(Parse::Invalid("bulk string not terminated".into()));
            }
            let data = Bytes::copy_from_slice(&cursor[..len]);
            *cursor = &cursor[len + CRLF.len()..];
            Ok(Frame::Bulk(data))
        }
        b'*' => {
            let len = parse_number(line)?;
            if len < 0 {
                return Ok(Frame::Null);
            }
            let len = len as usize;
            if len > MAX_ARRAY_LEN {
                return Err(Parse::Invalid(format!("array of {len} elements")));
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(parse_frame(cursor, depth + 1)?);
            }
            Ok(Frame::Array(items))
        }
        other => Err(Parse::Invalid(format!(
            "unexpected frame prefix 0x{other:02x}"
        ))),
    }
}

fn take_line<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], Parse> {
    let pos = cursor
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .ok_or(Parse::Incomplete)?;
    let line = &cursor[..pos];
    *cursor = &cursor[pos + CRLF.len()..];
    Ok(line)
}

fn parse_number(line: &[u8]) -> Result<i64, Parse> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Parse::Invalid(format!("bad length or integer {line:?}")))
}
