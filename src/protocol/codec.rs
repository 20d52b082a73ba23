//! Encoding and decoding of gateway messages.
//!
//! # Frame Format
//!
//! All integers are big-endian `i32` unless noted.
//!
//! ```text
//! request:  opcode | payload_size | field_count | { field_len | field bytes }*
//! response: opcode | return_code | payload_size | field_count | { field_len | field bytes }*
//! ```
//!
//! `payload_size` counts every field's bytes plus its own 4-byte length
//! prefix. A response whose declared sizes disagree with the bytes that
//! follow is a framing error and the stream it came from must be dropped.

use crate::error::ProtocolError;
use crate::protocol::errno;
use crate::protocol::Opcode;

pub const REQUEST_HEADER_SIZE: usize = 12;
pub const RESPONSE_HEADER_SIZE: usize = 16;
pub const FIELD_PREFIX_SIZE: usize = 4;

/// Largest payload accepted on or sent to the wire (64 MB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Largest single field that still fits a one-field payload.
pub const MAX_FIELD_SIZE: usize = MAX_PAYLOAD_SIZE - FIELD_PREFIX_SIZE;

/// Encodes a request frame.
pub fn encode<F: AsRef<[u8]>>(op: Opcode, fields: &[F]) -> Result<Vec<u8>, ProtocolError> {
    let payload_size = checked_payload_size(fields)?;
    let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + payload_size);
    buf.extend_from_slice(&op.code().to_be_bytes());
    buf.extend_from_slice(&(payload_size as i32).to_be_bytes());
    buf.extend_from_slice(&(fields.len() as i32).to_be_bytes());
    put_fields(&mut buf, fields);
    Ok(buf)
}

/// Encodes a response frame, as a gateway would send it.
pub fn encode_response<F: AsRef<[u8]>>(
    op: Opcode,
    return_code: i32,
    fields: &[F],
) -> Result<Vec<u8>, ProtocolError> {
    let payload_size = checked_payload_size(fields)?;
    let mut buf = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload_size);
    buf.extend_from_slice(&op.code().to_be_bytes());
    buf.extend_from_slice(&return_code.to_be_bytes());
    buf.extend_from_slice(&(payload_size as i32).to_be_bytes());
    buf.extend_from_slice(&(fields.len() as i32).to_be_bytes());
    put_fields(&mut buf, fields);
    Ok(buf)
}

// Every length written below fits an i32 once this passes.
fn checked_payload_size<F: AsRef<[u8]>>(fields: &[F]) -> Result<usize, ProtocolError> {
    let size: usize = fields
        .iter()
        .map(|f| FIELD_PREFIX_SIZE + f.as_ref().len())
        .sum();
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::TooLarge {
            size,
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(size)
}

fn put_fields<F: AsRef<[u8]>>(buf: &mut Vec<u8>, fields: &[F]) {
    for field in fields {
        let field = field.as_ref();
        buf.extend_from_slice(&(field.len() as i32).to_be_bytes());
        buf.extend_from_slice(field);
    }
}

/// Fixed-size prefix of a response frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub op: Opcode,
    pub return_code: i32,
    pub payload_size: usize,
    pub field_count: usize,
}

impl ResponseHeader {
    /// Parses the header, rejecting anything but a response to `expected`.
    pub fn parse(buf: &[u8; RESPONSE_HEADER_SIZE], expected: Opcode) -> Result<Self, ProtocolError> {
        let actual = read_i32(&buf[0..4]);
        if actual != expected.code() {
            return Err(ProtocolError::OpcodeMismatch {
                expected: expected.code(),
                actual,
            });
        }
        let return_code = read_i32(&buf[4..8]);
        let (payload_size, field_count) = parse_sizes(read_i32(&buf[8..12]), read_i32(&buf[12..16]))?;
        Ok(ResponseHeader {
            op: expected,
            return_code,
            payload_size,
            field_count,
        })
    }
}

fn parse_sizes(payload_size: i32, field_count: i32) -> Result<(usize, usize), ProtocolError> {
    let payload_size = usize::try_from(payload_size).map_err(|_| {
        ProtocolError::Framing(format!("negative payload size {}", payload_size))
    })?;
    let field_count = usize::try_from(field_count)
        .map_err(|_| ProtocolError::Framing(format!("negative field count {}", field_count)))?;
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::Framing(format!(
            "payload of {} bytes exceeds limit of {}",
            payload_size, MAX_PAYLOAD_SIZE
        )));
    }
    if field_count > payload_size / FIELD_PREFIX_SIZE {
        return Err(ProtocolError::Framing(format!(
            "{} fields cannot fit in {} payload bytes",
            field_count, payload_size
        )));
    }
    Ok((payload_size, field_count))
}

/// A decoded response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub op: Opcode,
    pub return_code: i32,
    pub fields: Vec<Vec<u8>>,
}

impl Response {
    /// Fails unless the response carries exactly `expected` fields.
    pub fn expect_fields(&self, expected: usize) -> Result<(), ProtocolError> {
        if self.fields.len() != expected {
            return Err(ProtocolError::FieldCount {
                op: self.op,
                expected,
                actual: self.fields.len(),
            });
        }
        Ok(())
    }

    pub fn into_single_field(mut self) -> Result<Vec<u8>, ProtocolError> {
        self.expect_fields(1)?;
        Ok(self.fields.swap_remove(0))
    }

    pub fn into_strings(self) -> Result<Vec<String>, ProtocolError> {
        self.fields.into_iter().map(string_from_field).collect()
    }
}

/// Decodes the payload that follows an already-parsed header.
///
/// Applies the return-code policy: negative codes become
/// [`ProtocolError::Remote`], except a missing attribute on
/// `GET_EXTENDED_ATTR`, which decodes to a response with no fields.
pub fn decode_payload(header: &ResponseHeader, payload: &[u8]) -> Result<Response, ProtocolError> {
    let fields = parse_fields(payload, header.payload_size, header.field_count)?;

    if header.return_code < 0 {
        if header.op == Opcode::GetExtendedAttr && errno::is_missing_attr(header.return_code) {
            return Ok(Response {
                op: header.op,
                return_code: header.return_code,
                fields: Vec::new(),
            });
        }
        return Err(ProtocolError::Remote {
            op: header.op,
            code: header.return_code,
            message: errno::describe(header.return_code),
        });
    }

    Ok(Response {
        op: header.op,
        return_code: header.return_code,
        fields,
    })
}

/// Decodes a complete response frame held in memory.
pub fn decode(bytes: &[u8], expected: Opcode) -> Result<Response, ProtocolError> {
    let header_bytes: &[u8; RESPONSE_HEADER_SIZE] = bytes
        .get(..RESPONSE_HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| {
            ProtocolError::Framing(format!("truncated response header ({} bytes)", bytes.len()))
        })?;
    let header = ResponseHeader::parse(header_bytes, expected)?;
    decode_payload(&header, &bytes[RESPONSE_HEADER_SIZE..])
}

/// Decodes a complete request frame, as a gateway would receive it.
pub fn decode_request(bytes: &[u8]) -> Result<(Opcode, Vec<Vec<u8>>), ProtocolError> {
    if bytes.len() < REQUEST_HEADER_SIZE {
        return Err(ProtocolError::Framing(format!(
            "truncated request header ({} bytes)",
            bytes.len()
        )));
    }
    let op = Opcode::try_from(read_i32(&bytes[0..4]))?;
    let (payload_size, field_count) = parse_sizes(read_i32(&bytes[4..8]), read_i32(&bytes[8..12]))?;
    let fields = parse_fields(&bytes[REQUEST_HEADER_SIZE..], payload_size, field_count)?;
    Ok((op, fields))
}

/// Splits `payload` into `field_count` length-prefixed fields, checking the
/// running byte count against the declared `payload_size`.
fn parse_fields(
    payload: &[u8],
    payload_size: usize,
    field_count: usize,
) -> Result<Vec<Vec<u8>>, ProtocolError> {
    if payload.len() != payload_size {
        return Err(ProtocolError::Framing(format!(
            "declared payload of {} bytes but {} follow",
            payload_size,
            payload.len()
        )));
    }

    let mut fields = Vec::with_capacity(field_count);
    let mut consumed = 0usize;
    for idx in 0..field_count {
        let prefix = payload
            .get(consumed..consumed + FIELD_PREFIX_SIZE)
            .ok_or_else(|| {
                ProtocolError::Framing(format!("field {} length prefix runs past payload", idx))
            })?;
        let len = read_i32(prefix);
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::Framing(format!("field {} has negative length {}", idx, len)))?;
        consumed += FIELD_PREFIX_SIZE;

        let field = payload.get(consumed..consumed + len).ok_or_else(|| {
            ProtocolError::Framing(format!(
                "field {} of {} bytes runs past payload of {}",
                idx, len, payload_size
            ))
        })?;
        consumed += len;
        fields.push(field.to_vec());
    }

    if consumed != payload_size {
        return Err(ProtocolError::Framing(format!(
            "read {} bytes for {} fields, header declared {}",
            consumed, field_count, payload_size
        )));
    }
    Ok(fields)
}

fn read_i32(buf: &[u8]) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[..4]);
    i32::from_be_bytes(bytes)
}

// field helpers

pub fn handle_field(handle: u64) -> [u8; 8] {
    handle.to_be_bytes()
}

pub fn offset_field(offset: i64) -> [u8; 8] {
    offset.to_be_bytes()
}

pub fn length_field(length: u32) -> [u8; 4] {
    length.to_be_bytes()
}

pub fn string_field(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

fn fixed<const N: usize>(field: &[u8]) -> Result<[u8; N], ProtocolError> {
    field.try_into().map_err(|_| ProtocolError::FieldWidth {
        expected: N,
        actual: field.len(),
    })
}

pub fn handle_from_field(field: &[u8]) -> Result<u64, ProtocolError> {
    fixed::<8>(field).map(u64::from_be_bytes)
}

pub fn offset_from_field(field: &[u8]) -> Result<i64, ProtocolError> {
    fixed::<8>(field).map(i64::from_be_bytes)
}

pub fn length_from_field(field: &[u8]) -> Result<u32, ProtocolError> {
    fixed::<4>(field).map(u32::from_be_bytes)
}

pub fn string_from_field(field: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(field).map_err(|e| ProtocolError::InvalidField(e.to_string()))
}
