// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire-level helpers: message construction, size accounting, and header
//! conversion between the HTTP vocabulary and bus headers.

use std::borrow::Cow;

use async_nats::{HeaderMap as BusHeaderMap, Message};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue};

/// Version line prefixing every encoded header block.
const HEADER_VERSION_LINE: &str = "NATS/1.0\r\n";

/// Encoded size of a message as budgeted against `max_payload`: subject,
/// reply, header block and payload. Slightly conservative (the server does
/// not count subjects against the payload ceiling), which is the side to err
/// on when deciding whether a body fits in one message.
pub(crate) fn message_size(
    subject_len: usize,
    reply_len: usize,
    headers: &HeaderMap,
    payload_len: usize,
) -> usize {
    subject_len + reply_len + header_block_size(headers) + payload_len
}

/// Size of the encoded header block: `NATS/1.0\r\n` + `name: value\r\n` per
/// entry + terminating `\r\n`. Zero when there are no headers.
pub(crate) fn header_block_size(headers: &HeaderMap) -> usize {
    if headers.is_empty() {
        return 0;
    }
    let mut size = HEADER_VERSION_LINE.len() + 2;
    for (name, value) in headers.iter() {
        size += name.as_str().len() + 2 + value.as_bytes().len() + 2;
    }
    size
}

/// Build a bus message. Empty header maps are dropped so that header-less
/// messages (chunks, terminators) carry no header block at all.
pub(crate) fn message(
    subject: String,
    reply: Option<String>,
    headers: Option<&HeaderMap>,
    payload: Bytes,
) -> Message {
    let headers = headers.filter(|h| !h.is_empty()).map(to_bus_headers);
    let length = payload.len();
    Message {
        subject: subject.into(),
        reply: reply.map(Into::into),
        headers,
        payload,
        status: None,
        description: None,
        length,
    }
}

/// Convert HTTP headers to bus headers. Multi-valued names are appended in
/// order; values that are not valid UTF-8 are carried lossily (bus headers
/// are text).
pub(crate) fn to_bus_headers(headers: &HeaderMap) -> BusHeaderMap {
    let mut out = BusHeaderMap::new();
    for (name, value) in headers.iter() {
        let value = match value.to_str() {
            Ok(value) => Cow::Borrowed(value),
            Err(_) => String::from_utf8_lossy(value.as_bytes()),
        };
        out.append(name.as_str(), value.as_ref());
    }
    out
}

/// Convert bus headers back to HTTP headers. Entries with names or values the
/// HTTP vocabulary cannot represent are skipped.
pub(crate) fn from_bus_headers(headers: Option<&BusHeaderMap>) -> HeaderMap {
    let mut out = HeaderMap::new();
    let Some(headers) = headers else {
        return out;
    };
    for (name, values) in headers.iter() {
        let Ok(name) = HeaderName::from_bytes(AsRef::<str>::as_ref(name).as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value.as_str()) {
                out.append(name.clone(), value);
            }
        }
    }
    out
}

/// Whether the headers declare a chunked transfer encoding.
pub(crate) fn is_chunked(headers: &HeaderMap) -> bool {
    headers.get_all(header::TRANSFER_ENCODING).iter().any(|v| {
        v.to_str()
            .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
            .unwrap_or(false)
    })
}

/// The declared content length, if present and well-formed.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
