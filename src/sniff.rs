// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Content-type detection from the first bytes of a body, applied when the
//! application does not set `content-type` itself. Follows the WHATWG
//! mime-sniffing shape: a signature table over the first 512 bytes, then a
//! binary-vs-text fallback.

const SNIFF_LEN: usize = 512;

struct Signature {
    magic: &'static [u8],
    mask: Option<&'static [u8]>,
    content_type: &'static str,
}

const SIGNATURES: &[Signature] = &[
    Signature {
        magic: b"%PDF-",
        mask: None,
        content_type: "application/pdf",
    },
    Signature {
        magic: b"%!PS-Adobe-",
        mask: None,
        content_type: "application/postscript",
    },
    Signature {
        magic: b"GIF87a",
        mask: None,
        content_type: "image/gif",
    },
    Signature {
        magic: b"GIF89a",
        mask: None,
        content_type: "image/gif",
    },
    Signature {
        magic: b"\x89PNG\r\n\x1a\n",
        mask: None,
        content_type: "image/png",
    },
    Signature {
        magic: b"\xff\xd8\xff",
        mask: None,
        content_type: "image/jpeg",
    },
    Signature {
        magic: b"RIFF\x00\x00\x00\x00WEBPVP",
        mask: Some(b"\xff\xff\xff\xff\x00\x00\x00\x00\xff\xff\xff\xff\xff\xff"),
        content_type: "image/webp",
    },
    Signature {
        magic: b"PK\x03\x04",
        mask: None,
        content_type: "application/zip",
    },
    Signature {
        magic: b"\x1f\x8b\x08",
        mask: None,
        content_type: "application/x-gzip",
    },
    Signature {
        magic: b"OggS\x00",
        mask: None,
        content_type: "application/ogg",
    },
    Signature {
        magic: b"\x00\x00\x01\x00",
        mask: None,
        content_type: "image/x-icon",
    },
];

const HTML_PREFIXES: &[&str] = &[
    "<!DOCTYPE HTML",
    "<HTML",
    "<HEAD",
    "<SCRIPT",
    "<IFRAME",
    "<H1",
    "<DIV",
    "<FONT",
    "<TABLE",
    "<A",
    "<STYLE",
    "<TITLE",
    "<B",
    "<BODY",
    "<BR",
    "<P",
    "<!--",
];

/// Detect a content type from the first bytes of `data`. Always returns a
/// valid MIME type; the fallback is `text/plain` for byte streams with no
/// binary-looking bytes and `application/octet-stream` otherwise.
pub(crate) fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let trimmed = trim_ws(data);
    for prefix in HTML_PREFIXES {
        if matches_html(trimmed, prefix.as_bytes()) {
            return "text/html; charset=utf-8";
        }
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    for sig in SIGNATURES {
        if matches_signature(data, sig) {
            return sig.content_type;
        }
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn trim_ws(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

/// Case-insensitive tag match; the tag must be terminated by whitespace or
/// `>` to count.
fn matches_html(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }
    for (d, t) in data.iter().zip(tag.iter()) {
        if !d.eq_ignore_ascii_case(t) {
            return false;
        }
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn matches_signature(data: &[u8], sig: &Signature) -> bool {
    if data.len() < sig.magic.len() {
        return false;
    }
    match sig.mask {
        None => data.starts_with(sig.magic),
        Some(mask) => data
            .iter()
            .zip(mask.iter())
            .zip(sig.magic.iter())
            .all(|((d, m), s)| d & m == *s),
    }
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}
