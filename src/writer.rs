// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderValue, StatusCode};
use tracing::trace;

use crate::bus::Bus;
use crate::{sniff, wire, Error, HEADER_STATUS, HEADER_STATUS_CODE, SMALL_BODY_SIZE};

/// Streaming sink for one server-side response.
///
/// Bytes written are buffered and the response-line metadata is finalized
/// lazily: on the first write (defaulting to 200), on an explicit
/// [`write_status`](Self::write_status), or at close. The finalized headers
/// decide the encoding: small fully-buffered bodies get a `content-length`,
/// anything larger or explicitly marked `transfer-encoding: chunked` streams
/// as a chunk sequence bounded by the bus payload ceiling and finished with
/// an empty terminator message. Only the first published message carries the
/// response headers.
pub struct ResponseWriter {
    bus: Arc<dyn Bus>,
    subject: String,
    max_payload: usize,

    headers: HeaderMap,
    buf: BytesMut,
    status_written: bool,

    chunked: bool,
    content_length: Option<u64>,

    flush_count: usize,
    closed: bool,
}

impl ResponseWriter {
    /// A writer publishing to `subject`, normally an exchange's reply inbox.
    pub fn new(bus: Arc<dyn Bus>, subject: impl Into<String>) -> Result<Self, Error> {
        let subject = subject.into();
        if subject.is_empty() {
            return Err(Error::config("response subject cannot be empty"));
        }
        let max_payload = bus.max_payload();
        Ok(Self {
            bus,
            subject,
            max_payload,
            headers: HeaderMap::new(),
            buf: BytesMut::new(),
            status_written: false,
            chunked: false,
            content_length: None,
            flush_count: 0,
            closed: false,
        })
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the response headers. Changes after the status is
    /// finalized have no effect on the encoding decision.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Finalize the response line. The first call wins; writing body bytes
    /// without calling this finalizes an implicit 200.
    pub fn write_status(&mut self, status: StatusCode) {
        if self.status_written {
            return;
        }

        if let Ok(reason) = HeaderValue::from_str(status.canonical_reason().unwrap_or("")) {
            self.headers.insert(HEADER_STATUS, reason);
        }
        self.headers
            .insert(HEADER_STATUS_CODE, HeaderValue::from(status.as_u16()));

        // Bodies that are fully buffered and small get an automatic
        // content-length; anything bigger is assumed to be a chunked transfer.
        if self.flush_count == 0 && !self.headers.contains_key(header::CONTENT_LENGTH) {
            let buffered = self.buf.len();
            if buffered > 0 && buffered <= SMALL_BODY_SIZE {
                self.headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(buffered));
            } else if buffered > SMALL_BODY_SIZE {
                self.headers
                    .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
        }

        // transfer-encoding takes precedence over content-length
        if wire::is_chunked(&self.headers) {
            self.headers.remove(header::CONTENT_LENGTH);
        }
        self.content_length = wire::content_length(&self.headers);

        let total = wire::message_size(self.subject.len(), 0, &self.headers, 0)
            + self.content_length.unwrap_or(0) as usize;
        self.chunked = total > self.max_payload || wire::is_chunked(&self.headers);

        self.status_written = true;
    }

    /// Buffer body bytes, finalizing the status on the first call and
    /// flushing whenever a full bus message is ready.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.buf.extend_from_slice(data);

        if !self.status_written {
            self.write_status(StatusCode::OK);

            if !self.headers.contains_key(header::CONTENT_TYPE) {
                let detected = sniff::detect_content_type(&self.buf);
                self.headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(detected));
            }
        }

        if self.buf.len() >= self.max_payload {
            self.flush().await?;
        }

        Ok(data.len())
    }

    /// Drain the buffer into messages sized to the payload ceiling. Only the
    /// first message of the response carries headers.
    async fn flush(&mut self) -> Result<(), Error> {
        while !self.buf.is_empty() {
            let headers = if self.flush_count == 0 {
                Some(&self.headers)
            } else {
                None
            };
            let head_size = match headers {
                Some(headers) => wire::message_size(self.subject.len(), 0, headers, 0),
                None => self.subject.len(),
            };
            let capacity = self.max_payload.saturating_sub(head_size);
            let take = capacity.min(self.buf.len());
            let chunk = self.buf.split_to(take).freeze();

            trace!(subject = %self.subject, bytes = chunk.len(), seq = self.flush_count, "publishing response message");
            self.bus
                .publish(wire::message(self.subject.clone(), None, headers, chunk))
                .await?;
            self.flush_count += 1;
        }
        Ok(())
    }

    /// Drain any buffered bytes, publish a headers-only message when nothing
    /// has been sent yet (HEAD-style responses; its empty payload doubles as
    /// the terminator), and otherwise publish the terminator when the
    /// exchange is chunked. Idempotent; writes after close fail.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }

        if !self.status_written {
            self.write_status(StatusCode::OK);
        }
        self.flush().await?;

        // nothing sent yet: one message with the headers and an empty
        // payload, which already reads as end-of-stream on a chunked
        // exchange
        if self.flush_count == 0 {
            let msg = wire::message(
                self.subject.clone(),
                None,
                Some(&self.headers),
                Bytes::new(),
            );
            self.bus.publish(msg).await?;
            self.closed = true;
            return Ok(());
        }

        if self.chunked {
            // empty message marks the end of the chunk stream
            self.bus
                .publish(wire::message(self.subject.clone(), None, None, Bytes::new()))
                .await?;
        }

        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Subscription;
    use crate::memory::MemoryBus;
    use async_nats::Message;
    use futures::{FutureExt, StreamExt};
    use tokio::time::{timeout, Duration};

    const MAX_PAYLOAD: usize = 8 * 1024;

    async fn setup(subject: &str) -> (Arc<MemoryBus>, Subscription, ResponseWriter) {
        let bus = Arc::new(MemoryBus::new(MAX_PAYLOAD));
        let sub = bus.subscribe(subject.to_string()).await.unwrap();
        let writer = ResponseWriter::new(bus.clone(), subject).unwrap();
        (bus, sub, writer)
    }

    async fn next(sub: &mut Subscription) -> Message {
        timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("timed out waiting for message")
            .expect("subscription closed")
    }

    fn header<'a>(msg: &'a Message, name: &str) -> Option<&'a str> {
        msg.headers.as_ref()?.get(name).map(|v| v.as_str())
    }

    #[test]
    fn rejects_empty_subject() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new(MAX_PAYLOAD));
        assert!(matches!(
            ResponseWriter::new(bus, ""),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn small_body_gets_content_length() {
        let (_bus, mut sub, mut writer) = setup("test.small").await;

        writer.write(b"Hello World").await.unwrap();
        writer.close().await.unwrap();

        let msg = next(&mut sub).await;
        assert_eq!(header(&msg, "x-status-code"), Some("200"));
        assert_eq!(header(&msg, "x-status"), Some("OK"));
        assert_eq!(header(&msg, "content-length"), Some("11"));
        assert_eq!(header(&msg, "content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(msg.payload.as_ref(), b"Hello World");
    }

    #[tokio::test]
    async fn large_body_without_length_is_chunked() {
        let (_bus, mut sub, mut writer) = setup("test.large").await;

        let body: Vec<u8> = (0..2 * MAX_PAYLOAD).map(|i| (i % 251) as u8).collect();
        writer.write(&body).await.unwrap();
        writer.close().await.unwrap();

        let first = next(&mut sub).await;
        assert_eq!(header(&first, "transfer-encoding"), Some("chunked"));
        assert_eq!(header(&first, "content-length"), None);

        let mut reassembled = first.payload.to_vec();
        let mut body_messages = 1;
        loop {
            let msg = next(&mut sub).await;
            if msg.payload.is_empty() {
                break;
            }
            assert!(msg.headers.is_none(), "only the first message carries headers");
            body_messages += 1;
            reassembled.extend_from_slice(&msg.payload);
        }
        assert!(body_messages >= 2);
        assert_eq!(reassembled, body);
    }

    #[tokio::test]
    async fn large_body_with_explicit_length_keeps_it() {
        let (_bus, mut sub, mut writer) = setup("test.sized").await;

        let body: Vec<u8> = (0..2 * MAX_PAYLOAD).map(|i| (i % 239) as u8).collect();
        writer.headers_mut().insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(body.len()),
        );
        writer.write(&body).await.unwrap();
        writer.close().await.unwrap();

        let first = next(&mut sub).await;
        assert_eq!(
            header(&first, "content-length"),
            Some(body.len().to_string().as_str())
        );
        assert_eq!(header(&first, "transfer-encoding"), None);

        // still chunked on the wire, terminated by an empty message
        let mut reassembled = first.payload.to_vec();
        loop {
            let msg = next(&mut sub).await;
            if msg.payload.is_empty() {
                break;
            }
            reassembled.extend_from_slice(&msg.payload);
        }
        assert_eq!(reassembled, body);
    }

    #[tokio::test]
    async fn explicit_chunked_header_forces_chunked() {
        let (_bus, mut sub, mut writer) = setup("test.forced").await;

        writer.headers_mut().insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        writer.write(b"tiny").await.unwrap();
        writer.close().await.unwrap();

        let first = next(&mut sub).await;
        assert_eq!(header(&first, "transfer-encoding"), Some("chunked"));
        assert_eq!(header(&first, "content-length"), None);
        assert_eq!(first.payload.as_ref(), b"tiny");

        let terminator = next(&mut sub).await;
        assert!(terminator.payload.is_empty());
        assert!(terminator.headers.is_none());
    }

    #[tokio::test]
    async fn empty_response_is_a_single_headers_message() {
        let (_bus, mut sub, mut writer) = setup("test.head").await;

        writer.write_status(StatusCode::NO_CONTENT);
        writer.close().await.unwrap();

        let msg = next(&mut sub).await;
        assert_eq!(header(&msg, "x-status-code"), Some("204"));
        assert_eq!(header(&msg, "content-length"), None);
        assert!(msg.payload.is_empty());
    }

    #[tokio::test]
    async fn chunked_response_with_no_writes_sends_a_single_message() {
        let (_bus, mut sub, mut writer) = setup("test.emptychunk").await;

        writer.headers_mut().insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        writer.close().await.unwrap();

        // the headers-only message's empty payload doubles as the
        // terminator; no second empty message follows
        let msg = next(&mut sub).await;
        assert_eq!(header(&msg, "transfer-encoding"), Some("chunked"));
        assert!(msg.payload.is_empty());
        assert!(sub.next().now_or_never().flatten().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_writes_after_close_fail() {
        let (_bus, mut sub, mut writer) = setup("test.closed").await;

        writer.write(b"done").await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert!(matches!(writer.write(b"more").await, Err(Error::Closed)));

        // exactly one message was published
        let _ = next(&mut sub).await;
        assert!(sub.next().now_or_never().flatten().is_none());
    }
}
