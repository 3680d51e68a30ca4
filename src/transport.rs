// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use derive_builder::Builder;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::bus::{next_msg, Bus, Subscription};
use crate::chunk::ChunkReader;
use crate::message::{Request, Response};
use crate::subject;
use crate::subscription::{with_pending_limits, PendingLimits};
use crate::{
    sniff, wire, Body, Error, CHUNK_CHANNEL_DEPTH, CHUNK_SUBJECT_RESERVE,
    DEFAULT_PENDING_BYTES_LIMIT, DEFAULT_PENDING_MSGS_LIMIT, HEADER_FRAGMENT, HEADER_METHOD,
    HEADER_PATH, HEADER_QUERY, HEADER_STATUS, HEADER_STATUS_CODE,
};

/// Client-side request executor.
///
/// A transport is long-lived and shared across exchanges; each
/// [`round_trip`](Self::round_trip) allocates a private reply inbox, encodes
/// the request as one envelope message (plus a chunk stream when the body
/// does not fit), and reassembles the response into a streaming [`Body`].
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(error = "Error"))]
pub struct Transport {
    /// Bus connection shared by all exchanges.
    #[builder(setter(custom))]
    bus: Arc<dyn Bus>,

    /// Pending-message ceiling on each exchange's inbox subscription.
    #[builder(default = "DEFAULT_PENDING_MSGS_LIMIT")]
    pending_msgs_limit: usize,

    /// Pending-byte ceiling on each exchange's inbox subscription. Kept high
    /// to tolerate bursty downloads.
    #[builder(default = "DEFAULT_PENDING_BYTES_LIMIT")]
    pending_bytes_limit: usize,
}

impl TransportBuilder {
    /// The bus connection to execute exchanges on.
    pub fn bus(mut self, bus: impl Bus) -> Self {
        self.bus = Some(Arc::new(bus));
        self
    }

    /// A shared bus connection, e.g. one also driving a [`crate::Server`].
    pub fn shared_bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.bus = Some(bus);
        self
    }
}

/// How the request body will travel.
enum BodyPlan {
    /// Everything fits in the envelope message.
    Single(Bytes),
    /// Envelope goes out alone; the body (prefixed by any bytes consumed
    /// while probing an unknown length) streams over the handshake subject.
    Chunked { prefix: Bytes, body: Body },
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    /// Execute one exchange.
    ///
    /// Fails with [`Error::InvalidScheme`]/[`Error::InvalidRequest`] before
    /// touching the bus when the URL is unusable, and with
    /// [`Error::Cancelled`] as soon as the request's token fires.
    pub async fn round_trip(&self, request: Request) -> Result<Response, Error> {
        let Request {
            method,
            url,
            headers,
            body,
            cancel,
            ..
        } = request;

        let target = subject::request_subject(&method, &url)?;
        let max_payload = self.bus.max_payload();

        let inbox = self.bus.new_inbox();
        let sub = self.bus.subscribe(inbox.clone()).await?;
        let mut sub = with_pending_limits(
            sub,
            PendingLimits {
                msgs: self.pending_msgs_limit,
                bytes: self.pending_bytes_limit,
            },
            cancel.clone(),
        );

        // request envelope: user headers plus the reserved routing headers
        let mut env_headers = HeaderMap::new();
        env_headers.extend(headers);
        join_transfer_encoding(&mut env_headers);
        insert_url_headers(&mut env_headers, &method, &url)?;

        let explicit_chunked = wire::is_chunked(&env_headers);
        let content_length = wire::content_length(&env_headers);
        let envelope_size = wire::message_size(target.len(), inbox.len(), &env_headers, 0);

        let plan = if explicit_chunked {
            BodyPlan::Chunked {
                prefix: Bytes::new(),
                body,
            }
        } else if let Some(length) = content_length {
            if envelope_size + length as usize > max_payload {
                BodyPlan::Chunked {
                    prefix: Bytes::new(),
                    body,
                }
            } else {
                BodyPlan::Single(read_full(body, length as usize, &cancel).await?)
            }
        } else {
            // length unknown: read until the single-message budget is blown
            // or the body ends, whichever comes first
            probe_body(body, max_payload.saturating_sub(envelope_size), &cancel).await?
        };

        match plan {
            BodyPlan::Single(data) => {
                if !data.is_empty() && !env_headers.contains_key(header::CONTENT_TYPE) {
                    let detected = sniff::detect_content_type(&data);
                    env_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(detected));
                }
                trace!(subject = %target, bytes = data.len(), "publishing single-message request");
                self.bus
                    .publish(wire::message(
                        target,
                        Some(inbox),
                        Some(&env_headers),
                        data,
                    ))
                    .await?;
            }
            BodyPlan::Chunked { prefix, body } => {
                // the server must reach the same verdict; with no declared
                // length only this header tells it the request is chunked
                if !wire::is_chunked(&env_headers) && content_length.is_none() {
                    env_headers.insert(
                        header::TRANSFER_ENCODING,
                        HeaderValue::from_static("chunked"),
                    );
                }

                trace!(subject = %target, "publishing chunked request envelope");
                self.bus
                    .publish(wire::message(
                        target,
                        Some(inbox),
                        Some(&env_headers),
                        Bytes::new(),
                    ))
                    .await?;

                // handshake: the reply names the private chunk subject
                let handshake = next_msg(&mut sub, &cancel).await?;
                let chunk_subject = handshake.reply.ok_or(Error::BadHandshake)?.to_string();
                debug!(subject = %chunk_subject, "chunk handshake complete");

                self.send_chunks(chunk_subject, prefix, body, max_payload, &cancel)
                    .await?;
            }
        }

        self.read_response(sub, cancel, max_payload).await
    }

    /// Stream the body over the chunk subject: a producer task frames chunks
    /// into a bounded channel, the publish loop drains it, and an empty
    /// payload terminates the stream.
    async fn send_chunks(
        &self,
        chunk_subject: String,
        prefix: Bytes,
        body: Body,
        max_payload: usize,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let capacity = max_payload.saturating_sub(CHUNK_SUBJECT_RESERVE).max(1);
        let (tx, rx) = flume::bounded::<Result<Bytes, Error>>(CHUNK_CHANNEL_DEPTH);
        tokio::spawn(produce_chunks(body, prefix, capacity, tx, cancel.clone()));

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                frame = rx.recv_async() => match frame {
                    Ok(frame) => frame,
                    Err(_) => break, // producer done
                },
            };
            let payload = frame?;
            let end = payload.is_empty();
            self.bus
                .publish(wire::message(chunk_subject.clone(), None, None, payload))
                .await?;
            if end {
                break;
            }
        }
        Ok(())
    }

    /// Await the first response message and decide how the body arrives.
    async fn read_response(
        &self,
        mut sub: Subscription,
        cancel: CancellationToken,
        max_payload: usize,
    ) -> Result<Response, Error> {
        let msg = next_msg(&mut sub, &cancel).await?;
        let mut headers = wire::from_bus_headers(msg.headers.as_ref());

        let raw_status = headers
            .get(HEADER_STATUS_CODE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| Error::BadResponse("missing status code header".to_string()))?;
        let status = raw_status
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| Error::BadResponse(format!("unparseable status code '{raw_status}'")))?;
        let status_text = headers
            .get(HEADER_STATUS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or(""))
            .to_string();

        let chunked = wire::is_chunked(&headers);
        if headers.contains_key(header::TRANSFER_ENCODING) {
            headers.remove(header::CONTENT_LENGTH);
        }
        let content_length = wire::content_length(&headers);

        let envelope_size = wire::message_size(msg.subject.len(), 0, &headers, 0);
        let total = envelope_size + content_length.unwrap_or(0) as usize;

        let body = if !chunked && total <= max_payload {
            trace!(bytes = msg.payload.len(), "single-message response");
            Body::from(msg.payload)
        } else {
            trace!("chunked response, installing chunk reader");
            Body::from_reader(ChunkReader::new(Some(msg.payload), sub, &cancel))
        };

        Ok(Response {
            status,
            status_text,
            headers,
            content_length,
            body,
        })
    }
}

/// Reserved URL headers carried on every envelope. The server reconstructs
/// the request URL from these, not from the subject.
fn insert_url_headers(
    headers: &mut HeaderMap,
    method: &http::Method,
    url: &url::Url,
) -> Result<(), Error> {
    let unencodable = || Error::InvalidRequest("url component is not header-encodable");

    headers.insert(
        HEADER_METHOD,
        HeaderValue::from_str(method.as_str()).map_err(|_| unencodable())?,
    );
    headers.insert(
        HEADER_PATH,
        HeaderValue::from_str(url.path()).map_err(|_| unencodable())?,
    );
    if let Some(query) = url.query() {
        headers.insert(
            HEADER_QUERY,
            HeaderValue::from_str(query).map_err(|_| unencodable())?,
        );
    }
    if let Some(fragment) = url.fragment() {
        headers.insert(
            HEADER_FRAGMENT,
            HeaderValue::from_str(fragment).map_err(|_| unencodable())?,
        );
    }
    Ok(())
}

/// Collapse multi-valued transfer-encoding headers into one comma-joined
/// value.
fn join_transfer_encoding(headers: &mut HeaderMap) {
    let values: Vec<String> = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_owned)
        .collect();
    if values.len() > 1 {
        if let Ok(joined) = HeaderValue::from_str(&values.join(",")) {
            headers.insert(header::TRANSFER_ENCODING, joined);
        }
    }
}

/// Read a body with a declared length to completion.
async fn read_full(
    mut body: Body,
    size_hint: usize,
    cancel: &CancellationToken,
) -> Result<Bytes, Error> {
    let mut data = Vec::with_capacity(size_hint.min(64 * 1024));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        read = body.read_to_end(&mut data) => { read?; }
    }
    Ok(Bytes::from(data))
}

/// Read an unknown-length body until it either ends (single-message plan) or
/// exceeds `budget` (chunked plan, probed bytes become the stream prefix).
async fn probe_body(
    mut body: Body,
    budget: usize,
    cancel: &CancellationToken,
) -> Result<BodyPlan, Error> {
    let mut probe = BytesMut::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        if probe.len() > budget {
            return Ok(BodyPlan::Chunked {
                prefix: probe.freeze(),
                body,
            });
        }
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            read = body.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(BodyPlan::Single(probe.freeze()));
        }
        probe.extend_from_slice(&buf[..n]);
    }
}

/// Producer task for a chunked upload. Frames the body into chunks of at
/// most `capacity` bytes, emits an empty frame as the terminator, and
/// reports cancellation or read failures in-band. The body is dropped (and
/// with it any underlying resources) on every exit path.
async fn produce_chunks(
    mut body: Body,
    mut prefix: Bytes,
    capacity: usize,
    tx: flume::Sender<Result<Bytes, Error>>,
    cancel: CancellationToken,
) {
    let mut read_buf = vec![0u8; capacity];
    loop {
        if cancel.is_cancelled() {
            let _ = tx.send_async(Err(Error::Cancelled)).await;
            return;
        }

        let mut chunk = BytesMut::new();
        if !prefix.is_empty() {
            let n = prefix.len().min(capacity);
            chunk.extend_from_slice(&prefix.split_to(n));
        }

        let mut eof = false;
        while chunk.len() < capacity {
            let want = capacity - chunk.len();
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = tx.send_async(Err(Error::Cancelled)).await;
                    return;
                }
                read = body.read(&mut read_buf[..want]) => match read {
                    Ok(n) => n,
                    Err(err) => {
                        let _ = tx.send_async(Err(Error::BodyIo(err))).await;
                        return;
                    }
                },
            };
            if n == 0 {
                eof = true;
                break;
            }
            chunk.extend_from_slice(&read_buf[..n]);
        }

        if !chunk.is_empty() && tx.send_async(Ok(chunk.freeze())).await.is_err() {
            return;
        }
        if eof {
            // empty frame marks the end of the chunk stream
            let _ = tx.send_async(Ok(Bytes::new())).await;
            return;
        }
    }
}
