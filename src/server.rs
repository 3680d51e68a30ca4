// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use async_nats::Message;
use async_trait::async_trait;
use bytes::Bytes;
use derive_builder::Builder;
use http::header;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::bus::Bus;
use crate::chunk::ChunkReader;
use crate::message::Request;
use crate::subject;
use crate::subscription::{with_pending_limits, PendingLimits};
use crate::writer::ResponseWriter;
use crate::{
    wire, Body, Error, DEFAULT_PENDING_BYTES_LIMIT, DEFAULT_PENDING_MSGS_LIMIT, HEADER_FRAGMENT,
    HEADER_PATH, HEADER_QUERY, URL_SCHEME,
};

/// Application entry point for one exchange.
///
/// The handler reads the request (its [`Body`] streams for chunked uploads)
/// and produces the response through the writer. The server closes the writer
/// after `serve` returns, so an empty implementation still answers with a
/// bare 200. Errors are routed to the server's error callback.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve(&self, writer: &mut ResponseWriter, request: Request) -> anyhow::Result<()>;
}

/// Receives per-exchange errors. The server keeps running regardless.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, error: Error);
}

impl<F> ErrorHandler for F
where
    F: Fn(Error) + Send + Sync,
{
    fn on_error(&self, error: Error) {
        self(error)
    }
}

fn silent() -> Arc<dyn ErrorHandler> {
    Arc::new(|_: Error| {})
}

/// Serves tunnelled requests from a subject hierarchy.
///
/// `listen` subscribes to `<subject>.>` (optionally as a queue-group member,
/// so a group of servers load-balances exchanges) and dispatches every
/// delivered message on its own task. Within an exchange, chunk ordering is
/// the bus's per-subject FIFO; across exchanges nothing is ordered.
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(error = "Error"))]
pub struct Server {
    /// Bus connection shared with all exchanges this server spawns.
    #[builder(setter(custom))]
    bus: Arc<dyn Bus>,

    /// Root of the served subject hierarchy; also the host of reconstructed
    /// request URLs.
    #[builder(setter(into))]
    subject: String,

    /// Queue group for load-balanced subscription.
    #[builder(default, setter(into, strip_option))]
    group: Option<String>,

    /// Application handler invoked once per exchange.
    #[builder(setter(custom))]
    handler: Arc<dyn Handler>,

    /// Callback for per-exchange errors; defaults to a silent sink.
    #[builder(default = "silent()", setter(custom))]
    on_error: Arc<dyn ErrorHandler>,

    /// Pending-message ceiling on the main subscription.
    #[builder(default = "DEFAULT_PENDING_MSGS_LIMIT")]
    pending_msgs_limit: usize,

    /// Pending-byte ceiling on the main subscription. Kept high so bursty
    /// uploads do not overwhelm slow-consumer handling.
    #[builder(default = "DEFAULT_PENDING_BYTES_LIMIT")]
    pending_bytes_limit: usize,

    /// Cancelling this token stops the accept loop; per-exchange tokens are
    /// children of it.
    #[builder(default)]
    cancellation_token: CancellationToken,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("subject", &self.subject)
            .field("group", &self.group)
            .field("pending_msgs_limit", &self.pending_msgs_limit)
            .field("pending_bytes_limit", &self.pending_bytes_limit)
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    /// The bus connection to serve on.
    pub fn bus(mut self, bus: impl Bus) -> Self {
        self.bus = Some(Arc::new(bus));
        self
    }

    /// A shared bus connection.
    pub fn shared_bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn on_error(mut self, on_error: impl ErrorHandler + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Accept and dispatch exchanges until the cancellation token fires.
    ///
    /// Configuration problems surface synchronously; per-exchange failures go
    /// to the error callback and the loop continues.
    pub async fn listen(&self) -> Result<(), Error> {
        if self.subject.is_empty() {
            return Err(Error::config("server subject cannot be empty"));
        }

        let wildcard = format!("{}.>", self.subject);
        let sub = match &self.group {
            Some(group) => {
                self.bus
                    .queue_subscribe(wildcard.clone(), group.clone())
                    .await?
            }
            None => self.bus.subscribe(wildcard.clone()).await?,
        };
        let mut sub = with_pending_limits(
            sub,
            PendingLimits {
                msgs: self.pending_msgs_limit,
                bytes: self.pending_bytes_limit,
            },
            self.cancellation_token.clone(),
        );

        let max_payload = self.bus.max_payload();
        info!(subject = %wildcard, group = ?self.group, "listening");

        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    debug!("server cancelled, stopping accept loop");
                    return Ok(());
                }
                msg = futures::StreamExt::next(&mut sub) => match msg {
                    Some(msg) => msg,
                    None => return Err(Error::bus("server subscription closed")),
                },
            };

            let bus = self.bus.clone();
            let handler = self.handler.clone();
            let on_error = self.on_error.clone();
            let prefix = self.subject.clone();
            let cancel = self.cancellation_token.child_token();
            tokio::spawn(async move {
                if let Err(err) = handle_message(bus, handler, prefix, max_payload, msg, cancel).await
                {
                    on_error.on_error(err);
                }
            });
        }
    }
}

/// One exchange: reconstruct the request, run the handler, close the writer.
async fn handle_message(
    bus: Arc<dyn Bus>,
    handler: Arc<dyn Handler>,
    prefix: String,
    max_payload: usize,
    msg: Message,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let reply = msg
        .reply
        .clone()
        .ok_or(Error::InvalidRequest("request envelope has no reply subject"))?
        .to_string();

    let request = reconstruct_request(&bus, &prefix, &reply, max_payload, msg, cancel).await?;
    debug!(method = %request.method, url = %request.url, "dispatching exchange");

    let mut writer = ResponseWriter::new(bus, reply)?;
    let served = handler.serve(&mut writer, request).await;
    let closed = writer.close().await;

    served.map_err(Error::Handler)?;
    closed
}

/// Rebuild a [`Request`] from the envelope message. The subject contributes
/// only the method; path, query and fragment come from the reserved headers.
async fn reconstruct_request(
    bus: &Arc<dyn Bus>,
    prefix: &str,
    reply: &str,
    max_payload: usize,
    msg: Message,
    cancel: CancellationToken,
) -> Result<Request, Error> {
    let method = subject::parse_method(prefix, &msg.subject)?;
    let mut headers = wire::from_bus_headers(msg.headers.as_ref());

    let mut url = format!("{URL_SCHEME}://{prefix}");
    match headers.get(HEADER_PATH).and_then(|v| v.to_str().ok()) {
        Some(path) if !path.is_empty() => {
            if !path.starts_with('/') {
                url.push('/');
            }
            url.push_str(path);
        }
        _ => url.push('/'),
    }
    if let Some(query) = headers.get(HEADER_QUERY).and_then(|v| v.to_str().ok()) {
        url.push('?');
        url.push_str(query);
    }
    if let Some(fragment) = headers.get(HEADER_FRAGMENT).and_then(|v| v.to_str().ok()) {
        url.push('#');
        url.push_str(fragment);
    }
    let url = Url::parse(&url).map_err(|_| Error::InvalidRequest("unparseable url components"))?;

    // normalize body-shape headers: chunked transfer wins over content-length
    if wire::is_chunked(&headers) {
        headers.remove(header::CONTENT_LENGTH);
    }
    let content_length = wire::content_length(&headers);

    let envelope_size = wire::message_size(
        msg.subject.len(),
        msg.reply.as_ref().map(|r| r.len()).unwrap_or(0),
        &headers,
        0,
    );
    let chunked = wire::is_chunked(&headers)
        || envelope_size + content_length.unwrap_or(0) as usize > max_payload;

    let body = if !chunked {
        Body::from(msg.payload)
    } else {
        // chunk handshake: a fresh private inbox rides back on the reply
        let chunk_inbox = bus.new_inbox();
        let sub = bus.subscribe(chunk_inbox.clone()).await?;
        bus.publish(wire::message(
            reply.to_string(),
            Some(chunk_inbox),
            None,
            Bytes::new(),
        ))
        .await?;
        Body::from_reader(ChunkReader::new(None, sub, &cancel))
    };

    let mut request = Request::new(method, url);
    request.headers = headers;
    request.body = body;
    request.cancel = cancel;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;

    struct Nop;

    #[async_trait]
    impl Handler for Nop {
        async fn serve(&self, _writer: &mut ResponseWriter, _request: Request) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn listen_rejects_empty_subject() {
        let server = Server::builder()
            .shared_bus(Arc::new(MemoryBus::new(1024)))
            .subject("")
            .handler(Nop)
            .build()
            .unwrap();
        assert!(matches!(server.listen().await, Err(Error::Config(_))));
    }

    #[test]
    fn build_fails_without_a_handler() {
        let err = Server::builder()
            .shared_bus(Arc::new(MemoryBus::new(1024)))
            .subject("foo")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
