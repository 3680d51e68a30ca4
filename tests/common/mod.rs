// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the round-trip tests: an instrumented bus wrapper,
//! reusable handlers, and server bootstrap helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_nats::Message;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use httpn::memory::MemoryBus;
use httpn::{Body, Bus, Error, Handler, Request, ResponseWriter, Server, Subscription};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::FmtSubscriber;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = FmtSubscriber::builder().with_env_filter("info").try_init();
    });
}

/// One observed publish: subject and payload size.
#[derive(Debug, Clone)]
pub struct Published {
    pub subject: String,
    pub payload_len: usize,
}

/// Bus wrapper that records every publish for invariant assertions.
pub struct CountingBus {
    inner: Arc<MemoryBus>,
    published: Mutex<Vec<Published>>,
}

impl CountingBus {
    pub fn new(max_payload: usize) -> Self {
        Self {
            inner: Arc::new(MemoryBus::new(max_payload)),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// Publishes to private inbox subjects (handshakes, chunks, responses).
    pub fn inbox_publishes(&self) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.subject.starts_with("_INBOX."))
            .collect()
    }
}

#[async_trait]
impl Bus for CountingBus {
    fn max_payload(&self) -> usize {
        self.inner.max_payload()
    }

    fn new_inbox(&self) -> String {
        self.inner.new_inbox()
    }

    async fn publish(&self, msg: Message) -> Result<(), Error> {
        self.published.lock().unwrap().push(Published {
            subject: msg.subject.to_string(),
            payload_len: msg.payload.len(),
        });
        self.inner.publish(msg).await
    }

    async fn subscribe(&self, subject: String) -> Result<Subscription, Error> {
        self.inner.subscribe(subject).await
    }

    async fn queue_subscribe(
        &self,
        subject: String,
        group: String,
    ) -> Result<Subscription, Error> {
        self.inner.queue_subscribe(subject, group).await
    }
}

/// Handler answering every exchange with a fixed response.
pub struct Respond {
    pub status: Option<StatusCode>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Respond {
    pub fn body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

#[async_trait]
impl Handler for Respond {
    async fn serve(&self, writer: &mut ResponseWriter, _request: Request) -> anyhow::Result<()> {
        for (name, value) in &self.headers {
            writer
                .headers_mut()
                .insert(*name, HeaderValue::from_str(value)?);
        }
        if let Some(status) = self.status {
            writer.write_status(status);
        }
        if !self.body.is_empty() {
            writer.write(&self.body).await?;
        }
        Ok(())
    }
}

/// Handler echoing the full request body back.
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn serve(&self, writer: &mut ResponseWriter, mut request: Request) -> anyhow::Result<()> {
        let mut body = Vec::new();
        request.body.read_to_end(&mut body).await?;
        writer.write(&body).await?;
        Ok(())
    }
}

/// Handler mirroring selected request headers into the response.
pub struct MirrorHeaders(pub Vec<&'static str>);

#[async_trait]
impl Handler for MirrorHeaders {
    async fn serve(&self, writer: &mut ResponseWriter, request: Request) -> anyhow::Result<()> {
        for name in &self.0 {
            for value in request.headers.get_all(*name) {
                writer.headers_mut().append(*name, value.clone());
            }
        }
        writer.write(b"ok").await?;
        Ok(())
    }
}

/// Handler counting exchanges, for load-balancing tests.
pub struct Counting(pub Arc<AtomicUsize>);

#[async_trait]
impl Handler for Counting {
    async fn serve(&self, writer: &mut ResponseWriter, _request: Request) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        writer.write(b"counted").await?;
        Ok(())
    }
}

/// Spawn a server on `subject` and give the subscription a moment to land.
pub async fn start_server(
    bus: Arc<dyn Bus>,
    subject: &str,
    handler: impl Handler + 'static,
) -> CancellationToken {
    start_server_in_group(bus, subject, None, handler).await
}

pub async fn start_server_in_group(
    bus: Arc<dyn Bus>,
    subject: &str,
    group: Option<&str>,
    handler: impl Handler + 'static,
) -> CancellationToken {
    let token = CancellationToken::new();
    let mut builder = Server::builder()
        .shared_bus(bus)
        .subject(subject)
        .handler(handler)
        .cancellation_token(token.clone());
    if let Some(group) = group {
        builder = builder.group(group);
    }
    let server = builder.build().expect("server config");
    tokio::spawn(async move {
        let _ = server.listen().await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// A body reader that never ends, for cancellation tests.
pub struct Endless;

impl tokio::io::AsyncRead for Endless {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        const FILLER: [u8; 4096] = [0x42; 4096];
        let n = buf.remaining().min(FILLER.len());
        buf.put_slice(&FILLER[..n]);
        std::task::Poll::Ready(Ok(()))
    }
}

pub fn endless_body() -> Body {
    Body::from_reader(Endless)
}

pub async fn read_body(body: &mut Body) -> Vec<u8> {
    let mut out = Vec::new();
    body.read_to_end(&mut out).await.expect("read body");
    out
}

pub fn bytes_body(data: &[u8]) -> Body {
    Body::from(Bytes::copy_from_slice(data))
}
