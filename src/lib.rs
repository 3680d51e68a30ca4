// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP-style request/response exchanges tunnelled over NATS core pub/sub.
//!
//! NATS bounds every message by the connection's `max_payload`. This crate
//! frames arbitrarily-sized request and response bodies on top of that limit:
//! an exchange opens with a single envelope message carrying the method, URL
//! components, and headers; bodies that do not fit ride a private chunk
//! subject negotiated per exchange, as an ordered stream of payload-bearing
//! messages terminated by one empty-payload message.
//!
//! The three entry points:
//! - [`Transport`] executes outbound requests and reassembles responses into
//!   streaming [`Body`]s.
//! - [`Server`] subscribes to a subject hierarchy, reconstructs each request,
//!   and dispatches it to a [`Handler`] with a [`ResponseWriter`].
//! - [`Proxy`] is a thin HTTP front-end that forwards conventional TCP
//!   requests through a [`Transport`].
//!
//! All bus access goes through the narrow [`Bus`] trait, implemented for
//! [`async_nats::Client`] and for the in-process [`memory::MemoryBus`] used in
//! tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use httpn::{Body, Request, ResponseWriter, Server, Transport};
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl httpn::Handler for Hello {
//!     async fn serve(
//!         &self,
//!         writer: &mut ResponseWriter,
//!         _request: Request,
//!     ) -> anyhow::Result<()> {
//!         writer.write(b"Hello World").await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = async_nats::connect("nats://127.0.0.1:4222").await?;
//!
//! let server = Server::builder()
//!     .bus(client.clone())
//!     .subject("foo.bar")
//!     .handler(Hello)
//!     .build()?;
//! tokio::spawn(async move { server.listen().await });
//!
//! let transport = Transport::builder().bus(client).build()?;
//! let request = Request::get("httpn://foo.bar/hello".parse()?);
//! let response = transport.round_trip(request).await?;
//! assert_eq!(response.status, http::StatusCode::OK);
//! # Ok(())
//! # }
//! ```

mod body;
mod bus;
mod chunk;
mod error;
pub mod memory;
mod message;
mod proxy;
mod server;
mod sniff;
mod subject;
mod subscription;
mod transport;
mod wire;
mod writer;

pub use body::Body;
pub use bus::{Bus, Subscription};
pub use chunk::ChunkReader;
pub use error::Error;
pub use message::{Request, Response};
pub use proxy::{Proxy, ProxyBuilder};
pub use server::{ErrorHandler, Handler, Server, ServerBuilder};
pub use transport::{Transport, TransportBuilder};
pub use writer::ResponseWriter;

/// URL scheme identifying requests routed over the bus. Any other scheme is
/// rejected with [`Error::InvalidScheme`].
pub const URL_SCHEME: &str = "httpn";

/// Response header carrying the human-readable status text.
pub const HEADER_STATUS: &str = "x-status";

/// Response header carrying the decimal status code.
pub const HEADER_STATUS_CODE: &str = "x-status-code";

/// Request header naming the HTTP method.
pub const HEADER_METHOD: &str = "x-method";

/// Request header carrying the raw URL path. The subject is only a routing
/// hint; this header is authoritative.
pub const HEADER_PATH: &str = "x-path";

/// Request header carrying the raw query string.
pub const HEADER_QUERY: &str = "x-query";

/// Request header carrying the URL fragment.
pub const HEADER_FRAGMENT: &str = "x-fragment";

/// Bodies up to this size are encoded with `content-length`; anything larger
/// defaults to `transfer-encoding: chunked`.
pub const SMALL_BODY_SIZE: usize = 4 * 1024;

/// Default ceiling on messages buffered per subscription before the relay
/// stops pulling from the bus.
pub const DEFAULT_PENDING_MSGS_LIMIT: usize = 512 * 1024;

/// Default ceiling on bytes buffered per subscription. Kept high so bursty
/// uploads do not trip slow-consumer handling under load.
pub const DEFAULT_PENDING_BYTES_LIMIT: usize = 1024 * 1024 * 1024;

/// Bytes reserved on each chunk message for the continuation subject, which is
/// not known until the handshake completes.
pub(crate) const CHUNK_SUBJECT_RESERVE: usize = 256;

/// Depth of the channel between the body producer task and the publish loop.
pub(crate) const CHUNK_CHANNEL_DEPTH: usize = 8;
