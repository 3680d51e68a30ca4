// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::body::Body as HttpBody;
use axum::extract::{Request as HttpRequest, State};
use axum::response::Response as HttpResponse;
use axum::Router;
use futures::TryStreamExt;
use http::{header, StatusCode};
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::message::Request;
use crate::transport::Transport;
use crate::{Body, Error, URL_SCHEME};

/// HTTP front-end for native clients.
///
/// Every request accepted on the listener is rewritten to target the
/// configured subject and forwarded through the [`Transport`]; the tunnelled
/// response streams back to the TCP client. Failed exchanges answer 502 with
/// the error text; nothing here panics on a broken connection.
pub struct Proxy {
    subject: String,
    transport: Arc<Transport>,
    listener: tokio::net::TcpListener,
    cancellation_token: CancellationToken,
}

/// Options for a [`Proxy`]. Hand-rolled because a bound listener is neither
/// clonable nor defaultable.
#[derive(Default)]
pub struct ProxyBuilder {
    subject: Option<String>,
    transport: Option<Arc<Transport>>,
    listener: Option<tokio::net::TcpListener>,
    cancellation_token: Option<CancellationToken>,
}

impl ProxyBuilder {
    /// Target subject, used as the host of forwarded URLs.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Transport the proxy forwards through.
    pub fn transport(mut self, transport: Arc<Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bound TCP listener to accept on.
    pub fn listener(mut self, listener: tokio::net::TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Cancelling this token shuts the listener down gracefully.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn build(self) -> Result<Proxy, Error> {
        Ok(Proxy {
            subject: self
                .subject
                .ok_or_else(|| Error::config("subject must be set"))?,
            transport: self
                .transport
                .ok_or_else(|| Error::config("transport must be set"))?,
            listener: self
                .listener
                .ok_or_else(|| Error::config("listener must be set"))?,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}

#[derive(Clone)]
struct ProxyState {
    subject: Arc<str>,
    transport: Arc<Transport>,
}

impl Proxy {
    pub fn builder() -> ProxyBuilder {
        ProxyBuilder::default()
    }

    /// Serve until the cancellation token fires.
    pub async fn listen(self) -> Result<(), Error> {
        if self.subject.is_empty() {
            return Err(Error::config("proxy subject cannot be empty"));
        }

        let state = ProxyState {
            subject: Arc::from(self.subject.as_str()),
            transport: self.transport,
        };
        let app = Router::new().fallback(forward).with_state(state);

        info!(addr = ?self.listener.local_addr().ok(), subject = %self.subject, "proxy listening");

        let token = self.cancellation_token;
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(Error::bus)?;
        Ok(())
    }
}

async fn forward(State(state): State<ProxyState>, request: HttpRequest) -> HttpResponse {
    match forward_inner(state, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "proxied exchange failed");
            let mut response = HttpResponse::new(HttpBody::from(err.to_string()));
            *response.status_mut() = StatusCode::BAD_GATEWAY;
            response
        }
    }
}

async fn forward_inner(state: ProxyState, request: HttpRequest) -> Result<HttpResponse, Error> {
    let (parts, body) = request.into_parts();

    let mut url = format!("{URL_SCHEME}://{}{}", state.subject, parts.uri.path());
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }
    let url = Url::parse(&url).map_err(|_| Error::InvalidRequest("unroutable proxy url"))?;

    let mut tunnelled = Request::new(parts.method, url);
    tunnelled.headers = parts.headers;
    tunnelled.body = Body::from_reader(StreamReader::new(
        body.into_data_stream().map_err(std::io::Error::other),
    ));

    let response = state.transport.round_trip(tunnelled).await?;

    let mut out = HttpResponse::new(HttpBody::from_stream(ReaderStream::new(response.body)));
    *out.status_mut() = response.status;
    let mut headers = response.headers;
    // hyper manages response framing itself
    headers.remove(header::TRANSFER_ENCODING);
    *out.headers_mut() = headers;
    Ok(out)
}
