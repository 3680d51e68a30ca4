// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use http::{HeaderMap, Method, StatusCode, Version};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Body;

/// A request routed over the bus.
///
/// The URL must use the `httpn` scheme; its host (and leading path segments)
/// select the target subject. Cancelling `cancel` aborts the exchange: chunk
/// producers stop between chunks, pending reads fail with
/// [`crate::Error::Cancelled`], and the exchange's subscriptions are
/// released.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Body,
    pub cancel: CancellationToken,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Body::empty(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: Url) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: Url, body: impl Into<Body>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = body.into();
        request
    }
}

/// A response reassembled from one or more bus messages.
///
/// `body` streams: small responses are fully buffered, chunked responses pull
/// from the exchange's private subscription as they are read. Headers are
/// delivered as received, except that `transfer-encoding: chunked` clears
/// `content-length`.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Human-readable status text from the wire, e.g. `"Not Found"`.
    pub status_text: String,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Body,
}
