// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::URL_SCHEME;

/// Errors produced by transports, servers, writers and readers.
///
/// Configuration problems surface synchronously from the `listen`/`run` entry
/// points; per-exchange failures surface from [`crate::Transport::round_trip`]
/// on the client side and through the server's error callback on the server
/// side.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required option is missing or invalid.
    #[error("configuration: {0}")]
    Config(String),

    /// The request is structurally unusable (missing host, bad URL parts, no
    /// reply subject on an inbound envelope).
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// The request URL does not use the tunnel scheme.
    #[error("url scheme must be '{URL_SCHEME}'")]
    InvalidScheme,

    /// The final subject segment is not a recognized HTTP verb.
    #[error("invalid method '{0}' in subject")]
    InvalidMethod(String),

    /// A publish or subscribe operation failed; the bus error is carried
    /// verbatim.
    #[error("bus: {0}")]
    Bus(String),

    /// The chunk handshake arrived without a continuation subject.
    #[error("invalid chunk handshake: missing continuation subject")]
    BadHandshake,

    /// The response envelope is missing a status code or carries one that
    /// does not parse.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// The governing cancellation token fired.
    #[error("cancelled")]
    Cancelled,

    /// Reading the caller-supplied body failed.
    #[error("request body: {0}")]
    BodyIo(#[from] std::io::Error),

    /// The response writer was used after `close`.
    #[error("response writer is closed")]
    Closed,

    /// The application handler failed.
    #[error("handler: {0}")]
    Handler(anyhow::Error),
}

impl Error {
    pub(crate) fn bus(err: impl std::fmt::Display) -> Self {
        Error::Bus(err.to_string())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Adapter used where an error crosses an `AsyncRead` boundary.
    pub(crate) fn into_io(self) -> std::io::Error {
        std::io::Error::other(self)
    }
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Error::Config(format!("{} must be set", err.field_name()))
    }
}
