// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::bus::Subscription;
use crate::Error;

/// A byte stream reassembled from an ordered sequence of chunk messages.
///
/// The reader owns the private subscription for its half of a chunked
/// exchange. Message payloads are exposed in delivery order; one message with
/// an empty payload terminates the stream, and nothing past it is ever
/// consumed. An optional first message (already pulled by the caller, e.g.
/// the response envelope) is drained before the subscription.
///
/// Reads that would block on the subscription race the exchange's
/// cancellation token; a fired token surfaces as an [`Error::Cancelled`]
/// wrapped in `io::Error`. Bytes already pulled off the bus are always
/// delivered first. Dropping the reader drops the subscription, which
/// unsubscribes.
pub struct ChunkReader {
    sub: Subscription,
    first: Option<Bytes>,
    current: Bytes,
    done: bool,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl ChunkReader {
    pub(crate) fn new(first: Option<Bytes>, sub: Subscription, cancel: &CancellationToken) -> Self {
        Self {
            sub,
            first,
            current: Bytes::new(),
            done: false,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
        }
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(Ok(()));
        }

        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current.split_to(n));
                return Poll::Ready(Ok(()));
            }

            let payload = match this.first.take() {
                Some(first) => first,
                None => {
                    // cancellation only interrupts waiting for a new message,
                    // never delivery of bytes already in hand
                    if this.cancelled.as_mut().poll(cx).is_ready() {
                        this.done = true;
                        return Poll::Ready(Err(Error::Cancelled.into_io()));
                    }
                    match Pin::new(&mut this.sub).poll_next(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            this.done = true;
                            return Poll::Ready(Err(
                                Error::bus("subscription closed mid chunk stream").into_io()
                            ));
                        }
                        Poll::Ready(Some(msg)) => msg.payload,
                    }
                }
            };

            // empty payload terminates the chunk stream
            if payload.is_empty() {
                this.done = true;
                return Poll::Ready(Ok(()));
            }
            this.current = payload;
        }
    }
}
