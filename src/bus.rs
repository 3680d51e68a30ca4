// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The seam between the tunnel and the underlying pub/sub system.

use std::pin::Pin;

use async_nats::Message;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::Error;

/// An active subscription: an ordered stream of messages for one subject.
/// Dropping the stream releases the subscription.
pub type Subscription = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// The handful of bus operations the tunnel needs.
///
/// Implemented for [`async_nats::Client`] and for the in-process
/// [`crate::memory::MemoryBus`]. The contract leans on two properties of the
/// underlying system: per-subject FIFO delivery to a single subscriber, and
/// safe concurrent publish/subscribe on a shared connection.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Per-message payload ceiling reported by the connection.
    fn max_payload(&self) -> usize;

    /// A fresh, unique subject usable as a private reply channel.
    fn new_inbox(&self) -> String;

    /// Publish one message (subject, optional reply, optional headers,
    /// payload).
    async fn publish(&self, msg: Message) -> Result<(), Error>;

    /// Subscribe to a subject (wildcards allowed).
    async fn subscribe(&self, subject: String) -> Result<Subscription, Error>;

    /// Subscribe as a member of a load-balanced group: each message is
    /// delivered to at most one member.
    async fn queue_subscribe(&self, subject: String, group: String)
        -> Result<Subscription, Error>;
}

#[async_trait]
impl Bus for async_nats::Client {
    fn max_payload(&self) -> usize {
        self.server_info().max_payload
    }

    fn new_inbox(&self) -> String {
        async_nats::Client::new_inbox(self)
    }

    async fn publish(&self, msg: Message) -> Result<(), Error> {
        match (msg.reply, msg.headers) {
            (Some(reply), Some(headers)) => self
                .publish_with_reply_and_headers(msg.subject, reply, headers, msg.payload)
                .await
                .map_err(Error::bus),
            (Some(reply), None) => self
                .publish_with_reply(msg.subject, reply, msg.payload)
                .await
                .map_err(Error::bus),
            (None, Some(headers)) => self
                .publish_with_headers(msg.subject, headers, msg.payload)
                .await
                .map_err(Error::bus),
            (None, None) => async_nats::Client::publish(self, msg.subject, msg.payload)
                .await
                .map_err(Error::bus),
        }
    }

    async fn subscribe(&self, subject: String) -> Result<Subscription, Error> {
        let subscriber = async_nats::Client::subscribe(self, subject)
            .await
            .map_err(Error::bus)?;
        Ok(Box::pin(subscriber))
    }

    async fn queue_subscribe(
        &self,
        subject: String,
        group: String,
    ) -> Result<Subscription, Error> {
        let subscriber = async_nats::Client::queue_subscribe(self, subject, group)
            .await
            .map_err(Error::bus)?;
        Ok(Box::pin(subscriber))
    }
}

/// Pull the next message, racing the exchange's cancellation token.
pub(crate) async fn next_msg(
    sub: &mut Subscription,
    cancel: &CancellationToken,
) -> Result<Message, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        msg = sub.next() => msg.ok_or_else(|| Error::bus("subscription closed")),
    }
}
