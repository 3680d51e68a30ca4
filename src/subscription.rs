// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pending-limit enforcement for long-lived subscriptions.
//!
//! A relay task pulls from the underlying subscription into a bounded channel,
//! so at most `msgs` messages and `bytes` payload bytes sit queued ahead of
//! the consumer. Byte budget permits travel with each message and are
//! released on delivery. When the consumer goes away or the token fires, the
//! relay exits and drops the inner subscription, which unsubscribes.

use std::sync::Arc;

use async_nats::Message;
use futures::StreamExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::bus::Subscription;

#[derive(Clone, Copy)]
pub(crate) struct PendingLimits {
    pub msgs: usize,
    pub bytes: usize,
}

pub(crate) fn with_pending_limits(
    mut inner: Subscription,
    limits: PendingLimits,
    cancel: CancellationToken,
) -> Subscription {
    let (tx, rx) = mpsc::channel::<(Message, OwnedSemaphorePermit)>(limits.msgs.max(1));
    let budget_max = limits.bytes.max(1).min(Semaphore::MAX_PERMITS);
    let budget = Arc::new(Semaphore::new(budget_max));

    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                msg = inner.next() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let weight = msg.payload.len().min(budget_max) as u32;
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                permit = budget.clone().acquire_many_owned(weight) => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if tx.send((msg, permit)).await.is_err() {
                break;
            }
        }
        trace!("subscription relay exiting");
    });

    Box::pin(ReceiverStream::new(rx).map(|(msg, _permit)| msg))
}
