// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! An in-process bus with NATS pub/sub semantics.
//!
//! Useful for hermetic tests and examples: subject wildcards (`*`, `>`),
//! load-balanced queue groups, per-subject FIFO delivery, inbox generation,
//! and a configurable payload ceiling. Not a network transport.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_nats::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::bus::{Bus, Subscription};
use crate::Error;

/// An in-process [`Bus`]. Share one instance (behind an `Arc`) between the
/// transports and servers under test.
pub struct MemoryBus {
    max_payload: usize,
    subs: Mutex<Vec<SubEntry>>,
    round_robin: AtomicUsize,
}

struct SubEntry {
    subject: String,
    group: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

impl MemoryBus {
    /// A bus whose connection reports the given `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            subs: Mutex::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
        }
    }

    fn add(&self, subject: String, group: Option<String>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().push(SubEntry { subject, group, tx });
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

#[async_trait]
impl Bus for MemoryBus {
    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", Uuid::new_v4().simple())
    }

    async fn publish(&self, msg: Message) -> Result<(), Error> {
        if msg.payload.len() > self.max_payload {
            return Err(Error::bus(format!(
                "maximum payload exceeded: {} > {}",
                msg.payload.len(),
                self.max_payload
            )));
        }

        let mut subs = self.subs.lock();
        subs.retain(|entry| !entry.tx.is_closed());

        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for (i, entry) in subs.iter().enumerate() {
            if !subject_matches(&entry.subject, &msg.subject) {
                continue;
            }
            match &entry.group {
                None => {
                    let _ = entry.tx.send(msg.clone());
                }
                Some(group) => match groups.iter_mut().find(|(name, _)| name == group) {
                    Some((_, members)) => members.push(i),
                    None => groups.push((group.as_str(), vec![i])),
                },
            }
        }

        // queue groups: at most one member per message
        for (_, members) in &groups {
            let pick = self.round_robin.fetch_add(1, Ordering::Relaxed) % members.len();
            let _ = subs[members[pick]].tx.send(msg.clone());
        }

        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<Subscription, Error> {
        Ok(self.add(subject, None))
    }

    async fn queue_subscribe(
        &self,
        subject: String,
        group: String,
    ) -> Result<Subscription, Error> {
        Ok(self.add(subject, Some(group)))
    }
}

/// NATS subject matching: tokens split on `.`, `*` matches exactly one token,
/// a trailing `>` matches one or more.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return true,
            (Some(">"), None) => return false,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
