//! Event bus: single-writer append, multi-reader fan-out
//!
//! Driver callback tasks publish concurrently; one lock serializes them
//! into a single timestamp-ordered stream. Events land in a bounded ring
//! buffer so a correlator that subscribes slightly after its action fired
//! still sees everything published since the action was issued. Each
//! subscription scans forward with its own cursor; subscriptions never
//! steal events from one another.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{trace, warn};

use vigil_common::{
    EventDescriptor, EventPattern, EventPayload, ObservedEvent, SessionClock, Timestamp,
};

/// Raw callback from the external automation driver, before
/// normalization. Malformed bodies are preserved, never rejected.
#[derive(Debug, Clone)]
pub enum RawDriverEvent {
    NetworkResponse {
        method: String,
        url: String,
        status: u16,
        body: Vec<u8>,
    },
    DomText {
        selector: String,
        text: String,
    },
    StorageWrite {
        key: String,
        value: String,
    },
}

struct BusInner {
    buf: VecDeque<ObservedEvent>,
    next_seq: u64,
    capacity: usize,
    closed: bool,
}

/// Shared event bus handle. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    clock: SessionClock,
    inner: Arc<Mutex<BusInner>>,
    publish_tx: Arc<watch::Sender<u64>>,
}

impl EventBus {
    pub fn new(clock: SessionClock, capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            clock,
            inner: Arc::new(Mutex::new(BusInner {
                buf: VecDeque::with_capacity(capacity.min(64)),
                next_seq: 0,
                capacity: capacity.max(1),
                closed: false,
            })),
            publish_tx: Arc::new(tx),
        }
    }

    /// Normalize and append a raw driver callback. Safe to call from any
    /// task; the critical section is a buffer append, no I/O.
    pub fn publish(&self, raw: RawDriverEvent) -> u64 {
        let observed_at = self.clock.now();
        let (descriptor, payload, status) = normalize(raw);

        let seq = {
            let mut inner = self.inner.lock();
            if inner.closed {
                warn!("event published after bus close, dropping: {}", descriptor);
                return inner.next_seq;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            if inner.buf.len() == inner.capacity {
                inner.buf.pop_front();
            }
            inner.buf.push_back(ObservedEvent {
                seq,
                descriptor,
                payload,
                status,
                observed_at,
            });
            seq
        };

        trace!(seq, "event published at {}", observed_at);
        self.publish_tx.send_replace(seq + 1);
        seq
    }

    /// Open a subscription that replays buffered events observed at or
    /// after `from` and matching any of `patterns`, then streams new
    /// ones as they are published.
    pub fn subscribe(&self, patterns: Vec<EventPattern>, from: Timestamp) -> Subscription {
        Subscription {
            inner: Arc::clone(&self.inner),
            rx: self.publish_tx.subscribe(),
            patterns,
            from,
            cursor: 0,
        }
    }

    /// Close the bus at scenario teardown. All subscriptions drain what
    /// remains and then terminate; no background subscription survives.
    pub fn close(&self) {
        let next_seq = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.next_seq
        };
        self.publish_tx.send_replace(next_seq + 1);
    }

    /// Number of events currently retained.
    pub fn retained(&self) -> usize {
        self.inner.lock().buf.len()
    }
}

fn normalize(raw: RawDriverEvent) -> (EventDescriptor, EventPayload, Option<u16>) {
    match raw {
        RawDriverEvent::NetworkResponse { method, url, status, body } => (
            EventDescriptor::Network { method, url },
            EventPayload::from_body(&body),
            Some(status),
        ),
        RawDriverEvent::DomText { selector, text } => (
            EventDescriptor::Dom {
                selector,
                text: text.clone(),
            },
            EventPayload::Text(text),
            None,
        ),
        RawDriverEvent::StorageWrite { key, value } => (
            EventDescriptor::Storage { key },
            EventPayload::Text(value),
            None,
        ),
    }
}

/// One subscriber's independent view of the stream.
pub struct Subscription {
    inner: Arc<Mutex<BusInner>>,
    rx: watch::Receiver<u64>,
    patterns: Vec<EventPattern>,
    from: Timestamp,
    cursor: u64,
}

impl Subscription {
    /// Next matching event in publication order. Returns `None` once the
    /// bus is closed and the buffer holds no further match.
    pub async fn next(&mut self) -> Option<ObservedEvent> {
        let inner = Arc::clone(&self.inner);
        loop {
            // Mark the current publish version seen before scanning, so
            // anything published after the scan triggers `changed`.
            self.rx.borrow_and_update();

            let closed = {
                let guard = inner.lock();
                if let Some(event) = self.scan(&guard) {
                    return Some(event);
                }
                self.cursor = guard.next_seq;
                guard.closed
            };
            if closed {
                return None;
            }

            if self.rx.changed().await.is_err() {
                // Every bus handle dropped; nothing can publish anymore.
                let guard = inner.lock();
                return self.scan(&guard);
            }
        }
    }

    fn scan(&mut self, inner: &BusInner) -> Option<ObservedEvent> {
        for event in &inner.buf {
            if event.seq < self.cursor {
                continue;
            }
            self.cursor = event.seq + 1;
            if event.observed_at < self.from {
                continue;
            }
            if self.patterns.iter().any(|p| p.matches(event)) {
                return Some(event.clone());
            }
        }
        None
    }
}
