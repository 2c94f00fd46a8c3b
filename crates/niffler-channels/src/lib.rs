// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Typed, multi-producer/single-consumer FIFO queues used to wire the UI,
//! API worker, and tool worker threads together, plus a shutdown flag every
//! blocking call honors.
//!
//! There is no async runtime anywhere in this crate: `Queue<T>` is a thin
//! wrapper over `std::sync::mpsc`, which is already non-blocking on the
//! send side (the channel is unbounded) and offers `recv_timeout` on the
//! receive side. `trySend`/`tryReceive` map directly onto that; `receive`
//! layers a shutdown-aware poll loop on top of `recv_timeout` so a blocked
//! receiver is guaranteed to wake up within one poll interval of shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Every blocking call in the system polls for shutdown at least this often.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Observable, cloneable shutdown signal. Setting it is a one-way operation;
/// there is no un-shutdown.
#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The producer half of a queue. Cheap to clone; every clone is an
/// independent producer (multi-producer).
pub struct QueueSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Whether a non-blocking send succeeded, and why not if it did not.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Disconnected,
}

impl<T> QueueSender<T> {
    /// Non-blocking send. `std::sync::mpsc::Sender` is backed by an
    /// unbounded queue, so this never blocks; it only fails when the
    /// receiver has been dropped, which we treat as "shutdown already
    /// happened and the pending message is dropped cleanly".
    pub fn try_send(&self, value: T) -> SendOutcome {
        match self.inner.send(value) {
            Ok(()) => SendOutcome::Sent,
            Err(_disconnected) => SendOutcome::Disconnected,
        }
    }
}

/// The single-consumer half of a queue.
pub struct QueueReceiver<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Non-blocking receive: `Some(value)` if one was queued, `None`
    /// otherwise (empty or disconnected — callers distinguish via
    /// `Shutdown` rather than this return value).
    pub fn try_receive(&self) -> Option<T> {
        match self.inner.try_recv() {
            Ok(v) => Some(v),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking receive with an overall `timeout`, polling `shutdown` at
    /// `POLL_INTERVAL` granularity so a blocked call returns within one
    /// poll interval of shutdown being signalled, even if `timeout` is
    /// much longer.
    pub fn receive(&self, timeout: Duration, shutdown: &Shutdown) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if shutdown.is_set() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let slice = remaining.min(POLL_INTERVAL);
            match self.inner.recv_timeout(slice) {
                Ok(v) => return Some(v),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Blocking receive with no deadline other than shutdown.
    pub fn receive_until_shutdown(&self, shutdown: &Shutdown) -> Option<T> {
        loop {
            if shutdown.is_set() {
                return None;
            }
            match self.inner.recv_timeout(POLL_INTERVAL) {
                Ok(v) => return Some(v),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Construct a new FIFO queue. The FIFO order of a single queue is
/// guaranteed by `std::sync::mpsc`; no ordering is implied across queues.
pub fn queue<T>() -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel();
    (QueueSender { inner: tx }, QueueReceiver { inner: rx })
}
