// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Threaded handler base (C8).
//!
//! Grounded on `pyowmaster/event/handler.py::ThreadedOwEventHandler`, which
//! hands events to a background worker through a blocking `Queue.put`.
//! REDESIGNED per spec §4.8/§9: the emitting thread (the scheduler) must
//! never block on a handler, so a full queue here drops the *oldest*
//! buffered event instead. Implemented as a small fixed-capacity ring,
//! the same shape as the teacher's `RingBuffer` (`crates/cli/src/ring.rs`),
//! but over `Event` values and guarded by a `Mutex`/`Condvar` pair so the
//! worker can block waiting for new work.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::warn;

use owmaster_core::event::{Event, EventHandler};

const DEFAULT_CAPACITY: usize = 256;

enum Slot {
    Event(Event),
    Shutdown,
}

struct Shared {
    queue: Mutex<VecDeque<Slot>>,
    not_empty: Condvar,
    capacity: usize,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Push a slot, dropping the oldest buffered one if already at capacity.
    fn push(&self, slot: Slot) {
        #[allow(clippy::unwrap_used)]
        let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if q.len() >= self.capacity {
            q.pop_front();
            warn!("threaded handler queue full, dropping oldest event");
        }
        q.push_back(slot);
        self.not_empty.notify_one();
    }
}

/// Wraps a [`Delegate`] so its work runs on a dedicated background thread,
/// isolated from the event dispatcher's calling (scheduler) thread.
pub struct ThreadedHandler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

/// The blocking work a `ThreadedHandler` runs off-thread. Implementors may
/// do slow I/O (shell commands, network sinks) without risking the
/// dispatcher's calling thread.
pub trait Delegate: Send + 'static {
    fn handle_event(&mut self, event: &Event);
    fn shutdown(&mut self) {}
}

impl ThreadedHandler {
    pub fn new(delegate: impl Delegate) -> Self {
        Self::with_capacity(delegate, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(mut delegate: impl Delegate, capacity: usize) -> Self {
        let shared = Arc::new(Shared::new(capacity));

        let worker_shared = shared.clone();
        let worker = std::thread::spawn(move || loop {
            let slot = {
                #[allow(clippy::unwrap_used)]
                let mut q = worker_shared.queue.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if let Some(slot) = q.pop_front() {
                        break slot;
                    }
                    #[allow(clippy::unwrap_used)]
                    {
                        q = worker_shared.not_empty.wait(q).unwrap_or_else(|e| e.into_inner());
                    }
                }
            };

            match slot {
                Slot::Event(event) => delegate.handle_event(&event),
                Slot::Shutdown => {
                    delegate.shutdown();
                    return;
                }
            }
        });

        Self { shared, worker: Some(worker) }
    }
}

impl EventHandler for ThreadedHandler {
    fn handle_event(&mut self, event: &Event) {
        self.shared.push(Slot::Event(event.clone()));
    }

    /// Waits for the queue to drain, then joins the worker thread.
    fn shutdown(&mut self) {
        self.shared.push(Slot::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owmaster_core::event::EventKind;
    use std::sync::mpsc;

    struct RecordingDelegate(mpsc::Sender<Event>);

    impl Delegate for RecordingDelegate {
        fn handle_event(&mut self, event: &Event) {
            let _ = self.0.send(event.clone());
        }
    }

    fn counter_event(n: u64) -> Event {
        Event::new(n as f64, None, EventKind::Counter { channel: "A".into(), value: n })
    }

    #[test]
    fn delivers_events_off_thread() {
        let (tx, rx) = mpsc::channel();
        let mut handler = ThreadedHandler::new(RecordingDelegate(tx));
        handler.handle_event(&counter_event(1));
        handler.shutdown();
        let received = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(received.timestamp, 1.0);
    }

    #[test]
    fn drops_oldest_when_queue_is_full() {
        // Exercise the ring directly (no worker thread draining it
        // concurrently) so the drop-oldest contract can be asserted
        // deterministically.
        let shared = Shared::new(2);
        shared.push(Slot::Event(counter_event(1)));
        shared.push(Slot::Event(counter_event(2)));
        shared.push(Slot::Event(counter_event(3)));

        #[allow(clippy::unwrap_used)]
        let q = shared.queue.lock().unwrap();
        assert_eq!(q.len(), 2);
        match &q[0] {
            Slot::Event(ev) => assert_eq!(ev.timestamp, 2.0),
            Slot::Shutdown => unreachable!(),
        }
    }
}
