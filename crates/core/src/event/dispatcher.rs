// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronous event fan-out (C7).
//!
//! Grounded on `pyowmaster/event/handler.py` (`OwEventHandler`,
//! `OwEventDispatcher`).

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, warn};

use super::types::Event;

/// A registered consumer of dispatched events. Implementations must not
/// perform blocking work here — see `ThreadedHandler` in the `owmasterd`
/// crate for handlers that need a background worker.
pub trait EventHandler: Send {
    fn handle_event(&mut self, event: &Event);

    /// Best-effort shutdown hook; errors are logged, never propagated.
    fn shutdown(&mut self) {}
}

const PAUSE_BUFFER_CAPACITY: usize = 100;

/// Dispatches events to all registered handlers, in registration order, on
/// the calling thread. Supports pausing delivery (buffering up to
/// [`PAUSE_BUFFER_CAPACITY`] events, drop-oldest) so handlers can be wired up
/// before the first real event arrives.
pub struct EventDispatcher {
    handlers: Vec<Box<dyn EventHandler>>,
    paused: bool,
    buffer: VecDeque<Event>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            paused: false,
            buffer: VecDeque::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Flush any buffered events (in FIFO order), then resume live delivery.
    pub fn resume(&mut self) {
        self.paused = false;
        while let Some(ev) = self.buffer.pop_front() {
            self.dispatch(&ev);
        }
    }

    pub fn handle_event(&mut self, event: Event) {
        if self.paused {
            if self.buffer.len() >= PAUSE_BUFFER_CAPACITY {
                warn!("event dispatcher pause buffer full, dropping oldest event");
                self.buffer.pop_front();
            }
            self.buffer.push_back(event);
            return;
        }

        self.dispatch(&event);
    }

    fn dispatch(&mut self, event: &Event) {
        debug!(?event, "dispatching event");
        for h in &mut self.handlers {
            let result = catch_unwind(AssertUnwindSafe(|| h.handle_event(event)));
            if result.is_err() {
                error!("unhandled panic in event handler, continuing");
            }
        }
    }

    /// Signal all handlers to shut down, best-effort.
    pub fn shutdown(&mut self) {
        for h in &mut self.handlers {
            let result = catch_unwind(AssertUnwindSafe(|| h.shutdown()));
            if result.is_err() {
                error!("unhandled panic while shutting down event handler");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::EventKind;
    use std::sync::{Arc, Mutex};

    struct RecordingHandler {
        received: Arc<Mutex<Vec<Event>>>,
    }

    impl EventHandler for RecordingHandler {
        fn handle_event(&mut self, event: &Event) {
            self.received.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
        }
    }

    fn config_event(n: u64) -> Event {
        Event::new(n as f64, None, EventKind::Counter { channel: "A".into(), value: n })
    }

    #[test]
    fn delivers_in_registration_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_handler(Box::new(RecordingHandler { received: received.clone() }));

        dispatcher.handle_event(config_event(1));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn pause_buffers_and_resume_flushes_fifo() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_handler(Box::new(RecordingHandler { received: received.clone() }));

        dispatcher.pause();
        dispatcher.handle_event(config_event(1));
        dispatcher.handle_event(config_event(2));
        assert!(received.lock().unwrap().is_empty());

        dispatcher.resume();
        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].timestamp, 1.0);
        assert_eq!(got[1].timestamp, 2.0);
    }

    #[test]
    fn pause_buffer_drops_oldest_when_full() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_handler(Box::new(RecordingHandler { received: received.clone() }));

        dispatcher.pause();
        for n in 0..150 {
            dispatcher.handle_event(config_event(n));
        }
        dispatcher.resume();

        let got = received.lock().unwrap();
        assert_eq!(got.len(), PAUSE_BUFFER_CAPACITY);
        // The oldest 50 were dropped; first surviving event is #50.
        assert_eq!(got[0].timestamp, 50.0);
    }

    struct PanickingHandler;
    impl EventHandler for PanickingHandler {
        fn handle_event(&mut self, _event: &Event) {
            panic!("boom");
        }
    }

    #[test]
    fn one_handler_panicking_does_not_stop_others() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_handler(Box::new(PanickingHandler));
        dispatcher.add_handler(Box::new(RecordingHandler { received: received.clone() }));

        dispatcher.handle_event(config_event(1));
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
