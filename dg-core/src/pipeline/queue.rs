//! Event queue between the notification context and the worker
//!
//! A FIFO plus a condition variable. Producers append and signal, the worker
//! drains everything queued on each wake. The stop flag lives under the same
//! lock so a wake can never be missed.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::data::DeviceEvent;

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<DeviceEvent>,
    stopped: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

/// What the worker got on a wake
#[derive(Debug, PartialEq, Eq)]
pub enum Drained {
    Events(Vec<DeviceEvent>),
    Stopped,
}

/// Unbounded FIFO of device events
///
/// Cheap to clone; every clone refers to the same queue.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    shared: Arc<Shared>,
}

/// Producer handle given to notification sources
#[derive(Debug, Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

/// Raises the stop signal
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until stopped or at least one event is queued
    ///
    /// Stop has priority: once raised, queued events are abandoned.
    pub fn wait_and_drain(&self) -> Drained {
        let mut state = self.shared.state.lock();
        loop {
            if state.stopped {
                return Drained::Stopped;
            }
            if !state.events.is_empty() {
                return Drained::Events(state.events.drain(..).collect());
            }
            self.shared.wake.wait(&mut state);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Events waiting to be drained
    pub fn len(&self) -> usize {
        self.shared.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSender {
    /// Append an event and wake the worker; never blocks on the worker
    ///
    /// If the queue cannot grow the event is dropped with a warning.
    pub fn enqueue(&self, event: DeviceEvent) {
        {
            let mut state = self.shared.state.lock();
            let reserved = state.events.try_reserve(1);
            if let Err(e) = reserved {
                drop(state);
                warn!(path = %event.device_path, "Dropping device event: {}", e);
                return;
            }
            state.events.push_back(event);
        }
        self.shared.wake.notify_one();
    }
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.state.lock().stopped = true;
        self.shared.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::interface;
    use crate::data::DeviceAction;
    use std::thread;
    use std::time::Duration;

    fn event(n: usize) -> DeviceEvent {
        DeviceEvent::new(DeviceAction::Arrival, format!("path-{}", n), interface::USB_DEVICE)
    }

    #[test]
    fn test_burst_is_drained_in_order() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        for n in 0..50 {
            sender.enqueue(event(n));
        }
        assert_eq!(queue.len(), 50);

        match queue.wait_and_drain() {
            Drained::Events(events) => {
                let paths: Vec<String> = events.into_iter().map(|e| e.device_path).collect();
                let expected: Vec<String> = (0..50).map(|n| format!("path-{}", n)).collect();
                assert_eq!(paths, expected);
            }
            Drained::Stopped => panic!("queue was not stopped"),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stop_beats_pending_events() {
        let queue = EventQueue::new();
        queue.sender().enqueue(event(1));
        queue.stop_handle().stop();
        assert_eq!(queue.wait_and_drain(), Drained::Stopped);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_wait_wakes_on_enqueue() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.enqueue(event(7));
        });

        assert_eq!(queue.wait_and_drain(), Drained::Events(vec![event(7)]));
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_wakes_on_stop() {
        let queue = EventQueue::new();
        let stop = queue.stop_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop.stop();
        });

        assert_eq!(queue.wait_and_drain(), Drained::Stopped);
        assert!(queue.is_stopped());
        stopper.join().unwrap();
    }
}
