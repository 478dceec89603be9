//! Interfaces of the external collaborators the controller drives.
//!
//! The controller never powers units, reads scheduler statistics or
//! watches the display itself. It talks to these four traits; concrete
//! adapters live in [`crate::sysfs`], [`crate::sources`] and
//! [`crate::sim`].

use std::sync::Mutex;

use tokio::sync::mpsc;

use coreplug_core::{InputEvent, PowerEvent, UnitId};

use crate::error::{DriverError, SourceError};

/// Buffered events per subscriber before new ones are dropped.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Powers individual compute units on and off.
pub trait UnitPowerDriver: Send + Sync {
    /// Number of units the pool can ever hold.
    fn capacity(&self) -> usize;

    fn activate(&self, unit: UnitId) -> Result<(), DriverError>;

    fn deactivate(&self, unit: UnitId) -> Result<(), DriverError>;

    fn is_online(&self, unit: UnitId) -> bool;

    fn online_count(&self) -> usize {
        (0..self.capacity()).filter(|&u| self.is_online(u)).count()
    }

    fn online_units(&self) -> Vec<UnitId> {
        (0..self.capacity()).filter(|&u| self.is_online(u)).collect()
    }
}

/// Per-unit running-thread averages.
pub trait LoadTelemetry: Send + Sync {
    /// Called once at the start of every sampling tick.
    fn refresh(&self) {}

    /// Average running threads on `unit`, or `None` when unknown.
    fn running_average(&self, unit: UnitId) -> Option<f64>;
}

/// Delivers screen on/off (suspend/resume) transitions.
pub trait PowerStateNotifier: Send + Sync {
    fn subscribe(&self) -> Result<mpsc::Receiver<PowerEvent>, SourceError>;
}

/// Delivers pointer/touch activity.
pub trait InputEventSource: Send + Sync {
    fn subscribe(&self) -> Result<mpsc::Receiver<InputEvent>, SourceError>;
}

/// Fan-out of events to any number of subscribers.
///
/// Closed subscribers are pruned on publish. A full subscriber misses the
/// event rather than blocking the publisher.
pub struct Fanout<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Clone> Fanout<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().push(tx);
        rx
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: T) -> usize {
        let mut subs = self.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.iter()
            .filter(|tx| tx.try_send(event.clone()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fanout_reaches_every_live_subscriber() {
        let fanout = Fanout::new();
        let mut a = fanout.subscribe();
        let b = fanout.subscribe();
        drop(b);

        assert_eq!(fanout.publish(PowerEvent::ScreenOff), 1);
        assert_eq!(a.recv().await, Some(PowerEvent::ScreenOff));
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[test]
    fn fanout_drops_when_subscriber_full() {
        let fanout = Fanout::new();
        let _rx = fanout.subscribe();
        for _ in 0..SUBSCRIBER_BUFFER {
            assert_eq!(fanout.publish(InputEvent), 1);
        }
        assert_eq!(fanout.publish(InputEvent), 0);
    }
}
