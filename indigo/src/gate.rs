//! Pending-update gate
//!
//! Single-slot synchronization between the command path and the notification
//! path. A command marks the gate pending for its property key right before it
//! is transmitted; the first update or delete notification for that key clears
//! it. A later command waits, bounded, for the slot to become idle.

use std::time::Duration;
use tokio::sync::watch;

use crate::error::{IndigoError, IndigoResult};
use crate::key::PropertyKey;

/// Single outstanding command tracker
#[derive(Debug)]
pub struct PendingGate {
    slot: watch::Sender<Option<PropertyKey>>,
    poll_interval: Duration,
    max_wait_count: u32,
}

impl Default for PendingGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 30)
    }
}

impl PendingGate {
    /// Create an idle gate that waits at most `poll_interval * max_wait_count`
    pub fn new(poll_interval: Duration, max_wait_count: u32) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot,
            poll_interval,
            max_wait_count,
        }
    }

    /// Bound on how long `acquire` waits for a prior command
    pub fn max_wait(&self) -> Duration {
        self.poll_interval * self.max_wait_count
    }

    /// Wait for the gate to be idle, then mark it pending for `key`.
    ///
    /// Fails with `GateTimeout` if a prior command has not cleared within
    /// `max_wait()`; the gate is left untouched in that case.
    pub async fn acquire(&self, key: &PropertyKey) -> IndigoResult<()> {
        let mut rx = self.slot.subscribe();
        let wait = async {
            loop {
                if self.try_acquire(key) {
                    return true;
                }
                if rx.wait_for(Option::is_none).await.is_err() {
                    return false;
                }
            }
        };

        match tokio::time::timeout(self.max_wait(), wait).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(IndigoError::ChannelClosed("pending gate closed".to_string())),
            Err(_) => Err(IndigoError::GateTimeout {
                key: key.to_string(),
                waited: self.max_wait(),
            }),
        }
    }

    /// Mark pending for `key` if idle, without waiting
    pub fn try_acquire(&self, key: &PropertyKey) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(key.clone());
                true
            } else {
                false
            }
        })
    }

    /// Clear the gate if it is pending for exactly `key`
    pub fn release_if_match(&self, key: &PropertyKey) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.as_ref() == Some(key) {
                *slot = None;
                true
            } else {
                false
            }
        })
    }

    /// Clear the gate if it is pending for any property of `device` on `host`
    pub fn release_device(&self, device: &str, host: &str) -> bool {
        self.slot.send_if_modified(|slot| match slot {
            Some(pending) if pending.belongs_to(device, host) => {
                *slot = None;
                true
            }
            _ => false,
        })
    }

    /// Force the gate idle, returning the key it was pending for
    pub fn reset(&self) -> Option<PropertyKey> {
        let mut previous = None;
        self.slot.send_if_modified(|slot| {
            previous = slot.take();
            previous.is_some()
        });
        previous
    }

    pub fn is_pending(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn pending_key(&self) -> Option<PropertyKey> {
        self.slot.borrow().clone()
    }
}
