//! Alarm scheduler - three independent one-shot wake slots.
//!
//! Wake times are in the elapsed-realtime base (milliseconds since boot,
//! counting suspend). A pending alarm is a tokio task that sleeps in bounded
//! slices and rechecks the boot clock, so time spent suspended is noticed
//! shortly after resume and the alarm never fires before its wake time.

use crate::clock::Clock;
use companion_common::AlarmSlot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest single sleep before rechecking the boot clock
pub const MAX_SLEEP_SLICE: Duration = Duration::from_secs(5);

/// Receives alarm firings
pub trait AlarmListener: Send + Sync {
    fn alarm_fired(&self, slot: AlarmSlot);
}

struct PendingAlarm {
    id: u64,
    wake_time_ms: i64,
    task: JoinHandle<()>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    slots: [Mutex<Option<PendingAlarm>>; 3],
    listener: OnceLock<Weak<dyn AlarmListener>>,
    next_id: AtomicU64,
    max_slice: Duration,
}

/// Owns the three alarm slots
pub struct AlarmScheduler {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl AlarmScheduler {
    pub fn new(clock: Arc<dyn Clock>, runtime: Handle) -> Self {
        Self::with_slice(clock, runtime, MAX_SLEEP_SLICE)
    }

    pub fn with_slice(clock: Arc<dyn Clock>, runtime: Handle, max_slice: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                slots: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
                listener: OnceLock::new(),
                next_id: AtomicU64::new(1),
                max_slice,
            }),
            runtime,
        }
    }

    /// Attach the receiver of firings. Only the first binding sticks.
    pub fn bind_listener(&self, listener: Weak<dyn AlarmListener>) {
        if self.inner.listener.set(listener).is_err() {
            warn!("Alarm listener already bound; ignoring rebind");
        }
    }

    /// Arm `slot` for `wake_time_ms`, replacing any pending wake for it
    pub fn set_exact(&self, slot: AlarmSlot, wake_time_ms: i64) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.lock_slot(slot);
        if let Some(prev) = guard.take() {
            prev.task.abort();
        }

        let inner = Arc::clone(&self.inner);
        let task = self.runtime.spawn(async move {
            inner.wait_until(wake_time_ms).await;
            inner.fire(slot, id).await;
        });
        *guard = Some(PendingAlarm {
            id,
            wake_time_ms,
            task,
        });
        debug!("Alarm {} set for {} ms", slot, wake_time_ms);
    }

    /// Disarm `slot`; a no-op if it is not armed
    pub fn cancel(&self, slot: AlarmSlot) {
        if let Some(prev) = self.inner.lock_slot(slot).take() {
            prev.task.abort();
            debug!("Alarm {} cancelled", slot);
        }
    }

    pub fn cancel_all(&self) {
        for slot in AlarmSlot::ALL {
            self.cancel(slot);
        }
    }

    /// Pending wake time for `slot`, if armed
    pub fn pending_wake_time(&self, slot: AlarmSlot) -> Option<i64> {
        self.inner.lock_slot(slot).as_ref().map(|p| p.wake_time_ms)
    }
}

impl Inner {
    fn lock_slot(&self, slot: AlarmSlot) -> std::sync::MutexGuard<'_, Option<PendingAlarm>> {
        self.slots[slot.index()]
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    async fn wait_until(&self, wake_time_ms: i64) {
        loop {
            let remaining = wake_time_ms - self.clock.elapsed_realtime_ms();
            if remaining <= 0 {
                return;
            }
            let nap = Duration::from_millis(remaining as u64).min(self.max_slice);
            tokio::time::sleep(nap).await;
        }
    }

    async fn fire(&self, slot: AlarmSlot, id: u64) {
        // Release the slot before calling out; the listener may cancel slots.
        {
            let mut guard = self.lock_slot(slot);
            match guard.as_ref() {
                Some(pending) if pending.id == id => {
                    guard.take();
                }
                _ => return,
            }
        }

        let listener = match self.listener.get().and_then(|l| l.upgrade()) {
            Some(listener) => listener,
            None => {
                warn!("Alarm {} fired with no listener attached", slot);
                return;
            }
        };

        let delivered = tokio::task::spawn_blocking(move || listener.alarm_fired(slot)).await;
        if let Err(e) = delivered {
            warn!("Alarm {} delivery panicked: {}", slot, e);
        }
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
