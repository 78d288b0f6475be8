//! Stall detection for in-flight downloads

use std::sync::{Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::core::AttachmentService;

struct Alarm {
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Single-shot alarm that runs a watchdog tick on the service
///
/// Arming while an earlier alarm is still pending keeps the earlier one; a
/// tick re-arms on its own while downloads remain in flight, so no check is
/// lost.
pub struct Watchdog {
    service: Weak<AttachmentService>,
    alarm: Mutex<Option<Alarm>>,
}

impl Watchdog {
    pub fn new(service: Weak<AttachmentService>) -> Self {
        Self {
            service,
            alarm: Mutex::new(None),
        }
    }

    /// Run a tick after `delay`, cancelling requests silent for longer than `timeout`
    pub fn arm(&self, delay: Duration, timeout: Duration) {
        let deadline = Instant::now() + delay;
        let mut alarm = self.alarm.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(pending) = alarm.as_ref()
            && !pending.handle.is_finished()
            && pending.deadline > Instant::now()
            && pending.deadline <= deadline
        {
            debug!(?delay, "Watchdog::arm: earlier alarm pending");
            return;
        }

        debug!(?delay, ?timeout, "Watchdog::arm: called");
        let service = self.service.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(service) = service.upgrade() {
                // The tick re-arms, which replaces this task's handle; run it
                // on its own task so that cannot abort it midway.
                tokio::spawn(async move { service.watchdog_tick(timeout).await });
            }
        });

        if let Some(previous) = alarm.replace(Alarm { deadline, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel any pending alarm
    pub fn disarm(&self) {
        let mut alarm = self.alarm.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pending) = alarm.take() {
            debug!("Watchdog::disarm: cancelling pending alarm");
            pending.handle.abort();
        }
    }

    /// Whether an alarm is waiting to fire
    pub fn is_armed(&self) -> bool {
        self.alarm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|pending| !pending.handle.is_finished())
    }
}

impl AttachmentService {
    /// Cancel stalled downloads, backfill the freed slots, re-arm while busy
    pub async fn watchdog_tick(&self, timeout: Duration) {
        if self.is_stopped() {
            return;
        }
        debug!(?timeout, "AttachmentService::watchdog_tick: called");

        let (cancelled, abandoned) = {
            let mut registry = self.registry.lock().await;
            let mut cancelled = 0;
            let mut abandoned = Vec::new();
            for id in registry.stalled(timeout, Instant::now()) {
                let Some(mut request) = registry.remove(id) else {
                    continue;
                };
                warn!(
                    attachment_id = id,
                    silence = ?request.silence(Instant::now()),
                    "AttachmentService::watchdog_tick: cancelling stalled download"
                );
                request.in_progress = false;
                cancelled += 1;
                if let Some(request) = self.requeue_for_retry(request) {
                    abandoned.push(request);
                }
            }
            (cancelled, abandoned)
        };
        for request in &abandoned {
            self.abandon(request);
        }
        if cancelled > 0 {
            self.kick();
        }

        if self.connectivity.is_connected() {
            self.process_queue().await;
        }

        let busy = !self.registry.lock().await.is_empty();
        if busy && !self.is_stopped() {
            self.watchdog.arm(self.config.watchdog_interval(), timeout);
        }
    }
}
