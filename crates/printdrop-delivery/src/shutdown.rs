// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Graceful-shutdown gate: a "stop requested" flag plus a count of jobs in
// flight.  The consumption loop stops issuing receives once the flag is set
// and the worker exits when the count reaches zero.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::debug;

/// Cancellation flag combined with an in-flight job barrier.
#[derive(Debug, Default)]
pub struct ShutdownGate {
    requested: AtomicBool,
    in_flight: AtomicUsize,
    changed: Notify,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop.  Idempotent.
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            debug!(in_flight = self.in_flight(), "shutdown requested");
        }
        self.changed.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Jobs currently between `enter` and the drop of their slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Count a job as in flight until the returned slot is dropped.
    pub fn enter(&self) -> JobSlot<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        JobSlot { gate: self }
    }

    /// Resolves once a shutdown has been requested.
    pub async fn requested(&self) {
        self.wait_until(Self::is_requested).await;
    }

    /// Resolves once a shutdown has been requested and no job is in flight.
    pub async fn drained(&self) {
        self.wait_until(|gate| gate.is_requested() && gate.in_flight() == 0)
            .await;
    }

    async fn wait_until(&self, ready: impl Fn(&Self) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent notify is not lost.
            notified.as_mut().enable();
            if ready(self) {
                return;
            }
            notified.await;
        }
    }
}

/// Marks one job as in flight; dropping it releases the slot.
#[derive(Debug)]
pub struct JobSlot<'a> {
    gate: &'a ShutdownGate,
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        let remaining = self.gate.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.gate.is_requested() {
            debug!("last in-flight job finished after shutdown request");
        }
        self.gate.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn slots_track_in_flight_jobs() {
        let gate = ShutdownGate::new();
        let a = gate.enter();
        let b = gate.enter();
        assert_eq!(gate.in_flight(), 2);
        drop(a);
        assert_eq!(gate.in_flight(), 1);
        drop(b);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn drained_is_immediate_when_idle() {
        let gate = ShutdownGate::new();
        gate.request();
        tokio::time::timeout(Duration::from_secs(1), gate.drained())
            .await
            .expect("nothing in flight");
    }

    #[tokio::test]
    async fn drained_waits_for_last_slot() {
        let gate = Arc::new(ShutdownGate::new());
        let slot_gate = gate.clone();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let job = tokio::spawn(async move {
            let _slot = slot_gate.enter();
            release_rx.await.ok();
        });
        while gate.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        gate.request();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.drained().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        release_tx.send(()).ok();
        job.await.expect("job");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drained after release")
            .expect("waiter");
    }
}
