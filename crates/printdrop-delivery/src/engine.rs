// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The delivery engine: queue consumption loop and per-message pipeline.
//
// Lifecycle: Draining -> SteadyPoll -> ShuttingDown -> Stopped.
//
// On startup the backlog is drained with zero-wait receives, then the engine
// long-polls.  Every batch is processed concurrently and awaited in full before
// the next receive is issued.  A message is acknowledged only when it can
// never succeed (malformed, foreign, duplicate) or after it has been printed
// and recorded in the idempotency cache.  Everything else is left for
// redelivery once the invisibility window expires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use printdrop_core::WorkerConfig;
use printdrop_core::error::{PrintdropError, Result};
use printdrop_core::types::{ErrorClass, ObjectLocator, QueueMessage};
use printdrop_print::{DriverCatalog, PrintDispatcher, PrintSubsystem, PrinterResolver};

use crate::backoff::{ReceiveBackoff, classify_error, is_connectivity_error};
use crate::fetcher::JobFetcher;
use crate::idempotency::IdempotencyCache;
use crate::notification::{Notification, parse_notification};
use crate::queue::MessageQueue;
use crate::shutdown::ShutdownGate;
use crate::storage::ObjectStore;

/// Why a message was acknowledged without printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    ForeignNamespace,
    Duplicate,
}

/// Why a message was left on the queue for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainReason {
    Transfer,
    UnsupportedProtocol,
    Resolution,
    Dispatch,
    /// Printed and recorded, but the delete call failed.  The redelivery
    /// will be dropped as a duplicate while the cache entry lives.
    Acknowledgement,
}

/// Result of running one message through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Printed,
    Dropped(DropReason),
    Retained(RetainReason),
    /// Shutdown was requested before processing began.
    Skipped,
}

/// Explicit engine context shared by every in-flight job.
pub struct DeliveryEngine {
    config: WorkerConfig,
    queue: Arc<dyn MessageQueue>,
    fetcher: JobFetcher,
    resolver: PrinterResolver,
    dispatcher: PrintDispatcher,
    cache: Arc<IdempotencyCache>,
    shutdown: Arc<ShutdownGate>,
    backoff: ReceiveBackoff,
    connection_lost: AtomicBool,
}

impl DeliveryEngine {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        subsystem: Arc<dyn PrintSubsystem>,
    ) -> Self {
        let fetcher = JobFetcher::new(store, config.temp_dir.clone());
        let resolver = PrinterResolver::new(
            Arc::clone(&subsystem),
            DriverCatalog::new(config.drivers.clone()),
            config.settle_delay(),
            config.dry_run,
        );
        let dispatcher = PrintDispatcher::new(subsystem, config.dry_run);
        let cache = Arc::new(IdempotencyCache::new(config.retention()));
        let backoff = ReceiveBackoff::from_config(&config);

        Self {
            config,
            queue,
            fetcher,
            resolver,
            dispatcher,
            cache,
            shutdown: Arc::new(ShutdownGate::new()),
            backoff,
            connection_lost: AtomicBool::new(false),
        }
    }

    /// Handle used by signal handlers to request a graceful stop.
    pub fn shutdown_gate(&self) -> Arc<ShutdownGate> {
        Arc::clone(&self.shutdown)
    }

    pub fn cache(&self) -> Arc<IdempotencyCache> {
        Arc::clone(&self.cache)
    }

    /// Whether the last receive failed with a connectivity-class error.
    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::SeqCst)
    }

    // -- Consumption loop ----------------------------------------------------

    /// Run until a shutdown is requested and every in-flight job has finished.
    pub async fn run(self: Arc<Self>) {
        info!(
            queue = %self.config.queue_name,
            namespace = %self.config.namespace,
            dry_run = self.config.dry_run,
            retention = ?self.cache.retention(),
            "delivery engine started"
        );
        let sweeper = self
            .cache
            .spawn_sweeper(self.config.sweep_interval(), Arc::clone(&self.shutdown));

        self.drain_backlog().await;
        self.poll().await;

        info!(
            in_flight = self.shutdown.in_flight(),
            "shutdown requested, waiting for in-flight jobs"
        );
        self.shutdown.drained().await;
        if let Err(e) = sweeper.await {
            warn!(error = %e, "idempotency sweeper ended abnormally");
        }
        info!("delivery engine stopped");
    }

    /// Receive with zero wait until the queue comes back empty.
    async fn drain_backlog(self: &Arc<Self>) {
        let mut drained = 0usize;
        loop {
            let Some(received) = self.receive(Duration::ZERO).await else {
                return;
            };
            match received {
                Ok(messages) if messages.is_empty() => {
                    info!(drained, "startup backlog drained");
                    return;
                }
                Ok(messages) => {
                    drained += messages.len();
                    self.process_batch(messages).await;
                }
                Err(e) => {
                    // Leave the rest of the backlog to the long poll.
                    self.receive_failed(&e).await;
                    return;
                }
            }
        }
    }

    /// Long-poll until shutdown is requested.
    async fn poll(self: &Arc<Self>) {
        let wait = Duration::from_secs(self.config.receive.wait_secs);
        while let Some(received) = self.receive(wait).await {
            match received {
                Ok(messages) if messages.is_empty() => {}
                Ok(messages) => {
                    self.process_batch(messages).await;
                }
                Err(e) => self.receive_failed(&e).await,
            }
        }
    }

    /// One receive call, abandoned if a shutdown is requested meanwhile.
    /// Returns `None` once shutdown has been requested.
    async fn receive(&self, wait: Duration) -> Option<Result<Vec<QueueMessage>>> {
        if self.shutdown.is_requested() {
            return None;
        }
        let invisibility = Duration::from_secs(self.config.receive.invisibility_secs);
        let received = tokio::select! {
            _ = self.shutdown.requested() => return None,
            received = self.queue.receive(self.config.receive.max_batch, wait, invisibility) => received,
        };
        if received.is_ok() && self.connection_lost.swap(false, Ordering::SeqCst) {
            info!("queue connection restored");
        }
        Some(received)
    }

    async fn receive_failed(&self, err: &PrintdropError) {
        let delay = self.backoff.delay_for(err);
        if is_connectivity_error(err) {
            if !self.connection_lost.swap(true, Ordering::SeqCst) {
                error!(error = %err, retry_in = ?delay, "queue connection lost");
            } else {
                debug!(error = %err, "queue still unreachable");
            }
        } else {
            warn!(error = %err, retry_in = ?delay, "receive failed");
        }

        tokio::select! {
            _ = self.shutdown.requested() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Process every message of a batch concurrently and wait for all of them.
    pub async fn process_batch(self: &Arc<Self>, messages: Vec<QueueMessage>) -> Vec<Outcome> {
        debug!(count = messages.len(), "processing batch");
        let mut tasks = JoinSet::new();
        for message in messages {
            let engine = Arc::clone(self);
            tasks.spawn(async move { engine.process_message(message).await });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "message task failed"),
            }
        }
        outcomes
    }

    // -- Per-message pipeline ------------------------------------------------

    /// Run one message through the pipeline.  Never fails: every error ends
    /// as a log entry plus an acknowledge or leave decision.
    #[instrument(skip_all, fields(msg = %message.short_id()))]
    pub async fn process_message(&self, message: QueueMessage) -> Outcome {
        let _slot = self.shutdown.enter();

        if self.shutdown.is_requested() {
            debug!("shutdown pending, leaving message for redelivery");
            return Outcome::Skipped;
        }

        if message.approx_receive_count > 1 {
            warn!(
                receive_count = message.approx_receive_count,
                "RECEIVE COUNT {} for message",
                message.approx_receive_count
            );
        }
        if message.approx_receive_count >= self.config.poison_receive_threshold {
            error!(
                receive_count = message.approx_receive_count,
                "message keeps coming back, likely poison"
            );
        }

        let locator = match parse_notification(&message.body) {
            Notification::Valid(locator) => locator,
            Notification::Invalid(reason) => {
                let err = PrintdropError::MalformedNotification(reason);
                return self.drop_message(&message, err, DropReason::Malformed).await;
            }
        };

        if !locator.in_namespace(&self.config.namespace) {
            let err = PrintdropError::ForeignNamespace(locator.key);
            return self.drop_message(&message, err, DropReason::ForeignNamespace).await;
        }

        if self.cache.has(&locator.key) {
            let err = PrintdropError::DuplicateDelivery(locator.key);
            return self.drop_message(&message, err, DropReason::Duplicate).await;
        }

        self.deliver(&message, &locator).await
    }

    /// Fetch, resolve, print, mark, acknowledge.  The local copy is removed
    /// when the job record goes out of scope.
    async fn deliver(&self, message: &QueueMessage, locator: &ObjectLocator) -> Outcome {
        let job = match self.fetcher.fetch(locator).await {
            Ok(job) => job,
            Err(e) => return self.retain(e, RetainReason::Transfer),
        };

        let raw_destination = job
            .destination
            .as_deref()
            .or(self.config.default_printer.as_deref());
        let printer = match self.resolver.resolve(raw_destination).await {
            Ok(printer) => printer,
            Err(e @ PrintdropError::UnsupportedProtocol(_)) => {
                return self.retain(e, RetainReason::UnsupportedProtocol);
            }
            Err(e) => return self.retain(e, RetainReason::Resolution),
        };

        let device = printer.device.as_deref();
        if !self
            .dispatcher
            .print(device, job.local_path(), &job.options)
            .await
        {
            let err = PrintdropError::DispatchFailure {
                device: device.unwrap_or("<default>").to_owned(),
                output: format!("submission of {} rejected", job.local_path().display()),
            };
            return self.retain(err, RetainReason::Dispatch);
        }

        // Mark before delete: a crash in between costs a reprint, never a lost job.
        self.cache.mark_processed(&locator.key, Utc::now());
        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            return self.retain(e, RetainReason::Acknowledgement);
        }

        info!(
            key = %locator.key,
            device = device.unwrap_or("<default>"),
            dry_run = self.dispatcher.is_dry_run(),
            "job printed"
        );
        Outcome::Printed
    }

    async fn drop_message(
        &self,
        message: &QueueMessage,
        err: PrintdropError,
        reason: DropReason,
    ) -> Outcome {
        info!(reason = ?reason, detail = %err, "dropping message");
        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            warn!(error = %e, "failed to acknowledge dropped message");
        }
        Outcome::Dropped(reason)
    }

    fn retain(&self, err: PrintdropError, reason: RetainReason) -> Outcome {
        match classify_error(&err) {
            ErrorClass::Transient => {
                warn!(reason = ?reason, error = %err, "job failed, leaving message for redelivery");
            }
            ErrorClass::Permanent => {
                error!(
                    reason = ?reason,
                    error = %err,
                    "job cannot succeed until its destination is fixed, leaving message"
                );
            }
        }
        Outcome::Retained(reason)
    }
}
