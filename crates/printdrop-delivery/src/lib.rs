// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printdrop Delivery: the at-least-once consumer that turns storage events
// into print jobs.
//
// Provides:
// - `DeliveryEngine`: drain/long-poll consumption loop and per-message pipeline
// - `IdempotencyCache`: delivered-key cache with a background sweep
// - `ShutdownGate`: stop flag plus in-flight barrier
// - `JobFetcher`: artifact download with integrity check
// - `ObjectStore` / `MessageQueue` capabilities with local backends
//   (`LocalBucket`, `SqliteQueue`)

pub mod backoff;
pub mod engine;
pub mod fetcher;
pub mod idempotency;
pub mod notification;
pub mod queue;
pub mod shutdown;
pub mod storage;

pub use engine::{DeliveryEngine, DropReason, Outcome, RetainReason};
pub use fetcher::{JobFetcher, JobRecord};
pub use idempotency::IdempotencyCache;
pub use notification::{Notification, parse_notification};
pub use queue::{MessageQueue, QueueAdmin, SqliteQueue};
pub use shutdown::ShutdownGate;
pub use storage::{LocalBucket, ObjectStore, StoredObject};
