// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Worker configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PrintdropError, Result};
use crate::types::TransportProtocol;

/// Largest batch the queue hands out per receive.
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Longest server-side long-poll wait a receive may request.
pub const MAX_RECEIVE_WAIT_SECS: u64 = 20;

/// Longest invisibility window a receive may request (12 hours).
pub const MAX_INVISIBILITY_SECS: u64 = 12 * 60 * 60;

/// Persistent worker settings.
///
/// Every field has a default so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Destination namespace this worker serves (`clients/{namespace}/...`).
    pub namespace: String,
    /// Name of the queue this worker consumes.
    pub queue_name: String,
    /// SQLite database backing the local queue.
    pub queue_db_path: PathBuf,
    /// Root directory of the local object store (one sub-directory per container).
    pub bucket_root: PathBuf,
    /// Scratch directory for downloaded artifacts.
    pub temp_dir: PathBuf,
    /// Log print submissions and registrations instead of issuing them.
    pub dry_run: bool,
    /// Destination used when an object carries no `printer` metadata.
    pub default_printer: Option<String>,
    pub receive: ReceiveSettings,
    /// How long a delivered key suppresses redelivery.
    pub retention_secs: u64,
    /// Interval between idempotency cache sweeps.
    pub sweep_interval_secs: u64,
    /// Wait after registering a printer before it is used.
    pub settle_delay_ms: u64,
    /// Backoff after a connectivity-class receive failure.
    pub connection_backoff_secs: u64,
    /// Backoff after any other receive failure.
    pub error_backoff_secs: u64,
    /// Receive count at which a message is reported as a likely poison message.
    pub poison_receive_threshold: u32,
    pub drivers: DriverSettings,
    pub commands: CupsCommands,
}

/// Queue receive parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveSettings {
    pub max_batch: u32,
    /// Server-side long-poll wait in steady state.
    pub wait_secs: u64,
    /// How long a received message stays hidden from other consumers.
    pub invisibility_secs: u64,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            max_batch: MAX_RECEIVE_BATCH,
            wait_secs: 20,
            invisibility_secs: 300,
        }
    }
}

/// Where driver descriptor files are looked up when registering printers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Directory holding vendor driver files (`*.ppd`, `*.ppd.gz`).
    pub directory: Option<PathBuf>,
    /// File stem of the vendor driver for this site's printer model.
    pub model: Option<String>,
    /// Driver files that win over everything else for a given protocol.
    pub overrides: HashMap<TransportProtocol, PathBuf>,
}

/// Executables used by the CUPS command-line backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CupsCommands {
    pub lpstat: String,
    pub lpadmin: String,
    pub lp: String,
}

impl Default for CupsCommands {
    fn default() -> Self {
        Self {
            lpstat: "lpstat".into(),
            lpadmin: "lpadmin".into(),
            lp: "lp".into(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let temp_dir = std::env::temp_dir().join("printdrop");
        Self {
            namespace: String::new(),
            queue_name: "printdrop-jobs".into(),
            queue_db_path: PathBuf::from("queue.db"),
            bucket_root: PathBuf::from("bucket"),
            temp_dir,
            dry_run: false,
            default_printer: None,
            receive: ReceiveSettings::default(),
            retention_secs: 60 * 60,
            sweep_interval_secs: 5 * 60,
            settle_delay_ms: 3_000,
            connection_backoff_secs: 10,
            error_backoff_secs: 5,
            poison_receive_threshold: 5,
            drivers: DriverSettings::default(),
            commands: CupsCommands::default(),
        }
    }
}

impl WorkerConfig {
    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(PrintdropError::Config("namespace must be set".into()));
        }
        if self.namespace.contains('/') {
            return Err(PrintdropError::Config(format!(
                "namespace '{}' must be a single key segment",
                self.namespace
            )));
        }
        if self.receive.max_batch == 0 || self.receive.max_batch > MAX_RECEIVE_BATCH {
            return Err(PrintdropError::Config(format!(
                "receive.max_batch must be between 1 and {MAX_RECEIVE_BATCH}, got {}",
                self.receive.max_batch
            )));
        }
        if self.receive.wait_secs > MAX_RECEIVE_WAIT_SECS {
            return Err(PrintdropError::Config(format!(
                "receive.wait_secs must be at most {MAX_RECEIVE_WAIT_SECS}, got {}",
                self.receive.wait_secs
            )));
        }
        if self.receive.invisibility_secs == 0
            || self.receive.invisibility_secs > MAX_INVISIBILITY_SECS
        {
            return Err(PrintdropError::Config(format!(
                "receive.invisibility_secs must be between 1 and {MAX_INVISIBILITY_SECS}, got {}",
                self.receive.invisibility_secs
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(PrintdropError::Config("sweep_interval_secs must be positive".into()));
        }
        if self.retention_secs == 0 {
            return Err(PrintdropError::Config("retention_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn connection_backoff(&self) -> Duration {
        Duration::from_secs(self.connection_backoff_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}
