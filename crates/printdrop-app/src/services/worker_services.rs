// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup wiring: configuration loading and construction of the backends the
// delivery engine runs against.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use printdrop_core::WorkerConfig;
use printdrop_core::error::{PrintdropError, Result};
use printdrop_delivery::{DeliveryEngine, LocalBucket, QueueAdmin, SqliteQueue};
use printdrop_print::CupsCli;
use tracing::{info, warn};

use super::data_dir;

const CONFIG_FILE: &str = "printdrop.json";

/// Overrides the configuration file location.
const CONFIG_ENV: &str = "PRINTDROP_CONFIG";

/// Everything the worker needs, built once at startup.
pub struct WorkerServices {
    pub engine: Arc<DeliveryEngine>,
    pub data_dir: PathBuf,
}

impl WorkerServices {
    /// Load and validate configuration, open the queue, and build the engine.
    pub async fn init() -> Result<Self> {
        let dir = data_dir::data_dir();
        let config_path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| dir.join(CONFIG_FILE));
        info!(data_dir = %dir.display(), config = %config_path.display(), "initialising worker services");

        let mut config = load_config(&config_path)?;
        config.queue_db_path = dir.join(&config.queue_db_path);
        config.bucket_root = dir.join(&config.bucket_root);
        config.validate()?;

        std::fs::create_dir_all(&config.temp_dir)?;
        std::fs::create_dir_all(&config.bucket_root)?;

        let queue = SqliteQueue::open(&config.queue_db_path, &config.queue_name)?;
        ensure_queue(&queue, queue.name()).await?;
        info!(queue = queue.name(), backlog = queue.depth().await?, "queue opened");

        let store = Arc::new(LocalBucket::new(config.bucket_root.clone()));
        info!(root = %store.root().display(), "object store ready");
        let subsystem = Arc::new(CupsCli::new(config.commands.clone()));
        let engine = DeliveryEngine::new(config, store, Arc::new(queue), subsystem);

        Ok(Self {
            engine: Arc::new(engine),
            data_dir: dir,
        })
    }
}

/// Read the JSON configuration; a missing file yields defaults.
fn load_config(path: &Path) -> Result<WorkerConfig> {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).map_err(|e| {
            PrintdropError::Config(format!("{}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no configuration file, using defaults");
            Ok(WorkerConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Look the queue up through the control plane, creating it on first start.
async fn ensure_queue(admin: &dyn QueueAdmin, name: &str) -> Result<()> {
    match admin.queue_url(name).await? {
        Some(url) => info!(queue = %url, "using existing queue"),
        None => {
            let url = admin.create_queue(name, &Default::default()).await?;
            info!(queue = %url, "created queue");
        }
    }
    Ok(())
}
