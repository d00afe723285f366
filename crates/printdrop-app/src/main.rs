// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printdrop: bucket-to-printer delivery worker.
//
// Entry point. Initialises logging and backend services, runs the delivery
// engine, and turns SIGINT/SIGTERM into a graceful shutdown.

mod services;

use std::process::ExitCode;
use std::sync::Arc;

use printdrop_delivery::ShutdownGate;
use tracing::{error, info};

use services::worker_services::WorkerServices;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Printdrop starting");

    let services = match WorkerServices::init().await {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    info!(data_dir = %services.data_dir.display(), "worker services initialised");

    let engine = services.engine;
    tokio::spawn(watch_signals(engine.shutdown_gate()));

    match tokio::spawn(Arc::clone(&engine).run()).await {
        Ok(()) => {
            info!("Printdrop stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "delivery engine crashed");
            ExitCode::FAILURE
        }
    }
}

/// Request a graceful stop on the first SIGINT or SIGTERM.
async fn watch_signals(shutdown: Arc<ShutdownGate>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received"),
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                }
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM, only SIGINT will stop the worker");
                tokio::signal::ctrl_c().await.ok();
                info!("SIGINT received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received");
    }

    info!(
        in_flight = shutdown.in_flight(),
        "graceful shutdown requested, no new messages will be received"
    );
    shutdown.request();
}
