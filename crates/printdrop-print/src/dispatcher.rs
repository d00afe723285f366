// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print submission for resolved devices.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::subsystem::PrintSubsystem;

/// Hands downloaded artifacts to the local print subsystem.
pub struct PrintDispatcher {
    subsystem: Arc<dyn PrintSubsystem>,
    dry_run: bool,
}

impl PrintDispatcher {
    pub fn new(subsystem: Arc<dyn PrintSubsystem>, dry_run: bool) -> Self {
        Self { subsystem, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Print `file` on `device` with `raw_options` passed through verbatim.
    ///
    /// Returns `false` when the subsystem rejects the job; the failure and
    /// its captured output are logged here.  In dry-run mode nothing is
    /// submitted and the result is always `true`.
    #[instrument(skip(self, raw_options), fields(file = %file.display()))]
    pub async fn print(&self, device: Option<&str>, file: &Path, raw_options: &str) -> bool {
        let device_label = device.unwrap_or("<default>");

        if self.dry_run {
            info!(
                device = device_label,
                options = raw_options,
                "[dry run] would submit print job"
            );
            return true;
        }

        match self.subsystem.submit(device, file, raw_options).await {
            Ok(()) => true,
            Err(e) => {
                error!(device = device_label, error = %e, "print submission failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use printdrop_core::error::{PrintdropError, Result};

    use crate::subsystem::DriverRef;

    struct FakeSubsystem {
        fail: bool,
        submissions: Mutex<Vec<(Option<String>, String)>>,
    }

    impl FakeSubsystem {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                submissions: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PrintSubsystem for FakeSubsystem {
        async fn list_devices(&self) -> Result<String> {
            Ok(String::new())
        }

        async fn register_device(&self, _: &str, _: &str, _: &DriverRef) -> Result<()> {
            Ok(())
        }

        async fn submit(&self, device: Option<&str>, _: &Path, raw_options: &str) -> Result<()> {
            self.submissions
                .lock()
                .unwrap()
                .push((device.map(str::to_owned), raw_options.to_owned()));
            if self.fail {
                return Err(PrintdropError::DispatchFailure {
                    device: device.unwrap_or_default().to_owned(),
                    output: "lp: The printer or class does not exist.".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn options_are_forwarded_verbatim() {
        let fake = FakeSubsystem::new(false);
        let dispatcher = PrintDispatcher::new(fake.clone(), false);
        assert!(
            dispatcher
                .print(Some("Office"), Path::new("/tmp/x.pdf"), "-o media=A4 -n 2")
                .await
        );
        assert_eq!(
            fake.submissions.lock().unwrap().as_slice(),
            &[(Some("Office".to_owned()), "-o media=A4 -n 2".to_owned())]
        );
    }

    #[tokio::test]
    async fn rejection_is_reported_as_false() {
        let dispatcher = PrintDispatcher::new(FakeSubsystem::new(true), false);
        assert!(!dispatcher.print(Some("Ghost"), Path::new("/tmp/x.pdf"), "").await);
    }

    #[tokio::test]
    async fn dry_run_never_submits() {
        let fake = FakeSubsystem::new(true);
        let dispatcher = PrintDispatcher::new(fake.clone(), true);
        assert!(dispatcher.print(None, Path::new("/tmp/x.pdf"), "").await);
        assert!(fake.submissions.lock().unwrap().is_empty());
    }
}
