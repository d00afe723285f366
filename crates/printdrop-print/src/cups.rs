// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CUPS command-line backend for `PrintSubsystem`.
//
//   list     -> lpstat -v
//   register -> lpadmin -p NAME -E -v URI (-m MODEL | -P FILE)
//   submit   -> lp [-d NAME] [OPTIONS...] FILE
//
// Commands are spawned directly (no shell).  The raw options string is split
// into arguments with `split_options`, which honours quoting but otherwise
// leaves every token exactly as written.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use printdrop_core::config::CupsCommands;
use printdrop_core::error::{PrintdropError, Result};

use crate::subsystem::{DriverRef, PrintSubsystem};

/// `lpadmin -m` model for driverless IPP Everywhere queues.
const IPP_EVERYWHERE_MODEL: &str = "everywhere";

/// `lpadmin -m` model for the generic fallback driver shipped with CUPS.
const GENERIC_MODEL: &str = "drv:///sample.drv/generic.ppd";

/// `lpstat` message printed (with a non-zero exit) when nothing is configured.
const NO_DESTINATIONS: &str = "No destinations added";

/// Print subsystem driven through the CUPS command-line tools.
pub struct CupsCli {
    commands: CupsCommands,
}

impl CupsCli {
    pub fn new(commands: CupsCommands) -> Self {
        Self { commands }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        debug!(program, ?args, "running print subsystem command");
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PrintdropError::PrintSubsystem(format!("spawn {program}: {e}")))
    }
}

impl Default for CupsCli {
    fn default() -> Self {
        Self::new(CupsCommands::default())
    }
}

#[async_trait]
impl PrintSubsystem for CupsCli {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> Result<String> {
        let output = self.run(&self.commands.lpstat, &["-v".to_owned()]).await?;
        let text = captured(&output);
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        if text.contains(NO_DESTINATIONS) {
            return Ok(String::new());
        }
        Err(PrintdropError::PrintSubsystem(format!(
            "{} -v exited with {}: {text}",
            self.commands.lpstat, output.status
        )))
    }

    #[instrument(skip(self), fields(driver = %driver))]
    async fn register_device(
        &self,
        name: &str,
        device_uri: &str,
        driver: &DriverRef,
    ) -> Result<()> {
        let args = registration_args(name, device_uri, driver);
        let output = self.run(&self.commands.lpadmin, &args).await?;
        if !output.status.success() {
            let text = captured(&output);
            warn!(name, status = %output.status, output = %text, "printer registration failed");
            return Err(PrintdropError::PrintSubsystem(format!(
                "{} -p {name}: {text}",
                self.commands.lpadmin
            )));
        }
        info!(name, device_uri, "printer registered");
        Ok(())
    }

    #[instrument(skip(self, raw_options), fields(file = %file.display()))]
    async fn submit(&self, device: Option<&str>, file: &Path, raw_options: &str) -> Result<()> {
        let args = submission_args(device, file, raw_options);
        let output = self.run(&self.commands.lp, &args).await?;
        if !output.status.success() {
            return Err(PrintdropError::DispatchFailure {
                device: device.unwrap_or("<default>").to_owned(),
                output: format!("{} exited with {}: {}", self.commands.lp, output.status, captured(&output)),
            });
        }
        info!(
            device = device.unwrap_or("<default>"),
            response = %String::from_utf8_lossy(&output.stdout).trim(),
            "print job submitted"
        );
        Ok(())
    }
}

/// Arguments for `lpadmin` registering `name` at `device_uri`.
pub fn registration_args(name: &str, device_uri: &str, driver: &DriverRef) -> Vec<String> {
    let mut args = vec![
        "-p".to_owned(),
        name.to_owned(),
        "-E".to_owned(),
        "-v".to_owned(),
        device_uri.to_owned(),
    ];
    match driver {
        DriverRef::File(path) => {
            args.push("-P".to_owned());
            args.push(path.display().to_string());
        }
        DriverRef::IppEverywhere => {
            args.push("-m".to_owned());
            args.push(IPP_EVERYWHERE_MODEL.to_owned());
        }
        DriverRef::Generic => {
            args.push("-m".to_owned());
            args.push(GENERIC_MODEL.to_owned());
        }
    }
    args
}

/// Arguments for `lp` submitting `file`.
pub fn submission_args(device: Option<&str>, file: &Path, raw_options: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(device) = device {
        args.push("-d".to_owned());
        args.push(device.to_owned());
    }
    args.extend(split_options(raw_options));
    args.push(file.display().to_string());
    args
}

/// Split a raw options string into arguments.
///
/// Whitespace separates tokens except inside single or double quotes; the
/// quote characters themselves are dropped.  Nothing else is interpreted.
pub fn split_options(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn captured(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{} {}", stdout.trim(), stderr.trim()).trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn options_split_on_whitespace() {
        assert_eq!(
            split_options("-o media=A4  -n 2"),
            vec!["-o", "media=A4", "-n", "2"]
        );
        assert!(split_options("   ").is_empty());
    }

    #[test]
    fn options_keep_quoted_spans_together() {
        assert_eq!(
            split_options(r#"-t "Quarterly report" -o 'page-ranges=1-3'"#),
            vec!["-t", "Quarterly report", "-o", "page-ranges=1-3"]
        );
        assert_eq!(split_options(r#"-t """#), vec!["-t", ""]);
    }

    #[test]
    fn submission_args_put_file_last() {
        let args = submission_args(Some("_10_0_0_7"), Path::new("/tmp/a.pdf"), "-o fit-to-page");
        assert_eq!(args, vec!["-d", "_10_0_0_7", "-o", "fit-to-page", "/tmp/a.pdf"]);

        let args = submission_args(None, Path::new("/tmp/a.pdf"), "");
        assert_eq!(args, vec!["/tmp/a.pdf"]);
    }

    #[test]
    fn registration_args_per_driver() {
        let uri = "socket://10.0.0.7:9100";
        let file = registration_args("_10_0_0_7", uri, &DriverRef::File(PathBuf::from("/d/x.ppd.gz")));
        assert_eq!(&file[5..], ["-P", "/d/x.ppd.gz"]);

        let ipp = registration_args("_10_0_0_7", uri, &DriverRef::IppEverywhere);
        assert_eq!(&ipp[5..], ["-m", "everywhere"]);

        let generic = registration_args("_10_0_0_7", uri, &DriverRef::Generic);
        assert_eq!(&generic[..5], ["-p", "_10_0_0_7", "-E", "-v", uri]);
        assert_eq!(generic[6], GENERIC_MODEL);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_submission_captures_output() {
        let cups = CupsCli::new(CupsCommands {
            lp: "false".into(),
            ..Default::default()
        });
        let err = cups
            .submit(Some("Office"), Path::new("/nonexistent.pdf"), "")
            .await
            .expect_err("false always fails");
        assert!(matches!(err, PrintdropError::DispatchFailure { device, .. } if device == "Office"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_executable_is_subsystem_error() {
        let cups = CupsCli::new(CupsCommands {
            lpstat: "/nonexistent/printdrop-lpstat".into(),
            ..Default::default()
        });
        assert!(matches!(
            cups.list_devices().await,
            Err(PrintdropError::PrintSubsystem(_))
        ));
    }
}
