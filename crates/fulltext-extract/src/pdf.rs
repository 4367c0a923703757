//! PDF conversion through an external program.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{ExtractError, Result};

/// Runs `program <pdf>` and takes its standard output as the text.
#[derive(Debug, Clone)]
pub struct PdfConverter {
    program: PathBuf,
    timeout: Duration,
}

impl PdfConverter {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub async fn convert(&self, pdf: &Path) -> Result<String> {
        let program = self.program.display().to_string();
        let child = Command::new(&self.program)
            .arg(pdf)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::ExternalProcess {
                program: program.clone(),
                status: "not started".to_string(),
                stderr: e.to_string(),
            })?;

        // Dropping the future on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractError::Timeout {
                what: format!("{program} {}", pdf.display()),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ExtractError::io(pdf, e))?;

        if !output.status.success() {
            return Err(ExtractError::ExternalProcess {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(pdf = %pdf.display(), bytes = output.stdout.len(), "PDF converted");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
