//! External-command probes.
//!
//! A probe receives its arguments as a JSON object on stdin and answers with
//! a `ProbeOutput` JSON document on stdout. Launch failures, non-zero exits
//! without usable output, and unparseable output all come back as a failed
//! `ProbeOutput`; the caller never sees a spawn error.

use crate::tools::traits::{ProbeOutput, ToolHandler};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Cap on raw output quoted back in an error message.
const MAX_QUOTED_OUTPUT: usize = 2000;

/// A probe backed by an external program.
#[derive(Debug, Clone)]
pub struct ScriptProbe {
    program: String,
    args: Vec<String>,
}

impl ScriptProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full command line split into words (program first).
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ToolHandler for ScriptProbe {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<ProbeOutput> {
        debug!("Running probe: {}", self.command_line());

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Ok(ProbeOutput::failed(
                    format!("Failed to launch probe '{}': {}", self.program, e),
                    Value::Null,
                ))
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(args)?;
            // A probe that ignores stdin may exit before reading it.
            let _ = stdin.write_all(&payload).await;
            drop(stdin);
        }

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return Ok(ProbeOutput::failed(
                    format!("Probe '{}' did not complete: {}", self.program, e),
                    Value::Null,
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        match parse_probe_output(&stdout) {
            Some(parsed) => Ok(parsed),
            None if !output.status.success() => Ok(ProbeOutput::failed(
                format!(
                    "Probe '{}' exited with {}: {}",
                    self.program,
                    output.status,
                    truncate(stderr.trim())
                ),
                Value::Null,
            )),
            None => Ok(ProbeOutput::failed(
                format!(
                    "Probe '{}' produced unparseable output: {}",
                    self.program,
                    truncate(stdout.trim())
                ),
                Value::Null,
            )),
        }
    }
}

/// Parse the probe document, tolerating log lines printed before it.
fn parse_probe_output(stdout: &str) -> Option<ProbeOutput> {
    let trimmed = stdout.trim();
    if let Ok(out) = serde_json::from_str::<ProbeOutput>(trimmed) {
        return Some(out);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_QUOTED_OUTPUT {
        return text.to_string();
    }
    let mut end = MAX_QUOTED_OUTPUT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}
