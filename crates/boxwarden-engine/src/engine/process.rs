//! Engine process plumbing – command lines, direct spawn, output
//! forwarding and process-table access.

use crate::engine::elevation::ElevationRequest;
use crate::engine::layout::EngineLayout;
use crate::engine::sink::EventLog;
use crate::engine::types::*;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Command lines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `run -c <config> -D <root>`.
pub fn build_run_args(layout: &EngineLayout) -> Vec<String> {
    vec![
        "run".into(),
        "-c".into(),
        layout.config_path().to_string_lossy().into_owned(),
        "-D".into(),
        layout.root().to_string_lossy().into_owned(),
    ]
}

#[cfg(not(windows))]
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Elevated launch through the shell with output redirected to the live
/// log file.
#[cfg(windows)]
pub fn elevated_launch_request(layout: &EngineLayout) -> ElevationRequest {
    let args = format!(
        "/C \"\"{}\" run -c \"{}\" -D \"{}\" > \"{}\" 2>&1\"",
        layout.binary_path().display(),
        layout.config_path().display(),
        layout.root().display(),
        layout.log_path().display(),
    );
    ElevationRequest::new("cmd.exe", args).in_dir(layout.root().to_string_lossy())
}

#[cfg(not(windows))]
pub fn elevated_launch_request(layout: &EngineLayout) -> ElevationRequest {
    let args = format!(
        "run -c {} -D {} > {} 2>&1",
        sh_quote(&layout.config_path().to_string_lossy()),
        sh_quote(&layout.root().to_string_lossy()),
        sh_quote(&layout.log_path().to_string_lossy()),
    );
    ElevationRequest::new(sh_quote(&layout.binary_path().to_string_lossy()), args)
        .in_dir(layout.root().to_string_lossy())
}

/// Elevated termination of every process with the engine's image name.
#[cfg(windows)]
pub fn elevated_terminate_request(image_name: &str) -> ElevationRequest {
    ElevationRequest::new("cmd.exe", format!("/C taskkill /F /IM {}", image_name))
}

#[cfg(not(windows))]
pub fn elevated_terminate_request(image_name: &str) -> ElevationRequest {
    ElevationRequest::new("pkill", format!("-x {}", sh_quote(image_name)))
}

/// Create the logs directory and truncate the live log file.
pub async fn prepare_log_file(layout: &EngineLayout) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(layout.logs_dir())
        .await
        .map_err(|e| EngineError::io("Failed to create logs directory", &e))?;
    tokio::fs::write(layout.log_path(), b"")
        .await
        .map_err(|e| EngineError::io("Failed to clear log file", &e))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Direct spawn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the engine as an owned child. Both output streams are forwarded
/// into `events` line by line until the pipes close.
pub fn spawn_direct(
    layout: &EngineLayout,
    events: &EventLog,
) -> Result<tokio::process::Child, EngineError> {
    let mut child = tokio::process::Command::new(layout.binary_path())
        .args(build_run_args(layout))
        .current_dir(layout.root())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            EngineError::new(
                EngineErrorKind::ProcessSpawnFailed,
                format!("Failed to start {}: {}", layout.engine_name(), e),
            )
        })?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(
            stdout,
            format!("{} STDOUT", layout.engine_name()),
            events.clone(),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(
            stderr,
            format!("{} STDERR", layout.engine_name()),
            events.clone(),
        ));
    }
    Ok(child)
}

/// Relay non-empty lines as `[<tag>] <line>`.
pub async fn forward_output<R>(reader: R, tag: String, events: EventLog)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    events.relay(format!("[{}] {}", tag, line));
                }
            }
            Ok(None) => break,
            Err(e) => {
                events.warn(format!("Error reading {}: {}", tag, e));
                break;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Process table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Number of processes signalled.
    Terminated(usize),
    NotRunning,
}

/// Name-based view of the OS process table. Calls block.
pub trait ProcessProbe: Send + Sync {
    /// Whether any process with exactly this image name exists.
    fn is_running(&self, image_name: &str) -> bool;

    /// Unprivileged kill of every process with this image name. Nothing to
    /// kill is a success.
    fn terminate(&self, image_name: &str) -> Result<TerminateOutcome, EngineError>;
}

/// [`ProcessProbe`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl ProcessProbe for SysinfoProbe {
    fn is_running(&self, image_name: &str) -> bool {
        let mut sys = sysinfo::System::new();
        sys.refresh_processes();
        sys.processes().values().any(|p| p.name() == image_name)
    }

    fn terminate(&self, image_name: &str) -> Result<TerminateOutcome, EngineError> {
        let mut sys = sysinfo::System::new();
        sys.refresh_processes();

        let mut matched = 0usize;
        let mut killed = 0usize;
        for process in sys.processes_by_exact_name(image_name) {
            matched += 1;
            if process.kill() {
                killed += 1;
            }
        }

        if matched == 0 {
            return Ok(TerminateOutcome::NotRunning);
        }
        if killed == 0 {
            return Err(EngineError::new(
                EngineErrorKind::TerminateFailed,
                format!("Failed to kill {} ({} matching processes)", image_name, matched),
            ));
        }
        Ok(TerminateOutcome::Terminated(killed))
    }
}
