use crate::error::CaptureError;
use std::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TraceSettings {
    pub program: String,
    pub max_hops: u32,
    pub probes: u32,
    pub wait_secs: u32,
    /// Pass `-n` and skip reverse name lookups.
    pub numeric: bool,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            program: "traceroute".to_string(),
            max_hops: 30,
            probes: 3,
            wait_secs: 5,
            numeric: false,
        }
    }
}

/// Source of raw traceroute text for one destination.
pub trait TracerouteRunner: Send + Sync {
    fn capture(&self, target: &str, settings: &TraceSettings) -> Result<String, CaptureError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTracerouteRunner;

impl TracerouteRunner for SystemTracerouteRunner {
    fn capture(&self, target: &str, settings: &TraceSettings) -> Result<String, CaptureError> {
        capture_trace(target, settings)
    }
}

pub fn traceroute_command(target: &str, settings: &TraceSettings) -> Command {
    let mut command = Command::new(&settings.program);
    if settings.numeric {
        command.arg("-n");
    }
    command
        .arg("-q")
        .arg(settings.probes.to_string())
        .arg("-m")
        .arg(settings.max_hops.to_string())
        .arg("-w")
        .arg(settings.wait_secs.max(1).to_string())
        .arg(target);
    command
}

/// Runs traceroute to completion and returns its text.
///
/// When the tool exits non-zero, stdout and stderr are joined with a newline
/// and returned anyway so partial hops can still be parsed.
pub fn capture_trace(target: &str, settings: &TraceSettings) -> Result<String, CaptureError> {
    debug!(destination = target, program = %settings.program, "spawning traceroute");

    let output = traceroute_command(target, settings)
        .output()
        .map_err(|source| CaptureError::Spawn {
            program: settings.program.clone(),
            target: target.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        return Ok(stdout.into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    warn!(
        destination = target,
        status = %output.status,
        stderr = %stderr.trim(),
        "traceroute exited unsuccessfully; keeping partial output"
    );
    Ok(format!("{stdout}\n{stderr}"))
}
