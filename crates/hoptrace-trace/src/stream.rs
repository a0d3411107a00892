use crate::error::CaptureError;
use crate::parser::parse_hop_line;
use crate::runner::{traceroute_command, TraceSettings};
use hoptrace_model::HopRecord;
use std::io::{BufRead, BufReader};
use std::process::Stdio;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Hop(HopRecord),
    Done { status: i32 },
    Error { message: String },
}

/// Spawns traceroute and reports hops on `sender` as lines arrive.
///
/// Stderr is joined into a single `Error` event; `Done` carries the exit
/// code, or -1 when the process was killed by a signal.
pub fn spawn_traceroute_stream(
    target: &str,
    settings: &TraceSettings,
    sender: Sender<TraceEvent>,
) -> Result<(), CaptureError> {
    debug!(destination = target, program = %settings.program, "streaming traceroute");

    let mut child = traceroute_command(target, settings)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CaptureError::Spawn {
            program: settings.program.clone(),
            target: target.to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or(CaptureError::MissingPipe("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(CaptureError::MissingPipe("stderr"))?;

    let tx_out = sender.clone();
    let out_reader = thread::spawn(move || forward_hops(BufReader::new(stdout), &tx_out));

    let tx_err = sender.clone();
    let err_reader = thread::spawn(move || {
        if let Some(message) = collect_stderr(BufReader::new(stderr)) {
            let _ = tx_err.send(TraceEvent::Error { message });
        }
    });

    thread::spawn(move || {
        let status = child.wait().ok();
        // Drain both pipes first so `Done` is always the last event.
        let _ = out_reader.join();
        let _ = err_reader.join();
        let code = status.and_then(|s| s.code()).unwrap_or(-1);
        let _ = sender.send(TraceEvent::Done { status: code });
    });

    Ok(())
}

pub fn stream_for_target(
    target: &str,
    settings: &TraceSettings,
) -> Result<mpsc::Receiver<TraceEvent>, CaptureError> {
    let (tx, rx) = mpsc::channel();
    spawn_traceroute_stream(target, settings, tx)?;
    Ok(rx)
}

/// Sends a `Hop` event for every hop line read. Returns how many were sent.
pub fn forward_hops<B: BufRead>(reader: B, sender: &Sender<TraceEvent>) -> usize {
    let mut sent = 0;
    for line in lossy_lines(reader) {
        if let Some(hop) = parse_hop_line(&line) {
            if sender.send(TraceEvent::Hop(hop)).is_err() {
                break;
            }
            sent += 1;
        }
    }
    sent
}

/// Lines decoded lossily, so a stray non-UTF-8 byte in a hostname neither
/// drops the line nor stops the reader.
fn lossy_lines<B: BufRead>(mut reader: B) -> impl Iterator<Item = String> {
    let mut buf = Vec::new();
    std::iter::from_fn(move || {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
        }
    })
}

fn collect_stderr<B: BufRead>(reader: B) -> Option<String> {
    let joined = lossy_lines(reader)
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}
