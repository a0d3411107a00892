use crate::error::CaptureError;
use crate::parser::{parse_trace, ParsedTrace};
use crate::runner::{TraceSettings, TracerouteRunner};
use chrono::{SecondsFormat, Utc};
use hoptrace_model::TraceRun;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Captures per target.
    pub runs: u32,
    /// Pause between consecutive runs of the same target.
    pub interval: Duration,
    /// Targets traced in parallel.
    pub concurrency: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            runs: 3,
            interval: Duration::from_secs(5),
            concurrency: 1,
        }
    }
}

#[derive(Debug)]
pub struct TraceJobResult {
    pub target: String,
    /// 1-based.
    pub run: u32,
    pub timestamp_utc: String,
    pub outcome: Result<ParsedTrace, CaptureError>,
}

impl TraceJobResult {
    pub fn into_trace_run(self) -> Result<TraceRun, CaptureError> {
        let parsed = self.outcome?;
        Ok(TraceRun {
            destination: self.target,
            run: self.run,
            timestamp_utc: self.timestamp_utc,
            hops: parsed.hops,
        })
    }
}

/// Traces every target `session.runs` times.
///
/// Runs of one target are sequential with `session.interval` between them;
/// different targets may overlap. Results come back ordered by target, then
/// run, whatever the concurrency.
pub fn run_session<R>(
    targets: &[String],
    trace: &TraceSettings,
    session: &SessionSettings,
    runner: &R,
) -> Vec<TraceJobResult>
where
    R: TracerouteRunner + ?Sized,
{
    let workers = session.concurrency.clamp(1, targets.len().max(1));
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    let mut batches: Vec<(usize, Vec<TraceJobResult>)> = thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(target) = targets.get(index) else {
                    break;
                };
                let results = trace_target(target, trace, session, runner);
                if tx.send((index, results)).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    });

    batches.sort_by_key(|(index, _)| *index);
    batches
        .into_iter()
        .flat_map(|(_, results)| results)
        .collect()
}

fn trace_target<R>(
    target: &str,
    trace: &TraceSettings,
    session: &SessionSettings,
    runner: &R,
) -> Vec<TraceJobResult>
where
    R: TracerouteRunner + ?Sized,
{
    let mut results = Vec::with_capacity(session.runs as usize);

    for run in 1..=session.runs {
        if run > 1 && !session.interval.is_zero() {
            thread::sleep(session.interval);
        }

        let outcome = runner
            .capture(target, trace)
            .map(|text| parse_trace(&text));
        let timestamp_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        match &outcome {
            Ok(parsed) => info!(
                destination = target,
                run,
                total = session.runs,
                hops = parsed.hops.len(),
                "trace complete"
            ),
            Err(err) => warn!(destination = target, run, error = %err, "trace failed"),
        }

        results.push(TraceJobResult {
            target: target.to_string(),
            run,
            timestamp_utc,
            outcome,
        });
    }

    results
}
