use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use hoptrace_model::{HopRecord, TraceFile, TraceRun};
use hoptrace_trace::{
    parse_trace, run_session, stream_for_target, SessionSettings, SystemTracerouteRunner,
    TraceEvent, TraceSettings,
};
use serde::Serialize;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hoptrace", version, about = "Structured hops from traceroute output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse saved traceroute output into JSON hops
    Parse(ParseArgs),
    /// Trace targets repeatedly and write the tagged runs as JSON
    Trace(TraceArgs),
    /// Print hops of a single trace as they arrive
    Follow(FollowArgs),
}

#[derive(Args)]
struct ParseArgs {
    /// Capture to read; stdin when omitted
    #[arg(long = "in")]
    in_path: Option<PathBuf>,
}

#[derive(Args)]
struct ProbeArgs {
    #[arg(long, default_value = "traceroute")]
    program: String,

    #[arg(long, default_value_t = 30)]
    max_hops: u32,

    #[arg(long, default_value_t = 3)]
    probes: u32,

    #[arg(long, default_value_t = 5)]
    wait_secs: u32,

    /// Skip reverse name lookups (`traceroute -n`)
    #[arg(long)]
    numeric: bool,
}

impl From<&ProbeArgs> for TraceSettings {
    fn from(args: &ProbeArgs) -> Self {
        Self {
            program: args.program.clone(),
            max_hops: args.max_hops,
            probes: args.probes,
            wait_secs: args.wait_secs,
            numeric: args.numeric,
        }
    }
}

#[derive(Args)]
#[command(about = "Only trace networks you own or have permission to test.")]
struct TraceArgs {
    #[arg(long)]
    targets: Option<PathBuf>,

    #[arg(long = "target")]
    target_list: Vec<String>,

    /// JSON output path; stdout when omitted
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    runs: u32,

    #[arg(long, default_value_t = 5000)]
    interval_ms: u64,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    #[command(flatten)]
    probe: ProbeArgs,
}

#[derive(Args)]
struct FollowArgs {
    #[arg(long)]
    target: String,

    #[command(flatten)]
    probe: ProbeArgs,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Parse(args) => run_parse(args),
        Commands::Trace(args) => run_trace(args),
        Commands::Follow(args) => run_follow(args),
    }
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let text = match &args.in_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read capture {:?}", path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read capture from stdin")?;
            buf
        }
    };

    print_json(&parse_trace(&text))
}

fn run_trace(args: TraceArgs) -> Result<()> {
    let mut targets: Vec<String> = Vec::new();

    if let Some(path) = &args.targets {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read targets file {:?}", path))?;
        targets.extend(parse_targets(&contents));
    }

    targets.extend(args.target_list.iter().cloned());

    if targets.is_empty() {
        return Err(anyhow!("no targets provided (use --targets or --target)"));
    }

    let settings = TraceSettings::from(&args.probe);
    let session = SessionSettings {
        runs: args.runs,
        interval: Duration::from_millis(args.interval_ms),
        concurrency: args.concurrency,
    };

    info!(
        targets = targets.len(),
        runs = session.runs,
        "starting trace session"
    );

    let results = run_session(&targets, &settings, &session, &SystemTracerouteRunner);
    let attempted = results.len();

    let runs: Vec<TraceRun> = results
        .into_iter()
        .filter_map(|job| job.into_trace_run().ok())
        .collect();

    if attempted > 0 && runs.is_empty() {
        return Err(anyhow!("all {attempted} traces failed"));
    }

    let file = TraceFile { version: 1, runs };
    match &args.out {
        Some(path) => {
            write_json(path, &file)?;
            info!(path = ?path, runs = file.runs.len(), "wrote traces");
            Ok(())
        }
        None => print_json(&file),
    }
}

fn run_follow(args: FollowArgs) -> Result<()> {
    let settings = TraceSettings::from(&args.probe);
    let events = stream_for_target(&args.target, &settings)?;

    let mut stdout = std::io::stdout().lock();
    for event in events {
        match event {
            TraceEvent::Hop(hop) => writeln!(stdout, "{}", format_hop(&hop))?,
            TraceEvent::Error { message } => warn!(destination = %args.target, "{message}"),
            TraceEvent::Done { status } => {
                if status != 0 {
                    warn!(destination = %args.target, status, "traceroute exited unsuccessfully");
                }
            }
        }
    }

    Ok(())
}

fn parse_targets(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

fn format_hop(hop: &HopRecord) -> String {
    let mut line = format!("{:>2}  {}", hop.hop, hop.display_name());
    if let (Some(_), Some(address)) = (&hop.name, &hop.address) {
        line.push_str(&format!(" ({address})"));
    }
    for latency in &hop.latencies {
        match latency {
            Some(ms) => line.push_str(&format!("  {ms:.3} ms")),
            None => line.push_str("  *"),
        }
    }
    line
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {:?}", parent))?;
    }

    let tmp_path = temp_path(path);
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create temp file {:?}", tmp_path))?;
    file.write_all(data)
        .with_context(|| format!("failed to write temp file {:?}", tmp_path))?;
    file.sync_all()
        .with_context(|| format!("failed to sync temp file {:?}", tmp_path))?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow!("failed to replace output {:?}: {}", path, err));
    }

    // Persist the rename itself.
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("traces.json");
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    parent.join(format!(".{}.part-{}-{}", file_name, std::process::id(), stamp))
}
