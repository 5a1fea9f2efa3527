// DbgMux - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. Configuration loading and logging initialisation (debug mode support)
// 3. Source registration (files, UDP ports, a captured child process)
// 4. The host loop: pump the executor on the main thread and print merged
//    lines whenever the throttled update fires, until every source has ended

use clap::Parser;
use dbgmux::app::console::{format_line, LineFormat};
use dbgmux::app::executor::Executor;
use dbgmux::app::host_executor::HostExecutor;
use dbgmux::app::log_sources::{LogSources, LogSourcesConfig};
use dbgmux::core::filter::LineFilter;
use dbgmux::core::model::Line;
use dbgmux::platform::config::{self, PlatformPaths};
use dbgmux::util::{constants, logging};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// DbgMux - merge live log output from files, UDP and child processes.
///
/// Lines from every source are interleaved by capture time and printed as
/// they arrive.
#[derive(Parser, Debug)]
#[command(name = "dbgmux", version, about)]
struct Cli {
    /// Files to tail. Glob patterns are expanded.
    files: Vec<String>,

    /// Receive datagrams on this UDP port (repeatable, 0 = any free port).
    #[arg(short = 'u', long = "udp", value_name = "PORT")]
    udp: Vec<u16>,

    /// Run a command and capture its stdout/stderr. Takes every remaining
    /// argument, so it must come last.
    #[arg(short = 'r', long = "run", num_args = 1.., allow_hyphen_values = true, value_name = "CMD")]
    run: Vec<String>,

    /// Print existing file content before following.
    #[arg(long = "from-start")]
    from_start: bool,

    /// Stop reading a file at its end instead of following it.
    #[arg(long = "no-follow")]
    no_follow: bool,

    /// Only print lines whose message matches this regex.
    #[arg(short = 'i', long = "include", value_name = "RE")]
    include: Option<String>,

    /// Drop lines whose message matches this regex.
    #[arg(short = 'x', long = "exclude", value_name = "RE")]
    exclude: Option<String>,

    /// Only print lines whose process name matches this regex.
    #[arg(short = 'p', long = "process", value_name = "RE")]
    process: Option<String>,

    /// Print one JSON object per line.
    #[arg(long = "json")]
    json: bool,

    /// Use this config file instead of the platform default.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // An explicit config file must load; the platform default may be absent.
    let (app_config, warnings) = match cli.config {
        Some(ref path) => match config::load_config_file(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("dbgmux: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => config::load_config(&PlatformPaths::resolve().config_dir),
    };

    logging::init(
        cli.debug,
        app_config.log_level.as_deref(),
        app_config.log_file.as_deref(),
    );
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }
    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "DbgMux starting"
    );

    let filter = match build_filter(&cli) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("dbgmux: {e}");
            return ExitCode::FAILURE;
        }
    };

    let executor = Arc::new(HostExecutor::new());
    let host: Arc<dyn Executor> = executor.clone();
    let mut sources = match LogSources::new(host, LogSourcesConfig::from(&app_config)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Cannot start capture threads");
            eprintln!("dbgmux: cannot start capture threads: {e}");
            return ExitCode::FAILURE;
        }
    };

    let published = Arc::new(AtomicBool::new(false));
    {
        let published = Arc::clone(&published);
        sources.subscribe_to_update(move || published.store(true, Ordering::SeqCst));
    }

    if add_sources(&cli, &sources) == 0 {
        eprintln!("dbgmux: nothing to capture (give FILES, --udp or --run)");
        return ExitCode::FAILURE;
    }

    let format = if cli.json {
        LineFormat::Json
    } else {
        LineFormat::Text
    };
    let idle_wake = Duration::from_millis(constants::HOST_IDLE_WAKE_MS);

    loop {
        if let Err(e) = executor.pump(idle_wake) {
            tracing::error!(error = %e, "Host loop failed");
            break;
        }
        if published.swap(false, Ordering::SeqCst) && !print_lines(sources.get_lines(), &filter, format) {
            break;
        }
        if sources.is_idle() {
            print_lines(sources.get_lines(), &filter, format);
            tracing::info!("All sources ended");
            break;
        }
    }

    sources.abort();
    ExitCode::SUCCESS
}

fn build_filter(cli: &Cli) -> Result<LineFilter, dbgmux::util::error::FilterError> {
    let mut filter = LineFilter::default();
    if let Some(ref pattern) = cli.include {
        filter.set_include(pattern)?;
    }
    if let Some(ref pattern) = cli.exclude {
        filter.set_exclude(pattern)?;
    }
    if let Some(ref pattern) = cli.process {
        filter.set_process(pattern)?;
    }
    Ok(filter)
}

/// Register every requested source; returns how many were added.
fn add_sources(cli: &Cli, sources: &LogSources) -> usize {
    let mut added = 0;

    for pattern in &cli.files {
        for path in expand_pattern(pattern) {
            match sources.add_file_tail(&path, cli.from_start, !cli.no_follow) {
                Ok(_) => added += 1,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "File not added");
                    eprintln!("dbgmux: {e}");
                }
            }
        }
    }

    for &port in &cli.udp {
        match sources.add_udp_reader(port) {
            Ok(id) => {
                added += 1;
                if let Some(address) = sources.source_info(id).and_then(|i| i.address) {
                    eprintln!("dbgmux: listening on udp {address}");
                }
            }
            Err(e) => eprintln!("dbgmux: {e}"),
        }
    }

    if let Some((program, args)) = cli.run.split_first() {
        match sources.add_process_reader(program, args) {
            Ok(_) => added += 1,
            Err(e) => eprintln!("dbgmux: {e}"),
        }
    }

    added
}

/// Expand a glob pattern; plain paths pass through unchanged.
fn expand_pattern(pattern: &str) -> Vec<PathBuf> {
    if !pattern.contains(['*', '?', '[']) {
        return vec![PathBuf::from(pattern)];
    }
    match glob::glob(pattern) {
        Ok(paths) => {
            let matched: Vec<PathBuf> = paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(error = %e, "Unreadable glob match skipped");
                        None
                    }
                })
                .filter(|path| path.is_file())
                .collect();
            if matched.is_empty() {
                eprintln!("dbgmux: no files match '{pattern}'");
            }
            matched
        }
        Err(e) => {
            eprintln!("dbgmux: invalid pattern '{pattern}': {e}");
            Vec::new()
        }
    }
}

/// Print lines passing `filter`. Returns false when stdout is gone.
fn print_lines(lines: Vec<Line>, filter: &LineFilter, format: LineFormat) -> bool {
    if lines.is_empty() {
        return true;
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in filter.apply(lines) {
        if let Err(e) = writeln!(out, "{}", format_line(&line, format)) {
            tracing::debug!(error = %e, "Stdout closed");
            return false;
        }
    }
    out.flush().is_ok()
}
