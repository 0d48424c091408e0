use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use probestat::config::Config;
use probestat::engine::Engine;
use probestat::export::metrics::TableMetrics;
use probestat::export::reader::{Reader, TableRead};
use probestat::probe::event::ProbeEvent;
use probestat::probe::parse::{frames, parse_event};

/// Event-pairing and accumulation engine for kernel probe telemetry.
#[derive(Parser)]
#[command(name = "probestat", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides the configured level.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// Feed a recorded event capture through the engine.
    Replay {
        /// Capture of length-prefixed event records.
        #[arg(short, long)]
        input: PathBuf,

        /// Threads delivering events concurrently.
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Write a raw dump of every table into this directory.
        #[arg(long)]
        dump_dir: Option<PathBuf>,

        /// Print the Prometheus text exposition when done.
        #[arg(long)]
        print_metrics: bool,
    },
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (input, workers, dump_dir, print_metrics) = match cli.command {
        Command::Version => {
            println!("probestat {}", version::full());
            return Ok(());
        }
        Command::Replay {
            input,
            workers,
            dump_dir,
            print_metrics,
        } => (input, workers, dump_dir, print_metrics),
    };

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;
    fmt().with_env_filter(filter).with_target(true).init();

    if workers == 0 {
        bail!("--workers must be at least 1");
    }

    info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting probestat",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(replay(cfg, &input, workers, dump_dir.as_deref(), print_metrics))
}

async fn replay(
    cfg: Config,
    input: &Path,
    workers: usize,
    dump_dir: Option<&Path>,
    print_metrics: bool,
) -> Result<()> {
    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading capture {}", input.display()))?;

    let engine = Arc::new(Engine::new(&cfg));
    let metrics = Arc::new(
        TableMetrics::new(&cfg.reader.metrics_namespace).context("creating table metrics")?,
    );
    let reader = Arc::new(Reader::new(
        Arc::clone(&engine),
        Arc::clone(&metrics),
        &cfg.reader,
    ));

    let lanes = decode(&engine, &data, workers);
    let events: usize = lanes.iter().map(Vec::len).sum();

    reader.start();
    let started = Instant::now();

    let handles: Vec<_> = lanes
        .into_iter()
        .map(|lane| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || {
                for event in &lane {
                    engine.dispatch(event);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.context("joining replay worker")?;
    }
    let elapsed = started.elapsed();

    reader.stop().await?;

    let reads = finish(&engine, &reader, dump_dir)?;
    for read in &reads {
        info!(
            probe = read.probe.as_str(),
            entries = read.entries,
            capacity = read.capacity,
            total = read.total,
            "table summary",
        );
    }

    info!(
        events,
        workers,
        tables = reads.len(),
        elapsed = ?elapsed,
        "replay complete",
    );

    if print_metrics {
        print!("{}", metrics.encode()?);
    }

    Ok(())
}

/// Dump the tables if asked, then take the final read, which picks up
/// everything delivered since the last tick. The read empties event-style
/// tables, so the dump comes first.
fn finish(engine: &Engine, reader: &Reader, dump_dir: Option<&Path>) -> Result<Vec<TableRead>> {
    if let Some(dir) = dump_dir {
        write_dumps(engine, dir)?;
    }
    Ok(reader.read_once())
}

/// Decode every record in `data` and split the events into one lane per
/// worker. Events of one process always land in the same lane, so their
/// begin and end events keep their recorded order.
fn decode(engine: &Engine, data: &[u8], workers: usize) -> Vec<Vec<ProbeEvent>> {
    let mut lanes: Vec<Vec<ProbeEvent>> = (0..workers).map(|_| Vec::new()).collect();

    for frame in frames(data) {
        let event = frame.and_then(parse_event);
        match event {
            Ok(event) => {
                let lane = event.header.pid as usize % workers;
                lanes[lane].push(event);
            }
            Err(e) => {
                engine.stats().record_malformed();
                debug!(error = %e, "skipping malformed record");
            }
        }
    }

    lanes
}

fn write_dumps(engine: &Engine, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating dump directory {}", dir.display()))?;

    for (probe, table) in engine.tables() {
        let path = dir.join(format!("{}.bin", probe.as_str()));
        let dump = table.dump();
        std::fs::write(&path, dump.to_bytes())
            .with_context(|| format!("writing table dump {}", path.display()))?;
        debug!(
            probe = probe.as_str(),
            entries = dump.entries,
            path = %path.display(),
            "table dumped",
        );
    }

    info!(dir = %dir.display(), "table dumps written");

    Ok(())
}

#[cfg(test)]
mod tests {
    use probestat::config::ReaderConfig;
    use probestat::export::layout::TableDump;
    use probestat::probe::event::{EventKind, Header, ModuleLoad, Payload};

    use super::*;

    #[test]
    fn test_dump_keeps_event_tables_before_final_read() {
        let engine = Arc::new(Engine::new(&Config::default()));
        let metrics = Arc::new(TableMetrics::new("test").unwrap());
        let reader = Reader::new(Arc::clone(&engine), metrics, &ReaderConfig::default());

        let mut name = [0u8; 56];
        name[..4].copy_from_slice(b"ext4");
        engine.dispatch(&ProbeEvent {
            header: Header {
                timestamp_ns: 1,
                pid: 77,
                tid: 77,
                kind: EventKind::ModuleLoad,
            },
            payload: Payload::ModuleLoad(ModuleLoad { name }),
        });

        let dir = tempfile::tempdir().unwrap();
        let reads = finish(&engine, &reader, Some(dir.path())).unwrap();

        let bytes = std::fs::read(dir.path().join("modload.bin")).unwrap();
        let dump = TableDump::from_bytes(&bytes).unwrap();
        assert_eq!(dump.entries, 1);

        let modload = reads
            .iter()
            .find(|r| r.probe.as_str() == "modload")
            .unwrap();
        assert_eq!(modload.delta, 1);
        assert!(engine.modload().unwrap().table().is_empty());
    }
}
