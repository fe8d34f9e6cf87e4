//! CLI entrypoint for memgate drills and config inspection.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use memgate_admission::{AllocatorConfig, FailureMode};
use memgate_harness::{DrillSpec, LogFormat, init_logging, run_drill};

/// Escalation mode accepted on the command line. Unknown names are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FailureModeArg {
    Unwind,
    Cancel,
    #[value(alias = "log_only")]
    LogOnly,
}

impl From<FailureModeArg> for FailureMode {
    fn from(arg: FailureModeArg) -> Self {
        match arg {
            FailureModeArg::Unwind => Self::Unwind,
            FailureModeArg::Cancel => Self::Cancel,
            FailureModeArg::LogOnly => Self::LogOnly,
        }
    }
}

/// Memory admission tooling.
#[derive(Debug, Parser)]
#[command(name = "memgate")]
#[command(about = "Memory admission drills and configuration inspection")]
struct Cli {
    /// Log format on stderr: `compact` or `json`.
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,
    /// Enable debug-level admission logs.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run concurrent simulated queries against one process budget.
    Drill {
        /// Base config JSON; `MEMGATE_*` environment variables are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 4)]
        queries: usize,
        /// Process hard limit in bytes.
        #[arg(long, default_value_t = 64 << 20)]
        hard_limit: i64,
        /// Per-query soft limit in bytes (negative for unlimited).
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        soft_limit: i64,
        #[arg(long, default_value_t = 1 << 20)]
        request_bytes: u64,
        #[arg(long, default_value_t = 32)]
        requests: usize,
        /// Release half the held bytes every N admitted requests (0 never).
        #[arg(long, default_value_t = 4)]
        release_every: usize,
        /// Override the failure mode.
        #[arg(long, value_enum)]
        failure_mode: Option<FailureModeArg>,
        /// Override the hard-limit wait ceiling in milliseconds.
        #[arg(long)]
        wait_ms: Option<u64>,
        /// Override the fault-injection probability.
        #[arg(long)]
        fault_probability: Option<f64>,
        #[arg(long, default_value_t = 0x5EED)]
        seed: u64,
        /// Also write the admission records as JSON lines here.
        #[arg(long)]
        records: Option<PathBuf>,
        /// Output report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the resolved allocator configuration as JSON.
    Config {
        /// Config JSON to validate instead of the environment.
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AllocatorConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AllocatorConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => AllocatorConfig::from_env()?,
    };
    Ok(config)
}

fn emit(text: &str, output: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LogFormat::from_str_loose(&cli.log_format), cli.verbose);

    match cli.command {
        Command::Drill {
            config,
            queries,
            hard_limit,
            soft_limit,
            request_bytes,
            requests,
            release_every,
            failure_mode,
            wait_ms,
            fault_probability,
            seed,
            records,
            output,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(mode) = failure_mode {
                config = config.with_failure_mode(mode.into());
            }
            if let Some(ms) = wait_ms {
                config = config.with_wait_gc_max_ms(ms);
            }
            if let Some(p) = fault_probability {
                config = config.with_fault_probability(p);
            }
            let spec = DrillSpec {
                queries,
                hard_limit,
                soft_limit,
                request_bytes,
                requests_per_query: requests,
                release_every,
                seed,
            };

            let report = run_drill(spec, config)?;
            if let Some(path) = records {
                let mut out = Vec::new();
                for record in &report.records {
                    serde_json::to_writer(&mut out, record)?;
                    out.push(b'\n');
                }
                std::fs::write(&path, out)?;
                eprintln!("Wrote {} admission records to {}", report.records.len(), path.display());
            }
            eprintln!(
                "completed={} cancelled={} failed={} peak_process_bytes={}",
                report.completed, report.cancelled, report.failed, report.peak_process_bytes
            );
            emit(&serde_json::to_string_pretty(&report)?, output.as_ref())?;
        }
        Command::Config { json } => {
            let config = load_config(json.as_ref())?;
            config.validate()?;
            emit(&serde_json::to_string_pretty(&config)?, None)?;
        }
    }

    Ok(())
}
