//! CLI entrypoint for the capcheck verification harness.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use capcheck_core::{Engine, EngineConfig, canonicalize};
use capcheck_harness::report::{ConsistencyReport, RunSummary};
use capcheck_harness::structured_log::{ArtifactIndex, LogEmitter, now_utc, validate_log_file};
use capcheck_harness::{DeviceProfile, TestRunner, exit_code, load_profiles};
use clap::{Parser, Subcommand, ValueEnum};

/// Exit code for invalid input or a harness failure.
const EXIT_USAGE: u8 = 2;

/// Capability query vs. ground-truth consistency tooling.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Capability/session consistency verification harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify device profiles and report every violation.
    Verify {
        /// Profile JSON file, or a directory of profile JSON files.
        #[arg(long)]
        profiles: PathBuf,
        /// Only verify these device ids (repeatable).
        #[arg(long = "device")]
        devices: Vec<String>,
        /// Engine configuration JSON file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output format on stdout.
        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
        /// Output report path (markdown; a JSON copy is written alongside).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Campaign name used in reports and trace ids.
        #[arg(long, default_value = "capcheck-verify")]
        campaign: String,
        /// Run id used in trace ids.
        #[arg(long, default_value = "local")]
        run_id: String,
        /// Optional fixed timestamp string for deterministic report generation.
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// List the combinations a verification run would check, without running it.
    Enumerate {
        /// Profile JSON file.
        #[arg(long)]
        profile: PathBuf,
        /// Engine configuration JSON file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output format on stdout.
        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// Log file path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            eprintln!("Loading engine config from {}", path.display());
            Ok(EngineConfig::from_file(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn run(command: Command) -> Result<u8, Box<dyn std::error::Error>> {
    match command {
        Command::Verify {
            profiles,
            devices,
            config,
            format,
            report,
            log,
            campaign,
            run_id,
            timestamp,
        } => {
            eprintln!("Loading profiles from {}", profiles.display());
            let mut loaded = load_profiles(&profiles)?;
            if !devices.is_empty() {
                if let Some(missing) = devices
                    .iter()
                    .find(|id| !loaded.iter().any(|p| &p.device_id == *id))
                {
                    return Err(format!("no profile for device '{missing}'").into());
                }
                loaded.retain(|p| devices.contains(&p.device_id));
            }
            let runner = TestRunner::new(&campaign, load_config(config.as_deref())?);

            let summaries = match &log {
                Some(log_path) => {
                    eprintln!("Writing structured log to {}", log_path.display());
                    let mut emitter = LogEmitter::to_file(log_path, &campaign, &run_id)?;
                    runner.run_logged(&loaded, &mut emitter)?
                }
                None => runner.run(&loaded),
            };
            let code = exit_code(&summaries);

            let report_doc = ConsistencyReport {
                title: String::from("capcheck Consistency Report"),
                campaign: campaign.clone(),
                timestamp: timestamp.unwrap_or_else(now_utc),
                summary: RunSummary::from_summaries(summaries),
            };
            let s = &report_doc.summary;
            eprintln!(
                "Verification complete: devices={}, passed={}, failed={}, errored={}, violations={}",
                s.total,
                s.passed,
                s.failed,
                s.errored,
                s.counts.total()
            );

            if let Some(report_path) = report {
                eprintln!("Writing report to {}", report_path.display());
                std::fs::write(&report_path, report_doc.to_markdown())?;
                let json_path = report_path.with_extension("json");
                std::fs::write(&json_path, report_doc.to_json())?;

                let mut index = ArtifactIndex::new(&run_id, &campaign);
                index.add_file(&report_path, "report_markdown")?;
                index.add_file(&json_path, "report_json")?;
                if let Some(log_path) = &log {
                    index.add_file(log_path, "structured_log")?;
                }
                let index_path = report_path.with_extension("artifacts.json");
                std::fs::write(&index_path, index.to_json()?)?;
            }

            match format {
                Format::Human => print!("{}", report_doc.to_markdown()),
                Format::Json => println!("{}", report_doc.to_json()),
            }
            Ok(u8::try_from(code).unwrap_or(EXIT_USAGE))
        }
        Command::Enumerate {
            profile,
            config,
            format,
        } => {
            let profile = DeviceProfile::from_file(&profile)?;
            let engine = Engine::new(load_config(config.as_deref())?);
            let plan = engine.plan(&profile.capabilities, &profile.templates)?;
            eprintln!(
                "Enumerated {}: considered={}, yielded={}, skipped={}",
                profile.device_id,
                plan.stats.considered,
                plan.stats.yielded,
                plan.stats.skipped()
            );

            match format {
                Format::Human => {
                    for combination in &plan.combinations {
                        let (key, _, _) = canonicalize(combination);
                        println!("{}  {combination}", key.fingerprint());
                    }
                }
                Format::Json => {
                    let rows: Vec<serde_json::Value> = plan
                        .combinations
                        .iter()
                        .map(|combination| {
                            let (key, enhanced, extended_range) = canonicalize(combination);
                            serde_json::json!({
                                "combination": combination.to_string(),
                                "feature_key": key.to_string(),
                                "fingerprint": key.fingerprint(),
                                "enhanced_codec": enhanced,
                                "extended_range": extended_range,
                            })
                        })
                        .collect();
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "device_id": profile.device_id,
                            "stats": plan.stats,
                            "combinations": rows,
                        }))?
                    );
                }
            }
            Ok(0)
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            eprintln!(
                "Validated {}: lines={}, errors={}",
                log.display(),
                lines,
                errors.len()
            );
            Ok(u8::from(!errors.is_empty()))
        }
    }
}
