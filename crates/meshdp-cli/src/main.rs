//! Command-line interface for meshdp.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use meshdp_core::config::env_vars;
use meshdp_core::{EngineConfig, TieBreak};
use meshdp_protocol::{datapoint, ClusterCommand, TimeReply};
use meshdp_registry::{FingerprintRegistry, RegistryBuilder, RegistryError};
use serde_json::json;
use tracing::{error, info};

/// meshdp - vendor datapoint engine tooling.
#[derive(Parser, Debug)]
#[command(name = "meshdp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Engine config file (TOML). Falls back to MESHDP_CONFIG.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TieBreakArg {
    Fail,
    DeclarationOrder,
}

impl From<TieBreakArg> for TieBreak {
    fn from(arg: TieBreakArg) -> Self {
        match arg {
            TieBreakArg::Fail => TieBreak::Fail,
            TieBreakArg::DeclarationOrder => TieBreak::DeclarationOrder,
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Build the fingerprint registry from a manifest directory.
    Build {
        /// Directory of *.json profile manifests.
        manifests: PathBuf,
        /// Registry snapshot to write.
        #[arg(short, long, default_value = "registry.json")]
        output: PathBuf,
        /// Write the collision and repair report here.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Override the tie-break policy.
        #[arg(long, value_enum)]
        tie_break: Option<TieBreakArg>,
        /// Accept repaired fingerprints that collide with other profiles.
        #[arg(long)]
        lenient: bool,
    },
    /// Resolve a fingerprint against a registry snapshot.
    Lookup {
        /// Registry snapshot.
        #[arg(short, long, default_value = "registry.json")]
        registry: PathBuf,
        /// Manufacturer identifier.
        manufacturer: String,
        /// Model identifier.
        model: String,
    },
    /// Decode a custom-cluster payload given as hex.
    Decode {
        /// Payload bytes in hex.
        hex: String,
        /// Command id; the payload then starts with a sequence number.
        #[arg(long)]
        command: Option<String>,
    },
    /// Print the 10-byte time reply for a request id.
    TimeReply {
        /// Request id (decimal or 0x-prefixed hex).
        request_id: String,
        /// Instant to encode (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<String>,
        /// Local UTC offset in seconds; defaults to the hub's zone.
        #[arg(long, allow_hyphen_values = true)]
        utc_offset: Option<i32>,
    },
    /// Summarize a registry snapshot.
    Stats {
        /// Registry snapshot.
        #[arg(short, long, default_value = "registry.json")]
        registry: PathBuf,
    },
    /// Print the effective engine configuration.
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Build {
            manifests,
            output,
            report,
            tie_break,
            lenient,
        } => run_build(config, manifests, output, report, tie_break, lenient),
        Command::Lookup {
            registry,
            manufacturer,
            model,
        } => run_lookup(&registry, &manufacturer, &model),
        Command::Decode { hex, command } => run_decode(&hex, command.as_deref()),
        Command::TimeReply {
            request_id,
            at,
            utc_offset,
        } => run_time_reply(&request_id, at.as_deref(), utc_offset),
        Command::Stats { registry } => run_stats(&registry),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "meshdp=debug" } else { "meshdp=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::from_env_or_default().context("loading config")?,
    };
    Ok(config)
}

fn run_build(
    config: EngineConfig,
    manifests: PathBuf,
    output: PathBuf,
    report_path: Option<PathBuf>,
    tie_break: Option<TieBreakArg>,
    lenient: bool,
) -> Result<()> {
    let mut registry_config = config.registry;
    if let Some(tie_break) = tie_break {
        registry_config.tie_break = tie_break.into();
    }
    if lenient {
        registry_config.strict_repairs = false;
    }

    let mut builder = RegistryBuilder::new(registry_config);
    builder
        .load_dir(&manifests)
        .with_context(|| format!("loading manifests from {}", manifests.display()))?;

    let built = match builder.build() {
        Ok(built) => built,
        Err(RegistryError::Unresolved(conflicts)) => {
            for conflict in &conflicts {
                error!(fingerprint = %conflict.fingerprint(), "{}", conflict);
                eprintln!("conflict: {}", conflict);
            }
            bail!("{} unresolved fingerprint collision(s)", conflicts.len());
        }
        Err(e) => return Err(e).context("building registry"),
    };

    built
        .registry
        .save(&output)
        .with_context(|| format!("writing {}", output.display()))?;

    if let Some(path) = report_path {
        std::fs::write(&path, built.report.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    info!(
        output = %output.display(),
        profiles = built.report.profiles,
        fingerprints = built.report.resolved_fingerprints,
        "Registry written"
    );
    println!(
        "{} profiles, {} fingerprints ({} declared), {} collisions resolved, {} repairs",
        built.report.profiles,
        built.report.resolved_fingerprints,
        built.report.declared_fingerprints,
        built.report.collisions.len(),
        built.report.repairs.len()
    );
    Ok(())
}

fn load_registry(path: &Path) -> Result<FingerprintRegistry> {
    FingerprintRegistry::load(path).with_context(|| format!("loading registry {}", path.display()))
}

fn run_lookup(path: &Path, manufacturer: &str, model: &str) -> Result<()> {
    let registry = load_registry(path)?;
    let Some(hit) = registry.lookup(manufacturer, model) else {
        bail!("no profile for {}/{}", manufacturer, model);
    };
    let out = json!({
        "profile": hit.profile.id,
        "match": hit.kind,
        "category": hit.profile.category.name,
        "capabilities": hit.profile.capability_names(),
        "quirks": hit.profile.quirks,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn parse_u16(text: &str) -> Result<u16> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    value.with_context(|| format!("invalid number '{}'", text))
}

fn run_decode(hex_text: &str, command: Option<&str>) -> Result<()> {
    let cleaned: String = hex_text.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).context("payload is not valid hex")?;

    let out = match command {
        None => {
            let report = datapoint::decode_detailed(&bytes);
            json!({
                "datapoints": datapoints_json(&report.datapoints),
                "dropped": report.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })
        }
        Some(id) => {
            let id = parse_u16(id)?;
            let command_id = u8::try_from(id).context("command id must fit in one byte")?;
            match ClusterCommand::parse(command_id, &bytes)? {
                ClusterCommand::Datapoints {
                    origin,
                    command,
                    dropped,
                } => json!({
                    "kind": format!("{:?}", origin).to_lowercase(),
                    "seq": command.seq,
                    "datapoints": datapoints_json(&command.datapoints),
                    "dropped": dropped.iter().map(ToString::to_string).collect::<Vec<_>>(),
                }),
                ClusterCommand::TimeRequest(request) => json!({
                    "kind": "time_request",
                    "request_id": request.request_id,
                }),
                ClusterCommand::Unknown { command_id, payload } => json!({
                    "kind": "unknown",
                    "command_id": command_id,
                    "payload": hex::encode(payload),
                }),
            }
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn datapoints_json(datapoints: &[meshdp_protocol::Datapoint]) -> Vec<serde_json::Value> {
    datapoints
        .iter()
        .map(|dp| {
            json!({
                "dp": dp.id(),
                "type": dp.kind().to_string(),
                "value": dp.value(),
                "payload": hex::encode(dp.payload()),
            })
        })
        .collect()
}

fn run_time_reply(request_id: &str, at: Option<&str>, utc_offset: Option<i32>) -> Result<()> {
    let request_id = parse_u16(request_id)?;
    let reply = match (at, utc_offset) {
        (None, None) => TimeReply::now(request_id),
        (at, offset) => {
            let instant = match at {
                Some(text) => DateTime::parse_from_rfc3339(text)
                    .with_context(|| format!("invalid timestamp '{}'", text))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let offset = match offset {
                Some(secs) => FixedOffset::east_opt(secs)
                    .with_context(|| format!("invalid UTC offset {}", secs))?,
                None => *chrono::Local::now().offset(),
            };
            TimeReply::at(request_id, instant, offset)
        }
    };
    println!("{}", hex::encode(reply.encode()));
    Ok(())
}

fn run_stats(path: &Path) -> Result<()> {
    let registry = load_registry(path)?;
    let mut by_profile: BTreeMap<&str, usize> = BTreeMap::new();
    for profile in registry.entries().values() {
        *by_profile.entry(*profile).or_default() += 1;
    }
    let out = json!({
        "profiles": registry.profile_count(),
        "fingerprints": registry.fingerprint_count(),
        "prefix_len": registry.prefix_len(),
        "fallback": registry.fallback_profile(),
        "fingerprints_by_profile": by_profile,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("7").unwrap(), 7);
        assert_eq!(parse_u16("0x0007").unwrap(), 7);
        assert_eq!(parse_u16("0XEF00").unwrap(), 0xEF00);
        assert!(parse_u16("70000").is_err());
        assert!(parse_u16("0xZZ").is_err());
    }
}
