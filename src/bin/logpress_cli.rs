//! CLI front-end (§6): one subcommand per verb, thin enough that all real
//! logic stays in the library so embedders get the same behavior.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use logpress::config::{CompressOptions, CustomTypeSpec, FileConfig};
use logpress::engine;
use logpress::query::Predicate;
use logpress::semantic::SemanticType;
use logpress::LogPressError;

#[derive(Parser)]
#[command(name = "logpress", version, about = "Semantic log compression engine")]
struct Cli {
    /// Increase log verbosity; repeatable.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease log verbosity; repeatable.
    #[arg(short = 'q', long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress a plain-text log file into a `.lpr` container.
    Compress {
        input: PathBuf,
        output: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        min_support: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        max_line_bytes: Option<usize>,
        /// Brotli quality 0-11 (default 9).
        #[arg(long)]
        level: Option<u8>,
        #[arg(long)]
        no_entropy: bool,
        /// `NAME=PATTERN[:CONFIDENCE][:before]`, repeatable.
        #[arg(long = "custom-type")]
        custom_type: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Run a predicate against a container and print matching lines.
    Query {
        container: PathBuf,

        #[arg(long)]
        template_id: Option<u32>,
        #[arg(long, value_delimiter = ',')]
        severity: Vec<String>,
        /// RFC3339 timestamp or epoch milliseconds.
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        field: Option<String>,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Like `query`, but print only the match count.
    Count {
        container: PathBuf,

        #[arg(long)]
        template_id: Option<u32>,
        #[arg(long, value_delimiter = ',')]
        severity: Vec<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        field: Option<String>,
        #[arg(long)]
        value: Option<String>,
    },

    /// List the templates mined for a container.
    Inspect {
        container: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8, quiet: u8) {
    let level = match verbose as i16 - quiet as i16 {
        i16::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_time(s: &str) -> Result<i64, LogPressError> {
    if let Ok(millis) = s.parse::<i64>() {
        return Ok(millis);
    }
    logpress::column::parse_timestamp_millis(s)
        .ok_or_else(|| LogPressError::Usage(format!("unrecognized timestamp: {s}")))
}

fn parse_custom_type(spec: &str) -> Result<CustomTypeSpec, LogPressError> {
    let (name, rest) = spec
        .split_once('=')
        .ok_or_else(|| LogPressError::Usage(format!("--custom-type must be NAME=PATTERN[:CONFIDENCE][:before], got {spec}")))?;
    let mut parts = rest.split(':');
    let pattern = parts.next().unwrap_or("").to_string();
    let mut confidence = 0.9;
    let mut before_builtins = false;
    for part in parts {
        if part.eq_ignore_ascii_case("before") {
            before_builtins = true;
        } else if let Ok(c) = part.parse::<f64>() {
            confidence = c;
        }
    }
    Ok(CustomTypeSpec {
        name: name.to_string(),
        pattern,
        confidence,
        before_builtins,
    })
}

fn build_predicate(
    template_id: Option<u32>,
    severity: &[String],
    since: &Option<String>,
    until: &Option<String>,
    field: &Option<String>,
    value: &Option<String>,
) -> Result<Option<Predicate>, LogPressError> {
    let mut clauses = Vec::new();

    if let Some(id) = template_id {
        clauses.push(Predicate::TemplateId(id));
    }
    if !severity.is_empty() {
        clauses.push(Predicate::FieldIn {
            semantic_type: SemanticType::Severity,
            values: severity.to_vec(),
        });
    }
    if since.is_some() || until.is_some() {
        let since_ms = since.as_deref().map(parse_time).transpose()?.unwrap_or(i64::MIN);
        let until_ms = until.as_deref().map(parse_time).transpose()?.unwrap_or(i64::MAX);
        clauses.push(Predicate::TimestampRange { since_ms, until_ms });
    }
    if let (Some(field), Some(value)) = (field, value) {
        let semantic_type = parse_semantic_type(field)?;
        clauses.push(Predicate::FieldEquals {
            semantic_type,
            text: value.clone(),
        });
    }

    Ok(match clauses.len() {
        0 => None,
        1 => Some(clauses.into_iter().next().unwrap()),
        _ => Some(Predicate::And(clauses)),
    })
}

fn parse_semantic_type(name: &str) -> Result<SemanticType, LogPressError> {
    match name.to_ascii_lowercase().as_str() {
        "timestamp" => Ok(SemanticType::Timestamp),
        "ipv4" => Ok(SemanticType::Ipv4),
        "ipv6" => Ok(SemanticType::Ipv6),
        "severity" => Ok(SemanticType::Severity),
        "url" => Ok(SemanticType::Url),
        "path" => Ok(SemanticType::Path),
        "uuid" => Ok(SemanticType::Uuid),
        "hex_id" => Ok(SemanticType::HexId),
        "numeric_id" => Ok(SemanticType::NumericId),
        "duration" => Ok(SemanticType::Duration),
        "byte_count" => Ok(SemanticType::ByteCount),
        "user_id" => Ok(SemanticType::UserId),
        other => Err(LogPressError::Usage(format!("unknown field: {other}"))),
    }
}

fn run(cli: Cli) -> Result<(), LogPressError> {
    match cli.command {
        Command::Compress {
            input,
            output,
            config,
            min_support,
            threshold,
            max_line_bytes,
            level,
            no_entropy,
            custom_type,
            json,
        } => {
            let default_config_path = PathBuf::from("logpress.toml");
            let file_config = match config {
                Some(path) => FileConfig::load(&path)?,
                None => FileConfig::load_if_exists(&default_config_path)?,
            };
            let mut options = CompressOptions::default().merge_file(file_config);
            if let Some(v) = min_support {
                options.min_support = v;
            }
            if let Some(v) = threshold {
                options.threshold = v;
            }
            if let Some(v) = max_line_bytes {
                options.max_line_bytes = v;
            }
            if no_entropy {
                options.entropy_level = None;
            } else if let Some(v) = level {
                options.entropy_level = Some(v);
            }
            for spec in &custom_type {
                options.custom_types.push(parse_custom_type(spec)?);
            }

            let cancel = AtomicBool::new(false);
            let stats = engine::compress_file(&input, &output, &options, &cancel)?;

            if json {
                println!("{}", serde_json::to_string(&stats).unwrap());
            } else {
                println!(
                    "{} logs, {} templates ({} synthetic), {} -> {} bytes ({:.1}x), {}ms",
                    stats.log_count,
                    stats.template_count,
                    stats.synthetic_template_count,
                    stats.original_bytes,
                    stats.compressed_bytes,
                    stats.compression_ratio(),
                    stats.elapsed_ms
                );
            }
            Ok(())
        }

        Command::Query {
            container,
            template_id,
            severity,
            since,
            until,
            field,
            value,
            limit,
            json,
        } => {
            let handle = engine::open(&container)?;
            let predicate =
                build_predicate(template_id, &severity, &since, &until, &field, &value)?;
            let rows = match predicate {
                Some(p) => engine::query_lines(&handle, &p, limit)?,
                None => {
                    let mut all_ids: Vec<u64> = (0..handle.log_count).collect();
                    if let Some(n) = limit {
                        all_ids.truncate(n);
                    }
                    logpress::query::materialize(&handle, &all_ids)?
                }
            };
            if json {
                println!("{}", serde_json::to_string(&rows).unwrap());
            } else {
                for (log_id, text) in rows {
                    println!("{log_id}\t{text}");
                }
            }
            Ok(())
        }

        Command::Count {
            container,
            template_id,
            severity,
            since,
            until,
            field,
            value,
        } => {
            let handle = engine::open(&container)?;
            let predicate =
                build_predicate(template_id, &severity, &since, &until, &field, &value)?;
            let n = match predicate {
                Some(p) => engine::count(&handle, &p)?,
                None => handle.log_count as usize,
            };
            println!("{n}");
            Ok(())
        }

        Command::Inspect { container, json } => {
            let handle = engine::open(&container)?;
            let schemas = engine::extract_schemas(&handle);
            if json {
                let rendered: Vec<_> = schemas
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "template_id": s.template_id,
                            "pattern": s.pattern,
                            "match_count": s.match_count,
                            "is_synthetic": s.is_synthetic,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string(&rendered).unwrap());
            } else {
                for s in schemas {
                    println!(
                        "#{} ({} match{}{}): {}",
                        s.template_id,
                        s.match_count,
                        if s.match_count == 1 { "" } else { "es" },
                        if s.is_synthetic { ", synthetic" } else { "" },
                        s.pattern
                    );
                }
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}
