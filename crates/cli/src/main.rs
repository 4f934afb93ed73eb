#![forbid(unsafe_code)]

mod args;

use args::{CliConfig, Command, parse_args, usage};
use jobtrace_storage::ansi::EscapingRenderer;
use jobtrace_storage::{
    ArchiveStatus, CounterMetrics, JobCreateRequest, LocalArtifactStore, Trace, TraceConfig,
    TraceError, TraceStore,
};
use serde_json::{Value, json};
use std::io::{Read, Write};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = std::env::var("JOBTRACE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn unix_to_rfc3339(ts: u64) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn print_json(value: &Value) {
    println!("{value}");
}

fn print_text(text: &str) -> Result<(), TraceError> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn read_payload(file: Option<&std::path::Path>) -> Result<Vec<u8>, TraceError> {
    match file {
        Some(path) => Ok(std::fs::read(path)?),
        None => {
            let mut data = Vec::new();
            std::io::stdin().lock().read_to_end(&mut data)?;
            Ok(data)
        }
    }
}

fn trace_config(cfg: &CliConfig) -> Result<TraceConfig, TraceError> {
    let mut config = TraceConfig::from_env()?;
    config.default_data_store = cfg.data_store;
    if let Some(fips) = cfg.fips {
        config.fips_mode = fips;
    }
    Ok(config)
}

fn run(cfg: CliConfig) -> Result<(), TraceError> {
    let config = trace_config(&cfg)?;
    let metrics = Arc::new(CounterMetrics::new());
    let mut store = TraceStore::open(&cfg.storage_dir, config.clone(), metrics)?;
    let uploader = LocalArtifactStore::new(&cfg.artifacts_dir);
    let renderer = EscapingRenderer;

    match cfg.command {
        Command::CreateJob { project, status } => {
            let job = store.job_create(JobCreateRequest { project, status })?;
            print_json(&json!({
                "id": job.id,
                "project": job.project,
                "status": job.status.as_str(),
            }));
        }
        Command::SetStatus { job, status } => {
            let job = store.job_set_status(job, status)?;
            print_json(&json!({ "id": job.id, "status": job.status.as_str() }));
        }
        Command::Append { job, offset, file } => {
            let data = read_payload(file.as_deref())?;
            let size = Trace::new(&mut store, &uploader, job).append(&data, offset)?;
            print_json(&json!({ "job": job, "size": size, "accepted": size == offset + data.len() as u64 }));
        }
        Command::Status { job } => {
            let row = store.job_require(job)?;
            let metadata = store.trace_metadata_get(job)?;
            let pending = store.pending_state_get(job)?;
            let trace = Trace::new(&mut store, &uploader, job);
            let stream = trace.read_stream()?;
            print_json(&json!({
                "job": job,
                "project": row.project,
                "status": row.status.as_str(),
                "live": trace.live()?,
                "archived": trace.archived()?,
                "size": stream.size(),
                "pending_state": pending.map(|state| json!({
                    "crc32": state.crc32,
                    "trace_bytesize": state.trace_bytesize,
                })),
                "archival_attempts": metadata.archival_attempts,
                "checksum": metadata.checksum,
                "remote_checksum": metadata.remote_checksum,
            }));
        }
        Command::Raw { job, last_lines } => {
            let text = Trace::new(&mut store, &uploader, job).raw(last_lines)?;
            print_text(&text.unwrap_or_default())?;
        }
        Command::Tail { job, limit } => {
            let limit = limit.unwrap_or(config.limit_size);
            let text = Trace::new(&mut store, &uploader, job).tail(limit)?;
            print_text(&text.unwrap_or_default())?;
        }
        Command::Html { job, last_lines } => {
            let html = Trace::new(&mut store, &uploader, job).html(&renderer, last_lines)?;
            print_text(&html)?;
        }
        Command::Sections { job } => {
            let sections = Trace::new(&mut store, &uploader, job).extract_sections()?;
            let rows: Vec<Value> = sections
                .iter()
                .map(|section| {
                    json!({
                        "name": section.name,
                        "byte_start": section.byte_start,
                        "byte_end": section.byte_end,
                        "date_start": unix_to_rfc3339(section.date_start),
                        "date_end": unix_to_rfc3339(section.date_end),
                    })
                })
                .collect();
            print_json(&Value::Array(rows));
        }
        Command::Coverage { job, regex } => {
            let coverage = Trace::new(&mut store, &uploader, job).extract_coverage(&regex)?;
            print_json(&json!({ "job": job, "coverage": coverage }));
        }
        Command::Finalize {
            job,
            crc32,
            bytesize,
        } => {
            let report = Trace::new(&mut store, &uploader, job).finalize(crc32, bytesize)?;
            print_json(&json!(report));
        }
        Command::Verify { job } => {
            let report = Trace::new(&mut store, &uploader, job).verify()?;
            print_json(&json!(report));
        }
        Command::Archive { job } => {
            let status = Trace::new(&mut store, &uploader, job).archive(&mut rand::thread_rng())?;
            let value = match status {
                ArchiveStatus::Archived(artifact) => json!({
                    "job": job,
                    "archived": true,
                    "artifact_id": artifact.id,
                    "size": artifact.size,
                    "file_sha256": artifact.file_sha256,
                    "file": artifact.file.key,
                }),
                ArchiveStatus::OutOfAttempts { attempts } => json!({
                    "job": job,
                    "archived": false,
                    "reason": "out_of_attempts",
                    "attempts": attempts,
                }),
                ArchiveStatus::NotYet { attempts } => json!({
                    "job": job,
                    "archived": false,
                    "reason": "backoff",
                    "attempts": attempts,
                }),
            };
            print_json(&value);
        }
        Command::Erase { job } => {
            Trace::new(&mut store, &uploader, job).erase()?;
            print_json(&json!({ "job": job, "erased": true }));
        }
    }
    Ok(())
}

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }
    let cfg = match parse_args(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    init_logging();
    if let Err(err) = run(cfg) {
        tracing::debug!(error = ?err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(if err.is_contract_violation() { 2 } else { 1 });
    }
}
