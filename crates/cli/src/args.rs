#![forbid(unsafe_code)]

use jobtrace_core::model::JobStatus;
use jobtrace_storage::DataStore;
use jobtrace_storage::config::parse_flag;
use std::path::PathBuf;

pub(crate) fn usage() -> &'static str {
    "jobtrace: store, stream and archive CI job traces\n\n\
USAGE:\n\
  jobtrace [--storage-dir DIR] [--artifacts-dir DIR] [--data-store cache|database] [--fips]\n\
           <COMMAND> [ARGS]\n\n\
COMMANDS:\n\
  create-job --project NAME [--status STATUS]\n\
  set-status --job ID --status STATUS\n\
  append     --job ID --offset N [--file PATH]   (reads stdin without --file)\n\
  status     --job ID\n\
  raw        --job ID [--last-lines N]\n\
  tail       --job ID [--limit BYTES]\n\
  html       --job ID [--last-lines N]\n\
  sections   --job ID\n\
  coverage   --job ID --regex PATTERN\n\
  finalize   --job ID [--crc32 N] [--bytesize N]\n\
  verify     --job ID\n\
  archive    --job ID\n\
  erase      --job ID\n\n\
NOTES:\n\
  - Defaults come from JOBTRACE_* environment variables.\n\
  - The CLI keeps new chunks in the database: the chunk cache does not outlive the process.\n\
  - Logs go to stderr, filtered by JOBTRACE_LOG or RUST_LOG.\n"
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    CreateJob { project: String, status: JobStatus },
    SetStatus { job: i64, status: JobStatus },
    Append { job: i64, offset: u64, file: Option<PathBuf> },
    Status { job: i64 },
    Raw { job: i64, last_lines: Option<usize> },
    Tail { job: i64, limit: Option<u64> },
    Html { job: i64, last_lines: Option<usize> },
    Sections { job: i64 },
    Coverage { job: i64, regex: String },
    Finalize { job: i64, crc32: Option<u32>, bytesize: Option<u64> },
    Verify { job: i64 },
    Archive { job: i64 },
    Erase { job: i64 },
}

#[derive(Debug)]
pub(crate) struct CliConfig {
    pub(crate) storage_dir: PathBuf,
    pub(crate) artifacts_dir: PathBuf,
    pub(crate) data_store: DataStore,
    pub(crate) fips: Option<bool>,
    pub(crate) command: Command,
}

pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Default)]
struct CommandArgs {
    job: Option<i64>,
    project: Option<String>,
    status: Option<JobStatus>,
    offset: Option<u64>,
    file: Option<PathBuf>,
    last_lines: Option<usize>,
    limit: Option<u64>,
    regex: Option<String>,
    crc32: Option<u32>,
    bytesize: Option<u64>,
}

pub(crate) fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut storage_dir: Option<PathBuf> = env_var("JOBTRACE_STORAGE_DIR").map(PathBuf::from);
    let mut artifacts_dir: Option<PathBuf> = env_var("JOBTRACE_ARTIFACTS_DIR").map(PathBuf::from);
    let mut data_store = env_var("JOBTRACE_DATA_STORE")
        .and_then(|v| DataStore::parse(&v))
        .unwrap_or(DataStore::Database);
    let mut fips: Option<bool> = None;
    let mut command_name: Option<String> = None;
    let mut parsed = CommandArgs::default();

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--artifacts-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--artifacts-dir requires DIR")?;
                artifacts_dir = Some(PathBuf::from(v));
            }
            "--data-store" => {
                i += 1;
                let v = args.get(i).ok_or("--data-store requires cache|database")?;
                data_store = DataStore::parse(v).ok_or("--data-store must be cache|database")?;
            }
            "--fips" => fips = Some(true),
            "--job" => {
                i += 1;
                let v = args.get(i).ok_or("--job requires ID")?;
                parsed.job = Some(v.parse().map_err(|_| "--job must be an integer")?);
            }
            "--project" => {
                i += 1;
                let v = args.get(i).ok_or("--project requires NAME")?;
                parsed.project = Some(v.to_string());
            }
            "--status" => {
                i += 1;
                let v = args.get(i).ok_or("--status requires STATUS")?;
                parsed.status = Some(JobStatus::parse(v).ok_or_else(|| {
                    format!("invalid --status {v} (expected created|pending|running|success|failed|canceled|skipped)")
                })?);
            }
            "--offset" => {
                i += 1;
                let v = args.get(i).ok_or("--offset requires N")?;
                parsed.offset = Some(v.parse().map_err(|_| "--offset must be an integer")?);
            }
            "--file" => {
                i += 1;
                let v = args.get(i).ok_or("--file requires PATH")?;
                parsed.file = Some(PathBuf::from(v));
            }
            "--last-lines" => {
                i += 1;
                let v = args.get(i).ok_or("--last-lines requires N")?;
                parsed.last_lines =
                    Some(v.parse().map_err(|_| "--last-lines must be an integer")?);
            }
            "--limit" => {
                i += 1;
                let v = args.get(i).ok_or("--limit requires BYTES")?;
                parsed.limit = Some(v.parse().map_err(|_| "--limit must be an integer (bytes)")?);
            }
            "--regex" => {
                i += 1;
                let v = args.get(i).ok_or("--regex requires PATTERN")?;
                parsed.regex = Some(v.to_string());
            }
            "--crc32" => {
                i += 1;
                let v = args.get(i).ok_or("--crc32 requires N")?;
                parsed.crc32 = Some(parse_crc32(v)?);
            }
            "--bytesize" => {
                i += 1;
                let v = args.get(i).ok_or("--bytesize requires N")?;
                parsed.bytesize = Some(v.parse().map_err(|_| "--bytesize must be an integer")?);
            }
            other if other.starts_with("--") => {
                return Err(format!("Unknown arg: {other}\n\n{}", usage()));
            }
            other => {
                if let Some(previous) = &command_name {
                    return Err(format!("Unexpected argument {other} after command {previous}"));
                }
                command_name = Some(other.to_string());
            }
        }
        i += 1;
    }

    if fips.is_none()
        && let Some(value) = env_var("JOBTRACE_FIPS")
    {
        fips = Some(parse_flag("JOBTRACE_FIPS", &value).map_err(|err| err.to_string())?);
    }

    let command_name = command_name.ok_or_else(|| format!("Missing command\n\n{}", usage()))?;
    let command = build_command(&command_name, parsed)?;
    let storage_dir = storage_dir.unwrap_or_else(|| PathBuf::from(".jobtrace"));
    let artifacts_dir = artifacts_dir.unwrap_or_else(|| storage_dir.join("artifacts"));

    Ok(CliConfig {
        storage_dir,
        artifacts_dir,
        data_store,
        fips,
        command,
    })
}

fn build_command(name: &str, args: CommandArgs) -> Result<Command, String> {
    let job = || args.job.ok_or(format!("{name} requires --job ID"));
    let command = match name {
        "create-job" => Command::CreateJob {
            project: args
                .project
                .clone()
                .ok_or("create-job requires --project NAME")?,
            status: args.status.unwrap_or(JobStatus::Running),
        },
        "set-status" => Command::SetStatus {
            job: job()?,
            status: args.status.ok_or("set-status requires --status STATUS")?,
        },
        "append" => Command::Append {
            job: job()?,
            offset: args.offset.ok_or("append requires --offset N")?,
            file: args.file.clone(),
        },
        "status" => Command::Status { job: job()? },
        "raw" => Command::Raw {
            job: job()?,
            last_lines: args.last_lines,
        },
        "tail" => Command::Tail {
            job: job()?,
            limit: args.limit,
        },
        "html" => Command::Html {
            job: job()?,
            last_lines: args.last_lines,
        },
        "sections" => Command::Sections { job: job()? },
        "coverage" => Command::Coverage {
            job: job()?,
            regex: args.regex.clone().ok_or("coverage requires --regex PATTERN")?,
        },
        "finalize" => Command::Finalize {
            job: job()?,
            crc32: args.crc32,
            bytesize: args.bytesize,
        },
        "verify" => Command::Verify { job: job()? },
        "archive" => Command::Archive { job: job()? },
        "erase" => Command::Erase { job: job()? },
        other => return Err(format!("Unknown command: {other}\n\n{}", usage())),
    };
    Ok(command)
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_crc32(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| format!("--crc32 must be a u32 (decimal or 0x hex), got {value}"))
}
