use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use job_board_api::{FaultConfig, JobBoardApi, ReorderRequest, API_CONTRACT_VERSION};
use job_board_core::{JobPatch, JobQuery, JobStatus, NewJob};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "jb")]
#[command(about = "Job Board CLI")]
struct Cli {
    #[arg(long, env = "JOB_BOARD_DB", default_value = "./job_board.sqlite3")]
    db: PathBuf,

    #[command(flatten)]
    faults: FaultArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct FaultArgs {
    /// Probability that a reorder fails just before commit.
    #[arg(long, global = true, default_value_t = 0.0)]
    reorder_failure_rate: f64,
    /// Probability that a create, update, or delete fails just before commit.
    #[arg(long, global = true, default_value_t = 0.0)]
    mutation_failure_rate: f64,
    #[arg(long, global = true)]
    fault_seed: Option<u64>,
}

impl FaultArgs {
    fn config(&self) -> FaultConfig {
        FaultConfig {
            reorder_failure_rate: self.reorder_failure_rate,
            mutation_failure_rate: self.mutation_failure_rate,
            seed: self.fault_seed,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Job {
        #[command(subcommand)]
        command: Box<JobCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum JobCommand {
    Create(CreateArgs),
    List(ListArgs),
    Show(IdArgs),
    Update(UpdateArgs),
    Reorder(ReorderArgs),
    Delete(IdArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Active,
    Archived,
}

impl StatusArg {
    fn into_status(self) -> JobStatus {
        match self {
            Self::Active => JobStatus::Active,
            Self::Archived => JobStatus::Archived,
        }
    }
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    slug: Option<String>,
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Position to insert at; omitted appends to the end.
    #[arg(long, allow_negative_numbers = true)]
    order: Option<i64>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    page_size: Option<u32>,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    slug: Option<String>,
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    /// Replace all tags; repeat for several.
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, default_value_t = false, conflicts_with = "tags")]
    clear_tags: bool,
    #[arg(long, allow_negative_numbers = true)]
    order: Option<i64>,
}

#[derive(Debug, Args)]
struct ReorderArgs {
    #[arg(long)]
    id: String,
    #[arg(long, allow_negative_numbers = true)]
    from: i64,
    #[arg(long, allow_negative_numbers = true)]
    to: i64,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert(
                "api_contract_version".to_string(),
                Value::String(API_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "api_contract_version": API_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&with_contract_version(value))?;
    println!("{rendered}");
    Ok(())
}

fn emit<T: serde::Serialize>(value: &T) -> Result<()> {
    emit_json(serde_json::to_value(value).context("failed to serialize output")?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("job_board=info"));

    // stdout carries the JSON contract, so logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    tracing::debug!(db = %cli.db.display(), command = ?cli.command, "running jb command");

    let api = JobBoardApi::with_faults(cli.db, &cli.faults.config())?;
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Job { command } => run_job(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &JobBoardApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => emit(&api.migrate(args.dry_run)?),
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            let healthy = report.is_healthy();
            let mut value = serde_json::to_value(&report)
                .context("failed to serialize integrity report")?;
            if let Value::Object(object) = &mut value {
                object.insert("healthy".to_string(), Value::Bool(healthy));
            }
            emit_json(value)
        }
    }
}

fn run_job(command: JobCommand, api: &JobBoardApi) -> Result<()> {
    match command {
        JobCommand::Create(args) => {
            let job = api.create_job(NewJob {
                title: args.title,
                slug: args.slug,
                status: args.status.map(StatusArg::into_status),
                tags: args.tags,
                order: args.order,
            })?;
            emit(&job)
        }
        JobCommand::List(args) => {
            let page = api.list_jobs(&JobQuery {
                search: args.search,
                status: args.status.map(StatusArg::into_status),
                tags: args.tags,
                page: args.page,
                page_size: args.page_size,
            })?;
            emit(&page)
        }
        JobCommand::Show(args) => emit(&api.get_job(&args.id)?),
        JobCommand::Update(args) => {
            let tags = if args.clear_tags {
                Some(Vec::new())
            } else if args.tags.is_empty() {
                None
            } else {
                Some(args.tags)
            };
            let job = api.update_job(
                &args.id,
                JobPatch {
                    title: args.title,
                    slug: args.slug,
                    status: args.status.map(StatusArg::into_status),
                    tags,
                    order: args.order,
                },
            )?;
            emit(&job)
        }
        JobCommand::Reorder(args) => {
            let request = ReorderRequest {
                from_order: args.from,
                to_order: args.to,
            };
            let job = api.reorder_job(&args.id, request)?;
            emit(&job)
        }
        JobCommand::Delete(args) => emit(&api.delete_job(&args.id)?),
    }
}
