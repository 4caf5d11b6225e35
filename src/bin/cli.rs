use sqlx::Row;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use task_authz::authz::{classify, AccessDecisionAggregator, GrantEvaluator, SqliteRoleAssignmentSource};
use task_authz::db::MIGRATOR;
use task_authz::models::{RoleAssignment, TaskState};
use task_authz::routes::engine::AuthorizeRequest;

#[derive(Parser, Debug)]
#[command(author, version, about = "task-authz admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Name a task transition
    Classify {
        #[arg(long)]
        initiator: Option<String>,
        #[arg(long)]
        old_assignee: Option<String>,
        #[arg(long)]
        new_assignee: Option<String>,
        #[arg(long, value_parser = parse_state)]
        old_state: TaskState,
        #[arg(long, value_parser = parse_state)]
        new_state: TaskState,
    },
    /// Evaluate an authorize request read from a JSON file
    Authorize {
        #[arg(long)]
        input: PathBuf,
    },
    /// Load role assignments (JSON array) into the role_assignments table
    SeedRoles {
        #[arg(long)]
        input: PathBuf,
    },
    /// Recompute the access log hash chain
    VerifyLog,
    /// Write the OpenAPI document to a file, or stdout
    DumpOpenapi {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_state(value: &str) -> Result<TaskState, String> {
    TaskState::parse(value).ok_or_else(|| format!("unknown task state: {value}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD, then the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            MIGRATOR.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            print_status(&pool).await?;
        }
        Commands::Classify {
            initiator,
            old_assignee,
            new_assignee,
            old_state,
            new_state,
        } => {
            let action = classify(
                initiator.as_deref(),
                old_assignee.as_deref(),
                new_assignee.as_deref(),
                old_state,
                new_state,
            );
            println!("{}", action.as_str());
        }
        Commands::Authorize { input } => {
            let raw = fs::read_to_string(&input).with_context(|| format!("failed to read {}", input.display()))?;
            let request: AuthorizeRequest =
                serde_json::from_str(&raw).with_context(|| format!("invalid authorize request in {}", input.display()))?;

            let grants = request.now.map(GrantEvaluator::at).unwrap_or_default();
            let decision = AccessDecisionAggregator::new(grants).decide(
                &request.role_assignments,
                &request.task,
                &request.profiles,
                &request.required,
            );
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::SeedRoles { input } => {
            let raw = fs::read_to_string(&input).with_context(|| format!("failed to read {}", input.display()))?;
            let assignments: Vec<RoleAssignment> =
                serde_json::from_str(&raw).with_context(|| format!("invalid role assignments in {}", input.display()))?;

            let pool = get_pool().await?;
            let source = SqliteRoleAssignmentSource::new(pool);
            for assignment in &assignments {
                let id = source.insert(assignment).await?;
                println!("{} {} {}", id, assignment.actor_id, assignment.role_name);
            }
            println!("Seeded {} role assignments", assignments.len());
        }
        Commands::VerifyLog => {
            let pool = get_pool().await?;
            match task_authz::events::verify_chain(&pool).await? {
                None => println!("Access log chain intact"),
                Some(seq) => anyhow::bail!("access log chain broken at seq {}", seq),
            }
        }
        Commands::DumpOpenapi { out } => {
            let doc = serde_json::to_string_pretty(&task_authz::docs::openapi_json())?;
            match out {
                Some(path) => {
                    fs::write(&path, doc).with_context(|| format!("failed to write {}", path.display()))?;
                    println!("wrote {}", path.display());
                }
                None => println!("{}", doc),
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = SqliteConnectOptions::from_str(&database_url)
        .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let has_table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if has_table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in MIGRATOR.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}
