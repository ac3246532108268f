use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod checkin;
mod config;
mod db;
mod elapsed;
mod error;
mod geo;
mod location;
mod models;
mod report;

use crate::config::Config;
use crate::geo::Coordinate;
use crate::location::{FixFileProvider, LocationFix, StaticProvider};

#[derive(Parser)]
#[command(name = "weave-checkin")]
#[command(about = "GPS check-in and volunteer hours for WEAVE tasks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo volunteers, tasks and assignments
    Seed,
    /// Import tasks from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Assign a registered volunteer to a task
    Assign {
        #[arg(long)]
        task: Uuid,
        #[arg(long)]
        email: String,
    },
    /// List task assignments, newest first
    Assignments {
        #[arg(long)]
        email: Option<String>,
    },
    /// Great-circle distance between two points
    Distance {
        #[arg(long)]
        from: Coordinate,
        #[arg(long)]
        to: Coordinate,
    },
    /// Check whether a position is close enough to a target
    Verify {
        #[arg(long)]
        at: Coordinate,
        #[arg(long)]
        target: Coordinate,
        #[arg(long, value_parser = config::parse_max_distance)]
        max_distance: Option<f64>,
    },
    /// Time elapsed between two timestamps
    Elapsed {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: Option<String>,
    },
    /// Check in to an assignment at the current position
    CheckIn {
        #[arg(long)]
        assignment: Uuid,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// Check out of an in-progress assignment
    CheckOut {
        #[arg(long)]
        assignment: Uuid,
        #[command(flatten)]
        position: PositionArgs,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Generate a markdown volunteer hours report
    Report {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "volunteer-hours.md")]
        out: PathBuf,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .args(["at", "fix_file"])
        .required(true)
        .multiple(false)
))]
struct PositionArgs {
    /// Current position as "lat,lng"
    #[arg(long)]
    at: Option<Coordinate>,
    /// Reported accuracy of --at in meters
    #[arg(long, requires = "at")]
    accuracy: Option<f64>,
    /// JSON fix file written by a GPS daemon
    #[arg(long)]
    fix_file: Option<PathBuf>,
    #[arg(long, value_parser = config::parse_max_distance)]
    max_distance: Option<f64>,
}

impl PositionArgs {
    async fn acquire(&self, config: &Config) -> anyhow::Result<LocationFix> {
        let fix = match (&self.at, &self.fix_file) {
            (Some(at), _) => {
                location::acquire_location(
                    &StaticProvider::new(*at, self.accuracy),
                    config.location_timeout,
                )
                .await?
            }
            (None, Some(path)) => {
                location::acquire_location(&FixFileProvider::new(path), config.location_timeout)
                    .await?
            }
            (None, None) => {
                location::acquire_location(&StaticProvider::unavailable(), config.location_timeout)
                    .await?
            }
        };
        Ok(fix)
    }

    fn max_distance(&self, config: &Config) -> f64 {
        self.max_distance.unwrap_or(config.max_distance_meters)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = dotenv {
        tracing::debug!("no .env file loaded: {e}");
    }

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Distance { from, to } => {
            let meters = geo::distance_meters(from, to);
            println!("{} ({meters:.1} m)", geo::format_distance(meters));
        }
        Commands::Verify {
            at,
            target,
            max_distance,
        } => {
            let result = geo::verify_proximity(
                at,
                target,
                max_distance.unwrap_or(config.max_distance_meters),
            );
            println!("{}", result.message);
            if !result.is_within_range {
                std::process::exit(1);
            }
        }
        Commands::Elapsed { start, end } => {
            let start = elapsed::parse_timestamp(&start)?;
            let end = end.as_deref().map(elapsed::parse_timestamp).transpose()?;
            println!("{}", elapsed::time_spent(start, end).formatted);
        }
        command => run_with_database(command, &config).await?,
    }

    Ok(())
}

async fn run_with_database(command: Commands, config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.database()?).await?;

    match command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_tasks_csv(&pool, &csv).await?;
            println!("Inserted {inserted} tasks from {}.", csv.display());
        }
        Commands::Assign { task, email } => {
            let id = db::assign_volunteer(&pool, task, &email).await?;
            println!("Assignment {id} ready for {email}.");
        }
        Commands::Assignments { email } => {
            let assignments = db::fetch_assignments(&pool, email.as_deref()).await?;
            if assignments.is_empty() {
                println!("No assignments found.");
                return Ok(());
            }
            for assignment in assignments.iter() {
                let running = match (assignment.status, assignment.started_at) {
                    (models::AssignmentStatus::InProgress, Some(started)) => {
                        format!(" for {}", elapsed::time_spent(started, None).formatted)
                    }
                    _ => String::new(),
                };
                println!(
                    "- {} {} ({}) {} since {}{}",
                    assignment.id,
                    assignment.task_name,
                    assignment.volunteer_name,
                    assignment.status,
                    assignment.assigned_at.format("%Y-%m-%d"),
                    running
                );
            }
        }
        Commands::CheckIn {
            assignment,
            position,
        } => check_in(&pool, config, assignment, &position).await?,
        Commands::CheckOut {
            assignment,
            position,
            notes,
        } => check_out(&pool, config, assignment, &position, notes.as_deref()).await?,
        Commands::Report {
            email,
            since_days,
            out,
        } => {
            let since = report::cutoff(since_days, Utc::now())?;
            let assignments =
                db::fetch_completed_assignments(&pool, since, email.as_deref()).await?;
            let report = report::build_report(email.as_deref(), since, &assignments);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Distance { .. } | Commands::Verify { .. } | Commands::Elapsed { .. } => {
            unreachable!("handled without a database")
        }
    }

    Ok(())
}

async fn check_in(
    pool: &PgPool,
    config: &Config,
    id: Uuid,
    position: &PositionArgs,
) -> anyhow::Result<()> {
    let assignment = db::fetch_assignment(pool, id).await?;
    let fix = position.acquire(config).await?;
    let plan = checkin::plan_check_in(&assignment, &fix, position.max_distance(config), Utc::now())?;

    db::record_check_in(pool, id, &plan).await?;
    tracing::info!(
        assignment_id = %id,
        task_id = %assignment.task_id,
        at = %fix.coordinate,
        distance_m = plan.proximity.distance_meters,
        "checked in"
    );
    println!("{}", plan.proximity.message);
    println!("Checked in to {}.", assignment.task_name);
    Ok(())
}

async fn check_out(
    pool: &PgPool,
    config: &Config,
    id: Uuid,
    position: &PositionArgs,
    notes: Option<&str>,
) -> anyhow::Result<()> {
    let assignment = db::fetch_assignment(pool, id).await?;
    let fix = position.acquire(config).await?;
    let plan = checkin::plan_check_out(
        &assignment,
        &fix,
        position.max_distance(config),
        Utc::now(),
        notes,
    )?;

    db::record_check_out(pool, id, &plan).await?;
    tracing::info!(
        assignment_id = %id,
        minutes = plan.time_spent.total_minutes(),
        "checked out"
    );
    println!(
        "Checked out of {} after {}.",
        assignment.task_name, plan.time_spent.formatted
    );
    Ok(())
}
