use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use guardline::adapters::AdapterRegistry;
use guardline::compiler::{self, CompileInput};
use guardline::config::Config;
use guardline::enforcement::EnforcementEngine;
use guardline::models::{Rule, TriggerType};
use guardline::repository::EnforcementStore;
use guardline::{api, db};

#[derive(Parser)]
#[command(name = "gline")]
#[command(about = "One safety policy, enforced across parental-control platforms")]
struct Cli {
    /// Database file (overrides GUARDLINE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Guardline API server
    Serve {
        /// Port for HTTP API (overrides GUARDLINE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Compile a rule file into an on-device policy bundle
    Compile {
        /// JSON file holding an array of rules
        #[arg(long)]
        rules: PathBuf,

        /// Child's birth date (YYYY-MM-DD)
        #[arg(long)]
        birth_date: NaiveDate,

        /// Policy version to stamp on the bundle
        #[arg(long)]
        version: i64,

        /// Generation timestamp (RFC 3339); defaults to now
        #[arg(long)]
        generated_at: Option<DateTime<Utc>>,
    },
    /// Print platform capability tables
    Capabilities {
        /// Only this platform
        #[arg(long)]
        platform: Option<String>,
    },
    /// Run one enforcement job for a child and wait for it to finish
    Enforce {
        #[arg(long)]
        child: Uuid,
    },
}

/// Initialize tracing with output to stderr (for commands that print
/// documents) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "guardline=debug,tower_http=debug".into()),
    );

    if use_stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_database(config: &Config) -> anyhow::Result<db::Database> {
    let db = match &config.db_path {
        Some(path) => db::Database::open(path.clone())?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

fn build_engine(config: &Config, db: &db::Database) -> anyhow::Result<EnforcementEngine> {
    let registry = Arc::new(AdapterRegistry::from_config(config)?);
    Ok(EnforcementEngine::from_config(
        registry,
        Arc::new(db.clone()),
        config,
    ))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Guardline server on port {}", config.port);

    let db = open_database(&config)?;
    let engine = build_engine(&config, &db)?;
    let app = api::create_router(api::AppState::new(db, engine));

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", config.port)).await?;
    tracing::info!("Guardline server listening on http://127.0.0.1:{}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = !matches!(cli.command, None | Some(Commands::Serve { .. }));
    init_tracing(use_stderr);

    let mut config = Config::from_env()?;
    if let Some(path) = cli.db {
        config.db_path = Some(path);
    }

    match cli.command {
        Some(Commands::Serve { port }) => {
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await?;
        }
        None => serve(config).await?,
        Some(Commands::Compile {
            rules,
            birth_date,
            version,
            generated_at,
        }) => {
            let content = std::fs::read_to_string(&rules)
                .with_context(|| format!("Failed to read {}", rules.display()))?;
            let rules: Vec<Rule> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse rules in {}", rules.display()))?;

            let compiled = compiler::compile(CompileInput {
                version,
                policy_id: Uuid::nil(),
                child_id: Uuid::nil(),
                birth_date,
                generated_at: generated_at.unwrap_or_else(Utc::now),
                rules: &rules,
            });
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
        Some(Commands::Capabilities { platform }) => {
            let registry = AdapterRegistry::from_config(&config)?;
            let adapters = match platform {
                Some(id) => vec![registry.require(&id)?],
                None => registry.list(),
            };

            for adapter in adapters {
                let info = adapter.info();
                println!("{} ({})", info.name, info.id);
                for cap in adapter.capabilities() {
                    println!(
                        "  {:<28} {:<8} {:<14} {}",
                        cap.category.as_str(),
                        cap.support.as_str(),
                        format!("{:?}", cap.direction),
                        cap.note
                    );
                }
            }
        }
        Some(Commands::Enforce { child }) => {
            let db = open_database(&config)?;
            let engine = build_engine(&config, &db)?;

            let job = engine.start(child, TriggerType::Manual)?.wait().await?;
            let report = db
                .job_report(job.id)?
                .ok_or_else(|| anyhow::anyhow!("Job {} disappeared", job.id))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
