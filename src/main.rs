use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use directive_engine::{
    api,
    client::EngineClient,
    config::EngineConfig,
    db::Database,
    mcp,
    models::{Directive, DirectiveStatus, PhaseBreakdown},
};

#[derive(Parser)]
#[command(name = "dxe")]
#[command(about = "Directive lifecycle progress and hierarchical scheduling engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "17020")]
        port: u16,

        /// Database file (defaults to the platform data directory)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Start MCP server via stdio
    Mcp {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Check that a running server is reachable
    Health,
    /// Show a directive
    Show { id: Uuid },
    /// List a parent's children in chain order
    Children { id: Uuid },
    /// Show a directive's progress
    Progress { id: Uuid },
    /// Show a directive's per-phase breakdown
    Breakdown { id: Uuid },
    /// Move a directive to a working status
    Transition {
        id: Uuid,
        /// active, in_progress, pending_approval or review
        status: String,
    },
    /// Mark a directive completed
    Complete { id: Uuid },
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "directive_engine=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // stdout carries the protocol
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

fn open_database(path: Option<PathBuf>) -> anyhow::Result<Database> {
    let db = match path {
        Some(path) => Database::open(path)?,
        None => Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

async fn serve(port: u16, db_path: Option<PathBuf>) -> anyhow::Result<()> {
    let db = open_database(db_path)?;
    let app = api::create_router(db);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Directive engine listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn print_directive(directive: &Directive) {
    println!("{} {}", directive.key, directive.title);
    println!("  type:     {}", directive.declared_type);
    println!("  status:   {}", directive.status);
    println!("  priority: {}", directive.priority.as_str());
    println!("  progress: {}%", directive.progress_cache);
    if let Some(parent_id) = directive.parent_id {
        println!("  parent:   {}", parent_id);
    }
    if let Some(depends_on) = directive.depends_on {
        println!("  after:    {}", depends_on);
    }
}

fn print_breakdown(breakdown: &PhaseBreakdown) {
    println!("profile: {}", breakdown.profile);
    for phase in &breakdown.phases {
        let mark = if phase.satisfied { "x" } else { " " };
        println!("  [{}] {:<22} {:>3}", mark, phase.name.as_str(), phase.weight);
    }
    println!("total: {}%", breakdown.total);
    for warning in &breakdown.warnings {
        println!("warning: {}", warning);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = matches!(cli.command, Some(Commands::Mcp { .. }));
    init_tracing(use_stderr);

    match cli.command {
        Some(Commands::Serve { port, db }) => serve(port, db).await?,
        None => serve(17020, None).await?,
        Some(Commands::Mcp { db }) => {
            let db = open_database(db)?;
            mcp::run_stdio_server(db, EngineConfig::from_env()).await?;
        }
        Some(Commands::Health) => {
            let health = EngineClient::from_env().health().await?;
            println!("{}", health["status"].as_str().unwrap_or("unknown"));
        }
        Some(Commands::Show { id }) => {
            let directive = EngineClient::from_env().get_directive(id).await?;
            print_directive(&directive);
        }
        Some(Commands::Children { id }) => {
            let children = EngineClient::from_env().children(id).await?;
            if children.is_empty() {
                println!("no children");
            }
            for (position, child) in children.iter().enumerate() {
                println!(
                    "{:>2}. {:<24} {:<16} {:>3}%",
                    position + 1,
                    child.key,
                    child.status.as_str(),
                    child.progress_cache
                );
            }
        }
        Some(Commands::Progress { id }) => {
            let report = EngineClient::from_env().progress(id).await?;
            println!(
                "{}% ({}){}",
                report.total,
                report.status,
                if report.can_complete { ", ready to complete" } else { "" }
            );
        }
        Some(Commands::Breakdown { id }) => {
            let breakdown = EngineClient::from_env().breakdown(id).await?;
            print_breakdown(&breakdown);
        }
        Some(Commands::Transition { id, status }) => {
            let target = DirectiveStatus::from_str(&status)
                .ok_or_else(|| anyhow::anyhow!("Unknown status '{}'", status))?;
            let directive = EngineClient::from_env().transition(id, target).await?;
            println!("{} is now {}", directive.key, directive.status);
        }
        Some(Commands::Complete { id }) => {
            let directive = EngineClient::from_env().complete(id).await?;
            println!("{} completed", directive.key);
        }
    }

    Ok(())
}
