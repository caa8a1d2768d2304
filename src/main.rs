use clap::{Parser, Subcommand};
use gh_timeline::{
    FetchConfig, HttpEventFetcher, PgTimelineStore, TimelineEngine,
};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gh-timeline", about = "GitHub activity timeline aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the token's user and create it with its default feed
    Register,
    /// Subscribe a user to an additional event feed URL
    AddFeed { login: String, url: String },
    /// Run one ingestion pass over all of a user's feeds
    Fetch { login: String },
    /// Print the unarchived timeline grouped by category
    Timeline { login: String },
    /// Mark timeline items as read
    Archive { login: String, ids: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let database_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost:5432/gh_timeline".to_string());
    let token = env::var("GITHUB_TOKEN").unwrap_or_default();
    if token.is_empty() {
        warn!("GITHUB_TOKEN is not set; authenticated API calls will fail");
    }

    let config = FetchConfig::default();
    let store = Arc::new(PgTimelineStore::connect(&database_url).await?);
    let source = Arc::new(HttpEventFetcher::new(token, config.clone())?);
    let engine = TimelineEngine::new(store, source, config);

    match cli.command {
        Command::Register => {
            let user = engine.register_user().await?;
            info!(login = %user.login, name = %user.name, "registered");
        }
        Command::AddFeed { login, url } => {
            let feed = engine.add_feed(&login, &url).await?;
            info!(url = %feed.url, "subscribed");
        }
        Command::Fetch { login } => {
            let report = engine.run_ingestion(&login).await?;
            info!(
                accepted = report.accepted,
                duplicate = report.duplicate,
                self_authored = report.self_authored,
                malformed = report.malformed,
                "ingestion finished"
            );
            for failed in &report.failed_feeds {
                warn!(url = %failed.url, error = %failed.error, "feed failed");
            }
        }
        Command::Timeline { login } => {
            let timeline = engine.timeline(&login).await?;
            for (category, entries) in &timeline {
                println!("== {} ==", category);
                for entry in entries {
                    println!("[{}] {} ({})", entry.date, entry.html, entry.id);
                }
            }
        }
        Command::Archive { login, ids } => {
            let archived = engine.archive(&login, &ids).await?;
            info!(archived, "archive finished");
        }
    }

    Ok(())
}
