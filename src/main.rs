//! Command line front end for the shortener core.
//!
//! # Usage
//!
//! ```bash
//! shortener shorten https://example.com/landing
//! shortener list --active --limit 20
//! shortener resolve 6f1c...e2 --client 10.0.0.1
//! shortener status 6f1c...e2 --full
//! shortener ban 6f1c...e2
//! shortener db check
//! ```
//!
//! # Environment Variables
//!
//! See [`shortener_core::config`]. A `.env` file in the working directory is
//! loaded first.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use std::process::ExitCode;
use uuid::Uuid;

use shortener_core::config::{self, mask_connection_string};
use shortener_core::prelude::*;
use shortener_core::telemetry;

/// Manage shortened urls and their click analytics.
#[derive(Parser)]
#[command(name = "shortener")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shorten a destination url
    Shorten {
        /// Absolute http(s) url
        url: String,
    },

    /// Show a single url
    Get { id: Uuid },

    /// List urls
    List {
        /// Only active urls
        #[arg(long)]
        active: bool,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Deactivate a url
    Ban { id: Uuid },

    /// Reactivate a url
    Unban { id: Uuid },

    /// Delete a url and its clicks
    Delete {
        id: Uuid,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Resolve a url as a redirect would, recording a click
    Resolve {
        id: Uuid,

        /// Client address recorded with the click
        #[arg(long)]
        client: String,
    },

    /// Show a url with its click count or click records
    Status {
        id: Uuid,

        /// List click records instead of the count
        #[arg(long)]
        full: bool,

        /// Only clicks from this client (with --full)
        #[arg(long)]
        client: Option<String>,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Check database connection
    Check,

    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load_from_env()?;
    telemetry::init_tracing(&config)?;
    config.print_summary();

    let session = PgSession::connect(&config)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {}",
                mask_connection_string(&config.database_url)
            )
        })?;

    if config.auto_migrate {
        session.migrate().await.context("Failed to apply migrations")?;
    }

    let service = UrlService::new(config.click_recording);

    match cli.command {
        Commands::Shorten { url } => {
            let url = service.shorten(&session, &url).await?;
            println!("{}", "✅ Url shortened".green().bold());
            print_url(&url);
        }
        Commands::Get { id } => {
            let url = service.urls().get(&session, &id).await?;
            print_url(&url);
        }
        Commands::List {
            active,
            offset,
            limit,
        } => {
            let filter = if active {
                Filter::new().eq("is_active", true)
            } else {
                Filter::new()
            };
            let page = Pagination::new(offset, limit);
            list_urls(&session, &service, &filter, page).await?;
        }
        Commands::Ban { id } => {
            let url = service.set_active(&session, id, false).await?;
            println!("{}", "🚫 Url banned".yellow().bold());
            print_url(&url);
        }
        Commands::Unban { id } => {
            let url = service.set_active(&session, id, true).await?;
            println!("{}", "✅ Url reactivated".green().bold());
            print_url(&url);
        }
        Commands::Delete { id, yes } => delete_url(&session, &service, id, yes).await?,
        Commands::Resolve { id, client } => {
            let destination = service.resolve_redirect(&session, &client, id).await?;
            println!("{} {}", "→".bright_black(), destination.bright_cyan());
        }
        Commands::Status {
            id,
            full,
            client,
            offset,
            limit,
        } => {
            let filter = match client {
                Some(client) => Filter::new().eq("client", client),
                None => Filter::new(),
            };
            let page = Pagination::new(offset, limit);
            let status = service.get_status(&session, id, full, filter, page).await?;
            print_status(&status);
        }
        Commands::Db { action } => handle_db_action(action, &session).await?,
    }

    Ok(())
}

/// Prints a failure, with a distinct message for each error kind.
fn report(e: &anyhow::Error) {
    let Some(app) = e.downcast_ref::<AppError>() else {
        eprintln!("{} {:#}", "❌ Error:".red().bold(), e);
        return;
    };

    let headline = match app {
        AppError::Validation { .. } => "❌ Invalid input:".red(),
        AppError::NotFound { .. } => "🔍 Not found:".yellow(),
        AppError::AlreadyExists { .. } => "⚠️  Already exists:".yellow(),
        AppError::UrlBanned { .. } => "🚫 Url is banned:".red(),
        AppError::Internal { .. } => "💥 Storage failure:".red(),
    };

    eprintln!("{} {}", headline.bold(), app);
    if !app.details().is_null() {
        eprintln!("  {}", app.details().to_string().bright_black());
    }
}

fn print_url(url: &Url) {
    let state = if url.is_active {
        "ACTIVE".green()
    } else {
        "BANNED".red()
    };

    println!("  ID:      {}", url.id.to_string().bright_white());
    println!("  Url:     {}", url.full_url.cyan());
    println!("  State:   {}", state);
    println!(
        "  Created: {}",
        url.created_at
            .format("%Y-%m-%d %H:%M")
            .to_string()
            .bright_black()
    );
}

async fn list_urls(
    session: &PgSession,
    service: &UrlService,
    filter: &Filter,
    page: Pagination,
) -> Result<()> {
    let urls = service.urls().filter(session, filter, page).await?;
    let total = service.urls().count(session, filter).await?;

    if urls.is_empty() {
        println!("{}", "  No urls found".yellow());
        return Ok(());
    }

    println!(
        "  {:<36} {:<8} {}",
        "ID".bright_white().bold(),
        "State".bright_white().bold(),
        "Url".bright_white().bold()
    );
    println!("  {}", "─".repeat(90).bright_black());

    for url in &urls {
        let state = if url.is_active {
            "ACTIVE".green()
        } else {
            "BANNED".red()
        };
        println!(
            "  {:<36} {:<8} {}",
            url.id.to_string().bright_black(),
            state,
            url.full_url.cyan()
        );
    }

    println!();
    println!(
        "  Showing {} of {}",
        urls.len().to_string().bright_white().bold(),
        total.to_string().bright_white().bold()
    );

    Ok(())
}

async fn delete_url(
    session: &PgSession,
    service: &UrlService,
    id: Uuid,
    skip_confirm: bool,
) -> Result<()> {
    let url = service.urls().get(session, &id).await?;
    print_url(&url);
    println!();

    if !skip_confirm {
        let confirmed = Confirm::new()
            .with_prompt("Delete this url and all of its clicks?")
            .default(false)
            .interact()?;

        if !confirmed {
            println!("{}", "❌ Cancelled".red());
            return Ok(());
        }
    }

    service.urls().delete(session, &id).await?;
    println!("{}", "✅ Url deleted".green().bold());

    Ok(())
}

fn print_status(status: &UrlStatus) {
    print_url(&status.url);

    match &status.clicks {
        ClickSummary::Count(count) => {
            println!("  Clicks:  {}", count.to_string().bright_green().bold());
        }
        ClickSummary::Items(clicks) => {
            println!();
            println!(
                "  {:<10} {:<20} {}",
                "ID".bright_white().bold(),
                "Clicked".bright_white().bold(),
                "Client".bright_white().bold()
            );
            println!("  {}", "─".repeat(60).bright_black());
            for click in clicks {
                println!(
                    "  {:<10} {:<20} {}",
                    click.id.to_string().bright_black(),
                    click.clicked_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    click.client.cyan()
                );
            }
        }
    }
}

async fn handle_db_action(action: DbAction, session: &PgSession) -> Result<()> {
    match action {
        DbAction::Check => {
            println!("{}", "🔍 Checking database connection...".bright_blue());
            session.ping().await?;
            println!("{}", "✅ Database connection OK".green().bold());
        }
        DbAction::Migrate => {
            session.migrate().await?;
            println!("{}", "✅ Migrations applied".green().bold());
        }
    }

    Ok(())
}
