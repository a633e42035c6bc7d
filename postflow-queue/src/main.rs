//! postflow-queue - Schedule posts and inspect the queue
//!
//! Operator tool for the Postflow task queue and posting history.

use clap::{Parser, Subcommand};
use libpostflow::logging::{LogFormat, LoggingConfig};
use libpostflow::queue::{SqliteTaskQueue, Task, TaskQueue};
use libpostflow::scheduler::{parse_schedule, Scheduler};
use libpostflow::types::PostingHistory;
use libpostflow::{Config, Database, PostflowError, PostflowService, Result};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "postflow-queue")]
#[command(version)]
#[command(about = "Schedule posts and inspect the Postflow queue")]
#[command(long_about = "\
postflow-queue - Schedule posts and inspect the Postflow queue

DESCRIPTION:
    postflow-queue submits posts for delayed publishing, shows what is
    waiting in the queue, and reports per-account publishing outcomes.
    Publishing itself is done by the postflow-send daemon.

COMMANDS:
    schedule    Queue a post for publishing
    list        List pending tasks
    history     Show posting history for a post
    refresh     Run one token refresh sweep now
    unlink      Revoke and remove a linked account

USAGE EXAMPLES:
    # Publish post 42 as soon as the daemon polls
    postflow-queue schedule 42

    # Publish post 42 tomorrow afternoon
    postflow-queue schedule 42 --at \"tomorrow 3pm\"

    # Publish in two hours
    postflow-queue schedule 42 --at 2h

    # Pending tasks as JSON
    postflow-queue list --format json

    # Which accounts did post 42 reach?
    postflow-queue history 42

CONFIGURATION:
    Configuration file: ~/.config/postflow/config.toml

    Override with environment variables:
        POSTFLOW_CONFIG      - Path to config file
        POSTFLOW_DB_PATH     - Path to database file
        POSTFLOW_SECRET_KEY  - Token encryption key (refresh, unlink)

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Configuration error
    3 - Invalid input (bad post ID, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a post for publishing
    Schedule {
        /// Post ID to publish
        post_id: i64,

        /// When to publish (e.g. "2h", "tomorrow 3pm", RFC 3339); default now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },

    /// List pending tasks
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show posting history for a post
    History {
        /// Post ID
        post_id: i64,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one token refresh sweep now
    Refresh,

    /// Revoke access and remove a linked account
    Unlink {
        /// Owner of the account
        owner_id: i64,

        /// Account ID to remove
        account_id: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "error" };
    LoggingConfig::new(LogFormat::Text, level.to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Schedule { post_id, at } => {
            let db = Database::new(&config.database.path).await?;
            cmd_schedule(&db, &config, post_id, at.as_deref()).await?;
        }
        Commands::List { format } => {
            let format = parse_format(&format)?;
            let db = Database::new(&config.database.path).await?;
            cmd_list(&db, &config, format).await?;
        }
        Commands::History { post_id, format } => {
            let format = parse_format(&format)?;
            let db = Database::new(&config.database.path).await?;
            cmd_history(&db, post_id, format).await?;
        }
        Commands::Refresh => {
            let service = PostflowService::from_config(config).await?;
            cmd_refresh(&service).await?;
        }
        Commands::Unlink {
            owner_id,
            account_id,
        } => {
            let service = PostflowService::from_config(config).await?;
            service.accounts().remove_account(owner_id, account_id).await?;
            println!("Removed account {}", account_id);
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    match format {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(PostflowError::Validation(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            other
        ))),
    }
}

/// Queue a post for publishing
async fn cmd_schedule(db: &Database, config: &Config, post_id: i64, at: Option<&str>) -> Result<()> {
    if post_id <= 0 {
        return Err(PostflowError::Validation(format!(
            "Invalid post ID: {}",
            post_id
        )));
    }

    let target = match at {
        Some(input) => parse_schedule(input)?,
        None => chrono::Utc::now(),
    };

    if db.get_post(post_id).await?.is_none() {
        return Err(PostflowError::NotFound(format!("post {}", post_id)));
    }

    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(db.clone(), config.worker.max_attempts));
    let task = Scheduler::new(queue).schedule(post_id, target).await?;

    println!("{}", task.task_id);
    Ok(())
}

/// List pending tasks
async fn cmd_list(db: &Database, config: &Config, format: OutputFormat) -> Result<()> {
    let queue = SqliteTaskQueue::new(db.clone(), config.worker.max_attempts);
    let tasks = queue.list_pending().await?;

    match format {
        OutputFormat::Json => println!("{:#}", serde_json::json!(tasks)),
        OutputFormat::Text => output_tasks_text(&tasks),
    }

    Ok(())
}

fn output_tasks_text(tasks: &[Task]) {
    let now = chrono::Utc::now().timestamp();

    for task in tasks {
        println!(
            "{} | {} | {} | attempt {}/{} | {}",
            task.id,
            task.task_type,
            task.payload,
            task.attempts,
            task.max_attempts,
            format_time_until(now, task.run_at)
        );
    }
}

/// Format time until a task becomes due in human-readable form
fn format_time_until(now: i64, run_at: i64) -> String {
    let diff = run_at - now;

    if diff <= 0 {
        return "due".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

/// Show posting history for a post
async fn cmd_history(db: &Database, post_id: i64, format: OutputFormat) -> Result<()> {
    let history = db.list_posting_history(post_id).await?;

    match format {
        OutputFormat::Json => println!("{:#}", serde_json::json!(history)),
        OutputFormat::Text => output_history_text(&history),
    }

    Ok(())
}

fn output_history_text(history: &[PostingHistory]) {
    for entry in history {
        if entry.success {
            println!("{} | ok", entry.account_id);
        } else {
            println!("{} | failed | {}", entry.account_id, entry.error_message);
        }
    }
}

/// Run one token refresh sweep
async fn cmd_refresh(service: &PostflowService) -> Result<()> {
    let summary = service.refresher().sweep().await?;
    println!(
        "selected {} | refreshed {} | conflicts {} | failed {}",
        summary.selected, summary.refreshed, summary.conflicts, summary.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(1000, 900), "due");
        assert_eq!(format_time_until(1000, 1030), "in <1 minute");
        assert_eq!(format_time_until(0, 60), "in 1 minute");
        assert_eq!(format_time_until(0, 7200), "in 2 hours");
        assert_eq!(format_time_until(0, 86_400 * 3), "in 3 days");
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("json").unwrap(), OutputFormat::Json);
        assert!(matches!(
            parse_format("xml"),
            Err(PostflowError::Validation(_))
        ));
    }
}
