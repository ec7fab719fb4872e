// ============================================================================
// lingua-db — CLI database inspection tool for the Lingua chat store
// ============================================================================
// Usage:
//   lingua-db stats                           Show database statistics
//   lingua-db list-sessions [--user USER]     List sessions (optionally filtered)
//   lingua-db transcript SESSION_ID           Print one session's messages
//   lingua-db export --format json            Export full database as JSON
//   lingua-db prune --older-than 90           Prune old sessions
// ============================================================================

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use lingua_core::ChatDb;

/// Lingua chat database inspection tool
#[derive(Parser)]
#[command(name = "lingua-db", version, about = "Inspect and manage the Lingua chat database")]
struct Cli {
    /// Path to the database file (default: ~/.lingua/chat.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database statistics (session and message counts)
    Stats,

    /// List sessions with optional user filter
    ListSessions {
        /// Filter by user id
        #[arg(long)]
        user: Option<String>,
    },

    /// Print the full transcript of one session
    Transcript {
        /// Session id
        session_id: i64,
    },

    /// Export full database contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Prune old sessions and their messages
    Prune {
        /// Delete sessions created more than this many days ago
        #[arg(long, default_value = "90")]
        older_than: i64,

        /// Show what would be pruned without actually deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = ChatDb::open(cli.db_path.as_deref())?;

    match cli.command {
        Commands::Stats => cmd_stats(&db),
        Commands::ListSessions { user } => cmd_list_sessions(&db, user),
        Commands::Transcript { session_id } => cmd_transcript(&db, session_id),
        Commands::Export { format } => cmd_export(&db, &format),
        Commands::Prune {
            older_than,
            dry_run,
        } => cmd_prune(&db, older_than, dry_run),
    }
}

fn cmd_stats(db: &ChatDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Lingua Chat Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!("Sessions: {}", stats.total_sessions);
    println!("Messages: {}", stats.total_messages);

    Ok(())
}

fn cmd_list_sessions(db: &ChatDb, user_filter: Option<String>) -> Result<()> {
    let sessions: Vec<_> = db
        .list_sessions()?
        .into_iter()
        .filter(|s| user_filter.as_deref().map_or(true, |u| s.user_id == u))
        .collect();

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<8}  {:<20}  {:<22}  {}",
        "ID", "AGENT", "USER", "CREATED", "NAME"
    );
    println!("{}", "-".repeat(90));

    for session in &sessions {
        let name = session.display_name.chars().take(30).collect::<String>();
        println!(
            "{:<8}  {:<8}  {:<20}  {:<22}  {}",
            session.id,
            session.agent_id,
            session.user_id.chars().take(20).collect::<String>(),
            format_timestamp(session.created_at),
            name
        );
    }

    println!("\nTotal: {} sessions", sessions.len());
    Ok(())
}

fn cmd_transcript(db: &ChatDb, session_id: i64) -> Result<()> {
    let session = db
        .get_session(session_id)?
        .ok_or_else(|| anyhow::anyhow!("Session not found: {}", session_id))?;

    println!(
        "=== Session {} — {} (agent {}, user {}) ===\n",
        session.id, session.display_name, session.agent_id, session.user_id
    );

    for message in db.session_messages(session_id)? {
        println!(
            "[{}] {}:\n{}\n",
            format_timestamp(message.created_at),
            message.role.as_str(),
            message.content
        );
    }

    Ok(())
}

fn cmd_export(db: &ChatDb, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let sessions = db.list_sessions()?;
    let stats = db.stats()?;

    let mut transcripts = Vec::new();
    for session in &sessions {
        transcripts.push(serde_json::json!({
            "session": session,
            "messages": db.session_messages(session.id)?,
        }));
    }

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "sessions": transcripts,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_prune(db: &ChatDb, older_than: i64, dry_run: bool) -> Result<()> {
    if dry_run {
        println!("=== DRY RUN — no data will be deleted ===\n");

        let cutoff = Utc::now().timestamp() - (older_than * 86400);
        let sessions = db.list_sessions()?;
        let pruneable: Vec<_> = sessions
            .iter()
            .filter(|s| s.created_at < cutoff)
            .collect();

        println!(
            "Would prune {} sessions older than {} days",
            pruneable.len(),
            older_than
        );
        for session in &pruneable {
            println!(
                "  - {} '{}' (created: {})",
                session.id,
                session.display_name,
                format_timestamp(session.created_at)
            );
        }
    } else {
        let pruned = db.prune_old_sessions(older_than)?;
        println!("Pruned {} sessions (older than {} days)", pruned, older_than);
    }

    Ok(())
}
