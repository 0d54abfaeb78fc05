use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use pinboard_core::split_tags;
use pinmark::app::{self, AppConfig, AppRuntime};
use pinmark::logging;
use pinmark::sync::model::{BookmarkDraft, LocalBookmark, format_timestamp};
use pinmark::sync::reconcile::ReconcileDelta;
use pinmark::sync::session::{ListingKey, PassOutcome};

#[derive(Parser, Debug)]
#[command(name = "pinmark", version, about = "Local cache and sync client for Pinboard bookmarks")]
struct Cli {
    /// Raise log verbosity (-d info, -dd debug, -ddd trace)
    #[arg(short = 'd', long = "debug", action = ArgAction::Count, global = true)]
    debug: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Verify and save an API token (username:TOKEN)
    Login { token: String },
    /// Remove the saved token and all cached bookmarks
    Logout,
    /// Re-fetch the first page and drop bookmarks deleted remotely
    Refresh {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Refresh, then keep loading older pages
    Sync {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Pull the most recent bookmarks
    Recent {
        #[arg(long, default_value_t = 20)]
        count: u32,
    },
    /// Print cached bookmarks, newest first
    List {
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Print cached tags with their counts
    Tags {
        #[arg(long)]
        refresh: bool,
    },
    Add {
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Space separated
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(long)]
        private: bool,
        #[arg(long)]
        unread: bool,
    },
    Edit {
        id: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        private: Option<bool>,
        #[arg(long)]
        unread: Option<bool>,
    },
    ToggleRead { id: String },
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete all cached data but keep the saved token
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.debug);
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Login { token } => {
            let token = app::login(&config, &token).await?;
            println!("logged in as {}", token.username());
            return Ok(());
        }
        Commands::Logout => {
            app::logout(&config).await?;
            println!("saved token and local data removed");
            return Ok(());
        }
        Commands::Purge => {
            app::purge_local_data(&config).await?;
            println!("local data removed");
            return Ok(());
        }
        command => {
            let runtime = AppRuntime::bootstrap(config).await?;
            run(&runtime, command).await
        }
    }
}

async fn run(runtime: &AppRuntime, command: Commands) -> anyhow::Result<()> {
    let session = runtime.session();
    match command {
        Commands::Refresh { tag } => {
            match session.refresh(&ListingKey::from_tag(tag)).await? {
                PassOutcome::Applied(delta) => print_delta(&delta),
                PassOutcome::Skipped | PassOutcome::Exhausted => println!("nothing to do"),
            }
        }
        Commands::Sync { tag, pages } => {
            let delta = runtime
                .sync_pages(&ListingKey::from_tag(tag), pages.max(1))
                .await?;
            print_delta(&delta);
        }
        Commands::Recent { count } => print_delta(&session.sync_recent(count).await?),
        Commands::List {
            unread,
            tag,
            limit,
            json,
        } => {
            let mut bookmarks = session.bookmarks(&ListingKey::from_tag(tag), unread).await?;
            if let Some(limit) = limit {
                bookmarks.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&bookmarks)?);
            } else {
                bookmarks.iter().for_each(print_bookmark);
            }
        }
        Commands::Tags { refresh } => {
            if refresh {
                session.refresh_tags().await?;
            }
            for tag in session.tags().await? {
                println!("{:>6}  {}", tag.count, tag.name);
            }
        }
        Commands::Add {
            url,
            title,
            note,
            tags,
            private,
            unread,
        } => {
            let draft = BookmarkDraft {
                url,
                title,
                note,
                tags: split_tags(&tags),
                is_private: private,
                unread,
            };
            print_bookmark(&session.add_bookmark(draft).await?);
        }
        Commands::Edit {
            id,
            url,
            title,
            note,
            tags,
            private,
            unread,
        } => {
            let existing = session
                .engine()
                .cache()
                .get_bookmark(&id)
                .await?
                .with_context(|| format!("no cached bookmark with id {id}"))?;
            let mut draft = BookmarkDraft::from_bookmark(&existing);
            if let Some(url) = url {
                draft.url = url;
            }
            if let Some(title) = title {
                draft.title = title;
            }
            if let Some(note) = note {
                draft.note = note;
            }
            if let Some(tags) = tags {
                draft.tags = split_tags(&tags);
            }
            if let Some(private) = private {
                draft.is_private = private;
            }
            if let Some(unread) = unread {
                draft.unread = unread;
            }
            print_bookmark(&session.update_bookmark(&id, draft).await?);
        }
        Commands::ToggleRead { id } => print_bookmark(&session.toggle_read(&id).await?),
        Commands::Delete { id, yes } => {
            if !yes && !confirm(&format!("delete bookmark {id}?"))? {
                println!("aborted");
                return Ok(());
            }
            session.delete_bookmark(&id).await?;
            println!("deleted {id}");
        }
        Commands::Login { .. } | Commands::Logout | Commands::Purge => {}
    }
    Ok(())
}

fn print_delta(delta: &ReconcileDelta) {
    println!(
        "fetched {} (inserted {}, updated {}, unchanged {}, deleted {})",
        delta.fetched, delta.inserted, delta.updated, delta.unchanged, delta.deleted
    );
}

fn print_bookmark(bookmark: &LocalBookmark) {
    let marker = if bookmark.unread { "*" } else { " " };
    println!(
        "{marker} {}  {}  {}",
        bookmark.remote_id,
        format_timestamp(bookmark.created_at),
        bookmark.title
    );
    println!("    {}", bookmark.url);
    if !bookmark.tags.is_empty() {
        println!("    [{}]", bookmark.tags.join(" "));
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
