use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use studylite::{ChatId, Config, LogDeliver, Notifier, PhraseFilter, Store};

#[derive(Parser)]
#[command(name = "studylite")]
#[command(about = "SQLite-backed spaced-repetition scheduler")]
struct Args {
    /// Database file path, created if missing
    #[arg(short, long, default_value = "studylite.db")]
    db: PathBuf,

    /// Zero-score phrases introduced per day before new ones slip a day
    #[arg(long, default_value = "30")]
    new_per_day: usize,

    /// Due studies needed before a chat is notified
    #[arg(long, default_value = "9")]
    due_min_count: usize,

    /// Minutes a user must be inactive before being notified
    #[arg(long, default_value = "10")]
    due_min_inactive: u64,

    /// Disable study notifications
    #[arg(long)]
    no_notify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the notification scheduler until Ctrl-C
    Serve,
    /// Make every study of every chat due now
    StudyNow,
    /// Write a copy of the database to a new file
    Backup { out: PathBuf },
    /// Remove a chat with all its phrases
    DeleteChat { chat_id: ChatId },
    /// Delete phrases matching all given criteria
    DeletePhrases {
        #[arg(long)]
        chat_id: Option<ChatId>,
        /// Substring of the phrase
        #[arg(long)]
        phrase: Option<String>,
        /// Substring of the explanation
        #[arg(long)]
        explanation: Option<String>,
        #[arg(long)]
        score: Option<i64>,
    },
    /// List chat IDs
    Chats,
    /// Print a chat's phrases as newline-delimited JSON
    Export { chat_id: ChatId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::default()
        .new_per_day(args.new_per_day)
        .due_min_count(args.due_min_count)
        .due_min_inactive_minutes(args.due_min_inactive)
        .notify(!args.no_notify);

    let store = Arc::new(Store::open(&args.db, config)?);
    tracing::info!("Opened database: {}", args.db.display());

    match args.command {
        Command::Serve => {
            let notifier = Notifier::new(store.clone(), Arc::new(LogDeliver))?;
            notifier.start()?;
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down, dropping {} pending timers", notifier.pending());
            notifier.cancel_all();
        }
        Command::StudyNow => {
            let n = store.study_now()?;
            println!("{} studies updated", n);
        }
        Command::Backup { out } => {
            store.backup_into(&out)?;
            println!("Backup written to {}", out.display());
        }
        Command::DeleteChat { chat_id } => {
            let n = store.delete_chat(chat_id)?;
            println!("Deleted chat {} with {} phrases.", chat_id, n);
        }
        Command::DeletePhrases {
            chat_id,
            phrase,
            explanation,
            score,
        } => {
            let filter = PhraseFilter {
                chat_id,
                phrase,
                explanation,
                score,
            };
            if filter.is_empty() {
                anyhow::bail!(
                    "no query specified: pass --chat-id, --phrase, --explanation or --score"
                );
            }
            let n = store.delete_phrases(|id, p| filter.matches(id, p))?;
            println!("Deleted {} phrases.", n);
        }
        Command::Chats => {
            for id in store.chat_ids()? {
                println!("{}", id);
            }
        }
        Command::Export { chat_id } => {
            print!("{}", store.export_phrases(chat_id)?);
        }
    }

    Ok(())
}
