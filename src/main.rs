//! # askdoc CLI
//!
//! The `askdoc` binary wraps the library: account management, index
//! building, one-shot and interactive question answering, and history.
//!
//! ## Usage
//!
//! ```bash
//! askdoc --config ./config/askdoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdoc register <user>` | Create an account |
//! | `askdoc login <user>` | Check credentials |
//! | `askdoc recover-username` | Look up a username by phone number |
//! | `askdoc reset-password` | Set a new password, found by phone number |
//! | `askdoc index` | Build the vector index (or report the existing one) |
//! | `askdoc ask "<question>"` | Answer one question, streaming to stdout |
//! | `askdoc chat` | Interactive session |
//! | `askdoc history show\|search\|clear` | Inspect or clear your history |
//! | `askdoc feedback "<text>"` | Leave feedback |
//!
//! Logs go to stderr (`RUST_LOG`, default `askdoc=info`); answers and
//! command output go to stdout.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use askdoc::config::{self, Config};
use askdoc::credentials::{is_valid_phone, CredentialStore};
use askdoc::embedding::create_embedder;
use askdoc::feedback::save_feedback;
use askdoc::history;
use askdoc::index::{self, BuildOptions, VectorIndex};
use askdoc::models::ChatRecord;
use askdoc::session::{history_store, App, Session};

/// askdoc: ask questions about a document, answered from its own text.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askdoc.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askdoc",
    about = "Retrieval-augmented Q&A over a fixed document, with per-user history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account.
    Register {
        username: String,
        #[arg(long)]
        password: String,
        /// Exactly 10 digits.
        #[arg(long)]
        phone: String,
    },

    /// Check a username and password.
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Print the username registered with a phone number.
    RecoverUsername {
        #[arg(long)]
        phone: String,
    },

    /// Set a new password for the account registered with a phone number.
    ResetPassword {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        new_password: String,
    },

    /// Build the vector index from the source document.
    ///
    /// An existing index is reused as-is unless `--rebuild` is given.
    Index {
        /// Re-extract, re-chunk and re-embed even if an index exists.
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer a single question.
    Ask {
        question: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
    },

    /// Interactive session: each line is a question.
    ///
    /// Commands: `:history [query]`, `:clear`, `:backup`,
    /// `:feedback <text>`, `:logout`.
    Chat {
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
    },

    /// Show, search or clear your chat history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
        #[arg(long, global = true)]
        user: Option<String>,
        #[arg(long, global = true)]
        password: Option<String>,
    },

    /// Leave feedback.
    Feedback {
        text: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print every exchange, oldest first.
    Show,
    /// Print exchanges containing the query (case-insensitive).
    Search { query: String },
    /// Delete the whole history.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askdoc=info")))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Register {
            username,
            password,
            phone,
        } => {
            require_valid_phone(&phone)?;
            let store = CredentialStore::new(&cfg.paths.credentials);
            if !store.register(&username, &password, &phone)? {
                bail!("User '{}' already exists", username);
            }
            println!("Registered '{}'. You can now log in.", username);
        }
        Commands::Login { username, password } => {
            require_login(&cfg, &username, &password)?;
            println!("Login successful.");
        }
        Commands::RecoverUsername { phone } => {
            require_valid_phone(&phone)?;
            let store = CredentialStore::new(&cfg.paths.credentials);
            match store.find_username_by_phone(&phone)? {
                Some(username) => println!("{}", username),
                None => bail!("Phone number not found"),
            }
        }
        Commands::ResetPassword {
            phone,
            new_password,
        } => {
            require_valid_phone(&phone)?;
            let store = CredentialStore::new(&cfg.paths.credentials);
            let Some(username) = store.find_username_by_phone(&phone)? else {
                bail!("Phone number not found");
            };
            if !store.update_password(&username, &new_password)? {
                bail!("Failed to reset password for '{}'", username);
            }
            println!("Password reset for '{}'. Please log in.", username);
        }
        Commands::Index { rebuild } => {
            run_index(&cfg, rebuild).await?;
        }
        Commands::Ask {
            question,
            user,
            password,
        } => {
            require_login(&cfg, &user, &password)?;
            let app = App::open(cfg).await?;
            let mut session = Session::new(user);
            session.ask(&app, &question, print_fragment).await?;
            println!();
        }
        Commands::Chat { user, password } => {
            require_login(&cfg, &user, &password)?;
            let app = App::open(cfg).await?;
            run_chat(&app, Session::new(user)).await?;
        }
        Commands::History {
            action,
            user,
            password,
        } => {
            let (Some(user), Some(password)) = (user, password) else {
                bail!("history needs --user and --password");
            };
            require_login(&cfg, &user, &password)?;
            let store = history_store(&cfg.paths);
            match action {
                HistoryAction::Show => print_records(&store.load(&user)?),
                HistoryAction::Search { query } => {
                    print_records(&history::search(&store.load(&user)?, &query))
                }
                HistoryAction::Clear => {
                    store.clear(&user)?;
                    println!("History cleared.");
                }
            }
        }
        Commands::Feedback {
            text,
            user,
            password,
        } => {
            require_login(&cfg, &user, &password)?;
            match save_feedback(&cfg.paths.feedback_dir, &user, &text)? {
                Some(_) => println!("Thank you for your feedback!"),
                None => println!("Empty feedback ignored."),
            }
        }
    }

    Ok(())
}

fn require_login(cfg: &Config, username: &str, password: &str) -> Result<()> {
    let store = CredentialStore::new(&cfg.paths.credentials);
    if !store.authenticate(username, password)? {
        bail!("Invalid username or password");
    }
    Ok(())
}

fn require_valid_phone(phone: &str) -> Result<()> {
    if !is_valid_phone(phone) {
        bail!("Invalid phone number. Please enter a 10-digit phone number.");
    }
    Ok(())
}

async fn run_index(cfg: &Config, rebuild: bool) -> Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let options = BuildOptions::from_config(cfg);
    let built = if rebuild {
        let built = index::build(&cfg.paths.source_document, embedder.as_ref(), &options).await?;
        built.save(&cfg.paths.index).await?;
        built
    } else {
        index::build_or_load(
            &cfg.paths.source_document,
            &cfg.paths.index,
            embedder.as_ref(),
            &options,
        )
        .await?
    };
    print_index_summary(&built);
    Ok(())
}

fn print_index_summary(index: &VectorIndex) {
    let meta = index.meta();
    println!("Index ready: {} chunks", index.len());
    println!("  build:   {}", meta.build_id);
    println!("  model:   {} ({} dims)", meta.model, meta.dims);
    println!("  corpus:  {}", meta.corpus_version);
    println!("  chunks:  size {} overlap {}", meta.chunk_size, meta.chunk_overlap);
    println!("  built:   {}", meta.built_at);
}

async fn run_chat(app: &App, mut session: Session) -> Result<()> {
    println!(
        "Logged in as {}. Type a question, or :history [query], :clear, :backup, :feedback <text>, :logout.",
        session.username()
    );
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix(':') {
            let (name, arg) = match command.split_once(char::is_whitespace) {
                Some((name, arg)) => (name, arg.trim()),
                None => (command, ""),
            };
            match name {
                "history" => print_records(&session.history(app, arg)?),
                "clear" => {
                    session.clear_history(app)?;
                    println!("History cleared.");
                }
                "backup" => {
                    let path = session.backup(app)?;
                    println!("Backed up to {}", path.display());
                }
                "feedback" => match session.feedback(app, arg)? {
                    Some(_) => println!("Thank you for your feedback!"),
                    None => println!("Empty feedback ignored."),
                },
                "logout" | "quit" => break,
                other => println!("Unknown command :{}", other),
            }
            continue;
        }

        // A failed answer is reported and the session carries on.
        match session.ask(app, line, print_fragment).await {
            Ok(_) => println!(),
            Err(e) => {
                println!();
                eprintln!("Error: {:#}", e);
            }
        }
    }

    session.logout();
    println!("Logged out.");
    Ok(())
}

fn print_fragment(fragment: &str) {
    print!("{}", fragment);
    let _ = std::io::stdout().flush();
}

fn print_records(records: &[ChatRecord]) {
    if records.is_empty() {
        println!("No history.");
        return;
    }
    for record in records {
        println!("[{}]", record.timestamp.format("%Y-%m-%d %H:%M:%S"));
        println!("Q: {}", record.question);
        println!("A: {}", record.answer);
        println!();
    }
}
