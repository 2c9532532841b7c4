use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use verso_core::accounts::AccountService;
use verso_core::config::{VersoConfig, VALID_LLM_PROVIDERS};
use verso_core::conversation::{ConversationManager, ExchangeSettings, Fragment};
use verso_core::llm::LlmService;
use verso_core::model::*;
use verso_core::storage::{self, SqliteStorage};

#[derive(Parser)]
#[command(name = "verso", about = "Verso: talk about poems with a language model", version)]
enum Cli {
    /// Write a starter .verso/config.toml in the current directory
    Init {
        /// Model provider to configure (groq, openai, deepseek, xai, ollama, echo)
        #[arg(long, default_value = "groq")]
        provider: String,
    },
    /// Show database and model status
    Status,
    /// Manage reader accounts
    #[command(subcommand)]
    User(UserCmd),
    /// Manage the poem collection
    #[command(subcommand)]
    Poem(PoemCmd),
    /// List a reader's chat sessions, newest first
    Sessions {
        username: String,
        /// Only sessions about this poem
        #[arg(long)]
        poem: Option<i64>,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the turns of a session in order
    Turns {
        session_id: Uuid,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask a question about a poem as the given reader
    Ask {
        username: String,
        poem_id: i64,
        question: String,
        /// Start a new session instead of continuing the latest one
        #[arg(long)]
        new: bool,
        /// Print the answer as it arrives
        #[arg(long)]
        stream: bool,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserCmd {
    /// Register a reader. The first account becomes administrator.
    Add {
        username: String,
        #[arg(long)]
        password: String,
        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },
    /// List readers
    List {
        #[arg(long)]
        json: bool,
    },
    /// Grant administrator rights
    Promote { username: String },
    /// Revoke administrator rights
    Demote { username: String },
}

#[derive(Subcommand)]
enum PoemCmd {
    /// Add a poem. The text comes from --file or --content and is stored verbatim.
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        #[arg(long)]
        content: Option<String>,
    },
    /// List poems by author and title
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print a poem
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Delete a poem and every chat session about it
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = VersoConfig::load(Some(&std::env::current_dir()?))
        .unwrap_or_else(|_| VersoConfig::default_config());

    run(cli, &config).await
}

async fn run(cli: Cli, config: &VersoConfig) -> Result<()> {
    match cli {
        Cli::Init { provider } => cmd_init(&provider),
        Cli::Status => {
            let storage = make_storage(config)?;
            cmd_status(&storage, config).await
        }
        Cli::User(cmd) => {
            let storage = make_storage(config)?;
            cmd_user(&AccountService::new(storage), cmd).await
        }
        Cli::Poem(cmd) => {
            let storage = make_storage(config)?;
            cmd_poem(&storage, cmd).await
        }
        Cli::Sessions {
            username,
            poem,
            json,
        } => {
            let storage = make_storage(config)?;
            cmd_sessions(&storage, &username, poem, json).await
        }
        Cli::Turns { session_id, json } => {
            let storage = make_storage(config)?;
            cmd_turns(&storage, session_id, json).await
        }
        Cli::Ask {
            username,
            poem_id,
            question,
            new,
            stream,
            json,
        } => {
            let storage = make_storage(config)?;
            let llm = LlmService::from_config(&config.llm)
                .context("failed to create model backend")?;
            let manager =
                ConversationManager::new(storage, llm, ExchangeSettings::from_config(config));
            cmd_ask(&manager, &username, poem_id, &question, new, stream, json).await
        }
    }
}

fn make_storage(config: &VersoConfig) -> Result<SqliteStorage> {
    storage::open_storage(config).context("failed to open database")
}

// -- init / status --

fn cmd_init(provider: &str) -> Result<()> {
    if !VALID_LLM_PROVIDERS.contains(&provider) {
        anyhow::bail!(
            "unknown provider '{}'. Valid options: {}",
            provider,
            VALID_LLM_PROVIDERS.join(", ")
        );
    }

    let cwd = std::env::current_dir()?;
    let verso_dir = cwd.join(".verso");
    let config_path = verso_dir.join("config.toml");
    if config_path.exists() {
        println!("Verso already initialized in this directory.");
        return Ok(());
    }
    std::fs::create_dir_all(&verso_dir)?;

    let mut config = VersoConfig::default_config();
    config.llm.provider = provider.to_string();
    let note = match provider {
        "ollama" => "# Requires Ollama running locally\n",
        "echo" => "# Offline replies, no model involved (for testing)\n",
        _ => "# Set the provider's API key env var or llm.api_key in config.local.toml\n",
    };
    std::fs::write(&config_path, format!("{note}{}", config.to_toml()?))?;

    let gitignore_path = cwd.join(".gitignore");
    let entry = ".verso/config.local.toml";
    let contents = std::fs::read_to_string(&gitignore_path).unwrap_or_default();
    if !contents.lines().any(|l| l.trim() == entry) {
        let mut appended = contents;
        if !appended.is_empty() && !appended.ends_with('\n') {
            appended.push('\n');
        }
        appended.push_str(entry);
        appended.push('\n');
        std::fs::write(&gitignore_path, appended)?;
    }

    println!("{} {}", "Created".green(), config_path.display());
    Ok(())
}

async fn cmd_status(storage: &SqliteStorage, config: &VersoConfig) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    println!("{}", format!("Verso Status v{version}").bold());

    let schema = storage.schema_version().await?;
    println!(
        "  {}  {} (schema v{schema})",
        "Database:".dimmed(),
        storage.path().display()
    );

    let counts = storage.counts().await?;
    println!("  {}     {}", "Users:".dimmed(), counts.users.to_string().cyan());
    println!("  {}     {}", "Poems:".dimmed(), counts.poems.to_string().cyan());
    println!("  {}  {}", "Sessions:".dimmed(), counts.sessions.to_string().cyan());
    println!("  {}     {}", "Turns:".dimmed(), counts.turns.to_string().cyan());

    let model = match LlmService::from_config(&config.llm) {
        Ok(service) if service.is_offline() => format!("{} {}", "echo".cyan(), "(offline)".yellow()),
        Ok(service) => format!("{} / {}", config.llm.provider.cyan(), service.model()),
        Err(e) => format!("{} {}", config.llm.provider, format!("- {e}").red()),
    };
    println!("  {}     {model}", "Model:".dimmed());
    println!(
        "  {}       http://{}:{}",
        "Web:".dimmed(),
        config.web.host,
        config.web.port
    );
    Ok(())
}

// -- users --

async fn cmd_user(accounts: &AccountService, cmd: UserCmd) -> Result<()> {
    match cmd {
        UserCmd::Add {
            username,
            password,
            admin,
        } => {
            let mut user = accounts.register(&username, &password).await?;
            if admin && !user.is_admin {
                user = accounts.set_admin(&user.username, true).await?;
            }
            println!(
                "{} {} (id {}){}",
                "Added".green(),
                user.username.bold(),
                user.id,
                if user.is_admin { ", administrator" } else { "" }
            );
        }
        UserCmd::List { json } => {
            let users = accounts.list_users().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
                return Ok(());
            }
            if users.is_empty() {
                println!("{}", "No users yet.".dimmed());
            }
            for user in &users {
                let role = if user.is_admin { "admin".yellow().to_string() } else { "reader".dimmed().to_string() };
                println!(
                    "{:>5}  {:<24} {:<8} {}",
                    user.id,
                    user.username,
                    role,
                    user.created_at.format("%Y-%m-%d").dimmed()
                );
            }
        }
        UserCmd::Promote { username } => {
            let user = accounts.set_admin(&username, true).await?;
            println!("{} is now an administrator", user.username.bold());
        }
        UserCmd::Demote { username } => {
            let user = accounts.set_admin(&username, false).await?;
            println!("{} is no longer an administrator", user.username.bold());
        }
    }
    Ok(())
}

// -- poems --

/// The console is an operator tool and edits the collection directly.
async fn cmd_poem(storage: &SqliteStorage, cmd: PoemCmd) -> Result<()> {
    match cmd {
        PoemCmd::Add {
            title,
            author,
            file,
            content,
        } => {
            let content = match (file, content) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(content)) => content,
                (None, None) => anyhow::bail!("pass the poem text with --file or --content"),
            };
            let input = PoemInput::new(title, author, content).validated()?;
            let poem = storage.insert_poem(&input).await?;
            println!(
                "{} {} by {} (id {})",
                "Added".green(),
                poem.title.bold(),
                poem.author,
                poem.id
            );
        }
        PoemCmd::List { json } => {
            let poems = storage.list_poems().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&poems)?);
                return Ok(());
            }
            if poems.is_empty() {
                println!("{}", "No poems yet.".dimmed());
            }
            for poem in &poems {
                println!(
                    "{:>5}  {:<40} {}",
                    poem.id,
                    truncate(&poem.title, 40),
                    poem.author.dimmed()
                );
            }
        }
        PoemCmd::Show { id, json } => {
            let poem = storage.get_poem(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&poem)?);
                return Ok(());
            }
            println!("{}", poem.title.bold());
            println!("{}", poem.author.dimmed());
            println!();
            print!("{}", poem.content);
            if !poem.content.ends_with('\n') {
                println!();
            }
        }
        PoemCmd::Delete { id } => {
            storage.delete_poem(id).await?;
            println!("{} poem {id}", "Deleted".red());
        }
    }
    Ok(())
}

// -- sessions and turns --

async fn find_user(storage: &SqliteStorage, username: &str) -> Result<User> {
    storage
        .find_user_by_name(username)
        .await?
        .with_context(|| format!("no user named '{username}'"))
}

async fn cmd_sessions(
    storage: &SqliteStorage,
    username: &str,
    poem_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let user = find_user(storage, username).await?;
    let sessions = storage.sessions_for(user.id, poem_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("{}", "No sessions.".dimmed());
        return Ok(());
    }
    for session in &sessions {
        let turns = storage.list_turns(session.id).await?;
        println!(
            "{}  poem {:<5} {:>3} turns  {}",
            session.id.to_string().cyan(),
            session.poem_id,
            turns.len(),
            session.created_at.format("%Y-%m-%d %H:%M").dimmed()
        );
    }
    Ok(())
}

async fn cmd_turns(storage: &SqliteStorage, session_id: Uuid, json: bool) -> Result<()> {
    if storage.get_session(session_id).await?.is_none() {
        anyhow::bail!("session {session_id} not found");
    }
    let turns = storage.list_turns(session_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&turns)?);
        return Ok(());
    }
    for turn in &turns {
        let who = match turn.role {
            Role::User => "user ".blue().bold().to_string(),
            Role::Model => "model".magenta().bold().to_string(),
        };
        println!(
            "{} {}",
            who,
            turn.created_at.format("%H:%M:%S").dimmed()
        );
        println!("{}\n", turn.content);
    }
    Ok(())
}

// -- ask --

async fn cmd_ask(
    manager: &ConversationManager<LlmService>,
    username: &str,
    poem_id: i64,
    question: &str,
    new: bool,
    stream: bool,
    json: bool,
) -> Result<()> {
    let caller = Caller::user(find_user(manager.storage(), username).await?);
    let session = manager.resolve_or_create(&caller, poem_id, new).await?;

    if json {
        let answer = manager.exchange(&caller, session.id, question).await?;
        let out = serde_json::json!({ "session_id": session.id, "answer": answer });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if !stream {
        let answer = manager.exchange(&caller, session.id, question).await?;
        println!("{answer}");
        return Ok(());
    }

    let mut fragments = manager.exchange_stream(&caller, session.id, question).await?;
    let mut stdout = std::io::stdout();
    let mut wrote_text = false;
    while let Some(fragment) = fragments.next().await {
        match fragment {
            Fragment::Text(text) => {
                print!("{text}");
                stdout.flush()?;
                wrote_text = true;
            }
            Fragment::Error(message) => {
                if wrote_text {
                    println!();
                }
                eprintln!("{}", message.yellow());
                wrote_text = false;
            }
        }
    }
    if wrote_text {
        println!();
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
