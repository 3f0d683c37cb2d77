//! Lumina - chat assistant server and terminal client

use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumina::client::ChatClient;
use lumina::config::{self, MODEL_KEY_ENV, PLACES_KEY_ENV};
use lumina::events::ChatEvent;
use lumina::prompt::ToolHint;
use lumina::proxy;
use lumina::renderer::{render_segment, ChatHistoryCache, ChatSession, TurnStatus};

#[derive(Parser)]
#[command(name = "lumina")]
#[command(author, version, about = "Lumina chat assistant for Bhavani Digitals")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration in the current directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Start the chat server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show current configuration
    Config,

    /// Chat with a running server from the terminal
    Chat {
        /// Server URL
        #[arg(short, long, default_value = "http://127.0.0.1:3000")]
        url: String,

        /// Model id (see /models)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// List or clear saved conversations
    History {
        /// Delete all saved conversations
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "lumina=debug,tower_http=debug"
    } else {
        "lumina=info,tower_http=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(force),
        Commands::Serve { port, host } => cmd_serve(port, host).await,
        Commands::Config => cmd_config(),
        Commands::Chat { url, model } => cmd_chat(url, model).await,
        Commands::History { clear } => cmd_history(clear),
    }
}

/// Write `.lumina/config.yaml`
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_file = config::project_config_path();

    if config_file.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }

    if let Some(dir) = config_file.parent() {
        fs::create_dir_all(dir)?;
    }

    let default_config = r#"# Lumina Configuration

server:
  port: 3000
  host: "127.0.0.1"

model:
  base_url: https://generativelanguage.googleapis.com
  # api_key: set GOOGLE_GENERATIVE_AI_API_KEY instead

places:
  base_url: https://places.googleapis.com
  # api_key: set GOOGLE_MAPS_API_KEY instead
  max_results: 5
  bias:
    latitude: 17.3850
    longitude: 78.4867
    radius_meters: 50000

chat:
  max_tool_rounds: 5
  turn_timeout_secs: 30
  # system_prompt: replaces the built-in Lumina prompt
"#;

    fs::write(&config_file, default_config)?;

    info!("Initialized Lumina configuration in {}", config_file.display());
    info!("");
    info!("Set your API keys:");
    info!("  export {}=your-key-here", MODEL_KEY_ENV);
    info!("  export {}=your-key-here", PLACES_KEY_ENV);
    info!("");
    info!("Start the server:");
    info!("  lumina serve");

    Ok(())
}

async fn cmd_serve(port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    let mut config = config::load_config()?;

    if let Some(p) = port {
        config.server.port = p;
    }
    if let Some(h) = host {
        config.server.host = h;
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Ok(());
    }

    info!("Lumina v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Chat endpoint: http://{}:{}/api/chat",
        config.server.host, config.server.port
    );

    proxy::start_server(config).await
}

fn key_status(key: &Option<String>) -> &'static str {
    if key.as_deref().is_some_and(|k| !k.is_empty()) {
        "configured"
    } else {
        "not set"
    }
}

fn cmd_config() -> anyhow::Result<()> {
    match config::load_config() {
        Ok(config) => {
            println!("Lumina Configuration\n");
            println!("Server:");
            println!("  Host: {}", config.server.host);
            println!("  Port: {}", config.server.port);
            println!();
            println!("Model:");
            println!("  Base URL: {}", config.model.base_url);
            println!("  API key: {}", key_status(&config.model.api_key));
            println!();
            println!("Places:");
            println!("  Base URL: {}", config.places.base_url);
            println!("  API key: {}", key_status(&config.places.api_key));
            println!(
                "  Bias: {}, {} ({} m)",
                config.places.bias.latitude,
                config.places.bias.longitude,
                config.places.bias.radius_meters
            );
            println!("  Max results: {}", config.places.max_results);
            println!();
            println!("Chat:");
            println!("  Max tool rounds: {}", config.chat.max_tool_rounds);
            println!("  Turn timeout: {}s", config.chat.turn_timeout_secs);
            println!(
                "  System prompt: {}",
                if config.chat.system_prompt.is_some() {
                    "custom"
                } else {
                    "built-in"
                }
            );
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            info!("Run 'lumina init' to create a configuration file.");
        }
    }
    Ok(())
}

fn history_path() -> anyhow::Result<PathBuf> {
    ChatHistoryCache::default_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

fn load_history(path: &Path) -> ChatHistoryCache {
    match ChatHistoryCache::load(path) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable chat history");
            ChatHistoryCache::new()
        }
    }
}

fn cmd_history(clear: bool) -> anyhow::Result<()> {
    let path = history_path()?;
    let mut cache = load_history(&path);

    if clear {
        cache.clear();
        cache.save(&path)?;
        println!("Chat history cleared.");
        return Ok(());
    }

    if cache.is_empty() {
        println!("No history yet.");
        return Ok(());
    }
    for (i, entry) in cache.entries().iter().enumerate() {
        println!(
            "{:>2}. {}  ({}, {} messages)",
            i + 1,
            entry.title,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.turns.len()
        );
    }
    Ok(())
}

const CHAT_HELP: &str = "Commands:
  /new            start a new conversation
  /history        list saved conversations
  /resume <n>     continue saved conversation n
  /models         list available models
  /model <id>     switch model
  /mode <hint>    auto, maps, vision or plan
  /exit           quit";

fn print_event(event: &ChatEvent, session: &ChatSession) {
    match event {
        ChatEvent::TextDelta { value } => {
            print!("{}", value);
            let _ = std::io::stdout().flush();
        }
        ChatEvent::ToolCallStarted { call_id, .. }
        | ChatEvent::ToolCallResult { call_id, .. }
        | ChatEvent::ToolCallError { call_id, .. } => {
            let segment = session
                .in_progress()
                .and_then(|turn| turn.segments.iter().find(|s| s.call_id() == Some(call_id.as_str())));
            if let Some(segment) = segment {
                println!("\n{}", render_segment(segment));
            }
        }
        ChatEvent::TurnEnd => println!(),
        ChatEvent::TurnError { message } => println!("\n{}", message),
    }
}

async fn cmd_chat(url: String, model: Option<String>) -> anyhow::Result<()> {
    let path = history_path()?;
    let client = ChatClient::new(url.clone());
    let mut session = ChatSession::new(load_history(&path));
    session.model = model;

    let mut editor = DefaultEditor::new()?;
    println!("Lumina - your AI event partner ({}). Type /help for commands.", url);

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command
                .split_once(' ')
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name {
                "exit" | "quit" => break,
                "help" => println!("{}", CHAT_HELP),
                "new" => {
                    session.reset();
                    println!("Started a new conversation.");
                }
                "history" => {
                    for (i, entry) in session.cache().entries().iter().enumerate() {
                        println!("{:>2}. {}", i + 1, entry.title);
                    }
                }
                "resume" => {
                    let id = arg
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| session.cache().entries().get(i))
                        .map(|e| e.id.clone());
                    match id {
                        Some(id) if session.resume(&id) => {
                            println!("Resumed ({} messages).", session.history().len())
                        }
                        _ => println!("No such conversation."),
                    }
                }
                "models" => match client.models().await {
                    Ok(list) => {
                        for m in list.models {
                            let marker = if m.id == list.default { "*" } else { " " };
                            println!("{} {:<24} {} - {}", marker, m.id, m.name, m.description);
                        }
                    }
                    Err(e) => println!("Could not list models: {}", e),
                },
                "model" if !arg.is_empty() => {
                    session.model = Some(arg.to_string());
                    println!("Model set to {}.", arg);
                }
                "mode" => match ToolHint::parse(arg) {
                    Some(hint) => {
                        session.tool_hint = hint;
                        println!("Mode: {}.", hint.label());
                    }
                    None => println!("Modes: auto, maps, vision, plan."),
                },
                _ => println!("{}", CHAT_HELP),
            }
            continue;
        }

        print!("lumina> ");
        let _ = std::io::stdout().flush();
        match client.send(&mut session, line, print_event).await {
            Ok(TurnStatus::Complete) => {
                if let Err(e) = session.cache().save(&path) {
                    warn!(error = %e, "Failed to save chat history");
                }
            }
            Ok(_) => {}
            Err(e) => println!("\nCould not reach Lumina: {}", e),
        }
    }

    Ok(())
}
