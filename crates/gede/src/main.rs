// gede entry point.
//
// Startup sequence:
// 1. Resolve the home directory and initialize tracing (log to file)
// 2. Load config.toml
// 3. Prepare the model catalog, providers and enabled models
// 4. Create or load the chat from the command line options
// 5. Connect MCP servers when a config file exists
// 6. Run the REPL
// 7. Shut down MCP servers

use std::io::{self, Write};

use anyhow::Context as _;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use gede::chat::Chat;
use gede::config::{self, GedeDirs};
use gede::context::Context;
use gede::display::Notifier;
use gede::providers::ModelPath;
use gede::repl;
use gede_llm::mcp::config::{shutdown_all, McpManager};

#[derive(Debug, Parser)]
#[command(name = "gede", version, about = "Chat with LLMs from the terminal")]
struct Args {
    /// Model to chat with, as `provider:model_id`.
    #[arg(long)]
    model: Option<String>,

    /// Start a private (encrypted) chat.
    #[arg(long)]
    private: bool,

    /// System instruction for the new chat.
    #[arg(long)]
    instruction: Option<String>,

    /// Load a saved chat by file name.
    #[arg(long)]
    load: Option<String>,

    /// Debug-level logging.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 1. Home directory and tracing
    let dirs = GedeDirs::resolve()?;
    dirs.ensure()?;
    init_tracing(&dirs, args.verbose)?;
    info!("gede {} starting up", env!("CARGO_PKG_VERSION"));

    // 2. Config
    let config = config::load_config(&dirs).context("failed to load configuration")?;

    // 3. Catalog, providers, models
    let mut ctx = Context::initialize(config, dirs, Notifier::new(io::stdout())).await?;
    ctx.notifier
        .info(&format!("gede v{}", env!("CARGO_PKG_VERSION")))?;

    // 4. Chat from options
    let mut stdin = BufReader::new(tokio::io::stdin());
    if let Some(name) = &args.load {
        let password = if args.private {
            write!(ctx.notifier.out(), "Password: ")?;
            ctx.notifier.out().flush()?;
            let typed = match tokio::task::spawn_blocking(repl::read_password).await? {
                Ok(typed) => {
                    writeln!(ctx.notifier.out())?;
                    typed
                }
                // Not a terminal: read the password as a plain line.
                Err(e) => {
                    debug!("password echo cannot be disabled: {e}");
                    let mut line = String::new();
                    stdin.read_line(&mut line).await?;
                    Some(line.trim().to_string())
                }
            };
            typed.filter(|p| !p.is_empty())
        } else {
            None
        };
        match Chat::load(&ctx.store, name, args.private, password.as_deref()) {
            Ok(chat) => {
                ctx.notifier.info(&format!("Loaded \"{}\"", chat.title))?;
                ctx.chat = chat;
            }
            Err(e) => ctx.notifier.error(&format!("Failed to load chat: {e}"))?,
        }
    } else if args.private {
        ctx.chat = ctx.new_chat(true);
    }
    if let Some(model) = &args.model {
        match model.parse::<ModelPath>() {
            Ok(path) if ctx.registry.by_id(&path.provider_id).is_some() => {
                ctx.chat.model_path = path.to_string();
            }
            Ok(path) => ctx
                .notifier
                .error(&format!("Unknown provider: {}", path.provider_id))?,
            Err(e) => ctx.notifier.error(&e.to_string())?,
        }
    }
    if let Some(instruction) = &args.instruction {
        ctx.chat.set_instruction(instruction);
    }

    // 5. MCP servers
    let mcp_path = ctx.config.mcp_config_path(&ctx.dirs);
    if mcp_path.exists() {
        match McpManager::from_file(&mcp_path) {
            Ok(manager) => {
                ctx.mcp_servers = manager.connect_all().await;
                if !ctx.mcp_servers.is_empty() {
                    let names: Vec<&str> = ctx.mcp_servers.keys().map(String::as_str).collect();
                    ctx.notifier
                        .dim(&format!("MCP servers: {}", names.join(", ")))?;
                }
            }
            Err(e) => {
                warn!("invalid MCP config {}: {e}", mcp_path.display());
                ctx.notifier.warning(&format!("MCP config ignored: {e}"))?;
            }
        }
    }

    // 6. REPL
    let result = repl::run_repl(&mut ctx, stdin).await;

    // 7. Cleanup
    shutdown_all(&ctx.mcp_servers).await;
    info!("gede shut down");
    result
}

/// Initialize tracing to log to a file (the terminal is used for the chat).
fn init_tracing(dirs: &GedeDirs, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = dirs.logs();
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gede.log"))?;

    let default_filter = if verbose {
        "gede=debug,gede_llm=debug,warn"
    } else {
        "gede=info,gede_llm=info,warn"
    };
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
