// Slash commands: parsing and execution against the session context.

use std::io::Write;

use anyhow::Context as _;
use thiserror::Error;
use tracing::{info, warn};

use gede_llm::settings::SETTING_KEYS;

use crate::chat::{check_filename, Chat};
use crate::context::Context;
use crate::providers::ModelPath;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    New { private: bool },
    Info,
    Instruction(String),
    Model(Option<String>),
    Models,
    AddModel { provider: String, model: String },
    RemoveModel { provider: String, model: String },
    Save(Option<String>),
    Load { name: String, password: Option<String> },
    List { private: bool },
    Title(Option<String>),
    Context(i64),
    Password(String),
    Settings(Option<(String, String)>),
    Tools,
    Mcp,
}

impl Command {
    /// Command name without arguments, safe to log.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "/help",
            Command::Quit => "/quit",
            Command::New { .. } => "/new",
            Command::Info => "/info",
            Command::Instruction(_) => "/instruction",
            Command::Model(_) => "/model",
            Command::Models => "/models",
            Command::AddModel { .. } => "/add-model",
            Command::RemoveModel { .. } => "/remove-model",
            Command::Save(_) => "/save",
            Command::Load { .. } => "/load",
            Command::List { .. } => "/list",
            Command::Title(_) => "/title",
            Command::Context(_) => "/context",
            Command::Password(_) => "/password",
            Command::Settings(_) => "/settings",
            Command::Tools => "/tools",
            Command::Mcp => "/mcp",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0} (type /help for a list)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Quit,
}

/// (name, usage, description)
const COMMANDS: &[(&str, &str, &str)] = &[
    ("/help", "/help", "Show this help"),
    ("/quit", "/quit", "Exit gede (also /exit)"),
    ("/new", "/new [private]", "Start a new chat"),
    ("/info", "/info", "Show chat information"),
    ("/instruction", "/instruction <text>", "Replace the system instruction"),
    ("/model", "/model [provider:model_id]", "Show or switch the model"),
    ("/models", "/models", "List enabled models"),
    ("/add-model", "/add-model <provider> <model_id>", "Enable a model"),
    ("/remove-model", "/remove-model <provider> <model_id>", "Disable a model"),
    ("/save", "/save [name]", "Save the chat"),
    ("/load", "/load <name> [password]", "Load a chat; a password loads a private chat"),
    ("/list", "/list [private]", "List saved chats"),
    ("/title", "/title [text]", "Set the title, or generate one"),
    ("/context", "/context <n>", "Messages kept in context (0 = all)"),
    ("/password", "/password <password>", "Set the private chat password"),
    ("/settings", "/settings [key value]", "Show or change model settings"),
    ("/tools", "/tools", "List builtin tools"),
    ("/mcp", "/mcp", "List MCP servers and their tools"),
];

/// Command names, for completion and help.
pub fn hints() -> Vec<&'static str> {
    let mut names: Vec<&str> = COMMANDS.iter().map(|(name, _, _)| *name).collect();
    names.push("/exit");
    names
}

fn usage_of(name: &str) -> &'static str {
    COMMANDS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, usage, _)| *usage)
        .unwrap_or("/help")
}

/// `None` for ordinary chat input.
pub fn parse(input: &str) -> Option<Result<Command, CommandError>> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }
    let (name, rest) = match input.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (input, ""),
    };
    let name_lower = name.to_ascii_lowercase();
    let args: Vec<&str> = rest.split_whitespace().collect();
    let rest_opt = Some(rest.to_string()).filter(|r| !r.is_empty());
    let usage = || CommandError::Usage(usage_of(&name_lower));

    let command = match name_lower.as_str() {
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/new" => match args.as_slice() {
            [] => Ok(Command::New { private: false }),
            ["private"] => Ok(Command::New { private: true }),
            _ => Err(usage()),
        },
        "/info" => Ok(Command::Info),
        "/instruction" => rest_opt.map(Command::Instruction).ok_or_else(usage),
        "/model" => match args.as_slice() {
            [] => Ok(Command::Model(None)),
            [path] => Ok(Command::Model(Some(path.to_string()))),
            _ => Err(usage()),
        },
        "/models" => Ok(Command::Models),
        "/add-model" | "/remove-model" => match args.as_slice() {
            [provider, model] => {
                let (provider, model) = (provider.to_string(), model.to_string());
                Ok(if name_lower == "/add-model" {
                    Command::AddModel { provider, model }
                } else {
                    Command::RemoveModel { provider, model }
                })
            }
            _ => Err(usage()),
        },
        "/save" => match args.as_slice() {
            [] => Ok(Command::Save(None)),
            [name] => Ok(Command::Save(Some(name.to_string()))),
            _ => Err(usage()),
        },
        "/load" => match args.as_slice() {
            [name] => Ok(Command::Load {
                name: name.to_string(),
                password: None,
            }),
            [name, password] => Ok(Command::Load {
                name: name.to_string(),
                password: Some(password.to_string()),
            }),
            _ => Err(usage()),
        },
        "/list" => match args.as_slice() {
            [] => Ok(Command::List { private: false }),
            ["private"] => Ok(Command::List { private: true }),
            _ => Err(usage()),
        },
        "/title" => Ok(Command::Title(rest_opt)),
        "/context" => match args.as_slice() {
            [n] => n.parse().map(Command::Context).map_err(|_| usage()),
            _ => Err(usage()),
        },
        "/password" => match args.as_slice() {
            [pw] => Ok(Command::Password(pw.to_string())),
            _ => Err(usage()),
        },
        "/settings" => match rest.split_once(char::is_whitespace) {
            None if rest.is_empty() => Ok(Command::Settings(None)),
            Some((key, value)) => Ok(Command::Settings(Some((
                key.to_string(),
                value.trim().to_string(),
            )))),
            None => Err(usage()),
        },
        "/tools" => Ok(Command::Tools),
        "/mcp" => Ok(Command::Mcp),
        _ => Err(CommandError::Unknown(name.to_string())),
    };
    Some(command)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

pub async fn execute<W: Write>(ctx: &mut Context<W>, command: Command) -> anyhow::Result<Outcome> {
    info!(command = command.name(), "command");
    match command {
        Command::Help => {
            let body = COMMANDS
                .iter()
                .map(|(_, usage, desc)| format!("{usage:<38} {desc}"))
                .collect::<Vec<_>>()
                .join("\n");
            ctx.notifier.panel("Commands", &body)?;
        }
        Command::Quit => return Ok(Outcome::Quit),
        Command::New { private } => {
            ctx.chat = ctx.new_chat(private);
            let kind = if private { "private chat" } else { "chat" };
            ctx.notifier.info(&format!("Started a new {kind}."))?;
            if private {
                ctx.notifier
                    .dim("Set a password with /password to be able to save it.")?;
            }
        }
        Command::Info => {
            let info = ctx.chat_info().await;
            ctx.notifier.panel("Chat Info", &info)?;
        }
        Command::Instruction(text) => {
            ctx.chat.set_instruction(&text);
            ctx.chat.save(&ctx.store)?;
            ctx.notifier.info("Instruction updated.")?;
        }
        Command::Model(None) => {
            let current = ctx.chat.model_path.clone();
            ctx.notifier.info(&format!("Current model: {current}"))?;
            list_models(ctx)?;
        }
        Command::Model(Some(path)) => switch_model(ctx, &path).await?,
        Command::Models => list_models(ctx)?,
        Command::AddModel { provider, model } => {
            let registry = ctx.registry.clone();
            match ctx
                .models
                .add_model(&registry, &ctx.catalog, &provider, &model)
                .await
            {
                Ok(true) => ctx.notifier.info(&format!("Enabled {provider}:{model}"))?,
                Ok(false) => ctx
                    .notifier
                    .warning(&format!("{provider}:{model} is already enabled"))?,
                Err(e) => ctx.notifier.error(&e.to_string())?,
            }
        }
        Command::RemoveModel { provider, model } => match ctx.models.remove_model(&provider, &model) {
            Ok(true) => ctx.notifier.info(&format!("Removed {provider}:{model}"))?,
            Ok(false) => ctx
                .notifier
                .warning(&format!("{provider}:{model} is not enabled"))?,
            Err(e) => ctx.notifier.error(&e.to_string())?,
        },
        Command::Save(name) => save_chat(ctx, name)?,
        Command::Load { name, password } => {
            let private = password.is_some();
            match Chat::load(&ctx.store, &name, private, password.as_deref()) {
                Ok(chat) => {
                    ctx.chat = chat;
                    ctx.notifier.info(&format!(
                        "Loaded \"{}\" ({} messages)",
                        ctx.chat.title,
                        ctx.chat.messages.len()
                    ))?;
                }
                Err(e) => {
                    warn!("load failed: {e}");
                    ctx.notifier.error(&format!("Failed to load chat: {e}"))?;
                }
            }
        }
        Command::List { private } => {
            let entries = ctx.store.list(private)?;
            if entries.is_empty() {
                ctx.notifier.dim("No saved chats.")?;
            } else {
                let body = entries
                    .iter()
                    .map(|e| {
                        format!(
                            "{}  {}  {}",
                            e.modified.format("%Y-%m-%d %H:%M"),
                            e.filename,
                            e.title.as_deref().unwrap_or("")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let title = if private { "Private Chats" } else { "Chats" };
                ctx.notifier.panel(title, &body)?;
            }
        }
        Command::Title(Some(title)) => {
            ctx.chat.title = title;
            ctx.chat.save(&ctx.store)?;
            ctx.notifier.info(&format!("Title set to \"{}\"", ctx.chat.title))?;
        }
        Command::Title(None) => generate_title(ctx).await?,
        Command::Context(n) => {
            ctx.chat.message_num_in_context = n;
            let desc = if n <= 0 {
                "the whole history".to_string()
            } else {
                format!("the last {n} messages")
            };
            ctx.notifier.info(&format!("Context now keeps {desc}."))?;
        }
        Command::Password(password) => {
            if !ctx.chat.is_private {
                ctx.notifier
                    .warning("Passwords apply to private chats only (start one with /new private).")?;
            } else {
                ctx.chat.private_password = Some(password);
                ctx.chat.save(&ctx.store)?;
                ctx.notifier.info("Password set.")?;
            }
        }
        Command::Settings(None) => {
            let json = serde_json::to_string_pretty(&ctx.chat.user_model_settings.to_json())?;
            let keys = SETTING_KEYS.join(", ");
            ctx.notifier
                .panel("Model Settings", &format!("{json}\n\nkeys: {keys}"))?;
        }
        Command::Settings(Some((key, value))) => match ctx.chat.user_model_settings.set(&key, &value) {
            Ok(()) => {
                ctx.chat.save(&ctx.store)?;
                ctx.notifier.info(&format!("{key} updated."))?;
            }
            Err(e) => ctx.notifier.error(&e.to_string())?,
        },
        Command::Tools => {
            if ctx.tools.is_empty() {
                ctx.notifier.dim("No builtin tools enabled.")?;
            } else {
                let body = ctx
                    .tools
                    .params()
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.description))
                    .collect::<Vec<_>>()
                    .join("\n");
                ctx.notifier.panel("Tools", &body)?;
            }
        }
        Command::Mcp => {
            if ctx.mcp_servers.is_empty() {
                ctx.notifier.dim("No MCP servers connected.")?;
            } else {
                let mut body = Vec::new();
                for (name, server) in &ctx.mcp_servers {
                    match server.list_tools(false).await {
                        Ok(tools) => {
                            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                            body.push(format!("{name}: {}", names.join(", ")));
                        }
                        Err(e) => body.push(format!("{name}: error: {e}")),
                    }
                }
                ctx.notifier.panel("MCP Servers", &body.join("\n"))?;
            }
        }
    }
    Ok(Outcome::Handled)
}

fn list_models<W: Write>(ctx: &mut Context<W>) -> anyhow::Result<()> {
    let mut body = Vec::new();
    for provider in ctx.models.providers() {
        body.push(format!("{} ({})", provider.name, provider.provider_id));
        for model in &provider.models {
            let marker = if model.model_path == ctx.chat.model_path { "*" } else { " " };
            body.push(format!(" {marker} {}  [{}]", model.model_path, model.name));
        }
    }
    ctx.notifier.panel("Models", &body.join("\n"))?;
    Ok(())
}

async fn switch_model<W: Write>(ctx: &mut Context<W>, path: &str) -> anyhow::Result<()> {
    let parsed: ModelPath = match path.parse() {
        Ok(p) => p,
        Err(e) => {
            ctx.notifier.error(&e.to_string())?;
            return Ok(());
        }
    };
    if ctx.registry.by_id(&parsed.provider_id).is_none() {
        ctx.notifier
            .error(&format!("Unknown provider: {}", parsed.provider_id))?;
        return Ok(());
    }
    let path = parsed.to_string();
    if ctx.catalog.get(&path).await.is_none() {
        ctx.notifier
            .warning(&format!("No model information for {path}; capabilities unknown."))?;
    }
    ctx.chat.model_path = path.clone();
    ctx.chat.save(&ctx.store)?;
    ctx.notifier.info(&format!("Model switched to {path}"))?;
    Ok(())
}

fn save_chat<W: Write>(ctx: &mut Context<W>, name: Option<String>) -> anyhow::Result<()> {
    if let Some(name) = name {
        if let Err(e) = check_filename(&name) {
            ctx.notifier.error(&format!("{e} (usage: /save [name])"))?;
            return Ok(());
        }
        let name = if name.ends_with(".json") {
            name
        } else {
            format!("{name}.json")
        };
        ctx.chat.filename = Some(name);
    } else {
        ctx.chat.generate_filename();
    }
    if ctx.chat.is_private && ctx.chat.private_password.is_none() {
        ctx.notifier
            .warning("Private chats need a password first: /password <password>")?;
        return Ok(());
    }
    match ctx.chat.save(&ctx.store).context("failed to save chat")? {
        Some(path) => ctx.notifier.info(&format!("Saved to {}", path.display()))?,
        None => ctx.notifier.warning("Chat was not saved.")?,
    }
    Ok(())
}

async fn generate_title<W: Write>(ctx: &mut Context<W>) -> anyhow::Result<()> {
    let Some((provider, path)) = ctx.registry.for_model_path(&ctx.chat.model_path) else {
        ctx.notifier.error(&format!(
            "No provider for model path: {}",
            ctx.chat.model_path
        ))?;
        return Ok(());
    };
    let client = provider.chat_client(&path.model_id, ctx.chat.user_model_settings.clone());
    match ctx.chat.generate_title(client.as_ref()).await {
        Ok(Some(title)) => {
            ctx.chat.save(&ctx.store)?;
            ctx.notifier.info(&format!("Title: {title}"))?;
        }
        Ok(None) => ctx
            .notifier
            .dim("Title unchanged (private or already titled chat).")?,
        Err(e) => ctx.notifier.error(&e.to_string())?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
