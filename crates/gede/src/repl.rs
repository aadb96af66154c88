// Interactive loop: read input, dispatch commands, stream chat turns.

use std::io::Write;
use std::path::Path;

use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use unicode_normalization::UnicodeNormalization;

use gede_llm::runner::run_stream;
use gede_llm::StreamEvent;

use crate::commands::{self, Outcome};
use crate::context::Context;
use crate::display::{MessageRenderer, Notifier};

const MULTILINE_MARKER: &str = "\\";
const EVENT_BUFFER: usize = 64;

/// NFC-normalize and trim user input.
pub fn clean_input(text: &str) -> String {
    text.trim().nfc().collect()
}

/// Append an entry to the input history file (`# time` line, then each
/// input line prefixed with `+`).
pub fn append_history(path: &Path, entry: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "\n# {}", Local::now().format("%Y-%m-%d %H:%M:%S%.6f"))?;
    for line in entry.lines() {
        writeln!(file, "+{line}")?;
    }
    Ok(())
}

/// Read one message. A lone `\` starts multi-line mode, ended by another
/// lone `\`. `None` at end of input.
pub async fn read_input<R, W>(
    lines: &mut Lines<R>,
    notifier: &mut Notifier<W>,
    private: bool,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let prompt = if private { "You (Private): " } else { "You: " };
    write_prompt(notifier, prompt, private)?;

    let Some(first) = lines.next_line().await? else {
        return Ok(None);
    };
    if first.trim() != MULTILINE_MARKER {
        return Ok(Some(clean_input(&first)));
    }

    notifier.dim("Multi-line mode. Enter a line containing only \\ to submit.")?;
    let mut buffer = Vec::new();
    loop {
        write!(notifier.out(), "... ")?;
        notifier.out().flush()?;
        match lines.next_line().await? {
            Some(line) if line.trim() == MULTILINE_MARKER => break,
            Some(line) => buffer.push(line),
            None => break,
        }
    }
    Ok(Some(clean_input(&buffer.join("\n"))))
}

fn write_prompt<W: Write>(notifier: &mut Notifier<W>, prompt: &str, private: bool) -> std::io::Result<()> {
    use crossterm::style::{Color, Stylize};
    let color = if private { Color::DarkYellow } else { Color::Cyan };
    write!(notifier.out(), "{}", prompt.bold().with(color))?;
    notifier.out().flush()
}

/// Read a password with terminal echo off. `None` when the user aborts with
/// Esc or Ctrl+C. Fails when stdin is not a terminal.
pub fn read_password() -> std::io::Result<Option<String>> {
    use crossterm::event::{self, Event};
    use crossterm::terminal;

    terminal::enable_raw_mode()?;
    let result = (|| -> std::io::Result<Option<String>> {
        let mut password = String::new();
        loop {
            if let Event::Key(key) = event::read()? {
                match password_key(&mut password, key) {
                    Some(true) => return Ok(Some(password)),
                    Some(false) => return Ok(None),
                    None => {}
                }
            }
        }
    })();
    terminal::disable_raw_mode()?;
    result
}

/// Apply one key press to `buffer`: `Some(true)` submits, `Some(false)`
/// aborts.
fn password_key(buffer: &mut String, key: crossterm::event::KeyEvent) -> Option<bool> {
    use crossterm::event::{KeyCode, KeyEventKind, KeyModifiers};

    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Enter => Some(true),
        KeyCode::Esc => Some(false),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(false),
        KeyCode::Backspace => {
            buffer.pop();
            None
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            None
        }
        _ => None,
    }
}

/// Send the current history to the chat's model and stream the answer.
/// Ctrl+C cancels the turn; any partial answer is kept.
pub async fn chat_turn<W: Write>(ctx: &mut Context<W>) -> anyhow::Result<()> {
    let model_path = ctx.chat.model_path.clone();
    let Some((provider, path)) = ctx.registry.for_model_path(&model_path) else {
        error!(model_path = model_path.as_str(), "provider not found");
        ctx.notifier
            .error(&format!("No provider found for model path: {model_path}"))?;
        return Ok(());
    };

    let client = provider.chat_client(&path.model_id, ctx.chat.user_model_settings.clone());
    let messages = ctx.chat.messages_to_talk();
    let options = ctx.run_options();
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    info!(model = model_path.as_str(), messages = messages.len(), "chat turn");

    let handle = tokio::spawn(async move { run_stream(client.as_ref(), messages, &options, tx).await });

    let mut answer = String::new();
    let mut interrupted = false;
    {
        let mut renderer = MessageRenderer::new(ctx.notifier.out());
        renderer.show_loading("Assistant is thinking")?;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if let StreamEvent::Content(text) = &event {
                            answer.push_str(text);
                        }
                        renderer.render_event(&event)?;
                    }
                    None => break,
                },
                _ = &mut ctrl_c => {
                    interrupted = true;
                    handle.abort();
                    break;
                }
            }
        }
        renderer.finish_message()?;
    }

    if interrupted {
        warn!("chat turn cancelled by user");
        ctx.notifier.warning("Cancelled.")?;
    } else {
        match handle.await {
            Ok(Ok(result)) => info!(rounds = result.usages.len(), "chat turn finished"),
            Ok(Err(e)) => {
                error!("chat turn failed: {e}");
                ctx.notifier.error(&format!("Error: {e}"))?;
            }
            Err(e) => {
                error!("chat task failed: {e}");
                ctx.notifier.error(&format!("Error: {e}"))?;
            }
        }
    }

    if !answer.is_empty() {
        if let Err(e) = ctx.chat.append_assistant_message(&answer, &ctx.store) {
            error!("failed to save chat: {e}");
            ctx.notifier.error(&format!("Failed to save chat: {e}"))?;
        }
    }
    Ok(())
}

/// Run until `/quit`, end of input or Ctrl+C at the prompt.
pub async fn run_repl<R, W>(ctx: &mut Context<W>, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    ctx.notifier
        .dim("Tip: Type '\\' for multi-line input, or just type your message.")?;
    let mut lines = input.lines();

    loop {
        let private = ctx.chat.is_private;
        let message = tokio::select! {
            read = read_input(&mut lines, &mut ctx.notifier, private) => read?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(message) = message else {
            ctx.notifier.plain("")?;
            break;
        };
        if message.is_empty() {
            continue;
        }
        if let Err(e) = append_history(&ctx.dirs.input_history(), &message) {
            warn!("failed to write input history: {e}");
        }

        match commands::parse(&message) {
            Some(Ok(command)) => {
                match commands::execute(ctx, command).await {
                    Ok(Outcome::Quit) => break,
                    Ok(Outcome::Handled) => {}
                    Err(e) => {
                        error!("command failed: {e:#}");
                        ctx.notifier.error(&format!("{e:#}"))?;
                    }
                }
                ctx.notifier.plain("")?;
                continue;
            }
            Some(Err(e)) => {
                ctx.notifier.error(&e.to_string())?;
                continue;
            }
            None => {}
        }

        if let Err(e) = ctx.chat.append_user_message(&message, &ctx.store) {
            error!("failed to save chat: {e}");
            ctx.notifier.error(&format!("Failed to save chat: {e}"))?;
        }
        chat_turn(ctx).await?;
        ctx.notifier.plain("")?;
    }
    info!("repl finished");
    Ok(())
}
