// Terminal rendering: streamed assistant messages and styled notifications.
//
// Both renderers write to any `Write` so tests can capture output in a Vec.

use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Color, Stylize};
use crossterm::terminal::{Clear, ClearType};

use gede_llm::{StreamEvent, Usage};

const TOOL_RESULT_PREVIEW: usize = 160;

// ---------------------------------------------------------------------------
// MessageRenderer
// ---------------------------------------------------------------------------

pub struct MessageRenderer<W: Write> {
    out: W,
    loading: bool,
    started: bool,
    last_kind: Option<&'static str>,
    usage: Option<Usage>,
}

impl<W: Write> MessageRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            loading: false,
            started: false,
            last_kind: None,
            usage: None,
        }
    }

    /// Transient status line, cleared by the first event.
    pub fn show_loading(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "{}", format!("{text}...").dim())?;
        self.out.flush()?;
        self.loading = true;
        Ok(())
    }

    fn stop_loading(&mut self) -> io::Result<()> {
        if self.loading {
            queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            self.loading = false;
        }
        Ok(())
    }

    pub fn render_event(&mut self, event: &StreamEvent) -> io::Result<()> {
        // Usage is summarised at the end, not shown inline.
        if let StreamEvent::Usage(usage) = event {
            self.add_usage(usage);
            return Ok(());
        }

        if !self.started {
            self.stop_loading()?;
            write!(self.out, "{}", "Assistant: ".bold().with(Color::Cyan))?;
            self.started = true;
        }
        let new_section = self.last_kind != Some(event.kind());
        self.last_kind = Some(event.kind());

        match event {
            StreamEvent::Reasoning(text) => {
                if new_section {
                    writeln!(self.out)?;
                    writeln!(self.out, "{}", "[Reasoning]".dim())?;
                }
                write!(self.out, "{}", text.as_str().dim())?;
            }
            StreamEvent::Content(text) => {
                if new_section {
                    writeln!(self.out)?;
                }
                write!(self.out, "{text}")?;
            }
            StreamEvent::ToolCallStart { name, arguments } => {
                writeln!(self.out)?;
                write!(
                    self.out,
                    "{}",
                    format!("🧰 {name}({arguments})").with(Color::Yellow)
                )?;
            }
            StreamEvent::ToolCallResult { name, result } => {
                writeln!(self.out)?;
                write!(
                    self.out,
                    "{}",
                    format!("   {name} → {}", preview(result)).dim()
                )?;
            }
            StreamEvent::Usage(_) => {}
        }
        self.out.flush()
    }

    fn add_usage(&mut self, usage: &Usage) {
        let total = self.usage.get_or_insert_with(Usage::default);
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
        if let Some(r) = usage.reasoning_tokens {
            *total.reasoning_tokens.get_or_insert(0) += r;
        }
    }

    /// End the message: newline, token summary, state reset.
    pub fn finish_message(&mut self) -> io::Result<()> {
        self.stop_loading()?;
        if self.started {
            writeln!(self.out)?;
        }
        if let Some(usage) = self.usage.take() {
            let mut line = format!(
                "[tokens: prompt {}, completion {}, total {}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
            if let Some(r) = usage.reasoning_tokens {
                line.push_str(&format!(", reasoning {r}"));
            }
            line.push(']');
            writeln!(self.out, "{}", line.dim())?;
        }
        self.out.flush()?;
        self.started = false;
        self.last_kind = None;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// First line of a tool result, shortened.
fn preview(result: &str) -> String {
    let first = result.lines().next().unwrap_or_default();
    let mut short: String = first.chars().take(TOOL_RESULT_PREVIEW).collect();
    if short.len() < first.len() || result.lines().nth(1).is_some() {
        short.push('…');
    }
    short
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Styled one-line notifications and boxed panels.
pub struct Notifier<W: Write> {
    out: W,
}

impl<W: Write> Notifier<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn out(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn plain(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    pub fn info(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text.with(Color::Cyan).dim())?;
        self.out.flush()
    }

    pub fn warning(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text.with(Color::Magenta))?;
        self.out.flush()
    }

    pub fn error(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text.with(Color::Red).bold())?;
        self.out.flush()
    }

    pub fn dim(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text.dim())?;
        self.out.flush()
    }

    /// Box `body` under a title.
    pub fn panel(&mut self, title: &str, body: &str) -> io::Result<()> {
        let lines: Vec<&str> = body.lines().collect();
        let width = lines
            .iter()
            .map(|l| l.chars().count())
            .chain(std::iter::once(title.chars().count() + 2))
            .max()
            .unwrap_or(0);

        let top_fill = width - title.chars().count();
        let mut out = format!("┌ {title} {}┐\n", "─".repeat(top_fill));
        for line in &lines {
            let pad = width - line.chars().count();
            out.push_str(&format!("│ {line}{} │\n", " ".repeat(pad)));
        }
        out.push_str(&format!("└{}┘", "─".repeat(width + 2)));

        writeln!(self.out, "{}", out.with(Color::Cyan))?;
        self.out.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
