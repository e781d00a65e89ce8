use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use crossterm::style::Stylize;
use openice_shared::{ChatMessage, Role, TextOption, Transcript};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use uuid::Uuid;

use crate::client::MessageTransport;
use crate::error::ClientError;
use crate::session::{AskOutcome, ChatSession};

/// Prints a transcript incrementally as it changes.
///
/// Only what has not been printed yet is written: new entries, and for the
/// assistant message being streamed, the text appended since the last call.
pub struct Renderer {
    styled: bool,
    /// Entries before this index are final and already printed.
    settled: usize,
    /// Bytes of content printed per text message.
    printed: HashMap<Uuid, usize>,
    /// Loading entries (and their error state) already announced.
    announced: HashMap<Uuid, bool>,
    /// Whether the cursor sits mid-line after streamed text.
    open_line: bool,
    /// Echo user messages, used when replaying history.
    show_user: bool,
}

impl Renderer {
    pub fn new(styled: bool) -> Self {
        Self {
            styled,
            settled: 0,
            printed: HashMap::new(),
            announced: HashMap::new(),
            open_line: false,
            show_user: true,
        }
    }

    /// Stops echoing user messages. Interactive input is already on screen.
    pub fn hide_user_messages(mut self) -> Self {
        self.show_user = false;
        self
    }

    pub fn render(&mut self, transcript: &Transcript, out: &mut impl Write) -> io::Result<()> {
        // A retry rolls the transcript back past entries already settled.
        if self.settled >= transcript.len() {
            self.settled = transcript.len().saturating_sub(1);
        }
        for message in transcript.iter().skip(self.settled) {
            self.render_message(message, out)?;
        }
        // The last entry can still grow or be replaced.
        self.settled = self.settled.max(transcript.len().saturating_sub(1));
        out.flush()
    }

    /// Ends the turn: closes an open line and lists any options offered by
    /// the final message.
    pub fn finish(&mut self, transcript: &Transcript, out: &mut impl Write) -> io::Result<()> {
        self.render(transcript, out)?;
        self.close_line(out)?;
        if let Some(options) = pending_options(transcript) {
            self.render_options(options, out)?;
        }
        self.settled = transcript.len();
        out.flush()
    }

    pub fn render_error(&mut self, err: &ClientError, out: &mut impl Write) -> io::Result<()> {
        self.close_line(out)?;
        let title = format!("✗ {}", err.title());
        writeln!(out, "{}", self.paint(&title, |s| s.red().bold().to_string()))?;
        writeln!(out, "  {}", err.description())?;
        out.flush()
    }

    fn render_message(&mut self, message: &Arc<ChatMessage>, out: &mut impl Write) -> io::Result<()> {
        match message.as_ref() {
            ChatMessage::Text(text) => {
                if text.meta.role == Role::User && !self.show_user {
                    return Ok(());
                }
                let printed = self.printed.get(&text.meta.uuid).copied();
                let start = match printed {
                    Some(len) => len,
                    None => {
                        self.close_line(out)?;
                        write!(out, "{} ", self.label(text.meta.role))?;
                        0
                    }
                };
                match text.content.get(start..) {
                    Some("") if printed.is_some() => return Ok(()),
                    Some(rest) => write!(out, "{}", rest)?,
                    None => {}
                }
                self.printed.insert(text.meta.uuid, text.content.len());
                self.open_line = true;
            }
            ChatMessage::Loading(loading) => {
                if self.announced.get(&loading.meta.uuid) == Some(&loading.error) {
                    return Ok(());
                }
                self.close_line(out)?;
                let name = loading.name.as_deref().unwrap_or("response");
                let line = if loading.error {
                    self.paint(&format!("✗ {} failed", name), |s| s.red().to_string())
                } else if loading.complete {
                    self.paint(&format!("✓ {}", name), |s| s.dark_grey().to_string())
                } else {
                    self.paint(&format!("… waiting for {}", name), |s| s.dark_grey().to_string())
                };
                writeln!(out, "{}", line)?;
                self.announced.insert(loading.meta.uuid, loading.error);
            }
            ChatMessage::Search(search) => {
                if self.announced.insert(search.meta.uuid, false).is_some() {
                    return Ok(());
                }
                self.close_line(out)?;
                writeln!(out, "🔎 {}", search.query)?;
            }
        }
        Ok(())
    }

    fn render_options(&self, options: &[TextOption], out: &mut impl Write) -> io::Result<()> {
        for (i, option) in options.iter().enumerate() {
            let number = format!("[{}]", i + 1);
            writeln!(
                out,
                "  {} {} {}",
                self.paint(&number, |s| s.cyan().to_string()),
                option.title,
                option.subtitle
            )?;
        }
        Ok(())
    }

    fn close_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.open_line {
            writeln!(out)?;
            self.open_line = false;
        }
        Ok(())
    }

    fn label(&self, role: Role) -> String {
        match role {
            Role::User => self.paint("You:", |s| s.green().bold().to_string()),
            Role::Assistant => self.paint("Assistant:", |s| s.cyan().bold().to_string()),
        }
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> String) -> String {
        if self.styled {
            style(text)
        } else {
            text.to_string()
        }
    }
}

/// Options of the last message, if it is an assistant text offering any.
fn pending_options(transcript: &Transcript) -> Option<&[TextOption]> {
    transcript
        .last()
        .and_then(|m| m.as_text())
        .filter(|t| t.meta.role == Role::Assistant && !t.options.is_empty())
        .map(|t| t.options.as_slice())
}

/// A line typed at the interactive prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Quit,
    Blank,
    Send(String),
}

/// Interprets a prompt line. `retry` resends the message of the last failed
/// turn, and a bare option number picks that option.
pub fn read_input(input: &str, transcript: &Transcript, last_failed: Option<&str>) -> Input {
    let input = input.trim();
    if input.eq_ignore_ascii_case("quit") {
        return Input::Quit;
    }
    if input.is_empty() {
        return Input::Blank;
    }
    match last_failed {
        Some(message) if input.eq_ignore_ascii_case("retry") => Input::Send(message.to_string()),
        _ => Input::Send(resolve_input(input, transcript)),
    }
}

/// Maps a bare option number typed by the user to that option's prompt.
pub fn resolve_input(input: &str, transcript: &Transcript) -> String {
    let input = input.trim();
    let choice = pending_options(transcript).and_then(|options| {
        let index = input.parse::<usize>().ok()?.checked_sub(1)?;
        options.get(index)
    });
    match choice {
        Some(option) => option.value.clone(),
        None => input.to_string(),
    }
}

pub async fn single_message<T: MessageTransport>(session: &ChatSession<T>, message: &str) -> Result<()> {
    let mut renderer = Renderer::new(true).hide_user_messages();
    let mut stdout = io::stdout();
    renderer.settled = session.state().transcript.len();

    run_turn(session, message, &mut renderer, &mut stdout).await?;
    Ok(())
}

pub async fn interactive_chat<T: MessageTransport>(session: &ChatSession<T>) -> Result<()> {
    println!("Envoy chat: {}", session.chat().title().bold());
    if let Some(description) = session.chat().description.as_deref() {
        println!("{}", description.dark_grey());
    }
    println!("Type 'quit' to exit, Ctrl+C cancels a reply.\n");

    let mut renderer = Renderer::new(true);
    let mut stdout = io::stdout();
    renderer.finish(&session.state().transcript, &mut stdout)?;
    let mut renderer = renderer.hide_user_messages();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_failed: Option<String> = None;
    loop {
        print!("\n{} ", "You:".green().bold());
        stdout.flush()?;

        let input = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        let input = input.trim();

        let message = match read_input(input, &session.state().transcript, last_failed.as_deref()) {
            Input::Quit => break,
            Input::Blank => continue,
            Input::Send(message) => message,
        };
        if message != input {
            println!("{}", message.as_str().dark_grey());
        }
        println!();
        match run_turn(session, &message, &mut renderer, &mut stdout).await? {
            AskOutcome::Failed(_) => {
                println!("{}", "Type 'retry' to send it again.".dark_grey());
                last_failed = Some(message);
            }
            AskOutcome::Completed | AskOutcome::Cancelled => last_failed = None,
            AskOutcome::Busy | AskOutcome::Empty => {}
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn run_turn<T: MessageTransport>(
    session: &ChatSession<T>,
    message: &str,
    renderer: &mut Renderer,
    out: &mut impl Write,
) -> Result<AskOutcome> {
    let mut updates = session.subscribe();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ask = session.ask_with_cancel(message, cancel_rx);
    tokio::pin!(ask);

    let outcome = loop {
        tokio::select! {
            outcome = &mut ask => break outcome,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let transcript = updates.borrow_and_update().transcript.clone();
                    renderer.render(&transcript, out)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = cancel_tx.send(true);
            }
        }
    };

    let state = session.state();
    renderer.finish(&state.transcript, out)?;
    match &outcome {
        AskOutcome::Failed(err) => renderer.render_error(err, out)?,
        AskOutcome::Cancelled => writeln!(out, "{}", "(cancelled)".dark_grey())?,
        AskOutcome::Busy => writeln!(out, "Still waiting for the previous reply.")?,
        AskOutcome::Completed | AskOutcome::Empty => {}
    }
    Ok(outcome)
}
