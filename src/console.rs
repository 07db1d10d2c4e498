//! Interactive chat console: stdin lines in, reconciled transcript out.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{self, ApiClient};
use crate::protocol::SessionEvent;
use crate::reconciler::turn::{CommandEntry, ContentBlock, StepStatus};
use crate::reconciler::{
    ConnectionStatus, Effect, RenderEffects, SendError, SessionState, TurnId,
};
use crate::render::{self, RenderSurface};
use crate::transport::{SessionTransport, TransportEvent};

const HELP: &[&str] = &[
    "/approve, y   approve the pending tool call",
    "/reject, n    reject the pending tool call",
    "/full         show the last truncated result in full",
    "/status       connection and integration status",
    "/reconnect    reopen the session channel",
    "/new          start a new conversation",
    "/quit         leave",
];

pub struct ChatOptions {
    pub conversation_id: Option<String>,
    pub ws_base: String,
    pub connect_timeout: Duration,
}

// ---------------------------------------------------------------------------
// Terminal printer
// ---------------------------------------------------------------------------

/// Append-only surface: prints each effect once, as it happens.
pub struct TerminalPrinter<W: Write> {
    out: W,
    /// A streamed text block is still being written on the current line.
    mid_line: bool,
    /// The text block the last stream output belongs to.
    streaming: Option<(TurnId, usize)>,
    /// Command entry statuses already printed, per (turn, block).
    printed_commands: HashMap<(TurnId, usize), Vec<StepStatus>>,
}

impl<W: Write> TerminalPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            mid_line: false,
            streaming: None,
            printed_commands: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_line(&mut self) -> Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }

    pub fn print_lines<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.end_line()?;
        for line in lines {
            writeln!(self.out, "{}", line.as_ref())?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Continue a text block; a fresh line gets the indent back.
    fn resume_stream(&mut self, key: (TurnId, usize), delta: &str) -> Result<()> {
        if !self.mid_line || self.streaming != Some(key) {
            self.end_line()?;
            write!(self.out, "  ")?;
            self.streaming = Some(key);
        }
        self.write_stream(delta)
    }

    fn write_stream(&mut self, text: &str) -> Result<()> {
        write!(self.out, "{}", text.replace('\n', "\n  "))?;
        self.out.flush()?;
        self.mid_line = true;
        Ok(())
    }

    /// New command lines and newly finished outputs since the last call.
    fn command_delta(
        &mut self,
        key: (TurnId, usize),
        entries: &[CommandEntry],
    ) -> Vec<String> {
        let printed = self.printed_commands.entry(key).or_default();
        let mut lines = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if i >= printed.len() {
                lines.push(render::render_command_line(entry));
                printed.push(StepStatus::InProgress);
            }
            if printed[i] == StepStatus::InProgress && entry.status != StepStatus::InProgress {
                lines.extend(render::render_command_output(entry));
                printed[i] = entry.status;
            }
        }
        lines
    }

    fn print_block(&mut self, state: &SessionState, turn: TurnId, idx: usize, appended: bool) -> Result<()> {
        let Some(block) = state.turn(turn).and_then(|t| t.blocks.get(idx)) else {
            return Ok(());
        };
        match block {
            ContentBlock::Text { text } if appended => {
                self.end_line()?;
                write!(self.out, "⏺ ")?;
                self.streaming = Some((turn, idx));
                self.write_stream(text)
            }
            ContentBlock::CommandGroup { title, entries } => {
                let mut lines = Vec::new();
                if appended {
                    lines.push(format!("  ▣ {title}"));
                }
                lines.extend(self.command_delta((turn, idx), entries));
                self.print_lines(lines)
            }
            ContentBlock::Approval(approval) if !appended => {
                self.print_lines([render::render_approval_outcome(approval.outcome)])
            }
            _ if appended => self.print_lines(render::render_block(block)),
            _ => Ok(()),
        }
    }
}

impl<W: Write> RenderSurface for TerminalPrinter<W> {
    fn apply(&mut self, state: &SessionState, effects: &[Effect]) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::TranscriptReset => {
                    self.end_line()?;
                    self.streaming = None;
                    self.printed_commands.clear();
                }
                Effect::EntryAppended(idx) => {
                    if let Some(entry) = state.transcript().get(*idx) {
                        self.print_lines(render::render_entry(entry))?;
                    }
                }
                Effect::BlockAppended { turn, block } => self.print_block(state, *turn, *block, true)?,
                Effect::BlockUpdated { turn, block } => self.print_block(state, *turn, *block, false)?,
                Effect::TextAppended { turn, block, delta } => {
                    self.resume_stream((*turn, *block), delta)?
                }
                Effect::StatusChanged {
                    status: Some(status),
                    ..
                } => self.print_lines([render::render_status(status)])?,
                Effect::TurnClosed(_) | Effect::InputEnabled(true) => self.end_line()?,
                Effect::Connection(status) => {
                    self.print_lines([format!("[{}]", render::connection_label(status))])?
                }
                Effect::ToolIndicator(Some(indicator)) => {
                    self.print_lines([render::render_tool_indicator(indicator)])?
                }
                Effect::Integration {
                    integration,
                    status,
                } => self.print_lines([format!("  ● {}: {status}", integration.label())])?,
                Effect::TurnOpened(_)
                | Effect::StatusChanged { status: None, .. }
                | Effect::ToolIndicator(None)
                | Effect::ApprovalRequested { .. }
                | Effect::InputEnabled(false) => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

pub struct Console<W: Write> {
    client: ApiClient,
    ws_base: String,
    connect_timeout: Duration,
    conversation_id: String,
    state: SessionState,
    printer: TerminalPrinter<W>,
    transport: Option<SessionTransport>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<W: Write> Console<W> {
    pub fn new(client: ApiClient, options: ChatOptions, out: W) -> Self {
        Self {
            client,
            ws_base: options.ws_base,
            connect_timeout: options.connect_timeout,
            conversation_id: options
                .conversation_id
                .unwrap_or_else(client::new_conversation_id),
            state: SessionState::new(),
            printer: TerminalPrinter::new(out),
            transport: None,
            events: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.printer.into_inner()
    }

    fn show(&mut self, effects: RenderEffects) -> Result<()> {
        self.printer.apply(&self.state, &effects)
    }

    fn say(&mut self, line: impl AsRef<str>) -> Result<()> {
        self.printer.print_lines([line])
    }

    /// Load stored history for the current conversation, if any.
    pub async fn load_history(&mut self) -> Result<()> {
        match self.client.history(&self.conversation_id).await {
            Ok(history) => {
                let fx = self.state.load_history(history);
                self.show(fx)
            }
            Err(e) => {
                warn!("Failed to load history for {}: {:#}", self.conversation_id, e);
                self.say(format!("Could not load history: {e:#}"))
            }
        }
    }

    /// Open the session channel, closing any previous one first.
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(old) = self.transport.take() {
            old.close();
        }
        self.events = None;

        let fx = self.state.on_connection(ConnectionStatus::Connecting);
        self.show(fx)?;
        match SessionTransport::connect(&self.ws_base, &self.conversation_id, self.connect_timeout).await {
            Ok((transport, events)) => {
                self.transport = Some(transport);
                self.events = Some(events);
                let fx = self.state.on_connection(ConnectionStatus::Connected);
                self.show(fx)
            }
            Err(e) => {
                let fx = self.state.on_connection(ConnectionStatus::Failed(e.to_string()));
                self.show(fx)?;
                self.say("Messages will be sent over REST until /reconnect succeeds.")
            }
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        let fx = match event {
            TransportEvent::Frame(frame) => self.state.on_frame(&frame),
            TransportEvent::Closed { reason } => {
                if let Some(reason) = reason {
                    info!("Session channel closed: {}", reason);
                }
                self.transport = None;
                self.events = None;
                self.state.on_connection(ConnectionStatus::Disconnected)
            }
            TransportEvent::Failed { reason } => {
                self.transport = None;
                self.events = None;
                self.state.on_connection(ConnectionStatus::Failed(reason))
            }
        };
        self.show(fx)
    }

    /// Handle one input line. Returns `true` when the user asked to quit.
    pub async fn handle_line(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }
        let pending = self.state.approval_pending();

        match line {
            "/quit" | "/exit" => return Ok(true),
            "/help" => self.printer.print_lines(HELP)?,
            "/approve" => self.resolve_approval(true)?,
            "/reject" => self.resolve_approval(false)?,
            "y" | "yes" if pending => self.resolve_approval(true)?,
            "n" | "no" if pending => self.resolve_approval(false)?,
            "/full" => self.show_full_result()?,
            "/status" => self.show_status()?,
            "/reconnect" => self.connect().await?,
            "/new" => {
                self.conversation_id = client::new_conversation_id();
                let fx = self.state.reset();
                self.show(fx)?;
                self.say(format!("New conversation {}", self.conversation_id))?;
                self.connect().await?;
            }
            cmd if cmd.starts_with('/') => self.say(format!("Unknown command {cmd}; /help lists commands"))?,
            _ if pending => self.say("Answer the pending approval first: y or n")?,
            text => self.send_message(text).await?,
        }
        Ok(false)
    }

    fn resolve_approval(&mut self, approved: bool) -> Result<()> {
        let Some(transport) = self.transport.as_ref() else {
            return self.say("Not connected; /reconnect to answer the approval");
        };
        match self.state.resolve_approval(approved, transport) {
            Ok(fx) => self.show(fx),
            Err(SendError::NoPendingApproval) => self.say("No approval is pending"),
            Err(e) => self.say(format!("Could not send the answer: {e}")),
        }
    }

    async fn send_message(&mut self, text: &str) -> Result<()> {
        if let Some(transport) = self.transport.as_ref().filter(|t| t.is_open()) {
            return match self.state.send_user_message(text, transport) {
                Ok(fx) => self.show(fx),
                Err(SendError::InputDisabled) => {
                    self.say("Still working on the previous message; please wait")
                }
                Err(e) => self.say(format!("Could not send: {e}")),
            };
        }

        // Channel down: one-shot REST exchange.
        let fx = match self.state.begin_user_turn(text) {
            Ok(fx) => fx,
            Err(e) => return self.say(e.to_string()),
        };
        self.show(fx)?;
        let fx = match self.client.send_chat(text, &self.conversation_id).await {
            Ok(response) => {
                if response.conversation_id != self.conversation_id {
                    info!("Backend moved conversation to {}", response.conversation_id);
                    self.conversation_id = response.conversation_id.clone();
                }
                self.state.apply_chat_response(response)
            }
            Err(e) => {
                warn!("REST chat failed: {:#}", e);
                self.state.on_event(SessionEvent::Error {
                    error: Some(format!("{e:#}")),
                    message: None,
                })
            }
        };
        self.show(fx)
    }

    fn show_full_result(&mut self) -> Result<()> {
        let Some((caption, payload)) = self.state.latest_truncated_result() else {
            return self.say("No truncated result to show");
        };
        let mut lines = vec![format!("── {caption} ──")];
        lines.extend(payload.full().lines().map(String::from));
        self.printer.print_lines(lines)
    }

    fn show_status(&mut self) -> Result<()> {
        let mut lines = vec![
            format!("conversation: {}", self.conversation_id),
            format!("server:       {}", self.client.base_url()),
            format!("channel:      {}", render::connection_label(self.state.connection())),
            format!("turns:        {}", self.state.turn_count()),
            format!(
                "input:        {}",
                if self.state.input_enabled() { "ready" } else { "waiting for the agent" }
            ),
        ];
        if let Some(transport) = &self.transport {
            lines.push(format!("session url:  {}", transport.url()));
        }
        if let Some((_, _, approval)) = self.state.pending_approval() {
            lines.push(format!(
                "approval:     {} ({} events waiting)",
                approval.tool,
                self.state.deferred_len()
            ));
        }
        if let Some(indicator) = self.state.tool_indicator() {
            lines.push(format!("tool:         {indicator}"));
        }
        lines.push("integrations:".to_string());
        lines.extend(render::render_integrations(self.state.integrations()));
        self.printer.print_lines(lines)
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.events = None;
    }
}

/// Run the interactive console until `/quit` or end of input.
pub async fn run_chat(client: ApiClient, options: ChatOptions) -> Result<()> {
    let resume = options.conversation_id.is_some();
    let mut console = Console::new(client, options, std::io::stdout());
    info!("Starting chat console for {}", console.conversation_id());

    console.say(format!(
        "autonomo: conversation {} on {}. /help lists commands.",
        console.conversation_id(),
        console.client.base_url()
    ))?;
    if resume {
        console.load_history().await?;
    }
    console.connect().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if console.handle_line(&line).await? {
                        break;
                    }
                }
                None => break,
            },
            event = next_event(&mut console.events) => match event {
                Some(event) => console.handle_transport_event(event)?,
                None => {
                    console.events = None;
                    let fx = console.state.on_connection(ConnectionStatus::Disconnected);
                    console.show(fx)?;
                }
            },
        }
    }

    console.close();
    info!("Chat console closed");
    Ok(())
}
