//! Stream reconciler: folds the session event stream into a transcript.
//!
//! One `SessionState` per conversation. Events are applied strictly in
//! delivery order; each call returns the render effects it caused so a
//! surface can update incrementally without diffing the whole transcript.

pub mod format;
pub mod turn;


use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{ChatResponse, ClientMessage, History, SessionEvent};
use crate::transport::{MessageSink, TransportError};
use format::Integration;
use turn::{ApprovalBlock, ApprovalOutcome, ContentBlock, ResultPayload, Turn, TurnState};

/// Index of an entry in the transcript.
pub type TurnId = usize;

pub type RenderEffects = Vec<Effect>;

const DEFAULT_THINKING: &str = "Thinking";
const APPROVAL_RESUME_STATUS: &str = "Processing your response...";

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    User { text: String },
    Assistant(Turn),
    /// Stored non-chat messages (tool output, system notes) from history.
    Note { role: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

/// What changed, in the order it changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    TranscriptReset,
    EntryAppended(TurnId),
    TurnOpened(TurnId),
    BlockAppended { turn: TurnId, block: usize },
    BlockUpdated { turn: TurnId, block: usize },
    TextAppended { turn: TurnId, block: usize, delta: String },
    StatusChanged { turn: TurnId, status: Option<String> },
    ToolIndicator(Option<String>),
    ApprovalRequested { turn: TurnId, block: usize },
    TurnClosed(TurnId),
    InputEnabled(bool),
    Connection(ConnectionStatus),
    Integration { integration: Integration, status: String },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("input is disabled until the current turn finishes")]
    InputDisabled,
    #[error("no approval is pending")]
    NoPendingApproval,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct SessionState {
    transcript: Vec<Entry>,
    current_turn: Option<TurnId>,
    /// Set after a user send and after `done`: the next content event must
    /// open a fresh turn even though the previous one is still on display.
    is_new_turn: bool,
    input_enabled: bool,
    tool_indicator: Option<String>,
    connection: ConnectionStatus,
    /// Events that arrived while an approval was pending, in arrival order.
    deferred: VecDeque<SessionEvent>,
    integrations: BTreeMap<Integration, String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            transcript: Vec::new(),
            current_turn: None,
            is_new_turn: true,
            input_enabled: true,
            tool_indicator: None,
            connection: ConnectionStatus::Idle,
            deferred: VecDeque::new(),
            integrations: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn transcript(&self) -> &[Entry] {
        &self.transcript
    }

    pub fn turn(&self, id: TurnId) -> Option<&Turn> {
        match self.transcript.get(id)? {
            Entry::Assistant(turn) => Some(turn),
            _ => None,
        }
    }

    fn turn_mut(&mut self, id: TurnId) -> Option<&mut Turn> {
        match self.transcript.get_mut(id)? {
            Entry::Assistant(turn) => Some(turn),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn current_turn(&self) -> Option<TurnId> {
        self.current_turn
    }

    #[cfg(test)]
    pub fn is_new_turn(&self) -> bool {
        self.is_new_turn
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn tool_indicator(&self) -> Option<&str> {
        self.tool_indicator.as_deref()
    }

    pub fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn integrations(&self) -> &BTreeMap<Integration, String> {
        &self.integrations
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn turn_count(&self) -> usize {
        self.transcript
            .iter()
            .filter(|e| matches!(e, Entry::Assistant(_)))
            .count()
    }

    pub fn pending_approval(&self) -> Option<(TurnId, usize, &ApprovalBlock)> {
        let id = self.current_turn?;
        let turn = self.turn(id)?;
        if !turn.is_open() {
            return None;
        }
        turn.pending_approval().map(|(block, approval)| (id, block, approval))
    }

    pub fn approval_pending(&self) -> bool {
        self.pending_approval().is_some()
    }

    /// Most recent result whose display was truncated, with a caption.
    pub fn latest_truncated_result(&self) -> Option<(String, &ResultPayload)> {
        for entry in self.transcript.iter().rev() {
            let Entry::Assistant(turn) = entry else {
                continue;
            };
            for block in turn.blocks.iter().rev() {
                match block {
                    ContentBlock::ToolResult { tool, payload, .. } if payload.is_truncated() => {
                        return Some((format!("Result: {tool}"), payload));
                    }
                    ContentBlock::CommandGroup { entries, .. } => {
                        let hit = entries.iter().rev().find_map(|e| {
                            e.output
                                .as_ref()
                                .filter(|p| p.is_truncated())
                                .map(|p| (format!("$ {}", e.command), p))
                        });
                        if hit.is_some() {
                            return hit;
                        }
                    }
                    _ => {}
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------

    /// Parse and apply one raw channel frame. Protocol anomalies are
    /// logged and dropped without touching state.
    pub fn on_frame(&mut self, frame: &str) -> RenderEffects {
        match SessionEvent::parse(frame) {
            Ok(event) => self.on_event(event),
            Err(e) => {
                warn!(error = %e, "Dropping session frame");
                Vec::new()
            }
        }
    }

    pub fn on_event(&mut self, event: SessionEvent) -> RenderEffects {
        let mut fx = Vec::new();

        if self.approval_pending() && !matches!(event, SessionEvent::Connected { .. }) {
            if let SessionEvent::ApprovalRequired { tool, .. } = &event {
                warn!(tool = %tool, "approval_required while another approval is pending; ignoring");
                return fx;
            }
            debug!(kind = event.kind(), "Deferring event until approval is resolved");
            self.deferred.push_back(event);
            return fx;
        }

        self.apply(event, &mut fx);
        fx
    }

    fn apply(&mut self, event: SessionEvent, fx: &mut RenderEffects) {
        match event {
            SessionEvent::Connected { conversation_id, .. } => {
                debug!(conversation_id = ?conversation_id, "Session channel confirmed");
                self.set_connection(ConnectionStatus::Connected, fx);
            }
            SessionEvent::Thinking { message, content } => {
                let id = self.ensure_turn(fx);
                let status = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_THINKING.to_string());
                if let Some(text) = content.filter(|c| !c.trim().is_empty()) {
                    self.push_block(id, ContentBlock::Thought { text }, fx);
                }
                self.set_status(id, Some(status), fx);
            }
            SessionEvent::ToolCall { tool, arguments, .. } => {
                let id = self.ensure_turn(fx);
                self.set_tool_indicator(Some(format!("Executing: {tool}")), fx);
                if format::is_command_tool(&tool, &arguments) {
                    let command = format::command_of(&arguments).unwrap_or("unknown").to_string();
                    let Some(turn) = self.turn_mut(id) else { return };
                    let (block, created) = turn.push_command(&tool, &command);
                    fx.push(if created {
                        Effect::BlockAppended { turn: id, block }
                    } else {
                        Effect::BlockUpdated { turn: id, block }
                    });
                } else {
                    let summary = format::args_summary(&arguments);
                    self.push_block(
                        id,
                        ContentBlock::ToolCall {
                            tool,
                            arguments,
                            summary,
                            status: turn::StepStatus::InProgress,
                        },
                        fx,
                    );
                }
            }
            SessionEvent::ApprovalRequired {
                tool,
                arguments,
                message,
                ..
            } => {
                let id = self.ensure_turn(fx);
                self.set_status(id, None, fx);
                let Some(turn) = self.turn_mut(id) else { return };
                let block = turn.push_approval(&tool, arguments, message);
                info!(tool = %tool, "Approval required");
                fx.push(Effect::BlockAppended { turn: id, block });
                fx.push(Effect::ApprovalRequested { turn: id, block });
            }
            SessionEvent::ToolResult {
                tool,
                success,
                result,
                error,
                ..
            } => self.apply_tool_result(tool, success, result, error, fx),
            SessionEvent::MessageChunk { content } => {
                let id = self.ensure_turn(fx);
                self.set_status(id, None, fx);
                let Some(turn) = self.turn_mut(id) else { return };
                let (block, created) = turn.append_text(&content);
                fx.push(if created {
                    Effect::BlockAppended { turn: id, block }
                } else {
                    Effect::TextAppended {
                        turn: id,
                        block,
                        delta: content,
                    }
                });
            }
            SessionEvent::Done { iterations } => {
                self.set_tool_indicator(None, fx);
                if let Some(id) = self.open_turn_id() {
                    self.set_status(id, None, fx);
                    if let Some(turn) = self.turn_mut(id) {
                        turn.close(TurnState::Closed);
                    }
                    self.is_new_turn = true;
                    fx.push(Effect::TurnClosed(id));
                    debug!(turn = id, iterations = ?iterations, "Turn complete");
                }
                self.set_input_enabled(true, fx);
            }
            SessionEvent::Error { error, message } => {
                let text = error
                    .or(message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!(error = %text, "Agent reported an error");
                self.set_tool_indicator(None, fx);
                let id = match self.open_turn_id() {
                    Some(id) => id,
                    None => self.open_turn(fx),
                };
                self.set_status(id, None, fx);
                self.push_block(id, ContentBlock::Error { message: text }, fx);
                if let Some(turn) = self.turn_mut(id) {
                    turn.close(TurnState::Failed);
                }
                fx.push(Effect::TurnClosed(id));
                self.set_input_enabled(true, fx);
            }
        }
    }

    fn apply_tool_result(
        &mut self,
        tool: Option<String>,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
        fx: &mut RenderEffects,
    ) {
        let tool = tool
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "tool".to_string());
        let id = self.ensure_turn(fx);
        self.set_status(id, None, fx);
        self.set_tool_indicator(None, fx);

        let Some(turn) = self.turn_mut(id) else { return };
        let mut command = None;

        if let Some((group, entry)) = turn.find_running_command(&tool) {
            let output = format::command_output(success, result.as_ref(), error.as_deref());
            if let Some(done) = turn.complete_command(group, entry, success, output) {
                command = Some(done.command.clone());
            }
            fx.push(Effect::BlockUpdated { turn: id, block: group });
        } else {
            if let Some(block) = turn.complete_tool_call(&tool, success) {
                fx.push(Effect::BlockUpdated { turn: id, block });
            }
            let report = result
                .as_ref()
                .filter(|_| success)
                .and_then(|r| format::structured_report(&tool, r));
            let block = match report {
                Some(report) => ContentBlock::Report(report),
                None => ContentBlock::ToolResult {
                    tool: tool.clone(),
                    success,
                    payload: ResultPayload::new(format::generic_result(
                        success,
                        result.as_ref(),
                        error.as_deref(),
                    )),
                },
            };
            self.push_block(id, block, fx);
        }

        if !success {
            debug!(tool = %tool, error = ?error, "Tool reported failure");
            return;
        }
        if let Some((integration, status)) =
            format::integration_status(&tool, command.as_deref(), result.as_ref())
        {
            self.integrations.insert(integration, status.clone());
            fx.push(Effect::Integration {
                integration,
                status,
            });
        }
    }

    // ------------------------------------------------------------------
    // Caller-initiated operations
    // ------------------------------------------------------------------

    /// Record a user message and hand it to the channel. A failed send
    /// surfaces as an error turn and a connection change; input is re-enabled.
    pub fn send_user_message(
        &mut self,
        text: &str,
        sink: &dyn MessageSink,
    ) -> Result<RenderEffects, SendError> {
        let mut fx = self.begin_user_turn(text)?;
        if fx.is_empty() {
            return Ok(fx);
        }
        if let Err(e) = sink.send(&ClientMessage::user(text.trim())) {
            warn!(error = %e, "Failed to send user message");
            self.set_connection(ConnectionStatus::Disconnected, &mut fx);
            fx.extend(self.on_event(SessionEvent::Error {
                error: Some(format!("Failed to send message: {e}")),
                message: None,
            }));
        }
        Ok(fx)
    }

    /// State transition for a new user message, without sending it.
    /// Blank input is a no-op.
    pub fn begin_user_turn(&mut self, text: &str) -> Result<RenderEffects, SendError> {
        let text = text.trim();
        let mut fx = Vec::new();
        if text.is_empty() {
            return Ok(fx);
        }
        if !self.input_enabled || self.approval_pending() {
            return Err(SendError::InputDisabled);
        }
        self.transcript.push(Entry::User {
            text: text.to_string(),
        });
        fx.push(Effect::EntryAppended(self.transcript.len() - 1));
        self.is_new_turn = true;
        self.current_turn = None;
        self.set_input_enabled(false, &mut fx);
        Ok(fx)
    }

    /// Answer the pending approval and resume: deferred events are replayed
    /// in arrival order. On a failed send the approval stays pending.
    pub fn resolve_approval(
        &mut self,
        approved: bool,
        sink: &dyn MessageSink,
    ) -> Result<RenderEffects, SendError> {
        let (id, _, approval) = self.pending_approval().ok_or(SendError::NoPendingApproval)?;
        let tool = approval.tool.clone();
        sink.send(&ClientMessage::approval(approved))?;

        let outcome = if approved {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Rejected
        };
        info!(tool = %tool, approved, "Approval resolved");

        let mut fx = Vec::new();
        if let Some(block) = self.turn_mut(id).and_then(|t| t.resolve_approval(outcome)) {
            fx.push(Effect::BlockUpdated { turn: id, block });
        }
        self.set_status(id, Some(APPROVAL_RESUME_STATUS.to_string()), &mut fx);

        let backlog = std::mem::take(&mut self.deferred);
        for event in backlog {
            fx.extend(self.on_event(event));
        }
        Ok(fx)
    }

    /// Fold a REST chat reply into the transcript as if it had streamed.
    pub fn apply_chat_response(&mut self, response: ChatResponse) -> RenderEffects {
        let mut fx = self.on_event(SessionEvent::MessageChunk {
            content: response.message,
        });
        for call in response.tool_calls.unwrap_or_default() {
            fx.extend(self.on_event(SessionEvent::ToolCall {
                tool: call.name,
                arguments: call.arguments,
                tool_call_id: Some(call.id),
            }));
        }
        fx.extend(self.on_event(SessionEvent::Done {
            iterations: Some(response.iterations),
        }));
        fx
    }

    /// Replace the transcript with stored history.
    pub fn load_history(&mut self, history: History) -> RenderEffects {
        let mut fx = self.reset();
        for msg in history.messages {
            let text = msg.content.unwrap_or_default();
            let entry = match msg.role.as_str() {
                "user" => Entry::User { text },
                "assistant" => Entry::Assistant(Turn::from_history(&text)),
                _ => Entry::Note {
                    role: msg.role,
                    text,
                },
            };
            self.transcript.push(entry);
            fx.push(Effect::EntryAppended(self.transcript.len() - 1));
        }
        fx
    }

    /// Empty transcript, fresh turn state. Connection status is kept.
    pub fn reset(&mut self) -> RenderEffects {
        self.transcript.clear();
        self.current_turn = None;
        self.is_new_turn = true;
        self.tool_indicator = None;
        self.deferred.clear();
        let mut fx = vec![Effect::TranscriptReset];
        self.set_input_enabled(true, &mut fx);
        fx
    }

    /// Transport-level signal. Never touches turn state, but a lost channel
    /// hands input back: no `done` will arrive for the running turn.
    pub fn on_connection(&mut self, status: ConnectionStatus) -> RenderEffects {
        let mut fx = Vec::new();
        let lost = match &status {
            ConnectionStatus::Failed(reason) => {
                warn!(reason = %reason, "Session channel failed");
                true
            }
            ConnectionStatus::Disconnected => {
                info!("Session channel closed");
                true
            }
            _ => false,
        };
        self.set_connection(status, &mut fx);
        if lost && !self.input_enabled {
            self.set_tool_indicator(None, &mut fx);
            self.set_input_enabled(true, &mut fx);
        }
        fx
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn open_turn_id(&self) -> Option<TurnId> {
        let id = self.current_turn?;
        if self.is_new_turn || !self.turn(id)?.is_open() {
            return None;
        }
        Some(id)
    }

    fn ensure_turn(&mut self, fx: &mut RenderEffects) -> TurnId {
        let id = match self.open_turn_id() {
            Some(id) => id,
            None => self.open_turn(fx),
        };
        self.is_new_turn = false;
        id
    }

    /// Start a turn without clearing `is_new_turn`.
    fn open_turn(&mut self, fx: &mut RenderEffects) -> TurnId {
        self.transcript.push(Entry::Assistant(Turn::open()));
        let id = self.transcript.len() - 1;
        self.current_turn = Some(id);
        fx.push(Effect::TurnOpened(id));
        id
    }

    fn push_block(&mut self, id: TurnId, block: ContentBlock, fx: &mut RenderEffects) {
        if let Some(turn) = self.turn_mut(id) {
            let block = turn.push(block);
            fx.push(Effect::BlockAppended { turn: id, block });
        }
    }

    fn set_status(&mut self, id: TurnId, status: Option<String>, fx: &mut RenderEffects) {
        let Some(turn) = self.turn_mut(id) else { return };
        if turn.status != status {
            turn.status = status.clone();
            fx.push(Effect::StatusChanged { turn: id, status });
        }
    }

    fn set_tool_indicator(&mut self, indicator: Option<String>, fx: &mut RenderEffects) {
        if self.tool_indicator != indicator {
            self.tool_indicator = indicator.clone();
            fx.push(Effect::ToolIndicator(indicator));
        }
    }

    /// Always signalled: the caller re-arms its prompt on every `done`/`error`.
    fn set_input_enabled(&mut self, enabled: bool, fx: &mut RenderEffects) {
        self.input_enabled = enabled;
        fx.push(Effect::InputEnabled(enabled));
    }

    fn set_connection(&mut self, status: ConnectionStatus, fx: &mut RenderEffects) {
        if self.connection != status {
            self.connection = status.clone();
            fx.push(Effect::Connection(status));
        }
    }
}
