//! Typed transcript blocks for one assistant turn.
//!
//! A turn is the unit the stream reconciler appends to. Blocks keep arrival
//! order; the grouping, text and approval indices point back into them.
use serde_json::Value;

/// Results longer than this many characters are previewed, not shown whole.
pub const TRUNCATE_AT: usize = 500;

/// Compact tool-call argument summaries are cut at this many characters.
pub const ARGS_SUMMARY_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub blocks: Vec<ContentBlock>,
    pub state: TurnState,
    /// Transient "thinking" line; never part of the transcript proper.
    pub status: Option<String>,
    /// Index of the turn's command grouping, once one exists.
    command_group: Option<usize>,
    /// Index of the block streamed `message_chunk` text lands in.
    text_block: Option<usize>,
    /// Index of the approval block awaiting a decision.
    pending_approval: Option<usize>,
}

impl Turn {
    pub fn open() -> Self {
        Self {
            blocks: Vec::new(),
            state: TurnState::Open,
            status: None,
            command_group: None,
            text_block: None,
            pending_approval: None,
        }
    }

    /// A finished turn restored from stored history.
    pub fn from_history(text: &str) -> Self {
        let mut turn = Self::open();
        turn.append_text(text);
        turn.state = TurnState::Closed;
        turn
    }

    pub fn is_open(&self) -> bool {
        self.state == TurnState::Open
    }

    pub fn push(&mut self, block: ContentBlock) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    /// Append streamed text, creating the text block on first use.
    /// Returns the block index and whether it was newly created.
    pub fn append_text(&mut self, delta: &str) -> (usize, bool) {
        if let Some(idx) = self.text_block {
            if let Some(ContentBlock::Text { text }) = self.blocks.get_mut(idx) {
                text.push_str(delta);
                return (idx, false);
            }
        }
        let idx = self.push(ContentBlock::Text {
            text: delta.to_string(),
        });
        self.text_block = Some(idx);
        (idx, true)
    }

    #[cfg(test)]
    pub fn text(&self) -> Option<&str> {
        self.text_block
            .and_then(|idx| self.blocks.get(idx))
            .and_then(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
    }

    /// Add a command to the turn's grouping, opening it if needed.
    /// Returns the grouping's block index and whether it was newly created.
    pub fn push_command(&mut self, tool: &str, command: &str) -> (usize, bool) {
        let entry = CommandEntry {
            tool: tool.to_string(),
            command: command.to_string(),
            status: StepStatus::InProgress,
            output: None,
        };
        if let Some(idx) = self.command_group {
            if let Some(ContentBlock::CommandGroup { entries, .. }) = self.blocks.get_mut(idx) {
                entries.push(entry);
                return (idx, false);
            }
        }
        let idx = self.push(ContentBlock::CommandGroup {
            title: tool.to_string(),
            entries: vec![entry],
        });
        self.command_group = Some(idx);
        (idx, true)
    }

    #[cfg(test)]
    pub fn command_group(&self) -> Option<&[CommandEntry]> {
        self.command_group
            .and_then(|idx| self.blocks.get(idx))
            .and_then(|block| match block {
                ContentBlock::CommandGroup { entries, .. } => Some(entries.as_slice()),
                _ => None,
            })
    }

    /// Oldest in-progress command entry run by `tool`, as (block, entry).
    pub fn find_running_command(&self, tool: &str) -> Option<(usize, usize)> {
        let group_idx = self.command_group?;
        match self.blocks.get(group_idx)? {
            ContentBlock::CommandGroup { entries, .. } => entries
                .iter()
                .position(|e| e.status == StepStatus::InProgress && e.tool == tool)
                .map(|entry_idx| (group_idx, entry_idx)),
            _ => None,
        }
    }

    pub fn complete_command(
        &mut self,
        group_idx: usize,
        entry_idx: usize,
        success: bool,
        output: String,
    ) -> Option<&CommandEntry> {
        match self.blocks.get_mut(group_idx)? {
            ContentBlock::CommandGroup { entries, .. } => {
                let entry = entries.get_mut(entry_idx)?;
                entry.status = if success {
                    StepStatus::Done
                } else {
                    StepStatus::Failed
                };
                entry.output = Some(ResultPayload::new(output));
                Some(entry)
            }
            _ => None,
        }
    }

    /// Mark the oldest in-progress compact call for `tool` as finished.
    pub fn complete_tool_call(&mut self, tool: &str, success: bool) -> Option<usize> {
        let idx = self.blocks.iter().position(|b| {
            matches!(b, ContentBlock::ToolCall { tool: t, status, .. }
                if t == tool && *status == StepStatus::InProgress)
        })?;
        if let ContentBlock::ToolCall { status, .. } = &mut self.blocks[idx] {
            *status = if success {
                StepStatus::Done
            } else {
                StepStatus::Failed
            };
        }
        Some(idx)
    }

    pub fn push_approval(&mut self, tool: &str, arguments: Value, message: Option<String>) -> usize {
        let idx = self.push(ContentBlock::Approval(ApprovalBlock {
            tool: tool.to_string(),
            arguments,
            message,
            outcome: None,
        }));
        self.pending_approval = Some(idx);
        idx
    }

    pub fn pending_approval(&self) -> Option<(usize, &ApprovalBlock)> {
        let idx = self.pending_approval?;
        match self.blocks.get(idx)? {
            ContentBlock::Approval(block) => Some((idx, block)),
            _ => None,
        }
    }

    /// Record the decision on the pending approval. Returns its block index.
    pub fn resolve_approval(&mut self, outcome: ApprovalOutcome) -> Option<usize> {
        let idx = self.pending_approval.take()?;
        if let Some(ContentBlock::Approval(block)) = self.blocks.get_mut(idx) {
            block.outcome = Some(outcome);
        }
        Some(idx)
    }

    pub fn close(&mut self, state: TurnState) {
        self.status = None;
        self.state = state;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Reasoning text the agent emitted before acting.
    Thought { text: String },
    /// Terminal-style grouping of shell commands and their outputs.
    CommandGroup {
        title: String,
        entries: Vec<CommandEntry>,
    },
    /// Compact line for a non-command tool.
    ToolCall {
        tool: String,
        arguments: Value,
        summary: String,
        status: StepStatus,
    },
    ToolResult {
        tool: String,
        success: bool,
        payload: ResultPayload,
    },
    Report(Report),
    Approval(ApprovalBlock),
    Text { text: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    pub tool: String,
    pub command: String,
    pub status: StepStatus,
    pub output: Option<ResultPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalBlock {
    pub tool: String,
    pub arguments: Value,
    pub message: Option<String>,
    /// `None` while waiting; terminal once set.
    pub outcome: Option<ApprovalOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
}

/// Tabular rendering of a structured tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub title: String,
    pub stats: Vec<(String, String)>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Shown instead of the table when `rows` is empty.
    pub empty_note: Option<String>,
}

/// Rendered result text. Display previews it; the full text stays available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPayload {
    full: String,
}

impl ResultPayload {
    pub fn new(full: String) -> Self {
        Self { full }
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn is_truncated(&self) -> bool {
        self.full.chars().nth(TRUNCATE_AT).is_some()
    }

    /// First `TRUNCATE_AT` characters and whether anything was cut.
    pub fn preview(&self) -> (&str, bool) {
        match self.full.char_indices().nth(TRUNCATE_AT) {
            Some((byte_idx, _)) => (&self.full[..byte_idx], true),
            None => (&self.full, false),
        }
    }
}
