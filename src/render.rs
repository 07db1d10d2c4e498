//! Projection from typed transcript state to terminal lines.
//!
//! Lines are plain strings so any surface (stdout, a log, a test) can take
//! them. The glyphs follow the usual agent-console conventions:
//! - Tool steps: ⏺ bullet with ⎿ result lines
//! - Approvals: ⚠ header, then the decision once made
//! - Reports: a padded table under the report title

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::protocol::ConversationSummary;
use crate::reconciler::format::Integration;
use crate::reconciler::turn::{
    ApprovalBlock, ApprovalOutcome, CommandEntry, ContentBlock, Report, ResultPayload, StepStatus,
    Turn,
};
use crate::reconciler::{ConnectionStatus, Effect, Entry, SessionState};

/// Output sink for reconciler effects.
pub trait RenderSurface {
    fn apply(&mut self, state: &SessionState, effects: &[Effect]) -> Result<()>;
}

const TOOL_ARGS_WIDTH: usize = 80;

fn truncate_str(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn status_bullet(status: StepStatus) -> &'static str {
    match status {
        StepStatus::InProgress => "◌",
        StepStatus::Done => "⏺",
        StepStatus::Failed => "✗",
    }
}

pub fn render_transcript(state: &SessionState) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in state.transcript() {
        lines.extend(render_entry(entry));
        lines.push(String::new());
    }
    lines
}

pub fn render_entry(entry: &Entry) -> Vec<String> {
    match entry {
        Entry::User { text } => render_user_message(text),
        Entry::Assistant(turn) => render_turn(turn),
        Entry::Note { role, text } => text.lines().map(|l| format!("[{role}] {l}")).collect(),
    }
}

fn render_user_message(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, line) in text.lines().enumerate() {
        lines.push(if i == 0 {
            format!("you> {line}")
        } else {
            format!("     {line}")
        });
    }
    lines
}

pub fn render_turn(turn: &Turn) -> Vec<String> {
    let mut lines: Vec<String> = turn.blocks.iter().flat_map(render_block).collect();
    if let Some(status) = &turn.status {
        lines.push(render_status(status));
    }
    lines
}

pub fn render_status(status: &str) -> String {
    format!("  … {status}")
}

pub fn render_tool_indicator(indicator: &str) -> String {
    format!("  ⚙ {indicator}")
}

/// Render a single block into terminal lines.
pub fn render_block(block: &ContentBlock) -> Vec<String> {
    match block {
        ContentBlock::Thought { text } => text.lines().map(|l| format!("  ∴ {l}")).collect(),
        ContentBlock::CommandGroup { title, entries } => {
            let mut lines = vec![format!("  ▣ {title}")];
            for entry in entries {
                lines.push(render_command_line(entry));
                lines.extend(render_command_output(entry));
            }
            lines
        }
        ContentBlock::ToolCall {
            tool,
            summary,
            status,
            ..
        } => vec![render_tool_call(tool, summary, *status)],
        ContentBlock::ToolResult {
            tool,
            success,
            payload,
        } => render_tool_result(tool, *success, payload),
        ContentBlock::Report(report) => render_report(report),
        ContentBlock::Approval(approval) => render_approval(approval),
        ContentBlock::Text { text } => render_agent_text(text),
        ContentBlock::Error { message } => vec![format!("  ✗ Error: {message}")],
    }
}

pub fn render_tool_call(tool: &str, summary: &str, status: StepStatus) -> String {
    format!(
        "  {} {}({})",
        status_bullet(status),
        tool,
        truncate_str(summary, TOOL_ARGS_WIDTH)
    )
}

pub fn render_command_line(entry: &CommandEntry) -> String {
    format!("  {} $ {}", status_bullet(entry.status), entry.command)
}

/// Result lines under a command, or the running marker.
pub fn render_command_output(entry: &CommandEntry) -> Vec<String> {
    match (&entry.output, entry.status) {
        (_, StepStatus::InProgress) => vec!["    ⎿  Running...".to_string()],
        (Some(payload), _) => render_payload(payload),
        (None, _) => vec!["    ⎿  (no output)".to_string()],
    }
}

fn render_payload(payload: &ResultPayload) -> Vec<String> {
    let (preview, truncated) = payload.preview();
    let mut lines: Vec<String> = preview
        .lines()
        .enumerate()
        .map(|(i, l)| {
            if i == 0 {
                format!("    ⎿  {l}")
            } else {
                format!("       {l}")
            }
        })
        .collect();
    if lines.is_empty() {
        lines.push("    ⎿  (no output)".to_string());
    }
    if truncated {
        lines.push(format!(
            "       … {} chars total, /full to view",
            payload.full().chars().count()
        ));
    }
    lines
}

fn render_tool_result(tool: &str, success: bool, payload: &ResultPayload) -> Vec<String> {
    let mut lines = vec![if success {
        format!("  ⏺ Result: {tool}")
    } else {
        format!("  ✗ {tool} failed")
    }];
    lines.extend(render_payload(payload));
    lines
}

pub fn render_report(report: &Report) -> Vec<String> {
    let mut lines = vec![format!("  ▤ {}", report.title)];
    if !report.stats.is_empty() {
        let stats: Vec<String> = report
            .stats
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        lines.push(format!("    {}", stats.join(" · ")));
    }
    if report.rows.is_empty() {
        if let Some(note) = &report.empty_note {
            lines.push(format!("    {note}"));
        }
        return lines;
    }

    let mut widths: Vec<usize> = report.columns.iter().map(|c| c.chars().count()).collect();
    for row in &report.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }
    let fmt_row = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}", w = *w))
            .collect();
        format!("    {}", padded.join("  ").trim_end())
    };
    lines.push(fmt_row(&report.columns));
    let rule: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    lines.push(format!("    {}", rule.join("  ")));
    for row in &report.rows {
        lines.push(fmt_row(row));
    }
    lines
}

pub fn render_approval(approval: &ApprovalBlock) -> Vec<String> {
    let mut lines = vec![format!("  ⚠ Approval required: {}", approval.tool)];
    if let Some(message) = &approval.message {
        lines.push(format!("    {message}"));
    }
    let args = serde_json::to_string_pretty(&approval.arguments)
        .unwrap_or_else(|_| approval.arguments.to_string());
    lines.extend(args.lines().map(|l| format!("    {l}")));
    lines.push(render_approval_outcome(approval.outcome));
    lines
}

pub fn render_approval_outcome(outcome: Option<ApprovalOutcome>) -> String {
    match outcome {
        None => "    [y] approve  [n] reject".to_string(),
        Some(ApprovalOutcome::Approved) => "    ✓ Approved".to_string(),
        Some(ApprovalOutcome::Rejected) => "    ✗ Rejected".to_string(),
    }
}

fn render_agent_text(text: &str) -> Vec<String> {
    text.lines()
        .enumerate()
        .map(|(i, l)| if i == 0 { format!("⏺ {l}") } else { format!("  {l}") })
        .collect()
}

pub fn connection_label(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Idle => "not connected".to_string(),
        ConnectionStatus::Connecting => "connecting...".to_string(),
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::Disconnected => "disconnected".to_string(),
        ConnectionStatus::Failed(reason) => format!("connection failed: {reason}"),
    }
}

pub fn render_integrations(integrations: &BTreeMap<Integration, String>) -> Vec<String> {
    if integrations.is_empty() {
        return vec!["  (no integration activity yet)".to_string()];
    }
    integrations
        .iter()
        .map(|(integration, status)| format!("  ● {}: {status}", integration.label()))
        .collect()
}

// ---------------------------------------------------------------------------
// Conversation list
// ---------------------------------------------------------------------------

/// Backend timestamps come with or without an offset; naive ones are UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    if secs < 60 {
        "now".to_string()
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

pub fn conversation_line(summary: &ConversationSummary, now: DateTime<Utc>) -> String {
    let age = parse_timestamp(&summary.updated_at)
        .map(|t| format_age(t, now))
        .unwrap_or_else(|| summary.updated_at.clone());
    format!(
        "{}  {} · {} messages · {}",
        summary.id,
        summary.display_title(),
        summary.message_count,
        age
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::turn::TRUNCATE_AT;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn test_format_age_buckets() {
        let now = Utc.with_ymd_and_hms(2024, 12, 25, 12, 0, 0).unwrap();
        assert_eq!(format_age(now - Duration::seconds(30), now), "now");
        assert_eq!(format_age(now - Duration::minutes(5), now), "5m");
        assert_eq!(format_age(now - Duration::hours(3), now), "3h");
        assert_eq!(format_age(now - Duration::days(2), now), "2d");
        assert_eq!(format_age(now + Duration::minutes(1), now), "now");
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 12, 25, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-12-25T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-12-25T10:30:00.123456").map(|t| t.timestamp()), Some(expected.timestamp()));
        assert_eq!(parse_timestamp("2024-12-25T11:30:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_conversation_line() {
        let now = Utc.with_ymd_and_hms(2024, 12, 25, 12, 0, 0).unwrap();
        let summary = ConversationSummary {
            id: "conv_1".to_string(),
            title: None,
            message_count: 4,
            updated_at: "2024-12-25T10:30:00".to_string(),
            created_at: None,
        };
        assert_eq!(
            conversation_line(&summary, now),
            "conv_1  conv_1 · 4 messages · 1h"
        );
    }

    #[test]
    fn test_command_group_lines() {
        let mut turn = Turn::open();
        turn.push_command("execute_command", "ls");
        turn.push_command("execute_command", "pwd");
        let (g, e) = turn.find_running_command("execute_command").unwrap();
        turn.complete_command(g, e, true, "a.txt\nb.txt".to_string());

        let lines = render_block(&turn.blocks[0]);
        assert_eq!(
            lines,
            vec![
                "  ▣ execute_command",
                "  ⏺ $ ls",
                "    ⎿  a.txt",
                "       b.txt",
                "  ◌ $ pwd",
                "    ⎿  Running...",
            ]
        );
    }

    #[test]
    fn test_truncated_payload_hint() {
        let block = ContentBlock::ToolResult {
            tool: "read_file".to_string(),
            success: true,
            payload: ResultPayload::new("y".repeat(TRUNCATE_AT + 100)),
        };
        let lines = render_block(&block);
        assert_eq!(lines[0], "  ⏺ Result: read_file");
        assert_eq!(lines[1].chars().count(), "    ⎿  ".chars().count() + TRUNCATE_AT);
        assert!(lines[2].contains("600 chars total"));
    }

    #[test]
    fn test_failed_result_is_truncated_too() {
        let block = ContentBlock::ToolResult {
            tool: "query_dremio".to_string(),
            success: false,
            payload: ResultPayload::new(format!("Error: {}", "e".repeat(TRUNCATE_AT + 93))),
        };
        let lines = render_block(&block);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "  ✗ query_dremio failed");
        assert_eq!(lines[1].chars().count(), "    ⎿  ".chars().count() + TRUNCATE_AT);
        assert_eq!(lines[2], "       … 600 chars total, /full to view");
    }

    #[test]
    fn test_report_table_alignment() {
        let report = Report {
            title: "Nagios alerts".to_string(),
            stats: vec![("Crit".to_string(), "1".to_string())],
            columns: vec!["Host".to_string(), "State".to_string()],
            rows: vec![vec!["web-frontend".to_string(), "CRITICAL".to_string()]],
            empty_note: None,
        };
        let lines = render_report(&report);
        assert_eq!(lines[1], "    Crit: 1");
        assert_eq!(lines[2], "    Host          State");
        assert_eq!(lines[4], "    web-frontend  CRITICAL");
    }

    #[test]
    fn test_approval_block_shows_decision() {
        let mut approval = ApprovalBlock {
            tool: "write_file".to_string(),
            arguments: json!({ "path": "a.txt" }),
            message: Some("Tool requires approval".to_string()),
            outcome: None,
        };
        let lines = render_approval(&approval);
        assert_eq!(lines[0], "  ⚠ Approval required: write_file");
        assert_eq!(lines.last().unwrap(), "    [y] approve  [n] reject");

        approval.outcome = Some(ApprovalOutcome::Rejected);
        assert_eq!(render_approval(&approval).last().unwrap(), "    ✗ Rejected");
    }

    #[test]
    fn test_turn_with_status_and_text() {
        let mut turn = Turn::open();
        turn.append_text("Found 1 file.\nDone.");
        turn.status = Some("Analyzing...".to_string());
        assert_eq!(
            render_turn(&turn),
            vec!["⏺ Found 1 file.", "  Done.", "  … Analyzing..."]
        );
    }

    #[test]
    fn test_tool_call_args_are_cut() {
        let line = render_tool_call("write_file", &"z".repeat(120), StepStatus::Failed);
        assert!(line.starts_with("  ✗ write_file(zzz"));
        assert!(line.ends_with("…)"));
    }
}
