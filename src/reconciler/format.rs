use serde_json::{Map, Value};

use super::turn::{Report, ARGS_SUMMARY_LEN};

/// Pull a shell command out of tool arguments, whichever shape the model used.
pub fn command_of(arguments: &Value) -> Option<&str> {
    arguments
        .get("command")
        .or_else(|| arguments.get("CommandLine"))
        .or_else(|| arguments.get("parameters").and_then(|p| p.get("command")))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

pub fn is_command_tool(tool: &str, arguments: &Value) -> bool {
    tool == "execute_command" || command_of(arguments).is_some()
}

/// One-line argument summary for compact tool-call blocks.
pub fn args_summary(arguments: &Value) -> String {
    let json = match arguments {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    };
    match json.char_indices().nth(ARGS_SUMMARY_LEN) {
        Some((idx, _)) => format!("{}...", &json[..idx]),
        None => json,
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Text shown under a command line once its result arrives.
pub fn command_output(success: bool, result: Option<&Value>, error: Option<&str>) -> String {
    if !success {
        return format!("Error: {}", error.unwrap_or("Unknown error"));
    }
    match result {
        Some(Value::Object(obj)) if obj.contains_key("stdout") || obj.contains_key("stderr") => {
            let mut text = obj
                .get("stdout")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if let Some(stderr) = obj.get("stderr").and_then(|v| v.as_str()) {
                if !stderr.is_empty() {
                    text.push_str("\nError:\n");
                    text.push_str(stderr);
                }
            }
            text
        }
        Some(Value::String(s)) => s.clone(),
        Some(other) => pretty(other),
        None => String::new(),
    }
}

/// Text for the generic result block.
pub fn generic_result(success: bool, result: Option<&Value>, error: Option<&str>) -> String {
    if !success {
        return error.unwrap_or("Unknown error").to_string();
    }
    match result {
        Some(Value::String(s)) => s.clone(),
        Some(other) => pretty(other),
        None => "null".to_string(),
    }
}

/// Structured rendering for tools whose results are tables.
/// `None` means the tool has no formatter or the payload did not fit it.
pub fn structured_report(tool: &str, result: &Value) -> Option<Report> {
    let obj = result.as_object()?;
    match tool {
        "analyze_cloud_resources" => Some(analysis_report(obj)),
        "nagios_get_alerts" => Some(nagios_report(obj)),
        "dremio_query" => Some(dremio_report(obj)),
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn count_field(obj: Option<&Map<String, Value>>, key: &str) -> u64 {
    obj.and_then(|o| o.get(key))
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

fn analysis_report(res: &Map<String, Value>) -> Report {
    let summary = res.get("summary").and_then(|v| v.as_object());
    let provider = res
        .get("provider")
        .and_then(|v| v.as_str())
        .unwrap_or("cloud")
        .to_uppercase();
    let rows: Vec<Vec<String>> = res
        .get("recommendations")
        .and_then(|v| v.as_array())
        .map(|recs| {
            recs.iter()
                .filter_map(|r| r.as_object())
                .map(|r| {
                    vec![
                        str_field(r, "resource_id"),
                        str_field(r, "issue"),
                        str_field(r, "recommendation"),
                        str_field(r, "severity"),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();

    Report {
        title: format!("Optimization report ({provider})"),
        stats: vec![
            (
                "Resources".to_string(),
                count_field(summary, "total_resources").to_string(),
            ),
            (
                "Optimizable".to_string(),
                count_field(summary, "optimizable").to_string(),
            ),
        ],
        columns: ["Resource", "Finding", "Recommendation", "Priority"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        rows,
        empty_note: Some("No optimization issues found.".to_string()),
    }
}

fn nagios_state(status: Option<&Value>) -> &'static str {
    match status.and_then(|v| v.as_i64()) {
        Some(2) => "CRITICAL",
        Some(1) => "WARNING",
        _ => "UNKNOWN",
    }
}

fn nagios_report(res: &Map<String, Value>) -> Report {
    let summary = res.get("summary").and_then(|v| v.as_object());
    let rows: Vec<Vec<String>> = res
        .get("problems")
        .and_then(|v| v.as_array())
        .map(|problems| {
            problems
                .iter()
                .filter_map(|p| p.as_object())
                .map(|p| {
                    vec![
                        str_field(p, "host"),
                        str_field(p, "service"),
                        nagios_state(p.get("status")).to_string(),
                        str_field(p, "output"),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();

    Report {
        title: "Nagios alerts".to_string(),
        stats: vec![
            ("OK".to_string(), count_field(summary, "ok").to_string()),
            ("Warn".to_string(), count_field(summary, "warning").to_string()),
            ("Crit".to_string(), count_field(summary, "critical").to_string()),
        ],
        columns: ["Host", "Service", "State", "Info"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        rows,
        empty_note: Some("All services are OK.".to_string()),
    }
}

fn dremio_report(res: &Map<String, Value>) -> Report {
    let rows: Vec<&Map<String, Value>> = res
        .get("data")
        .and_then(|v| v.as_array())
        .map(|rows| rows.iter().filter_map(|r| r.as_object()).collect())
        .unwrap_or_default();

    let Some(first) = rows.first() else {
        return Report {
            title: "Dremio: no results".to_string(),
            stats: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            empty_note: None,
        };
    };

    let columns: Vec<String> = first.keys().cloned().collect();
    let body = rows
        .iter()
        .map(|row| columns.iter().map(|c| str_field(row, c)).collect())
        .collect();
    let job: String = res
        .get("job_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .chars()
        .take(8)
        .collect();

    Report {
        title: format!("Dremio results (job: {job}...)"),
        stats: Vec::new(),
        columns,
        rows: body,
        empty_note: None,
    }
}

// ---------------------------------------------------------------------------
// Integration status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Integration {
    Zabbix,
    Nagios,
    Checkmk,
    Oci,
    Aws,
    Dremio,
}

impl Integration {
    pub fn label(self) -> &'static str {
        match self {
            Integration::Zabbix => "Zabbix",
            Integration::Nagios => "Nagios",
            Integration::Checkmk => "Checkmk",
            Integration::Oci => "OCI",
            Integration::Aws => "AWS",
            Integration::Dremio => "Dremio",
        }
    }
}

fn alert_badge(result: Option<&Value>) -> String {
    let count = result
        .and_then(|r| r.get("count"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if count > 0 {
        format!("{count} alerts")
    } else {
        "OK".to_string()
    }
}

/// Status badge implied by a successful tool result. `command` is the shell
/// command when the result belongs to a command entry.
pub fn integration_status(
    tool: &str,
    command: Option<&str>,
    result: Option<&Value>,
) -> Option<(Integration, String)> {
    match tool {
        "zabbix_get_alerts" => Some((Integration::Zabbix, alert_badge(result))),
        "nagios_get_alerts" => Some((Integration::Nagios, alert_badge(result))),
        "checkmk_get_alerts" => Some((Integration::Checkmk, alert_badge(result))),
        "oci_list_instances" => Some((Integration::Oci, "CONNECTED".to_string())),
        "aws_list_instances" => Some((Integration::Aws, "ACTIVE".to_string())),
        "execute_command" if command.is_some_and(|c| c.contains("aws")) => {
            Some((Integration::Aws, "ACTIVE".to_string()))
        }
        "dremio_query" | "dremio_list_catalog" => {
            Some((Integration::Dremio, "CONNECTED".to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_detection_shapes() {
        assert_eq!(command_of(&json!({ "command": "ls" })), Some("ls"));
        assert_eq!(command_of(&json!({ "CommandLine": "dir" })), Some("dir"));
        assert_eq!(
            command_of(&json!({ "parameters": { "command": "uptime" } })),
            Some("uptime")
        );
        assert_eq!(command_of(&json!({ "path": "a.txt" })), None);
        assert!(is_command_tool("execute_command", &json!({})));
        assert!(is_command_tool("run", &json!({ "command": "ls" })));
        assert!(!is_command_tool("read_file", &json!({ "path": "a" })));
    }

    #[test]
    fn test_args_summary_cut() {
        let long = json!({ "content": "x".repeat(300) });
        let summary = args_summary(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), ARGS_SUMMARY_LEN + 3);
        assert_eq!(args_summary(&json!({ "path": "a" })), r#"{"path":"a"}"#);
        assert_eq!(args_summary(&Value::Null), "{}");
    }

    #[test]
    fn test_command_output_stdout_and_stderr() {
        let res = json!({ "stdout": "a.txt\n", "stderr": "" });
        assert_eq!(command_output(true, Some(&res), None), "a.txt\n");
        let res = json!({ "stdout": "", "stderr": "denied" });
        assert_eq!(command_output(true, Some(&res), None), "\nError:\ndenied");
        assert_eq!(
            command_output(false, None, Some("timeout")),
            "Error: timeout"
        );
        assert_eq!(command_output(false, None, None), "Error: Unknown error");
    }

    #[test]
    fn test_command_output_other_shapes() {
        assert_eq!(command_output(true, Some(&json!("plain")), None), "plain");
        assert_eq!(
            command_output(true, Some(&json!({ "code": 0 })), None),
            "{\n  \"code\": 0\n}"
        );
    }

    #[test]
    fn test_generic_result() {
        assert_eq!(generic_result(true, Some(&json!("ok")), None), "ok");
        assert_eq!(generic_result(true, Some(&json!([1])), None), "[\n  1\n]");
        assert_eq!(generic_result(false, None, Some("boom")), "boom");
        assert_eq!(generic_result(false, None, None), "Unknown error");
    }

    #[test]
    fn test_nagios_report() {
        let res = json!({
            "summary": { "ok": 10, "warning": 1, "critical": 2 },
            "problems": [
                { "host": "web1", "service": "disk", "status": 2, "output": "95% used" },
                { "host": "db1", "service": "load", "status": 1, "output": "load 9" },
                { "host": "x", "service": "y", "status": 3, "output": "?" }
            ]
        });
        let report = structured_report("nagios_get_alerts", &res).unwrap();
        assert_eq!(report.stats[2], ("Crit".to_string(), "2".to_string()));
        assert_eq!(report.rows[0], vec!["web1", "disk", "CRITICAL", "95% used"]);
        assert_eq!(report.rows[1][2], "WARNING");
        assert_eq!(report.rows[2][2], "UNKNOWN");
    }

    #[test]
    fn test_analysis_report_empty_recommendations() {
        let res = json!({
            "provider": "aws",
            "summary": { "total_resources": 4, "optimizable": 0 },
            "recommendations": []
        });
        let report = structured_report("analyze_cloud_resources", &res).unwrap();
        assert_eq!(report.title, "Optimization report (AWS)");
        assert!(report.rows.is_empty());
        assert!(report.empty_note.is_some());
        assert_eq!(report.stats[0].1, "4");
    }

    #[test]
    fn test_dremio_report_keeps_column_order() {
        let res = json!({
            "job_id": "1234567890abcdef",
            "data": [
                { "zone": "eu", "count": 3, "active": true },
                { "zone": "us", "count": 5, "active": null }
            ]
        });
        let report = structured_report("dremio_query", &res).unwrap();
        assert_eq!(report.title, "Dremio results (job: 12345678...)");
        assert_eq!(report.columns, vec!["zone", "count", "active"]);
        assert_eq!(report.rows[0], vec!["eu", "3", "true"]);
        assert_eq!(report.rows[1], vec!["us", "5", ""]);

        let empty = structured_report("dremio_query", &json!({ "data": [] })).unwrap();
        assert_eq!(empty.title, "Dremio: no results");
    }

    #[test]
    fn test_structured_report_requires_object() {
        assert!(structured_report("nagios_get_alerts", &json!("down")).is_none());
        assert!(structured_report("read_file", &json!({})).is_none());
    }

    #[test]
    fn test_integration_status() {
        assert_eq!(
            integration_status("zabbix_get_alerts", None, Some(&json!({ "count": 3 }))),
            Some((Integration::Zabbix, "3 alerts".to_string()))
        );
        assert_eq!(
            integration_status("checkmk_get_alerts", None, Some(&json!({}))),
            Some((Integration::Checkmk, "OK".to_string()))
        );
        assert_eq!(
            integration_status("execute_command", Some("aws s3 ls"), None),
            Some((Integration::Aws, "ACTIVE".to_string()))
        );
        assert_eq!(integration_status("execute_command", Some("ls"), None), None);
        assert_eq!(
            integration_status("dremio_list_catalog", None, None),
            Some((Integration::Dremio, "CONNECTED".to_string()))
        );
    }
}
