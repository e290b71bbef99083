use crate::storage::ExecutedCommand;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name of the assistant's shell-execution tool.
pub const SHELL_TOOL: &str = "Bash";

#[derive(Debug)]
struct PendingCall {
    command: String,
    description: Option<String>,
    cwd: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

/// Extract executed shell commands from newline-delimited transcript events.
///
/// Requests (`tool_use` blocks) are paired with their results (`tool_result`
/// blocks) by correlation id. Unparseable lines, non-shell tools, results
/// without a request and requests without a result are all dropped.
pub fn parse(raw: &str, session_id: Option<&str>) -> Vec<ExecutedCommand> {
    let mut pending: HashMap<String, PendingCall> = HashMap::new();
    let mut commands = Vec::new();

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                log::trace!("skipping malformed line {}: {}", line_no + 1, e);
                continue;
            }
        };
        let Some(event) = value.as_object() else {
            continue;
        };
        let Some(blocks) = event
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        else {
            continue;
        };

        for block in blocks {
            let Some(block) = block.as_object() else {
                continue;
            };
            match str_field(block, "type") {
                Some("tool_use") => {
                    if let Some((id, call)) = shell_call(event, block) {
                        pending.insert(id, call);
                    }
                }
                Some("tool_result") => {
                    let Some(id) = str_field(block, "tool_use_id") else {
                        continue;
                    };
                    match pending.remove(id) {
                        Some(call) => commands.push(complete(id, call, event, block, session_id)),
                        None => log::debug!("dropping result without a pending request: {}", id),
                    }
                }
                _ => {}
            }
        }
    }

    if !pending.is_empty() {
        log::debug!(
            "dropping {} request(s) without a result in session {}",
            pending.len(),
            session_id.unwrap_or("unknown")
        );
    }

    commands
}

fn shell_call(event: &Map<String, Value>, block: &Map<String, Value>) -> Option<(String, PendingCall)> {
    if str_field(block, "name") != Some(SHELL_TOOL) {
        return None;
    }
    let id = str_field(block, "id")?;
    let input = block.get("input")?.as_object()?;
    let command = str_field(input, "command").filter(|c| !c.is_empty())?;

    Some((
        id.to_string(),
        PendingCall {
            command: command.to_string(),
            description: str_field(input, "description").map(str::to_string),
            cwd: str_field(event, "cwd").map(str::to_string),
            timestamp: str_field(event, "timestamp").and_then(parse_timestamp),
        },
    ))
}

fn complete(
    id: &str,
    call: PendingCall,
    event: &Map<String, Value>,
    block: &Map<String, Value>,
    session_id: Option<&str>,
) -> ExecutedCommand {
    let (stdout, stderr) = match event.get("toolUseResult").and_then(Value::as_object) {
        Some(captured) if captured.contains_key("stdout") || captured.contains_key("stderr") => (
            str_field(captured, "stdout").map(str::to_string),
            str_field(captured, "stderr").map(str::to_string),
        ),
        _ => (block.get("content").and_then(content_text), None),
    };

    ExecutedCommand {
        id: None,
        tool_use_id: id.to_string(),
        command: call.command,
        description: call.description,
        cwd: call.cwd,
        stdout,
        stderr,
        is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        timestamp: call.timestamp,
        session_id: session_id.map(str::to_string),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Result content is either a plain string or a list of text blocks.
fn content_text(content: &Value) -> Option<String> {
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    let parts: Vec<&str> = content
        .as_array()?
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            if str_field(obj, "type") == Some("text") {
                str_field(obj, "text")
            } else {
                None
            }
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
