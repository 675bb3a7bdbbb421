//! Test doubles and fixtures shared across the workspace's tests.

use anyhow::{Result, anyhow};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tabula_core::{ChatMessage, ChatRequest, LlmResponse, LlmToolCall, QueryItem, Table};
use tabula_llm::LlmClient;

/// One scripted gateway reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Text(String),
    ToolCall { name: String, arguments: String },
    Fail(String),
}

pub fn text(body: impl Into<String>) -> Scripted {
    Scripted::Text(body.into())
}

pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Scripted {
    Scripted::ToolCall {
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

pub fn fail(reason: impl Into<String>) -> Scripted {
    Scripted::Fail(reason.into())
}

/// Wraps routine source in the fenced block the extraction step looks for.
pub fn fenced_routine(source: &str) -> Scripted {
    Scripted::Text(format!("Here is the routine:\n```routine\n{}\n```", source.trim()))
}

/// Replays canned responses in order and records every request it saw.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Scripted>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// User-message text of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|req| {
                req.messages
                    .iter()
                    .filter_map(|m| match m {
                        ChatMessage::User { content } => Some(content.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    fn next_response(&self) -> Result<Scripted> {
        let mut guard = self
            .responses
            .lock()
            .map_err(|_| anyhow!("scripted llm mutex poisoned"))?;
        guard
            .pop_front()
            .ok_or_else(|| anyhow!("scripted llm exhausted"))
    }
}

impl LlmClient for ScriptedLlm {
    fn complete_chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req.clone());
        }
        match self.next_response()? {
            Scripted::Text(text) => Ok(LlmResponse {
                text,
                finish_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            }),
            Scripted::ToolCall { name, arguments } => Ok(LlmResponse {
                text: String::new(),
                finish_reason: "tool_calls".to_string(),
                tool_calls: vec![LlmToolCall {
                    id: "call_1".to_string(),
                    name,
                    arguments,
                }],
            }),
            Scripted::Fail(reason) => Err(anyhow!(reason)),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 2008 NASCAR Craftsman Truck Series results excerpt.
pub fn nascar_table() -> Table {
    Table::new(
        "2008 NASCAR Craftsman Truck Series",
        strings(&["Rank", "No.", "Driver", "Team", "Laps", "Status"]),
        vec![
            strings(&["1", "23", "Johnny Benson", "Bill Davis Racing", "200", "Running"]),
            strings(&["2", "33", "Ron Hornaday Jr.", "Kevin Harvick Inc.", "200", "Running"]),
            strings(&["3", "5", "Mike Skinner", "Bill Davis Racing", "187", "Accident"]),
        ],
    )
}

pub fn nascar_item(example_id: &str) -> QueryItem {
    QueryItem {
        example_id: example_id.to_string(),
        query: "Who won the race and what team did they drive for?".to_string(),
        ground_truth: "Johnny Benson won the race driving for Bill Davis Racing.".to_string(),
        table: nascar_table(),
    }
}

/// Routine returning the winner's driver and team from [`nascar_table`].
pub const NASCAR_WINNER_ROUTINE: &str = r#"routine get_race_winner(table) {
    for row in table.rows {
        if row["Rank"] == "1" {
            return {"Driver": row["Driver"], "Team": row["Team"]};
        }
    }
    return none;
}"#;

/// Writes `items` as a JSONL dataset file and returns its path.
pub fn write_dataset(dir: &Path, name: &str, items: &[QueryItem]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut body = String::new();
    for item in items {
        body.push_str(&serde_json::to_string(item)?);
        body.push('\n');
    }
    fs::write(&path, body)?;
    Ok(path)
}
