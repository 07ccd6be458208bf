//! Host-owned log terminals: named, bounded line buffers the UI renders
//! read-only, plus git operations whose output is logged line by line.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use termdeck_core::bridge_ipc::events;
use thiserror::Error;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::git::{run_git_output, GitError};

pub const DEFAULT_MAX_LINES: usize = 1000;
pub const SYSTEM_TERMINAL_ID: &str = "system";
pub const GIT_TERMINAL_ID: &str = "git";

#[derive(Debug, Error)]
pub enum SystemTerminalError {
    #[error("Unknown system terminal {0}")]
    Unknown(String),
    #[error(transparent)]
    Git(#[from] GitError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemTerminalConfig {
    pub max_lines: usize,
}

impl Default for SystemTerminalConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemTerminalConfigPatch {
    #[serde(default)]
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemTerminalInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub line_count: usize,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemTerminalSnapshot {
    #[serde(flatten)]
    pub info: SystemTerminalInfo,
    pub lines: Vec<LogLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitOperationResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

struct LogTerminal {
    name: String,
    created_at: DateTime<Utc>,
    lines: VecDeque<LogLine>,
}

impl LogTerminal {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            lines: VecDeque::new(),
        }
    }

    fn push(&mut self, line: LogLine, max_lines: usize) {
        self.lines.push_back(line);
        while self.lines.len() > max_lines {
            self.lines.pop_front();
        }
    }
}

#[derive(Default)]
struct ManagerState {
    terminals: BTreeMap<String, LogTerminal>,
    active: Option<String>,
    config: SystemTerminalConfig,
}

impl ManagerState {
    fn info(&self, id: &str, terminal: &LogTerminal) -> SystemTerminalInfo {
        SystemTerminalInfo {
            id: id.to_string(),
            name: terminal.name.clone(),
            created_at: terminal.created_at,
            line_count: terminal.lines.len(),
            active: self.active.as_deref() == Some(id),
        }
    }
}

pub struct SystemTerminalManager {
    bridge: Arc<Bridge>,
    state: StdMutex<ManagerState>,
}

impl SystemTerminalManager {
    pub fn new(bridge: Arc<Bridge>, config: SystemTerminalConfig) -> Self {
        Self {
            bridge,
            state: StdMutex::new(ManagerState {
                config: sanitize(config),
                ..ManagerState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit_event(&self, kind: &str, mut body: Value) {
        if let Value::Object(fields) = &mut body {
            fields.insert("type".to_string(), json!(kind));
        }
        self.bridge.send(events::SYSTEM_TERMINAL_EVENT, vec![body]);
    }

    /// Creates the built-in `system` and `git` terminals if missing and makes
    /// `system` active when nothing is. Safe to call repeatedly.
    pub fn initialize(&self) -> Vec<SystemTerminalInfo> {
        let (created, activated) = {
            let mut state = self.state();
            let mut created = Vec::new();
            for (id, name) in [(SYSTEM_TERMINAL_ID, "System"), (GIT_TERMINAL_ID, "Git")] {
                if !state.terminals.contains_key(id) {
                    state.terminals.insert(id.to_string(), LogTerminal::new(name));
                    created.push(id.to_string());
                }
            }
            let activated = if state.active.is_none() {
                state.active = Some(SYSTEM_TERMINAL_ID.to_string());
                true
            } else {
                false
            };
            (created, activated)
        };
        for id in &created {
            info!(event = "system_terminal_created", terminal_id = %id);
            self.emit_event("created", json!({ "terminalId": id }));
        }
        if activated {
            self.bridge
                .send(events::SYSTEM_TERMINAL_ACTIVATED, vec![json!(SYSTEM_TERMINAL_ID)]);
        }
        self.list()
    }

    /// Appends `message` to terminal `id`, one line per message line. The
    /// terminal is created on first use.
    pub fn log(&self, id: &str, level: LogLevel, message: &str) -> Vec<LogLine> {
        let now = Utc::now();
        let lines: Vec<LogLine> = split_lines(message)
            .map(|text| LogLine {
                timestamp: now,
                level,
                message: text.to_string(),
            })
            .collect();
        let created = {
            let mut state = self.state();
            let max_lines = state.config.max_lines;
            let mut created = false;
            let terminal = state.terminals.entry(id.to_string()).or_insert_with(|| {
                created = true;
                LogTerminal::new(id)
            });
            for line in &lines {
                terminal.push(line.clone(), max_lines);
            }
            created
        };
        if created {
            info!(event = "system_terminal_created", terminal_id = %id);
            self.emit_event("created", json!({ "terminalId": id }));
        }
        for line in &lines {
            self.bridge
                .send(events::SYSTEM_TERMINAL_OUTPUT, vec![json!(id), json!(line)]);
        }
        debug!(event = "system_terminal_log", terminal_id = %id, lines = lines.len());
        lines
    }

    /// Runs `git <args>` in `cwd` and logs the command, its output and its
    /// outcome to terminal `id`. A non-zero exit is a result, not an error.
    pub async fn git_operation(
        &self,
        id: &str,
        cwd: &Path,
        args: &[String],
    ) -> Result<GitOperationResult, SystemTerminalError> {
        let command = format!("git {}", args.join(" "));
        self.log(id, LogLevel::Command, &format!("$ {command}"));
        let output = match run_git_output(cwd, args).await {
            Ok(output) => output,
            Err(err) => {
                self.log(id, LogLevel::Error, &err.to_string());
                return Err(err.into());
            }
        };
        if !output.stdout.trim().is_empty() {
            self.log(id, LogLevel::Info, output.stdout.trim_end());
        }
        let success = output.success();
        if !output.stderr.trim().is_empty() {
            let level = if success { LogLevel::Warn } else { LogLevel::Error };
            self.log(id, level, output.stderr.trim_end());
        }
        let code = output
            .code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        if success {
            self.log(id, LogLevel::Success, &format!("{command} completed"));
        } else {
            self.log(id, LogLevel::Error, &format!("{command} failed ({code})"));
        }
        info!(
            event = "system_terminal_git",
            terminal_id = %id,
            cwd = %cwd.display(),
            success,
            code = %code
        );
        Ok(GitOperationResult {
            success,
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    pub fn get(&self, id: &str) -> Option<SystemTerminalSnapshot> {
        let state = self.state();
        let terminal = state.terminals.get(id)?;
        Some(SystemTerminalSnapshot {
            info: state.info(id, terminal),
            lines: terminal.lines.iter().cloned().collect(),
        })
    }

    pub fn list(&self) -> Vec<SystemTerminalInfo> {
        let state = self.state();
        state
            .terminals
            .iter()
            .map(|(id, terminal)| state.info(id, terminal))
            .collect()
    }

    pub fn active(&self) -> Option<String> {
        self.state().active.clone()
    }

    pub fn set_active(&self, id: &str) -> Result<(), SystemTerminalError> {
        {
            let mut state = self.state();
            if !state.terminals.contains_key(id) {
                return Err(SystemTerminalError::Unknown(id.to_string()));
            }
            state.active = Some(id.to_string());
        }
        self.bridge
            .send(events::SYSTEM_TERMINAL_ACTIVATED, vec![json!(id)]);
        Ok(())
    }

    pub fn clear(&self, id: &str) -> Result<(), SystemTerminalError> {
        {
            let mut state = self.state();
            let terminal = state
                .terminals
                .get_mut(id)
                .ok_or_else(|| SystemTerminalError::Unknown(id.to_string()))?;
            terminal.lines.clear();
        }
        self.bridge
            .send(events::SYSTEM_TERMINAL_CLEARED, vec![json!(id)]);
        Ok(())
    }

    /// Lines of `id` starting at `offset`, at most `limit` of them (all when
    /// `limit` is `None`).
    pub fn get_lines(
        &self,
        id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<LogLine>, SystemTerminalError> {
        let state = self.state();
        let terminal = state
            .terminals
            .get(id)
            .ok_or_else(|| SystemTerminalError::Unknown(id.to_string()))?;
        let lines = terminal.lines.iter().skip(offset);
        Ok(match limit {
            Some(limit) => lines.take(limit).cloned().collect(),
            None => lines.cloned().collect(),
        })
    }

    pub fn config(&self) -> SystemTerminalConfig {
        self.state().config.clone()
    }

    /// Applies `patch`; a smaller `maxLines` trims every buffer immediately.
    pub fn update_config(&self, patch: &SystemTerminalConfigPatch) -> SystemTerminalConfig {
        let config = {
            let mut state = self.state();
            let mut next = state.config.clone();
            if let Some(max_lines) = patch.max_lines {
                next.max_lines = max_lines;
            }
            let next = sanitize(next);
            for terminal in state.terminals.values_mut() {
                while terminal.lines.len() > next.max_lines {
                    terminal.lines.pop_front();
                }
            }
            state.config = next.clone();
            next
        };
        info!(
            event = "system_terminal_config_updated",
            max_lines = config.max_lines
        );
        self.emit_event("config-updated", json!({ "config": config }));
        config
    }
}

fn sanitize(mut config: SystemTerminalConfig) -> SystemTerminalConfig {
    config.max_lines = config.max_lines.max(1);
    config
}

fn split_lines(message: &str) -> impl Iterator<Item = &str> {
    let mut lines: Vec<&str> = message.lines().collect();
    if lines.is_empty() {
        lines.push("");
    }
    lines.into_iter()
}
