use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

pub type TerminalId = String;

pub fn new_terminal_id() -> TerminalId {
    format!("term-{}", Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    NativePty,
    Subprocess,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::NativePty => "native-pty",
            BackendKind::Subprocess => "subprocess",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    Low,
    Medium,
    High,
}

/// What a backend can do. One constant per backend kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendCapabilities {
    pub backend_kind: BackendKind,
    pub supports_resize: bool,
    pub supports_colors: bool,
    pub supports_interactivity: bool,
    pub supports_history: bool,
    pub reliability: Reliability,
}

impl BackendCapabilities {
    pub const NATIVE_PTY: Self = Self {
        backend_kind: BackendKind::NativePty,
        supports_resize: true,
        supports_colors: true,
        supports_interactivity: true,
        supports_history: true,
        reliability: Reliability::High,
    };

    pub const SUBPROCESS: Self = Self {
        backend_kind: BackendKind::Subprocess,
        supports_resize: false,
        supports_colors: false,
        supports_interactivity: true,
        supports_history: true,
        reliability: Reliability::Low,
    };

    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::NativePty => Self::NATIVE_PTY,
            BackendKind::Subprocess => Self::SUBPROCESS,
        }
    }
}

/// Caller-supplied spawn configuration. Absent fields are filled with
/// platform defaults by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            shell: None,
            args: None,
            cwd: None,
            env: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl SpawnOptions {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Dimensions clamped to at least one cell.
    pub fn size(&self) -> (u16, u16) {
        (self.cols.max(1), self.rows.max(1))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KillSignal {
    /// Ctrl-C delivered through the terminal.
    Interrupt,
    #[default]
    Terminate,
}

impl FromStr for KillSignal {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_uppercase().as_str() {
            "INTERRUPT" | "SIGINT" | "INT" => Ok(KillSignal::Interrupt),
            "TERMINATE" | "SIGTERM" | "TERM" | "SIGKILL" | "KILL" => Ok(KillSignal::Terminate),
            other => Err(format!("Unknown signal: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_options_fill_size_defaults() {
        let options: SpawnOptions =
            serde_json::from_str(r#"{"shell":"/bin/zsh","cwd":"/tmp"}"#).expect("parse");
        assert_eq!(options.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(options.cols, DEFAULT_COLS);
        assert_eq!(options.rows, DEFAULT_ROWS);
        assert!(options.args.is_none());
    }

    #[test]
    fn spawn_options_size_never_zero() {
        let options = SpawnOptions::default().with_size(0, 0);
        assert_eq!(options.size(), (1, 1));
    }

    #[test]
    fn capabilities_serialize_camel_case() {
        let value = serde_json::to_value(BackendCapabilities::SUBPROCESS).expect("serialize");
        assert_eq!(value["backendKind"], "subprocess");
        assert_eq!(value["supportsResize"], false);
        assert_eq!(value["reliability"], "low");
    }

    #[test]
    fn kill_signal_accepts_posix_names() {
        assert_eq!("SIGINT".parse::<KillSignal>(), Ok(KillSignal::Interrupt));
        assert_eq!("kill".parse::<KillSignal>(), Ok(KillSignal::Terminate));
        assert!("SIGHUP".parse::<KillSignal>().is_err());
    }
}
