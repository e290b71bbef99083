use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecutedCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,                   // Surrogate row id (only set on rows read from the store)
    pub tool_use_id: String,               // Correlation id assigned by the log source
    pub command: String,                   // Command text as requested
    pub description: Option<String>,       // Human-readable description from the request
    pub cwd: Option<String>,               // Working directory at request time
    pub stdout: Option<String>,            // Captured standard output
    pub stderr: Option<String>,            // Captured standard error
    pub is_error: bool,                    // Result carried an error indicator
    pub timestamp: Option<DateTime<Utc>>,  // Request timestamp
    pub session_id: Option<String>,        // Session (source file stem)
}

/// Ingestion checkpoint for one source log file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexedFileState {
    pub path: String,
    pub offset: u64,
    pub mtime: i64,
}

/// One distinct command text collapsed across its executions.
#[derive(Debug, Serialize, Clone)]
pub struct AggregatedCommand {
    pub command: String,
    pub frequency: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub latest: ExecutedCommand,
}

#[derive(Debug, Serialize, Clone)]
pub struct RankedCommand {
    #[serde(flatten)]
    pub aggregate: AggregatedCommand,
    pub score: f64,
}
