//! Task definitions — the core data model for scheduled work.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use raceday_core::error::{RacedayError, Result};

/// What a task definition does. The three built-in kinds are compiled into
/// the process; tenants can define custom kinds that resolve against
/// handlers registered at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    RacePendingTimeout,
    RaceInProgressTimeout,
    ScoreRecalculation,
    Custom(String),
}

// Kinds serialize as their slug, same as the store column and the handler
// table key.
impl Serialize for TaskKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::parse(&String::deserialize(deserializer)?))
    }
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RacePendingTimeout => "race-pending-timeout",
            Self::RaceInProgressTimeout => "race-in-progress-timeout",
            Self::ScoreRecalculation => "score-recalculation",
            Self::Custom(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "race-pending-timeout" => Self::RacePendingTimeout,
            "race-in-progress-timeout" => Self::RaceInProgressTimeout,
            "score-recalculation" => Self::ScoreRecalculation,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a definition applies platform-wide or to one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskScope {
    Global,
    Tenant(String),
}

impl Serialize for TaskScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for TaskScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::decode(&String::deserialize(deserializer)?))
    }
}

impl TaskScope {
    pub fn encode(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Tenant(id) => format!("tenant:{id}"),
        }
    }

    pub fn decode(s: &str) -> Self {
        match s.strip_prefix("tenant:") {
            Some(id) => Self::Tenant(id.to_string()),
            None => Self::Global,
        }
    }
}

/// When/how the task triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Run every N seconds. The primary supported mode.
    Interval { every_secs: u64 },
    /// Run on a lightweight 5-field cron expression.
    Cron { expression: String },
}

impl Schedule {
    /// Next run time after `from`. `None` only for an unparseable cron
    /// expression — the engine logs and falls back rather than dying.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every_secs } => {
                Some(from + chrono::Duration::seconds(*every_secs as i64))
            }
            Self::Cron { expression } => crate::cron::CronExpr::parse(expression)
                .ok()
                .and_then(|c| c.next_after(from)),
        }
    }
}

/// Built-in vs. tenant-custom, a tagged source attribute rather than two
/// type hierarchies. Built-ins are registered in code at startup and are not
/// deletable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    #[serde(rename = "builtin")]
    BuiltIn,
    Custom,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuiltIn => "builtin",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "builtin" { Self::BuiltIn } else { Self::Custom }
    }
}

/// Result of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NeverRun,
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeverRun => "never_run",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failure" => Self::Failure,
            _ => Self::NeverRun,
        }
    }
}

/// Flat option-name → scalar-value map. The schema is implicit per task
/// kind; the engine does not validate it — a malformed value surfaces as a
/// handler failure, not an engine rejection.
pub type TaskConfig = BTreeMap<String, serde_json::Value>;

/// Read an integer option, falling back to `default` when absent.
/// Present-but-wrong-type is a configuration error.
pub fn config_i64(config: &TaskConfig, key: &str, default: i64) -> Result<i64> {
    match config.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| RacedayError::Config(format!("option '{key}' is not an integer: {v}"))),
    }
}

/// Read a string-array option, `None` when absent.
pub fn config_str_list(config: &TaskConfig, key: &str) -> Result<Option<Vec<String>>> {
    match config.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => {
                        return Err(RacedayError::Config(format!(
                            "option '{key}' contains a non-string entry: {item}"
                        )));
                    }
                }
            }
            Ok(Some(out))
        }
        Some(v) => Err(RacedayError::Config(format!(
            "option '{key}' is not an array: {v}"
        ))),
    }
}

/// A schedulable unit of periodic work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Fixed slug for built-ins, uuid for custom definitions.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub kind: TaskKind,
    pub scope: TaskScope,
    pub schedule: Schedule,
    pub config: TaskConfig,
    pub source: TaskSource,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: RunStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// A built-in definition with a fixed id. First registration schedules
    /// it to run on the next tick.
    pub fn builtin(id: &str, name: &str, kind: TaskKind, schedule: Schedule) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            scope: TaskScope::Global,
            schedule,
            config: TaskConfig::new(),
            source: TaskSource::BuiltIn,
            is_active: true,
            next_run_at: Some(Utc::now()),
            last_run_at: None,
            last_run_status: RunStatus::NeverRun,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// A tenant-defined custom definition.
    pub fn custom(
        name: &str,
        kind: TaskKind,
        scope: TaskScope,
        schedule: Schedule,
        config: TaskConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            scope,
            schedule,
            config,
            source: TaskSource::Custom,
            is_active: true,
            next_run_at: Some(now),
            last_run_at: None,
            last_run_status: RunStatus::NeverRun,
            last_error: None,
            created_at: now,
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    /// Check whether this definition is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.next_run_at {
            Some(next) => now >= next,
            None => false,
        }
    }
}

/// One row of the append-only execution audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ExecOutcome,
    pub error: Option<String>,
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Success,
    Failure,
    /// The handler exceeded the per-execution timeout and was abandoned.
    Timeout,
}

impl ExecOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "timeout" => Self::Timeout,
            _ => Self::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        assert_eq!(
            TaskKind::parse("race-pending-timeout"),
            TaskKind::RacePendingTimeout
        );
        assert_eq!(
            TaskKind::parse("tenant-digest"),
            TaskKind::Custom("tenant-digest".into())
        );
        assert_eq!(TaskKind::Custom("x".into()).as_str(), "x");
    }

    #[test]
    fn test_kind_and_scope_serialize_as_slugs() {
        let kind = TaskKind::Custom("tenant-digest".into());
        assert_eq!(serde_json::to_value(&kind).unwrap(), serde_json::json!("tenant-digest"));
        assert_eq!(
            serde_json::to_value(TaskKind::RacePendingTimeout).unwrap(),
            serde_json::json!("race-pending-timeout")
        );
        assert_eq!(
            serde_json::to_value(TaskScope::Tenant("t9".into())).unwrap(),
            serde_json::json!("tenant:t9")
        );
        assert_eq!(
            serde_json::from_value::<TaskKind>(serde_json::json!("score-recalculation")).unwrap(),
            TaskKind::ScoreRecalculation
        );
    }

    #[test]
    fn test_scope_encoding() {
        assert_eq!(TaskScope::Global.encode(), "global");
        assert_eq!(TaskScope::Tenant("t9".into()).encode(), "tenant:t9");
        assert_eq!(TaskScope::decode("tenant:t9"), TaskScope::Tenant("t9".into()));
        assert_eq!(TaskScope::decode("global"), TaskScope::Global);
    }

    #[test]
    fn test_interval_next_after() {
        let from = Utc::now();
        let sched = Schedule::Interval { every_secs: 3600 };
        let next = sched.next_after(from).unwrap();
        assert_eq!((next - from).num_seconds(), 3600);
    }

    #[test]
    fn test_due_logic() {
        let now = Utc::now();
        let mut task = TaskDefinition::builtin(
            "race-pending-timeout",
            "Race pending timeout",
            TaskKind::RacePendingTimeout,
            Schedule::Interval { every_secs: 60 },
        );
        task.next_run_at = Some(now - chrono::Duration::seconds(1));
        assert!(task.is_due(now));

        task.is_active = false;
        assert!(!task.is_due(now));

        task.is_active = true;
        task.next_run_at = Some(now + chrono::Duration::seconds(10));
        assert!(!task.is_due(now));
    }

    #[test]
    fn test_config_helpers() {
        let mut cfg = TaskConfig::new();
        cfg.insert("timeout_minutes".into(), serde_json::json!(30));
        cfg.insert("label".into(), serde_json::json!("hi"));

        assert_eq!(config_i64(&cfg, "timeout_minutes", 20).unwrap(), 30);
        assert_eq!(config_i64(&cfg, "warning_minutes", 10).unwrap(), 10);
        assert!(config_i64(&cfg, "label", 0).is_err());

        cfg.insert("tournament_ids".into(), serde_json::json!(["a", "b"]));
        assert_eq!(
            config_str_list(&cfg, "tournament_ids").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(config_str_list(&cfg, "missing").unwrap(), None);

        cfg.insert("bad".into(), serde_json::json!([1, 2]));
        assert!(config_str_list(&cfg, "bad").is_err());
    }
}
