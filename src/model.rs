//! Core data model.
//!
//! A task is a named unit of synthetic work of a given kind. It lives inside a
//! workspace, which is addressed by an API key and a workspace id.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task tracked by a workspace scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            status: TaskStatus::Queued,
        }
    }

    /// Move to `to`, rejecting anything that is not a forward transition.
    pub fn transition(&mut self, to: TaskStatus) -> Result<TaskStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        self.status = to;
        Ok(from)
    }
}

/// Task identifier. Unique and increasing within one scheduler, starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(TaskId)
            .map_err(|_| Error::BadRequest("invalid task id".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Kind of synthetic work. Ordered from least to most intensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "gx.tiny")]
    Tiny,
    #[serde(rename = "gx.micro")]
    Micro,
    #[serde(rename = "gx.small")]
    Small,
    #[serde(rename = "gx.medium")]
    Medium,
    #[serde(rename = "gx.large")]
    Large,
    #[serde(rename = "gx.heavy")]
    Heavy,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::Tiny,
        TaskKind::Micro,
        TaskKind::Small,
        TaskKind::Medium,
        TaskKind::Large,
        TaskKind::Heavy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Tiny => "gx.tiny",
            TaskKind::Micro => "gx.micro",
            TaskKind::Small => "gx.small",
            TaskKind::Medium => "gx.medium",
            TaskKind::Large => "gx.large",
            TaskKind::Heavy => "gx.heavy",
        }
    }

    /// Nominal upper bound on how long a task of this kind runs.
    pub fn ceiling(self) -> Duration {
        match self {
            TaskKind::Tiny => Duration::from_secs(3),
            TaskKind::Micro => Duration::from_secs(5),
            TaskKind::Small => Duration::from_secs(10),
            TaskKind::Medium => Duration::from_secs(30),
            TaskKind::Large => Duration::from_secs(2 * 60),
            TaskKind::Heavy => Duration::from_secs(5 * 60),
        }
    }

    /// Duration for a given random factor in `[0, 1)`. Always strictly below
    /// the ceiling.
    pub fn scaled_duration(self, factor: f64) -> Duration {
        let ceiling = self.ceiling().as_nanos() as u64;
        let factor = factor.clamp(0.0, 1.0);
        let nanos = (ceiling as f64 * factor) as u64;
        Duration::from_nanos(nanos.min(ceiling.saturating_sub(1)))
    }

    pub fn random_duration(self) -> Duration {
        self.scaled_duration(rand::random::<f64>())
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::BadRequest("invalid task type".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pending queue.
    Queued,
    /// Holding an admission slot, executing.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Withdrawn while still queued. Terminal.
    Cancelled,
    /// Execution aborted. Terminal.
    Failed,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Queued, Running) | (Queued, Cancelled) | (Running, Completed) | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Workspace id
// ---------------------------------------------------------------------------

/// Workspace identifier, restricted to `[A-Za-z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub const DEFAULT: &'static str = "default";

    /// Parse a raw, possibly absent id. Blank input means `"default"`.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let trimmed = raw.map(str::trim).unwrap_or_default();
        let id = if trimmed.is_empty() {
            Self::DEFAULT
        } else {
            trimmed
        };

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::BadRequest("invalid workspace id".to_string()));
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One text message on the push channel. The payload is shared so a
/// broadcast clones a pointer per subscriber, not the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Frame(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Queued));
        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
    }

    #[test]
    fn task_transition_rejects_skipping_running() {
        let mut task = Task::new(TaskId(1), "x", TaskKind::Tiny);
        let err = task.transition(TaskStatus::Completed).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: TaskStatus::Queued,
                to: TaskStatus::Completed
            }
        ));
        assert_eq!(task.transition(TaskStatus::Running).unwrap(), TaskStatus::Queued);
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn ceilings_grow_with_intensity() {
        for pair in TaskKind::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].ceiling() <= pair[1].ceiling());
        }
    }

    #[test]
    fn random_duration_stays_below_ceiling() {
        for kind in TaskKind::ALL {
            for _ in 0..200 {
                assert!(kind.random_duration() < kind.ceiling());
            }
            assert_eq!(kind.scaled_duration(0.0), Duration::ZERO);
            assert!(kind.scaled_duration(0.999_999_999_999) < kind.ceiling());
            assert!(kind.scaled_duration(1.0) < kind.ceiling());
        }
    }

    #[test]
    fn task_serializes_with_wire_names() {
        let task = Task::new(TaskId(7), "render", TaskKind::Medium);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "name": "render", "type": "gx.medium", "status": "queued"})
        );
    }

    #[test]
    fn task_kind_parses_wire_names_only() {
        assert_eq!("gx.heavy".parse::<TaskKind>().unwrap(), TaskKind::Heavy);
        assert!("heavy".parse::<TaskKind>().is_err());
        assert!("gx.huge".parse::<TaskKind>().is_err());
    }

    #[test]
    fn workspace_id_defaults_and_validates() {
        assert_eq!(WorkspaceId::parse(None).unwrap().as_str(), "default");
        assert_eq!(WorkspaceId::parse(Some("   ")).unwrap().as_str(), "default");
        assert_eq!(WorkspaceId::parse(Some(" team-a_1 ")).unwrap().as_str(), "team-a_1");

        for bad in ["a b", "a/b", "ü", "a.b", "[x]", "^"] {
            assert!(
                matches!(WorkspaceId::parse(Some(bad)), Err(Error::BadRequest(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn frame_shares_its_text() {
        let frame = Frame::text(String::from("[]"));
        let copy = frame.clone();
        assert_eq!(copy.as_str(), "[]");
        assert_eq!(frame, copy);
    }

    #[test]
    fn task_id_parse() {
        assert_eq!("42".parse::<TaskId>().unwrap(), TaskId(42));
        assert!("-1".parse::<TaskId>().is_err());
        assert!("abc".parse::<TaskId>().is_err());
    }
}
