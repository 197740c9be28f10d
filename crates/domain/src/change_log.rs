use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use gridline_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RecordId;

/// How long an undo offer stays actionable after a delete.
pub const UNDO_WINDOW_SECONDS: i64 = 6;

/// Server-issued change-log identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(i64);

impl ChangeId {
    /// Wraps a raw change-log id.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for ChangeId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Record was created.
    Create,
    /// Record was updated.
    Update,
    /// Record was deleted.
    Delete,
    /// Deleted record was restored.
    Restore,
}

impl ChangeAction {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }
}

impl FromStr for ChangeAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "restore" => Ok(Self::Restore),
            _ => Err(AppError::Validation(format!(
                "unknown change action '{value}'"
            ))),
        }
    }
}

/// One change-log row as exposed by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Change-log id.
    pub id: ChangeId,
    /// Recorded mutation.
    pub action: ChangeAction,
    /// Affected record, when known.
    #[serde(default)]
    pub record_id: Option<RecordId>,
    /// Record state before the mutation.
    #[serde(default)]
    pub snapshot: Option<Value>,
    /// Subject that performed the mutation.
    #[serde(default)]
    pub actor: Option<String>,
    /// Time of the mutation.
    pub timestamp: DateTime<Utc>,
}

/// Time-limited offer to undo a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoOffer {
    change_id: ChangeId,
    expires_at: DateTime<Utc>,
}

impl UndoOffer {
    /// Creates an offer valid for the standard undo window.
    #[must_use]
    pub fn new(change_id: ChangeId, issued_at: DateTime<Utc>) -> Self {
        Self {
            change_id,
            expires_at: issued_at + Duration::seconds(UNDO_WINDOW_SECONDS),
        }
    }

    /// Returns the change to restore.
    #[must_use]
    pub fn change_id(&self) -> ChangeId {
        self.change_id
    }

    /// Returns when the offer lapses.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns whether the offer can still be taken at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
