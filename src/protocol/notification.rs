//! Notification definitions
//!
//! A notification tells other running instances that a task changed.
//! The subsystem only interprets the reserved heartbeat kind; every other
//! kind is passed through to the host untouched.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Notification Kind
// ─────────────────────────────────────────────────────────────────

/// Domain event carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Updated,
    Deleted,
    StatusChanged,
    Archived,
    Unarchived,
    TagAdded,
    TagRemoved,
    DueDateSet,
    DueDateCleared,
    PriorityChanged,
    /// Liveness pulse; consumed by the sync layer, never shown to the host
    Heartbeat,
}

impl NotificationKind {
    /// Every kind, heartbeat last
    pub const ALL: [NotificationKind; 12] = [
        NotificationKind::Created,
        NotificationKind::Updated,
        NotificationKind::Deleted,
        NotificationKind::StatusChanged,
        NotificationKind::Archived,
        NotificationKind::Unarchived,
        NotificationKind::TagAdded,
        NotificationKind::TagRemoved,
        NotificationKind::DueDateSet,
        NotificationKind::DueDateCleared,
        NotificationKind::PriorityChanged,
        NotificationKind::Heartbeat,
    ];

    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Created => "created",
            NotificationKind::Updated => "updated",
            NotificationKind::Deleted => "deleted",
            NotificationKind::StatusChanged => "status_changed",
            NotificationKind::Archived => "archived",
            NotificationKind::Unarchived => "unarchived",
            NotificationKind::TagAdded => "tag_added",
            NotificationKind::TagRemoved => "tag_removed",
            NotificationKind::DueDateSet => "due_date_set",
            NotificationKind::DueDateCleared => "due_date_cleared",
            NotificationKind::PriorityChanged => "priority_changed",
            NotificationKind::Heartbeat => "heartbeat",
        }
    }

    /// Whether this is the reserved liveness kind
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, NotificationKind::Heartbeat)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown notification kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for NotificationKind {
    type Err = UnknownKind;

    /// Accepts the wire name, case-insensitively, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        NotificationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Notification
// ─────────────────────────────────────────────────────────────────

/// One change announcement, transmitted verbatim between instances.
///
/// Fields are private so a notification cannot change after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    kind: NotificationKind,

    #[serde(rename = "id")]
    subject_id: i64,

    timestamp: DateTime<Utc>,
}

impl Notification {
    /// Create a notification stamped with the current time
    pub fn new(kind: NotificationKind, subject_id: i64) -> Self {
        Self::at(kind, subject_id, Utc::now())
    }

    /// Create a notification with an explicit timestamp
    pub fn at(kind: NotificationKind, subject_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            subject_id,
            timestamp,
        }
    }

    /// Liveness pulse sent by the primary
    pub fn heartbeat() -> Self {
        Self::new(NotificationKind::Heartbeat, 0)
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    /// Identifier of the affected task; `0` for heartbeats
    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind.is_heartbeat()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.kind,
            self.subject_id,
            self.timestamp.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_field_names() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let n = Notification::at(NotificationKind::StatusChanged, 42, ts);
        let json = serde_json::to_string(&n).unwrap();

        assert_eq!(
            json,
            r#"{"type":"status_changed","id":42,"timestamp":"2026-03-01T12:00:00Z"}"#
        );
    }

    #[test]
    fn test_kind_names_match_serde() {
        for kind in NotificationKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("created".parse::<NotificationKind>().unwrap(), NotificationKind::Created);
        assert_eq!(
            "Due-Date-Set".parse::<NotificationKind>().unwrap(),
            NotificationKind::DueDateSet
        );
        assert_eq!(
            "tag_removed".parse::<NotificationKind>().unwrap(),
            NotificationKind::TagRemoved
        );
        assert!("exploded".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn test_heartbeat() {
        let hb = Notification::heartbeat();
        assert!(hb.is_heartbeat());
        assert_eq!(hb.subject_id(), 0);
        assert!(!Notification::new(NotificationKind::Created, 1).is_heartbeat());
    }

    #[test]
    fn test_decode_from_foreign_timestamp() {
        let json = r#"{"type":"deleted","id":7,"timestamp":"2026-03-01T12:00:00.123456789+02:00"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind(), NotificationKind::Deleted);
        assert_eq!(n.subject_id(), 7);
        assert_eq!(n.timestamp().timestamp_subsec_nanos(), 123_456_789);
    }
}
