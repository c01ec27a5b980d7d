use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Declined | RequestStatus::Completed)
    }

    /// The only edges of the request lifecycle.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Declined)
                | (RequestStatus::Accepted, RequestStatus::Completed)
        )
    }

    /// Rejects any move that isn't a lifecycle edge. Stores call this before
    /// their conditional write.
    pub fn ensure_transition(&self, next: RequestStatus) -> CoreResult<()> {
        if self.is_terminal() {
            return Err(CoreError::validation(format!(
                "a {} request cannot change status",
                self
            )));
        }
        if !self.can_transition_to(next) {
            return Err(CoreError::validation(format!(
                "request cannot move from {} to {}",
                self, next
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "declined" => Ok(RequestStatus::Declined),
            "completed" => Ok(RequestStatus::Completed),
            other => Err(CoreError::validation(format!("unknown request status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportRequest {
    pub id: Uuid,
    pub seeker_id: Uuid,
    pub helper_id: Uuid,
    pub message: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupportRequest {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.seeker_id == user_id || self.helper_id == user_id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
}

/// Row shape of the `support_requests` table.
#[derive(Debug, Clone, FromRow)]
pub struct SupportRequestRow {
    pub id: Uuid,
    pub seeker_id: Uuid,
    pub helper_id: Uuid,
    pub message: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SupportRequestRow> for SupportRequest {
    type Error = CoreError;

    fn try_from(row: SupportRequestRow) -> Result<Self, Self::Error> {
        Ok(SupportRequest {
            id: row.id,
            seeker_id: row.seeker_id,
            helper_id: row.helper_id,
            message: row.message,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RequestStatus; 4] = [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Declined,
        RequestStatus::Completed,
    ];

    #[test]
    fn test_only_lifecycle_edges_are_allowed() {
        let allowed: Vec<(RequestStatus, RequestStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (RequestStatus::Pending, RequestStatus::Accepted),
                (RequestStatus::Pending, RequestStatus::Declined),
                (RequestStatus::Accepted, RequestStatus::Completed),
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(ALL.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_ensure_transition_rejects_illegal_edges() {
        assert!(RequestStatus::Pending.ensure_transition(RequestStatus::Accepted).is_ok());
        assert!(matches!(
            RequestStatus::Declined.ensure_transition(RequestStatus::Pending),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            RequestStatus::Pending.ensure_transition(RequestStatus::Completed),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_status_parses_its_own_name() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<RequestStatus>().is_err());
    }
}
