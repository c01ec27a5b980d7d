use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Order-independent key of the two users bound to a chat. The smaller id is
/// always stored first, so `{A, B}` and `{B, A}` produce the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[Uuid; 2]", try_from = "[Uuid; 2]")]
pub struct ParticipantPair {
    low: Uuid,
    high: Uuid,
}

impl ParticipantPair {
    pub fn new(a: Uuid, b: Uuid) -> CoreResult<Self> {
        if a == b {
            return Err(CoreError::validation("a chat needs two different participants"));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }
}

impl From<ParticipantPair> for [Uuid; 2] {
    fn from(pair: ParticipantPair) -> Self {
        [pair.low, pair.high]
    }
}

impl TryFrom<[Uuid; 2]> for ParticipantPair {
    type Error = CoreError;

    fn try_from(ids: [Uuid; 2]) -> Result<Self, Self::Error> {
        ParticipantPair::new(ids[0], ids[1])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub participants: ParticipantPair,
    /// Display names, in the same order as `participants`.
    pub participant_names: [String; 2],
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(user_id)
    }

    pub fn name_of(&self, user_id: Uuid) -> Option<&str> {
        if user_id == self.participants.low() {
            Some(&self.participant_names[0])
        } else if user_id == self.participants.high() {
            Some(&self.participant_names[1])
        } else {
            None
        }
    }

    /// Most recent activity, used to order a user's chat list.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.time)
            .unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    /// Store-assigned insertion sequence; breaks ties between equal timestamps.
    pub seq: i64,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended. Borrows the caller's text so a failed send
/// leaves it in the caller's hands.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: &'a str,
    pub text: &'a str,
}

/// Row shape of the `chats` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChatRow {
    pub id: Uuid,
    pub participant_low: Uuid,
    pub participant_high: Uuid,
    pub name_low: String,
    pub name_high: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ChatRow> for ChatSession {
    type Error = CoreError;

    fn try_from(row: ChatRow) -> Result<Self, Self::Error> {
        let last_message = match (row.last_message, row.last_message_time) {
            (Some(text), Some(time)) => Some(LastMessage { text, time }),
            _ => None,
        };

        Ok(ChatSession {
            id: row.id,
            participants: ParticipantPair::new(row.participant_low, row.participant_high)?,
            participant_names: [row.name_low, row.name_high],
            last_message,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ParticipantPair::new(a, b).unwrap(), ParticipantPair::new(b, a).unwrap());
    }

    #[test]
    fn test_pair_rejects_self_chat() {
        let a = Uuid::new_v4();
        assert!(matches!(ParticipantPair::new(a, a), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_pair_serializes_as_two_ids() {
        let pair = ParticipantPair::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let json = serde_json::to_value(pair).unwrap();
        assert_eq!(json.as_array().map(|a| a.len()), Some(2));

        let duplicate = serde_json::json!([pair.low(), pair.low()]);
        assert!(serde_json::from_value::<ParticipantPair>(duplicate).is_err());
    }

    #[test]
    fn test_name_of_follows_pair_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let pair = ParticipantPair::new(a, b).unwrap();
        let names = if pair.low() == a {
            ["A".to_string(), "B".to_string()]
        } else {
            ["B".to_string(), "A".to_string()]
        };
        let chat = ChatSession {
            id: Uuid::new_v4(),
            participants: pair,
            participant_names: names,
            last_message: None,
            created_at: Utc::now(),
        };
        assert_eq!(chat.name_of(a), Some("A"));
        assert_eq!(chat.name_of(b), Some("B"));
    }
}
