use serde::Serialize;

use super::{ChatSession, Message, Profile, SupportRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Profiles,
    Chats,
    Messages,
    SupportRequests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Record {
    Profile(Profile),
    Chat(ChatSession),
    Message(Message),
    SupportRequest(SupportRequest),
}

/// One committed write, as published on the store's change feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: Record,
}

impl ChangeEvent {
    pub fn insert(record: Record) -> Self {
        Self { op: ChangeOp::Insert, record }
    }

    pub fn update(record: Record) -> Self {
        Self { op: ChangeOp::Update, record }
    }

    pub fn collection(&self) -> Collection {
        match self.record {
            Record::Profile(_) => Collection::Profiles,
            Record::Chat(_) => Collection::Chats,
            Record::Message(_) => Collection::Messages,
            Record::SupportRequest(_) => Collection::SupportRequests,
        }
    }
}
