pub mod chat;
pub mod matching;
pub mod presence;
pub mod proximity;
pub mod subscription;

pub use chat::ChatService;
pub use matching::{AcceptOutcome, HelperFilter, HelperMatch, MatchingEngine};
pub use presence::{PresenceConnection, PresenceEvent, PresenceTracker, PresenceView};
pub use subscription::Subscription;
