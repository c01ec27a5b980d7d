pub mod chats;
pub mod events;
pub mod profiles;
pub mod requests;

pub use chats::{ChatSession, LastMessage, Message, NewMessage, ParticipantPair};
pub use events::{ChangeEvent, ChangeOp, Collection, Record};
pub use profiles::{Location, NewProfile, PresencePatch, Profile, ProfileFilter, Role, UserPresence};
pub use requests::{RequestFilter, RequestStatus, SupportRequest};
