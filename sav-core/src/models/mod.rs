pub mod access;
pub mod expert;
pub mod message;
pub mod profile;
pub mod session;
pub mod template;
pub mod viewed;

pub use access::AccessLevel;
pub use expert::Expert;
pub use message::MessageStatus;
pub use profile::TelegramProfile;
pub use session::{ActionEntry, SessionKind};
pub use template::{MediaItem, MediaType, TemplateField, TemplateSettings};
pub use viewed::{SwipeDirection, ViewedExpert};
