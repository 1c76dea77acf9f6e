//! Client reconciliation layer.
//!
//! The client updates its own state before the server answers, then lets
//! server responses and pushed snapshots overwrite it. Nothing optimistic
//! is ever final.

pub mod moderation;
pub mod session;
pub mod view;

pub use moderation::ModerationQueue;
pub use session::{ApiBackend, Backend, ClientSession};
pub use view::{ActionState, ClientEvent, ClientRules, ClientView, Effect, Notice, RowView};
