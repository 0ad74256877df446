//! CLI command implementations

pub mod status;
pub mod sync;
pub mod templates;

pub use status::StatusArgs;
pub use sync::{bootstrap, SyncArgs, WatchArgs};
pub use templates::TemplatesArgs;
