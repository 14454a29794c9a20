//! Session management module.
//!
//! This module provides the session registry, session identifiers, the
//! connect/disconnect lifecycle and idle-session reaping.

mod connector;
mod id;
pub mod reaper;
mod store;

pub use connector::Connector;
pub use id::SessionId;
pub use reaper::{spawn_reaper, ReaperConfig};
pub use store::{Session, SessionRegistry};
