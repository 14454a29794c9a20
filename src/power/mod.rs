//! Scheduled shutdown and RTC wake-up of a remote host.
//!
//! Schedules live in root's crontab on the host; nothing is stored
//! locally except the last host login (see [`CredentialStore`]).

mod credentials;
mod manager;
pub mod schedule;

pub use credentials::{CredentialStore, HostCredentials, DEFAULT_CREDENTIALS_PATH};
pub use manager::{PowerManager, ScheduleDetails};
pub use schedule::{sleep_seconds, ClockTime, Schedule};
