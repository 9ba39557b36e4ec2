pub mod config;
pub mod dates;
pub mod diff;
pub mod exclude;
pub mod filter;
pub mod record;
pub mod remote;
pub mod report;
pub mod scanner;
pub mod sync;
pub mod transfer;

/// Application name for XDG paths
pub const APP_NAME: &str = "tunesync";
