//! Data models for Regvault

pub mod file;
pub mod version;

pub use file::*;
pub use version::*;
