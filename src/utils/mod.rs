//! Path and text helpers shared by the services

pub mod paths;
pub mod text;
