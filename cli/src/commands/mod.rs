//! Command implementations

pub mod console;
pub mod serve;
pub mod version;
