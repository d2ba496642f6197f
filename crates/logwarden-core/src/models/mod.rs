//! Data models for Logwarden

mod alert;
mod query;
mod rule;

pub use alert::*;
pub use query::*;
pub use rule::*;
