//! Database models.
//!
//! These models map directly to the database schema. Status columns are
//! stored as lowercase strings and exposed through typed enums.

pub mod channel;
pub mod credential;
pub mod failover;
pub mod health;
pub mod permission;
pub mod recovery;
pub mod storage;

pub use channel::*;
pub use credential::*;
pub use failover::*;
pub use health::*;
pub use permission::*;
pub use recovery::*;
pub use storage::*;
