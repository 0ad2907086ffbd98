//! Repository layer for database access.
//!
//! Each table group sits behind an async trait with a SQLx implementation so
//! components can be exercised against an in-memory pool.

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
