//! Database models split into domain-specific modules.

pub mod attendance;
pub mod audit;
pub mod common;
pub mod holiday;
pub mod leave;
pub mod role;
pub mod tour;
pub mod user;

pub use attendance::*;
pub use audit::*;
pub use common::*;
pub use holiday::*;
pub use leave::*;
pub use role::*;
pub use tour::*;
pub use user::*;
