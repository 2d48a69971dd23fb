//! Domain models for taskforest.
//!
//! # Core Concepts
//!
//! - [`Organization`]: Container for a forest of tasks, with a creator, members and managers.
//! - [`Task`]: Unit of work inside an organization. Tasks point at an optional parent task
//!   in the same organization, forming a forest per organization.
//! - [`User`]: Account that creates, watches and is assigned to tasks.
//!
//! Stored records only carry user ids. Read paths replace them with [`ResolvedUser`]
//! values (see [`ResolvedTask`] and [`OrganizationView`]).

mod organization;
mod session;
mod task;
mod user;

pub use organization::*;
pub use session::*;
pub use task::*;
pub use user::*;
