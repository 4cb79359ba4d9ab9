//! Domain models for Guardline.
//!
//! # Core Concepts
//!
//! - [`Rule`]: A canonical policy directive, a [`RuleCategory`] tag plus an
//!   opaque [`RuleConfig`] payload.
//! - [`Capability`]: How well one platform adapter supports one category.
//! - [`Policy`]: A child's versioned, ordered rule set. Exactly one policy per
//!   child is active at a time.
//! - [`LinkedAccount`]: A family's credentials for one platform.
//!
//! ## Enforcement Records
//!
//! - [`EnforcementJob`]: One fan-out of a policy to every linked platform.
//! - [`PlatformResult`]: What happened on one linked account within a job.
//!
//! ## Offline Bundle
//!
//! - [`CompiledPolicy`]: The declarative document consumed by on-device
//!   agents that cannot be reached through a vendor API.

mod account;
mod capability;
mod child;
mod compiled;
mod job;
mod policy;
mod rule;

pub use account::*;
pub use capability::*;
pub use child::*;
pub use compiled::*;
pub use job::*;
pub use policy::*;
pub use rule::*;
