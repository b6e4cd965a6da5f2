//! Data model shared across tsuku: recipes as authored, installation plans
//! as generated, and the on-disk installed-tool state.
//!
//! This crate is deliberately free of I/O beyond serialization so the core
//! engine and the CLI can both depend on it without pulling in the network
//! or filesystem stack.

mod plan;
mod recipe;
mod state;

pub use plan::{InstallationPlan, Platform, PlanVerify, ResolvedStep, PLAN_FORMAT_VERSION};
pub use recipe::{
    Metadata, Params, Patch, Recipe, Step, ToolType, Verify, VersionFormat, VersionSource,
    VersionSpec, WhenClause,
};
pub use state::{LibraryState, State, ToolState, VersionState};
