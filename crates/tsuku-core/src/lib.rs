//! Core engine for tsuku: version resolvers, the action registry, plan
//! generation, plan execution, the install manager and state store, and
//! container-based recipe validation.
//!
//! The CLI crate is a thin shell over this one; everything here is usable
//! as a library.

pub mod actions;
pub mod cancel;
pub mod config;
pub mod download;
pub mod errmsg;
pub mod executor;
pub mod install;
pub mod net;
pub mod process;
pub mod sanitize;
pub mod telemetry;
pub mod template;
pub mod toolchain;
pub mod userconfig;
pub mod validate;
pub mod version;

pub use tsuku_domain::{InstallationPlan, Recipe, ResolvedStep, State};
