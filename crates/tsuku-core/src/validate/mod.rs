//! Container-based recipe validation: run a freshly generated plan inside
//! an isolated runtime to prove the recipe actually installs and verifies.

mod executor;
mod runtime;

pub use executor::{ValidationResult, Validator, DEFAULT_VALIDATION_IMAGE};
pub use runtime::{
    run_container, ContainerRuntime, Mount, ResourceLimits, RunOptions, RuntimeDetector,
    RuntimeKind, CONTAINER_LABEL,
};
