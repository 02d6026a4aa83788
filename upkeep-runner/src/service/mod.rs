//! Service layer
//!
//! Services contain the decision logic of the runner. They sequence the
//! external commands of a run and decide what its outcome is.
//!
//! External programs are reached only through the `CommandRunner` trait so
//! services can be exercised without touching the host.

mod update;

pub use update::{StepResult, UpdateRunner};
