//! Architectural dependency rules for JVM bytecode.
//!
//! Class files (loose, in directories, or inside jar/zip/war/ear archives) are
//! read into a [`Model`] of classes and packages. A [`Policy`] assigns every
//! class to a subject and decides which subjects may depend on each other;
//! evaluating it yields violations, unused rules and dependency cycles.

pub mod classfile;
pub mod dependency;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod importer;
pub mod location;
pub mod model;
pub mod policy_file;
pub mod scan;
pub mod telemetry;

mod checks;
#[cfg(test)]
mod test_harness;

pub use dependency::{CycleMode, DependencyResult, Policy, PolicyBuilder};
pub use error::{Error, Result};
pub use location::LocationMatcher;
pub use model::Model;
