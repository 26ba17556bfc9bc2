//! Runtime-facing edges of the profile database
//!
//! A sampler that feeds execution counts and call-site observations into a
//! profile, and a planner that turns a profile into per-file compile plans.

pub mod hot_path;
pub mod compiler;

pub use hot_path::HotMethodSampler;
pub use compiler::{CompilationPlanner, CompilePlan, PlanError, Specialization};
