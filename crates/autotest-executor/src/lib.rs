//! Grading container launchers for AutoTest.
//!
//! Provides launcher implementations for running grading containers:
//! - Local Docker

pub mod docker;

pub use autotest_core::launcher::{ContainerHandle, ContainerLauncher, LaunchSpec};
pub use docker::DockerLauncher;
