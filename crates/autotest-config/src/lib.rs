//! Configuration for AutoTest.
//!
//! This crate handles:
//! - System configuration sourced from the environment
//! - Course files (KDL) describing deliverables and staff
//! - A class portal backed by a course file

pub mod course;
pub mod error;
pub mod system;

pub use course::{CourseConfig, CoursePortal, parse_course};
pub use error::{ConfigError, ConfigResult};
pub use system::SystemConfig;
