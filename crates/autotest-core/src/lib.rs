//! Core domain types and traits for AutoTest.
//!
//! This crate contains:
//! - Canonical webhook events and the job key
//! - Container input/output and grading records
//! - Capability traits the scheduler depends on (class portal, comment
//!   poster, container launcher)

pub mod error;
pub mod event;
pub mod grading;
pub mod id;
pub mod launcher;
pub mod portal;
pub mod postback;

pub use error::{Error, Result};
pub use event::{CommentEvent, JobKey, PushEvent};
pub use id::JobId;
