//! Grading job scheduling for AutoTest.
//!
//! Turns push and comment events into grading jobs, runs them in containers
//! reached through the rendezvous server, and decides when feedback may be
//! posted back to the requester.

pub mod queue;
pub mod quota;
pub mod rendezvous;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use queue::{JobQueue, Lane, QueueEntry};
pub use quota::FeedbackQuotaEngine;
pub use rendezvous::{ContainerChannel, PendingSocket, RendezvousError, RendezvousServer};
pub use runner::{Dispatch, JobRunner};
pub use scheduler::{
    CommitScheduler, ExecutionRecord, SchedulerConfig, SchedulerServices, SchedulerStatus,
};
