//! Services backing the webhook routes.

pub mod github;
pub mod normalizer;
