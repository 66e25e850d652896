//! Request handlers, one module per resource.

pub mod dead_letters;
pub mod health;
pub mod jobs;
pub mod queues;
