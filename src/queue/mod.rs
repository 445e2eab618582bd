//! Broker plumbing: message format, publisher and consumer

pub mod consumer;
pub mod message;
pub mod producer;

pub use consumer::{AckGuard, Acknowledge, Dispatch, QueueConsumer, SweepDispatcher};
pub use message::SweepRequest;
pub use producer::{AmqpPublisher, MessagePublisher};
