//! task-relay — queue-driven worker bridging a task queue to a long-lived
//! agent session.
//!
//! The worker dequeues one task at a time from a Redis-backed delivery
//! channel ([`queue`]), drives it through the external agent runtime
//! ([`runtime`], [`coordinator`]), streams progress and the terminal result
//! to the output channel ([`publish`]), and applies out-of-band stop/steer/
//! reset signals from a pub/sub control bus ([`control`]) against whatever
//! task is currently in flight ([`slot`]).

pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod publish;
pub mod queue;
pub mod runtime;
pub mod slot;
pub mod telemetry;
pub mod worker;
