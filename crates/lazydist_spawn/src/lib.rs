//! Coordinator and workers for running computations on a fixed size group
//! of worker processes.
//!
//! The coordinator ([`spawner::Spawner`]) lazily spawns a group, marshals
//! arguments to it (broadcast, scatter, or by reference to results already
//! stored on the workers), runs a named computation on every rank, and
//! returns replicated outputs directly and distributed outputs as lazy
//! [`frame::DistributedFrame`]s.

pub mod arg;
pub mod builtins;
pub mod channel;
pub mod command;
pub mod computation;
pub mod config;
pub mod env;
pub mod failure;
pub mod frame;
pub mod group;
pub mod launcher;
pub mod lazy_arg;
pub mod marshal;
pub mod message;
pub mod spawner;
pub mod value;
pub mod worker;

#[cfg(test)]
mod tests;
