//! Lazy relational plans.
//!
//! Plans are built in a [`arena::PlanArena`] as immutable operator and
//! expression nodes, rewritten by pushing new nodes, and converted into an
//! external engine's plan objects through [`backend::PlanBackend`] when a
//! result is needed. [`execute::PlanExecutor`] runs them in process or ships
//! them to a process group.

pub mod arena;
pub mod backend;
pub mod config;
pub mod convert;
pub mod execute;
pub mod explain;
pub mod expr;
pub mod logical;
pub mod operand;
pub mod projection;
pub mod rewrite;
pub mod schema;

#[cfg(test)]
mod testutil;
