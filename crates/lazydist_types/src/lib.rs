//! Tabular values exchanged between the coordinator and workers.

pub mod batch;
pub mod datatype;
pub mod field;
pub mod scalar;
