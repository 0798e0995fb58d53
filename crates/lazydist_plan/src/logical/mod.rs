pub mod logical_aggregate;
pub mod logical_join;
pub mod logical_order;
pub mod logical_project;
pub mod logical_scan;
pub mod logical_setop;
pub mod logical_write;
pub mod operator;
