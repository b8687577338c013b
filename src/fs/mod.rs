//! Small filesystem helpers shared by the json stores.

pub mod operations;
