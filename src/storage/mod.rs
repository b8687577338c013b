//! Persistence. Counter definitions live in json files handled by [config_store::ConfigStore],
//! while the counts themselves are kept in a sqlite table behind [counter_store::CounterStore].

pub mod config_store;
pub mod counter_store;
pub mod entities;
