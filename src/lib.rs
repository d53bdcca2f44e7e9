pub mod aggregate;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod date;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod output;
pub mod refill;
pub mod store;
