pub mod config;
pub mod core;
pub mod events;
pub mod feeds;
pub mod models;
pub mod monitor;
pub mod remote;
pub mod store;
#[cfg(test)]
pub mod test_helpers;
