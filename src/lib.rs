pub mod config;
pub mod db;
pub mod diary;
pub mod diff;
pub mod engine;
pub mod error;
pub mod models;
pub mod providers;
pub mod report;
pub mod scheduler;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod test_support;
