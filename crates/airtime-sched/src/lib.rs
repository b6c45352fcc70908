pub mod config;
pub mod durations;
pub mod model;
pub mod platform;
pub mod schedule;
pub mod state;
