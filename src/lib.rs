//! Month-view task planner: expands repeating tasks onto a six-week calendar
//! grid and merges in per-day completions and linked files.

pub mod api;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod occurrence;
pub mod recurrence;
pub mod service;
pub mod store;
pub mod task;

pub use error::{Error, Result};
