//! Notify Hub: aggregates events from chat and mail sources, flags urgent
//! ones and action items, and keeps a bounded history for the dashboard.

pub mod calendar;
pub mod channels;
pub mod classifier;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod store;
