//! Expiration-notification reconciliation engine for a resold-subscription
//! dashboard: derives a notification collection from sales and service
//! subscriptions and keeps it consistent across passes.
pub mod config;
pub mod engine;
pub mod gate;
pub mod model;
pub mod priority;
pub mod store;
