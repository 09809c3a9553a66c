pub mod api;
pub mod config;
pub mod error;
pub mod hubs;
pub mod machine;
pub mod models;
pub mod notify;
pub mod observability;
pub mod state;
