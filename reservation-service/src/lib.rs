pub mod api;
pub mod engine;
pub mod error;
pub mod models;
pub mod retry;
pub mod schema;
pub mod store;
