mod error;
mod preprocess;
mod routes;
mod utils;

pub mod app;
pub mod config;
pub mod metrics;
pub mod model;

pub use app::{build_router, start_app, AppState, LoadedModel};
