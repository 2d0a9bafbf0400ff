pub mod dto;
pub mod handlers;
pub mod pricing;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use pricing::Pricing;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
