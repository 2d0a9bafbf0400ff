pub mod aliases;
pub mod dto;
pub mod executor;
pub mod export;
pub mod filter;
pub mod handlers;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
