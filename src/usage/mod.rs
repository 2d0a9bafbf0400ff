pub mod dto;
pub mod handlers;
pub mod limits;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use limits::UsageLimits;
pub use services::UsageMeter;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
