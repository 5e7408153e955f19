pub mod directory;
pub mod followups;
pub mod health;
pub mod knowledge;
pub mod scheduler;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(scheduler::router())
        .merge(followups::router())
        .merge(knowledge::router())
        .merge(directory::router())
}
