pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod organizer;
pub mod state;
pub mod tally;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/polls", post(handlers::create_poll))
        .route("/api/polls/{poll_id}", get(handlers::get_poll).delete(handlers::delete_poll))
        .route("/api/polls/{poll_id}/votes", post(handlers::submit_vote))
        .route("/api/polls/{poll_id}/voter-name", post(handlers::update_voter_name))
        .route("/api/polls/{poll_id}/verify-password", post(handlers::verify_poll_password))
        .route("/api/polls/{poll_id}/close", post(handlers::close_poll))
        .route("/api/polls/{poll_id}/reopen", post(handlers::reopen_poll))
        .route("/api/schedules", post(handlers::create_schedule))
        .route(
            "/api/schedules/{schedule_id}",
            get(handlers::get_schedule).delete(handlers::delete_schedule),
        )
        .route("/api/schedules/{schedule_id}/responses", post(handlers::submit_response))
        .route(
            "/api/schedules/{schedule_id}/verify-password",
            post(handlers::verify_schedule_password),
        )
        .route("/api/schedules/{schedule_id}/close", post(handlers::close_schedule))
        .route("/api/schedules/{schedule_id}/reopen", post(handlers::reopen_schedule))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
