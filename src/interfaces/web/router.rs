use axum::{
    Json, Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{agents, linear, messages, rules, settings, stream, tasks};
use super::ratelimit;

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/agents",
            get(agents::list_agents).post(agents::register_agent),
        )
        .route(
            "/api/agents/{agent}",
            get(agents::get_agent)
                .patch(agents::patch_agent)
                .delete(agents::delete_agent),
        )
        .route(
            "/api/agents/{agent}/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route(
            "/api/agents/{agent}/tasks/{task}",
            axum::routing::patch(tasks::patch_task),
        )
        .route("/api/agents/{agent}/heartbeat", post(agents::heartbeat))
        .route("/api/agents/{agent}/block", post(agents::report_block))
        .route("/api/agents/{agent}/error", post(agents::report_error))
        .route("/api/agents/{agent}/complete", post(agents::complete))
        .route("/api/agents/{agent}/assign", post(agents::assign))
        .route("/api/agents/{agent}/actions", post(agents::actions))
        .route("/api/messages", get(messages::list_messages))
        .route("/api/messages/{id}/read", post(messages::mark_read))
        .route(
            "/api/alert-rules",
            get(rules::list_rules).post(rules::create_rule),
        )
        .route(
            "/api/alert-rules/{id}",
            axum::routing::patch(rules::patch_rule).delete(rules::delete_rule),
        )
        .route(
            "/api/settings/sleep-schedule",
            get(settings::get_sleep_schedule).put(settings::put_sleep_schedule),
        )
        .route("/api/stream", get(stream::stream_events))
        .route("/api/logs", get(stream::stream_logs))
        .route("/api/linear/webhook", post(linear::linear_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::limit_writes,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors(&state.allowed_origins))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
