/// HTTP handlers: health and Prometheus metrics
use crate::metrics;
use crate::services::job_queue::JobQueue;
use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

/// Shared state for the operability endpoints
#[derive(Clone)]
pub struct HealthState {
    pub queue: Arc<dyn JobQueue>,
    pub durable: bool,
}

/// Reports queue reachability and depth; 503 when the queue backend is unreachable.
pub async fn health(state: web::Data<HealthState>) -> impl Responder {
    match state.queue.len().await {
        Ok(depth) => {
            metrics::QUEUE_DEPTH.set(depth as f64);
            HttpResponse::Ok().json(serde_json::json!({
                "status": "ok",
                "queue_depth": depth,
                "durable": state.durable,
            }))
        }
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unavailable",
            "error": e.to_string(),
        })),
    }
}

pub async fn metrics_handler() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::gather())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler));
}
