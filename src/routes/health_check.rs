use actix_web::{HttpResponse, Responder};

/// Liveness probe, answers as long as the HTTP server is up.
#[tracing::instrument(name = "Health check")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().finish()
}
