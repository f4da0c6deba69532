use actix_web::web;
use actix_web::HttpResponse;
use serde::Serialize;

/// Process start time, stored in app state so the probe can report uptime.
pub struct ApplicationStart(pub std::time::Instant);

#[derive(Serialize)]
struct Health {
    status: &'static str,
    uptime: u64,
}

/// Cheap liveness probe: no store or queue round-trips, so probe traffic
/// cannot pile up behind a slow dependency.
pub async fn health_check(started_at: web::Data<ApplicationStart>) -> HttpResponse {
    HttpResponse::Ok().json(Health {
        status: "OK",
        uptime: started_at.0.elapsed().as_secs(),
    })
}
