use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    cancel_scheduled_resolution, dry_run_calculate, dry_run_verify, get_job,
    get_jobs_for_campaign, health_check, oracle_webhook, schedule_resolution, submit_attestation,
    trigger_resolution, webhook_stats, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Resolution lifecycle
                .route("/resolution/trigger", post(trigger_resolution))
                .route("/resolution/schedule", post(schedule_resolution))
                .route(
                    "/resolution/schedule/:campaign_id",
                    delete(cancel_scheduled_resolution),
                )
                .route("/resolution/jobs/:job_id", get(get_job))
                .route(
                    "/resolution/campaigns/:campaign_id/jobs",
                    get(get_jobs_for_campaign),
                )
                // Dry runs - no pledge is touched
                .route("/resolution/verify/:campaign_id", post(dry_run_verify))
                .route("/resolution/calculate/:campaign_id", post(dry_run_calculate))
                // Oracle ingress
                .route("/resolution/webhooks/:oracle_id", post(oracle_webhook))
                .route("/resolution/webhooks/stats", get(webhook_stats))
                .route("/oracle/attestations", post(submit_attestation)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
