// src/handlers.rs
use crate::{
    AppState,
    errors::{ApiError, VigilError},
    models::*,
};
use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::middleware::{Next, from_fn};
use actix_web::{HttpResponse, web};
use log::{error, info};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1").service(
            web::resource("/analyze")
                .wrap(from_fn(request_gate))
                .route(web::post().to(analyze)),
        ),
    )
    .service(
        web::resource("/api/analyze")
            .wrap(from_fn(request_gate))
            .route(web::post().to(analyze)),
    )
    .route("/api/health", web::get().to(health_check))
    .route("/health", web::get().to(health_check));
}

/// Body limit plus JSON errors rendered in the service's error shape.
pub fn json_config(limit: usize, development: bool) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(move |err, _req| {
            let vigil = match &err {
                JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                    VigilError::PayloadTooLarge { limit }
                }
                other => VigilError::InvalidBody(other.to_string()),
            };
            let response = vigil.to_response(development);
            InternalError::from_response(err, response).into()
        })
}

/// Per-client quota, checked before the body is read or parsed.
async fn request_gate<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let rejected = req.app_data::<web::Data<AppState>>().and_then(|data| {
        data.gate
            .check(req.peer_addr().map(|addr| addr.ip()))
            .err()
            .map(|err| err.to_response(data.config.development))
    });
    if let Some(response) = rejected {
        return Ok(req.into_response(response).map_into_right_body());
    }
    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

pub async fn analyze(
    body: web::Json<AnalyzeRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let development = data.config.development;
    let request_id = Uuid::new_v4();

    let input = DetectionInput::try_from(body.into_inner()).map_err(|err| {
        info!("[{}] rejected: {}", request_id, err);
        err.for_client(development)
    })?;

    info!(
        "[{}] analyzing {} person(s), {} machine(s), {} tool(s), {} hazard(s), mode {}",
        request_id,
        input.persons.len(),
        input.machines.len(),
        input.tools.len(),
        input.hazards.len(),
        input.analysis_mode
    );

    // Dropping this handler (client gone) cancels the in-flight Gemini call.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let analysis = data
        .analysis
        .analyze(&input, &cancel)
        .await
        .map_err(|err| {
            error!("[{}] analysis failed: {}", request_id, err);
            err.for_client(development)
        })?;

    if analysis.fallback {
        info!("[{}] served fallback report", request_id);
    }
    Ok(HttpResponse::Ok().json(AnalyzeResponse {
        success: true,
        analysis,
    }))
}

pub async fn health_check(data: web::Data<AppState>) -> HttpResponse {
    let client = data.analysis.client();
    HttpResponse::Ok().json(HealthStatus {
        status: "ok",
        provider: "gemini",
        model: client.model().to_string(),
        keys_configured: client.keys_configured(),
        port: data.config.port,
        timestamp: chrono::Utc::now(),
    })
}
