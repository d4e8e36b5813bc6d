use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;

use crate::engine::ReservationEngine;
use crate::error::SchedulerError;
use crate::store::TransactionBoundary;

pub const USERNAME_HEADER: &str = "x-username";
pub const ROLE_HEADER: &str = "x-role";

pub struct AppState<B> {
    pub engine: Arc<ReservationEngine<B>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Identity of the caller, as asserted by the session layer through request headers.
///
/// No headers at all means an anonymous caller; a half-specified identity is rejected.
pub struct Caller(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        match (header(USERNAME_HEADER), header(ROLE_HEADER)) {
            (None, None) => Ok(Caller(Identity::Anonymous)),
            (Some(username), Some(role)) => {
                let role = Role::parse(role).ok_or_else(|| {
                    ApiError(SchedulerError::validation("Role must be patient or caregiver"))
                })?;
                Ok(Caller(Identity::new(role, username)))
            }
            _ => Err(ApiError(SchedulerError::validation(
                "Both X-Username and X-Role headers are required",
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub date: String,
    pub vaccine: String,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub appointment_id: i32,
    pub caregiver: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct DosesRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct DosesResponse {
    pub message: String,
    pub doses: i32,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(pub SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
            SchedulerError::NotLoggedIn => StatusCode::UNAUTHORIZED,
            SchedulerError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            SchedulerError::NoAvailability | SchedulerError::InventoryExhausted => {
                StatusCode::CONFLICT
            }
            SchedulerError::VaccineNotFound | SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::ConcurrencyConflict | SchedulerError::Persistence(_) => {
                tracing::error!("Request failed: {}", self.0);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let body = Json(ErrorResponse {
            error: self.0.user_message(),
        });
        (status, body).into_response()
    }
}

pub fn create_router<B>(engine: Arc<ReservationEngine<B>>) -> Router
where
    B: TransactionBoundary + 'static,
{
    Router::new()
        .route("/availability", post(upload_availability::<B>))
        .route("/vaccines/:name/doses", post(add_doses::<B>))
        .route(
            "/appointments",
            post(reserve::<B>).get(show_appointments::<B>),
        )
        .route("/appointments/:id", delete(cancel::<B>))
        .route("/schedule/:date", get(search_caregiver_schedule::<B>))
        .route("/health", get(health_check))
        .with_state(AppState { engine })
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn reserve<B: TransactionBoundary>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let reservation = state
        .engine
        .reserve(&identity, &request.date, &request.vaccine)
        .await?;
    Ok(Json(ReserveResponse {
        message: reservation.to_string(),
        appointment_id: reservation.appointment_id,
        caregiver: reservation.caregiver,
    }))
}

pub async fn cancel<B: TransactionBoundary>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    Path(id): Path<i32>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.engine.cancel(&identity, id).await?;
    Ok(Json(MessageResponse {
        message: APPOINTMENT_CANCELLED.to_string(),
    }))
}

pub async fn upload_availability<B: TransactionBoundary>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .engine
        .upload_availability(&identity, &request.date)
        .await?;
    Ok(Json(MessageResponse {
        message: AVAILABILITY_UPLOADED.to_string(),
    }))
}

pub async fn add_doses<B: TransactionBoundary>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    Path(name): Path<String>,
    Json(request): Json<DosesRequest>,
) -> Result<Json<DosesResponse>, ApiError> {
    let doses = state
        .engine
        .add_doses(&identity, &name, request.amount)
        .await?;
    Ok(Json(DosesResponse {
        message: DOSES_UPDATED.to_string(),
        doses,
    }))
}

pub async fn search_caregiver_schedule<B: TransactionBoundary>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    Path(date): Path<String>,
) -> Result<Json<Schedule>, ApiError> {
    let schedule = state
        .engine
        .search_caregiver_schedule(&identity, &date)
        .await?;
    Ok(Json(schedule))
}

pub async fn show_appointments<B: TransactionBoundary>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let appointments = state.engine.show_appointments(&identity).await?;
    Ok(Json(appointments))
}

pub async fn health_check() -> &'static str {
    "OK"
}
