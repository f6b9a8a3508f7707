//! HTTP handlers for the donation intake gateway.

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::idempotency::Reservation;
use crate::receipt::Receipt;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use fundflow_core::events::TOPIC_DONATION;
use fundflow_core::money::parse_amount;
use fundflow_core::{CampaignId, DomainError, DonationEvent, DonationId};
use serde::Deserialize;
use serde_json::json;

/// Request body for `POST /donate`.
///
/// Fields are optional at the serde layer so validation can answer with the
/// precise error the client needs instead of a generic deserialize failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonateRequest {
    /// Campaign the donation targets.
    pub campaign_id: Option<i64>,
    /// Donation amount; number or numeric string.
    pub amount: Option<serde_json::Value>,
}

/// `POST /donate` — accept a donation exactly once per idempotency key.
///
/// The key is reserved atomically before anything else happens, so two
/// concurrent first-time submissions cannot both publish. The reservation is
/// released on validation or publish failure, leaving a client retry with
/// the same key free to succeed.
///
/// # Errors
///
/// `400` for validation failures, `401` for credential problems, `503` when
/// the event channel or idempotency store is unavailable.
pub async fn donate(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<DonateRequest>,
) -> Result<(StatusCode, Json<Receipt>), AppError> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| DomainError::InvalidRequest("Idempotency key required".to_string()))?
        .to_string();

    // Atomic reserve: exactly one concurrent caller per key proceeds.
    let reservation = state
        .idempotency
        .reserve(&idempotency_key)
        .await
        .map_err(|e| DomainError::UpstreamUnavailable(e.to_string()))?;

    match reservation {
        Reservation::Existing(receipt) => {
            tracing::info!(
                idempotency_key = %mask(&idempotency_key),
                user_email = %caller.email,
                "Idempotent replay, returning cached receipt"
            );
            metrics::counter!("gateway.donations.replayed").increment(1);
            return Ok((StatusCode::OK, Json(receipt.replayed())));
        },
        Reservation::InFlight => {
            tracing::info!(
                idempotency_key = %mask(&idempotency_key),
                "Duplicate request while first attempt still in flight"
            );
            return Err(AppError::unavailable(
                "This donation is already being processed. Please retry shortly.",
            ));
        },
        Reservation::New => {},
    }

    // The key is ours. From here on, every early exit must release it.
    let event = match validate(&body, &caller, &idempotency_key) {
        Ok(event) => event,
        Err(err) => {
            release(&state, &idempotency_key).await;
            return Err(err.into());
        },
    };

    let record = event
        .to_record()
        .map_err(|e| AppError::internal("An internal error occurred").with_source(e.into()))?;

    if let Err(publish_err) = state.channel.publish(TOPIC_DONATION, &record).await {
        // No idempotency record is written on publish failure, so a retry
        // with the same key is free to succeed later.
        release(&state, &idempotency_key).await;
        metrics::counter!("gateway.publish_failures").increment(1);
        return Err(DomainError::UpstreamUnavailable(publish_err.to_string()).into());
    }

    let receipt = Receipt::for_event(&event);
    if let Err(store_err) = state.idempotency.complete(&idempotency_key, &receipt).await {
        // The donation is durable; losing the replay record only costs a
        // client retry a duplicate receipt, never a duplicate settlement.
        tracing::warn!(
            idempotency_key = %mask(&idempotency_key),
            error = %store_err,
            "Failed to cache receipt after publish"
        );
    }

    tracing::info!(
        donation_id = %event.donation_id,
        campaign_id = %event.campaign_id,
        amount = %event.amount,
        user_email = %caller.email,
        idempotency_key = %mask(&idempotency_key),
        "Donation accepted and published"
    );
    metrics::counter!("gateway.donations.accepted").increment(1);

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// `GET /health` — liveness probe; checks no dependencies.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "donation-gateway" }))
}

/// Validate the request body and assemble the donation event.
fn validate(
    body: &DonateRequest,
    caller: &AuthenticatedUser,
    idempotency_key: &str,
) -> Result<DonationEvent, DomainError> {
    let campaign_id = body
        .campaign_id
        .map(CampaignId)
        .filter(|id| id.is_valid())
        .ok_or_else(|| DomainError::InvalidRequest("Campaign ID is required".to_string()))?;

    let amount = body
        .amount
        .as_ref()
        .ok_or_else(|| DomainError::InvalidRequest("invalid amount".to_string()))
        .and_then(parse_amount)?;

    Ok(DonationEvent::new(
        DonationId::generate(),
        idempotency_key.to_string(),
        campaign_id,
        caller.user_id,
        caller.email.clone(),
        amount,
    ))
}

/// Release a reservation, logging (not failing) if the store is down: the
/// key will expire on its own and the client sees the original error.
async fn release(state: &AppState, idempotency_key: &str) {
    if let Err(err) = state.idempotency.abort(idempotency_key).await {
        tracing::warn!(
            idempotency_key = %mask(idempotency_key),
            error = %err,
            "Failed to release idempotency reservation"
        );
    }
}

/// Truncate a key for logging; full keys stay out of the logs.
fn mask(key: &str) -> String {
    key.chars().take(20).collect()
}
