//! Booking submission.

use crate::error::AppError;
use crate::middleware::{RequestId, REQUEST_ID_HEADER};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Extension, Json};
use booking_pipeline_core::BookingRequest;
use booking_pipeline_runtime::WriteOutcome;
use std::collections::HashMap;

/// Body of every accepted submission.
pub const ACCEPTED_MESSAGE: &str = "Your booking is being processed";

/// Accept a booking and publish it to the request topic.
///
/// Missing or mistyped fields are rejected by the JSON extractor; an empty
/// movie name is a 400. Acceptance does not depend on delivery: a failed
/// publish is logged by the writer and the submitter still gets 200.
///
/// # Endpoint
///
/// ```text
/// POST /api/booking
/// {"movieName":"Dune","cinema":3,"screeningTime":"2024-01-01T20:00:00Z"}
/// ```
///
/// # Errors
///
/// Returns a 400 [`AppError`] when `movieName` is empty or blank.
pub async fn submit_booking(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(booking): Json<BookingRequest>,
) -> Result<(StatusCode, &'static str), AppError> {
    if booking.movie_name().trim().is_empty() {
        return Err(AppError::bad_request("movieName must not be empty"));
    }

    tracing::info!(booking = %booking, "New movie booking received");

    let mut headers = HashMap::new();
    if let Some(Extension(id)) = request_id {
        headers.insert(
            REQUEST_ID_HEADER.to_ascii_lowercase(),
            id.to_string().into_bytes(),
        );
    }

    if let WriteOutcome::Failed(e) = state.requests().write_with_headers(&booking, headers).await {
        tracing::warn!(error = %e, "Booking accepted but not delivered");
    }

    Ok((StatusCode::OK, ACCEPTED_MESSAGE))
}
