//! Maps `GateError` to the HTTP statuses spec §7 assigns the verifier side.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use gate_core::GateError;
use serde_json::json;

pub struct ApiError(pub GateError);

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            GateError::InputMalformed(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            GateError::AuthFailed(_) => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            GateError::IdentityInvalid => (StatusCode::FORBIDDEN, self.0.to_string()),
            GateError::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            GateError::Expired => (StatusCode::GONE, self.0.to_string()),
            GateError::RaceLost => (StatusCode::CONFLICT, self.0.to_string()),
            GateError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.0.to_string()),
            GateError::Store(_) | GateError::Notify(_) | GateError::Config(_) | GateError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
        };

        let masked = gate_core::mask::mask_secrets(&message);
        tracing::warn!(status = %status, error = %masked, "callback request failed");
        (status, Json(json!({ "error": masked }))).into_response()
    }
}
