use crate::error::{Error, GateError, InvalidField, ScheduleError, TransitionError};
use crate::log::API;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(Error);

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: &'static str,
    message: String,
    fields: &'a [InvalidField],
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Transition(_) => StatusCode::CONFLICT,
            Error::Gate(GateError::BlockedByMissingProgressNote { .. }) => {
                StatusCode::PRECONDITION_REQUIRED
            }
            Error::Gate(GateError::Unavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Schedule(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable name of the failure, for clients to match on
    pub fn kind(&self) -> &'static str {
        match &self.0 {
            Error::Validation(_) => "ValidationError",
            Error::Transition(TransitionError::AlreadyAcknowledged { .. }) => "AlreadyAcknowledged",
            Error::Transition(TransitionError::InvalidTransition { .. }) => "InvalidTransition",
            Error::Transition(TransitionError::InvalidSlotState { .. }) => "InvalidSlotState",
            Error::Transition(TransitionError::WithinGraceWindow { .. }) => "WithinGraceWindow",
            Error::Gate(GateError::BlockedByMissingProgressNote { .. }) => {
                "BlockedByMissingProgressNote"
            }
            Error::Gate(GateError::Unavailable { .. }) => "GateUnavailable",
            Error::Schedule(ScheduleError::InvalidFrequencyCode { .. }) => "InvalidFrequencyCode",
            Error::NotFound { .. } => "NotFound",
            _ => "InternalError",
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(target: API, msg = "Request failed", error = self.0.to_string());
            "An internal error occurred".to_string()
        } else {
            self.0.to_string()
        };

        let fields: &[InvalidField] = match &self.0 {
            Error::Validation(err) => err.fields.as_slice(),
            _ => &[],
        };

        let body = ErrorBody {
            kind: self.kind(),
            message,
            fields,
        };

        (status, Json(body)).into_response()
    }
}
