//! Mapping of gateway errors onto HTTP responses.

use {
    axum::{
        Json,
        extract::rejection::JsonRejection,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    tracing::warn,
    wagate_common::Error,
};

/// An [`Error`] rendered as `{"error": "..."}` with the matching status code.
#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (Error::NotFound("1555".into()), StatusCode::NOT_FOUND),
            (Error::Unauthenticated, StatusCode::UNAUTHORIZED),
            (Error::invalid("to is required"), StatusCode::BAD_REQUEST),
            (Error::upstream("boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::store("down"), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }
}
