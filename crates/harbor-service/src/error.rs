use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Harbor(#[from] harbor_core::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use harbor_core::Error;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Harbor(e) => match e {
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::Config(_)
                | Error::UnknownPlugin(_)
                | Error::DuplicateField(_)
                | Error::InvalidId(_)
                | Error::Serde(_) => StatusCode::BAD_REQUEST,
                Error::Inference(_)
                | Error::VectorStore(_)
                | Error::ReadOnlyViolation(_)
                | Error::PartialWrite(_, _)
                | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Harbor(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}
