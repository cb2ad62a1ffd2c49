use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::response::AppError;

/// `axum::Json<T>` whose rejection is an `AppError` envelope instead of
/// axum's plain-text body. Used by `PUT /api/admin/analytics/settings`.
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        axum::Json::<T>::from_request(req, state)
            .await
            .map(|axum::Json(value)| JsonBody(value))
            .map_err(json_rejection_to_app_error)
    }
}

fn json_rejection_to_app_error(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            tracing::warn!(error = %e, "Settings body has wrong shape");
            AppError::bad_request("INVALID_REQUEST_BODY", &e.body_text())
        }
        JsonRejection::JsonSyntaxError(e) => {
            tracing::warn!(error = %e, "JSON syntax parsing failed");
            AppError::bad_request("INVALID_REQUEST_BODY", "请求体格式无效")
        }
        JsonRejection::MissingJsonContentType(e) => {
            tracing::warn!(error = %e, "Missing or invalid JSON Content-Type");
            AppError::bad_request("INVALID_REQUEST_BODY", "Content-Type must be application/json")
        }
        other => {
            tracing::warn!(error = %other, "Unexpected JSON body rejection");
            AppError::bad_request("INVALID_REQUEST_BODY", "请求体格式无效")
        }
    }
}

/// Query-string counterpart of [`JsonBody`]. Report parameters that fail to
/// parse at all (e.g. `top=abc`) surface as a JSON 400.
pub struct QueryParams<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| QueryParams(value))
            .map_err(|rejection: QueryRejection| {
                tracing::debug!(error = %rejection, "Query string rejected");
                AppError::bad_request("INVALID_QUERY", &rejection.body_text())
            })
    }
}

impl<T> std::ops::Deref for JsonBody<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Body1 {
        rate: u32,
    }

    #[tokio::test]
    async fn json_body_accepts_valid_json() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from(r#"{"rate":4}"#))
            .unwrap();
        let JsonBody(body) = JsonBody::<Body1>::from_request(req, &()).await.unwrap();
        assert_eq!(body.rate, 4);
    }

    #[tokio::test]
    async fn json_body_rejection_is_app_error() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let err = JsonBody::<Body1>::from_request(req, &()).await.err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "INVALID_REQUEST_BODY");

        let req = Request::builder().body(Body::from(r#"{"rate":4}"#)).unwrap();
        let err = JsonBody::<Body1>::from_request(req, &()).await.err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn query_rejection_is_app_error() {
        let req = Request::builder().uri("/x?rate=abc").body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let err = QueryParams::<Body1>::from_request_parts(&mut parts, &())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, "INVALID_QUERY");
    }
}
