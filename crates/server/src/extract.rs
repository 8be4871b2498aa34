use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{HeaderMap, header::CONTENT_TYPE},
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON body extractor whose failures surface as validation errors naming
/// the offending field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_json_content_type(req.headers()) {
            return Err(ApiError::Validation(
                "Expected request with `Content-Type: application/json`".to_string(),
            ));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        parse_json(&bytes).map(ValidatedJson)
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json")
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let value = serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        if path == "." {
            ApiError::Validation(inner.to_string())
        } else {
            ApiError::Validation(format!("{path}: {inner}"))
        }
    })?;
    deserializer
        .end()
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Payload {
        title: String,
        #[allow(dead_code)]
        count: Option<u32>,
    }

    fn message(err: ApiError) -> String {
        match err {
            ApiError::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn field_errors_name_the_path() {
        let err = parse_json::<Payload>(br#"{"title": "a", "count": "many"}"#).unwrap_err();
        assert!(message(err).starts_with("count: "));
    }

    #[test]
    fn missing_fields_and_trailing_data_are_rejected() {
        let err = parse_json::<Payload>(br#"{"count": 1}"#).unwrap_err();
        assert!(message(err).contains("title"));

        let err = parse_json::<Payload>(br#"{"title": "a"} trailing"#).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let payload = parse_json::<Payload>(br#"{"title": "a", "extra": true}"#).unwrap();
        assert_eq!(payload.title, "a");
    }

    #[test]
    fn content_type_must_be_json() {
        let mut headers = HeaderMap::new();
        assert!(!is_json_content_type(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_json_content_type(&headers));

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json_content_type(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/merge-patch+json"));
        assert!(is_json_content_type(&headers));
    }
}
