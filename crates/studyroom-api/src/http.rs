use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Read a response body, mapping non-2xx statuses to [`ApiError::Status`].
pub async fn read_body(response: Response) -> Result<bytes::Bytes, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::status(status.as_u16(), &body));
    }
    Ok(body)
}

/// Read and decode a JSON response body.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = read_body(response).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Like [`read_json`], but an empty or `null` body decodes as `T::default()`.
pub async fn read_json_or_default<T>(response: Response) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    let body = read_body(response).await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let value: Option<T> = serde_json::from_slice(&body)?;
    Ok(value.unwrap_or_default())
}

/// Drop a trailing slash so paths can be appended with `format!`.
pub fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
