//! Minimal Connect protocol client: unary calls with JSON bodies.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::trace;

use crate::error::StatusError;

/// Error body a Connect server sends with a non-2xx status
#[derive(Debug, Deserialize)]
struct ConnectErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConnectClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StatusError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.into(),
        })
    }

    /// Calls `procedure` (`package.Service/Method`) with `request` as its JSON body.
    pub async fn call<Req, Resp>(&self, procedure: &str, request: &Req) -> Result<Resp, StatusError>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{procedure}", self.base_url.trim_end_matches('/'));
        trace!(%url, "Connect call");

        let response = self
            .http
            .post(&url)
            .header("Connect-Protocol-Version", "1")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ConnectErrorBody>(&body) {
            Ok(ConnectErrorBody {
                message: Some(message),
                ..
            }) => message,
            Ok(ConnectErrorBody {
                code: Some(code), ..
            }) => code,
            _ => body,
        };

        Err(StatusError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
