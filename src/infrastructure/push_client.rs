use crate::domain::models::{Timer, UserSession};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub accepted: usize,
}

/// The remote endpoint accepting batches of offline records. A batch either
/// succeeds as a whole or fails as a whole.
#[async_trait]
pub trait RemotePushClient: Send + Sync {
    async fn push_batch(&self, session: &UserSession, timers: &[Timer]) -> Result<PushReceipt, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPushClient {
    client: Client,
    endpoint: Url,
    api_token: Option<String>,
}

impl ReqwestPushClient {
    pub fn new(endpoint: Url, api_token: Option<String>) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .map_err(|error| InfraError::Network(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            endpoint,
            api_token,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushBatchRequest<'a> {
    tenant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<&'a str>,
    employee_id: &'a str,
    timers: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PushBatchResponse {
    accepted: Option<usize>,
}

#[async_trait]
impl RemotePushClient for ReqwestPushClient {
    async fn push_batch(&self, session: &UserSession, timers: &[Timer]) -> Result<PushReceipt, InfraError> {
        if timers.is_empty() {
            return Ok(PushReceipt { accepted: 0 });
        }

        let request = PushBatchRequest {
            tenant_id: &session.tenant_id,
            organization_id: session.organization_id.as_deref(),
            employee_id: &session.employee_id,
            timers: timers
                .iter()
                .map(Timer::to_object)
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(token) = self.api_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while pushing timers: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading push response: {error}")))?;

        if !status.is_success() {
            return Err(InfraError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        // An empty body or one without a count means the whole batch was taken.
        let accepted = serde_json::from_str::<PushBatchResponse>(&body)
            .ok()
            .and_then(|parsed| parsed.accepted)
            .unwrap_or(timers.len());
        if accepted < timers.len() {
            return Err(InfraError::Remote {
                status: status.as_u16(),
                body: format!("partial batch: accepted {accepted} of {}", timers.len()),
            });
        }

        Ok(PushReceipt { accepted })
    }
}
