use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, Result};
use crate::models::{ClipRecord, SettlementReceipt, SettlementRequest};
use crate::settings::BackendConfig;

use super::RemoteService;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

const FETCH_QUEUE_PATH: &str = "rpc/fetch_queue";
const SETTLE_REWARD_PATH: &str = "rpc/settle_reward";
const MARK_UNPLAYABLE_PATH: &str = "rpc/mark_unplayable";

/// JSON-over-HTTP client for the promotion and ledger RPCs.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn call<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let request = self.authorize(self.client.post(self.endpoint(path)).json(body));
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(path, status));
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn status_error(path: &str, status: StatusCode) -> EngineError {
    EngineError::Network(format!("{path} answered HTTP {}", status.as_u16()))
}

/// One bad row costs that row only.
fn decode_rows(rows: Vec<Value>) -> Vec<ClipRecord> {
    let received = rows.len();
    let records: Vec<ClipRecord> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(record) => Some(record),
            Err(err) => {
                log_warn!("dropping malformed queue row: {err}");
                None
            }
        })
        .collect();
    if records.len() < received {
        log_warn!("{} of {} queue rows were malformed", received - records.len(), received);
    }
    records
}

#[async_trait]
impl RemoteService for HttpBackend {
    async fn fetch_queue(&self, viewer_id: &str) -> Result<Vec<ClipRecord>> {
        let rows: Vec<Value> = self
            .call(FETCH_QUEUE_PATH, &json!({ "viewerId": viewer_id }))
            .await?;
        Ok(decode_rows(rows))
    }

    async fn settle_reward(&self, request: &SettlementRequest) -> Result<SettlementReceipt> {
        self.call(SETTLE_REWARD_PATH, request).await
    }

    async fn mark_unplayable(&self, clip_id: &str) -> Result<()> {
        let request = self.authorize(
            self.client
                .post(self.endpoint(MARK_UNPLAYABLE_PATH))
                .json(&json!({ "clipId": clip_id })),
        );
        let response = request.send().await?;
        if !response.status().is_success() {
            log_warn!(
                "mark_unplayable for {} answered HTTP {}",
                clip_id,
                response.status()
            );
            return Err(status_error(MARK_UNPLAYABLE_PATH, response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_ignore_trailing_slash() {
        let backend = HttpBackend::new(&BackendConfig {
            base_url: "https://api.example.test/".into(),
            access_token: Some("token".into()),
            request_timeout_ms: 1_000,
        })
        .unwrap();
        assert_eq!(
            backend.endpoint(FETCH_QUEUE_PATH),
            "https://api.example.test/rpc/fetch_queue"
        );
    }

    #[test]
    fn non_success_status_is_a_network_error() {
        let err = status_error(SETTLE_REWARD_PATH, StatusCode::BAD_GATEWAY);
        assert_eq!(
            err,
            EngineError::Network("rpc/settle_reward answered HTTP 502".into())
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn malformed_rows_are_dropped_without_failing_the_fetch() {
        let rows = vec![
            json!({
                "clipId": "x",
                "mediaRef": "media-x",
                "targetDurationSeconds": 30,
                "rewardAmount": 5,
                "status": "active"
            }),
            json!({
                "clipId": "float",
                "mediaRef": "media-float",
                "targetDurationSeconds": 30.5,
                "rewardAmount": 5,
                "status": "active"
            }),
            json!({
                "clipId": "nulls",
                "mediaRef": "media-nulls",
                "targetDurationSeconds": null,
                "rewardAmount": 5,
                "status": null
            }),
            json!({ "clipId": "bare" }),
        ];

        let records = decode_rows(rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].clip_id, "x");
        assert_eq!(records[0].target_duration_seconds, 30);
    }
}
