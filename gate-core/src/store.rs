//! The store adapter (spec §4.4): a thin port over a keyed row store with
//! insert/update/select and a realtime change subscription, modeled on a
//! Postgrest-plus-realtime backend (`store.url` + `store.anonKey`).
//!
//! Row-level policy is enforced by the store itself, not by this adapter —
//! the adapter's job is only to shape requests correctly and to attach the
//! signed machine identity header the policy consumes.

use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use gate_protocol::ApprovalRequest;
use gate_protocol::Status;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use tracing::warn;

use crate::error::GateError;
use crate::error::Result;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MACHINE_IDENTITY_HEADER: &str = "X-Machine-Identity";
const REALTIME_TABLE_TOPIC: &str = "realtime:public:approval_requests";
const REALTIME_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Port over the approval-request store. One implementation (`RestStore`)
/// ships; the trait exists so `gate-core`'s coordinator and verifier logic
/// never depend on the concrete HTTP/websocket shape.
pub trait Store: Send + Sync {
    /// Inserts a brand-new pending row. `signed_identity`, when present, is
    /// attached as the per-connection header the row-level policy checks on
    /// INSERT.
    fn insert(
        &self,
        row: &ApprovalRequest,
        signed_identity: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Updates the row matching `id` AND `expected_status`, applying `patch`.
    /// Returns the number of rows affected (0 or 1 — `id` is a primary key).
    fn update_where(
        &self,
        id: uuid::Uuid,
        expected_status: Status,
        patch: StatusPatch,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Fetches one row by id.
    fn select_single(&self, id: uuid::Uuid) -> impl Future<Output = Result<ApprovalRequest>> + Send;

    /// Opens a realtime subscription to UPDATE events for `id`, yielding the
    /// post-image row. At-least-once delivery; the stream stays open until
    /// dropped.
    fn subscribe(
        &self,
        id: uuid::Uuid,
    ) -> impl Future<Output = Result<Pin<Box<dyn Stream<Item = ApprovalRequest> + Send>>>> + Send;

    /// Records one rate-limit event for `identifier` and returns the number
    /// of events recorded for it within the trailing `window`.
    fn record_rate_limit_event(
        &self,
        identifier: &str,
        window: Duration,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Deletes approval requests and rate-limit events older than
    /// `retention`, per the row lifecycle's periodic cleanup (spec §3).
    /// Returns the number of rows deleted across both tables.
    fn cleanup_expired(&self, retention: Duration) -> impl Future<Output = Result<u64>> + Send;
}

/// A patch applied to a row's resolved-state columns. Mirrors the
/// coordinator/verifier's only two write shapes: "mark timed out" and
/// "resolve with a verdict".
#[derive(Debug, Clone, Serialize)]
pub struct StatusPatch {
    pub status: Status,
    pub resolved_at: chrono::DateTime<chrono::Utc>,
    pub resolved_by: Option<String>,
}

/// REST (Postgrest-shaped) + websocket realtime implementation of [`Store`].
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_key: Option<String>,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            service_key: None,
        }
    }

    /// Row-level UPDATE policy requires a service credential — end users
    /// cannot approve themselves (spec §4.4).
    pub fn with_service_key(mut self, service_key: impl Into<String>) -> Self {
        self.service_key = Some(service_key.into());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url.trim_end_matches('/'))
    }

    fn realtime_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}/realtime/v1/websocket?apikey={}", self.anon_key)
    }

    fn auth_key(&self) -> &str {
        self.service_key.as_deref().unwrap_or(&self.anon_key)
    }
}

impl Store for RestStore {
    async fn insert(&self, row: &ApprovalRequest, signed_identity: Option<&str>) -> Result<()> {
        let mut req = self
            .client
            .post(self.table_url("approval_requests"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", &self.anon_key))
            .header("Prefer", "return=minimal")
            .json(row);

        if let Some(identity) = signed_identity {
            req = req.header(MACHINE_IDENTITY_HEADER, identity);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(GateError::Store(format!(
                "insert failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn update_where(
        &self,
        id: uuid::Uuid,
        expected_status: Status,
        patch: StatusPatch,
    ) -> Result<u64> {
        let url = format!(
            "{}?id=eq.{id}&status=eq.{}",
            self.table_url("approval_requests"),
            status_query_value(expected_status),
        );

        let resp = self
            .client
            .patch(url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.auth_key()))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GateError::Store(format!(
                "update failed with status {}",
                resp.status()
            )));
        }

        let rows: Vec<ApprovalRequest> = resp.json().await?;
        Ok(rows.len() as u64)
    }

    async fn select_single(&self, id: uuid::Uuid) -> Result<ApprovalRequest> {
        let url = format!("{}?id=eq.{id}", self.table_url("approval_requests"));
        let resp = self
            .client
            .get(url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", &self.anon_key))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GateError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(GateError::Store(format!(
                "select failed with status {}",
                resp.status()
            )));
        }

        let mut rows: Vec<ApprovalRequest> = match resp.json::<Vec<ApprovalRequest>>().await {
            Ok(rows) => rows,
            Err(_) => Vec::new(),
        };
        rows.pop().ok_or(GateError::NotFound)
    }

    async fn subscribe(
        &self,
        id: uuid::Uuid,
    ) -> Result<Pin<Box<dyn Stream<Item = ApprovalRequest> + Send>>> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.realtime_url())
            .await
            .map_err(|e| GateError::Store(format!("realtime connect failed: {e}")))?;

        let (mut write, read) = ws_stream.split();

        let join_payload = json!({
            "topic": REALTIME_TABLE_TOPIC,
            "event": "phx_join",
            "payload": {
                "config": {
                    "postgres_changes": [
                        {
                            "event": "UPDATE",
                            "schema": "public",
                            "table": "approval_requests",
                            "filter": format!("id=eq.{id}"),
                        }
                    ]
                }
            },
            "ref": "1",
        });
        write
            .send(Message::Text(join_payload.to_string().into()))
            .await
            .map_err(|e| GateError::Store(format!("realtime join failed: {e}")))?;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REALTIME_HEARTBEAT_INTERVAL);
            let mut heartbeat_ref = 2u64;
            loop {
                ticker.tick().await;
                let heartbeat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": heartbeat_ref.to_string(),
                });
                heartbeat_ref += 1;
                if write.send(Message::Text(heartbeat.to_string().into())).await.is_err() {
                    debug!("realtime heartbeat failed, socket closed");
                    break;
                }
            }
        });

        let stream = read.filter_map(move |msg| {
            let id = id;
            async move {
                let Ok(Message::Text(text)) = msg else {
                    return None;
                };
                let value: serde_json::Value = serde_json::from_str(&text).ok()?;
                let record = value.get("payload")?.get("record")?;
                let row: ApprovalRequest = serde_json::from_value(record.clone()).ok()?;
                if row.id == id {
                    Some(row)
                } else {
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn record_rate_limit_event(&self, identifier: &str, window: Duration) -> Result<u64> {
        let insert_resp = self
            .client
            .post(self.table_url("rate_limit_events"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", &self.anon_key))
            .header("Prefer", "return=minimal")
            .json(&json!({ "identifier": identifier }))
            .send()
            .await?;

        if !insert_resp.status().is_success() {
            warn!(status = %insert_resp.status(), "rate limit event insert failed");
            return Err(GateError::Store("rate limit insert failed".to_string()));
        }

        let since = chrono::Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let count_url = format!(
            "{}?identifier=eq.{identifier}&created_at=gte.{}",
            self.table_url("rate_limit_events"),
            since.to_rfc3339(),
        );

        let count_resp = self
            .client
            .get(count_url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", &self.anon_key))
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let count = count_resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        debug!(identifier, count, "rate limit window count");
        Ok(count)
    }

    async fn cleanup_expired(&self, retention: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let cutoff = cutoff.to_rfc3339();

        let mut deleted = 0u64;
        for (table, column) in [
            ("approval_requests", "created_at"),
            ("rate_limit_events", "created_at"),
        ] {
            let url = format!("{}?{column}=lt.{cutoff}", self.table_url(table));
            let resp = self
                .client
                .delete(url)
                .header("apikey", &self.anon_key)
                .header("Authorization", format!("Bearer {}", self.auth_key()))
                .header("Prefer", "return=representation")
                .send()
                .await?;

            if !resp.status().is_success() {
                warn!(table, status = %resp.status(), "cleanup delete failed");
                continue;
            }

            if let Ok(rows) = resp.json::<Vec<serde_json::Value>>().await {
                deleted += rows.len() as u64;
            }
        }
        Ok(deleted)
    }
}

fn status_query_value(status: Status) -> &'static str {
    match status {
        Status::Pending => "pending",
        Status::Approved => "approved",
        Status::Rejected => "rejected",
        Status::Timeout => "timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_strips_trailing_slash() {
        let store = RestStore::new("https://example.supabase.co/", "anon");
        assert_eq!(
            store.table_url("approval_requests"),
            "https://example.supabase.co/rest/v1/approval_requests"
        );
    }

    #[test]
    fn realtime_url_swaps_scheme_to_websocket() {
        let store = RestStore::new("https://example.supabase.co", "anon-key");
        let url = store.realtime_url();
        assert!(url.starts_with("wss://example.supabase.co/realtime/v1/websocket"));
        assert!(url.contains("apikey=anon-key"));
    }

    #[test]
    fn auth_key_prefers_service_key() {
        let store = RestStore::new("https://x", "anon").with_service_key("service");
        assert_eq!(store.auth_key(), "service");
    }

    #[test]
    fn auth_key_falls_back_to_anon() {
        let store = RestStore::new("https://x", "anon");
        assert_eq!(store.auth_key(), "anon");
    }
}
