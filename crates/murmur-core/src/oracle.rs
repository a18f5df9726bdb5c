use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use murmur_types::{ActivitySample, Address};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MurmurError, Result};

/// Answers "has this address done anything on the ledger lately?"
///
/// A failed lookup is `OracleUnavailable`, never an inactive sample, so
/// callers can tell "no activity" from "could not ask".
#[async_trait]
pub trait ActivityOracle: Send + Sync {
    async fn check_activity(&self, address: &Address) -> Result<ActivitySample>;
}

/// Ledger JSON-RPC client asking for the single most recent signature.
pub struct RpcActivityOracle {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (&'a str, SignatureQuery),
}

#[derive(Serialize)]
struct SignatureQuery {
    limit: u32,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Vec<SignatureInfo>>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct SignatureInfo {
    #[serde(rename = "blockTime", default)]
    block_time: Option<i64>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcActivityOracle {
    /// `timeout` bounds each lookup end to end.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MurmurError::OracleUnavailable(format!("client setup failed: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ActivityOracle for RpcActivityOracle {
    async fn check_activity(&self, address: &Address) -> Result<ActivitySample> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "getSignaturesForAddress",
            params: (address.as_str(), SignatureQuery { limit: 1 }),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MurmurError::OracleUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MurmurError::OracleUnavailable(format!("rpc returned {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MurmurError::OracleUnavailable(e.to_string()))?;

        let sample = parse_signatures_response(&body)?;
        debug!(
            "Activity for {}: active={} last_active_at={:?}",
            address.short(),
            sample.active,
            sample.last_active_at
        );
        Ok(sample)
    }
}

/// Turn a `getSignaturesForAddress` response body into a sample.
/// `blockTime` is in seconds.
pub fn parse_signatures_response(body: &[u8]) -> Result<ActivitySample> {
    let response: RpcResponse = serde_json::from_slice(body)
        .map_err(|e| MurmurError::OracleUnavailable(format!("malformed rpc response: {}", e)))?;

    if let Some(err) = response.error {
        return Err(MurmurError::OracleUnavailable(format!(
            "rpc error {}: {}",
            err.code, err.message
        )));
    }

    let signatures = response
        .result
        .ok_or_else(|| MurmurError::OracleUnavailable("rpc response has no result".into()))?;

    Ok(match signatures.first() {
        Some(latest) => ActivitySample::active(
            latest
                .block_time
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        ),
        None => ActivitySample::inactive(),
    })
}

/// Canned answer for [`ScriptedOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedActivity {
    Active,
    Inactive,
    Unavailable,
}

/// Oracle with per-address canned answers, for tests and offline runs.
/// Addresses without a script are reported inactive.
pub struct ScriptedOracle {
    script: Mutex<HashMap<Address, ScriptedActivity>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, address: &Address, activity: ScriptedActivity) {
        if let Ok(mut script) = self.script.lock() {
            script.insert(address.clone(), activity);
        }
    }

    /// Make every lookup take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.delay.lock() {
            *current = delay;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivityOracle for ScriptedOracle {
    async fn check_activity(&self, address: &Address) -> Result<ActivitySample> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let activity = self
            .script
            .lock()
            .ok()
            .and_then(|script| script.get(address).copied())
            .unwrap_or(ScriptedActivity::Inactive);

        match activity {
            ScriptedActivity::Active => Ok(ActivitySample::active(None)),
            ScriptedActivity::Inactive => Ok(ActivitySample::inactive()),
            ScriptedActivity::Unavailable => Err(MurmurError::OracleUnavailable(
                "scripted outage".into(),
            )),
        }
    }
}
