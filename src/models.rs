use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A write that was attempted while offline and is waiting to be replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    pub retries: u32,
}

impl QueuedRequest {
    pub fn new(
        url: &str,
        method: &str,
        headers: BTreeMap<String, String>,
        body: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            method: method.trim().to_uppercase(),
            headers,
            body,
            timestamp: Utc::now().timestamp_millis(),
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn monthly_limit(self) -> u32 {
        match self {
            Tier::Free => 5,
            Tier::Pro => 40,
        }
    }

    /// Pro while the subscription is live; everything else falls back to free.
    pub fn from_subscription_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "active" | "trialing" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }

    pub fn parse(value: &str) -> Tier {
        match value {
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }
}

/// Client-side cache of the authoritative monthly usage counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Calendar-month key, e.g. "2026-08".
    pub month: String,
    pub tier: Tier,
    pub generation_count: u32,
    pub monthly_limit: u32,
    /// Set once usage crosses the soft warning threshold.
    pub warn: bool,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    Delivered,
    Retrying,
    Dropped,
}

impl ReplayOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayOutcome::Delivered => "delivered",
            ReplayOutcome::Retrying => "retrying",
            ReplayOutcome::Dropped => "dropped",
        }
    }

    pub fn parse(value: &str) -> Option<ReplayOutcome> {
        match value {
            "delivered" => Some(ReplayOutcome::Delivered),
            "retrying" => Some(ReplayOutcome::Retrying),
            "dropped" => Some(ReplayOutcome::Dropped),
            _ => None,
        }
    }
}

/// One drain attempt for one queued request, kept so a lost write is
/// auditable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub id: String,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub outcome: ReplayOutcome,
    pub error_message: Option<String>,
    pub attempt: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReplayPolicy {
    pub request_timeout_ms: u64,
    /// Pause between entries within one drain burst. 0 disables the pause.
    pub replay_delay_ms: u64,
    pub usage_cache_ttl_seconds: u64,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            replay_delay_ms: 0,
            usage_cache_ttl_seconds: 180,
        }
    }
}

impl ReplayPolicy {
    pub fn clamped(self) -> Self {
        Self {
            request_timeout_ms: self.request_timeout_ms.clamp(1000, 30_000),
            replay_delay_ms: self.replay_delay_ms.min(10_000),
            usage_cache_ttl_seconds: self.usage_cache_ttl_seconds.clamp(30, 3600),
        }
    }
}

/// Tally of one `process_queue` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub dropped: usize,
}

/// Payload for the speech synthesis endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub text: String,
    pub voice_id: String,
    #[serde(default)]
    pub voice_settings: serde_json::Value,
}

/// Body of the backend's forbidden-style quota rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRejection {
    pub limit_reached: bool,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed {
        audio: Vec<u8>,
        usage: Option<UsageSnapshot>,
    },
    LimitReached {
        tier: Tier,
        generation_count: u32,
        monthly_limit: u32,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDiagnostics {
    pub data_dir: String,
    pub db_path: String,
    pub schema_ok: bool,
    pub queue_size: usize,
    pub connectivity: String,
}
