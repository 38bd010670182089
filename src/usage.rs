use crate::backend::{BackendClient, Session, SessionProvider, SynthesisResponse};
use crate::models::{GenerationOutcome, GenerationRequest, Tier, UsageSnapshot};
use crate::store::{self, ClientStore};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Fraction of the monthly limit at which the soft warning flag is set.
pub const USAGE_WARN_THRESHOLD: f64 = 0.6;

/// Client-side pre-check for the monthly generation quota. The gate is a
/// UX courtesy only: the cached counter can be stale or tampered with, so
/// the backend's forbidden-style rejection stays the authoritative check
/// and the cache is reconciled to whatever count the server reports.
pub struct TierGate {
    store: ClientStore,
    backend: BackendClient,
    session: Arc<dyn SessionProvider>,
}

impl TierGate {
    pub fn new(store: ClientStore, backend: BackendClient, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            store,
            backend,
            session,
        }
    }

    fn require_session(&self) -> Result<Session> {
        self.session
            .current_session()
            .ok_or_else(|| anyhow!("no signed-in session, sign in before generating"))
    }

    /// Fetches subscription status and the current month's count from the
    /// backing store, derives the tier and warning flag, and refreshes the
    /// cached snapshot. A snapshot younger than the policy TTL is returned
    /// as-is unless `force` is set.
    pub async fn load_tier_and_usage(&self, force: bool) -> Result<UsageSnapshot> {
        let session = self.require_session()?;
        let month = month_key(Utc::now());

        if !force {
            if let Some(existing) = self.store.get_usage_snapshot(&month)? {
                let ttl_seconds = self
                    .store
                    .get_replay_policy()
                    .map(|policy| policy.usage_cache_ttl_seconds)
                    .unwrap_or_default();
                let age = snapshot_age_seconds(&existing);
                if age >= 0 && age as u64 <= ttl_seconds {
                    return Ok(existing);
                }
            }
        }

        let status = self.backend.fetch_subscription_status(&session).await?;
        let tier = Tier::from_subscription_status(&status);
        let count = self.backend.fetch_usage(&session, &month).await?;
        let snapshot = build_snapshot(&month, tier, count);
        if snapshot.warn {
            tracing::info!(
                month = %snapshot.month,
                count = snapshot.generation_count,
                limit = snapshot.monthly_limit,
                "usage crossed the soft warning threshold"
            );
        }
        self.store.upsert_usage_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Gates one synthesis call against the cached counter, then lets the
    /// backend have the final say. Quota rejections are never queued.
    pub async fn attempt_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome> {
        let session = self.require_session()?;
        let month = month_key(Utc::now());

        let cached = match self.store.get_usage_snapshot(&month)? {
            Some(snapshot) => snapshot,
            None => self.load_tier_and_usage(false).await?,
        };
        if cached.generation_count >= cached.monthly_limit {
            return Ok(GenerationOutcome::LimitReached {
                tier: cached.tier,
                generation_count: cached.generation_count,
                monthly_limit: cached.monthly_limit,
                message: limit_message(cached.tier),
            });
        }

        match self.backend.generate_speech(&session, request).await? {
            SynthesisResponse::Audio(audio) => {
                let usage = match self.load_tier_and_usage(true).await {
                    Ok(snapshot) => Some(snapshot),
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to refresh usage after generation");
                        None
                    }
                };
                Ok(GenerationOutcome::Completed { audio, usage })
            }
            SynthesisResponse::QuotaRejected(rejection) => {
                let reconciled = build_snapshot(&month, cached.tier, rejection.count);
                tracing::warn!(
                    month = %month,
                    server_count = rejection.count,
                    cached_count = cached.generation_count,
                    "backend rejected generation, reconciling cached usage counter"
                );
                self.store.upsert_usage_snapshot(&reconciled)?;
                Ok(GenerationOutcome::LimitReached {
                    tier: reconciled.tier,
                    generation_count: reconciled.generation_count,
                    monthly_limit: reconciled.monthly_limit,
                    message: limit_message(reconciled.tier),
                })
            }
        }
    }
}

pub(crate) fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

fn snapshot_age_seconds(snapshot: &UsageSnapshot) -> i64 {
    DateTime::parse_from_rfc3339(&snapshot.fetched_at)
        .map(|fetched| {
            Utc::now()
                .signed_duration_since(fetched.with_timezone(&Utc))
                .num_seconds()
        })
        .unwrap_or(i64::MAX)
}

fn build_snapshot(month: &str, tier: Tier, count: u32) -> UsageSnapshot {
    let monthly_limit = tier.monthly_limit();
    UsageSnapshot {
        month: month.to_string(),
        tier,
        generation_count: count,
        monthly_limit,
        warn: count as f64 >= monthly_limit as f64 * USAGE_WARN_THRESHOLD,
        fetched_at: store::now(),
    }
}

fn limit_message(tier: Tier) -> String {
    match tier {
        Tier::Free => {
            "You've reached your free monthly generation limit. Upgrade to keep creating."
                .to_string()
        }
        Tier::Pro => {
            "You've reached this month's generation limit. Your allowance resets next month."
                .to_string()
        }
    }
}
