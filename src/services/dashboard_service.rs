use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::cache::CacheLayer;
use crate::db::DashboardRepository;
use crate::error::AppResult;
use crate::models::DashboardStats;

/// Cache-backed dashboard aggregates. Read path: redis, then a still-valid
/// database snapshot, then a fresh computation that refreshes both.
pub struct DashboardService {
    repository: DashboardRepository,
    cache: CacheLayer,
    ttl_secs: u64,
}

impl DashboardService {
    pub fn new(repository: DashboardRepository, cache: CacheLayer, ttl_secs: u64) -> Self {
        Self { repository, cache, ttl_secs }
    }

    fn cache_key(user_id: Option<&Uuid>) -> String {
        match user_id {
            Some(uid) => format!("dashboard:{}", uid),
            None => "dashboard:global".to_string(),
        }
    }

    pub async fn stats(&self, user_id: Option<&Uuid>) -> AppResult<DashboardStats> {
        let key = Self::cache_key(user_id);

        if let Some(mut cached) = self.cache.get::<DashboardStats>(&key).await {
            if cached.expires_at > Utc::now() {
                cached.cached = true;
                return Ok(cached);
            }
        }

        if let Some(snapshot) = self.repository.get_valid(user_id).await? {
            let stats = DashboardStats {
                total_analyses: snapshot.total_analyses,
                valid_leads: snapshot.valid_leads,
                type_distribution: snapshot.type_distribution,
                status_distribution: snapshot.status_distribution,
                monthly_series: snapshot.monthly_series,
                cached: true,
                expires_at: snapshot.expires_at,
            };
            self.cache.set(&key, &stats).await;
            return Ok(stats);
        }

        self.refresh(user_id).await
    }

    /// Recomputes the snapshot and refreshes both cache tiers. Called on
    /// miss and by the periodic warmer.
    pub async fn refresh(&self, user_id: Option<&Uuid>) -> AppResult<DashboardStats> {
        let started = Instant::now();
        let aggregates = self.repository.aggregate_for_user(user_id).await?;
        let calculation_ms = started.elapsed().as_millis() as i64;

        let record_count = aggregates.total_analyses;
        let snapshot = self
            .repository
            .upsert(
                user_id,
                aggregates.total_analyses,
                aggregates.valid_leads,
                aggregates.type_distribution,
                aggregates.status_distribution,
                aggregates.monthly_series,
                record_count,
                calculation_ms,
                self.ttl_secs,
            )
            .await?;

        let stats = DashboardStats {
            total_analyses: snapshot.total_analyses,
            valid_leads: snapshot.valid_leads,
            type_distribution: snapshot.type_distribution,
            status_distribution: snapshot.status_distribution,
            monthly_series: snapshot.monthly_series,
            cached: false,
            expires_at: snapshot.expires_at,
        };
        self.cache.set(&Self::cache_key(user_id), &stats).await;
        Ok(stats)
    }

    /// Periodic cleanup of expired snapshot rows.
    pub async fn cleanup_expired(&self) -> AppResult<u64> {
        let removed = self.repository.cleanup_expired().await?;
        if removed > 0 {
            log::info!("Removed {} expired dashboard snapshots", removed);
        }
        Ok(removed)
    }

    /// Guard used in tests and by callers that must never serve a stale
    /// snapshot.
    pub fn is_snapshot_fresh(expires_at: chrono::DateTime<Utc>) -> bool {
        expires_at > Utc::now()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cache_key_scoping() {
        let uid = Uuid::nil();
        assert_eq!(DashboardService::cache_key(Some(&uid)), format!("dashboard:{}", uid));
        assert_eq!(DashboardService::cache_key(None), "dashboard:global");
    }

    #[test]
    fn test_snapshot_freshness() {
        assert!(DashboardService::is_snapshot_fresh(Utc::now() + Duration::minutes(5)));
        assert!(!DashboardService::is_snapshot_fresh(Utc::now() - Duration::seconds(1)));
    }
}
