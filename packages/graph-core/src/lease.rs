//! Single-row project lease lock (§4.5). Serializes the merge/delete phase
//! per project while extraction runs lock-free and fully parallel.
//!
//! Grounded on the claim-protocol conditional UPDATE style of
//! `kernel/jobs/queue.rs` (`PostgresJobQueue::heartbeat`/`claim_jobs`) and the
//! `CancellationToken`-per-unit-of-work pattern in `kernel/jobs/worker.rs`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};

const MAX_CONSECUTIVE_RENEW_FAILURES: u32 = 3;
const RENEW_STATEMENT_TIMEOUT: Duration = Duration::from_secs(15);
const RENEW_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub enum AcquireMode {
    /// Return `LeaseBusy` immediately if the lease is held by someone else.
    Fail,
    /// Retry (with jitter) until `cancel` fires.
    Wait,
}

pub struct LeaseOptions {
    pub ttl: Duration,
    pub token_prefix: String,
    pub mode: AcquireMode,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            token_prefix: "lease".to_string(),
            mode: AcquireMode::Fail,
        }
    }
}

/// A held lease. Dropping it does not release the row (release is explicit
/// and fallible, per §4.5) but does stop the renew loop.
pub struct Lease {
    pool: PgPool,
    key: String,
    token: String,
    cancel: CancellationToken,
    renew_handle: tokio::task::JoinHandle<()>,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Cancelled with cause `ErrLost` after 3 consecutive failed renewals,
    /// or on `release()`.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Deletes the row iff key+token match; stops the renew loop exactly
    /// once. Failure (e.g. a dropped connection) is logged at debug — TTL
    /// expiry reclaims the row regardless (§4.3 Phase B step 8).
    pub async fn release(self) {
        self.cancel.cancel();
        self.renew_handle.abort();

        let result = sqlx::query(
            "DELETE FROM app_locks WHERE lock_key = $1 AND locked_by = $2",
        )
        .bind(&self.key)
        .bind(&self.token)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            debug!(key = %self.key, error = %e, "lease release failed; TTL will reclaim");
        }
    }
}

/// Acquires the lease on `key`. On success, spawns a background renew loop
/// ticking every `max(ttl/2, 1s)`.
pub async fn acquire(pool: &PgPool, key: &str, opts: LeaseOptions) -> Result<Lease> {
    let token = format!("{}-{}", opts.token_prefix, Uuid::new_v4());
    let renew_every = (opts.ttl / 2).max(Duration::from_secs(1));

    loop {
        let acquired = try_acquire_once(pool, key, &token, opts.ttl).await?;
        if acquired {
            break;
        }
        match opts.mode {
            AcquireMode::Fail => {
                return Err(CoreError::LeaseBusy {
                    key: key.to_string(),
                })
            }
            AcquireMode::Wait => {
                let jitter = Duration::from_millis(200 + (rand_jitter_ms() % 300));
                tokio::time::sleep(jitter).await;
            }
        }
    }

    let cancel = CancellationToken::new();
    let renew_handle = spawn_renew_loop(
        pool.clone(),
        key.to_string(),
        token.clone(),
        opts.ttl,
        renew_every,
        cancel.clone(),
    );

    Ok(Lease {
        pool: pool.clone(),
        key: key.to_string(),
        token,
        cancel,
        renew_handle,
    })
}

async fn try_acquire_once(pool: &PgPool, key: &str, token: &str, ttl: Duration) -> Result<bool> {
    let ttl_secs = ttl.as_secs() as f64;
    let result = sqlx::query(
        r#"
        INSERT INTO app_locks (lock_key, locked_by, expires_at)
        VALUES ($1, $2, NOW() + ($3 || ' seconds')::INTERVAL)
        ON CONFLICT (lock_key) DO UPDATE
        SET locked_by = EXCLUDED.locked_by, expires_at = EXCLUDED.expires_at
        WHERE app_locks.expires_at < NOW() OR app_locks.locked_by = EXCLUDED.locked_by
        "#,
    )
    .bind(key)
    .bind(token)
    .bind(ttl_secs.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn spawn_renew_loop(
    pool: PgPool,
    key: String,
    token: String,
    ttl: Duration,
    renew_every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut consecutive_failures = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(renew_every) => {}
            }

            match renew_once(&pool, &key, &token, ttl).await {
                Ok(true) => consecutive_failures = 0,
                Ok(false) | Err(_) => {
                    consecutive_failures += 1;
                    warn!(key = %key, failures = consecutive_failures, "lease renew failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_RENEW_FAILURES {
                        cancel.cancel();
                        return;
                    }
                    tokio::time::sleep(RENEW_BACKOFF).await;
                }
            }
        }
    })
}

async fn renew_once(pool: &PgPool, key: &str, token: &str, ttl: Duration) -> Result<bool> {
    let ttl_secs = ttl.as_secs() as f64;
    let fut = sqlx::query(
        r#"
        UPDATE app_locks
        SET expires_at = NOW() + ($3 || ' seconds')::INTERVAL
        WHERE lock_key = $1 AND locked_by = $2
        "#,
    )
    .bind(key)
    .bind(token)
    .bind(ttl_secs.to_string())
    .execute(pool);

    let result = tokio::time::timeout(RENEW_STATEMENT_TIMEOUT, fut)
        .await
        .map_err(|_| CoreError::LeaseLost { key: key.to_string() })??;

    Ok(result.rows_affected() > 0)
}

/// Returns a pseudo-random jitter in `[0, ~300)`. Not a `rand` dependency:
/// the renew/backoff jitter doesn't need cryptographic quality, just not to
/// collide across competing waiters; nanosecond wallclock is sufficient
/// (the thundering-herd mitigation only needs rough spread, not strong RNG).
fn rand_jitter_ms() -> u64 {
    Utc::now().timestamp_subsec_nanos() as u64
}

/// Used by the recovery scheduler and crash-recovery tests to express a
/// project's lock key (§4.4, §4.9).
pub fn project_lock_key(project_id: impl std::fmt::Display) -> String {
    graph_types::project_lock_key(project_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..100 {
            assert!(rand_jitter_ms() < u64::from(u32::MAX));
        }
    }

    #[test]
    fn project_lock_key_matches_convention() {
        assert_eq!(project_lock_key(42), "project:42");
    }
}
