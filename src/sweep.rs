//! Endpoint status sweep
//!
//! Heartbeats only ever set endpoints online; silence is detected here. A
//! periodic task demotes `online -> offline` after a short quiet period and
//! `online|offline -> disconnected` after a long one.
//!
//! Every transition is guarded by a `last_seen_at` comparison in the WHERE
//! clause, so a heartbeat landing mid-sweep wins: the fresh timestamp takes
//! the row out of the sweep's match set. Running two sweeps concurrently is
//! harmless for the same reason.

use sqlx::PgPool;
use std::time::Duration;

use crate::config::Config;

pub async fn run(pool: PgPool, config: Config) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_seconds));
    // Skip missed ticks instead of bursting after a long DB stall.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Status sweep running every {}s (offline after {}s, disconnected after {}s)",
        config.sweep_interval_seconds,
        config.offline_after_seconds,
        config.disconnected_after_seconds,
    );

    loop {
        interval.tick().await;

        if let Err(e) = sweep_once(&pool, &config).await {
            tracing::warn!("Status sweep failed: {}", e);
        }
    }
}

async fn sweep_once(pool: &PgPool, config: &Config) -> Result<(), sqlx::Error> {
    // Endpoints that never heartbeated fall back to their registration time.
    let offline = sqlx::query(
        r#"
        UPDATE endpoints
        SET status = 'offline', updated_at = NOW()
        WHERE status = 'online'
          AND COALESCE(last_seen_at, registered_at) < NOW() - make_interval(secs => $1)
        "#
    )
    .bind(config.offline_after_seconds as f64)
    .execute(pool)
    .await?
    .rows_affected();

    let disconnected = sqlx::query(
        r#"
        UPDATE endpoints
        SET status = 'disconnected', updated_at = NOW()
        WHERE status IN ('online', 'offline')
          AND COALESCE(last_seen_at, registered_at) < NOW() - make_interval(secs => $1)
        "#
    )
    .bind(config.disconnected_after_seconds as f64)
    .execute(pool)
    .await?
    .rows_affected();

    if offline > 0 || disconnected > 0 {
        tracing::info!("Status sweep: {} offline, {} disconnected", offline, disconnected);
    }

    Ok(())
}
