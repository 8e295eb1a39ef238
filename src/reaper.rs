use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Background task that cancels pending bookings whose hold expired and
/// purges stale advisory locks.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_pending(now);
        for (booking_id, _resource_id) in expired {
            match engine.cancel_booking(booking_id).await {
                Ok(_) => {
                    metrics::counter!(observability::REAPED_BOOKINGS_TOTAL).increment(1);
                    info!("reaped expired pending booking {booking_id}");
                }
                Err(e) => {
                    // May already have been cancelled or confirmed
                    tracing::debug!("reaper skip {booking_id}: {e}");
                }
            }
        }
        let purged = engine.locks.purge_stale(now);
        if purged > 0 {
            tracing::debug!("purged {purged} stale locks");
        }
    }
}
