use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::observability;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!(
                "compacted WAL after {appends} appends ({} entries kept)",
                engine.entry_count()
            );
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OpenCatalog;
    use crate::model::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("weekslot_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(hour: u32) -> NewEntry {
        NewEntry {
            course_ref: "CS101".into(),
            instructor_ref: None,
            room: Some("A-101".into()),
            building: None,
            day_of_week: DayOfWeek::Thursday,
            start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_to: None,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path, Arc::new(OpenCatalog)).unwrap();

        for hour in 8..11 {
            engine.create(booking(hour)).await.unwrap();
        }
        assert!(!compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        for hour in 11..13 {
            engine.create(booking(hour)).await.unwrap();
        }
        assert!(compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.entry_count(), 5);
    }

    #[tokio::test]
    async fn compacted_log_replays_to_same_state() {
        let path = test_wal_path("replay_after.wal");
        let kept;
        {
            let engine = Engine::new(path.clone(), Arc::new(OpenCatalog)).unwrap();
            let gone = engine.create(booking(8)).await.unwrap();
            kept = engine.create(booking(9)).await.unwrap();
            engine.delete(gone.id).await.unwrap();
            assert!(compact_if_needed(&engine, 1).await);
        }

        let engine = Engine::new(path, Arc::new(OpenCatalog)).unwrap();
        assert_eq!(engine.list(false), vec![kept]);
    }
}
