//! Concurrency test: readers racing the scan writer never observe a
//! half-applied presence table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tuya_broker::application::DiscoveryCache;
use tuya_broker::domain::StalenessPolicy;
use tuya_core::{DeviceId, PresenceRecord};

const SET_SIZE: usize = 64;

/// Two disjoint device sets; the writer alternates between them.
fn device_set(prefix: &str) -> Vec<PresenceRecord> {
    let now = Utc::now();
    (0..SET_SIZE)
        .map(|i| {
            PresenceRecord::new(
                DeviceId::new(format!("{prefix}{i:03}")),
                format!("10.0.{}.{}", i / 200, i % 200 + 1).parse().unwrap(),
                now,
            )
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_whole_snapshots_only() {
    // Arrange
    let cache = Arc::new(DiscoveryCache::new(StalenessPolicy::DropMissing));
    let set_a = device_set("a");
    let set_b = device_set("b");
    cache.apply_success(set_a.clone(), Utc::now(), Duration::ZERO);
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        readers.push(tokio::spawn(async move {
            let mut reads = 0u64;
            loop {
                let finished = done.load(Ordering::Acquire);
                let snapshot = cache.snapshot();
                let ids: Vec<&str> = snapshot.devices.keys().map(DeviceId::as_str).collect();

                // Assert: exactly one full set, never a mix
                assert_eq!(ids.len(), SET_SIZE);
                let first = ids[0].as_bytes()[0];
                assert!(
                    ids.iter().all(|id| id.as_bytes()[0] == first),
                    "snapshot mixed two scans"
                );

                reads += 1;
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
            reads
        }));
    }

    // Act: the writer swaps the table repeatedly
    let writer = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for round in 0..500 {
                let next = if round % 2 == 0 { set_b.clone() } else { set_a.clone() };
                cache.apply_success(next, Utc::now(), Duration::ZERO);
                tokio::task::yield_now().await;
            }
        })
    };
    writer.await.unwrap();
    done.store(true, Ordering::Release);

    let mut total_reads = 0;
    for reader in readers {
        total_reads += reader.await.unwrap();
    }
    assert!(total_reads >= 4);
    assert_eq!(cache.snapshot().scans_completed, 501);
}
