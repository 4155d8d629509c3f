//! Benchmark for single-flight coalescing on a cold key.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use wager_sync::{
    SourceStatus, StoreConfig, SnapshotStore, TrackerError, WagerSnapshot, WagerSource,
    async_trait,
};

struct SlowSource;

#[async_trait]
impl WagerSource for SlowSource {
    async fn fetch(&self, affiliate_id: &str) -> Result<WagerSnapshot, TrackerError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(WagerSnapshot {
            affiliate_id: affiliate_id.to_string(),
            total_wager: 1_000.0,
            period_wager: 100.0,
            raw_payload_digest: String::new(),
            fetched_at: SystemTime::now(),
            source_status: SourceStatus::Ok,
        })
    }
}

fn bench_singleflight(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("failed to create runtime"));
    let store = Arc::new(SnapshotStore::new(Arc::new(SlowSource), StoreConfig::default()));

    c.bench_function("coalesce_100_concurrent_cold", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:{}", rand::random::<u32>());
                let mut handles = vec![];
                for _ in 0..100 {
                    let store = Arc::clone(&store);
                    let key = key.clone();
                    handles.push(tokio::spawn(async move {
                        store
                            .get_or_refresh(&key, Duration::from_secs(60))
                            .await
                            .unwrap_or_else(|_| panic!("fetch failed"))
                    }));
                }
                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("task failed")));
                }
            });
        });
    });
}

criterion_group!(benches, bench_singleflight);
criterion_main!(benches);
