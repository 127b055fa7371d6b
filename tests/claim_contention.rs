//! Claim correctness under contention: N concurrent claimers against M
//! eligible records must hand each record to exactly one claimer.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tempfile::TempDir;
use tokio::task::JoinSet;

use legisrec::database::models::NewVideo;
use legisrec::database::repositories::{SqlxVideoRepository, VideoRepository};
use legisrec::database::{init_pool, init_write_pool, run_migrations};
use legisrec::domain::{RawDescriptor, Source, Stage};

const RECORDS: usize = 120;
const CLAIMERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claimers_never_double_claim() {
    let dir = TempDir::new().unwrap();
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("claims.db").to_string_lossy().replace('\\', "/")
    );

    let pool = init_pool(&db_url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let write_pool = init_write_pool(&db_url).await.unwrap();
    let repo = Arc::new(SqlxVideoRepository::new(pool, write_pool, 3));

    // Seed a backlog of discovered videos.
    for i in 0..RECORDS {
        let new = NewVideo::from_descriptor(
            Source::House,
            &RawDescriptor {
                natural_key: format!("HTEST-{i:04}"),
                title: format!("Hearing {i}"),
                committee: None,
                recorded_at: Utc::now(),
                page_url: format!("https://house.mi.gov/VideoArchivePlayer?video=HTEST-{i:04}.mp4"),
            },
        )
        .unwrap();
        assert!(repo.upsert_discovered(&new).await.unwrap());
    }

    let claimed_ids = Arc::new(DashSet::<String>::new());

    let mut claimers = JoinSet::new();
    for worker in 0..CLAIMERS {
        let repo = repo.clone();
        let claimed_ids = claimed_ids.clone();
        claimers.spawn(async move {
            let name = format!("claimer-{worker}");
            loop {
                match repo.claim_next(Stage::Discovered, &name).await.unwrap() {
                    Some(claimed) => {
                        assert_eq!(claimed.stage, "RESOLVING");
                        assert_eq!(claimed.attempt_count, 1);
                        assert_eq!(claimed.lease_owner.as_deref(), Some(name.as_str()));

                        let inserted = claimed_ids.insert(claimed.id.clone());
                        assert!(inserted, "double-claimed {}", claimed.id);

                        tokio::task::yield_now().await;
                    }
                    None => {
                        // Leases are held, never released, so an empty claim
                        // means the backlog is drained once the count agrees.
                        if repo.count_ready(Stage::Discovered).await.unwrap() == 0 {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
        });
    }

    let joined = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        while claimers.join_next().await.is_some() {}
    })
    .await;
    assert!(joined.is_ok(), "claimers timed out (possible deadlock)");

    // Every record distributed exactly once before any repeats.
    assert_eq!(claimed_ids.len(), RECORDS, "not all records were claimed");

    let stats = repo.get_stats().await.unwrap();
    assert_eq!(stats.in_progress, RECORDS as u64);
    assert_eq!(stats.discovered, 0);
}
