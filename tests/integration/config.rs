//! Configuration files feeding real pools.

use drainpool::util::config::{load_layered_from, ConfigOverrides, ENV_STAGE};
use drainpool::{Pool, PoolConfig, Task};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[test]
fn test_pool_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "limit = 2\n\n[retry]\nattempts = 4\nbase_delay_ms = 1").unwrap();

    let config = PoolConfig::load(file.path()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let mut pool = Pool::from_config(&config).unwrap();
    assert_eq!(pool.limit(), Some(2));

    let err = pool
        .submit(vec![Task::simple(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("always")
        })])
        .wait()
        .unwrap_err();
    pool.close();

    assert_eq!(err.to_string(), "always");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_test_stage_serializes_batch() {
    let config = load_layered_from(
        None,
        &ConfigOverrides {
            limit: Some(8),
            ..ConfigOverrides::default()
        },
        |key| (key == ENV_STAGE).then(|| "test".to_string()),
    )
    .unwrap();

    let mut pool = Pool::from_config(&config).unwrap();
    assert_eq!(pool.limit(), Some(1));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            Task::simple(|| {
                std::thread::sleep(std::time::Duration::from_millis(2));
                Ok(())
            })
        })
        .collect();
    pool.submit(tasks).wait().unwrap();
    assert_eq!(pool.stats().peak_parallelism.load(Ordering::SeqCst), 1);
    pool.close();
}
