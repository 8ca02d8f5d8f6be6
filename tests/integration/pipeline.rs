//! End-to-end batches through the public API.

use anyhow::{bail, Context};
use drainpool::{shared, workers, Drainer, LockedDrainer, Pool, Task};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Page {
    url: String,
    bytes: usize,
}

#[test]
fn test_mixed_batch_with_inputs_and_outputs() {
    let pages = Drainer::new();
    let words = LockedDrainer::new();
    let visits = shared(HashMap::<String, u32>::new());

    let urls = ["a.example", "b.example", "c.example"];
    let mut batch = workers![];
    for url in urls {
        batch.push(
            Task::<HashMap<String, u32>, Page>::new(move |args| {
                *args.input()?.entry(url.to_string()).or_default() += 1;
                args.send(Page {
                    url: url.to_string(),
                    bytes: url.len() * 100,
                })?;
                Ok(())
            })
            .with_input(visits.clone())
            .drain_to(&pages)
            .boxed(),
        );
    }
    batch.push(
        Task::<(), String>::new(|args| {
            for word in "one two three".split(' ') {
                args.send(word.to_string())?;
            }
            Ok(())
        })
        .drain_to(&words)
        .boxed(),
    );

    let mut pool = Pool::new().with_limit(2);
    pool.submit(batch).wait().unwrap();
    pool.close();

    let mut pages = pages.drain();
    pages.sort_by(|a, b| a.url.cmp(&b.url));
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].url, "a.example");
    assert_eq!(pages[0].bytes, 900);

    assert_eq!(words.drain(), vec!["one", "two", "three"]);
    assert!(visits.lock().values().all(|&n| n == 1));
    assert_eq!(visits.lock().len(), 3);
}

#[test]
fn test_partial_output_survives_failures() {
    let output = Drainer::new();
    let tasks: Vec<_> = (0..20u32)
        .map(|i| {
            Task::<(), u32>::new(move |args| {
                if i % 5 == 0 {
                    bail!("item {} rejected", i);
                }
                args.send(i)?;
                Ok(())
            })
            .drain_to(&output)
        })
        .collect();

    let mut pool = Pool::new().with_limit(4);
    let err = pool.submit(tasks).wait().unwrap_err();
    assert_eq!(err.to_string(), "item 0 rejected");

    let (errors, has_errors) = pool.errors();
    assert!(has_errors);
    assert_eq!(
        errors.iter().map(|e| e.index()).collect::<Vec<_>>(),
        vec![0, 5, 10, 15]
    );
    pool.close();

    assert_eq!(output.len(), 16);
}

#[test]
fn test_context_chain_is_preserved() {
    let mut pool = Pool::new();
    let err = pool
        .submit(vec![Task::simple(|| {
            "not a number"
                .parse::<u32>()
                .context("reading batch size")?;
            Ok(())
        })])
        .wait()
        .unwrap_err();
    pool.close();

    assert_eq!(err.to_string(), "reading batch size");
    assert!(format!("{:#}", err).starts_with("reading batch size: "));
}

#[test]
fn test_task_reusable_outside_pool() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let mut task = Task::simple(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            bail!("not yet");
        }
        Ok(())
    })
    .with_retry(3, Duration::from_millis(1));

    task.execute().unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_many_tasks_one_drainer() {
    let output = Drainer::with_chunk_capacity(16);
    let tasks: Vec<_> = (0..200usize)
        .map(|i| {
            Task::<(), usize>::new(move |args| {
                for j in 0..10 {
                    args.send(i * 10 + j)?;
                }
                Ok(())
            })
            .drain_to(&output)
        })
        .collect();

    let mut pool = Pool::new().with_limit(16);
    pool.submit(tasks).wait().unwrap();
    pool.close();

    let mut values = output.drain();
    values.sort_unstable();
    assert_eq!(values, (0..2000).collect::<Vec<_>>());
    assert!(output.chunks() >= 125);
}
