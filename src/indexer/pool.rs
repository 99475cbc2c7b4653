use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug)]
pub enum GroupError<E> {
    Failed(E),
    Panicked(String),
}

/// Run `task` over `items` with at most `concurrency` in flight.
///
/// Results come back in input order once every task has finished. The first
/// failure aborts the tasks still running and is returned as-is.
pub async fn run_bounded<I, T, E, F, Fut>(
    items: Vec<I>,
    concurrency: usize,
    task: F,
) -> Result<Vec<T>, GroupError<E>>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set: JoinSet<(usize, Result<T, E>)> = JoinSet::new();
    let total = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let fut = task(item);
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (index, fut.await)
        });
    }

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => results[index] = Some(value),
            Ok((_, Err(e))) => {
                join_set.abort_all();
                return Err(GroupError::Failed(e));
            }
            Err(e) => {
                join_set.abort_all();
                return Err(GroupError::Panicked(e.to_string()));
            }
        }
    }

    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let out = run_bounded(vec![30u64, 10, 20], 3, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, String>(delay)
        })
        .await
        .unwrap();
        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = run_bounded((0..12).collect(), 5, |i: usize| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(i)
            }
        })
        .await
        .unwrap();

        assert_eq!(out.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));

        let result = run_bounded(vec![0u64, 1, 2, 3], 4, |i| {
            let finished = finished.clone();
            async move {
                if i == 0 {
                    return Err(format!("task {} failed", i));
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(i)
            }
        })
        .await;

        assert!(matches!(result, Err(GroupError::Failed(msg)) if msg == "task 0 failed"));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let result = run_bounded(vec![1u8], 1, |_| async move {
            if true {
                panic!("receipt decoder exploded");
            }
            Ok::<u8, String>(0)
        })
        .await;
        assert!(matches!(result, Err(GroupError::Panicked(_))));
    }
}
