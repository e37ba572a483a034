//! Labeled fan-out barrier.
//!
//! Runs every branch to completion and folds the failures into one
//! [`BranchErrors`] that remembers which branch produced which error.

use futures::future::{join_all, BoxFuture};

use crate::error::{BranchErrors, BranchFailure, NotifyError};

/// A branch label and the work it runs.
pub type Branch<'a> = (String, BoxFuture<'a, Result<(), NotifyError>>);

/// Await all branches concurrently. A failure never cancels its siblings.
pub async fn join_branches(scope: &'static str, branches: Vec<Branch<'_>>) -> Result<(), NotifyError> {
    let (labels, futures): (Vec<String>, Vec<_>) = branches.into_iter().unzip();
    let results = join_all(futures).await;

    let mut failures = Vec::new();
    let mut succeeded = 0;
    for (branch, result) in labels.into_iter().zip(results) {
        match result {
            Ok(()) => succeeded += 1,
            Err(error) => failures.push(BranchFailure { branch, error }),
        }
    }

    if failures.is_empty() {
        return Ok(());
    }

    Err(NotifyError::Branches(BranchErrors {
        scope,
        failures,
        succeeded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_ok() {
        let branches: Vec<Branch> = vec![
            ("a".into(), async { Ok(()) }.boxed()),
            ("b".into(), async { Ok(()) }.boxed()),
        ];
        assert!(join_branches("test", branches).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let finished = AtomicUsize::new(0);
        let finished_ref = &finished;
        let branches: Vec<Branch> = vec![
            (
                "fast-fail".into(),
                async { Err(NotifyError::TaskNotFound("T1".into())) }.boxed(),
            ),
            (
                "slow-ok".into(),
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished_ref.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            ),
        ];

        let err = join_branches("test", branches).await.unwrap_err();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        match err {
            NotifyError::Branches(ref b) => {
                assert_eq!(b.failed_branches(), vec!["fast-fail"]);
                assert_eq!(b.succeeded, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Partial);
    }

    #[tokio::test]
    async fn test_failures_keep_launch_order() {
        let branches: Vec<Branch> = vec![
            (
                "first".into(),
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(NotifyError::Validation("late".into()))
                }
                .boxed(),
            ),
            (
                "second".into(),
                async { Err(NotifyError::TaskNotFound("T1".into())) }.boxed(),
            ),
        ];

        let err = join_branches("test", branches).await.unwrap_err();
        // Launch order, not completion order, decides the class
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}
