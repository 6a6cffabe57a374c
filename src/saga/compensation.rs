//! Reverse-order compensation shared by the saga coordinator and the engine's
//! failed-execution rollback.

use crate::error::OrchestrationResult;
use crate::models::CompensationErrorRecord;
use std::future::Future;
use tracing::{debug, warn};

/// Compensate `completed` (in forward order) newest first.
///
/// Every entry is attempted; failures are collected in the order they occur
/// and never stop the rollback.
pub async fn compensate_in_reverse<T, F, Fut>(
    completed: Vec<(String, T)>,
    mut compensate: F,
) -> Vec<CompensationErrorRecord>
where
    F: FnMut(String, T) -> Fut,
    Fut: Future<Output = OrchestrationResult<()>>,
{
    let mut failures = Vec::new();

    for (step_id, item) in completed.into_iter().rev() {
        match compensate(step_id.clone(), item).await {
            Ok(()) => debug!(step_id = %step_id, "Compensation completed"),
            Err(error) => {
                warn!(step_id = %step_id, error = %error, "Compensation failed, continuing rollback");
                failures.push(CompensationErrorRecord {
                    step_id,
                    error: error.to_string(),
                });
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_runs_newest_first_and_collects_every_failure() {
        let order = Mutex::new(Vec::new());
        let completed = vec![
            ("a".to_string(), 1),
            ("b".to_string(), 2),
            ("c".to_string(), 3),
        ];

        let failures = compensate_in_reverse(completed, |step_id, n| {
            order.lock().push(step_id.clone());
            async move {
                if n % 2 == 1 {
                    Err(OrchestrationError::Internal(format!("undo {step_id} failed")))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(*order.lock(), vec!["c", "b", "a"]);
        let failed: Vec<_> = failures.iter().map(|f| f.step_id.as_str()).collect();
        assert_eq!(failed, vec!["c", "a"]);
        assert!(failures[0].error.contains("undo c failed"));
    }
}
