//! Timeout wrapper for collaborator calls.

use std::future::Future;
use std::time::Duration;
use tenantry_core::{TenancyError, TenancyResult};

/// Run `fut` under a deadline, mapping expiry to [`TenancyError::Timeout`].
pub(crate) async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> TenancyResult<T>
where
    F: Future<Output = TenancyResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(TenancyError::timeout(operation, after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let value = bounded("noop", Duration::from_secs(1), async { Ok::<_, TenancyError>(7) })
            .await
            .expect("completes in time");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bounded_maps_expiry() {
        let err = bounded("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, TenancyError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, TenancyError::timeout("slow", Duration::from_millis(10)));
    }
}
