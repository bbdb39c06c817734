pub mod scripts;

use std::{future::Future, time::Duration};

use log::warn;

use crate::errors::RepoError;

/// Drive `fut` under the caller's deadline, mapping expiry to [`RepoError::Timeout`].
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    table: &str,
    after: Duration,
    fut: F,
) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{operation} on table '{table}' exceeded its deadline of {after:?}");
            Err(RepoError::Timeout {
                operation,
                table: table.to_string(),
                after,
            })
        }
    }
}
