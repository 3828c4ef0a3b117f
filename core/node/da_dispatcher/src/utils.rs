use std::{fmt, future::Future, time::Duration};

use rand::Rng;

use lumen_dal::DalError;
use lumen_validator_client::ClientError;

pub(crate) fn hex_fmt(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Errors that can distinguish a retriable failure from a terminal one.
pub(crate) trait Retriable {
    fn is_retriable(&self) -> bool;
}

impl Retriable for ClientError {
    fn is_retriable(&self) -> bool {
        ClientError::is_retriable(self)
    }
}

impl Retriable for DalError {
    fn is_retriable(&self) -> bool {
        DalError::is_retriable(self)
    }
}

/// Runs `f` until it succeeds, the error is terminal, or the retry budget is
/// exhausted. Backoff doubles from 100 ms up to 5 s with a +-20% jitter.
/// Returns the result together with the number of attempts made.
pub(crate) async fn retry<T, E, Fut, F>(
    max_retries: u32,
    label: &str,
    mut f: F,
) -> (Result<T, E>, usize)
where
    E: Retriable + fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    F: FnMut() -> Fut,
{
    let mut attempts = 1;
    let mut backoff_ms = 100;
    loop {
        match f().await {
            Ok(result) => return (Ok(result), attempts),
            Err(err) => {
                if !err.is_retriable() || attempts > max_retries as usize {
                    return (Err(err), attempts);
                }

                let sleep_duration = Duration::from_millis(backoff_ms)
                    .mul_f32(rand::thread_rng().gen_range(0.8..1.2));
                tracing::warn!(
                    "Failed request {attempts}/{max_retries} for {label}, retrying in {} ms: {err}",
                    sleep_duration.as_millis()
                );
                tokio::time::sleep(sleep_duration).await;

                attempts += 1;
                backoff_ms = (backoff_ms * 2).min(5_000);
            }
        }
    }
}
