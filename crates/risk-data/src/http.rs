use reqwest::Client;
use serde::de::DeserializeOwned;
use sri_core::{Provider, RetryPolicy, SriError};
use std::future::Future;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Shared HTTP client for provider adapters.
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Run `op` under `policy`, sleeping between attempts on transient failures.
///
/// Transient failures are the ones reported as `SriError::Http` (transport errors,
/// 429 and 5xx). Once the budget is spent they surface as a provider error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: Provider,
    what: &str,
    mut op: F,
) -> Result<T, SriError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SriError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} request for {} failed ({}), retry {}/{} in {:.1}s",
                    provider,
                    what,
                    e,
                    attempt + 1,
                    max_attempts - 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(SriError::Http(message)) => {
                return Err(SriError::provider(
                    provider,
                    format!("{} failed after {} attempt(s): {}", what, attempt + 1, message),
                ));
            }
            Err(e) => return Err(e),
        }
    }
}

/// GET `url` and decode a JSON body, retrying per `policy`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    provider: Provider,
    policy: &RetryPolicy,
    what: &str,
) -> Result<T, SriError> {
    with_retry(policy, provider, what, || async move {
        let response = client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| SriError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(SriError::Http(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SriError::provider(
                provider,
                format!("HTTP {} for {}: {}", status, what, response.text().await.unwrap_or_default()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SriError::provider(provider, format!("Malformed response for {}: {}", what, e)))
    })
    .await
}
