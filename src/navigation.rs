use std::time::Duration;

use tracing::{info, warn};

use crate::config::NavigationPolicy;
use crate::error::PageError;
use crate::page::Page;

/// Extra time the backend gets to report its own timeout.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Every strategy failed, or the page went away part way.
#[derive(Debug)]
pub struct NavigationFailure {
    pub attempts: usize,
    pub last: PageError,
}

/// Open `url`, escalating through the policy's strategies. Returns the
/// 1-based attempt that succeeded.
///
/// Attempts are separated by exponential backoff and a best-effort reload.
/// Only a lost page ends the ladder early.
pub async fn navigate(page: &dyn Page, url: &str, policy: &NavigationPolicy) -> Result<usize, NavigationFailure> {
    let mut last = PageError::Navigation("no navigation strategies configured".to_string());

    for (i, strategy) in policy.strategies.iter().enumerate() {
        let attempt = i + 1;
        if i > 0 {
            tokio::time::sleep(policy.backoff(i as u32)).await;
            if let Err(e) = page.reload().await {
                if e.is_fatal() {
                    return Err(NavigationFailure { attempts: i, last: e });
                }
                warn!(error = %e, "reload between navigation attempts failed");
            }
        }

        if strategy.clear_cookies
            && let Err(e) = page.clear_cookies().await
        {
            if e.is_fatal() {
                return Err(NavigationFailure { attempts: i, last: e });
            }
            warn!(error = %e, "could not clear cookies");
        }
        if let Err(e) = page.set_extra_headers(&strategy.extra_headers).await {
            if e.is_fatal() {
                return Err(NavigationFailure { attempts: i, last: e });
            }
            warn!(error = %e, "could not set request headers");
        }

        let result = match tokio::time::timeout(
            strategy.timeout + TIMEOUT_GRACE,
            page.navigate(url, strategy.wait_until, strategy.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PageError::Timeout(format!(
                "navigation exceeded {}s",
                strategy.timeout.as_secs()
            ))),
        };

        match result {
            Ok(()) => {
                info!(url, attempt, "navigated");
                return Ok(attempt);
            }
            Err(e) if e.is_fatal() => return Err(NavigationFailure { attempts: attempt, last: e }),
            Err(e) => {
                warn!(url, attempt, error = %e, "navigation attempt failed");
                last = e;
            }
        }
    }

    Err(NavigationFailure {
        attempts: policy.strategies.len(),
        last,
    })
}
