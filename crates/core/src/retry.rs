//! Bounded retries around a single translation call.
//! A text that cannot be translated comes back unchanged, tagged with the
//! reason, instead of failing the caller.

use crate::cancel::CancelToken;
use crate::limiter::{AcquireError, SlotPool};
use crate::translate::{ProviderError, Translator};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// Retry budget and backoff ranges. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per text, the first one included.
    pub max_retries: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    /// Upper bound used instead of `backoff_max_ms` after a rate-limit signal.
    pub rate_limited_backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_min_ms: 200,
            backoff_max_ms: 800,
            rate_limited_backoff_max_ms: 1500,
        }
    }
}

impl RetryPolicy {
    /// Uniformly random pause before the next attempt.
    pub fn backoff(&self, rate_limited: bool) -> Duration {
        let max = if rate_limited {
            self.rate_limited_backoff_max_ms
        } else {
            self.backoff_max_ms
        };
        let ms = thread_rng().gen_range(self.backoff_min_ms..=max.max(self.backoff_min_ms));
        Duration::from_millis(ms)
    }
}

/// Why the original text was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    RetriesExhausted {
        attempts: u32,
        last_error: ProviderError,
    },
    PoolSaturated,
    Cancelled,
}

/// How a text was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Translated { attempts: u32 },
    Fallback(FallbackReason),
}

/// Result of resolving one source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub text: String,
    pub outcome: Outcome,
}

impl Translation {
    fn fallback(original: &str, reason: FallbackReason) -> Self {
        Self {
            text: original.to_string(),
            outcome: Outcome::Fallback(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback(_))
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match &self.outcome {
            Outcome::Fallback(reason) => Some(reason),
            Outcome::Translated { .. } => None,
        }
    }
}

/// Drives a [`Translator`] through the slot pool with retries and backoff.
pub struct RetryingTranslator<T> {
    port: T,
    pool: SlotPool,
    policy: RetryPolicy,
}

impl<T: Translator> RetryingTranslator<T> {
    pub fn new(port: T, pool: SlotPool, policy: RetryPolicy) -> Self {
        Self { port, pool, policy }
    }

    pub fn port(&self) -> &T {
        &self.port
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    /// Translate `text`, falling back to it unchanged once the attempts run out.
    pub async fn translate_with_retry(
        &self,
        text: &str,
        target_language: &str,
        cancel: &CancelToken,
    ) -> Translation {
        let attempts = self.policy.max_retries.max(1);
        let mut last_error = ProviderError::transient("no attempt made");
        for attempt in 1..=attempts {
            let lease = match self.pool.acquire(cancel).await {
                Ok(lease) => lease,
                Err(AcquireError::Cancelled(_)) => {
                    return Translation::fallback(text, FallbackReason::Cancelled)
                }
                Err(AcquireError::Saturated(waited)) => {
                    warn!("no slot free after {waited:?}, keeping original text");
                    return Translation::fallback(text, FallbackReason::PoolSaturated);
                }
            };
            trace!("attempt {attempt}/{attempts} on slot {}", lease.slot());
            match self.port.translate_once(text, target_language).await {
                Ok(translated) => {
                    lease.succeed();
                    return Translation {
                        text: translated,
                        outcome: Outcome::Translated { attempts: attempt },
                    };
                }
                Err(err) => {
                    let rate_limited = err.rate_limited;
                    if rate_limited {
                        warn!("slot {} rate limited: {}", lease.slot(), err);
                        lease.rate_limited();
                    } else {
                        debug!("attempt {attempt} failed: {err}");
                        lease.fail();
                    }
                    last_error = err;
                    if attempt < attempts {
                        sleep(self.policy.backoff(rate_limited)).await;
                    }
                }
            }
        }
        warn!("giving up after {attempts} attempts: {last_error}");
        Translation::fallback(
            text,
            FallbackReason::RetriesExhausted {
                attempts,
                last_error,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimiterConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retrying<T: Translator>(port: T) -> RetryingTranslator<T> {
        RetryingTranslator::new(
            port,
            SlotPool::new(LimiterConfig::default()),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn backoff_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let plain = policy.backoff(false);
            assert!(plain >= Duration::from_millis(200) && plain <= Duration::from_millis(800));
            let limited = policy.backoff(true);
            assert!(limited >= Duration::from_millis(200) && limited <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_after_exhausting_retries() {
        struct AlwaysFails {
            calls: AtomicU32,
        }
        #[async_trait]
        impl Translator for AlwaysFails {
            /// Fail every call with a transient error.
            async fn translate_once(&self, _text: &str, _lang: &str) -> Result<String, ProviderError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::transient("boom"))
            }
        }

        let tr = retrying(AlwaysFails {
            calls: AtomicU32::new(0),
        });
        let out = tr
            .translate_with_retry("Hello", "vi", &CancelToken::new())
            .await;
        assert_eq!(out.text, "Hello");
        assert_eq!(tr.port.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            out.fallback_reason(),
            Some(&FallbackReason::RetriesExhausted {
                attempts: 3,
                last_error: ProviderError::transient("boom"),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_rate_limit() {
        struct LimitedOnce {
            calls: AtomicU32,
        }
        #[async_trait]
        impl Translator for LimitedOnce {
            /// Report a rate limit first, then translate.
            async fn translate_once(&self, text: &str, _lang: &str) -> Result<String, ProviderError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::rate_limited("HTTP 429"))
                } else {
                    Ok(format!("vi:{text}"))
                }
            }
        }

        let tr = retrying(LimitedOnce {
            calls: AtomicU32::new(0),
        });
        let out = tr
            .translate_with_retry("Hello", "vi", &CancelToken::new())
            .await;
        assert_eq!(out.text, "vi:Hello");
        assert_eq!(out.outcome, Outcome::Translated { attempts: 2 });
        let slots = tr.pool().snapshot();
        assert_eq!(slots[0].request_count, 45);
        assert_eq!(slots[1].request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_keeps_original_text() {
        struct Echo;
        #[async_trait]
        impl Translator for Echo {
            /// Return the input untouched.
            async fn translate_once(&self, text: &str, _lang: &str) -> Result<String, ProviderError> {
                Ok(text.to_string())
            }
        }

        let cancel = CancelToken::new();
        cancel.cancel();
        let out = retrying(Echo).translate_with_retry("Hi", "vi", &cancel).await;
        assert_eq!(out.text, "Hi");
        assert_eq!(out.fallback_reason(), Some(&FallbackReason::Cancelled));
    }
}
