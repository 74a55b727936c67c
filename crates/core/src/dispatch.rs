//! Batch dispatching of the distinct texts of one document.
//!
//! Texts are split into fixed-size batches. Small batches are translated
//! concurrently, larger ones one text at a time, with a short pause between
//! batches so the provider sees a smooth request rate.

use crate::cancel::CancelToken;
use crate::progress::Progress;
use crate::retry::{RetryingTranslator, Translation};
use crate::srt::SubtitleDocument;
use crate::translate::Translator;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Default number of distinct texts translated per batch.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Source text to its resolution. Keys are exact, unnormalised texts.
pub type TranslationMap = HashMap<String, Translation>;

/// Batching policy. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub batch_size: usize,
    /// Batches no larger than this run concurrently; larger ones run sequentially.
    pub concurrent_threshold: usize,
    /// Pause between two batches.
    pub batch_pause_ms: u64,
    /// Pause between two texts of a sequential batch.
    pub sequential_pause_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent_threshold: 10,
            batch_pause_ms: 100,
            sequential_pause_ms: 50,
        }
    }
}

/// Outcome of dispatching one document's texts.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub translations: TranslationMap,
    pub batches: usize,
    pub completed_batches: usize,
    pub cancelled: bool,
}

/// Distinct translatable texts of `doc`, in order of first appearance.
pub fn unique_texts(doc: &SubtitleDocument) -> Vec<String> {
    let mut seen = HashSet::new();
    doc.entries
        .iter()
        .filter(|e| e.is_translatable())
        .filter(|e| seen.insert(e.text.as_str()))
        .map(|e| e.text.clone())
        .collect()
}

/// Splits texts into batches and resolves each through a [`RetryingTranslator`].
pub struct Dispatcher<T> {
    translator: RetryingTranslator<T>,
    config: DispatchConfig,
}

impl<T: Translator> Dispatcher<T> {
    pub fn new(translator: RetryingTranslator<T>, config: DispatchConfig) -> Self {
        Self { translator, config }
    }

    pub fn translator(&self) -> &RetryingTranslator<T> {
        &self.translator
    }

    /// Resolve every text in `texts`. `label` prefixes progress messages.
    /// Cancellation is honoured between batches; the report says whether the
    /// run was cut short.
    pub async fn dispatch(
        &self,
        label: &str,
        texts: &[String],
        target_language: &str,
        cancel: &CancelToken,
        progress: &dyn Progress,
    ) -> DispatchReport {
        let batch_size = self.config.batch_size.max(1);
        let mut report = DispatchReport {
            batches: texts.len().div_ceil(batch_size),
            ..DispatchReport::default()
        };
        for (i, batch) in texts.chunks(batch_size).enumerate() {
            if let Err(reason) = cancel.checkpoint() {
                info!("{label}: stopping before batch {}: {reason}", i + 1);
                report.cancelled = true;
                break;
            }
            progress.status(&format!(
                "{label}: batch {}/{} ({} lines)",
                i + 1,
                report.batches,
                batch.len()
            ));
            let resolved = if batch.len() <= self.config.concurrent_threshold {
                debug!("batch {} runs concurrently", i + 1);
                self.run_concurrent(batch, target_language, cancel).await
            } else {
                debug!("batch {} runs sequentially", i + 1);
                self.run_sequential(batch, target_language, cancel).await
            };
            for (text, translation) in resolved {
                report.translations.entry(text).or_insert(translation);
            }
            report.completed_batches += 1;
            if i + 1 < report.batches {
                sleep(Duration::from_millis(self.config.batch_pause_ms)).await;
            }
        }
        report
    }

    /// One worker per text; all workers finish before the map is returned.
    async fn run_concurrent(
        &self,
        batch: &[String],
        target_language: &str,
        cancel: &CancelToken,
    ) -> TranslationMap {
        stream::iter(batch)
            .map(|text| self.resolve(text, target_language, cancel))
            .buffer_unordered(batch.len().max(1))
            .collect()
            .await
    }

    async fn run_sequential(
        &self,
        batch: &[String],
        target_language: &str,
        cancel: &CancelToken,
    ) -> TranslationMap {
        let mut out = TranslationMap::with_capacity(batch.len());
        for (i, text) in batch.iter().enumerate() {
            let (text, translation) = self.resolve(text, target_language, cancel).await;
            out.insert(text, translation);
            if i + 1 < batch.len() {
                sleep(Duration::from_millis(self.config.sequential_pause_ms)).await;
            }
        }
        out
    }

    async fn resolve(
        &self,
        text: &str,
        target_language: &str,
        cancel: &CancelToken,
    ) -> (String, Translation) {
        let translation = self
            .translator
            .translate_with_retry(text, target_language, cancel)
            .await;
        (text.to_string(), translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{LimiterConfig, SlotPool};
    use crate::progress::NoProgress;
    use crate::retry::{Outcome, RetryPolicy};
    use crate::srt;
    use crate::translate::ProviderError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Prefixes every text and records the calls it received.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Translator for Recorder {
        /// Record the call, hold it open briefly and prefix the text.
        async fn translate_once(&self, text: &str, lang: &str) -> Result<String, ProviderError> {
            self.calls.lock().push(text.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(500)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("{lang}:{text}"))
        }
    }

    fn dispatcher(config: DispatchConfig) -> Dispatcher<Recorder> {
        let retrying = RetryingTranslator::new(
            Recorder::default(),
            SlotPool::new(LimiterConfig::default()),
            RetryPolicy::default(),
        );
        Dispatcher::new(retrying, config)
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn unique_texts_skip_blanks_and_duplicates() {
        let doc = srt::parse(
            "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n\
             2\n00:00:02,000 --> 00:00:03,000\n\n\n\
             3\n00:00:03,000 --> 00:00:04,000\nWorld\n\n\
             4\n00:00:04,000 --> 00:00:05,000\nHello\n\n",
        )
        .unwrap();
        assert_eq!(unique_texts(&doc), vec!["Hello", "World"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_every_text_once() {
        let d = dispatcher(DispatchConfig::default());
        let input = texts(30);
        let report = d
            .dispatch("f.srt", &input, "vi", &CancelToken::new(), &NoProgress)
            .await;
        assert_eq!(report.batches, 2);
        assert_eq!(report.completed_batches, 2);
        assert!(!report.cancelled);
        assert_eq!(report.translations.len(), 30);
        for text in &input {
            let t = &report.translations[text];
            assert_eq!(t.text, format!("vi:{text}"));
            assert_eq!(t.outcome, Outcome::Translated { attempts: 1 });
        }
        let mut calls = d.translator().port_calls();
        calls.sort();
        let mut expected = input.clone();
        expected.sort();
        assert_eq!(calls, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn small_batches_run_concurrently_and_large_ones_do_not() {
        let small = dispatcher(DispatchConfig::default());
        small
            .dispatch("f", &texts(6), "vi", &CancelToken::new(), &NoProgress)
            .await;
        assert!(small.translator().max_in_flight() > 1);

        let large = dispatcher(DispatchConfig::default());
        large
            .dispatch("f", &texts(12), "vi", &CancelToken::new(), &NoProgress)
            .await;
        assert_eq!(large.translator().max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn both_modes_agree() {
        let input = texts(8);
        let concurrent = dispatcher(DispatchConfig::default())
            .dispatch("f", &input, "vi", &CancelToken::new(), &NoProgress)
            .await;
        let sequential = dispatcher(DispatchConfig {
            concurrent_threshold: 0,
            ..DispatchConfig::default()
        })
        .dispatch("f", &input, "vi", &CancelToken::new(), &NoProgress)
        .await;
        assert_eq!(concurrent.translations, sequential.translations);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_next_batch() {
        struct CancelOnFirstBatch(CancelToken, Mutex<Vec<String>>);
        impl Progress for CancelOnFirstBatch {
            fn status(&self, message: &str) {
                self.1.lock().push(message.to_string());
                self.0.cancel();
            }
            fn overall(&self, _fraction: f64, _message: &str) {}
        }

        let cancel = CancelToken::new();
        let progress = CancelOnFirstBatch(cancel.clone(), Mutex::new(Vec::new()));
        let d = dispatcher(DispatchConfig {
            batch_size: 2,
            ..DispatchConfig::default()
        });
        let report = d.dispatch("f", &texts(6), "vi", &cancel, &progress).await;
        assert!(report.cancelled);
        assert_eq!(report.batches, 3);
        assert_eq!(report.completed_batches, 1);
        assert_eq!(*progress.1.lock(), vec!["f: batch 1/3 (2 lines)".to_string()]);
        assert!(d.translator().port_calls().is_empty());
    }

    impl RetryingTranslator<Recorder> {
        fn port_calls(&self) -> Vec<String> {
            self.port().calls.lock().clone()
        }

        fn max_in_flight(&self) -> usize {
            self.port().max_in_flight.load(Ordering::SeqCst)
        }
    }
}
