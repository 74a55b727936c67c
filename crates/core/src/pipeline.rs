//! Document pipeline: parse, dispatch, substitute, serialize.
//! Each input document yields exactly one [`FileTranslationResult`], whatever
//! happens to its siblings.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::dispatch::{unique_texts, Dispatcher, TranslationMap};
use crate::limiter::SlotPool;
use crate::progress::Progress;
use crate::retry::{FallbackReason, RetryingTranslator};
use crate::srt::{self, SubtitleDocument};
use crate::translate::Translator;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, trace, warn};

/// Pacing between files. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub file_pause_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { file_pause_ms: 200 }
    }
}

/// One raw, already decoded input document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub content: String,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Error,
}

/// A text that kept its original wording, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fallback {
    pub text: String,
    pub reason: FallbackReason,
}

/// Outcome of translating one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTranslationResult {
    pub filename: String,
    pub content: Option<String>,
    pub status: FileStatus,
    pub subtitle_count: usize,
    pub error: Option<String>,
    /// Distinct texts that were actually translated.
    pub translated: usize,
    pub fallbacks: Vec<Fallback>,
}

impl FileTranslationResult {
    fn success(
        filename: &str,
        content: String,
        subtitle_count: usize,
        translated: usize,
        fallbacks: Vec<Fallback>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            content: Some(content),
            status: FileStatus::Success,
            subtitle_count,
            error: None,
            translated,
            fallbacks,
        }
    }

    fn failure(filename: &str, subtitle_count: usize, error: String) -> Self {
        Self {
            filename: filename.to_string(),
            content: None,
            status: FileStatus::Error,
            subtitle_count,
            error: Some(error),
            translated: 0,
            fallbacks: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Success
    }
}

/// Replace every entry whose text was resolved. Blank entries are not keys
/// and stay as they are.
pub fn apply_translations(doc: &mut SubtitleDocument, translations: &TranslationMap) {
    for entry in &mut doc.entries {
        if let Some(t) = translations.get(&entry.text) {
            entry.text = t.text.clone();
        }
    }
}

/// Translates subtitle documents into one target language.
pub struct Pipeline<T> {
    dispatcher: Dispatcher<T>,
    target_language: String,
    config: PipelineConfig,
    cancel: CancelToken,
}

impl<T: Translator> Pipeline<T> {
    /// Build the slot pool, retry layer and dispatcher around `translator`.
    /// The pool is shared by every document this pipeline handles.
    pub fn new(translator: T, config: &EngineConfig, cancel: CancelToken) -> Self {
        let pool = SlotPool::new(config.limiter.clone());
        let retrying = RetryingTranslator::new(translator, pool, config.retry.clone());
        Self {
            dispatcher: Dispatcher::new(retrying, config.dispatch.clone()),
            target_language: config.target_language.clone(),
            config: config.pipeline.clone(),
            cancel,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    /// Translate one document. Parse errors and cancellation are reported in
    /// the result rather than returned.
    pub async fn translate_document(
        &self,
        raw: &str,
        filename: &str,
        progress: &dyn Progress,
    ) -> FileTranslationResult {
        trace!("translate_document filename={filename}");
        let mut doc = match srt::parse(raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("{filename}: {err}");
                progress.status(&format!("Error in {filename}: {err}"));
                return FileTranslationResult::failure(filename, 0, err.to_string());
            }
        };
        let total = doc.len();
        progress.status(&format!("Translating {filename} ({total} lines)"));
        let texts = unique_texts(&doc);
        if texts.is_empty() {
            info!("{filename}: nothing to translate");
            return FileTranslationResult::success(filename, srt::format(&doc), total, 0, Vec::new());
        }

        let report = self
            .dispatcher
            .dispatch(filename, &texts, &self.target_language, &self.cancel, progress)
            .await;
        if report.cancelled {
            let message = format!(
                "translation cancelled after {}/{} batches",
                report.completed_batches, report.batches
            );
            progress.status(&format!("Stopped {filename}: {message}"));
            return FileTranslationResult::failure(filename, total, message);
        }

        apply_translations(&mut doc, &report.translations);
        let fallbacks: Vec<Fallback> = texts
            .iter()
            .filter_map(|text| {
                let reason = report.translations.get(text)?.fallback_reason()?;
                Some(Fallback {
                    text: text.clone(),
                    reason: reason.clone(),
                })
            })
            .collect();
        let translated = texts.len() - fallbacks.len();
        if !fallbacks.is_empty() {
            warn!(
                "{filename}: {} of {} texts kept their original wording",
                fallbacks.len(),
                texts.len()
            );
        }
        info!("{filename}: translated {translated}/{} distinct texts", texts.len());
        progress.status(&format!("Finished {filename}"));
        FileTranslationResult::success(filename, srt::format(&doc), total, translated, fallbacks)
    }

    /// Translate documents one after another, in submission order.
    /// Always returns one result per document.
    pub async fn translate_collection(
        &self,
        documents: &[SourceDocument],
        progress: &dyn Progress,
    ) -> Vec<FileTranslationResult> {
        let total = documents.len();
        let mut results = Vec::with_capacity(total);
        for (i, doc) in documents.iter().enumerate() {
            if let Err(reason) = self.cancel.checkpoint() {
                results.push(FileTranslationResult::failure(
                    &doc.name,
                    0,
                    format!("{reason} before this file was started"),
                ));
                continue;
            }
            progress.overall(
                (i + 1) as f64 / total as f64,
                &format!("Translating file {}/{}: {}", i + 1, total, doc.name),
            );
            results.push(self.translate_document(&doc.content, &doc.name, progress).await);
            if i + 1 < total {
                sleep(Duration::from_millis(self.config.file_pause_ms)).await;
            }
        }
        results
    }
}
