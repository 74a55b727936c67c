//! Progress reporting hooks for whatever drives the engine.

/// Receives human-readable progress from the translating task.
/// Both methods are called synchronously and never from two tasks at once.
pub trait Progress: Send + Sync {
    /// Per-file or per-batch status line.
    fn status(&self, message: &str);

    /// Overall completion in `[0, 1]` with a status line.
    fn overall(&self, fraction: f64, message: &str);
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn status(&self, _message: &str) {}

    fn overall(&self, _fraction: f64, _message: &str) {}
}
