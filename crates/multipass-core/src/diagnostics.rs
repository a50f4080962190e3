//! Diagnostic sink: where driver notifications, uniform warnings and fatal
//! allocation reports end up.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

/// Buffer-info notification emitted on every buffer upload by some drivers.
/// Pure noise for this renderer.
pub const NOISY_BUFFER_INFO_ID: u32 = 131185;

/// Id attached to [`crate::error::UniformBindingWarning`] reports.
pub const UNIFORM_BINDING_WARNING_ID: u32 = 1;

/// Id attached to fatal allocation reports.
pub const TARGET_ALLOCATION_ERROR_ID: u32 = 2;

/// Id attached to the build-time stale-read notice.
pub const STALE_READ_NOTICE_ID: u32 = 3;

/// Id attached to non-fatal callback errors the host recovered from.
pub const RECOVERED_ERROR_ID: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Notification,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn log_level(self) -> log::Level {
        match self {
            Severity::Notification => log::Level::Debug,
            Severity::Low => log::Level::Info,
            Severity::Medium => log::Level::Warn,
            Severity::High => log::Level::Error,
        }
    }
}

/// Where a diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSource {
    /// The graphics API / driver.
    Api,
    ShaderCompiler,
    /// Pass pipeline (uniform binding, structural notices).
    Pipeline,
    /// Render target pool.
    Allocation,
    Other,
}

impl fmt::Display for DiagnosticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            DiagnosticSource::Api => "api",
            DiagnosticSource::ShaderCompiler => "shader-compiler",
            DiagnosticSource::Pipeline => "pipeline",
            DiagnosticSource::Allocation => "allocation",
            DiagnosticSource::Other => "other",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub source: DiagnosticSource,
    pub id: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        source: DiagnosticSource,
        id: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            source,
            id,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?} source={} id={}] {}",
            self.severity, self.source, self.id, self.message
        )
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives diagnostics. Shared between the render thread and the GPU
/// driver's error callback, hence `Send + Sync` and `&self`.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn report(&self, diagnostic: &Diagnostic) {
        self(diagnostic)
    }
}

/// Forwards every diagnostic to the `log` facade at a severity-mapped level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: &Diagnostic) {
        log::log!(target: "multipass::diagnostics", diagnostic.severity.log_level(), "{diagnostic}");
    }
}

/// Drops diagnostics whose id is on an ignore list before they reach `inner`.
#[derive(Debug)]
pub struct FilteredSink<S> {
    inner: S,
    ignored: HashSet<u32>,
}

impl<S: DiagnosticSink> FilteredSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ignored: HashSet::new(),
        }
    }

    /// `inner` wrapped with the known-benign driver ids already ignored.
    pub fn with_default_filters(inner: S) -> Self {
        Self::new(inner).ignore(NOISY_BUFFER_INFO_ID)
    }

    pub fn ignore(mut self, id: u32) -> Self {
        self.ignored.insert(id);
        self
    }

    pub fn is_ignored(&self, id: u32) -> bool {
        self.ignored.contains(&id)
    }
}

impl<S: DiagnosticSink> DiagnosticSink for FilteredSink<S> {
    fn report(&self, diagnostic: &Diagnostic) {
        if self.is_ignored(diagnostic.id) {
            return;
        }
        self.inner.report(diagnostic);
    }
}

/// Keeps every diagnostic in memory. Used by tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn count_with_id(&self, id: u32) -> usize {
        self.entries().iter().filter(|d| d.id == id).count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(diagnostic.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn driver_note(id: u32) -> Diagnostic {
        Diagnostic::new(Severity::Notification, DiagnosticSource::Api, id, "buffer info")
    }

    #[test]
    fn default_filter_drops_buffer_info_noise() {
        let collected = Arc::new(CollectingSink::new());
        let inner = Arc::clone(&collected);
        let sink = FilteredSink::with_default_filters(move |d: &Diagnostic| inner.report(d));

        sink.report(&driver_note(NOISY_BUFFER_INFO_ID));
        sink.report(&driver_note(131218));

        let entries = collected.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 131218);
    }

    #[test]
    fn closures_are_sinks() {
        let hits = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&hits);
        let sink = move |_: &Diagnostic| {
            *counter.lock().unwrap() += 1;
        };

        sink.report(&driver_note(7));
        sink.report(&driver_note(8));
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn severity_maps_to_log_levels() {
        assert_eq!(Severity::High.log_level(), log::Level::Error);
        assert_eq!(Severity::Medium.log_level(), log::Level::Warn);
        assert_eq!(Severity::Low.log_level(), log::Level::Info);
        assert_eq!(Severity::Notification.log_level(), log::Level::Debug);
    }

    #[test]
    fn display_carries_every_field() {
        let d = Diagnostic::new(Severity::Medium, DiagnosticSource::Pipeline, 1, "oops");
        assert_eq!(d.to_string(), "[Medium source=pipeline id=1] oops");
    }
}
