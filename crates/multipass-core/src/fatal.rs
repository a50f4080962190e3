//! Process-exit policy for failures with no degraded mode.
//!
//! An incomplete render target means no frame can be trusted, so the process
//! exits. The short delay gives a console or an error window time to show
//! the report first.

use std::time::Duration;

use crate::diagnostics::{
    Diagnostic, DiagnosticSink, DiagnosticSource, Severity, RECOVERED_ERROR_ID,
    TARGET_ALLOCATION_ERROR_ID,
};
use crate::error::MultipassError;
use crate::lifecycle::LifecycleState;

pub const EXIT_DELAY: Duration = Duration::from_millis(250);
pub const EXIT_CODE: i32 = -1;

/// The `High` severity report sent before exiting.
pub fn fatal_diagnostic(err: &MultipassError) -> Diagnostic {
    let source = match err {
        MultipassError::TargetAllocation(_) => DiagnosticSource::Allocation,
        _ => DiagnosticSource::Other,
    };
    Diagnostic::new(Severity::High, source, TARGET_ALLOCATION_ERROR_ID, err.to_string())
}

/// What a host does after a lifecycle callback returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// [`terminate_after_delay`].
    ExitProcess,
    /// The renderer is `Terminated`; stop scheduling frames.
    StopRendering,
    /// Report through the sink and keep running.
    Continue,
}

/// Only allocation failures end the process. Anything else is reported and
/// rendering goes on while the renderer still accepts frames.
pub fn action_for(err: &MultipassError, state: LifecycleState) -> ErrorAction {
    if err.is_fatal() {
        ErrorAction::ExitProcess
    } else if state == LifecycleState::Terminated {
        ErrorAction::StopRendering
    } else {
        ErrorAction::Continue
    }
}

/// The `Medium` severity report for an error the host recovered from.
pub fn recovered_diagnostic(err: &MultipassError) -> Diagnostic {
    Diagnostic::new(
        Severity::Medium,
        DiagnosticSource::Pipeline,
        RECOVERED_ERROR_ID,
        err.to_string(),
    )
}

/// Reports `err`, waits [`EXIT_DELAY`], then exits with [`EXIT_CODE`].
pub fn terminate_after_delay(err: &MultipassError, sink: &dyn DiagnosticSink) -> ! {
    sink.report(&fatal_diagnostic(err));
    log::error!("fatal: {err}; exiting");
    std::thread::sleep(EXIT_DELAY);
    std::process::exit(EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, TargetAllocationError};

    #[test]
    fn allocation_failures_are_reported_as_high_allocation_diagnostics() {
        let err = MultipassError::from(TargetAllocationError {
            index: 0,
            width: 960,
            height: 540,
            source: BackendError::Incomplete("FramebufferIncompleteAttachment".into()),
        });
        let d = fatal_diagnostic(&err);
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.source, DiagnosticSource::Allocation);
        assert_eq!(d.id, TARGET_ALLOCATION_ERROR_ID);
        assert!(d.message.contains("render target 0"), "{}", d.message);
        assert!(d.message.contains("FramebufferIncompleteAttachment"), "{}", d.message);
    }

    #[test]
    fn only_allocation_failures_exit_the_process() {
        let alloc = MultipassError::from(TargetAllocationError {
            index: 1,
            width: 64,
            height: 64,
            source: BackendError::Incomplete("out of memory".into()),
        });
        assert_eq!(
            action_for(&alloc, LifecycleState::Terminated),
            ErrorAction::ExitProcess
        );

        let mismatch = MultipassError::PipelineMismatch {
            required: 3,
            available: 2,
        };
        assert_eq!(
            action_for(&mismatch, LifecycleState::Running),
            ErrorAction::Continue
        );

        let closed = MultipassError::InvalidState {
            operation: "on_frame",
            state: LifecycleState::Terminated,
        };
        assert_eq!(
            action_for(&closed, LifecycleState::Terminated),
            ErrorAction::StopRendering
        );
    }

    #[test]
    fn recovered_errors_are_medium_pipeline_diagnostics() {
        let err = MultipassError::PipelineMismatch {
            required: 3,
            available: 2,
        };
        let d = recovered_diagnostic(&err);
        assert_eq!(d.severity, Severity::Medium);
        assert_eq!(d.source, DiagnosticSource::Pipeline);
        assert_eq!(d.id, RECOVERED_ERROR_ID);
        assert_eq!(d.message, err.to_string());
    }
}
