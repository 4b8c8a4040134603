//! Status-coded diagnostics
//!
//! Every outcome of the pipeline is reported here with an HTTP-style status.
//! When debugging is off everything stays at `debug` level. When it is on,
//! 200/201 are logged at `info` and everything else is routed through the
//! configured [`FatalPolicy`].

use crate::context::{ContextStore, DiagnosticSettings, FatalPolicy};
use crate::error::Error;

/// How a diagnostic is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Quiet,
    Success,
    Failure,
    Fatal,
}

/// True for the status codes the ingestion endpoint uses for success.
pub fn is_success(status: u16) -> bool {
    status == 200 || status == 201
}

/// Decide how a diagnostic with `status` is surfaced under `settings`.
pub fn severity(settings: &DiagnosticSettings, status: u16) -> Severity {
    if !settings.debug {
        return Severity::Quiet;
    }
    if is_success(status) {
        return Severity::Success;
    }
    match settings.fatal_policy {
        FatalPolicy::None => Severity::Quiet,
        FatalPolicy::Log => Severity::Failure,
        FatalPolicy::Fatal => Severity::Fatal,
    }
}

/// Report a message with an explicit status.
pub fn report(ctx: &ContextStore, status: u16, message: &str) {
    let settings = ctx.diagnostic_settings();
    let testing = settings.environment.is_testing();

    match severity(&settings, status) {
        Severity::Quiet => tracing::debug!(status, testing, "{}", message),
        Severity::Success => tracing::info!(status, testing, "{}", message),
        Severity::Failure => tracing::warn!(status, testing, "{}", message),
        Severity::Fatal => {
            tracing::error!(status, testing, "{}", message);
            std::process::abort();
        }
    }
}

/// Report an error using its own status code.
pub fn report_error(ctx: &ContextStore, error: &Error) {
    report(ctx, error.status(), &error.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Environment;

    fn settings(debug: bool, fatal_policy: FatalPolicy) -> DiagnosticSettings {
        DiagnosticSettings {
            debug,
            fatal_policy,
            environment: Environment::Production,
        }
    }

    #[test]
    fn test_quiet_without_debug() {
        for policy in [FatalPolicy::None, FatalPolicy::Log, FatalPolicy::Fatal] {
            assert_eq!(severity(&settings(false, policy), 500), Severity::Quiet);
            assert_eq!(severity(&settings(false, policy), 200), Severity::Quiet);
        }
    }

    #[test]
    fn test_success_codes() {
        let s = settings(true, FatalPolicy::Fatal);
        assert_eq!(severity(&s, 200), Severity::Success);
        assert_eq!(severity(&s, 201), Severity::Success);
        assert_eq!(severity(&s, 204), Severity::Fatal);
    }

    #[test]
    fn test_policy_routing() {
        assert_eq!(severity(&settings(true, FatalPolicy::None), 401), Severity::Quiet);
        assert_eq!(severity(&settings(true, FatalPolicy::Log), 401), Severity::Failure);
        assert_eq!(severity(&settings(true, FatalPolicy::Fatal), 429), Severity::Fatal);
    }

    #[test]
    fn test_report_does_not_abort_under_log_policy() {
        let ctx = ContextStore::new();
        ctx.set_debug(true, FatalPolicy::Log);
        report_error(&ctx, &Error::Authorization);
        report(&ctx, 200, "Ingest Stored");
    }
}
