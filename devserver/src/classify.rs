//! Provision error classification
//!
//! Category labels are metric dimensions in lab monitoring. Do not reword
//! them, and keep the pattern order: the first match wins.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::DevServerError;

/// Marker of a devserver that could not serve a request
pub const PROXY_ERROR: &str = "Proxy Error";

/// Known provision failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    PortfileMissing,
    CopyFailed,
    CommandFailed,
    BuildFailedToBoot,
    AutoUpdateTimedOut,
    HostNotPingable,
    UnexpectedUpdateStatus,
    NonJsonResponse,
    SshConnectionLost,
    BrokenPipe,
    Unknown,
}

const PATTERNS: &[(&str, ErrorCategory)] = &[
    (r".*Devserver portfile does not exist!.*", ErrorCategory::PortfileMissing),
    (r".*Could not copy .* to device.*", ErrorCategory::CopyFailed),
    (
        r".*cwd=None, extra env=\{'LC_MESSAGES': 'C'\}.*",
        ErrorCategory::CommandFailed,
    ),
    (
        r".*RootfsUpdateError: Build .* failed to boot on.*",
        ErrorCategory::BuildFailedToBoot,
    ),
    (
        r".*The CrOS auto-update process is timed out, thus will be terminated.*",
        ErrorCategory::AutoUpdateTimedOut,
    ),
    (r".*DeviceNotPingableError.*", ErrorCategory::HostNotPingable),
    (
        r".*Update failed with unexpected update status: UPDATE_STATUS_IDLE.*",
        ErrorCategory::UnexpectedUpdateStatus,
    ),
    (r".*No JSON object could be decoded.*", ErrorCategory::NonJsonResponse),
    (
        r".*SSHConnectionError: .* port 22: Connection timed out.*",
        ErrorCategory::SshConnectionLost,
    ),
    (r".*Write failed: Broken pipe.*", ErrorCategory::BrokenPipe),
];

fn compiled() -> &'static [(Regex, ErrorCategory)] {
    static COMPILED: OnceLock<Vec<(Regex, ErrorCategory)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(pattern, category)| {
                // Whole-message match; `.` stops at line breaks.
                Regex::new(&format!(r"\A(?:{})\n?\z", pattern))
                    .ok()
                    .map(|re| (re, *category))
            })
            .collect()
    })
}

impl ErrorCategory {
    /// Classify a message. Never fails; unmatched text is [`ErrorCategory::Unknown`].
    pub fn classify(message: &str) -> Self {
        compiled()
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, category)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// Stable label reported to monitoring
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::PortfileMissing => "(1) Devserver portfile does not exist on host",
            ErrorCategory::CopyFailed => "(2) Cannot copy packages to host",
            ErrorCategory::CommandFailed => "(3) Fail to run specific command on host",
            ErrorCategory::BuildFailedToBoot => "(4) Build failed to boot on host",
            ErrorCategory::AutoUpdateTimedOut => "(5) Auto-update is timed out",
            ErrorCategory::HostNotPingable => "(6) Host is not pingable during auto-update",
            ErrorCategory::UnexpectedUpdateStatus => {
                "(7) Host has unexpected status: UPDATE_STATUS_IDLE after rootfs update"
            }
            ErrorCategory::NonJsonResponse => "(8) Devserver returned non-json object",
            ErrorCategory::SshConnectionLost => "(9) Devserver lost host's ssh connection",
            ErrorCategory::BrokenPipe => "(10) Broken pipe while writing or connecting to host",
            ErrorCategory::Unknown => "(0) Unknown exception",
        }
    }

    /// Error to surface for a failure of this category
    pub fn to_error(&self, message: String) -> DevServerError {
        match self {
            ErrorCategory::BuildFailedToBoot => DevServerError::BadBuild(message),
            _ => DevServerError::Devserver(message),
        }
    }
}

/// What the auto-update loop does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry against the same devserver
    SameHost,
    /// Stop and ask the caller to pick another devserver
    SwitchDevserver,
    /// Retry with the DUT's original stateful payload
    UseOriginalPayload,
}

impl RetryPolicy {
    fn for_message(message: &str) -> Self {
        if message.contains(PROXY_ERROR) || message.contains("is not pingable") {
            RetryPolicy::SwitchDevserver
        } else if message.contains("DevserverCannotStartError") {
            RetryPolicy::UseOriginalPayload
        } else {
            RetryPolicy::SameHost
        }
    }
}

/// A raw provision error with its classification, computed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    message: String,
    category: ErrorCategory,
    retry_policy: RetryPolicy,
}

impl ClassifiedError {
    /// Classify `error`. With `keep_full_trace` unset only the last line is
    /// categorized; the retry policy always looks at the whole text.
    pub fn new(error: &str, keep_full_trace: bool) -> Self {
        let message = if keep_full_trace {
            error.to_string()
        } else {
            error.rsplit('\n').next().unwrap_or_default().to_string()
        };
        Self {
            category: ErrorCategory::classify(&message),
            retry_policy: RetryPolicy::for_message(error),
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn classification(&self) -> &'static str {
        self.category.label()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// The message on one line
    pub fn summary(&self) -> String {
        self.message.lines().collect::<Vec<_>>().join(" ")
    }
}
