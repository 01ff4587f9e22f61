//! Tool output classification
//!
//! Flashing tools disagree about how they report failure. The native tool
//! uses exit codes, the scripted console frequently exits 0 after failing
//! and only says so in its output. Each backend pairs with a classifier
//! that turns a finished command into success or a categorized failure.

use crate::runner::CommandOutput;

/// Failure category, used to decide whether a retry makes sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No target on the wire, or the probe itself is missing
    Connection,
    /// Target answered but is locked against debug access
    Protected,
    /// The tool did not finish in time
    Timeout,
    /// Any other failure after connecting
    Other,
}

/// A classified failure with the output lines that explain it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// Category
    pub kind: FailureKind,
    /// Short explanation
    pub detail: String,
}

/// Phrases that mean the probe could not reach the target
const CONNECTION_PHRASES: &[&str] = &[
    "Cannot connect",
    "Could not connect",
    "Connection failed",
    "Failed to attach",
    "Unable to connect",
    "unable to connect",
    "No debuggers were discovered",
    "Error connecting DP",
    "open failed",
    "No J-Link found",
];

/// Phrases that mean debug access is locked
const PROTECTION_PHRASES: &[&str] = &[
    "readback protection",
    "read-back protection",
    "APPROTECT",
    "Device is protected",
    "Access protection is enabled",
];

/// Phrases the scripted console prints on failure
const CONSOLE_FAILURE_PHRASES: &[&str] = &[
    "Cannot connect",
    "Could not connect",
    "Connection failed",
    "Failed to attach",
    "Error occurred",
    "Error while",
    "FAILED",
];

/// Decides whether a finished command succeeded
pub trait OutputClassifier: Send + Sync {
    /// `Ok` on success, otherwise the classified failure
    fn classify(&self, out: &CommandOutput) -> Result<(), Classified>;
}

/// Categorize output text, defaulting to [`FailureKind::Other`]
pub fn failure_kind(text: &str) -> FailureKind {
    if PROTECTION_PHRASES.iter().any(|p| text.contains(p)) {
        FailureKind::Protected
    } else if CONNECTION_PHRASES.iter().any(|p| text.contains(p)) {
        FailureKind::Connection
    } else {
        FailureKind::Other
    }
}

fn first_matching_line<'a>(text: &'a str, phrases: &[&str]) -> Option<&'a str> {
    text.lines()
        .find(|line| phrases.iter().any(|p| line.contains(p)))
        .map(str::trim)
}

fn failure_detail(out: &CommandOutput) -> String {
    first_matching_line(&out.output, PROTECTION_PHRASES)
        .or_else(|| first_matching_line(&out.output, CONNECTION_PHRASES))
        .map(str::to_string)
        .unwrap_or_else(|| match out.code {
            Some(code) => format!("exit code {}: {}", code, out.tail(3)),
            None => format!("terminated by signal: {}", out.tail(3)),
        })
}

/// Success means exit code zero
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitCodeClassifier;

impl OutputClassifier for ExitCodeClassifier {
    fn classify(&self, out: &CommandOutput) -> Result<(), Classified> {
        if out.success() {
            return Ok(());
        }
        Err(Classified {
            kind: failure_kind(&out.output),
            detail: failure_detail(out),
        })
    }
}

/// Success means exit code zero and no failure phrase in the output
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleClassifier;

impl OutputClassifier for ConsoleClassifier {
    fn classify(&self, out: &CommandOutput) -> Result<(), Classified> {
        if let Some(line) = first_matching_line(&out.output, CONSOLE_FAILURE_PHRASES) {
            return Err(Classified {
                kind: failure_kind(&out.output),
                detail: line.to_string(),
            });
        }
        ExitCodeClassifier.classify(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_classifier() {
        assert!(ExitCodeClassifier.classify(&CommandOutput::ok("")).is_ok());

        let err = ExitCodeClassifier
            .classify(&CommandOutput::failed(33, "ERROR: Unable to connect to a debugger."))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Connection);
        assert_eq!(err.detail, "ERROR: Unable to connect to a debugger.");

        let err = ExitCodeClassifier
            .classify(&CommandOutput::failed(1, "line1\nsomething odd"))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Other);
        assert!(err.detail.starts_with("exit code 1"));
    }

    #[test]
    fn test_console_failure_despite_zero_exit() {
        let out = CommandOutput::ok("Connecting to J-Link...\nCannot connect to target.\n");
        let err = ConsoleClassifier.classify(&out).unwrap_err();
        assert_eq!(err.kind, FailureKind::Connection);
        assert_eq!(err.detail, "Cannot connect to target.");

        let out = CommandOutput::ok("Downloading file...\nProgramming FAILED\n");
        assert_eq!(
            ConsoleClassifier.classify(&out).unwrap_err().kind,
            FailureKind::Other
        );
    }

    #[test]
    fn test_console_success() {
        let out = CommandOutput::ok("O.K.\nScript processing completed.\n");
        assert!(ConsoleClassifier.classify(&out).is_ok());
        let out = CommandOutput::failed(1, "O.K.\n");
        assert!(ConsoleClassifier.classify(&out).is_err());
    }

    #[test]
    fn test_protection_wins_over_connection() {
        let text = "Could not connect\nDevice is protected by APPROTECT";
        assert_eq!(failure_kind(text), FailureKind::Protected);
    }
}
