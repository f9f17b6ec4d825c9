// Best-effort release bookkeeping
//
// Each release step runs even if an earlier one failed; failures are logged
// and collected so the caller can report them once everything is down.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub resource: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of releasing `resource`
    pub fn attempt<E: fmt::Display>(&mut self, resource: &'static str, result: Result<(), E>) {
        if let Err(e) = result {
            log::error!("[Chunk] Failed to release {}: {}", resource, e);
            self.failures.push(TeardownFailure { resource, message: e.to_string() });
        }
    }

    pub fn merge(&mut self, other: TeardownReport) {
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "all resources released");
        }
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.resource, failure.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_failures_in_order() {
        let mut report = TeardownReport::new();
        report.attempt::<String>("encoder", Ok(()));
        report.attempt("sink", Err("disk full"));
        report.attempt("camera", Err("gone"));

        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.to_string(), "sink: disk full; camera: gone");
    }
}
