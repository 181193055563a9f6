use std::fmt;
use std::time::Duration;

/// Why a run stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// No rule was eligible to fire.
    Exhausted,
    /// A Then block called `Complete()`.
    Completed,
}

/// Summary of a successful [`Engine::execute`](crate::Engine::execute) run.
#[derive(Debug, Clone)]
#[must_use]
pub struct ExecutionReport {
    cycles: u64,
    fired: Vec<String>,
    halt: HaltReason,
    duration: Duration,
}

impl ExecutionReport {
    pub(crate) fn new(cycles: u64, fired: Vec<String>, halt: HaltReason, duration: Duration) -> Self {
        Self {
            cycles,
            fired,
            halt,
            duration,
        }
    }

    /// Number of cycles in which a rule fired.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Names of the rules that fired, in firing order. A rule that fired
    /// several times appears several times.
    #[must_use]
    pub fn fired(&self) -> &[String] {
        &self.fired
    }

    #[must_use]
    pub fn halt(&self) -> HaltReason {
        self.halt
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycles: {}", self.cycles)?;
        write!(f, ", fired: [{}]", self.fired.join(", "))?;
        let halt = match self.halt {
            HaltReason::Exhausted => "exhausted",
            HaltReason::Completed => "completed",
        };
        write!(f, ", halt: {halt}")?;
        write!(f, ", duration: {:?}", self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_accessors() {
        let report = ExecutionReport::new(
            2,
            vec!["a".into(), "b".into()],
            HaltReason::Exhausted,
            Duration::from_nanos(500),
        );
        assert_eq!(report.cycles(), 2);
        assert_eq!(report.fired(), &["a", "b"]);
        assert_eq!(report.halt(), HaltReason::Exhausted);
        assert_eq!(report.duration(), Duration::from_nanos(500));
    }

    #[test]
    fn report_display() {
        let report = ExecutionReport::new(
            1,
            vec!["a".into()],
            HaltReason::Completed,
            Duration::from_nanos(100),
        );
        let s = report.to_string();
        assert!(s.contains("cycles: 1"));
        assert!(s.contains("fired: [a]"));
        assert!(s.contains("halt: completed"));
    }
}
