//! Job identity and message metadata types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque ticket correlating a submission with its eventual response.
///
/// Handles are issued by the handle table from a monotonic ULID generator,
/// so they are unique for the lifetime of the process and sort in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub Ulid);

impl JobHandle {
    /// Parse a job handle from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a shared payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u64);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// Failure a worker is asked to simulate, used to exercise error paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorInjection {
    #[default]
    None,
    /// Report a domain exception.
    Exception,
    /// Report that the job ran out of memory.
    MemoryLimit,
    /// Never finish, so the execution timeout fires.
    Timeout,
    /// Panic inside the handler.
    Crash,
}

impl ErrorInjection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorInjection::None => "none",
            ErrorInjection::Exception => "exception",
            ErrorInjection::MemoryLimit => "memory_limit",
            ErrorInjection::Timeout => "timeout",
            ErrorInjection::Crash => "crash",
        }
    }
}

impl std::str::FromStr for ErrorInjection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(ErrorInjection::None),
            "exception" => Ok(ErrorInjection::Exception),
            "memory_limit" => Ok(ErrorInjection::MemoryLimit),
            "timeout" => Ok(ErrorInjection::Timeout),
            "crash" => Ok(ErrorInjection::Crash),
            other => Err(format!("unknown error injection mode: {other}")),
        }
    }
}

/// Convert a fractional-seconds timeout into a wait bound.
///
/// Negative (or NaN) values mean "wait indefinitely" and map to `None`.
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(secs.min(u32::MAX as f64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_timeout_waits_forever() {
        assert_eq!(timeout_from_secs(-1.0), None);
        assert_eq!(timeout_from_secs(f64::NAN), None);
        assert_eq!(timeout_from_secs(0.0), Some(Duration::ZERO));
        assert_eq!(timeout_from_secs(0.25), Some(Duration::from_millis(250)));
    }

    #[test]
    fn handle_round_trips_through_display() {
        let handle = JobHandle(Ulid::new());
        assert_eq!(JobHandle::parse(&handle.to_string()).ok(), Some(handle));
        assert!(JobHandle::parse("not-a-handle").is_err());
    }

    #[test]
    fn error_injection_parses_known_modes() {
        assert_eq!("".parse::<ErrorInjection>(), Ok(ErrorInjection::None));
        assert_eq!(
            "memory_limit".parse::<ErrorInjection>(),
            Ok(ErrorInjection::MemoryLimit)
        );
        assert!("sigsegv".parse::<ErrorInjection>().is_err());
    }
}
