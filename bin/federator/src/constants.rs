use std::time::Duration;

pub(crate) const DEFAULT_THREAD_COUNT: u8 = 2;

pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Extension of candidate files written by the node loop.
pub(crate) const CANDIDATE_EXTENSION: &str = "candidate.json";
