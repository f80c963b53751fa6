use std::time::{Duration, Instant};

use uuid::Uuid;

/// Per-request values passed by value down to the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// A fresh context whose deadline lies `timeout` from now.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Context with no deadline, for background work and tests.
    pub fn background() -> Self {
        Self::new(None)
    }
}
