//! Cooperative time budget for tool runs.
//!
//! A tool on the blocking pool cannot be cancelled from outside, so the long
//! loops (hole walking, intersection candidates, topology checks) poll a
//! `Deadline` and bail out themselves once it has passed.

use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("time budget of {budget_ms} ms exhausted")]
pub struct DeadlineExceeded {
    pub budget_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    expires: Option<Instant>,
    budget_ms: u64,
}

impl Deadline {
    /// A deadline that never passes.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now().checked_add(budget),
            budget_ms: budget.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }

    pub fn is_expired(&self) -> bool {
        self.expires.map_or(false, |at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        if self.is_expired() {
            return Err(DeadlineExceeded {
                budget_ms: self.budget_ms,
            });
        }
        Ok(())
    }

    /// `check` on every 64th step only; for tight inner loops.
    pub fn check_every(&self, step: usize) -> Result<(), DeadlineExceeded> {
        if step % 64 == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}
