//! Collective error reporting
//!
//! Ranks run independently, so a rank that fails and returns early would leave the others
//! waiting in the next collective operation. Errors are therefore recorded locally first; at a
//! check point every rank takes part in gathering all reports and, if any rank reported
//! anything, every rank returns the same aggregated error.

use crate::traits::Communicator;
use crate::types::{Error, Result};
use log::warn;

/// Local error record for a collective check
#[derive(Debug, Default, Clone)]
pub struct ErrorCollector {
    messages: Vec<String>,
}

impl ErrorCollector {
    /// Create a collector without errors
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn set_error(&mut self, error: Error) {
        self.messages.push(error.to_string());
    }

    /// Record an error message
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Record the error of a result, if any, and return its value otherwise
    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.set_error(e);
                None
            }
        }
    }

    /// Has this rank recorded an error?
    pub fn has_local_error(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Gather the reports of all ranks. Must be called by every rank of `comm`.
    pub fn check(self, comm: &dyn Communicator) -> Result<()> {
        let local = self.messages.join("; ");
        if self.has_local_error() {
            warn!("rank {}: {local}", comm.rank());
        }
        let reports = comm
            .all_gather_string(&local)?
            .into_iter()
            .enumerate()
            .filter(|(_, m)| !m.is_empty())
            .map(|(rank, m)| format!("rank {rank}: {m}"))
            .collect::<Vec<_>>();
        if reports.is_empty() {
            Ok(())
        } else {
            Err(Error::Collective(reports.join("\n")))
        }
    }
}
