//! Progress reporting.
//!
//! Purely informational: the callback is invoked synchronously and never
//! influences control flow.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportStage {
    Opening,
    Parsing,
    Accounts,
    Prices,
    Transactions,
    Complete,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Parsing => "parsing",
            Self::Accounts => "accounts",
            Self::Prices => "prices",
            Self::Transactions => "transactions",
            Self::Complete => "complete",
        }
    }
}

/// Progress event sent to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub stage: ImportStage,
    pub message: String,
    /// Units completed in this stage
    pub current: usize,
    /// Units expected in this stage, when known
    pub total: Option<usize>,
}

impl ImportProgress {
    pub fn percent(&self) -> Option<u32> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some(((self.current.min(total) * 100) / total) as u32),
            None => None,
        }
    }
}

/// Caller supplied progress callback
pub type ProgressCallback<'a> = &'a mut dyn FnMut(&ImportProgress);

/// Stage-aware wrapper around an optional callback
pub struct Reporter<'a> {
    callback: Option<ProgressCallback<'a>>,
    stage: ImportStage,
    current: usize,
    total: Option<usize>,
}

impl<'a> Reporter<'a> {
    pub fn new(callback: Option<ProgressCallback<'a>>) -> Self {
        Self {
            callback,
            stage: ImportStage::Opening,
            current: 0,
            total: None,
        }
    }

    /// Reporter that drops every event
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Enter a new stage and announce it
    pub fn stage(&mut self, stage: ImportStage, total: Option<usize>, message: &str) {
        self.stage = stage;
        self.current = 0;
        self.total = total;
        self.emit(message);
    }

    /// One unit of the current stage is done
    pub fn step(&mut self, message: &str) {
        self.current += 1;
        self.emit(message);
    }

    pub fn current(&self) -> usize {
        self.current
    }

    fn emit(&mut self, message: &str) {
        if let Some(callback) = self.callback.as_mut() {
            callback(&ImportProgress {
                stage: self.stage,
                message: message.to_string(),
                current: self.current,
                total: self.total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_counts_steps_per_stage() {
        let mut events = Vec::new();
        {
            let mut callback = |p: &ImportProgress| events.push(p.clone());
            let mut reporter = Reporter::new(Some(&mut callback));
            reporter.stage(ImportStage::Accounts, Some(2), "Creating accounts");
            reporter.step("Checking");
            reporter.step("Savings");
            reporter.stage(ImportStage::Complete, None, "Done");
        }

        assert_eq!(events.len(), 4);
        assert_eq!(events[2].current, 2);
        assert_eq!(events[2].percent(), Some(100));
        assert_eq!(events[3].stage, ImportStage::Complete);
        assert_eq!(events[3].current, 0);
        assert_eq!(events[3].percent(), None);
    }

    #[test]
    fn test_silent_reporter() {
        let mut reporter = Reporter::silent();
        reporter.step("ignored");
        assert_eq!(reporter.current(), 1);
    }
}
