//! Pass / warn / fail checks collected during a run, and the final status line.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "pass"),
            CheckStatus::Warn => write!(f, "warn"),
            CheckStatus::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub checks: Vec<Check>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) {
        self.checks.push(Check {
            name: name.into(),
            status,
            detail: detail.into(),
        });
    }

    pub fn pass(&mut self, name: impl Into<String>, detail: impl Into<String>) {
        self.push(name, CheckStatus::Pass, detail);
    }

    pub fn warn(&mut self, name: impl Into<String>, detail: impl Into<String>) {
        self.push(name, CheckStatus::Warn, detail);
    }

    pub fn fail(&mut self, name: impl Into<String>, detail: impl Into<String>) {
        self.push(name, CheckStatus::Fail, detail);
    }

    pub fn extend(&mut self, other: Summary) {
        self.checks.extend(other.checks);
    }

    pub fn failed(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warnings(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Every check passed. A warning is a partial failure.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.warnings() == 0
    }

    /// `✅ All 7 checks passed`, `⚠️ 2 of 7 checks failed (1 warning)` or
    /// `⚠️ 6 of 7 checks passed (1 warning)`.
    pub fn status_line(&self) -> String {
        if self.is_success() {
            return format!("✅ All {} checks passed", self.checks.len());
        }
        let total = self.checks.len();
        let failed = self.failed();
        let mut line = if failed == 0 {
            format!("⚠️ {} of {total} checks passed", self.count(CheckStatus::Pass))
        } else {
            format!("⚠️ {failed} of {total} checks failed")
        };
        match self.warnings() {
            0 => {}
            1 => line.push_str(" (1 warning)"),
            n => line.push_str(&format!(" ({n} warnings)")),
        }
        line
    }
}
