//! JSON run report
//!
//! The report is the only thing written to stdout, so callers can parse it
//! without filtering log lines.

use crate::error::Result;
use crate::executor::Outcome;
use crate::facts::FactSnapshot;
use crate::planner::Verb;
use serde::Serialize;

/// Facts as reported to the caller
#[derive(Debug, Serialize)]
pub struct ReportedFacts {
    #[serde(flatten)]
    pub snapshot: FactSnapshot,
    pub iocage_states: Vec<&'static str>,
}

impl From<FactSnapshot> for ReportedFacts {
    fn from(snapshot: FactSnapshot) -> Self {
        Self {
            snapshot,
            iocage_states: Verb::ALL.iter().map(Verb::as_str).collect(),
        }
    }
}

/// Successful run
#[derive(Debug, Serialize)]
pub struct Report {
    pub changed: bool,
    /// Messages joined with `, `
    pub msg: String,
    pub messages: Vec<String>,
    pub facts: ReportedFacts,
    pub stdout: String,
    pub stderr: String,
}

impl From<Outcome> for Report {
    fn from(outcome: Outcome) -> Self {
        Self {
            changed: outcome.changed,
            msg: outcome.messages.join(", "),
            messages: outcome.messages,
            facts: outcome.facts.into(),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        }
    }
}

impl Report {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Failed run
#[derive(Debug, Serialize)]
pub struct Failure {
    pub failed: bool,
    pub msg: String,
}

impl Failure {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            msg: msg.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_report_shape() {
        let outcome = Outcome {
            changed: true,
            messages: vec!["Jail 'www' started.\n".to_string(), "done".to_string()],
            stdout: "ok".to_string(),
            ..Default::default()
        };

        let json: Value = serde_json::from_str(&Report::from(outcome).to_json().unwrap()).unwrap();
        assert_eq!(json["changed"], true);
        assert_eq!(json["msg"], "Jail 'www' started.\n, done");
        assert_eq!(json["stdout"], "ok");
        assert!(json["facts"]["iocage_jails"].is_object());
        assert!(json["facts"]["iocage_releases"].is_array());
        assert_eq!(json["facts"]["iocage_states"].as_array().unwrap().len(), 15);
        assert_eq!(json["facts"]["iocage_states"][0], "absent");
    }

    #[test]
    fn test_failure_shape() {
        let json: Value = serde_json::from_str(&Failure::new("Jail 'x' doesn't exist.").to_json().unwrap()).unwrap();
        assert_eq!(json["failed"], true);
        assert_eq!(json["msg"], "Jail 'x' doesn't exist.");
    }
}
