//! Baseline entity: a pre-existing diagnostic recorded during preflight so
//! later verifications ignore it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSource {
    Build,
    Lint,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub id: String,
    pub workflow_id: String,
    pub issue_type: IssueType,
    pub source: DiagnosticSource,
    pub pattern: String,
    pub file_path: Option<String>,
    pub description: Option<String>,
}
