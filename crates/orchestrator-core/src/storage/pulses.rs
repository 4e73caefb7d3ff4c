//! Pulse, preflight setup, and baseline persistence.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::data::{Baseline, DiagnosticSource, IssueType, Pulse, PulseStatus};

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PreflightSetup {
    pub workflow_id: String,
    pub session_id: String,
    pub status: PreflightStatus,
    pub created_at: chrono::DateTime<Utc>,
}

/// Repository contract for pulse execution state (spec.md §4.4).
pub trait PulseRepository: Send + Sync {
    fn create(&self, pulse: &Pulse) -> Result<()>;
    fn start_pulse(&self, id: &str, worktree_path: &str) -> Result<()>;
    fn complete_pulse(&self, id: &str) -> Result<()>;
    fn fail_pulse(&self, id: &str, reason: &str) -> Result<()>;
    fn stop_pulse(&self, id: &str) -> Result<()>;
    fn increment_rejection_count(&self, id: &str) -> Result<i64>;
    fn set_unresolved_issues(&self, id: &str, has_issues: bool) -> Result<()>;

    fn get_running_pulse(&self, workflow_id: &str) -> Result<Option<Pulse>>;
    fn get_pulses_for_workflow(&self, workflow_id: &str) -> Result<Vec<Pulse>>;
    /// Next pulse whose `depends_on` are all `succeeded`, ordered by planned index.
    fn get_next_proposed_pulse(&self, workflow_id: &str) -> Result<Option<Pulse>>;

    fn create_preflight_setup(&self, workflow_id: &str, session_id: &str) -> Result<()>;
    fn get_preflight_setup(&self, workflow_id: &str) -> Result<Option<PreflightSetup>>;
    fn complete_preflight(&self, workflow_id: &str) -> Result<()>;
    fn fail_preflight(&self, workflow_id: &str) -> Result<()>;

    fn record_baseline(&self, baseline: &Baseline) -> Result<()>;
    fn get_baselines(&self, workflow_id: &str) -> Result<Vec<Baseline>>;
    fn count_baselines(&self, workflow_id: &str) -> Result<i64>;
    /// Whether a diagnostic matches a recorded baseline entry for this workflow.
    fn matches_baseline(
        &self,
        workflow_id: &str,
        issue_type: IssueType,
        source: DiagnosticSource,
        file_path: &str,
        message: &str,
    ) -> Result<bool>;
}

pub struct SqlitePulseRepository {
    db: Database,
}

impl SqlitePulseRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_pulse(row: &rusqlite::Row) -> rusqlite::Result<Pulse> {
        let status: String = row.get("status")?;
        let depends_on_json: String = row.get("depends_on")?;
        let created_at: String = row.get("created_at")?;
        let started_at: Option<String> = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;

        Ok(Pulse {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            planned_pulse_id: row.get("planned_pulse_id")?,
            planned_index: row.get("planned_index")?,
            status: parse_pulse_status(&status),
            description: row.get("description")?,
            depends_on: serde_json::from_str(&depends_on_json).unwrap_or_default(),
            has_unresolved_issues: row.get::<_, i64>("has_unresolved_issues")? != 0,
            is_recovery_checkpoint: row.get::<_, i64>("is_recovery_checkpoint")? != 0,
            rejection_count: row.get("rejection_count")?,
            failure_reason: row.get("failure_reason")?,
            worktree_path: row.get("worktree_path")?,
            created_at: parse_time(&created_at),
            started_at: started_at.map(|s| parse_time(&s)),
            completed_at: completed_at.map(|s| parse_time(&s)),
        })
    }

    fn row_to_preflight(row: &rusqlite::Row) -> rusqlite::Result<PreflightSetup> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(PreflightSetup {
            workflow_id: row.get("workflow_id")?,
            session_id: row.get("session_id")?,
            status: match status.as_str() {
                "completed" => PreflightStatus::Completed,
                "failed" => PreflightStatus::Failed,
                _ => PreflightStatus::Running,
            },
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_baseline(row: &rusqlite::Row) -> rusqlite::Result<Baseline> {
        let issue_type: String = row.get("issue_type")?;
        let source: String = row.get("source")?;
        Ok(Baseline {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            issue_type: if issue_type == "warning" {
                IssueType::Warning
            } else {
                IssueType::Error
            },
            source: parse_source(&source),
            pattern: row.get("pattern")?,
            file_path: row.get("file_path")?,
            description: row.get("description")?,
        })
    }
}

fn parse_time(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_pulse_status(s: &str) -> PulseStatus {
    match s {
        "running" => PulseStatus::Running,
        "succeeded" => PulseStatus::Succeeded,
        "failed" => PulseStatus::Failed,
        "stopped" => PulseStatus::Stopped,
        _ => PulseStatus::Proposed,
    }
}

fn pulse_status_str(s: PulseStatus) -> &'static str {
    match s {
        PulseStatus::Proposed => "proposed",
        PulseStatus::Running => "running",
        PulseStatus::Succeeded => "succeeded",
        PulseStatus::Failed => "failed",
        PulseStatus::Stopped => "stopped",
    }
}

fn parse_source(s: &str) -> DiagnosticSource {
    match s {
        "lint" => DiagnosticSource::Lint,
        "test" => DiagnosticSource::Test,
        _ => DiagnosticSource::Build,
    }
}

fn source_str(s: DiagnosticSource) -> &'static str {
    match s {
        DiagnosticSource::Build => "build",
        DiagnosticSource::Lint => "lint",
        DiagnosticSource::Test => "test",
    }
}

fn issue_type_str(t: IssueType) -> &'static str {
    match t {
        IssueType::Error => "error",
        IssueType::Warning => "warning",
    }
}

impl PulseRepository for SqlitePulseRepository {
    fn create(&self, pulse: &Pulse) -> Result<()> {
        let depends_on_json = serde_json::to_string(&pulse.depends_on)?;
        self.db.conn().execute(
            "INSERT INTO pulses (id, workflow_id, planned_pulse_id, planned_index, status, description,
                depends_on, has_unresolved_issues, is_recovery_checkpoint, rejection_count, failure_reason,
                worktree_path, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL, NULL)",
            params![
                pulse.id,
                pulse.workflow_id,
                pulse.planned_pulse_id,
                pulse.planned_index,
                pulse_status_str(pulse.status),
                pulse.description,
                depends_on_json,
                pulse.has_unresolved_issues as i64,
                pulse.is_recovery_checkpoint as i64,
                pulse.rejection_count,
                pulse.failure_reason,
                pulse.worktree_path,
                pulse.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn start_pulse(&self, id: &str, worktree_path: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE pulses SET status = 'running', worktree_path = ?1, started_at = ?2 WHERE id = ?3",
            params![worktree_path, now, id],
        )?;
        Ok(())
    }

    fn complete_pulse(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE pulses SET status = 'succeeded', completed_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    fn fail_pulse(&self, id: &str, reason: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE pulses SET status = 'failed', failure_reason = ?1, completed_at = ?2 WHERE id = ?3",
            params![reason, now, id],
        )?;
        Ok(())
    }

    fn stop_pulse(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE pulses SET status = 'stopped', completed_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    fn increment_rejection_count(&self, id: &str) -> Result<i64> {
        self.db.conn().execute(
            "UPDATE pulses SET rejection_count = rejection_count + 1 WHERE id = ?1",
            params![id],
        )?;
        self.db
            .conn()
            .query_row(
                "SELECT rejection_count FROM pulses WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("reading back rejection count")
    }

    fn set_unresolved_issues(&self, id: &str, has_issues: bool) -> Result<()> {
        self.db.conn().execute(
            "UPDATE pulses SET has_unresolved_issues = ?1 WHERE id = ?2",
            params![has_issues as i64, id],
        )?;
        Ok(())
    }

    fn get_running_pulse(&self, workflow_id: &str) -> Result<Option<Pulse>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM pulses WHERE workflow_id = ?1 AND status = 'running' LIMIT 1",
                params![workflow_id],
                Self::row_to_pulse,
            )
            .optional()
            .context("querying running pulse")
    }

    fn get_pulses_for_workflow(&self, workflow_id: &str) -> Result<Vec<Pulse>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM pulses WHERE workflow_id = ?1 ORDER BY planned_index ASC",
        )?;
        let pulses = stmt
            .query_map(params![workflow_id], Self::row_to_pulse)?
            .collect::<rusqlite::Result<_>>()
            .context("loading pulses")?;
        Ok(pulses)
    }

    fn get_next_proposed_pulse(&self, workflow_id: &str) -> Result<Option<Pulse>> {
        let all = self.get_pulses_for_workflow(workflow_id)?;
        let succeeded: std::collections::HashSet<&str> = all
            .iter()
            .filter(|p| p.status == PulseStatus::Succeeded)
            .map(|p| p.planned_pulse_id.as_str())
            .collect();

        Ok(all
            .iter()
            .filter(|p| p.status == PulseStatus::Proposed)
            .find(|p| p.depends_on.iter().all(|dep| succeeded.contains(dep.as_str())))
            .cloned())
    }

    fn create_preflight_setup(&self, workflow_id: &str, session_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "INSERT INTO preflight_setups (workflow_id, session_id, status, created_at)
             VALUES (?1, ?2, 'running', ?3)
             ON CONFLICT(workflow_id) DO UPDATE SET session_id = excluded.session_id, status = 'running'",
            params![workflow_id, session_id, now],
        )?;
        Ok(())
    }

    fn get_preflight_setup(&self, workflow_id: &str) -> Result<Option<PreflightSetup>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM preflight_setups WHERE workflow_id = ?1",
                params![workflow_id],
                Self::row_to_preflight,
            )
            .optional()
            .context("querying preflight setup")
    }

    fn complete_preflight(&self, workflow_id: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE preflight_setups SET status = 'completed' WHERE workflow_id = ?1",
            params![workflow_id],
        )?;
        Ok(())
    }

    fn fail_preflight(&self, workflow_id: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE preflight_setups SET status = 'failed' WHERE workflow_id = ?1",
            params![workflow_id],
        )?;
        Ok(())
    }

    fn record_baseline(&self, baseline: &Baseline) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO baselines (id, workflow_id, issue_type, source, pattern, file_path, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                baseline.id,
                baseline.workflow_id,
                issue_type_str(baseline.issue_type),
                source_str(baseline.source),
                baseline.pattern,
                baseline.file_path,
                baseline.description,
            ],
        )?;
        Ok(())
    }

    fn get_baselines(&self, workflow_id: &str) -> Result<Vec<Baseline>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT * FROM baselines WHERE workflow_id = ?1")?;
        let baselines = stmt
            .query_map(params![workflow_id], Self::row_to_baseline)?
            .collect::<rusqlite::Result<_>>()
            .context("loading baselines")?;
        Ok(baselines)
    }

    fn count_baselines(&self, workflow_id: &str) -> Result<i64> {
        self.db.conn().query_row(
            "SELECT count(*) FROM baselines WHERE workflow_id = ?1",
            params![workflow_id],
            |row| row.get(0),
        ).context("counting baselines")
    }

    fn matches_baseline(
        &self,
        workflow_id: &str,
        issue_type: IssueType,
        source: DiagnosticSource,
        file_path: &str,
        message: &str,
    ) -> Result<bool> {
        let baselines = self.get_baselines(workflow_id)?;
        Ok(baselines.iter().any(|b| {
            b.issue_type == issue_type
                && b.source == source
                && b.file_path.as_deref().map_or(true, |bp| glob_matches(bp, file_path))
                && glob_matches(&b.pattern, message)
        }))
    }
}

/// Minimal glob matcher supporting `*` (any run of characters) and `?`
/// (single character), anchored to the whole string — enough for baseline
/// file-path and message patterns without pulling a regex for every call.
fn glob_matches(pattern: &str, text: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(text),
        Err(_) => pattern == text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SqlitePulseRepository {
        SqlitePulseRepository::new(Database::open_in_memory().unwrap())
    }

    fn make_pulse(id: &str, workflow_id: &str, index: i64, depends_on: Vec<String>) -> Pulse {
        Pulse {
            id: id.to_string(),
            workflow_id: workflow_id.to_string(),
            planned_pulse_id: id.to_string(),
            planned_index: index,
            status: PulseStatus::Proposed,
            description: "desc".to_string(),
            depends_on,
            has_unresolved_issues: false,
            is_recovery_checkpoint: false,
            rejection_count: 0,
            failure_reason: None,
            worktree_path: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn next_proposed_pulse_respects_dependency_dag() {
        let repo = repo();
        let p0 = make_pulse("p0", "wf-1", 0, vec![]);
        let p1 = make_pulse("p1", "wf-1", 1, vec!["p0".to_string()]);
        repo.create(&p1).unwrap();
        repo.create(&p0).unwrap();

        let next = repo.get_next_proposed_pulse("wf-1").unwrap().unwrap();
        assert_eq!(next.id, "p0");

        repo.start_pulse("p0", "/tmp/wt-p0").unwrap();
        repo.complete_pulse("p0").unwrap();

        let next = repo.get_next_proposed_pulse("wf-1").unwrap().unwrap();
        assert_eq!(next.id, "p1");
    }

    #[test]
    fn only_one_running_pulse_is_visible() {
        let repo = repo();
        let p0 = make_pulse("p0", "wf-1", 0, vec![]);
        repo.create(&p0).unwrap();
        assert!(repo.get_running_pulse("wf-1").unwrap().is_none());

        repo.start_pulse("p0", "/tmp/wt-p0").unwrap();
        let running = repo.get_running_pulse("wf-1").unwrap().unwrap();
        assert_eq!(running.id, "p0");
    }

    #[test]
    fn rejection_count_increments() {
        let repo = repo();
        let p0 = make_pulse("p0", "wf-1", 0, vec![]);
        repo.create(&p0).unwrap();
        assert_eq!(repo.increment_rejection_count("p0").unwrap(), 1);
        assert_eq!(repo.increment_rejection_count("p0").unwrap(), 2);
    }

    #[test]
    fn baseline_match_respects_file_and_pattern_globs() {
        let repo = repo();
        repo.record_baseline(&Baseline {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: "wf-1".to_string(),
            issue_type: IssueType::Warning,
            source: DiagnosticSource::Lint,
            pattern: "unused import*".to_string(),
            file_path: Some("src/*.rs".to_string()),
            description: None,
        })
        .unwrap();

        assert!(repo
            .matches_baseline(
                "wf-1",
                IssueType::Warning,
                DiagnosticSource::Lint,
                "src/lib.rs",
                "unused import: foo"
            )
            .unwrap());

        assert!(!repo
            .matches_baseline(
                "wf-1",
                IssueType::Warning,
                DiagnosticSource::Lint,
                "tests/it.rs",
                "unused import: foo"
            )
            .unwrap());

        assert!(!repo
            .matches_baseline(
                "wf-1",
                IssueType::Error,
                DiagnosticSource::Lint,
                "src/lib.rs",
                "unused import: foo"
            )
            .unwrap());
    }

    #[test]
    fn preflight_setup_tracks_completion() {
        let repo = repo();
        repo.create_preflight_setup("wf-1", "sess-1").unwrap();
        repo.complete_preflight("wf-1").unwrap();
        let setup = repo.get_preflight_setup("wf-1").unwrap().unwrap();
        assert_eq!(setup.status, PreflightStatus::Completed);
    }
}
