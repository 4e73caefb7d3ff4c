//! Pulse orchestrator: the sub-pipeline that runs inside the `in_progress`
//! stage, turning an approved plan into a DAG of pulses and stepping
//! through them one at a time (spec.md §4.9).
//!
//! Grounded on the same repository-driven state-machine style as
//! `storage::workflows`/`storage::pulses`, which already hold every piece
//! of persisted state this orchestrator needs; this module is the
//! in-memory coordination layer above them plus the git worktree side
//! effects neither repository owns.

use std::sync::Arc;

use anyhow::Result;

use crate::data::{AgentRole, ContextType, Plan, Pulse, PulseDescriptor, PulseStatus};
use crate::error::MergeError;
use crate::events::{Event, EventBus, EventType};
use crate::git_worktree::GitWorktreeService;
use crate::storage::Repositories;

/// Outcome of completing the running pulse.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub has_more_pulses: bool,
}

pub struct PulseOrchestrator {
    repositories: Arc<Repositories>,
    git: Arc<GitWorktreeService>,
    event_bus: Arc<EventBus>,
}

impl PulseOrchestrator {
    pub fn new(repositories: Arc<Repositories>, git: Arc<GitWorktreeService>, event_bus: Arc<EventBus>) -> Self {
        Self { repositories, git, event_bus }
    }

    /// Expand an approved plan's pulse descriptors into persisted `Pulse`
    /// rows, preserving planned order and dependency edges.
    pub fn create_pulses_from_plan(&self, workflow_id: &str, plan: &Plan) -> Result<Vec<Pulse>> {
        let mut pulses = Vec::with_capacity(plan.pulses.len());
        for (index, descriptor) in plan.pulses.iter().enumerate() {
            let pulse = pulse_from_descriptor(workflow_id, descriptor, index as i64);
            self.repositories.pulses.create(&pulse)?;
            pulses.push(pulse);
        }
        Ok(pulses)
    }

    /// Build and persist the single pulse a quick-path scope synthesizes,
    /// skipping the research/planning stages entirely (spec.md §4.9's
    /// quick-path algorithm).
    pub fn create_quick_path_pulse(&self, workflow_id: &str, summary: &str) -> Result<Pulse> {
        let descriptor = PulseDescriptor {
            id: uuid::Uuid::new_v4().to_string(),
            title: "Quick-path change".to_string(),
            description: summary.to_string(),
            expected_changes: Vec::new(),
            estimated_size: "small".to_string(),
            depends_on: Vec::new(),
        };
        let pulse = pulse_from_descriptor(workflow_id, &descriptor, 0);
        self.repositories.pulses.create(&pulse)?;
        Ok(pulse)
    }

    /// Record the preflight session and run its worktree setup: create the
    /// workflow's worktree if it doesn't already exist. Called once, at the
    /// start of the `in_progress` stage.
    pub fn create_preflight_setup(&self, workflow_id: &str, session_id: &str, base_branch: &str) -> Result<()> {
        self.repositories.pulses.create_preflight_setup(workflow_id, session_id)?;
        self.git.create_worktree(workflow_id, base_branch)?;
        Ok(())
    }

    pub fn is_preflight_complete(&self, workflow_id: &str) -> Result<bool> {
        Ok(matches!(
            self.repositories.pulses.get_preflight_setup(workflow_id)?,
            Some(setup) if setup.status == crate::storage::PreflightStatus::Completed
        ))
    }

    pub fn is_preflight_failed(&self, workflow_id: &str) -> Result<bool> {
        Ok(matches!(
            self.repositories.pulses.get_preflight_setup(workflow_id)?,
            Some(setup) if setup.status == crate::storage::PreflightStatus::Failed
        ))
    }

    pub fn fail_preflight(&self, workflow_id: &str) -> Result<()> {
        self.repositories.pulses.fail_preflight(workflow_id)
    }

    pub fn matches_baseline(
        &self,
        workflow_id: &str,
        issue_type: crate::data::IssueType,
        source: crate::data::DiagnosticSource,
        file_path: &str,
        message: &str,
    ) -> Result<bool> {
        self.repositories.pulses.matches_baseline(workflow_id, issue_type, source, file_path, message)
    }

    /// Start the next proposed pulse whose dependencies have all
    /// succeeded, checking it out in the workflow's shared worktree.
    /// Returns `None` once no proposed pulse remains eligible.
    pub fn start_next_pulse(&self, workflow_id: &str) -> Result<Option<Pulse>> {
        let Some(next) = self.repositories.pulses.get_next_proposed_pulse(workflow_id)? else {
            return Ok(None);
        };

        let worktree_path = self.git.worktree_path(workflow_id);
        self.repositories.pulses.start_pulse(&next.id, &worktree_path.display().to_string())?;

        self.event_bus.broadcast(Event {
            event_type: EventType::WorkflowStageChanged,
            payload: serde_json::json!({
                "workflow_id": workflow_id,
                "pulse_id": next.id,
                "pulse_status": "running",
            }),
        });

        Ok(Pulse { status: PulseStatus::Running, worktree_path: Some(worktree_path.display().to_string()), ..next })
    }

    /// Mark the currently running pulse succeeded and report whether any
    /// proposed pulse remains to run.
    pub fn complete_pulse(&self, workflow_id: &str, pulse_id: &str) -> Result<CompletionOutcome> {
        self.repositories.pulses.complete_pulse(pulse_id)?;
        let has_more = self.repositories.pulses.get_next_proposed_pulse(workflow_id)?.is_some();
        Ok(CompletionOutcome { has_more_pulses: has_more })
    }

    pub fn fail_pulse(&self, pulse_id: &str, reason: &str) -> Result<()> {
        self.repositories.pulses.fail_pulse(pulse_id, reason)
    }

    pub fn stop_pulse(&self, pulse_id: &str) -> Result<()> {
        self.repositories.pulses.stop_pulse(pulse_id)
    }

    pub fn increment_rejection_count(&self, pulse_id: &str) -> Result<i64> {
        self.repositories.pulses.increment_rejection_count(pulse_id)
    }

    pub fn get_pulses_for_workflow(&self, workflow_id: &str) -> Result<Vec<Pulse>> {
        self.repositories.pulses.get_pulses_for_workflow(workflow_id)
    }

    pub fn get_running_pulse(&self, workflow_id: &str) -> Result<Option<Pulse>> {
        self.repositories.pulses.get_running_pulse(workflow_id)
    }

    /// Context and role a new pulse execution session should run under.
    pub fn execution_context(&self, workflow_id: &str) -> (ContextType, String, AgentRole) {
        (ContextType::Workflow, workflow_id.to_string(), AgentRole::Execution)
    }

    /// Compute and merge the workflow branch into its base using the
    /// recorded worktree, restoring the worktree's own checkout on failure
    /// so a retried merge starts from a clean state. The exact error
    /// wrapping/restoration contract lives in `workflow_orchestrator`,
    /// which owns merge finalization end-to-end; this just exposes the
    /// git-level primitives it composes.
    pub fn git(&self) -> &GitWorktreeService {
        &self.git
    }

    pub fn cleanup_workflow(&self, workflow_id: &str) -> Result<(), MergeError> {
        self.git.cleanup_workflow(workflow_id).map_err(|e| MergeError::GitCommandFailed(e.to_string()))
    }
}

fn pulse_from_descriptor(workflow_id: &str, descriptor: &PulseDescriptor, planned_index: i64) -> Pulse {
    Pulse {
        id: uuid::Uuid::new_v4().to_string(),
        workflow_id: workflow_id.to_string(),
        planned_pulse_id: descriptor.id.clone(),
        planned_index,
        status: PulseStatus::Proposed,
        description: descriptor.description.clone(),
        depends_on: descriptor.depends_on.clone(),
        has_unresolved_issues: false,
        is_recovery_checkpoint: false,
        rejection_count: 0,
        failure_reason: None,
        worktree_path: None,
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn orchestrator(repo_root: &std::path::Path) -> PulseOrchestrator {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        let git = Arc::new(GitWorktreeService::new(repo_root));
        PulseOrchestrator::new(repositories, git, Arc::new(EventBus::new()))
    }

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git").args(args).current_dir(dir.path()).status().unwrap();
            assert!(status.success());
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "initial"]);
        dir
    }

    fn plan_with(pulses: Vec<PulseDescriptor>) -> Plan {
        Plan {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: "wf-1".to_string(),
            summary: "do the thing".to_string(),
            pulses,
            status: crate::data::ArtifactStatus::Approved,
            created_at: chrono::Utc::now(),
        }
    }

    fn descriptor(id: &str, depends_on: Vec<&str>) -> PulseDescriptor {
        PulseDescriptor {
            id: id.to_string(),
            title: id.to_string(),
            description: format!("work for {}", id),
            expected_changes: vec![],
            estimated_size: "small".to_string(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn create_pulses_preserves_plan_order_and_dependencies() {
        let dir = init_repo();
        let orchestrator = orchestrator(dir.path());
        let plan = plan_with(vec![descriptor("p0", vec![]), descriptor("p1", vec!["p0"])]);

        let pulses = orchestrator.create_pulses_from_plan("wf-1", &plan).unwrap();
        assert_eq!(pulses.len(), 2);
        assert_eq!(pulses[0].planned_index, 0);
        assert_eq!(pulses[1].depends_on, vec!["p0".to_string()]);
    }

    #[test]
    fn start_next_pulse_checks_out_the_shared_worktree() {
        let dir = init_repo();
        let orchestrator = orchestrator(dir.path());
        let plan = plan_with(vec![descriptor("p0", vec![])]);
        orchestrator.create_pulses_from_plan("wf-1", &plan).unwrap();
        orchestrator.create_preflight_setup("wf-1", "sess-1", "main").unwrap();

        let started = orchestrator.start_next_pulse("wf-1").unwrap().unwrap();
        assert_eq!(started.status, PulseStatus::Running);
        assert!(started.worktree_path.unwrap().ends_with("wf-1"));
    }

    #[test]
    fn completing_the_only_pulse_reports_no_more_pulses() {
        let dir = init_repo();
        let orchestrator = orchestrator(dir.path());
        let plan = plan_with(vec![descriptor("p0", vec![])]);
        let pulses = orchestrator.create_pulses_from_plan("wf-1", &plan).unwrap();
        orchestrator.create_preflight_setup("wf-1", "sess-1", "main").unwrap();
        orchestrator.start_next_pulse("wf-1").unwrap();

        let outcome = orchestrator.complete_pulse("wf-1", &pulses[0].id).unwrap();
        assert!(!outcome.has_more_pulses);
    }

    #[test]
    fn completing_a_pulse_with_a_dependent_reports_more_pulses() {
        let dir = init_repo();
        let orchestrator = orchestrator(dir.path());
        let plan = plan_with(vec![descriptor("p0", vec![]), descriptor("p1", vec!["p0"])]);
        let pulses = orchestrator.create_pulses_from_plan("wf-1", &plan).unwrap();
        orchestrator.create_preflight_setup("wf-1", "sess-1", "main").unwrap();
        orchestrator.start_next_pulse("wf-1").unwrap();

        let outcome = orchestrator.complete_pulse("wf-1", &pulses[0].id).unwrap();
        assert!(outcome.has_more_pulses);
    }

    #[test]
    fn dependent_pulse_becomes_eligible_only_after_its_dependency_succeeds() {
        let dir = init_repo();
        let orchestrator = orchestrator(dir.path());
        let plan = plan_with(vec![descriptor("p0", vec![]), descriptor("p1", vec!["p0"])]);
        let pulses = orchestrator.create_pulses_from_plan("wf-1", &plan).unwrap();
        orchestrator.create_preflight_setup("wf-1", "sess-1", "main").unwrap();

        let first = orchestrator.start_next_pulse("wf-1").unwrap().unwrap();
        assert_eq!(first.id, pulses[0].id);
        // p1 depends on p0, which hasn't succeeded yet: nothing else to start.
        assert!(orchestrator.start_next_pulse("wf-1").unwrap().is_none());

        orchestrator.complete_pulse("wf-1", &first.id).unwrap();
        let second = orchestrator.start_next_pulse("wf-1").unwrap().unwrap();
        assert_eq!(second.id, pulses[1].id);
    }

    #[test]
    fn quick_path_pulse_has_no_dependencies() {
        let dir = init_repo();
        let orchestrator = orchestrator(dir.path());
        let pulse = orchestrator.create_quick_path_pulse("wf-1", "fix the typo").unwrap();
        assert!(pulse.depends_on.is_empty());
    }
}
