//! `orchestrator-server` binary: boots the orchestration core against a
//! project root and serves the collaborator-contract HTTP/SSE surface.
//!
//! Grounded on krusty-server's `main.rs`: load config, open the database,
//! build the shared `AppState`, lay CORS/tracing over the router, bind and
//! serve. The one addition this binary makes over the teacher's is that it
//! also has to construct the orchestrator's full dependency graph
//! (`OrchestratorDeps`) before it can build `AppState`, since this crate
//! has no equivalent of krusty-core's already-running singletons.

use std::net::SocketAddr;
use std::sync::Arc;

use orchestrator_core::agent::llm::ScriptedLlmClient;
use orchestrator_core::agent::registry::AgentRoleRegistry;
use orchestrator_core::git_worktree::GitWorktreeService;
use orchestrator_core::session_manager::SessionManager;
use orchestrator_core::tools::hooks::{OnFailure, PostWriteHook, PostWriteHookRunner};
use orchestrator_core::workflow_orchestrator::{build_tool_registry, OrchestratorDeps, WorkflowOrchestrator};
use orchestrator_core::{Config, Database, EventBus, Repositories, ShellApprovalService};

use orchestrator_server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let project_root = std::env::current_dir()?;
    let repo_root = GitWorktreeService::find_repo_root(&project_root)?.unwrap_or_else(|| project_root.clone());

    let config = Config::load(&repo_root).await?;
    let db_path = config.database_path(&repo_root);
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let db = Database::open(&db_path)?;
    let repositories = Arc::new(Repositories::new(db));

    let event_bus = Arc::new(EventBus::new());
    let sessions = Arc::new(SessionManager::new(repositories.clone()));
    let git = Arc::new(GitWorktreeService::new(&repo_root));
    let pulses = Arc::new(orchestrator_core::PulseOrchestrator::new(
        repositories.clone(),
        git.clone(),
        event_bus.clone(),
    ));
    let shell_approval = Arc::new(ShellApprovalService::new());
    let tool_registry = build_tool_registry().await;
    let roles = Arc::new(AgentRoleRegistry::standard());

    let hooks: Vec<PostWriteHook> = config
        .clone()
        .into_hook_configs()
        .into_iter()
        .map(|h| PostWriteHook {
            glob: h.glob,
            command: h.command,
            on_failure: match h.on_failure {
                orchestrator_core::config::HookFailureMode::Block => OnFailure::Block,
                orchestrator_core::config::HookFailureMode::Warn => OnFailure::Warn,
            },
        })
        .collect();
    let hook_runner = Arc::new(PostWriteHookRunner::new(hooks));

    // No concrete LLM vendor SDK is in scope for this crate (spec.md §1);
    // `ScriptedLlmClient` with an empty queue degrades to an immediate stop
    // per call rather than hanging. Wire a real `LlmClient` in here to
    // point this binary at an actual model.
    let llm = Arc::new(ScriptedLlmClient::new(Vec::new()));

    let orchestrator = WorkflowOrchestrator::new(OrchestratorDeps {
        repositories: repositories.clone(),
        sessions,
        pulses,
        git,
        shell_approval: shell_approval.clone(),
        event_bus: event_bus.clone(),
        llm,
        roles,
        tool_registry,
        hook_runner: Some(hook_runner),
        project_root: repo_root.clone(),
        pulse_rejection_cap: config.workflow.pulse_rejection_cap,
    });

    let state = AppState {
        orchestrator,
        repositories,
        event_bus,
        shell_approval,
    };

    let app = build_router(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "4000".to_string());
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    tracing::info!("starting orchestrator-server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
