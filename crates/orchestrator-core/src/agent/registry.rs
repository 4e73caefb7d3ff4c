//! Per-role persona prompts and tool allow-lists.
//!
//! spec.md §9 calls for each agent role to own a persona prompt and a
//! bounded tool subset rather than giving every session the full registry;
//! grounded on krusty-core's `agent::build_context` role-specific prompt
//! assembly, collapsed here into one static table since this crate has no
//! per-project prompt customization layer.

use std::collections::HashMap;

use crate::data::AgentRole;

const BASE_TOOLS: &[&str] = &["read_file", "list_directory", "grep", "take_note", "semantic_search", "web_code_search"];

#[derive(Debug, Clone)]
pub struct AgentRoleConfig {
    pub persona_prompt: String,
    pub allowed_tools: Vec<String>,
}

impl AgentRoleConfig {
    fn new(persona_prompt: &str, extra_tools: &[&str]) -> Self {
        let mut allowed_tools: Vec<String> = BASE_TOOLS.iter().map(|s| s.to_string()).collect();
        allowed_tools.extend(extra_tools.iter().map(|s| s.to_string()));
        Self { persona_prompt: persona_prompt.to_string(), allowed_tools }
    }
}

pub struct AgentRoleRegistry {
    configs: HashMap<AgentRole, AgentRoleConfig>,
}

impl AgentRoleRegistry {
    /// The standard role table every workflow orchestrator instance uses.
    pub fn standard() -> Self {
        let mut configs = HashMap::new();

        configs.insert(
            AgentRole::Scoping,
            AgentRoleConfig::new(
                "You scope incoming work. Read enough of the codebase to judge whether this task \
                 is a quick, well-understood change or needs a full research and planning pass, \
                 then call submit_scope with your recommendation.",
                &["submit_scope", "request_extension", "ask_questions"],
            ),
        );
        configs.insert(
            AgentRole::Research,
            AgentRoleConfig::new(
                "You research the codebase ahead of planning. Investigate the areas this change \
                 will touch and call submit_research with your findings.",
                &["submit_research", "request_extension", "ask_questions"],
            ),
        );
        configs.insert(
            AgentRole::Planning,
            AgentRoleConfig::new(
                "You turn research into an executable plan. Break the work into pulses with clear \
                 dependencies and call submit_plan.",
                &["submit_plan", "request_extension", "ask_questions"],
            ),
        );
        configs.insert(
            AgentRole::Preflight,
            AgentRoleConfig::new(
                "You prepare the workflow's worktree for execution. Run the project's build, lint, \
                 and test commands, record any pre-existing failures as baselines so later pulses \
                 aren't blamed for them, then call complete_preflight.",
                &["shell", "record_baseline", "complete_preflight", "request_extension"],
            ),
        );
        configs.insert(
            AgentRole::Execution,
            AgentRoleConfig::new(
                "You execute one pulse of the plan. Make the described change, verify it, and call \
                 complete_pulse with whether it succeeded.",
                &["write_file", "edit_file", "multi_edit", "shell", "complete_pulse", "request_extension"],
            ),
        );
        configs.insert(
            AgentRole::Review,
            AgentRoleConfig::new(
                "You review the finished change against the approved scope. Read the diff, leave \
                 comments where warranted, and call complete_review with your recommendation.",
                &[
                    "get_diff",
                    "get_scope_card",
                    "add_line_comment",
                    "add_file_comment",
                    "add_review_comment",
                    "complete_review",
                    "request_extension",
                ],
            ),
        );
        configs.insert(
            AgentRole::Discussion,
            AgentRoleConfig::new(
                "You answer questions about a channel or workflow. You have read-only tools only; \
                 you do not drive workflow stage transitions.",
                &["ask_questions"],
            ),
        );

        Self { configs }
    }

    pub fn config_for(&self, role: AgentRole) -> &AgentRoleConfig {
        self.configs.get(&role).expect("every AgentRole variant has a registered config")
    }
}
