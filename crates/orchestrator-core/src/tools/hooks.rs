//! Post-write hook runner: shell commands triggered after a successful
//! mutating tool call, gated by glob match on the touched file's relative
//! path.
//!
//! Grounded on the placeholder-substitution and block/warn policy laid out
//! for krusty's planned build-on-save hooks, generalized into a standalone
//! runner invoked directly by `write_file`/`edit_file`/`multi_edit` rather
//! than threaded through the pre/post tool-hook chain, since it needs the
//! pre-write file content on hand to roll back.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Block,
    Warn,
}

#[derive(Debug, Clone)]
pub struct PostWriteHook {
    pub glob: String,
    pub command: String,
    pub on_failure: OnFailure,
}

/// Outcome of running every hook that matched one touched file.
pub enum HookRunOutcome {
    /// Every matching hook (if any) succeeded, or only warn-policy hooks failed.
    Ok { warnings: Vec<String> },
    /// A block-policy hook failed; the caller must roll the file back.
    Blocked { reason: String },
}

pub struct PostWriteHookRunner {
    hooks: Vec<PostWriteHook>,
}

impl PostWriteHookRunner {
    pub fn new(hooks: Vec<PostWriteHook>) -> Self {
        Self { hooks }
    }

    /// Run every hook whose glob matches `relative_path`, substituting
    /// placeholders into each command, sequentially and in registration
    /// order. Stops at the first `block`-policy failure.
    pub async fn run(&self, project_root: &Path, relative_path: &str) -> HookRunOutcome {
        let mut warnings = Vec::new();
        let absolute_path = project_root.join(relative_path);

        for hook in &self.hooks {
            if !glob_matches(&hook.glob, relative_path) {
                continue;
            }

            let command = substitute_placeholders(&hook.command, relative_path, &absolute_path);
            match run_one(&command, project_root).await {
                Ok(()) => {}
                Err(reason) => match hook.on_failure {
                    OnFailure::Block => return HookRunOutcome::Blocked { reason },
                    OnFailure::Warn => warnings.push(reason),
                },
            }
        }

        HookRunOutcome::Ok { warnings }
    }
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(path))
        .unwrap_or(false)
}

fn substitute_placeholders(template: &str, relative_path: &str, absolute_path: &Path) -> String {
    let dirname = absolute_path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let filename = absolute_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();

    template
        .replace("%ABSOLUTE_PATH%", &absolute_path.display().to_string())
        .replace("%PATH%", relative_path)
        .replace("%DIRNAME%", &dirname)
        .replace("%FILENAME%", &filename)
}

async fn run_one(command: &str, cwd: &Path) -> Result<(), String> {
    let build = || {
        #[cfg(windows)]
        {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command).current_dir(cwd);
            c
        }
        #[cfg(not(windows))]
        {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command).current_dir(cwd);
            c
        }
    };

    let mut child = build();
    let output = match timeout(HOOK_TIMEOUT, child.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("hook '{}' failed to start: {}", command, e)),
        Err(_) => return Err(format!("hook '{}' timed out after 30s", command)),
    };

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "hook '{}' exited with {}: {}",
            command,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_substitution_replaces_every_occurrence() {
        let abs = Path::new("/repo/src/lib.rs");
        let cmd = substitute_placeholders(
            "fmt %PATH% && echo %ABSOLUTE_PATH% in %DIRNAME% as %FILENAME% (%PATH%)",
            "src/lib.rs",
            abs,
        );
        assert_eq!(
            cmd,
            "fmt src/lib.rs && echo /repo/src/lib.rs in /repo/src as lib.rs (src/lib.rs)"
        );
    }

    #[tokio::test]
    async fn warn_policy_hook_failure_is_collected_not_blocking() {
        let runner = PostWriteHookRunner::new(vec![PostWriteHook {
            glob: "*.rs".to_string(),
            command: "exit 1".to_string(),
            on_failure: OnFailure::Warn,
        }]);

        let outcome = runner.run(Path::new("/tmp"), "lib.rs").await;
        match outcome {
            HookRunOutcome::Ok { warnings } => assert_eq!(warnings.len(), 1),
            HookRunOutcome::Blocked { .. } => panic!("expected Ok with warnings"),
        }
    }

    #[tokio::test]
    async fn block_policy_hook_failure_blocks() {
        let runner = PostWriteHookRunner::new(vec![PostWriteHook {
            glob: "*.rs".to_string(),
            command: "exit 1".to_string(),
            on_failure: OnFailure::Block,
        }]);

        let outcome = runner.run(Path::new("/tmp"), "lib.rs").await;
        assert!(matches!(outcome, HookRunOutcome::Blocked { .. }));
    }

    #[tokio::test]
    async fn non_matching_glob_is_skipped() {
        let runner = PostWriteHookRunner::new(vec![PostWriteHook {
            glob: "*.ts".to_string(),
            command: "exit 1".to_string(),
            on_failure: OnFailure::Block,
        }]);

        let outcome = runner.run(Path::new("/tmp"), "lib.rs").await;
        assert!(matches!(outcome, HookRunOutcome::Ok { .. }));
    }
}
