// src/backend/command.rs

//! Command-line repo tool adapter
//!
//! Drives a repository-configuration utility over its command line, the
//! way the original system drives `ssu`. The tool is expected to accept
//! `list --json` (printing a JSON array of `{alias, url, enabled}`
//! entries on stdout) plus `add <alias> <url>`, `remove <alias>`,
//! `enable <alias>` and `disable <alias>` subcommands.

use crate::backend::{RepoAction, RepoEntry, RepoTool};
use crate::error::{Error, Result};
use crate::status::RepoAlias;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default timeout for repo tool invocations (30 seconds)
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// `RepoTool` implementation backed by an external command
pub struct CommandRepoTool {
    program: PathBuf,
    timeout: Duration,
}

impl CommandRepoTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the tool with the given arguments, returning stdout on success
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("running {} {}", self.program.display(), args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("failed to spawn {}: {}", self.program.display(), e);
                return Err(Error::RepoToolUnavailable);
            }
            Err(_) => {
                warn!(
                    "{} timed out after {}s",
                    self.program.display(),
                    self.timeout.as_secs()
                );
                return Err(Error::RepoToolUnavailable);
            }
        };

        if !output.status.success() {
            let code = output
                .status
                .code()
                .and_then(|c| u32::try_from(c).ok())
                .unwrap_or(1);
            let details = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Backend { code, details });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RepoTool for CommandRepoTool {
    async fn list_repos(&self) -> Result<Vec<RepoEntry>> {
        let stdout = self.run(&["list", "--json"]).await?;

        let entries: Vec<RepoEntry> = serde_json::from_str(&stdout).map_err(|e| Error::Backend {
            code: 0,
            details: format!("unparseable repo list: {}", e),
        })?;

        debug!("repo tool listed {} repositories", entries.len());
        Ok(entries)
    }

    async fn modify_repo(&self, alias: &RepoAlias, action: &RepoAction) -> Result<()> {
        match action {
            RepoAction::Add { url } => {
                self.run(&["add", alias.as_str(), url]).await?;
            }
            RepoAction::Remove => {
                self.run(&["remove", alias.as_str()]).await?;
            }
            RepoAction::Enable => {
                self.run(&["enable", alias.as_str()]).await?;
            }
            RepoAction::Disable => {
                self.run(&["disable", alias.as_str()]).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("repotool");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_list_repos_parses_json() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"echo '[{"alias":"mentaljam-obs","url":"https://repo.example.org/mentaljam","enabled":true},
                      {"alias":"basil-maps","url":"https://repo.example.org/basil","enabled":false}]'"#,
        );

        let repos = CommandRepoTool::new(tool).list_repos().await.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].alias.as_str(), "mentaljam-obs");
        assert!(repos[0].enabled);
        assert!(!repos[1].enabled);
    }

    #[tokio::test]
    async fn test_modify_repo_passes_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("args.log");
        let tool = fake_tool(dir.path(), &format!("echo \"$@\" > {}", log.display()));

        CommandRepoTool::new(tool)
            .modify_repo(
                &RepoAlias::from("mentaljam-obs"),
                &RepoAction::Add {
                    url: "https://repo.example.org/mentaljam".to_string(),
                },
            )
            .await
            .unwrap();

        let recorded = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            recorded.trim(),
            "add mentaljam-obs https://repo.example.org/mentaljam"
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'no such repo' >&2; exit 4");

        let err = CommandRepoTool::new(tool)
            .modify_repo(&RepoAlias::from("missing"), &RepoAction::Enable)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::Backend {
                code: 4,
                details: "no such repo".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let err = CommandRepoTool::new("/nonexistent/repotool")
            .list_repos()
            .await
            .unwrap_err();
        assert_eq!(err, Error::RepoToolUnavailable);
    }

    #[tokio::test]
    async fn test_unparseable_list_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'not json'");

        let err = CommandRepoTool::new(tool).list_repos().await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }
}
