//! Git plugin. Answers chat commands about configured repositories.
//!
//! Remote queries shell out to `git` on a short-lived background thread so
//! the dispatcher never waits on the network.

use std::collections::BTreeMap;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{ensure, Context, Result};
use botbus_core::{
    ChannelId, ConfigSections, Environment, Event, EventData, Plugin, Plugins, Publisher, SharedSink,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, warn};

pub const GIT_SECTION: &str = "plugin.git";

pub const USAGE: &str = "Command: git [<REPOSITORY> [<BRANCH>]]";

static BRANCH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9/_:.\-+*]+$").unwrap());

pub struct GitPlugin {
    publisher: Publisher,
    /// Repository alias -> clone URL.
    repositories: BTreeMap<String, String>,
}

impl GitPlugin {
    pub fn new(publisher: Publisher, repositories: BTreeMap<String, String>) -> Self {
        Self {
            publisher,
            repositories,
        }
    }

    fn handle_command(&self, command: &str, origin: &str, channel: &ChannelId) {
        let reply = |text: String| self.publisher.publish(EventData::reply(text, origin, channel));
        let args: Vec<&str> = command.split_whitespace().collect();

        match args.as_slice() {
            ["help"] => reply(USAGE.to_string()),
            ["git"] => reply(format!(
                "Repositories: {}",
                self.repositories.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
            ["git", alias, rest @ ..] => {
                let Some(url) = self.repositories.get(*alias) else {
                    reply("Repository not found!".to_string());
                    return;
                };
                match rest.first() {
                    None => {
                        let url = url.clone();
                        self.spawn_query(origin, channel, "Branches request failed!", move || {
                            Ok(format!("Branches: {}", repository_branches(&url)?.join(", ")))
                        });
                    }
                    Some(branch) if !BRANCH_PATTERN.is_match(branch) => {
                        reply("Invalid branch name!".to_string());
                    }
                    Some(branch) => {
                        let (url, branch) = (url.clone(), branch.to_string());
                        self.spawn_query(origin, channel, "Commits request failed!", move || {
                            Ok(format!("Commits:\n{}", repository_branch_commits(&url, &branch)?))
                        });
                    }
                }
            }
            _ => {}
        }
    }

    /// Run `query` on a detached thread and publish its answer, or `failure` if it errors.
    fn spawn_query<F>(&self, origin: &str, channel: &ChannelId, failure: &'static str, query: F)
    where
        F: FnOnce() -> Result<String> + Send + 'static,
    {
        let publisher = self.publisher.clone();
        let (origin, channel) = (origin.to_string(), channel.clone());
        let spawned = thread::Builder::new()
            .name(format!("{}-query", self.publisher.name()))
            .spawn(move || {
                let text = query().unwrap_or_else(|e| {
                    error!(plugin = %publisher.name(), error = %e, "Git failed");
                    failure.to_string()
                });
                publisher.publish(EventData::reply(text, &origin, &channel));
            });
        if let Err(e) = spawned {
            error!(plugin = %self.publisher.name(), error = %e, "Cannot start git query");
        }
    }
}

impl Plugin for GitPlugin {
    fn name(&self) -> &str {
        self.publisher.name()
    }

    fn apply_event(&mut self, event: &Event) -> anyhow::Result<()> {
        if let EventData::ChatCommand { command, channel } = event.data() {
            self.handle_command(command, event.publisher(), channel);
        }
        Ok(())
    }
}

/// Registers `git` when `plugin.git` lists repositories and git is installed.
pub fn register_plugins(
    workers: &mut Plugins,
    sink: &SharedSink,
    config: &ConfigSections,
    _env: &Environment,
) -> anyhow::Result<()> {
    let Some(repositories) = config.get(GIT_SECTION).filter(|r| !r.is_empty()) else {
        return Ok(());
    };
    if which::which("git").is_err() {
        warn!("Git plugin requires git installed");
        return Ok(());
    }
    let publisher = Publisher::new("git", Some(sink.clone()));
    workers.push(Box::new(GitPlugin::new(publisher, repositories.clone())));
    Ok(())
}

// ---------------------------------------------------------------------------
// git invocations
// ---------------------------------------------------------------------------

/// Sorted branch names of a remote repository.
pub fn repository_branches(repository: &str) -> Result<Vec<String>> {
    debug!(repository, "Listing branches");
    let output = Command::new("git")
        .args(["ls-remote", "-h", repository])
        .stdin(Stdio::null())
        .output()
        .context("failed to run git ls-remote")?;
    ensure!(output.status.success(), "git ls-remote exited with {}", output.status);

    let mut branches: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split_once("refs/heads/"))
        .map(|(_, branch)| branch.trim().to_string())
        .filter(|branch| !branch.is_empty())
        .collect();
    branches.sort();
    Ok(branches)
}

/// One line per commit for the last three commits of `branch`.
pub fn repository_branch_commits(repository: &str, branch: &str) -> Result<String> {
    debug!(repository, branch, "Fetching commits");
    let dir = tempfile::Builder::new()
        .prefix("botbus_")
        .suffix(".git")
        .tempdir()
        .context("failed to create clone directory")?;

    let status = Command::new("git")
        .args(["clone", repository, "-b", branch])
        .args(["--depth=3", "--bare", "--filter=blob:none", "-q"])
        .arg(dir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run git clone")?;
    ensure!(status.success(), "git clone exited with {}", status);

    let output = Command::new("git")
        .args(["log", "-n3", "--no-decorate", "--format=[%h] %s (by %cn, %cr)"])
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .output()
        .context("failed to run git log")?;
    ensure!(output.status.success(), "git log exited with {}", output.status);

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
