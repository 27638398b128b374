// src/deployer/git.rs

use anyhow::{anyhow, Context, Result};
use git2::{Cred, PushOptions, RemoteCallbacks, Repository, Signature};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{check_name, fail, Deployer};
use crate::errors::DeploymentFailure;
use crate::language::Language;

const DEFAULT_REMOTE: &str = "origin";

/// Result of committing code into an existing git working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitDeployment {
    pub deployment_name: String,
    pub repo_path: PathBuf,
    pub file_path: PathBuf,
    pub branch: String,
    pub commit: String,
    /// Remote the commit was pushed to, if any.
    pub remote: Option<String>,
    /// False when the repository has no remote.
    pub pushed: bool,
}

impl Deployer {
    /// Write `<name>.<ext>` into `repo_path`, commit it on HEAD and push
    /// HEAD to `refs/heads/<branch>` on the configured remote.
    ///
    /// `origin` is preferred; a repository with a single remote of another
    /// name pushes there. Several remotes and no `origin` is a failure.
    pub fn deploy_to_git(
        &self,
        code: &str,
        name: &str,
        repo_path: &Path,
        branch: &str,
        language: Language,
    ) -> Result<GitDeployment, DeploymentFailure> {
        check_name(name).map_err(|e| fail(name, e))?;

        let deployment = commit_and_push(code, name, repo_path, branch, language)
            .map_err(|e| fail(name, format!("{e:#}")))?;

        tracing::info!(
            repo = %repo_path.display(),
            commit = %deployment.commit,
            pushed = deployment.pushed,
            "code deployed to git repository"
        );
        Ok(deployment)
    }
}

fn commit_and_push(
    code: &str,
    name: &str,
    repo_path: &Path,
    branch: &str,
    language: Language,
) -> Result<GitDeployment> {
    let repo = Repository::open(repo_path)
        .with_context(|| format!("Failed to open git repository at {:?}", repo_path))?;
    let remote_name = push_remote(&repo)?;
    let workdir = repo
        .workdir()
        .context("Repository has no working tree")?
        .to_path_buf();

    let file_name = format!("{}.{}", name, language.extension());
    let file_path = workdir.join(&file_name);
    std::fs::write(&file_path, code)
        .with_context(|| format!("Failed to write {:?}", file_path))?;

    let mut index = repo.index()?;
    index.add_path(Path::new(&file_name))?;
    index.write()?;

    let tree = repo.find_tree(index.write_tree()?)?;
    let sig = repo
        .signature()
        .or_else(|_| Signature::now("gptbuilder", "gptbuilder@localhost"))?;

    let message = format!("Deploy {name} via gptbuilder");
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let commit = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;

    let pushed = match &remote_name {
        Some(remote_name) => {
            let mut remote = repo.find_remote(remote_name)?;
            push_head(&repo, &mut remote, branch)?;
            true
        }
        None => {
            tracing::debug!("no remote configured; skipping push");
            false
        }
    };

    Ok(GitDeployment {
        deployment_name: name.to_string(),
        repo_path: repo_path.to_path_buf(),
        file_path,
        branch: branch.to_string(),
        commit: commit.to_string(),
        remote: remote_name,
        pushed,
    })
}

/// The remote to push to, decided before anything is committed.
fn push_remote(repo: &Repository) -> Result<Option<String>> {
    let remotes = repo.remotes()?;
    let names: Vec<&str> = remotes.iter().flatten().collect();

    if names.contains(&DEFAULT_REMOTE) {
        return Ok(Some(DEFAULT_REMOTE.to_string()));
    }
    match names.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.to_string())),
        many => Err(anyhow!(
            "Cannot choose a remote to push to (found {}, none named {DEFAULT_REMOTE})",
            many.join(", ")
        )),
    }
}

fn push_head(repo: &Repository, remote: &mut git2::Remote<'_>, branch: &str) -> Result<()> {
    let head = repo.head()?;
    let head_ref = head.name().context("HEAD is not a named reference")?;
    let refspec = format!("{head_ref}:refs/heads/{branch}");

    let mut rejection: Option<String> = None;
    {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_url, username, allowed| {
            if allowed.is_ssh_key() {
                if let Some(user) = username {
                    return Cred::ssh_key_from_agent(user);
                }
            }
            Cred::default()
        });
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                rejection = Some(format!("{refname}: {msg}"));
            }
            Ok(())
        });

        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .with_context(|| format!("Failed to push to {}", remote.name().unwrap_or("remote")))?;
    }

    match rejection {
        Some(reason) => Err(anyhow!("Push rejected: {reason}")),
        None => Ok(()),
    }
}
