// src/deployer/mod.rs

//! Filesystem deployments.
//!
//! Layout:
//! <root>/<name>_<YYYYMMDD_HHMMSS>/
//!   main.<ext>
//!   metadata.json   (only when metadata was supplied)
//!   README.md
//!
//! Nothing here is transactional. A failed deploy can leave a half-written
//! directory behind, and readers cope with a missing `metadata.json`.

mod git;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::errors::DeploymentFailure;
use crate::language::Language;
use crate::util::ensure_dir;

pub use git::GitDeployment;

pub const METADATA_FILE: &str = "metadata.json";
pub const README_FILE: &str = "README.md";

/// String-keyed metadata stored next to a deployment.
pub type Metadata = Map<String, Value>;

/// A deployment directory as read back from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub metadata: Metadata,
}

/// Result of a successful `deploy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_name: String,
    pub deployment_path: PathBuf,
    pub code_file: PathBuf,
}

/// Where deployments go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployProvider {
    Local,
    Git,
}

impl std::str::FromStr for DeployProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(DeployProvider::Local),
            "git" => Ok(DeployProvider::Git),
            other => Err(format!("unknown deploy provider '{other}' (expected local | git)")),
        }
    }
}

pub struct Deployer {
    root: PathBuf,
}

impl Deployer {
    /// Open (and create if needed) the deployment root.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn deploy(
        &self,
        code: &str,
        name: &str,
        language: Language,
        metadata: Option<&Metadata>,
    ) -> Result<Deployment, DeploymentFailure> {
        let now = Local::now();
        let base = deployment_name(name, &now);

        check_name(name).map_err(|e| fail(&base, e))?;

        let (deployment_name, dir) = self
            .create_unique_dir(&base)
            .map_err(|e| fail(&base, e))?;

        let code_file = dir.join(format!("main.{}", language.extension()));
        std::fs::write(&code_file, code).map_err(|e| fail(&deployment_name, e))?;

        if let Some(meta) = metadata.filter(|m| !m.is_empty()) {
            let json = serde_json::to_vec_pretty(meta).map_err(|e| fail(&deployment_name, e))?;
            std::fs::write(dir.join(METADATA_FILE), json)
                .map_err(|e| fail(&deployment_name, e))?;
        }

        let readme = render_readme(name, language, &now, metadata);
        std::fs::write(dir.join(README_FILE), readme).map_err(|e| fail(&deployment_name, e))?;

        tracing::info!(deployment = %deployment_name, path = %dir.display(), "code deployed");

        Ok(Deployment {
            deployment_name,
            deployment_path: dir,
            code_file,
        })
    }

    /// Immediate subdirectories of the root, ordered by name.
    pub fn list_deployments(&self) -> Vec<DeploymentRecord> {
        let mut records = Vec::new();

        let walker = walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable deployment entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path().to_path_buf();
            records.push(DeploymentRecord {
                name: entry.file_name().to_string_lossy().into_owned(),
                created_at: created_at(&path),
                metadata: read_metadata(&path),
                path,
            });
        }

        records
    }

    /// Remove a deployment. `false` when it does not exist or cannot be removed.
    pub fn delete_deployment(&self, name: &str) -> bool {
        if let Err(e) = check_name(name) {
            tracing::warn!(deployment = name, error = %e, "refusing to delete");
            return false;
        }

        let dir = self.root.join(name);
        if !dir.is_dir() {
            tracing::warn!(deployment = name, "deployment not found");
            return false;
        }

        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(deployment = name, "deleted deployment");
                true
            }
            Err(e) => {
                tracing::error!(deployment = name, error = %e, "failed to delete deployment");
                false
            }
        }
    }

    /// Create `<root>/<base>`, or `<base>_1`, `<base>_2`, ... when a
    /// deployment with the same name was made within the same second.
    fn create_unique_dir(&self, base: &str) -> std::io::Result<(String, PathBuf)> {
        let mut attempt = 0u32;
        let mut root_recreated = false;
        loop {
            let candidate = if attempt == 0 {
                base.to_string()
            } else {
                format!("{base}_{attempt}")
            };
            let dir = self.root.join(&candidate);

            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((candidate, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e)
                    if e.kind() == std::io::ErrorKind::NotFound
                        && !root_recreated
                        && !self.root.exists() =>
                {
                    // Root vanished since construction
                    ensure_dir(&self.root).map_err(std::io::Error::other)?;
                    root_recreated = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `<name>_<YYYYMMDD_HHMMSS>`
pub fn deployment_name(name: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}", name, at.format("%Y%m%d_%H%M%S"))
}

/// A deployment name must stay a single directory under the root.
fn check_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("deployment name is empty".to_string());
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(format!("invalid deployment name '{name}'"));
    }
    Ok(())
}

fn fail(name: &str, error: impl ToString) -> DeploymentFailure {
    let failure = DeploymentFailure::new(name, error);
    tracing::error!(deployment = %failure.deployment_name, error = %failure.error, "deployment failed");
    failure
}

fn read_metadata(dir: &Path) -> Metadata {
    let path = dir.join(METADATA_FILE);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Metadata::new();
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "ignoring malformed metadata.json");
            Metadata::new()
        }
    }
}

fn created_at(dir: &Path) -> DateTime<Local> {
    std::fs::metadata(dir)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now())
}

fn render_readme(
    name: &str,
    language: Language,
    at: &DateTime<Local>,
    metadata: Option<&Metadata>,
) -> String {
    let mut readme = format!(
        "# {name}\n\n\
         Automatically generated and deployed by gptbuilder\n\n\
         ## Language\n{language}\n\n\
         ## Deployment Information\n\
         - Deployed: {}\n",
        at.to_rfc3339()
    );

    if let Some(meta) = metadata.filter(|m| !m.is_empty()) {
        readme.push_str("\n## Metadata\n");
        for (key, value) in meta {
            readme.push_str(&format!("- **{}**: {}\n", key, display_value(value)));
        }
    }

    readme.push_str(
        "\n## Usage\n\
         Run the main file to execute the code.\n\n\
         ---\n\
         *Generated by gptbuilder*\n",
    );
    readme
}

/// Strings without quotes, everything else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
