// src/language.rs

//! Supported source languages.
//!
//! Every per-language decision in the pipeline (file extension, the local
//! interpreter command, the container image) hangs off this enum, so adding
//! a language means adding a variant and the compiler points at every table
//! that needs a new arm.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::Runtime;

/// Container image used when a language has no dedicated image.
pub const DEFAULT_IMAGE: &str = "python:3.11-slim";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Go,
    Rust,
    /// Anything we do not know how to run. Executed as `cat <file>`.
    #[serde(rename = "text")]
    PlainText,
}

/// Invocation style for a language: which interpreter to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launcher {
    Python,
    Node,
    Cat,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Go,
        Language::Rust,
        Language::PlainText,
    ];

    /// Lowercase tag, as used in prompts, metadata and on the CLI.
    pub fn tag(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::PlainText => "text",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rs",
            Language::PlainText => "txt",
        }
    }

    /// Docker image the container executor runs this language in.
    pub fn image(self) -> &'static str {
        match self {
            Language::JavaScript => "node:18-slim",
            _ => DEFAULT_IMAGE,
        }
    }

    fn launcher(self) -> Launcher {
        match self {
            Language::Python => Launcher::Python,
            Language::JavaScript => Launcher::Node,
            _ => Launcher::Cat,
        }
    }

    /// Host command line for running `file`.
    ///
    /// python     → [python3, file, args...]
    /// javascript → [node, file, args...]
    /// other      → [cat, file]
    pub fn local_command(self, runtime: &Runtime, file: &str, args: &[String]) -> Vec<String> {
        match self.launcher() {
            Launcher::Python => with_args(&runtime.python, file, args),
            Launcher::Node => with_args(&runtime.node, file, args),
            Launcher::Cat => vec!["cat".to_string(), file.to_string()],
        }
    }

    /// Command line executed inside the container image.
    ///
    /// Interpreter names are fixed here: they refer to binaries inside the
    /// image, not on the host.
    pub fn container_command(self, file: &str, args: &[String]) -> Vec<String> {
        match self.launcher() {
            Launcher::Python => with_args("python3", file, args),
            Launcher::Node => with_args("node", file, args),
            Launcher::Cat => vec!["cat".to_string(), file.to_string()],
        }
    }

    /// Lenient parse used at the edges (CLI, metadata).
    ///
    /// Unknown tags become `PlainText`; the fallback is logged so that a typo
    /// in a language name is visible instead of silently running `cat`.
    pub fn resolve(tag: &str) -> Language {
        match tag.parse::<Language>() {
            Ok(lang) => lang,
            Err(e) => {
                tracing::warn!(language = tag, "{e}; treating code as plain text");
                Language::PlainText
            }
        }
    }
}

/// File extension for a language tag. Unknown tags map to `txt`.
pub fn extension_of(tag: &str) -> &'static str {
    tag.parse::<Language>()
        .map(Language::extension)
        .unwrap_or_else(|_| Language::PlainText.extension())
}

fn with_args(program: &str, file: &str, args: &[String]) -> Vec<String> {
    let mut cmd = Vec::with_capacity(args.len() + 2);
    cmd.push(program.to_string());
    cmd.push(file.to_string());
    cmd.extend(args.iter().cloned());
    cmd
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language '{0}'")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.tag() == tag)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
