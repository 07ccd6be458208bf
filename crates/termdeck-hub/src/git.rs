use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitError {
    #[error("git executable not found")]
    Missing,
    #[error("not a git repository: {0}")]
    NotRepo(String),
    #[error("git failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    Added,
    Deleted,
    Renamed,
    Modified,
    Untracked,
}

impl FileChange {
    /// Folds the index and worktree columns of a porcelain entry into one
    /// change kind. Additions win over deletions, deletions over renames.
    fn from_columns(index: char, worktree: char) -> Self {
        let either = |codes: &[char]| codes.contains(&index) || codes.contains(&worktree);
        if either(&['A', 'C']) {
            FileChange::Added
        } else if either(&['D']) {
            FileChange::Deleted
        } else if either(&['R']) {
            FileChange::Renamed
        } else {
            FileChange::Modified
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitFileStatus {
    pub path: String,
    pub status: FileChange,
    pub staged: bool,
    pub unstaged: bool,
    pub untracked: bool,
}

impl GitFileStatus {
    /// Parses one `git status --porcelain=v1` entry. Branch headers and
    /// truncated lines yield `None`.
    pub fn from_porcelain(line: &str) -> Option<Self> {
        let (columns, path) = (line.get(..2)?, line.get(3..)?.trim());
        if columns == "##" || path.is_empty() || line.as_bytes().get(2) != Some(&b' ') {
            return None;
        }
        if columns == "??" {
            return Some(Self {
                path: path.to_string(),
                status: FileChange::Untracked,
                staged: false,
                unstaged: false,
                untracked: true,
            });
        }
        let mut codes = columns.chars();
        let (index, worktree) = (codes.next()?, codes.next()?);
        let path = match path.rsplit_once(" -> ") {
            Some((_, renamed_to)) => renamed_to,
            None => path,
        };
        let touched = |code: char| !matches!(code, ' ' | '?');
        Some(Self {
            path: path.to_string(),
            status: FileChange::from_columns(index, worktree),
            staged: touched(index),
            unstaged: touched(worktree),
            untracked: false,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitStatus {
    pub repo_root: String,
    pub branch: Option<String>,
    pub files: Vec<GitFileStatus>,
}

/// Raw result of a git invocation, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub async fn run_git_output(cwd: &Path, args: &[String]) -> Result<GitOutput, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                GitError::Missing
            } else {
                GitError::Failed(err.to_string())
            }
        })?;
    Ok(GitOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

pub async fn run_git(cwd: &Path, args: &[&str]) -> Result<String, GitError> {
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let output = run_git_output(cwd, &args).await?;
    if !output.success() {
        let stderr = output.stderr.trim().to_string();
        if stderr.contains("not a git repository") {
            return Err(GitError::NotRepo(cwd.display().to_string()));
        }
        return Err(GitError::Failed(stderr));
    }
    Ok(output.stdout)
}

pub async fn git_repo_root(cwd: &Path) -> Result<PathBuf, GitError> {
    let root = run_git(cwd, &["rev-parse", "--show-toplevel"]).await?;
    let root = root.trim();
    if root.is_empty() {
        return Err(GitError::Failed("empty git root".to_string()));
    }
    Ok(PathBuf::from(root))
}

pub async fn status(cwd: &Path) -> Result<GitStatus, GitError> {
    let repo_root = git_repo_root(cwd).await?;
    let raw = run_git(&repo_root, &["status", "--porcelain=v1", "-b", "-u"]).await?;
    let mut branch = None;
    let mut files = Vec::new();
    for line in raw.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            branch = parse_branch_header(header);
        } else if let Some(entry) = GitFileStatus::from_porcelain(line) {
            files.push(entry);
        }
    }
    Ok(GitStatus {
        repo_root: repo_root.to_string_lossy().to_string(),
        branch,
        files,
    })
}

/// Unified diff of the working tree against the index, optionally for one
/// path.
pub async fn diff(cwd: &Path, path: Option<&str>) -> Result<String, GitError> {
    let repo_root = git_repo_root(cwd).await?;
    let rel = path.map(|path| repo_relative(&repo_root, path));
    let mut args = vec!["diff", "--no-color"];
    if let Some(rel) = rel.as_deref() {
        args.push("--");
        args.push(rel);
    }
    run_git(&repo_root, &args).await
}

fn parse_branch_header(header: &str) -> Option<String> {
    let name = header.split("...").next()?.trim();
    let name = name.strip_prefix("No commits yet on ").unwrap_or(name);
    if name.is_empty() || name.starts_with("HEAD (no branch)") {
        return None;
    }
    Some(name.to_string())
}

/// Paths under the repository root are passed to git relative to it; any
/// other input goes through unchanged.
fn repo_relative<'a>(repo_root: &Path, input: &'a str) -> Cow<'a, str> {
    match Path::new(input).strip_prefix(repo_root) {
        Ok(rel) => Cow::Owned(rel.to_string_lossy().into_owned()),
        _ => Cow::Borrowed(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_entries_classify_changes() {
        let renamed = GitFileStatus::from_porcelain("R  old.rs -> new.rs").expect("renamed");
        assert_eq!(renamed.path, "new.rs");
        assert_eq!(renamed.status, FileChange::Renamed);
        assert!(renamed.staged);
        assert!(!renamed.unstaged);

        let modified = GitFileStatus::from_porcelain(" M src/lib.rs").expect("modified");
        assert_eq!(modified.status, FileChange::Modified);
        assert!(!modified.staged);
        assert!(modified.unstaged);

        let added = GitFileStatus::from_porcelain("AD gone.rs").expect("added");
        assert_eq!(added.status, FileChange::Added);

        let untracked = GitFileStatus::from_porcelain("?? notes.md").expect("untracked");
        assert!(untracked.untracked);
        assert_eq!(
            serde_json::to_value(&untracked).expect("json")["status"],
            serde_json::json!("untracked")
        );

        assert!(GitFileStatus::from_porcelain("M").is_none());
        assert!(GitFileStatus::from_porcelain(" M ").is_none());
        assert!(GitFileStatus::from_porcelain("## main...origin/main").is_none());
    }

    #[test]
    fn branch_header_variants() {
        assert_eq!(
            parse_branch_header("main...origin/main [ahead 1]").as_deref(),
            Some("main")
        );
        assert_eq!(
            parse_branch_header("No commits yet on trunk").as_deref(),
            Some("trunk")
        );
        assert_eq!(parse_branch_header("HEAD (no branch)"), None);
    }

    #[test]
    fn absolute_paths_become_repo_relative() {
        let root = Path::new("/repo");
        assert_eq!(repo_relative(root, "/repo/src/main.rs"), "src/main.rs");
        assert_eq!(repo_relative(root, "src/main.rs"), "src/main.rs");
        assert_eq!(repo_relative(root, "/elsewhere/a.rs"), "/elsewhere/a.rs");
    }

    #[tokio::test]
    async fn status_outside_repository_fails() {
        let dir = std::env::temp_dir().join(format!("termdeck-git-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        assert!(status(&dir).await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
