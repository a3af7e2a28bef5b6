//! External collaborators the hub calls out to but does not implement
//! itself (§6: "this repository defines their message shapes and dispatches
//! them, but treats the actual git/filesystem walking as a thin, swappable
//! external call behind a small trait"), following the same pattern as
//! `AgentManager`'s `WorktreeProvisioner`: a small trait with a real
//! implementation and a no-op stand-in for tests.

use std::path::Path;

use async_trait::async_trait;

use crate::wire::{FileExplorerEntryWire, FileExplorerModeWire, FileExplorerResultWire, GitRepoInfoWire};

/// Git-repo inspection the hub needs for `git_repo_info_request` and
/// `git_diff_request`. A real implementation shells out to `git`; tests and
/// a bare CLI run can supply a no-op.
#[async_trait]
pub trait GitInspector: Send + Sync {
    async fn repo_info(&self, cwd: &Path) -> anyhow::Result<GitRepoInfoWire>;
    async fn diff(&self, cwd: &Path) -> anyhow::Result<String>;
}

/// Directory/file access for `file_explorer_request`.
#[async_trait]
pub trait FileExplorer: Send + Sync {
    async fn list(&self, path: &Path) -> anyhow::Result<Vec<FileExplorerEntryWire>>;
    async fn read(&self, path: &Path) -> anyhow::Result<String>;
}

pub async fn explore(explorer: &dyn FileExplorer, path: &Path, mode: FileExplorerModeWire) -> anyhow::Result<FileExplorerResultWire> {
    match mode {
        FileExplorerModeWire::List => Ok(FileExplorerResultWire::Listing { entries: explorer.list(path).await? }),
        FileExplorerModeWire::File => Ok(FileExplorerResultWire::File { content: explorer.read(path).await? }),
    }
}

/// No-op collaborators: `git_repo_info_request`/`git_diff_request` report
/// "not a repo"/empty, `file_explorer_request` reports empty listings. Used
/// where no real git binary or filesystem walk is wired in (tests, a bare
/// daemon run with these endpoints unused).
pub struct NoopGitInspector;

#[async_trait]
impl GitInspector for NoopGitInspector {
    async fn repo_info(&self, _cwd: &Path) -> anyhow::Result<GitRepoInfoWire> {
        Ok(GitRepoInfoWire { is_repo: false, branch: None })
    }

    async fn diff(&self, _cwd: &Path) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Walks the real filesystem: `list` reads a directory's immediate entries,
/// `file` reads a file's contents as UTF-8.
pub struct LocalFileExplorer;

#[async_trait]
impl FileExplorer for LocalFileExplorer {
    async fn list(&self, path: &Path) -> anyhow::Result<Vec<FileExplorerEntryWire>> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            out.push(FileExplorerEntryWire { name, is_dir });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read(&self, path: &Path) -> anyhow::Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_file_explorer_lists_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

        let explorer = LocalFileExplorer;
        let entries = explorer.list(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "a.txt" && !e.is_dir));
        assert!(entries.iter().any(|e| e.name == "sub" && e.is_dir));

        let content = explorer.read(&dir.path().join("a.txt")).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn noop_git_inspector_reports_not_a_repo() {
        let inspector = NoopGitInspector;
        let info = inspector.repo_info(Path::new("/tmp")).await.unwrap();
        assert!(!info.is_repo);
        assert!(info.branch.is_none());
    }
}
