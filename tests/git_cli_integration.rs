/// Tests against a real `git` binary in a temporary repository
///
/// Skipped when `git` is not on PATH.
use anyhow::Result;
use diff_context::{
    Config, DiffEngine, DiffError, DiffScope, FetchError, NO_CHANGES_MARKER, ResolveOptions,
    Strategy,
};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .status()
        .expect("git should run");
    assert!(status.success(), "git {:?} failed", args);
}

fn init_repo() -> Result<TempDir> {
    let dir = TempDir::new()?;
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["config", "user.email", "dev@example.com"]);
    git(dir.path(), &["config", "user.name", "Dev"]);
    Ok(dir)
}

#[tokio::test]
async fn test_staged_and_unstaged_changes() -> Result<()> {
    if !git_available() {
        eprintln!("git not found, skipping");
        return Ok(());
    }
    let dir = init_repo()?;
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n")?;
    git(dir.path(), &["add", "main.rs"]);

    let engine = DiffEngine::with_config(dir.path(), Config::default());

    let staged = engine.get_diff(DiffScope::Staged, 16 * 1024).await?;
    assert!(staged.contains("diff --git a/main.rs b/main.rs"));
    assert!(staged.contains("+fn main() {}"));

    let unstaged = engine.get_diff(DiffScope::Unstaged, 16 * 1024).await?;
    assert_eq!(unstaged, NO_CHANGES_MARKER);

    std::fs::write(
        dir.path().join("main.rs"),
        "fn main() {\n    println!(\"hi\");\n}\n",
    )?;
    engine.clear_cache();

    let both = engine.get_diff(DiffScope::Both, 16 * 1024).await?;
    assert!(both.contains("+fn main() {}"));
    assert!(both.contains("println!"));
    Ok(())
}

#[tokio::test]
async fn test_current_branch_after_commit() -> Result<()> {
    if !git_available() {
        eprintln!("git not found, skipping");
        return Ok(());
    }
    let dir = init_repo()?;
    std::fs::write(dir.path().join("README.md"), "# demo\n")?;
    git(dir.path(), &["add", "README.md"]);
    git(dir.path(), &["commit", "--quiet", "-m", "init"]);
    git(dir.path(), &["checkout", "--quiet", "-b", "feature/chunking"]);

    let engine = DiffEngine::with_config(dir.path(), Config::default());
    assert_eq!(engine.current_branch().await?, "feature/chunking");
    assert_eq!(
        engine.get_diff(DiffScope::Both, 1024).await?,
        NO_CHANGES_MARKER
    );
    Ok(())
}

#[tokio::test]
async fn test_outside_repository() -> Result<()> {
    if !git_available() {
        eprintln!("git not found, skipping");
        return Ok(());
    }
    let dir = TempDir::new()?;
    // A temp dir nested in a work tree resolves to that repository
    if Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir.path())
        .output()?
        .status
        .success()
    {
        eprintln!("temp dir is inside a git work tree, skipping");
        return Ok(());
    }

    let engine = DiffEngine::with_config(dir.path(), Config::default());
    let result = engine.get_diff(DiffScope::Staged, 1024).await;
    assert!(matches!(
        result,
        Err(DiffError::Fetch(FetchError::NotARepository(_)))
    ));
    Ok(())
}

/// Source text long enough for rename detection to pair the two paths
fn module_source(name: &str) -> String {
    (0..40)
        .map(|i| format!("pub fn {}_{}() -> usize {{ {} }}\n", name, i, i))
        .collect()
}

#[tokio::test]
async fn test_strategies_agree_on_renames_deletions_and_non_ascii_paths() -> Result<()> {
    if !git_available() {
        eprintln!("git not found, skipping");
        return Ok(());
    }
    let dir = init_repo()?;
    let root = dir.path();
    std::fs::write(root.join("old.rs"), module_source("old"))?;
    std::fs::write(root.join("b.rs"), module_source("b"))?;
    std::fs::write(root.join("gone.rs"), module_source("gone"))?;
    git(root, &["add", "."]);
    git(root, &["commit", "--quiet", "-m", "init"]);

    git(root, &["mv", "old.rs", "new.rs"]);
    std::fs::write(root.join("b.rs"), module_source("b2"))?;
    git(root, &["add", "b.rs"]);
    git(root, &["rm", "--quiet", "gone.rs"]);
    std::fs::write(root.join("café.rs"), "fn cafe() {}\n")?;
    std::fs::write(root.join("notes [draft].md"), "# draft\n")?;
    git(root, &["add", "café.rs", "notes [draft].md"]);
    std::fs::write(root.join("b.rs"), module_source("b3"))?;

    for scope in [DiffScope::Staged, DiffScope::Both] {
        let mut outputs = Vec::new();
        for strategy in [Strategy::Sequential, Strategy::Incremental, Strategy::Parallel] {
            let engine = DiffEngine::with_config(root, Config::default());
            let summary = engine
                .get_diff_with(
                    scope,
                    ResolveOptions::new(1024 * 1024)
                        .with_strategy(strategy)
                        .with_batch_size(2)
                        .with_max_workers(3),
                    &CancellationToken::new(),
                )
                .await?;
            outputs.push((strategy, summary.text));
        }

        let (_, expected) = &outputs[0];
        assert!(expected.contains("diff --git a/café.rs b/café.rs"), "{}", expected);
        assert!(expected.contains("diff --git a/old.rs b/old.rs\ndeleted file mode"));
        assert!(expected.contains("diff --git a/new.rs b/new.rs\nnew file mode"));
        assert!(expected.contains("diff --git a/gone.rs b/gone.rs\ndeleted file mode"));
        assert!(expected.contains("+# draft"));
        assert!(!expected.contains("rename from"));
        for (strategy, text) in &outputs[1..] {
            assert_eq!(text, expected, "scope {} strategy {}", scope, strategy);
        }
    }
    Ok(())
}
