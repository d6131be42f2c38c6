/// End-to-end engine tests over a scripted command runner
use anyhow::Result;
use async_trait::async_trait;
use diff_context::instrumentation::HealthStatus;
use diff_context::validation::REDACTION;
use diff_context::{
    CommandRunner, Config, DiffEngine, DiffError, DiffScope, FetchError, NO_CHANGES_MARKER,
    ResolveOptions, Strategy, ValidationMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Change {
    staged: bool,
    path: String,
    text: String,
}

/// Answers the handful of git queries the engine issues, from an in-memory
/// changeset
struct ScriptedRepo {
    root: String,
    changes: Vec<Change>,
    not_a_repo: bool,
    path_query_delay: Option<Duration>,
    fail_once_for: Mutex<Option<String>>,
    calls: AtomicUsize,
    path_queries: AtomicUsize,
}

impl ScriptedRepo {
    fn new(root: &TempDir) -> Self {
        Self {
            root: root.path().to_string_lossy().into_owned(),
            changes: Vec::new(),
            not_a_repo: false,
            path_query_delay: None,
            fail_once_for: Mutex::new(None),
            calls: AtomicUsize::new(0),
            path_queries: AtomicUsize::new(0),
        }
    }

    fn change(mut self, staged: bool, path: &str, text: String) -> Self {
        self.changes.push(Change {
            staged,
            path: path.to_string(),
            text,
        });
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn path_queries(&self) -> usize {
        self.path_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRepo {
    async fn run(&self, args: &[String], _timeout: Duration) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.not_a_repo {
            return Err(FetchError::NotARepository(self.root.clone()));
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["rev-parse", "--show-toplevel"] => return Ok(format!("{}\n", self.root)),
            ["rev-parse", "--abbrev-ref", "HEAD"] => return Ok("main\n".to_string()),
            ["diff", ..] => {}
            other => {
                return Err(FetchError::Failed {
                    command: other.join(" "),
                    code: Some(129),
                    stderr: "unknown query".to_string(),
                });
            }
        }

        let staged = args.contains(&"--cached");
        let name_only = args.contains(&"--name-only");
        let terminator = if args.contains(&"-z") { '\0' } else { '\n' };
        let filter: Option<Vec<&str>> = args
            .iter()
            .position(|a| *a == "--")
            .map(|i| args[i + 1..].to_vec());

        if let Some(paths) = &filter {
            self.path_queries.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.path_query_delay {
                tokio::time::sleep(delay).await;
            }
            let mut fail = self.fail_once_for.lock().unwrap();
            if fail.as_deref().is_some_and(|p| paths.contains(&p)) {
                *fail = None;
                return Err(FetchError::Failed {
                    command: args.join(" "),
                    code: Some(128),
                    stderr: "index.lock exists".to_string(),
                });
            }
        }

        let selected = self.changes.iter().filter(|c| {
            c.staged == staged
                && filter
                    .as_ref()
                    .is_none_or(|paths| paths.contains(&c.path.as_str()))
        });
        let mut out = String::new();
        for change in selected {
            if name_only {
                out.push_str(&change.path);
                out.push(terminator);
            } else {
                out.push_str(&change.text);
            }
        }
        Ok(out)
    }
}

fn text_fragment(path: &str, lines: usize, width: usize) -> String {
    let mut text = format!(
        "diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n@@ -1,{lines} +1,{lines} @@\n"
    );
    for i in 0..lines {
        let line = format!("+{} line {}", path, i);
        text.push_str(&format!("{:<width$}\n", line, width = width));
    }
    text
}

fn binary_fragment(path: &str) -> String {
    format!(
        "diff --git a/{path} b/{path}\nnew file mode 100644\nBinary files /dev/null and b/{path} differ\n"
    )
}

fn write_file(dir: &TempDir, path: &str, contents: &[u8]) {
    let full = dir.path().join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, contents).unwrap();
}

fn engine(repo: &Arc<ScriptedRepo>) -> DiffEngine {
    engine_with(repo, Config::default())
}

fn engine_with(repo: &Arc<ScriptedRepo>, config: Config) -> DiffEngine {
    let runner: Arc<dyn CommandRunner> = repo.clone();
    DiffEngine::with_runner(runner, config)
}

/// Ten text files of roughly 1 KiB each, half staged and half unstaged
fn medium_repo(dir: &TempDir) -> ScriptedRepo {
    let mut repo = ScriptedRepo::new(dir);
    for i in 0..10 {
        let path = format!("src/mod_{}.rs", i);
        let text = text_fragment(&path, 16, 60);
        write_file(dir, &path, text.as_bytes());
        repo = repo.change(i % 2 == 0, &path, text);
    }
    repo
}

#[tokio::test]
async fn test_empty_changeset_reports_no_changes() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(ScriptedRepo::new(&dir));
    let engine = engine(&repo);

    let text = engine.get_diff(DiffScope::Both, 1024).await?;
    assert_eq!(text, NO_CHANGES_MARKER);
    Ok(())
}

#[tokio::test]
async fn test_small_diff_returned_unchanged() -> Result<()> {
    let dir = TempDir::new()?;
    let fragment = text_fragment("a.rs", 3, 10);
    write_file(&dir, "a.rs", b"fn main() {}\n");
    let repo = Arc::new(ScriptedRepo::new(&dir).change(true, "a.rs", fragment.clone()));
    let engine = engine(&repo);

    let summary = engine
        .get_diff_with(
            DiffScope::Staged,
            ResolveOptions::new(4096),
            &CancellationToken::new(),
        )
        .await?;
    assert!(summary.fast_path);
    assert_eq!(summary.text, fragment);
    assert_eq!(summary.omitted_chunks, 0);
    Ok(())
}

#[tokio::test]
async fn test_repeated_queries_are_served_from_cache() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(medium_repo(&dir));
    let engine = engine(&repo);

    let first = engine.get_diff(DiffScope::Both, 64 * 1024).await?;
    let calls_after_first = repo.calls();
    assert!(calls_after_first > 0);

    let second = engine.get_diff(DiffScope::Both, 64 * 1024).await?;
    assert_eq!(first, second);
    assert_eq!(repo.calls(), calls_after_first);

    let stats = engine.cache_stats();
    assert!(stats.hits >= calls_after_first as u64);
    assert!(stats.hit_rate() > 0.0);

    engine.clear_cache();
    let cleared = engine.cache_stats();
    assert_eq!(cleared.hits, 0);
    assert_eq!(cleared.misses, 0);
    assert_eq!(cleared.entries, 0);

    engine.get_diff(DiffScope::Both, 64 * 1024).await?;
    assert_eq!(repo.calls(), calls_after_first * 2);
    Ok(())
}

#[tokio::test]
async fn test_mixed_changeset_ranks_docs_first_and_lists_binaries() -> Result<()> {
    let dir = TempDir::new()?;
    let a = text_fragment("a.py", 28, 72);
    let b = text_fragment("readme/b.md", 14, 72);
    write_file(&dir, "a.py", a.as_bytes());
    write_file(&dir, "readme/b.md", b.as_bytes());
    write_file(&dir, "image.png", &vec![0u8; 5 * 1024 * 1024]);

    let repo = Arc::new(
        ScriptedRepo::new(&dir)
            .change(true, "a.py", a)
            .change(true, "image.png", binary_fragment("image.png"))
            .change(true, "readme/b.md", b),
    );
    let engine = engine(&repo);

    let summary = engine
        .get_diff_with(
            DiffScope::Staged,
            ResolveOptions::new(3000),
            &CancellationToken::new(),
        )
        .await?;

    assert!(!summary.fast_path);
    assert!(summary.text.len() <= 3000);

    let first_paths: Vec<Option<&str>> = summary.chunks[0]
        .parts
        .iter()
        .map(|p| p.path.as_deref())
        .collect();
    assert_eq!(first_paths[0], Some("readme/b.md"));

    let binary_line = "image.png (5242880 bytes) — binary, not shown";
    assert!(summary.text.contains(binary_line));
    assert!(summary.text.contains("a.py"));
    assert!(summary.chunks.iter().any(|c| c.text().contains(binary_line)));
    Ok(())
}

#[tokio::test]
async fn test_sequential_and_parallel_produce_identical_output() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(
        medium_repo(&dir)
            .change(false, "src/mod_0.rs", text_fragment("src/mod_0.rs", 4, 40)),
    );

    for max_size in [2048, 64 * 1024] {
        let sequential = engine(&repo)
            .get_diff_with(
                DiffScope::Both,
                ResolveOptions::new(max_size).with_strategy(Strategy::Sequential),
                &CancellationToken::new(),
            )
            .await?;
        let parallel = engine(&repo)
            .get_diff_with(
                DiffScope::Both,
                ResolveOptions::new(max_size)
                    .with_strategy(Strategy::Parallel)
                    .with_max_workers(3),
                &CancellationToken::new(),
            )
            .await?;

        assert_eq!(sequential.text, parallel.text, "max_size {}", max_size);
        assert_eq!(sequential.chunks, parallel.chunks, "max_size {}", max_size);
    }
    Ok(())
}

fn deleted_fragment(path: &str) -> String {
    format!(
        "diff --git a/{path} b/{path}\ndeleted file mode 100644\nindex 1111111..0000000\n--- a/{path}\n+++ /dev/null\n@@ -1 +0,0 @@\n-fn gone() {{}}\n"
    )
}

#[tokio::test]
async fn test_strategies_agree_on_deletions_and_unusual_names() -> Result<()> {
    let dir = TempDir::new()?;
    let quoted = "diff --git \"a/say\\\"hi\\\".txt\" \"b/say\\\"hi\\\".txt\"\n\
new file mode 100644\n\
--- /dev/null\n\
+++ \"b/say\\\"hi\\\".txt\"\n\
@@ -0,0 +1 @@\n\
+hi\n";
    let mut repo = ScriptedRepo::new(&dir)
        .change(true, "café.rs", text_fragment("café.rs", 12, 40))
        .change(true, "gone.rs", deleted_fragment("gone.rs"))
        .change(true, "new.rs", text_fragment("new.rs", 12, 40))
        .change(true, "old.rs", deleted_fragment("old.rs"))
        .change(true, "say\"hi\".txt", quoted.to_string());
    for i in 0..4 {
        let path = format!("src/mod_{}.rs", i);
        let text = text_fragment(&path, 12, 40);
        write_file(&dir, &path, text.as_bytes());
        repo = repo.change(i % 2 == 0, &path, text);
    }
    write_file(&dir, "café.rs", b"fn cafe() {}\n");
    write_file(&dir, "new.rs", b"fn moved() {}\n");
    write_file(&dir, "say\"hi\".txt", b"hi\n");
    let repo = Arc::new(repo);

    let mut outputs = Vec::new();
    for strategy in [Strategy::Sequential, Strategy::Incremental, Strategy::Parallel] {
        let summary = engine(&repo)
            .get_diff_with(
                DiffScope::Both,
                ResolveOptions::new(64 * 1024)
                    .with_strategy(strategy)
                    .with_batch_size(2)
                    .with_max_workers(3),
                &CancellationToken::new(),
            )
            .await?;
        outputs.push((strategy, summary.text));
    }

    let (_, expected) = &outputs[0];
    for path in ["café.rs", "gone.rs", "old.rs", "new.rs", "+++ \"b/say"] {
        assert!(expected.contains(path), "missing {}", path);
    }
    for (strategy, text) in &outputs[1..] {
        assert_eq!(text, expected, "strategy {}", strategy);
    }
    Ok(())
}

#[tokio::test]
async fn test_incremental_stops_once_budget_is_exceeded() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(medium_repo(&dir));
    let engine = engine(&repo);

    let summary = engine
        .get_diff_with(
            DiffScope::Both,
            ResolveOptions::new(3000)
                .with_strategy(Strategy::Incremental)
                .with_batch_size(2),
            &CancellationToken::new(),
        )
        .await?;

    // One query per scope part per batch; two batches of ~1 KiB files exceed the budget
    assert_eq!(repo.path_queries(), 4);
    assert!(summary.text.len() <= 3000);
    for i in 0..10 {
        assert!(
            summary.text.contains(&format!("src/mod_{}.rs", i)),
            "manifest is missing src/mod_{}.rs",
            i
        );
    }

    let report = engine.health_report();
    assert_eq!(report.metrics.incremental_runs, 1);
    assert_eq!(report.metrics.batches_fetched, 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_parallel_batch_is_retried_once() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(medium_repo(&dir));
    *repo.fail_once_for.lock().unwrap() = Some("src/mod_3.rs".to_string());

    let expected = engine(&Arc::new(medium_repo(&TempDir::new()?)))
        .get_diff(DiffScope::Both, 64 * 1024)
        .await?;

    let engine = engine(&repo);
    let summary = engine
        .get_diff_with(
            DiffScope::Both,
            ResolveOptions::new(64 * 1024)
                .with_strategy(Strategy::Parallel)
                .with_max_workers(2),
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(engine.health_report().metrics.worker_retries, 1);
    assert_eq!(summary.text, expected);
    assert!(summary.text.contains("src/mod_3.rs line 15"));
    Ok(())
}

#[tokio::test]
async fn test_precancelled_token_returns_cancelled() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(medium_repo(&dir));
    let engine = engine(&repo);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine
        .get_diff_with(DiffScope::Both, ResolveOptions::new(4096), &cancel)
        .await;

    assert!(matches!(result, Err(DiffError::Cancelled)));
    assert_eq!(repo.calls(), 0);
    assert_eq!(engine.health_report().metrics.cancelled, 1);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_interrupts_parallel_workers() -> Result<()> {
    let dir = TempDir::new()?;
    let mut repo = medium_repo(&dir);
    repo.path_query_delay = Some(Duration::from_secs(30));
    let repo = Arc::new(repo);
    let engine = engine(&repo);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.get_diff_with(
            DiffScope::Both,
            ResolveOptions::new(4096).with_strategy(Strategy::Parallel),
            &cancel,
        ),
    )
    .await?;

    assert!(matches!(result, Err(DiffError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn test_not_a_repository_propagates_and_degrades_health() -> Result<()> {
    let dir = TempDir::new()?;
    let mut repo = ScriptedRepo::new(&dir);
    repo.not_a_repo = true;
    let repo = Arc::new(repo);
    let engine = engine(&repo);

    let result = engine.get_diff(DiffScope::Staged, 4096).await;
    assert!(matches!(
        result,
        Err(DiffError::Fetch(FetchError::NotARepository(_)))
    ));

    let report = engine.health_report();
    assert_eq!(report.metrics.requests, 1);
    assert_eq!(report.metrics.failed_requests, 1);
    assert_eq!(report.status, HealthStatus::Degraded);
    Ok(())
}

#[tokio::test]
async fn test_budget_too_small_for_manifest() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(medium_repo(&dir));
    let engine = engine(&repo);

    let result = engine.get_diff(DiffScope::Both, 64).await;
    match result {
        Err(DiffError::SizeBudgetUnsatisfiable { required, budget }) => {
            assert_eq!(budget, 64);
            assert!(required > budget);
        }
        other => panic!("expected SizeBudgetUnsatisfiable, got {:?}", other),
    }
    Ok(())
}

fn leaky_repo(dir: &TempDir) -> ScriptedRepo {
    let text = format!(
        "diff --git a/.env b/.env\n--- a/.env\n+++ b/.env\n@@ -0,0 +1 @@\n+OPENAI_API_KEY=sk-{}\n",
        "a".repeat(40)
    );
    write_file(dir, ".env", b"OPENAI_API_KEY=...\n");
    ScriptedRepo::new(dir).change(true, ".env", text)
}

#[tokio::test]
async fn test_lenient_validation_redacts_secrets() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(leaky_repo(&dir));
    let engine = engine(&repo);
    assert_eq!(engine.config().validation.mode, ValidationMode::Lenient);

    let text = engine.get_diff(DiffScope::Staged, 4096).await?;
    assert!(text.contains(REDACTION));
    assert!(!text.contains("sk-aaaa"));
    assert_eq!(engine.health_report().metrics.redactions, 1);
    Ok(())
}

#[tokio::test]
async fn test_strict_validation_rejects_secrets() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(leaky_repo(&dir));
    let mut config = Config::default();
    config.validation.mode = ValidationMode::Strict;
    let engine = engine_with(&repo, config);

    let result = engine.get_diff(DiffScope::Staged, 4096).await;
    assert!(matches!(result, Err(DiffError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn test_validation_off_passes_text_through() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(leaky_repo(&dir));
    let mut config = Config::default();
    config.validation.mode = ValidationMode::Off;
    let engine = engine_with(&repo, config);

    let text = engine.get_diff(DiffScope::Staged, 4096).await?;
    assert!(text.contains("sk-aaaa"));
    Ok(())
}

#[tokio::test]
async fn test_current_branch() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = Arc::new(ScriptedRepo::new(&dir));
    let engine = engine(&repo);

    assert_eq!(engine.current_branch().await?, "main");
    Ok(())
}
