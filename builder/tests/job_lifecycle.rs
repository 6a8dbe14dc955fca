//! End-to-end job scenarios driven through `JobRunner` with scripted generators.
//!
//! These tests cover the full path from submission to a terminal record:
//! generated files on disk, archive contents, failure capture, backpressure
//! and the per-job reset of the project root.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use builder::core::types::{JobId, JobStatus};
use builder::error::JobError;
use builder::io::archive::ArchiveBuilder;
use builder::io::artifact_store::ArtifactStore;
use builder::io::config::JobsConfig;
use builder::io::generator::Generator;
use builder::job_runner::{JobRunner, MSG_COMPLETED};
use builder::job_store::{InMemoryJobStore, JobStore};
use builder::test_support::{
    Gate, GatedGenerator, Outcome, PromptEchoGenerator, ScriptedGenerator,
    UnserializableGenerator, seed_files, wait_for_count, wait_for_terminal,
};
use serde_json::json;

struct Harness {
    _temp: tempfile::TempDir,
    store: Arc<InMemoryJobStore>,
    artifacts: ArtifactStore,
    runner: JobRunner,
}

impl Harness {
    fn new<G: Generator>(generator: G, config: JobsConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryJobStore::new());
        let artifacts = ArtifactStore::new(temp.path().join("generated_project"));
        let runner = JobRunner::new(store.clone(), artifacts.clone(), generator, config);
        Self {
            _temp: temp,
            store,
            artifacts,
            runner,
        }
    }

    async fn finish(&self, id: &JobId) -> builder::core::types::Job {
        wait_for_terminal(self.store.as_ref(), id).await
    }
}

/// Submit "Build a todo app", wait for completion, then archive what was generated.
#[tokio::test]
async fn todo_app_generation_produces_downloadable_project() {
    let generator = ScriptedGenerator::new(Outcome::Succeed(json!({"summary": "todo app"})))
        .with_file("index.html", "<!DOCTYPE html><title>Todo</title>")
        .with_file("css/style.css", "body { margin: 0; }")
        .with_file("js/app.js", "const todos = [];");
    let h = Harness::new(generator, JobsConfig::default());

    let id = h.runner.submit("Build a todo app", None).expect("submit");
    let job = h.finish(&id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.message, MSG_COMPLETED);
    assert_eq!(job.recursion_limit, 100);
    assert!(job.started_at.is_some());
    assert!(job.completed_at >= job.started_at);

    let listed: BTreeSet<String> = h
        .artifacts
        .list()
        .expect("list")
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    assert_eq!(
        listed,
        BTreeSet::from([
            "css/style.css".to_string(),
            "index.html".to_string(),
            "js/app.js".to_string(),
        ])
    );

    let handle = ArchiveBuilder::new(h.artifacts.clone(), None)
        .build()
        .expect("archive");
    let mut zip = zip::ZipArchive::new(handle.reopen().expect("reopen")).expect("zip");
    let mut archived = BTreeSet::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).expect("entry");
        let mut contents = String::new();
        entry.read_to_string(&mut contents).expect("read");
        if entry.name() == "js/app.js" {
            assert_eq!(contents, "const todos = [];");
        }
        archived.insert(entry.name().to_string());
    }
    assert_eq!(archived, listed);
}

/// N concurrent submissions get N independent records with their own prompts.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_stay_independent() {
    let config = JobsConfig {
        max_concurrent: 4,
        max_pending: 32,
        reset_before_run: false,
        ..JobsConfig::default()
    };
    let h = Harness::new(PromptEchoGenerator, config);

    let ids: Vec<(JobId, String)> = (0..20)
        .map(|i| {
            let prompt = format!("project number {i}");
            let id = h.runner.submit(&prompt, Some(10 + i)).expect("submit");
            (id, prompt)
        })
        .collect();

    let unique: BTreeSet<_> = ids.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(unique.len(), ids.len());

    for (id, prompt) in &ids {
        let job = h.finish(id).await;
        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.expect("result");
        assert_eq!(result["jobId"], id.as_str());
        assert_eq!(result["userPrompt"], prompt.as_str());
        assert_eq!(result["recursionLimit"], job.recursion_limit);
    }
}

#[tokio::test]
async fn generator_failures_are_captured_in_job_state() {
    let h = Harness::new(
        ScriptedGenerator::new(Outcome::Fail("rate limited".to_string())),
        JobsConfig::default(),
    );
    let id = h.runner.submit("p", None).expect("submit");
    let job = h.finish(&id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("rate limited"));
    assert_eq!(job.message, "Error: rate limited");
}

#[tokio::test]
async fn generator_panic_fails_job() {
    let h = Harness::new(
        ScriptedGenerator::new(Outcome::Panic("exploded".to_string())),
        JobsConfig::default(),
    );
    let id = h.runner.submit("p", None).expect("submit");
    let job = h.finish(&id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("error");
    assert!(error.contains("panicked"), "{error}");
    assert!(error.contains("exploded"), "{error}");

    // The runner keeps working after a panic.
    let next = h.runner.submit("again", None).expect("submit");
    assert_eq!(h.finish(&next).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn unserializable_result_fails_job() {
    let h = Harness::new(UnserializableGenerator, JobsConfig::default());
    let id = h.runner.submit("p", None).expect("submit");
    let job = h.finish(&id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    assert!(
        job.error
            .as_deref()
            .is_some_and(|e| e.contains("not serializable"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_queue_rejects_with_busy() {
    let gate = Gate::default();
    let generator = GatedGenerator::new(gate.clone());
    let started = generator.started_counter();
    let config = JobsConfig {
        max_concurrent: 1,
        max_pending: 2,
        reset_before_run: false,
        ..JobsConfig::default()
    };
    let h = Harness::new(generator, config);

    let first = h.runner.submit("one", None).expect("first");
    let second = h.runner.submit("two", None).expect("second");
    wait_for_count(&started, 1).await;

    assert_eq!(
        h.runner.submit("three", None),
        Err(JobError::Busy { capacity: 2 })
    );
    // Only one generator call runs at a time.
    assert_eq!(h.store.get(&second).expect("job").status, JobStatus::Submitted);

    gate.open();
    assert_eq!(h.finish(&first).await.status, JobStatus::Completed);
    assert_eq!(h.finish(&second).await.status, JobStatus::Completed);

    // Slots are released once jobs finish.
    let third = h.runner.submit("three", None).expect("third");
    assert_eq!(h.finish(&third).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn reset_clears_previous_project_before_generation() {
    let generator = ScriptedGenerator::new(Outcome::Succeed(json!({})))
        .with_file("index.html", "<h1>new</h1>")
        .with_delay(Duration::from_millis(20));
    let calls = generator.call_counter();
    let h = Harness::new(generator, JobsConfig::default());
    seed_files(&h.artifacts, &[("old.txt", "stale"), ("old/nested.txt", "stale")]);

    let id = h.runner.submit("fresh project", None).expect("submit");
    assert_eq!(h.finish(&id).await.status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let paths: Vec<String> = h
        .artifacts
        .list()
        .expect("list")
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(paths, vec!["index.html"]);
}

#[tokio::test]
async fn failed_reset_fails_the_job_without_generating() {
    let generator = ScriptedGenerator::new(Outcome::Succeed(json!({})));
    let calls = generator.call_counter();
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("root_is_file");
    std::fs::write(&root, "not a directory").expect("seed file root");
    let store = Arc::new(InMemoryJobStore::new());
    let runner = JobRunner::new(
        store.clone(),
        ArtifactStore::new(root),
        generator,
        JobsConfig::default(),
    );

    let id = runner.submit("any project", None).expect("submit");
    let job = wait_for_terminal(store.as_ref(), &id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("error recorded");
    assert!(error.starts_with("reset project root"), "{error}");
    assert!(job.message.starts_with("Error: "));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_reset_keeps_existing_files() {
    let generator =
        ScriptedGenerator::new(Outcome::Succeed(json!({}))).with_file("index.html", "new");
    let config = JobsConfig {
        reset_before_run: false,
        ..JobsConfig::default()
    };
    let h = Harness::new(generator, config);
    seed_files(&h.artifacts, &[("keep.txt", "kept")]);

    let id = h.runner.submit("p", None).expect("submit");
    assert_eq!(h.finish(&id).await.status, JobStatus::Completed);
    assert_eq!(h.artifacts.read("keep.txt").expect("read"), b"kept");
}

#[tokio::test]
async fn events_follow_each_job_to_its_terminal_status() {
    let h = Harness::new(PromptEchoGenerator, JobsConfig::default());
    let mut events = h.runner.subscribe();

    let a = h.runner.submit("a", None).expect("submit");
    let b = h.runner.submit("b", None).expect("submit");
    h.finish(&a).await;
    h.finish(&b).await;

    let mut last: HashMap<JobId, JobStatus> = HashMap::new();
    while let Ok(event) = events.try_recv() {
        last.insert(event.job_id, event.status);
    }
    assert_eq!(last.get(&a), Some(&JobStatus::Completed));
    assert_eq!(last.get(&b), Some(&JobStatus::Completed));
}
