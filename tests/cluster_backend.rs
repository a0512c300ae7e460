// tests/cluster_backend.rs

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use pipedag::dag::InstanceState;
use pipedag::exec::{ClusterRunner, RetryPolicy};
use pipedag::task::BodyContext;
use pipedag::{execute, ExecMode, ExecuteOptions, PipelineBuilder, PipelineSpec, TaskSpec};
use pipedag_test_utils::fake_cluster::FakeClusterClient;
use pipedag_test_utils::{init_tracing, read_file, with_timeout, write_file};
use tempfile::TempDir;

fn fast_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        retries,
        poll_initial: Duration::from_millis(5),
        poll_max: Duration::from_millis(20),
        queue_timeout: None,
    }
}

fn copy_pipeline() -> PipelineSpec {
    PipelineBuilder::new()
        .task(
            TaskSpec::transform("copy")
                .input("raw/*.txt")
                .output("out/{stem}.txt")
                .mode(ExecMode::Cluster)
                .command(["cp", "{input}", "{output}"]),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn transient_submit_error_is_retried() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "raw/a.txt", "alpha");

    let mut client = FakeClusterClient::failing_first_submits(1);
    client.pending_polls = 2;
    let client = Arc::new(client);
    let runner = ClusterRunner::new(client.clone(), fast_policy(2));

    let summary = with_timeout(execute(
        copy_pipeline(),
        ExecuteOptions::new(dir.path()).cluster(runner),
    ))
    .await
    .unwrap();

    assert!(summary.is_success(), "{summary}");
    assert_eq!(client.submitted().len(), 2);
    assert_eq!(client.submitted()[0].name, "copy-0");
    assert_eq!(read_file(dir.path(), "out/a.txt"), "alpha");
}

#[tokio::test]
async fn exhausted_retries_fail_the_instance() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "raw/a.txt", "alpha");

    let client = Arc::new(FakeClusterClient::failing_first_submits(10));
    let runner = ClusterRunner::new(client.clone(), fast_policy(1));

    let summary = with_timeout(execute(
        copy_pipeline(),
        ExecuteOptions::new(dir.path()).cluster(runner),
    ))
    .await
    .unwrap();

    let report = summary.of_task("copy").next().unwrap();
    assert_eq!(report.state, InstanceState::Failed);
    assert!(report.detail.as_deref().unwrap().contains("gave up after 2 attempts"));
    assert_eq!(client.submitted().len(), 2);
    assert!(!dir.path().join("out/a.txt").exists());
}

#[tokio::test]
async fn failing_job_is_not_retried() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "in.txt", "x");
    let pipeline = PipelineBuilder::new()
        .task(
            TaskSpec::merge("fails")
                .input("in.txt")
                .output("never.txt")
                .mode(ExecMode::Cluster)
                .command(["false"]),
        )
        .build()
        .unwrap();

    let client = Arc::new(FakeClusterClient::new());
    let runner = ClusterRunner::new(client.clone(), fast_policy(3));
    let summary = with_timeout(execute(pipeline, ExecuteOptions::new(dir.path()).cluster(runner)))
        .await
        .unwrap();

    assert_eq!(summary.count(InstanceState::Failed), 1);
    assert_eq!(client.submitted().len(), 1);
}

#[tokio::test]
async fn local_flag_bypasses_the_cluster() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "raw/a.txt", "alpha");

    let client = Arc::new(FakeClusterClient::new());
    let runner = ClusterRunner::new(client.clone(), fast_policy(0));
    let summary = with_timeout(execute(
        copy_pipeline(),
        ExecuteOptions::new(dir.path()).cluster(runner).force_local(true),
    ))
    .await
    .unwrap();

    assert!(summary.is_success(), "{summary}");
    assert!(client.submitted().is_empty());
    assert_eq!(read_file(dir.path(), "out/a.txt"), "alpha");
}

#[tokio::test]
async fn native_body_in_cluster_mode_runs_locally() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "in.txt", "x");
    let pipeline = PipelineBuilder::new()
        .task(
            TaskSpec::merge("native")
                .input("in.txt")
                .output("out.txt")
                .mode(ExecMode::Cluster)
                .native(|ctx: &BodyContext| {
                    std::fs::write(ctx.output().unwrap(), "local")?;
                    Ok(())
                }),
        )
        .build()
        .unwrap();

    let client = Arc::new(FakeClusterClient::new());
    let runner = ClusterRunner::new(client.clone(), fast_policy(0));
    let summary = with_timeout(execute(pipeline, ExecuteOptions::new(dir.path()).cluster(runner)))
        .await
        .unwrap();

    assert!(summary.is_success(), "{summary}");
    assert!(client.submitted().is_empty());
    assert_eq!(read_file(dir.path(), "out.txt"), "local");
}
