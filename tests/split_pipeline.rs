// tests/split_pipeline.rs

use std::fs;
use std::sync::Arc;

use pipedag::dag::{DeferredState, InstanceState};
use pipedag::engine::summary::DeferredReport;
use pipedag::ledger::MemoryLedger;
use pipedag::task::BodyContext;
use pipedag::{execute, ExecuteOptions, PipelineBuilder, PipelineSpec, TaskSpec};
use pipedag_test_utils::{init_tracing, read_file, with_timeout, write_file};
use tempfile::TempDir;

/// words.txt --split--> chunks/*.word --count--> counts/{stem}.n --sum--> total.txt
fn pipeline(fail_split: bool) -> PipelineSpec {
    PipelineBuilder::new()
        .task(
            TaskSpec::split("split")
                .input("words.txt")
                .output("chunks/*.word")
                .native(move |ctx: &BodyContext| {
                    if fail_split {
                        anyhow::bail!("splitter crashed");
                    }
                    let dir = ctx.output_dir.as_ref().unwrap();
                    for word in fs::read_to_string(ctx.input().unwrap())?.split_whitespace() {
                        fs::write(dir.join(format!("{word}.word")), word)?;
                    }
                    Ok(())
                }),
        )
        .task(
            TaskSpec::transform("count")
                .from_task("split")
                .output("counts/{stem}.n")
                .native(|ctx: &BodyContext| {
                    let word = fs::read_to_string(ctx.input().unwrap())?;
                    fs::write(ctx.output().unwrap(), word.len().to_string())?;
                    Ok(())
                }),
        )
        .task(
            TaskSpec::merge("sum")
                .from_task("count")
                .output("total.txt")
                .native(|ctx: &BodyContext| {
                    let mut total = 0usize;
                    for input in &ctx.inputs {
                        total += fs::read_to_string(input)?.trim().parse::<usize>()?;
                    }
                    fs::write(ctx.output().unwrap(), total.to_string())?;
                    Ok(())
                }),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn consumers_of_a_split_resolve_after_it_runs() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "words.txt", "one three seven");
    let ledger = Arc::new(MemoryLedger::new());

    let summary = with_timeout(execute(
        pipeline(false),
        ExecuteOptions::new(dir.path()).ledger(ledger.clone()).concurrency(3),
    ))
    .await
    .unwrap();

    assert!(summary.is_success(), "{summary}");
    assert_eq!(summary.of_task("count").count(), 3);
    assert_eq!(read_file(dir.path(), "total.txt"), "13");

    let again = with_timeout(execute(pipeline(false), ExecuteOptions::new(dir.path()).ledger(ledger)))
        .await
        .unwrap();
    assert_eq!(again.executed(), 0, "{again}");
}

#[tokio::test]
async fn split_without_ledger_entries_runs_again() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "words.txt", "a bb");
    // Leftovers of an earlier, interrupted split.
    write_file(dir.path(), "chunks/zzz.word", "zzz");

    let summary = with_timeout(execute(pipeline(false), ExecuteOptions::new(dir.path())))
        .await
        .unwrap();
    assert!(summary.is_success(), "{summary}");
    assert!(!dir.path().join("chunks/zzz.word").exists());
    assert_eq!(read_file(dir.path(), "total.txt"), "3");
}

#[tokio::test]
async fn failed_split_cancels_its_deferred_consumers() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "words.txt", "one two");

    let summary = with_timeout(execute(pipeline(true), ExecuteOptions::new(dir.path())))
        .await
        .unwrap();

    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.of_task("split").next().unwrap().state, InstanceState::Failed);
    assert_eq!(summary.of_task("count").count(), 0);
    assert!(summary.deferred.contains(&DeferredReport {
        task: "count".into(),
        state: DeferredState::Cancelled,
    }));
    assert!(!dir.path().join("total.txt").exists());
}
