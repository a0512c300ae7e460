// tests/error_handling.rs

use pipedag::config::{load_and_validate, pipeline_from_config};
use pipedag::dag::InstanceState;
use pipedag::errors::PipedagError;
use pipedag::task::BodyContext;
use pipedag::{execute, ExecuteOptions, ParameterSet, PipelineBuilder, TaskSpec};
use pipedag_test_utils::builders::{write_pipeline, ConfigFileBuilder, TaskConfigBuilder};
use pipedag_test_utils::{init_tracing, with_timeout, write_file};
use tempfile::TempDir;

#[test]
fn inferred_cycle_returns_structured_error() {
    let dir = TempDir::new().unwrap();
    let path = write_pipeline(
        dir.path(),
        r#"
[task.A]
kind = "transform"
input = "b/*.txt"
output = "a/{stem}.txt"
cmd = ["cp", "{input}", "{output}"]

[task.B]
kind = "transform"
input = "a/*.txt"
output = "b/{stem}.txt"
cmd = ["cp", "{input}", "{output}"]
"#,
    );

    let cfg = load_and_validate(&path).unwrap();
    match pipeline_from_config(&cfg) {
        Err(err @ PipedagError::CycleDetected(_)) => {
            assert_eq!(err.exit_code(), 2);
            assert_eq!(err.to_string(), "Cycle detected between tasks: A, B");
        }
        other => panic!("Expected CycleDetected, got {other:?}"),
    }
}

#[test]
fn unknown_reference_is_a_config_error() {
    let raw = ConfigFileBuilder::new()
        .with_task(
            "M",
            TaskConfigBuilder::merge(&["true"]).from_task("nope").output("m.txt").build(),
        )
        .raw();
    match pipedag::config::ConfigFile::try_from(raw) {
        Err(PipedagError::ConfigError(msg)) => assert!(msg.contains("nope")),
        other => panic!("Expected ConfigError, got {other:?}"),
    }
}

#[test]
fn two_tasks_claiming_one_output_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_task("A", TaskConfigBuilder::merge(&["true"]).input("x").output("same.txt").build())
        .with_task("B", TaskConfigBuilder::merge(&["true"]).input("y").output("same.txt").build())
        .build();
    match pipeline_from_config(&cfg) {
        Err(PipedagError::PatternResolution(msg)) => assert!(msg.contains("same.txt")),
        other => panic!("Expected PatternResolution, got {other:?}"),
    }
}

#[test]
fn regex_on_merge_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_task(
            "M",
            TaskConfigBuilder::merge(&["true"])
                .input("raw/*.txt")
                .regex(r"(\w+)\.txt")
                .output("m.txt")
                .build(),
        )
        .build();
    assert!(matches!(pipeline_from_config(&cfg), Err(PipedagError::ConfigError(_))));
}

#[tokio::test]
async fn unknown_target_is_task_not_found() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "in.txt", "x");
    let pipeline = PipelineBuilder::new()
        .task(TaskSpec::merge("M").input("in.txt").output("m.txt").command(["true"]))
        .build()
        .unwrap();

    let err = execute(pipeline, ExecuteOptions::new(dir.path()).target("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipedagError::TaskNotFound(ref t) if t == "ghost"));
}

#[tokio::test]
async fn missing_parameter_fails_only_that_instance() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "in.txt", "x");
    let pipeline = PipelineBuilder::new()
        .task(
            TaskSpec::merge("M")
                .input("in.txt")
                .output("m.txt")
                .command(["tool", "--k={param:kmer}", "{input}"]),
        )
        .task(
            TaskSpec::merge("N")
                .input("in.txt")
                .output("n.txt")
                .native(|ctx: &BodyContext| {
                    std::fs::write(ctx.output().unwrap(), ctx.param("threads")?)?;
                    Ok(())
                }),
        )
        .build()
        .unwrap();

    let params = ParameterSet::from_pairs([("threads", "4")]);
    let summary = with_timeout(execute(pipeline, ExecuteOptions::new(dir.path()).params(params)))
        .await
        .unwrap();

    let m = summary.of_task("M").next().unwrap();
    assert_eq!(m.state, InstanceState::Failed);
    assert!(m.detail.as_deref().unwrap().contains("kmer"), "{m:?}");
    assert_eq!(summary.of_task("N").next().unwrap().state, InstanceState::Succeeded);
    assert_eq!(std::fs::read_to_string(dir.path().join("n.txt")).unwrap(), "4");
}
