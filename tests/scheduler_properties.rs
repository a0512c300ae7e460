// tests/scheduler_properties.rs

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use pipedag::dag::{InstanceState, ResolveContext, Scheduler, ScheduledInstance};
use pipedag::engine::InstanceOutcome;
use pipedag::fs::mock::MockFileSystem;
use pipedag::ledger::MemoryLedger;
use pipedag::{PipelineBuilder, PipelineSpec, TaskSpec};
use proptest::prelude::*;

/// Random acyclic pipelines: task `i` reads the outputs of some tasks `< i`,
/// and tasks without upstreams read `src.txt`.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_tasks).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        }
                    })
                    .collect()
            },
        )
    })
}

fn name(i: usize) -> String {
    format!("task_{i}")
}

fn build_pipeline(deps: &[BTreeSet<usize>]) -> PipelineSpec {
    let mut builder = PipelineBuilder::new();
    for (i, upstream) in deps.iter().enumerate() {
        let mut decl = TaskSpec::merge(name(i))
            .output(format!("{}.out", name(i)))
            .command(["true"]);
        if upstream.is_empty() {
            decl = decl.input("src.txt");
        }
        for d in upstream {
            decl = decl.input(format!("{}.out", name(*d)));
        }
        builder.add_task(decl);
    }
    builder.build().unwrap()
}

fn has_failed_ancestor(i: usize, deps: &[BTreeSet<usize>], failing: &HashSet<usize>) -> bool {
    deps[i]
        .iter()
        .any(|d| failing.contains(d) || has_failed_ancestor(*d, deps, failing))
}

proptest! {
    #[test]
    fn scheduler_dispatches_each_instance_once_after_its_dependencies(
        deps in dag_strategy(8),
        failing in proptest::collection::hash_set(0..8usize, 0..3),
        picks in proptest::collection::vec(any::<usize>(), 64),
    ) {
        let fs = MockFileSystem::new();
        fs.add_file("src.txt", "x");
        let ctx = ResolveContext {
            fs: Arc::new(fs),
            root: PathBuf::from("."),
            ledger: Arc::new(MemoryLedger::new()),
            forced: BTreeSet::new(),
        };
        let failing: HashSet<usize> = failing.into_iter().filter(|i| *i < deps.len()).collect();

        let mut scheduler = Scheduler::new(build_pipeline(&deps), vec![], ctx).unwrap();
        let mut running: Vec<ScheduledInstance> = Vec::new();
        let mut dispatched = HashSet::new();

        let mut admit = |scheduler: &Scheduler, batch: Vec<ScheduledInstance>, running: &mut Vec<ScheduledInstance>| {
            for inst in batch {
                prop_assert!(dispatched.insert(inst.id), "{} dispatched twice", inst.id);
                let deps_ok = scheduler
                    .instance(inst.id)
                    .unwrap()
                    .deps()
                    .all(|d| scheduler.state_of(d).is_some_and(InstanceState::is_satisfied));
                prop_assert!(deps_ok, "{} dispatched before its dependencies", inst.task);
                running.push(inst);
            }
            Ok(())
        };

        let initial = scheduler.collect_ready();
        admit(&scheduler, initial, &mut running)?;

        let mut step_no = 0;
        while !running.is_empty() {
            prop_assert!(step_no < 1000, "scheduler did not drain");
            let idx = picks[step_no % picks.len()] % running.len();
            step_no += 1;

            let inst = running.swap_remove(idx);
            let index: usize = inst.task.trim_start_matches("task_").parse().unwrap();
            let outcome = if failing.contains(&index) {
                InstanceOutcome::Failed("injected".into())
            } else {
                InstanceOutcome::Succeeded(inst.outputs.clone())
            };
            let step = scheduler.step_completion(inst.id, outcome);
            admit(&scheduler, step.newly_scheduled, &mut running)?;
        }

        prop_assert!(scheduler.is_finished());
        for i in 0..deps.len() {
            let state = scheduler.instances_of(&name(i))[0].state;
            let expected = if has_failed_ancestor(i, &deps, &failing) {
                InstanceState::Cancelled
            } else if failing.contains(&i) {
                InstanceState::Failed
            } else {
                InstanceState::Succeeded
            };
            prop_assert_eq!(state, expected, "state of {}", name(i));
        }
    }
}
