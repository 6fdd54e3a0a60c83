//! End-to-end runs of small machines through the execution engine.

mod common;

use common::{chain, init_tracing, path, wait_until};
use statecraft::builder::{BuildError, StateBuilder};
use statecraft::core::{
    DataType, LibraryRef, ModelError, PortKind, State, Value, ABORTED, PREEMPTED, SUCCESS,
};
use statecraft::engine::{
    ExecutionEngine, ExecutionError, ExecutionMode, ScriptError, ScriptRegistry, StateStatus,
};
use statecraft::machine::{LibraryCatalog, StateMachine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PATIENCE: Duration = Duration::from_secs(5);

fn naming_scripts() -> ScriptRegistry {
    ScriptRegistry::new().with("name", |ctx| {
        let name = ctx.path().last().to_string();
        ctx.set_output("name", name);
        Ok(SUCCESS)
    })
}

#[test]
fn sequence_passes_values_along_data_flows() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .output("first", DataType::Int, 0)
        .output("second", DataType::Int, 0)
        .child(StateBuilder::execution("A", "produce").output("a", DataType::Int, 0))
        .child(
            StateBuilder::execution("B", "increment")
                .input("x", DataType::Int, 0)
                .output("b", DataType::Int, 0),
        )
        .start("A")
        .transition("A", SUCCESS, "B")
        .conclude("B", SUCCESS, SUCCESS)
        .flow("A", "a", "B", "x")
        .flow("A", "a", "ROOT", "first")
        .flow("B", "b", "ROOT", "second")
        .build()
        .unwrap();

    let scripts = ScriptRegistry::new()
        .with("produce", |ctx| {
            ctx.set_output("a", 1);
            Ok(SUCCESS)
        })
        .with("increment", |ctx| {
            let x = ctx.input("x").and_then(Value::as_i64).unwrap_or_default();
            ctx.set_output("b", x + 1);
            Ok(SUCCESS)
        });

    let report = ExecutionEngine::new(scripts)
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outputs["first"], Value::Int(1));
    assert_eq!(report.outputs["second"], Value::Int(2));
    assert_eq!(
        report.history.path(),
        vec![&path("ROOT"), &path("ROOT/A"), &path("ROOT/B")]
    );
}

#[test]
fn preemptive_container_takes_the_first_finisher() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .output("winner", DataType::Str, "")
        .child(
            StateBuilder::preemptive("RACE")
                .output("winner", DataType::Str, "")
                .child(StateBuilder::execution("FAST", "fast").output("name", DataType::Str, ""))
                .child(StateBuilder::execution("SLOW", "slow").output("name", DataType::Str, ""))
                .flow("FAST", "name", "RACE", "winner"),
        )
        .start("RACE")
        .conclude("RACE", SUCCESS, SUCCESS)
        .flow("RACE", "winner", "ROOT", "winner")
        .build()
        .unwrap();

    let scripts = ScriptRegistry::new()
        .with("fast", |ctx| {
            ctx.sleep(Duration::from_millis(20))?;
            ctx.set_output("name", "FAST");
            Ok(SUCCESS)
        })
        .with("slow", |ctx| {
            ctx.sleep(Duration::from_secs(30))?;
            Ok(SUCCESS)
        });

    let started = Instant::now();
    let report = ExecutionEngine::new(scripts)
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();

    assert!(started.elapsed() < PATIENCE);
    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outputs["winner"], Value::from("FAST"));
    assert_eq!(report.outcome_of(&path("ROOT/RACE/SLOW")), Some(PREEMPTED));
}

#[test]
fn container_ports_feed_its_own_outputs_and_scoped_variables() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .input("x", DataType::Int, 7)
        .output("echo", DataType::Int, 0)
        .output("total", DataType::Int, 0)
        .output("seeded", DataType::Int, 0)
        .scoped("acc", DataType::Int, 0)
        .scoped("copy", DataType::Int, 0)
        .child(StateBuilder::execution("A", "five").output("a", DataType::Int, 0))
        .start("A")
        .conclude("A", SUCCESS, SUCCESS)
        .flow("ROOT", "x", "ROOT", "echo")
        .flow("A", "a", "ROOT", "acc")
        .flow("ROOT", "acc", "ROOT", "total")
        .flow("ROOT", "x", "ROOT", "copy")
        .flow("ROOT", "copy", "ROOT", "seeded")
        .build()
        .unwrap();
    let scripts = ScriptRegistry::new().with("five", |ctx| {
        ctx.set_output("a", 5);
        Ok(SUCCESS)
    });

    let report = ExecutionEngine::new(scripts)
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outputs["echo"], Value::Int(7));
    assert_eq!(report.outputs["total"], Value::Int(5));
    assert_eq!(report.outputs["seeded"], Value::Int(7));
}

#[test]
fn barrier_collects_branches_into_scoped_variables() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .output("left", DataType::Str, "")
        .child(
            StateBuilder::barrier("ARMS")
                .output("left", DataType::Str, "")
                .scoped("seen", DataType::Str, "")
                .child(StateBuilder::execution("LEFT", "name").output("name", DataType::Str, ""))
                .child(StateBuilder::execution("RIGHT", "name").output("name", DataType::Str, ""))
                .flow("LEFT", "name", "ARMS", "seen")
                .flow("ARMS", "seen", "ARMS", "left"),
        )
        .start("ARMS")
        .conclude("ARMS", SUCCESS, SUCCESS)
        .flow("ARMS", "left", "ROOT", "left")
        .build()
        .unwrap();

    let report = ExecutionEngine::new(naming_scripts())
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outputs["left"], Value::from("LEFT"));
}

#[test]
fn custom_outcomes_below_zero_are_rejected() {
    let negative = StateBuilder::hierarchy("ROOT").outcome(-3, "odd").build();
    assert!(matches!(
        negative,
        Err(BuildError::Model(ModelError::Validation(_)))
    ));

    let reserved = StateBuilder::execution("A", "noop").outcome(PREEMPTED, "again").build();
    assert!(matches!(
        reserved,
        Err(BuildError::Model(ModelError::DuplicateId(_)))
    ));

    let custom = StateBuilder::execution("A", "noop").outcome(3, "retry").build().unwrap();
    assert_eq!(custom.outcome(3).map(|o| o.name()), Some("retry"));
}

fn barrier(outcome_of_b: fn() -> Result<i64, ScriptError>) -> RunOutcome {
    let root = StateBuilder::hierarchy("ROOT")
        .child(
            StateBuilder::barrier("ALL")
                .child(StateBuilder::execution("A", "ok"))
                .child(StateBuilder::execution("B", "b"))
                .child(StateBuilder::execution("C", "ok")),
        )
        .start("ALL")
        .conclude("ALL", SUCCESS, SUCCESS)
        .conclude("ALL", ABORTED, ABORTED)
        .conclude("ALL", PREEMPTED, PREEMPTED)
        .build()
        .unwrap();
    let scripts = ScriptRegistry::new()
        .with("ok", |_| Ok(SUCCESS))
        .with("b", move |_| outcome_of_b());
    let report = ExecutionEngine::new(scripts)
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();
    RunOutcome {
        container: report.outcome_of(&path("ROOT/ALL")),
        diagnostics: report.diagnostics.len(),
    }
}

struct RunOutcome {
    container: Option<i64>,
    diagnostics: usize,
}

#[test]
fn barrier_concludes_with_the_worst_child() {
    init_tracing();
    let all_good = barrier(|| Ok(SUCCESS));
    assert_eq!(all_good.container, Some(SUCCESS));
    assert_eq!(all_good.diagnostics, 0);

    let one_preempted = barrier(|| Ok(PREEMPTED));
    assert_eq!(one_preempted.container, Some(PREEMPTED));

    let one_failed = barrier(|| Err(ScriptError::Failed("sensor offline".into())));
    assert_eq!(one_failed.container, Some(ABORTED));
    assert_eq!(one_failed.diagnostics, 1);
}

#[test]
fn panicking_leaf_fails_only_its_state() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .child(StateBuilder::execution("BOOM", "boom"))
        .child(StateBuilder::execution("RECOVER", "ok"))
        .start("BOOM")
        .transition("BOOM", ABORTED, "RECOVER")
        .conclude("RECOVER", SUCCESS, SUCCESS)
        .build()
        .unwrap();
    let scripts = ScriptRegistry::new()
        .with("boom", |_| panic!("exploded"))
        .with("ok", |_| Ok(SUCCESS));

    let report = ExecutionEngine::new(scripts)
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outcome_of(&path("ROOT/BOOM")), Some(ABORTED));
    assert!(report.diagnostics.iter().any(|d| d.contains("exploded")));
}

#[test]
fn missing_transition_aborts_the_container() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .child(StateBuilder::execution("A", "fail"))
        .start("A")
        .conclude("A", SUCCESS, SUCCESS)
        .build()
        .unwrap();
    let scripts = ScriptRegistry::new().with("fail", |_| Ok(ABORTED));

    let report = ExecutionEngine::new(scripts)
        .start(&StateMachine::new(root))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, ABORTED);
    assert!(report.diagnostics.iter().any(|d| d.contains("no transition")));
}

#[test]
fn stop_preempts_a_long_running_leaf() {
    init_tracing();
    let root = StateBuilder::hierarchy("ROOT")
        .child(StateBuilder::execution("WAIT", "wait"))
        .start("WAIT")
        .conclude("WAIT", SUCCESS, SUCCESS)
        .build()
        .unwrap();
    let scripts = ScriptRegistry::new().with("wait", |ctx| {
        ctx.sleep(Duration::from_secs(30))?;
        Ok(SUCCESS)
    });
    let engine = ExecutionEngine::new(scripts);
    let machine = StateMachine::new(root);

    let handle = engine.start(&machine).unwrap();
    assert!(wait_until(PATIENCE, || handle.status(&path("ROOT/WAIT")) == StateStatus::Active));
    assert!(machine.is_running());

    engine.stop().unwrap();
    let report = handle.join().unwrap();

    assert_eq!(report.final_outcome, PREEMPTED);
    assert_eq!(engine.mode(), Some(ExecutionMode::Stopped));
    assert!(!machine.is_running());
    assert!(matches!(engine.stop(), Err(ExecutionError::NotRunning)));
}

#[test]
fn pause_holds_the_run_until_resumed() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let scripts = ScriptRegistry::new().with("count", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(SUCCESS)
    });
    let engine = ExecutionEngine::new(scripts);
    let machine = chain("count");

    let handle = engine
        .start_with(&machine, None, ExecutionMode::Paused)
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(handle.mode(), ExecutionMode::Paused);

    engine.resume().unwrap();
    let report = handle.join().unwrap();
    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn stepping_over_and_back() {
    init_tracing();
    let entries_of_a = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entries_of_a);
    let scripts = ScriptRegistry::new().with("name", move |ctx| {
        if ctx.path().last() == "A" {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        let name = ctx.path().last().to_string();
        ctx.set_output("name", name);
        Ok(SUCCESS)
    });
    let engine = ExecutionEngine::new(scripts);
    let machine = chain("name");

    let handle = engine
        .start_with(&machine, None, ExecutionMode::Stepping)
        .unwrap();
    assert!(wait_until(PATIENCE, || engine.stopped_at() == Some(path("ROOT/A"))));
    assert_eq!(entries_of_a.load(Ordering::SeqCst), 0);

    engine.step_over().unwrap();
    assert!(wait_until(PATIENCE, || engine.stopped_at() == Some(path("ROOT/B"))));
    assert_eq!(handle.status(&path("ROOT/A")), StateStatus::Succeeded);
    assert_eq!(entries_of_a.load(Ordering::SeqCst), 1);

    engine.backward_step().unwrap();
    assert!(wait_until(PATIENCE, || engine.stopped_at() == Some(path("ROOT/A"))));

    engine.resume().unwrap();
    let report = handle.join().unwrap();
    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outputs["last"], Value::from("C"));
    assert_eq!(entries_of_a.load(Ordering::SeqCst), 2);
}

#[test]
fn run_to_pauses_before_the_target() {
    init_tracing();
    let engine = ExecutionEngine::new(naming_scripts());
    let machine = chain("name");

    let handle = engine
        .start_with(&machine, None, ExecutionMode::Paused)
        .unwrap();
    engine.run_to(&path("ROOT/C")).unwrap();

    assert!(wait_until(PATIENCE, || {
        handle.status(&path("ROOT/B")) == StateStatus::Succeeded
            && engine.mode() == Some(ExecutionMode::Paused)
    }));
    assert_eq!(handle.status(&path("ROOT/C")), StateStatus::Idle);

    engine.resume().unwrap();
    assert_eq!(handle.join().unwrap().final_outcome, SUCCESS);
}

#[test]
fn entry_path_skips_earlier_states() {
    init_tracing();
    let engine = ExecutionEngine::new(naming_scripts());
    let report = engine
        .start_at(&chain("name"), &path("ROOT/B"))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outcome_of(&path("ROOT/A")), None);
    assert_eq!(report.outcome_of(&path("ROOT/B")), Some(SUCCESS));
}

#[test]
fn second_start_is_rejected_while_running() {
    init_tracing();
    let engine = ExecutionEngine::new(naming_scripts());
    let machine = chain("name");
    let other = chain("name");

    let handle = engine
        .start_with(&machine, None, ExecutionMode::Paused)
        .unwrap();
    assert!(matches!(
        engine.start(&other),
        Err(ExecutionError::AlreadyRunning)
    ));

    engine.resume().unwrap();
    handle.join().unwrap();
    assert!(engine.start(&other).unwrap().join().is_ok());
}

#[test]
fn library_content_runs_through_the_mirrored_interface() {
    init_tracing();
    let content = StateBuilder::hierarchy("GREETER")
        .input("who", DataType::Str, "world")
        .output("greeting", DataType::Str, "")
        .child(
            StateBuilder::execution("SAY", "greet")
                .input("who", DataType::Str, "")
                .output("greeting", DataType::Str, ""),
        )
        .start("SAY")
        .conclude("SAY", SUCCESS, SUCCESS)
        .flow("GREETER", "who", "SAY", "who")
        .flow("SAY", "greeting", "GREETER", "greeting")
        .build()
        .unwrap();
    let reference = LibraryRef::new("common", "greeter");
    let root = StateBuilder::hierarchy("ROOT")
        .output("message", DataType::Str, "")
        .state(State::library("LIB", "greeter", reference.clone()))
        .start("LIB")
        .conclude("LIB", SUCCESS, SUCCESS)
        .build()
        .unwrap();

    let catalog = LibraryCatalog::new().with(reference, content);
    let mut machine = StateMachine::load(root, &catalog).unwrap();
    let root_path = machine.root_path();
    let from = machine
        .state(&root_path.child("LIB"))
        .and_then(|lib| lib.port_by_name(PortKind::Output, "greeting"))
        .unwrap()
        .id();
    let to = machine
        .root()
        .port_by_name(PortKind::Output, "message")
        .unwrap()
        .id();
    machine
        .add_data_flow(&root_path, "LIB", from, "ROOT", to)
        .unwrap();

    let scripts = ScriptRegistry::new().with("greet", |ctx| {
        let who = ctx
            .input("who")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ctx.set_output("greeting", format!("hello {who}"));
        Ok(SUCCESS)
    });
    let report = ExecutionEngine::new(scripts)
        .start(&machine)
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.final_outcome, SUCCESS);
    assert_eq!(report.outputs["message"], Value::from("hello world"));
}
