//! Concurrency Demo
//!
//! A delivery robot first races a sensor scan against a timeout, then moves
//! both arms at once and waits for both to finish.
//!
//! Key concepts:
//! - Preemptive concurrency (first branch to conclude wins)
//! - Barrier concurrency (all branches must conclude)
//! - Data flows from children to the container's outputs
//! - Global variables shared between branches under a lock
//!
//! Run with: cargo run --example concurrency_demo

use statecraft::builder::StateBuilder;
use statecraft::core::{DataType, StatePath, Value, SUCCESS};
use statecraft::engine::{ExecutionEngine, ScriptRegistry};
use statecraft::globals::GlobalVariableManager;
use statecraft::machine::StateMachine;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Concurrency Demo ===\n");

    let root = StateBuilder::hierarchy("ROBOT")
        .output("found", DataType::Str, "")
        .child(
            StateBuilder::preemptive("SEARCH")
                .output("found", DataType::Str, "")
                .child(StateBuilder::execution("SCAN", "scan").output("found", DataType::Str, ""))
                .child(StateBuilder::execution("TIMEOUT", "timeout"))
                .flow("SCAN", "found", "SEARCH", "found"),
        )
        .child(
            StateBuilder::barrier("ARMS")
                .child(StateBuilder::execution("LEFT", "move_arm"))
                .child(StateBuilder::execution("RIGHT", "move_arm")),
        )
        .start("SEARCH")
        .transition("SEARCH", SUCCESS, "ARMS")
        .conclude("ARMS", SUCCESS, SUCCESS)
        .flow("SEARCH", "found", "ROBOT", "found")
        .build()
        .unwrap();

    let scripts = ScriptRegistry::new()
        .with("scan", |ctx| {
            ctx.sleep(Duration::from_millis(100))?;
            ctx.set_output("found", "parcel");
            Ok(SUCCESS)
        })
        .with("timeout", |ctx| {
            ctx.sleep(Duration::from_secs(5))?;
            Ok(SUCCESS)
        })
        .with("move_arm", |ctx| {
            for _ in 0..3 {
                ctx.sleep(Duration::from_millis(20))?;
                let globals = ctx.globals();
                let token = globals.lock("moves")?;
                let moves = globals
                    .get_locked("moves", token)?
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default();
                globals.set_locked("moves", moves + 1, token)?;
                globals.unlock("moves", token)?;
            }
            Ok(SUCCESS)
        });

    let globals = Arc::new(GlobalVariableManager::new());
    globals.set("moves", 0).unwrap();
    let engine = ExecutionEngine::new(scripts).with_globals(Arc::clone(&globals));
    let machine = StateMachine::new(root);

    let report = engine.start(&machine).unwrap().join().unwrap();

    println!("\nFinal outcome: {}", report.final_outcome);
    println!("Found: {:?}", report.outputs.get("found"));
    println!(
        "Timeout branch: {:?}",
        report.outcome_of(&StatePath::root("ROBOT").child("SEARCH").child("TIMEOUT"))
    );
    println!(
        "Arm moves: {:?}",
        globals.get("moves").unwrap().unwrap_or(Value::Null)
    );

    println!("\nVisited states:");
    for path in report.history.path() {
        println!("  {path}");
    }
}
