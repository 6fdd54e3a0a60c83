//! Shared helpers for the integration tests.

#![allow(dead_code)]

use statecraft::builder::StateBuilder;
use statecraft::core::{DataType, StatePath, SUCCESS};
use statecraft::machine::StateMachine;
use std::thread;
use std::time::{Duration, Instant};

/// Route engine logs through the test harness so they show up on failure.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn path(s: &str) -> StatePath {
    s.parse().unwrap()
}

/// `ROOT: A -> B -> C -> ROOT(success)`, every leaf running `script`.
pub fn chain(script: &str) -> StateMachine {
    let root = StateBuilder::hierarchy("ROOT")
        .output("last", DataType::Str, "")
        .child(StateBuilder::execution("A", script).output("name", DataType::Str, ""))
        .child(StateBuilder::execution("B", script).output("name", DataType::Str, ""))
        .child(StateBuilder::execution("C", script).output("name", DataType::Str, ""))
        .start("A")
        .transition("A", SUCCESS, "B")
        .transition("B", SUCCESS, "C")
        .conclude("C", SUCCESS, SUCCESS)
        .flow("C", "name", "ROOT", "last")
        .build()
        .unwrap();
    StateMachine::new(root)
}
