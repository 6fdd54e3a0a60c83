//! Statecraft: a hierarchical state machine execution engine
//!
//! A state machine is a tree of states. Leaves run scripts; containers run
//! their children one after another along transitions (hierarchy), all at
//! once until every child concludes (barrier concurrency), or all at once
//! until the first child concludes (preemptive concurrency). Values move
//! between ports along data flows, and branches share a locked global
//! variable store.
//!
//! # Core Concepts
//!
//! - **State tree**: plain, serializable data in [`core`], edited through
//!   checked methods that keep every container consistent ([`hierarchy`])
//! - **History**: every edit is a command value that can be undone and redone
//!   ([`history`]), driven through the [`machine::StateMachine`] surface
//! - **Execution**: [`engine::ExecutionEngine`] runs a tree on its own thread
//!   with pause, stepping and cooperative preemption
//! - **Global variables**: [`globals::GlobalVariableManager`] serializes
//!   access per key, with explicit lock tokens for read-modify-write sections
//!
//! # Example
//!
//! ```rust
//! use statecraft::builder::StateBuilder;
//! use statecraft::core::{DataType, Value, SUCCESS};
//! use statecraft::engine::{ExecutionEngine, ScriptRegistry};
//! use statecraft::machine::StateMachine;
//!
//! let root = StateBuilder::hierarchy("ROOT")
//!     .output("total", DataType::Int, 0)
//!     .child(StateBuilder::execution("COUNT", "count").output("n", DataType::Int, 0))
//!     .start("COUNT")
//!     .conclude("COUNT", SUCCESS, SUCCESS)
//!     .flow("COUNT", "n", "ROOT", "total")
//!     .build()
//!     .unwrap();
//!
//! let scripts = ScriptRegistry::new().with("count", |ctx| {
//!     ctx.set_output("n", 3);
//!     Ok(SUCCESS)
//! });
//! let engine = ExecutionEngine::new(scripts);
//! let report = engine.start(&StateMachine::new(root)).unwrap().join().unwrap();
//!
//! assert_eq!(report.final_outcome, SUCCESS);
//! assert_eq!(report.outputs["total"], Value::Int(3));
//! ```

pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod engine;
pub mod globals;
pub mod hierarchy;
pub mod history;
pub mod machine;

// Re-export commonly used types
pub use core::{DataType, State, StatePath, Value};
pub use engine::{ExecutionEngine, RunReport, ScriptRegistry};
pub use globals::GlobalVariableManager;
pub use machine::StateMachine;
