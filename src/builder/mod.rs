//! Builder API for ergonomic state tree construction.
//!
//! [`StateBuilder`] declares a state, its ports, outcomes and, for containers,
//! children and edges, then builds them through the checked editing methods.
//! Ports and data flows are referred to by name, so no ids need to be tracked
//! by hand.
//!
//! # Example
//!
//! ```
//! use statecraft::builder::StateBuilder;
//! use statecraft::core::{DataType, SUCCESS};
//!
//! let root = StateBuilder::hierarchy("ROOT")
//!     .output("result", DataType::Int, 0)
//!     .child(StateBuilder::execution("A", "produce").output("value", DataType::Int, 0))
//!     .child(StateBuilder::execution("B", "consume").input("value", DataType::Int, 0))
//!     .start("A")
//!     .transition("A", SUCCESS, "B")
//!     .conclude("B", SUCCESS, SUCCESS)
//!     .flow("A", "value", "B", "value")
//!     .flow("A", "value", "ROOT", "result")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(root.container().unwrap().children().len(), 2);
//! ```

pub mod error;
pub mod state;

pub use error::BuildError;
pub use state::StateBuilder;
