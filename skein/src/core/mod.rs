//! Foundation types: keys, values, error descriptors, and diagnostic events.
//!
//! Nothing in this module schedules work or touches the graph; it only
//! defines the vocabulary the graph store and the executor share.

pub mod error;
pub mod events;
pub mod key;
pub mod value;

pub use error::{
    downcast_node_error, CycleInfo, ErrorInfo, FunctionError, NodeError,
};
pub use events::{Event, EventCollector, EventKind, EventMessage, EventSink, Reporter};
pub use key::{FamilyName, NodeKey};
pub use value::{NodeValue, Value};
