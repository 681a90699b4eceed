//! Concrete execution contexts.

mod node;

pub use node::NodeContext;
