//! Ordered ranking indices over positions.

pub mod ordered;

pub use ordered::{Node, OrderedIndex, NIL};
