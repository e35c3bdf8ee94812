mod graph;

pub use graph::explore;
