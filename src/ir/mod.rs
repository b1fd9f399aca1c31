pub mod attributes;
pub mod decorator;
pub mod document;
pub mod matcher;
pub mod node;
pub mod pipeline;
pub mod printer;
pub mod rule;
pub mod scope;
pub mod traversal;
pub mod types;
