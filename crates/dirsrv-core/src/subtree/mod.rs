//! Subtree specifications (RFC 3672): model, parser and evaluator.

pub mod evaluator;
pub mod parser;
pub mod spec;

pub use evaluator::SubtreeEvaluator;
pub use parser::SubtreeSpecificationParser;
pub use spec::{Refinement, SubtreeSpecification};
