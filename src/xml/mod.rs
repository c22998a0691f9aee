//! Streaming XML front end: input opening, handler stack, element handlers.

pub mod handler;
pub mod machine;
pub mod source;

pub use handler::{ElementHandler, Handler, Value};
pub use machine::{parse_document, Machine};
pub use source::{open_input, wrap_reader};
