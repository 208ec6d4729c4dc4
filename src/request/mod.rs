//! Request templates: parsing and per-request directives

pub mod directives;
pub mod parser;

pub use directives::{DirectiveRegistry, PostSendAction};
pub use parser::parse_raw_request;
