//! Small shared utilities: id generation and JSON glue.

pub mod id_generator;
pub mod json_ext;

pub use id_generator::IdGenerator;
pub use json_ext::JsonSerializable;
