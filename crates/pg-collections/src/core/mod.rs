//! Core building blocks shared by every layer of the engine:
//!
//! - [`value`]: bound values, result rows and entity ids
//! - [`identifier`]: the single path from a runtime string to SQL text
//! - [`fragment`]: the composable SQL AST and its serializer

pub mod fragment;
pub mod identifier;
pub mod value;

pub use fragment::{join_fragments, Fragment, FragmentBuilder, Interpolation, Statement};
pub use identifier::{quote_identifier, validate_identifier, RawIdentifier};
pub use value::{Id, Row, SqlValue};
