//! Filter DSL, read/write options and their compilation to SQL fragments.

pub mod compile;
pub mod filter;
pub mod options;

pub use compile::FilterCompiler;
pub use filter::{Column, ColumnKind, Filter, Operator, OperatorSet, Where, WhereValue};
pub use options::{CreateOptions, FindOptions, OnConflict, Order, Patch, PatchValue, Projection};
