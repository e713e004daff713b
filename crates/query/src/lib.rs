//! Query front end for the proven driver
//!
//! Turns raw SQL text into a [`QueryDescriptor`] with a single-pass scanner,
//! collects parameter rows against that descriptor, and caches descriptors by
//! their raw text so identical queries are not parsed twice.

pub mod binding;
pub mod cache;
pub mod descriptor;
pub mod error;
pub mod parser;

pub use binding::{Bindings, Param};
pub use cache::QueryCache;
pub use descriptor::{QueryDescriptor, QueryKind, StatementKind};
pub use error::{Error, Result};
pub use parser::{ParseOptions, parse, parse_with};
