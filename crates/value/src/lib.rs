//! Proven Value - parameter and result values for the proven driver
//!
//! This crate provides the values that cross the driver boundary:
//! - `Value`: a single scalar or JSON value
//! - `ValueType`: the declared backend type of a bound parameter
//! - `TypedValue`: a value paired with the type it is bound as
//!
//! Wire encoding of values is owned by the backend codec, not this crate.

pub mod types;

pub use types::{NamedParams, Row, TypedValue, Value, ValueType};
