//! Parameter rows for a parsed query
//!
//! A [`Bindings`] set holds one or more rows of named parameter values for a
//! single descriptor. The last row is the one being filled; `add()` seals it
//! and opens a new one, which is how batches are built.

use crate::descriptor::QueryDescriptor;
use crate::error::{Error, Result};
use proven_value::{NamedParams, TypedValue, Value, ValueType};
use std::collections::HashMap;
use std::sync::Arc;

/// Reference to a declared parameter, by name or by 1-based position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for Param<'a> {
    fn from(name: &'a str) -> Self {
        Param::Name(name)
    }
}

impl<'a> From<&'a String> for Param<'a> {
    fn from(name: &'a String) -> Self {
        Param::Name(name.as_str())
    }
}

impl From<usize> for Param<'_> {
    fn from(index: usize) -> Self {
        Param::Index(index)
    }
}

type BindingRow = HashMap<String, TypedValue>;

/// Parameter rows collected for one query descriptor
#[derive(Debug, Clone)]
pub struct Bindings {
    descriptor: Arc<QueryDescriptor>,
    /// Never empty; the last row is the one currently being filled
    rows: Vec<BindingRow>,
}

impl Bindings {
    pub fn new(descriptor: Arc<QueryDescriptor>) -> Self {
        Self {
            descriptor,
            rows: vec![BindingRow::new()],
        }
    }

    pub fn descriptor(&self) -> &Arc<QueryDescriptor> {
        &self.descriptor
    }

    /// Bind a value using the type it naturally maps to.
    ///
    /// NULL has no natural type; use [`Bindings::bind_null`] for it.
    pub fn bind<'a>(&mut self, param: impl Into<Param<'a>>, value: impl Into<Value>) -> Result<()> {
        let name = self.resolve(param.into())?;
        let value = value.into();
        let value_type = value
            .natural_type()
            .ok_or_else(|| Error::UntypedNull(name.clone()))?;
        self.set(name, TypedValue::new(value, value_type));
        Ok(())
    }

    /// Bind a value with an explicit backend type
    pub fn bind_typed<'a>(
        &mut self,
        param: impl Into<Param<'a>>,
        value: impl Into<Value>,
        value_type: ValueType,
    ) -> Result<()> {
        let name = self.resolve(param.into())?;
        self.set(name, TypedValue::new(value.into(), value_type));
        Ok(())
    }

    /// Bind an explicit typed NULL
    pub fn bind_null<'a>(&mut self, param: impl Into<Param<'a>>, value_type: ValueType) -> Result<()> {
        let name = self.resolve(param.into())?;
        self.set(name, TypedValue::null(value_type));
        Ok(())
    }

    /// Seal the current row and start a new, empty one.
    ///
    /// Fails without changing anything if the current row is incomplete.
    pub fn add(&mut self) -> Result<()> {
        self.validate()?;
        self.rows.push(BindingRow::new());
        Ok(())
    }

    /// Check that the current row binds every declared parameter
    pub fn validate(&self) -> Result<()> {
        let current = self.current();
        let missing: Vec<String> = self
            .descriptor
            .parameters()
            .iter()
            .filter(|name| !current.contains_key(name.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingParameters(missing))
        }
    }

    /// Rows ready for execution, each in declared parameter order.
    ///
    /// A trailing row left empty by `add()` is not executed; any other
    /// trailing row must be complete.
    pub fn prepared_rows(&self) -> Result<Vec<NamedParams>> {
        let rows = match self.rows.split_last() {
            Some((last, sealed)) if last.is_empty() && !sealed.is_empty() => sealed,
            _ => {
                self.validate()?;
                self.rows.as_slice()
            }
        };

        Ok(rows.iter().map(|row| self.ordered(row)).collect())
    }

    /// Number of rows sealed with `add()`
    pub fn batch_len(&self) -> usize {
        self.rows.len() - 1
    }

    /// Drop all rows and start over with a single empty one
    pub fn clear(&mut self) {
        self.rows.clear();
        self.rows.push(BindingRow::new());
    }

    fn resolve(&self, param: Param<'_>) -> Result<String> {
        match param {
            Param::Name(name) if self.descriptor.has_parameter(name) => Ok(name.to_string()),
            Param::Name(name) => Err(Error::UnknownParameter(name.to_string())),
            Param::Index(index) => self
                .descriptor
                .parameter_name(index)
                .map(str::to_string)
                .ok_or(Error::ParameterIndexOutOfRange {
                    index,
                    count: self.descriptor.parameters().len(),
                }),
        }
    }

    fn set(&mut self, name: String, value: TypedValue) {
        let len = self.rows.len();
        self.rows[len - 1].insert(name, value);
    }

    fn current(&self) -> &BindingRow {
        &self.rows[self.rows.len() - 1]
    }

    fn ordered(&self, row: &BindingRow) -> NamedParams {
        self.descriptor
            .parameters()
            .iter()
            .filter_map(|name| row.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}
