//! Logical schema types. Pure data; no Arrow dependency here.
//!
//! Sources report a `Schema` before iteration so that missing columns can be
//! rejected without reading any rows.

use serde::{Deserialize, Serialize};

use crate::types::RowBatch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Infer a schema from a batch, typing each column by its first non-null value.
    pub fn from_batch(batch: &RowBatch) -> Self {
        let fields = batch
            .columns
            .iter()
            .map(|c| {
                let data_type = c
                    .values
                    .iter()
                    .find(|v| !v.is_null())
                    .map(|v| v.data_type())
                    .unwrap_or(DataType::Null);
                let nullable = c.values.iter().any(|v| v.is_null());
                Field::new(c.name.clone(), data_type, nullable)
            })
            .collect();
        Self { fields }
    }

    /// Names in `requested` that this schema does not have.
    pub fn missing<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|n| !self.contains(n))
            .map(|n| n.as_str())
            .collect()
    }
}
