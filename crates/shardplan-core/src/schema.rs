//! Relation schemes: ordered `(name, type)` pairs. Pure data.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
}

impl DataType {
    /// Name used by the worker processes for this type.
    pub fn wire_name(self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN_TYPE",
            DataType::Int32 => "INT_TYPE",
            DataType::Int64 => "LONG_TYPE",
            DataType::Float32 => "FLOAT_TYPE",
            DataType::Float64 => "DOUBLE_TYPE",
            DataType::Utf8 => "STRING_TYPE",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::Boolean | DataType::Utf8)
    }

    /// Result type of an arithmetic operator over `self` and `other`.
    pub fn widen(self, other: DataType) -> DataType {
        use DataType::*;
        match (self, other) {
            (Float64, _) | (_, Float64) => Float64,
            (Float32, _) | (_, Float32) => Float32,
            (Int64, _) | (_, Int64) => Int64,
            (Int32, Int32) => Int32,
            (a, _) => a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub fields: Vec<Field>,
}

impl Scheme {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Like `field`, but an out-of-range position is a schema error.
    pub fn try_field(&self, idx: usize) -> Result<&Field> {
        self.fields.get(idx).ok_or_else(|| {
            Error::Schema(format!(
                "column ${idx} out of range for scheme of width {}",
                self.len()
            ))
        })
    }

    /// Position of the first field called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::Schema(format!("unknown attribute `{name}` in {self}")))
    }

    /// Concatenation `self ++ other` (join input layout).
    pub fn concat(&self, other: &Scheme) -> Scheme {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Scheme { fields }
    }

    /// Sub-scheme made of the given positions, in order.
    pub fn select(&self, columns: &[usize]) -> Result<Scheme> {
        let fields = columns
            .iter()
            .map(|&c| self.try_field(c).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Scheme { fields })
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{:?}", field.name, field.data_type)?;
        }
        write!(f, ")")
    }
}

/// `{"columnTypes": [...], "columnNames": [...]}` as consumed by the workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEncoding {
    #[serde(rename = "columnTypes")]
    pub column_types: Vec<String>,
    #[serde(rename = "columnNames")]
    pub column_names: Vec<String>,
}

impl From<&Scheme> for SchemaEncoding {
    fn from(scheme: &Scheme) -> Self {
        Self {
            column_types: scheme
                .fields
                .iter()
                .map(|f| f.data_type.wire_name().to_string())
                .collect(),
            column_names: scheme.names(),
        }
    }
}
