//! Plan documents: a YAML (or JSON) operator tree plus a small expression
//! language, used by the CLI and by tests in place of a query front end.

pub mod expr;
pub mod yaml;

use shardplan_core::error::{Error, Result};
use shardplan_core::schema::DataType;

pub use expr::{parse_aggregate, parse_expr};
pub use yaml::{parse_plan, ParsedPlan, PlanDocument};

/// Accepts the Rust-style names, short aliases and the worker type names.
pub fn parse_data_type(s: &str) -> Result<DataType> {
    match s {
        "Boolean" | "bool" | "BOOLEAN_TYPE" => Ok(DataType::Boolean),
        "Int32" | "int" | "INT_TYPE" => Ok(DataType::Int32),
        "Int64" | "long" | "LONG_TYPE" => Ok(DataType::Int64),
        "Float32" | "float" | "FLOAT_TYPE" => Ok(DataType::Float32),
        "Float64" | "double" | "DOUBLE_TYPE" => Ok(DataType::Float64),
        "Utf8" | "string" | "STRING_TYPE" => Ok(DataType::Utf8),
        other => Err(Error::Parse(format!("unknown type `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        assert_eq!(parse_data_type("long").unwrap(), DataType::Int64);
        assert_eq!(parse_data_type("DOUBLE_TYPE").unwrap(), DataType::Float64);
        assert_eq!(parse_data_type("Utf8").unwrap(), DataType::Utf8);
        assert!(parse_data_type("Binary").is_err());
    }
}
