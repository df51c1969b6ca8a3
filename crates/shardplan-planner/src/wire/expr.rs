//! Expression trees as the workers' expression evaluator reads them.

use serde::{Deserialize, Serialize};

use shardplan_core::algebra::Emitter;
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::{Expr, Literal};
use shardplan_core::schema::{DataType, Scheme};

/// One expression node: a `type` tag plus whichever operands it has.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExprEncoding {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "valueType", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(rename = "columnIdx", skip_serializing_if = "Option::is_none")]
    pub column_idx: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Box<ExprEncoding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<ExprEncoding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<ExprEncoding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ExprEncoding>>,
    #[serde(rename = "outputType", skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

impl ExprEncoding {
    fn of(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    fn constant(value: String, value_type: DataType) -> Self {
        Self {
            value: Some(value),
            value_type: Some(value_type.wire_name().to_string()),
            ..Self::of("CONSTANT")
        }
    }

    fn column(kind: &str, idx: usize) -> Self {
        Self {
            column_idx: Some(idx),
            ..Self::of(kind)
        }
    }
}

/// A named output column of an apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitEncoding {
    #[serde(rename = "outputName")]
    pub output_name: String,
    #[serde(rename = "rootExpressionOperator")]
    pub root: ExprEncoding,
}

/// Encode `expr`, resolving named references against `child`.
pub fn compile_expr(expr: &Expr, child: &Scheme) -> Result<ExprEncoding> {
    Ok(match expr {
        Expr::Column(p) => {
            child.try_field(*p)?;
            ExprEncoding::column("VARIABLE", *p)
        }
        Expr::Named(n) => ExprEncoding::column("VARIABLE", child.resolve(n)?),
        Expr::State(p) => ExprEncoding::column("STATE", *p),
        Expr::Literal(lit) => {
            let value = match lit {
                Literal::Int(v) => v.to_string(),
                Literal::Float(v) => format!("{v:?}"),
                Literal::Str(s) => s.clone(),
                Literal::Bool(b) => b.to_string(),
            };
            ExprEncoding::constant(value, lit.data_type())
        }
        Expr::Unary { op, input } => ExprEncoding {
            operand: Some(Box::new(compile_expr(input, child)?)),
            ..ExprEncoding::of(op.wire_name())
        },
        Expr::Binary { op, left, right } => ExprEncoding {
            left: Some(Box::new(compile_expr(left, child)?)),
            right: Some(Box::new(compile_expr(right, child)?)),
            ..ExprEncoding::of(op.wire_name())
        },
        Expr::Cast { input, to } => ExprEncoding {
            left: Some(Box::new(compile_expr(input, child)?)),
            right: Some(Box::new(ExprEncoding {
                output_type: Some(to.wire_name().to_string()),
                ..ExprEncoding::of("TYPE")
            })),
            ..ExprEncoding::of("CAST")
        },
        Expr::Case {
            when,
            then,
            otherwise,
        } => ExprEncoding {
            children: Some(vec![
                compile_expr(when, child)?,
                compile_expr(then, child)?,
                compile_expr(otherwise, child)?,
            ]),
            ..ExprEncoding::of("CONDITION")
        },
        Expr::MergeSlot(k) => {
            return Err(Error::Invariant(format!(
                "finalizer slot {k} reached the wire compiler unresolved"
            )))
        }
    })
}

/// Encode `emitters`, naming each after the matching column of `names`.
pub fn compile_emitters(
    emitters: &[Emitter],
    names: &Scheme,
    child: &Scheme,
) -> Result<Vec<EmitEncoding>> {
    emitters
        .iter()
        .enumerate()
        .map(|(i, e)| {
            Ok(EmitEncoding {
                output_name: names.try_field(i)?.name.clone(),
                root: compile_expr(&e.expr, child)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardplan_core::expr::{binary, cast, col, lit_int, named, BinaryOp, UnaryOp};
    use shardplan_core::schema::Field;

    fn scheme() -> Scheme {
        Scheme::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Float64),
        ])
    }

    #[test]
    fn test_constants_pick_width() {
        let small = serde_json::to_value(compile_expr(&lit_int(3), &scheme()).unwrap()).unwrap();
        assert_eq!(
            small,
            json!({"type": "CONSTANT", "value": "3", "valueType": "INT_TYPE"})
        );
        let big = compile_expr(&lit_int(1 << 40), &scheme()).unwrap();
        assert_eq!(big.value_type.as_deref(), Some("LONG_TYPE"));
        let f = compile_expr(&Expr::Literal(Literal::Float(2.0)), &scheme()).unwrap();
        assert_eq!(f.value.as_deref(), Some("2.0"));
        assert_eq!(f.value_type.as_deref(), Some("DOUBLE_TYPE"));
    }

    #[test]
    fn test_named_refs_become_variables() {
        let e = binary(BinaryOp::Gt, named("b"), lit_int(1));
        let v = serde_json::to_value(compile_expr(&e, &scheme()).unwrap()).unwrap();
        assert_eq!(v["type"], "GT");
        assert_eq!(v["left"], json!({"type": "VARIABLE", "columnIdx": 1}));
        assert!(compile_expr(&named("zz"), &scheme()).is_err());
        assert!(compile_expr(&col(5), &scheme()).is_err());
    }

    #[test]
    fn test_cast_case_and_unary_shapes() {
        let v = serde_json::to_value(
            compile_expr(&cast(col(0), DataType::Float64), &scheme()).unwrap(),
        )
        .unwrap();
        assert_eq!(
            v,
            json!({
                "type": "CAST",
                "left": {"type": "VARIABLE", "columnIdx": 0},
                "right": {"type": "TYPE", "outputType": "DOUBLE_TYPE"}
            })
        );

        let case = Expr::Case {
            when: Box::new(Expr::Literal(Literal::Bool(true))),
            then: Box::new(Expr::State(0)),
            otherwise: Box::new(Expr::Unary {
                op: UnaryOp::Negate,
                input: Box::new(col(0)),
            }),
        };
        let v = serde_json::to_value(compile_expr(&case, &scheme()).unwrap()).unwrap();
        assert_eq!(v["type"], "CONDITION");
        assert_eq!(v["children"][0]["valueType"], "BOOLEAN_TYPE");
        assert_eq!(v["children"][1], json!({"type": "STATE", "columnIdx": 0}));
        assert_eq!(v["children"][2]["type"], "NEGATE");
        assert_eq!(v["children"][2]["operand"]["columnIdx"], 0);
    }

    #[test]
    fn test_unresolved_merge_slot_rejected() {
        assert!(matches!(
            compile_expr(&Expr::MergeSlot(0), &scheme()),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn test_emitters_take_output_names() {
        let out = Scheme::new(vec![Field::new("total", DataType::Float64)]);
        let emits = compile_emitters(
            &[Emitter::unnamed(binary(BinaryOp::Plus, col(0), col(1)))],
            &out,
            &scheme(),
        )
        .unwrap();
        let v = serde_json::to_value(&emits).unwrap();
        assert_eq!(v[0]["outputName"], "total");
        assert_eq!(v[0]["rootExpressionOperator"]["type"], "PLUS");
    }
}
