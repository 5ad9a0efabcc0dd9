//! Declared variables, host functions and checked compilation.

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{PolicyError, PolicyResult};
use crate::eval::Program;
use crate::parser::parse;
use crate::value::Value;

/// Static type of an expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// Not known until evaluation.
    Dyn,
    Null,
    Bool,
    Int,
    String,
    List,
    Object(BTreeMap<String, Type>),
}

impl Type {
    pub fn object<'a>(fields: impl IntoIterator<Item = (&'a str, Type)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, t)| (k.to_string(), t)).collect())
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Int(_) => Self::Int,
            Value::String(_) => Self::String,
            Value::List(_) => Self::List,
            Value::Map(_) => Self::Dyn,
        }
    }

    /// `true` if a value of this type may be used where `expected` is required.
    fn fits(&self, expected: &Type) -> bool {
        matches!(self, Type::Dyn) || self == expected
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dyn => f.write_str("dyn"),
            Self::Null => f.write_str("null"),
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::String => f.write_str("string"),
            Self::List => f.write_str("list"),
            Self::Object(fields) => {
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                write!(f, "object{{{}}}", names.join(", "))
            }
        }
    }
}

/// Signature of a global function.
#[derive(Clone, Debug)]
struct Signature {
    params: Vec<Type>,
    result: Type,
}

/// The set of names a rule may reference.
///
/// Built once and shared; compiling against it rejects any rule that
/// mentions an undeclared variable, field or function.
#[derive(Clone, Debug)]
pub struct Environment {
    variables: BTreeMap<String, Type>,
    functions: BTreeMap<String, Signature>,
}

/// Type of the object returned by `acl(uid, uri)`.
pub fn acl_type() -> Type {
    Type::object([
        ("read", Type::Bool),
        ("write", Type::Bool),
        ("graft", Type::Bool),
        ("delete", Type::Bool),
    ])
}

impl Environment {
    /// An environment with no declarations.
    pub fn empty() -> Self {
        Self {
            variables: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }

    /// The access-rule environment: `auth`, `data`, `graft`, `at`, `acl()`.
    pub fn standard() -> Self {
        Self::empty()
            .variable(
                "auth",
                Type::object([
                    ("uid", Type::String),
                    ("email", Type::String),
                    ("validated", Type::Bool),
                    ("group", Type::String),
                ]),
            )
            .variable(
                "data",
                Type::object([
                    ("id", Type::String),
                    ("collection", Type::String),
                    ("creator", Type::String),
                ]),
            )
            .variable(
                "graft",
                Type::object([
                    ("id", Type::String),
                    ("creator", Type::String),
                    ("createdAt", Type::Int),
                ]),
            )
            .variable("at", Type::Int)
            .function("acl", vec![Type::String, Type::String], acl_type())
    }

    pub fn variable(mut self, name: &str, ty: Type) -> Self {
        self.variables.insert(name.to_string(), ty);
        self
    }

    pub fn function(mut self, name: &str, params: Vec<Type>, result: Type) -> Self {
        self.functions
            .insert(name.to_string(), Signature { params, result });
        self
    }

    /// Parse and type-check `source`.
    pub fn compile(&self, source: &str) -> PolicyResult<Program> {
        let expr = parse(source)?;
        let ty = self.check(&expr)?;
        if !ty.fits(&Type::Bool) {
            return Err(PolicyError::NotBoolean(ty.to_string()));
        }
        tracing::trace!(rule = %source, "rule compiled");
        Ok(Program::new(source, expr))
    }

    fn check_args(&self, function: &str, args: &[Expr], params: &[Type]) -> PolicyResult<()> {
        if args.len() != params.len() {
            return Err(PolicyError::Arity {
                function: function.to_string(),
                expected: params.len(),
                found: args.len(),
            });
        }
        for (arg, param) in args.iter().zip(params) {
            let ty = self.check(arg)?;
            if !ty.fits(param) {
                return Err(PolicyError::mismatch(format!(
                    "argument to '{function}' must be {param}, found {ty}"
                )));
            }
        }
        Ok(())
    }

    fn check(&self, expr: &Expr) -> PolicyResult<Type> {
        match expr {
            Expr::Literal(value) => Ok(Type::of(value)),
            Expr::List(items) => {
                for item in items {
                    self.check(item)?;
                }
                Ok(Type::List)
            }
            Expr::Ident(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| PolicyError::UnknownVariable(name.clone())),
            Expr::Select(operand, field) => match self.check(operand)? {
                Type::Object(fields) => fields.get(field).cloned().ok_or_else(|| {
                    PolicyError::UnknownField {
                        field: field.clone(),
                        ty: Type::Object(fields.clone()).to_string(),
                    }
                }),
                Type::Dyn => Ok(Type::Dyn),
                other => Err(PolicyError::UnknownField {
                    field: field.clone(),
                    ty: other.to_string(),
                }),
            },
            Expr::Call(name, args) => match name.as_str() {
                "size" => {
                    if args.len() != 1 {
                        return Err(PolicyError::Arity {
                            function: name.clone(),
                            expected: 1,
                            found: args.len(),
                        });
                    }
                    match self.check(&args[0])? {
                        Type::String | Type::List | Type::Object(_) | Type::Dyn => Ok(Type::Int),
                        other => Err(PolicyError::mismatch(format!("size() of {other}"))),
                    }
                }
                _ => {
                    let signature = self
                        .functions
                        .get(name)
                        .ok_or_else(|| PolicyError::UnknownFunction(name.clone()))?;
                    self.check_args(name, args, &signature.params)?;
                    Ok(signature.result.clone())
                }
            },
            Expr::Method(receiver, name, args) => match name.as_str() {
                "startsWith" | "endsWith" | "contains" => {
                    let ty = self.check(receiver)?;
                    if !ty.fits(&Type::String) {
                        return Err(PolicyError::mismatch(format!("{name}() on {ty}")));
                    }
                    self.check_args(name, args, &[Type::String])?;
                    Ok(Type::Bool)
                }
                _ => Err(PolicyError::UnknownFunction(name.clone())),
            },
            Expr::Unary(op, operand) => {
                let ty = self.check(operand)?;
                let expected = match op {
                    UnaryOp::Not => Type::Bool,
                    UnaryOp::Neg => Type::Int,
                };
                if !ty.fits(&expected) {
                    return Err(PolicyError::mismatch(format!(
                        "unary operand must be {expected}, found {ty}"
                    )));
                }
                Ok(expected)
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.check(lhs)?;
                let right = self.check(rhs)?;
                self.check_binary(*op, left, right)
            }
            Expr::Conditional(condition, then, otherwise) => {
                let ty = self.check(condition)?;
                if !ty.fits(&Type::Bool) {
                    return Err(PolicyError::mismatch(format!("condition must be bool, found {ty}")));
                }
                let then = self.check(then)?;
                let otherwise = self.check(otherwise)?;
                Ok(if then == otherwise { then } else { Type::Dyn })
            }
        }
    }

    fn check_binary(&self, op: BinaryOp, left: Type, right: Type) -> PolicyResult<Type> {
        let mismatch = || {
            PolicyError::mismatch(format!(
                "no operator {} for {left} and {right}",
                op.symbol()
            ))
        };
        match op {
            BinaryOp::And | BinaryOp::Or => {
                if left.fits(&Type::Bool) && right.fits(&Type::Bool) {
                    Ok(Type::Bool)
                } else {
                    Err(mismatch())
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => Ok(Type::Bool),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (&left, &right) {
                (Type::Dyn, _) | (_, Type::Dyn) => Ok(Type::Bool),
                (Type::Int, Type::Int) | (Type::String, Type::String) => Ok(Type::Bool),
                _ => Err(mismatch()),
            },
            BinaryOp::In => match &right {
                Type::List | Type::Object(_) | Type::Dyn => Ok(Type::Bool),
                _ => Err(mismatch()),
            },
            BinaryOp::Add => match (&left, &right) {
                (Type::Int, Type::Int) => Ok(Type::Int),
                (Type::String, Type::String) => Ok(Type::String),
                (Type::List, Type::List) => Ok(Type::List),
                (Type::Dyn, Type::Int | Type::String | Type::List | Type::Dyn) => Ok(Type::Dyn),
                (Type::Int | Type::String | Type::List, Type::Dyn) => Ok(Type::Dyn),
                _ => Err(mismatch()),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                if left.fits(&Type::Int) && right.fits(&Type::Int) {
                    Ok(Type::Int)
                } else {
                    Err(mismatch())
                }
            }
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> PolicyResult<Program> {
        Environment::standard().compile(source)
    }

    #[test]
    fn default_rules_compile() {
        for rule in [
            r#"auth.uid != "" && auth.validated"#,
            r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).read"#,
            r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).delete"#,
            "auth.uid == graft.creator || auth.uid == data.creator",
            "graft.createdAt < at - 3600",
            r#"data.id.startsWith("pub-") && size(auth.group) > 0"#,
            r#"auth.group in ["staff", "ops"] ? true : auth.validated"#,
        ] {
            compile(rule).unwrap_or_else(|err| panic!("{rule}: {err}"));
        }
    }

    #[test]
    fn unknown_names_are_compile_errors() {
        assert!(matches!(compile("user.uid == \"a\""), Err(PolicyError::UnknownVariable(v)) if v == "user"));
        assert!(matches!(compile("auth.name == \"a\""), Err(PolicyError::UnknownField { field, .. }) if field == "name"));
        assert!(matches!(compile("owns(auth.uid)"), Err(PolicyError::UnknownFunction(_))));
        assert!(matches!(compile("acl(auth.uid).read"), Err(PolicyError::Arity { expected: 2, found: 1, .. })));
        assert!(matches!(compile("acl(auth.uid, \"c/i\").admin"), Err(PolicyError::UnknownField { .. })));
        assert!(compile("auth.uid == ").unwrap_err().is_compile_error());
    }

    #[test]
    fn type_errors() {
        assert!(matches!(compile("auth.uid && true"), Err(PolicyError::TypeMismatch(_))));
        assert!(matches!(compile("at + \"x\" == 1"), Err(PolicyError::TypeMismatch(_))));
        assert!(matches!(compile("acl(1, \"c/i\").read"), Err(PolicyError::TypeMismatch(_))));
        assert!(matches!(compile("auth.validated.x"), Err(PolicyError::UnknownField { .. })));
    }

    #[test]
    fn non_boolean_rules_are_rejected() {
        assert!(matches!(compile("auth.uid"), Err(PolicyError::NotBoolean(t)) if t == "string"));
        assert!(matches!(compile("1 + 2"), Err(PolicyError::NotBoolean(_))));
        // Dynamic results are checked at evaluation instead.
        assert!(compile("true ? auth.validated : \"x\"").is_ok());
    }
}
