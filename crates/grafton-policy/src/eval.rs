//! Evaluation of compiled rules against bound variables.

use std::collections::BTreeMap;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{FunctionError, PolicyError, PolicyResult};
use crate::value::Value;

/// Read/write flags held by a user on a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AclGrant {
    pub read: bool,
    pub write: bool,
}

impl AclGrant {
    /// The object `acl()` returns. `graft` and `delete` follow `write`.
    pub fn to_value(self) -> Value {
        Value::map([
            ("read", Value::Bool(self.read)),
            ("write", Value::Bool(self.write)),
            ("graft", Value::Bool(self.write)),
            ("delete", Value::Bool(self.write)),
        ])
    }
}

/// Backs the `acl(uid, uri)` function.
pub trait AclSource {
    fn grant(&self, uid: &str, uri: &str) -> Result<AclGrant, FunctionError>;
}

/// An [`AclSource`] that grants nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAcl;

impl AclSource for NoAcl {
    fn grant(&self, _uid: &str, _uri: &str) -> Result<AclGrant, FunctionError> {
        Ok(AclGrant::default())
    }
}

/// `auth`: the caller. Anonymous callers have every field empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthVars {
    pub uid: String,
    pub email: String,
    pub validated: bool,
    pub group: String,
}

/// `data`: the record the rule is about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataVars {
    pub id: String,
    pub collection: String,
    pub creator: String,
}

/// `graft`: the graft the rule is about, zeroed for record rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraftVars {
    pub id: String,
    pub creator: String,
    /// Unix seconds.
    pub created_at: i64,
}

/// Every variable of the standard environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    pub auth: AuthVars,
    pub data: DataVars,
    pub graft: GraftVars,
    /// Current Unix time in seconds.
    pub at: i64,
}

impl Bindings {
    pub fn to_variables(&self) -> BTreeMap<String, Value> {
        let mut vars = BTreeMap::new();
        vars.insert(
            "auth".to_string(),
            Value::map([
                ("uid", Value::from(self.auth.uid.as_str())),
                ("email", Value::from(self.auth.email.as_str())),
                ("validated", Value::Bool(self.auth.validated)),
                ("group", Value::from(self.auth.group.as_str())),
            ]),
        );
        vars.insert(
            "data".to_string(),
            Value::map([
                ("id", Value::from(self.data.id.as_str())),
                ("collection", Value::from(self.data.collection.as_str())),
                ("creator", Value::from(self.data.creator.as_str())),
            ]),
        );
        vars.insert(
            "graft".to_string(),
            Value::map([
                ("id", Value::from(self.graft.id.as_str())),
                ("creator", Value::from(self.graft.creator.as_str())),
                ("createdAt", Value::Int(self.graft.created_at)),
            ]),
        );
        vars.insert("at".to_string(), Value::Int(self.at));
        vars
    }
}

/// Variable values plus host functions for one evaluation.
pub struct Activation<'a> {
    variables: BTreeMap<String, Value>,
    acl: &'a dyn AclSource,
}

impl<'a> Activation<'a> {
    pub fn new(acl: &'a dyn AclSource) -> Self {
        Self {
            variables: BTreeMap::new(),
            acl,
        }
    }

    pub fn from_bindings(bindings: &Bindings, acl: &'a dyn AclSource) -> Self {
        Self {
            variables: bindings.to_variables(),
            acl,
        }
    }

    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }
}

/// A checked rule, ready to evaluate any number of times.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    source: String,
    expr: Expr,
}

impl Program {
    pub(crate) fn new(source: &str, expr: Expr) -> Self {
        Self {
            source: source.to_string(),
            expr,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a decision. A non-boolean result is an error.
    pub fn eval(&self, activation: &Activation<'_>) -> PolicyResult<bool> {
        match self.eval_value(activation)? {
            Value::Bool(decision) => Ok(decision),
            other => Err(PolicyError::NotBoolean(other.type_name().to_string())),
        }
    }

    pub fn eval_value(&self, activation: &Activation<'_>) -> PolicyResult<Value> {
        Evaluator { activation }.eval(&self.expr)
    }
}

struct Evaluator<'e, 'a> {
    activation: &'e Activation<'a>,
}

fn expect_bool(value: Value, context: &str) -> PolicyResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| PolicyError::mismatch(format!("{context} expects bool, found {}", value.type_name())))
}

fn expect_str<'v>(value: &'v Value, context: &str) -> PolicyResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| PolicyError::mismatch(format!("{context} expects string, found {}", value.type_name())))
}

fn overflow() -> PolicyError {
    PolicyError::evaluation("integer overflow")
}

impl Evaluator<'_, '_> {
    fn eval(&self, expr: &Expr) -> PolicyResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<PolicyResult<Vec<_>>>()
                .map(Value::List),
            Expr::Ident(name) => self
                .activation
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| PolicyError::UnknownVariable(name.clone())),
            Expr::Select(operand, field) => match self.eval(operand)? {
                Value::Map(mut map) => map
                    .remove(field)
                    .ok_or_else(|| PolicyError::evaluation(format!("no such key: {field}"))),
                other => Err(PolicyError::UnknownField {
                    field: field.clone(),
                    ty: other.type_name().to_string(),
                }),
            },
            Expr::Call(name, args) => self.call(name, args),
            Expr::Method(receiver, name, args) => self.method(receiver, name, args),
            Expr::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!expect_bool(self.eval(operand)?, "!")?))
            }
            Expr::Unary(UnaryOp::Neg, operand) => match self.eval(operand)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                other => Err(PolicyError::mismatch(format!("unary - of {}", other.type_name()))),
            },
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !expect_bool(self.eval(lhs)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(self.eval(rhs)?, "&&")?))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if expect_bool(self.eval(lhs)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(self.eval(rhs)?, "||")?))
            }
            Expr::Binary(op, lhs, rhs) => binary(*op, self.eval(lhs)?, self.eval(rhs)?),
            Expr::Conditional(condition, then, otherwise) => {
                if expect_bool(self.eval(condition)?, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn call(&self, name: &str, args: &[Expr]) -> PolicyResult<Value> {
        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<PolicyResult<Vec<_>>>()?;
        match (name, values.as_slice()) {
            ("size", [value]) => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Map(map) => map.len(),
                    other => {
                        return Err(PolicyError::mismatch(format!("size() of {}", other.type_name())))
                    }
                };
                i64::try_from(len).map(Value::Int).map_err(|_| overflow())
            }
            ("acl", [uid, uri]) => {
                let uid = expect_str(uid, "acl()")?;
                let uri = expect_str(uri, "acl()")?;
                let grant = self
                    .activation
                    .acl
                    .grant(uid, uri)
                    .map_err(|source| PolicyError::Function {
                        name: "acl".into(),
                        source,
                    })?;
                Ok(grant.to_value())
            }
            ("size" | "acl", _) => Err(PolicyError::Arity {
                function: name.to_string(),
                expected: if name == "size" { 1 } else { 2 },
                found: values.len(),
            }),
            _ => Err(PolicyError::UnknownFunction(name.to_string())),
        }
    }

    fn method(&self, receiver: &Expr, name: &str, args: &[Expr]) -> PolicyResult<Value> {
        let receiver = self.eval(receiver)?;
        let subject = expect_str(&receiver, name)?;
        let [arg] = args else {
            return Err(PolicyError::Arity {
                function: name.to_string(),
                expected: 1,
                found: args.len(),
            });
        };
        let arg = self.eval(arg)?;
        let needle = expect_str(&arg, name)?;
        let result = match name {
            "startsWith" => subject.starts_with(needle),
            "endsWith" => subject.ends_with(needle),
            "contains" => subject.contains(needle),
            _ => return Err(PolicyError::UnknownFunction(name.to_string())),
        };
        Ok(Value::Bool(result))
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> PolicyResult<Value> {
    let mismatch = |lhs: &Value, rhs: &Value| {
        PolicyError::mismatch(format!(
            "no operator {} for {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))
    };
    match (op, lhs, rhs) {
        (BinaryOp::Eq, lhs, rhs) => Ok(Value::Bool(lhs == rhs)),
        (BinaryOp::Ne, lhs, rhs) => Ok(Value::Bool(lhs != rhs)),
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, lhs, rhs) => {
            let ordering = match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => return Err(mismatch(&lhs, &rhs)),
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        (BinaryOp::In, needle, Value::List(items)) => Ok(Value::Bool(items.contains(&needle))),
        (BinaryOp::In, Value::String(key), Value::Map(map)) => Ok(Value::Bool(map.contains_key(&key))),
        (BinaryOp::Add, Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (BinaryOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Div | BinaryOp::Rem, Value::Int(_), Value::Int(0)) => {
            Err(PolicyError::evaluation("division by zero"))
        }
        (BinaryOp::Div, Value::Int(a), Value::Int(b)) => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
        (BinaryOp::Rem, Value::Int(a), Value::Int(b)) => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        (_, lhs, rhs) => Err(mismatch(&lhs, &rhs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use std::cell::Cell;

    /// Grants `alice` write on `notes/*` and counts lookups.
    struct Table {
        calls: Cell<usize>,
    }

    impl AclSource for Table {
        fn grant(&self, uid: &str, uri: &str) -> Result<AclGrant, FunctionError> {
            self.calls.set(self.calls.get() + 1);
            if uid == "broken" {
                return Err("permission table unavailable".into());
            }
            Ok(AclGrant {
                read: uid == "alice" || uid == "bob",
                write: uid == "alice" && uri.starts_with("notes/"),
            })
        }
    }

    fn bindings(uid: &str, creator: &str) -> Bindings {
        Bindings {
            auth: AuthVars {
                uid: uid.into(),
                email: format!("{uid}@example.com"),
                validated: true,
                group: String::new(),
            },
            data: DataVars {
                id: "a".into(),
                collection: "notes".into(),
                creator: creator.into(),
            },
            graft: GraftVars::default(),
            at: 1_700_000_000,
        }
    }

    fn run(rule: &str, uid: &str, creator: &str) -> PolicyResult<bool> {
        let acl = Table { calls: Cell::new(0) };
        let program = Environment::standard().compile(rule)?;
        program.eval(&Activation::from_bindings(&bindings(uid, creator), &acl))
    }

    const READ: &str =
        r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).read"#;
    const DELETE: &str =
        r#"auth.uid == data.creator || acl(auth.uid, data.collection + "/" + data.id).delete"#;

    #[test]
    fn ownership_and_acl() {
        assert!(run(READ, "carol", "carol").unwrap());
        assert!(run(READ, "bob", "carol").unwrap());
        assert!(!run(READ, "mallory", "carol").unwrap());
        // delete follows the write flag
        assert!(run(DELETE, "alice", "carol").unwrap());
        assert!(!run(DELETE, "bob", "carol").unwrap());
    }

    #[test]
    fn logical_operators_short_circuit() {
        let acl = Table { calls: Cell::new(0) };
        let program = Environment::standard().compile(READ).unwrap();
        let activation = Activation::from_bindings(&bindings("carol", "carol"), &acl);
        assert!(program.eval(&activation).unwrap());
        assert_eq!(acl.calls.get(), 0);

        let activation = Activation::from_bindings(&bindings("bob", "carol"), &acl);
        assert!(program.eval(&activation).unwrap());
        assert_eq!(acl.calls.get(), 1);

        // Right side would divide by zero if evaluated.
        assert!(!run("false && 1 / 0 == 1", "x", "y").unwrap());
        assert!(run("true || 1 / 0 == 1", "x", "y").unwrap());
    }

    #[test]
    fn host_function_errors_surface() {
        let err = run(READ, "broken", "carol").unwrap_err();
        assert!(matches!(err, PolicyError::Function { ref name, .. } if name == "acl"));
    }

    #[test]
    fn arithmetic_and_strings() {
        assert!(run("at - 100 < at && at % 10 == 0", "x", "y").unwrap());
        assert!(run(r#"data.collection + "/" + data.id == "notes/a""#, "x", "y").unwrap());
        assert!(run(r#"data.collection.startsWith("no") && data.collection.endsWith("es")"#, "x", "y").unwrap());
        assert!(run(r#"size("héllo") == 5 && size([1, 2]) == 2"#, "x", "y").unwrap());
        assert!(run(r#"auth.uid in ["x", "z"] && "uid" in auth"#, "x", "y").unwrap());
        assert!(run(r#"-(-3) == 3 && !(1 > 2) && "a" < "b""#, "x", "y").unwrap());
        assert!(run("[1] + [2] == [1, 2]", "x", "y").unwrap());
        assert!(run(r#"auth.validated ? data.id == "a" : false"#, "x", "y").unwrap());
    }

    #[test]
    fn runtime_errors() {
        assert!(matches!(
            run("at / (at - at) == 0", "x", "y"),
            Err(PolicyError::Evaluation(m)) if m.contains("division by zero")
        ));
        assert!(matches!(
            run("9223372036854775807 + at > 0", "x", "y"),
            Err(PolicyError::Evaluation(m)) if m.contains("overflow")
        ));
    }

    #[test]
    fn dynamic_non_boolean_result_is_an_error() {
        let err = run(r#"auth.validated ? "yes" : false"#, "x", "y").unwrap_err();
        assert!(matches!(err, PolicyError::NotBoolean(t) if t == "string"));
    }

    #[test]
    fn bind_overrides_variables() {
        let program = Environment::standard().compile("at > 10").unwrap();
        let activation = Activation::from_bindings(&Bindings::default(), &NoAcl).bind("at", Value::Int(11));
        assert!(program.eval(&activation).unwrap());
    }
}
