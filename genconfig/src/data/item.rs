use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Value type of a registered knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KnobType {
    /// Integer value, emitted verbatim.
    Int,
    /// String value, emitted quoted.
    Str,
    /// Boolean value, emitted as `y`/`n`.
    Bool,
    /// Tristate value, one of `n`, `m`, `y`.
    Tristate,
    /// One alternative of a mutually exclusive choice group.
    BoolChoice,
}

impl fmt::Display for KnobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KnobType::Int => "int",
            KnobType::Str => "str",
            KnobType::Bool => "bool",
            KnobType::Tristate => "tristate",
            KnobType::BoolChoice => "boolChoice",
        };
        f.write_str(name)
    }
}

/// A document value that does not have the type its knob declares.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, found {actual}")]
pub struct TypeMismatch {
    /// Human readable description of the accepted values.
    pub expected: String,
    /// The offending value.
    pub actual: String,
}

impl TypeMismatch {
    fn new(expected: impl Into<String>, actual: &Value) -> Self {
        Self {
            expected: expected.into(),
            actual: describe(actual),
        }
    }
}

/// Tristate knob state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tristate {
    /// `n`: disabled.
    No,
    /// `m`: built as a module.
    Module,
    /// `y`: built in.
    Yes,
}

impl Tristate {
    /// Parse the single-letter document form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "n" => Some(Tristate::No),
            "m" => Some(Tristate::Module),
            "y" => Some(Tristate::Yes),
            _ => None,
        }
    }

    /// Single-letter document form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tristate::No => "n",
            Tristate::Module => "m",
            Tristate::Yes => "y",
        }
    }

    /// Value written into a C header, `None` when the knob is off.
    pub fn c_value(&self) -> Option<u8> {
        match self {
            Tristate::No => None,
            Tristate::Yes => Some(1),
            Tristate::Module => Some(2),
        }
    }
}

impl KnobType {
    /// Check a leaf value against this type.
    ///
    /// `BoolChoice` values are checked with [`check_choice`] since the
    /// accepted set depends on the group.
    pub fn check(&self, value: &Value) -> Result<(), TypeMismatch> {
        match self {
            KnobType::Int => match value {
                Value::Number(n) if n.as_i64().is_some() => Ok(()),
                _ => Err(TypeMismatch::new("integer", value)),
            },
            KnobType::Str => match value {
                Value::String(_) => Ok(()),
                _ => Err(TypeMismatch::new("string", value)),
            },
            KnobType::Bool => match value {
                Value::Bool(_) => Ok(()),
                _ => Err(TypeMismatch::new("boolean", value)),
            },
            KnobType::Tristate => match value {
                Value::String(s) if Tristate::parse(s).is_some() => Ok(()),
                _ => Err(TypeMismatch::new("one of \"n\", \"m\", \"y\"", value)),
            },
            KnobType::BoolChoice => match value {
                Value::String(_) => Ok(()),
                _ => Err(TypeMismatch::new("choice key string", value)),
            },
        }
    }

    /// Value implied by a `select` that carries no explicit value.
    ///
    /// Returns `None` for types that have no notion of "on".
    pub fn implied_truth(&self) -> Option<Value> {
        match self {
            KnobType::Bool => Some(Value::Bool(true)),
            KnobType::Tristate => Some(Value::String(Tristate::Yes.as_str().to_string())),
            KnobType::Int | KnobType::Str | KnobType::BoolChoice => None,
        }
    }
}

/// Check that `value` selects one of the declared choice keys.
pub fn check_choice<'a>(
    keys: impl IntoIterator<Item = &'a str> + Clone,
    value: &Value,
) -> Result<(), TypeMismatch> {
    let expected = || {
        let keys: Vec<&str> = keys.clone().into_iter().collect();
        format!("one of: {keys:?}")
    };
    match value {
        Value::String(s) if keys.clone().into_iter().any(|k| k == s.as_str()) => Ok(()),
        _ => Err(TypeMismatch::new(expected(), value)),
    }
}

/// Short description of a JSON value for diagnostics.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leaf_checks() {
        assert!(KnobType::Int.check(&json!(100)).is_ok());
        assert!(KnobType::Int.check(&json!(1.5)).is_err());
        assert!(KnobType::Int.check(&json!("100")).is_err());
        assert!(KnobType::Str.check(&json!("abc")).is_ok());
        assert!(KnobType::Bool.check(&json!(false)).is_ok());
        assert!(KnobType::Bool.check(&json!("y")).is_err());
        assert!(KnobType::Tristate.check(&json!("m")).is_ok());
        assert!(KnobType::Tristate.check(&json!("yes")).is_err());
    }

    #[test]
    fn test_mismatch_message() {
        let err = KnobType::Bool.check(&json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "expected boolean, found number 1");
    }

    #[test]
    fn test_choice_keys() {
        let keys = ["tiny", "rr"];
        assert!(check_choice(keys, &json!("rr")).is_ok());
        let err = check_choice(keys, &json!("fifo")).unwrap_err();
        assert_eq!(err.expected, r#"one of: ["tiny", "rr"]"#);
        assert!(check_choice(keys, &json!(true)).is_err());
    }

    #[test]
    fn test_tristate() {
        assert_eq!(Tristate::parse("m"), Some(Tristate::Module));
        assert_eq!(Tristate::Module.c_value(), Some(2));
        assert_eq!(Tristate::Yes.c_value(), Some(1));
        assert_eq!(Tristate::No.c_value(), None);
        assert_eq!(KnobType::Tristate.implied_truth(), Some(json!("y")));
        assert_eq!(KnobType::Int.implied_truth(), None);
    }
}
