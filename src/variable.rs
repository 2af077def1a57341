//! Controller variable classes and the values they carry
//!
//! The RC8 exposes seven typed global variable namespaces. Each has a fixed
//! index range and a value shape; vector lengths are controller-defined and
//! are passed through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::{RC8Error, Result};

/// Global variable namespace on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariableClass {
    IO,
    S,
    I,
    F,
    P,
    J,
    V,
}

/// Shape of the value stored in a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Integer,
    Float,
    Text,
    Vector,
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueShape::Integer => "integer",
            ValueShape::Float => "float",
            ValueShape::Text => "string",
            ValueShape::Vector => "float vector",
        };
        f.write_str(name)
    }
}

impl VariableClass {
    pub const ALL: [VariableClass; 7] = [
        VariableClass::IO,
        VariableClass::S,
        VariableClass::I,
        VariableClass::F,
        VariableClass::P,
        VariableClass::J,
        VariableClass::V,
    ];

    /// Highest valid index (inclusive)
    pub fn max_index(self) -> u16 {
        match self {
            VariableClass::IO => 499,
            VariableClass::S | VariableClass::V => 47,
            VariableClass::I | VariableClass::F | VariableClass::P | VariableClass::J => 97,
        }
    }

    /// Number of addressable variables in this class
    pub fn capacity(self) -> usize {
        self.max_index() as usize + 1
    }

    pub fn shape(self) -> ValueShape {
        match self {
            VariableClass::IO | VariableClass::I => ValueShape::Integer,
            VariableClass::S => ValueShape::Text,
            VariableClass::F => ValueShape::Float,
            VariableClass::P | VariableClass::J | VariableClass::V => ValueShape::Vector,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            VariableClass::IO => "IO",
            VariableClass::S => "S",
            VariableClass::I => "I",
            VariableClass::F => "F",
            VariableClass::P => "P",
            VariableClass::J => "J",
            VariableClass::V => "V",
        }
    }

    /// Validate an index against this class's range
    pub fn check_index(self, index: i64) -> Result<u16> {
        if index < 0 || index > self.max_index() as i64 {
            return Err(RC8Error::IndexOutOfRange {
                class: self,
                index,
                max: self.max_index(),
            });
        }
        Ok(index as u16)
    }

    /// Remote object name, e.g. `IO12` or `P3`
    pub fn variable_name(self, index: u16) -> String {
        format!("{}{}", self.prefix(), index)
    }

    /// Split a remote variable name such as `S10` into class and index.
    pub fn parse_variable_name(name: &str) -> Option<(VariableClass, u16)> {
        // IO first so "IO3" is not read as class I with index "O3"
        let (class, digits) = if let Some(rest) = name.strip_prefix("IO") {
            (VariableClass::IO, rest)
        } else {
            let mut chars = name.chars();
            let class = chars.next()?.to_string().parse::<VariableClass>().ok()?;
            (class, chars.as_str())
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let index = digits.parse::<u16>().ok()?;
        (index <= class.max_index()).then_some((class, index))
    }

    /// Check a value against this class's shape.
    ///
    /// Integers are widened for the float class; every other mismatch is
    /// rejected before anything reaches the controller.
    pub fn coerce(self, value: Value) -> Result<Value> {
        match (self.shape(), value) {
            (ValueShape::Integer, v @ Value::Integer(_)) => Ok(v),
            (ValueShape::Float, v @ Value::Float(_)) => Ok(v),
            (ValueShape::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (ValueShape::Text, v @ Value::Text(_)) => Ok(v),
            (ValueShape::Vector, v @ Value::Vector(_)) => Ok(v),
            (expected, other) => Err(RC8Error::ValueMismatch {
                target: self.to_string(),
                expected,
                found: other.shape(),
            }),
        }
    }
}

impl fmt::Display for VariableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for VariableClass {
    type Err = RC8Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IO" => Ok(VariableClass::IO),
            "S" => Ok(VariableClass::S),
            "I" => Ok(VariableClass::I),
            "F" => Ok(VariableClass::F),
            "P" => Ok(VariableClass::P),
            "J" => Ok(VariableClass::J),
            "V" => Ok(VariableClass::V),
            other => Err(RC8Error::Config(format!("Unknown variable class: {}", other))),
        }
    }
}

/// Value exchanged with a controller variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
}

impl Value {
    pub fn shape(&self) -> ValueShape {
        match self {
            Value::Integer(_) => ValueShape::Integer,
            Value::Float(_) => ValueShape::Float,
            Value::Text(_) => ValueShape::Text,
            Value::Vector(_) => ValueShape::Vector,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Vector(v) => write!(f, "{:?}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_ranges() {
        assert_eq!(VariableClass::IO.check_index(0).unwrap(), 0);
        assert_eq!(VariableClass::IO.check_index(499).unwrap(), 499);
        assert!(matches!(
            VariableClass::IO.check_index(500),
            Err(RC8Error::IndexOutOfRange { max: 499, .. })
        ));
        assert!(VariableClass::IO.check_index(-1).is_err());
        assert!(VariableClass::S.check_index(47).is_ok());
        assert!(VariableClass::V.check_index(48).is_err());
        assert!(VariableClass::J.check_index(97).is_ok());
        assert!(VariableClass::F.check_index(98).is_err());
    }

    #[test]
    fn test_variable_names() {
        assert_eq!(VariableClass::IO.variable_name(12), "IO12");
        assert_eq!(VariableClass::parse_variable_name("IO12"), Some((VariableClass::IO, 12)));
        assert_eq!(VariableClass::parse_variable_name("I7"), Some((VariableClass::I, 7)));
        assert_eq!(VariableClass::parse_variable_name("S48"), None);
        assert_eq!(VariableClass::parse_variable_name("@STATUS"), None);
        assert_eq!(VariableClass::parse_variable_name("P"), None);
    }

    #[test]
    fn test_coerce_widens_integer_for_float_class() {
        assert_eq!(VariableClass::F.coerce(Value::Integer(3)).unwrap(), Value::Float(3.0));
        assert!(matches!(
            VariableClass::I.coerce(Value::Text("x".into())),
            Err(RC8Error::ValueMismatch { expected: ValueShape::Integer, found: ValueShape::Text, .. })
        ));
        assert!(VariableClass::P.coerce(Value::Vector(vec![1.0; 7])).is_ok());
    }

    #[test]
    fn test_untagged_json_values() {
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Integer(42));
        let v: Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, Value::Float(1.5));
        let v: Value = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(v, Value::Text("hello".into()));
        let v: Value = serde_json::from_str("[1, 2.5, 3]").unwrap();
        assert_eq!(v, Value::Vector(vec![1.0, 2.5, 3.0]));
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("io".parse::<VariableClass>().unwrap(), VariableClass::IO);
        assert_eq!(" p ".parse::<VariableClass>().unwrap(), VariableClass::P);
        assert!("X".parse::<VariableClass>().is_err());
        let class: VariableClass = serde_json::from_str("\"IO\"").unwrap();
        assert_eq!(class, VariableClass::IO);
    }
}
