// types.rs — Value data types for the program graph
//
// `ProgramDataType` describes what flows through an output port: primitive
// kind (absent for structs), upsample factor (absent for compile-time
// constants), and array-ness. `ModuleDataType` is the declared type of a
// native module parameter, with a relative upsample factor and a runtime
// mutability class.
//
// Preconditions: none (types only).
// Failure modes: inconsistent type combinations → `DataTypeError`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Primitive and mutability enums ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Float,
    Double,
    Int,
    Bool,
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Int => "int",
            PrimitiveType::Bool => "bool",
            PrimitiveType::String => "string",
        };
        f.write_str(name)
    }
}

/// How a native module parameter behaves with respect to compile-time
/// constness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMutability {
    /// Must be a compile-time constant.
    Constant,
    /// Constant iff every dependent-constant input of the call is constant.
    DependentConstant,
    /// Accepts or produces values that vary at run time.
    Variable,
}

// ── ProgramDataType ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataTypeError {
    #[error("upsample factor must be positive")]
    ZeroUpsampleFactor,
    #[error("struct values cannot carry an upsample factor")]
    VariableStruct,
    #[error("arrays of structs are not supported")]
    StructArray,
    #[error("string values must be compile-time constants")]
    VariableString,
}

/// Type of a value flowing through an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramDataType {
    primitive_type: Option<PrimitiveType>,
    upsample_factor: Option<u32>,
    is_array: bool,
}

impl ProgramDataType {
    pub fn new(
        primitive_type: Option<PrimitiveType>,
        upsample_factor: Option<u32>,
        is_array: bool,
    ) -> Result<Self, DataTypeError> {
        if upsample_factor == Some(0) {
            return Err(DataTypeError::ZeroUpsampleFactor);
        }
        match primitive_type {
            None if upsample_factor.is_some() => return Err(DataTypeError::VariableStruct),
            None if is_array => return Err(DataTypeError::StructArray),
            Some(PrimitiveType::String) if upsample_factor.is_some() => {
                return Err(DataTypeError::VariableString)
            }
            _ => {}
        }
        Ok(ProgramDataType {
            primitive_type,
            upsample_factor,
            is_array,
        })
    }

    /// A compile-time constant scalar.
    pub fn constant(primitive_type: PrimitiveType) -> Self {
        ProgramDataType {
            primitive_type: Some(primitive_type),
            upsample_factor: None,
            is_array: false,
        }
    }

    /// A run-time varying scalar at `upsample_factor`.
    pub fn variable(primitive_type: PrimitiveType, upsample_factor: u32) -> Self {
        assert!(upsample_factor > 0, "upsample factor must be positive");
        assert!(
            primitive_type != PrimitiveType::String,
            "string values cannot vary at run time"
        );
        ProgramDataType {
            primitive_type: Some(primitive_type),
            upsample_factor: Some(upsample_factor),
            is_array: false,
        }
    }

    pub fn structure() -> Self {
        ProgramDataType {
            primitive_type: None,
            upsample_factor: None,
            is_array: false,
        }
    }

    pub fn into_array(self) -> Self {
        assert!(!self.is_struct(), "arrays of structs are not supported");
        ProgramDataType {
            is_array: true,
            ..self
        }
    }

    pub fn into_element(self) -> Self {
        ProgramDataType {
            is_array: false,
            ..self
        }
    }

    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        self.primitive_type
    }

    pub fn upsample_factor(&self) -> Option<u32> {
        self.upsample_factor
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    pub fn is_constant(&self) -> bool {
        self.upsample_factor.is_none()
    }

    pub fn is_struct(&self) -> bool {
        self.primitive_type.is_none()
    }
}

impl fmt::Display for ProgramDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.primitive_type {
            Some(p) => write!(f, "{}", p)?,
            None => write!(f, "struct")?,
        }
        if self.is_array {
            write!(f, "[]")?;
        }
        match self.upsample_factor {
            Some(u) => write!(f, "@{}", u),
            None => write!(f, " const"),
        }
    }
}

// ── ModuleDataType ──────────────────────────────────────────────────────────

/// Declared type of a native module parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleDataType {
    pub runtime_mutability: RuntimeMutability,
    pub primitive_type: PrimitiveType,
    /// Relative to the call's own upsample factor.
    #[serde(default = "default_relative_factor")]
    pub upsample_factor: u32,
    #[serde(default)]
    pub is_array: bool,
}

fn default_relative_factor() -> u32 {
    1
}

impl ModuleDataType {
    pub fn new(
        runtime_mutability: RuntimeMutability,
        primitive_type: PrimitiveType,
        upsample_factor: u32,
        is_array: bool,
    ) -> Self {
        ModuleDataType {
            runtime_mutability,
            primitive_type,
            upsample_factor,
            is_array,
        }
    }
}

// ── ConstantValue ───────────────────────────────────────────────────────────

/// A literal compile-time value.
///
/// Floating-point values compare by bit pattern so that equality is
/// reflexive and usable as a pattern-matching key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstantValue {
    Float(f32),
    Double(f64),
    Int(i32),
    Bool(bool),
    String(String),
}

impl ConstantValue {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            ConstantValue::Float(_) => PrimitiveType::Float,
            ConstantValue::Double(_) => PrimitiveType::Double,
            ConstantValue::Int(_) => PrimitiveType::Int,
            ConstantValue::Bool(_) => PrimitiveType::Bool,
            ConstantValue::String(_) => PrimitiveType::String,
        }
    }

    pub fn data_type(&self) -> ProgramDataType {
        ProgramDataType::constant(self.primitive_type())
    }
}

impl PartialEq for ConstantValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstantValue::Float(a), ConstantValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ConstantValue::Double(a), ConstantValue::Double(b)) => a.to_bits() == b.to_bits(),
            (ConstantValue::Int(a), ConstantValue::Int(b)) => a == b,
            (ConstantValue::Bool(a), ConstantValue::Bool(b)) => a == b,
            (ConstantValue::String(a), ConstantValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstantValue {}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Float(v) => write!(f, "{:?}f", v),
            ConstantValue::Double(v) => write!(f, "{:?}", v),
            ConstantValue::Int(v) => write!(f, "{}", v),
            ConstantValue::Bool(v) => write!(f, "{}", v),
            ConstantValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_upsample_factor_is_constant() {
        let t = ProgramDataType::constant(PrimitiveType::Float);
        assert!(t.is_constant());
        assert!(!t.is_struct());
        assert!(!ProgramDataType::variable(PrimitiveType::Float, 2).is_constant());
    }

    #[test]
    fn struct_type_is_constant_and_scalar() {
        let t = ProgramDataType::structure();
        assert!(t.is_struct());
        assert!(t.is_constant());
        assert_eq!(
            ProgramDataType::new(None, Some(1), false),
            Err(DataTypeError::VariableStruct)
        );
        assert_eq!(
            ProgramDataType::new(None, None, true),
            Err(DataTypeError::StructArray)
        );
    }

    #[test]
    fn rejects_zero_factor_and_variable_strings() {
        assert_eq!(
            ProgramDataType::new(Some(PrimitiveType::Int), Some(0), false),
            Err(DataTypeError::ZeroUpsampleFactor)
        );
        assert_eq!(
            ProgramDataType::new(Some(PrimitiveType::String), Some(1), false),
            Err(DataTypeError::VariableString)
        );
    }

    #[test]
    fn equality_is_structural() {
        let a = ProgramDataType::new(Some(PrimitiveType::Double), Some(4), true).unwrap();
        let b = ProgramDataType::variable(PrimitiveType::Double, 4).into_array();
        assert_eq!(a, b);
        assert_ne!(a, b.into_element());
    }

    #[test]
    fn display_forms() {
        assert_eq!(
            ProgramDataType::variable(PrimitiveType::Float, 2)
                .into_array()
                .to_string(),
            "float[]@2"
        );
        assert_eq!(
            ProgramDataType::constant(PrimitiveType::Bool).to_string(),
            "bool const"
        );
    }

    #[test]
    fn float_constants_compare_by_bits() {
        assert_eq!(ConstantValue::Float(f32::NAN), ConstantValue::Float(f32::NAN));
        assert_ne!(ConstantValue::Float(0.0), ConstantValue::Float(-0.0));
        assert_ne!(ConstantValue::Float(1.0), ConstantValue::Double(1.0));
    }

    #[test]
    fn constant_value_serde_is_tagged() {
        let v: ConstantValue = serde_json::from_str(r#"{"int": 3}"#).unwrap();
        assert_eq!(v, ConstantValue::Int(3));
        assert_eq!(v.primitive_type(), PrimitiveType::Int);
    }
}
