//! Value types for the rill language
//!
//! Types are structural descriptors: a primitive, an array or map of an
//! element type, a function signature, or an interface (a named set of
//! exported member signatures). An unresolved interface is a placeholder
//! for a name the parser could not see into, such as a cross-package
//! reference; it must be replaced by a concrete type before compilation
//! finishes, and none may ever reach the VM.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A value type descriptor. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Number,
    String,
    Bool,
    Char,

    /// An array of the element type. Keys are implicit integer indexes.
    Array(Box<Type>),

    /// A map from string keys to the element type.
    Map(Box<Type>),

    /// A function signature: ordered argument and return types.
    Func {
        arguments: Vec<Type>,
        returns: Vec<Type>,
    },

    /// A named set of exported member signatures, such as the public
    /// surface of a package.
    Interface {
        name: String,
        members: BTreeMap<String, Type>,
    },

    /// A placeholder for a name that could not be resolved at parse time.
    UnresolvedInterface { name: String },
}

impl Type {
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    pub fn map(element: Type) -> Type {
        Type::Map(Box::new(element))
    }

    pub fn func(arguments: Vec<Type>, returns: Vec<Type>) -> Type {
        Type::Func { arguments, returns }
    }

    pub fn interface(name: impl Into<String>, members: BTreeMap<String, Type>) -> Type {
        Type::Interface { name: name.into(), members }
    }

    pub fn unresolved(name: impl Into<String>) -> Type {
        Type::UnresolvedInterface { name: name.into() }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(_))
    }

    pub fn is_func(&self) -> bool {
        matches!(self, Type::Func { .. })
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, Type::Interface { .. })
    }

    /// Element type of an array or map value.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(element) | Type::Map(element) => Some(element),
            _ => None,
        }
    }

    /// True if no unresolved interface remains anywhere in the type.
    pub fn is_resolved(&self) -> bool {
        match self {
            Type::UnresolvedInterface { .. } => false,
            Type::Array(element) | Type::Map(element) => element.is_resolved(),
            Type::Func { arguments, returns } => {
                arguments.iter().all(Type::is_resolved) && returns.iter().all(Type::is_resolved)
            }
            Type::Interface { members, .. } => members.values().all(Type::is_resolved),
            _ => true,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Number => write!(f, "number"),
            Type::String => write!(f, "string"),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::Array(element) => write!(f, "[]{}", element),
            Type::Map(element) => write!(f, "{{}}{}", element),
            Type::Func { arguments, returns } => {
                let args: Vec<String> = arguments.iter().map(Type::to_string).collect();
                write!(f, "func ({})", args.join(", "))?;
                match returns.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", returns[0]),
                    _ => {
                        let rets: Vec<String> = returns.iter().map(Type::to_string).collect();
                        write!(f, " ({})", rets.join(", "))
                    }
                }
            }
            Type::Interface { name, .. } => write!(f, "{}", name),
            Type::UnresolvedInterface { name } => write!(f, "{}", name),
        }
    }
}
