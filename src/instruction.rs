//! Bytecode instructions for the rill VM
//!
//! Instructions operate on named registers inside a function's frame. The
//! instruction set is a closed sum type: the VM's dispatch loop matches
//! exhaustively, so adding an instruction without execution semantics is a
//! compile error.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Literal;
use crate::types::Type;

/// Marker prefix for a register resolved against the defining (enclosing)
/// frame rather than the current one.
const PARENT_SCOPE_PREFIX: char = '^';

/// A symbolic register name, scoped to one frame. Ordinary registers are
/// either allocator-issued numbers ("0", "1", ...) or variable names;
/// parent-scope registers carry a `^` prefix.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register(String);

impl Register {
    /// A register that resolves `name` in the defining frame chain.
    pub fn parent(name: &str) -> Register {
        Register(format!("{}{}", PARENT_SCOPE_PREFIX, name))
    }

    pub fn is_parent_scope(&self) -> bool {
        self.0.starts_with(PARENT_SCOPE_PREFIX)
    }

    /// The enclosing-frame register name, if this is a parent-scope
    /// register.
    pub fn parent_name(&self) -> Option<&str> {
        self.0.strip_prefix(PARENT_SCOPE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Register {
    fn from(name: &str) -> Register {
        Register(name.to_string())
    }
}

impl From<String> for Register {
    fn from(name: String) -> Register {
        Register(name)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic register allocator. Registers are never freed or reused
/// within a function; each compilation owns its own counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterAllocator {
    next: usize,
}

impl RegisterAllocator {
    pub fn alloc(&mut self) -> Register {
        let register = Register(self.next.to_string());
        self.next += 1;
        register
    }
}

/// One bytecode operation. Jump targets are absolute instruction indexes
/// within the owning function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Copy a literal into a register.
    Assign { result: Register, value: Literal },

    /// Copy one register's value into another.
    Move { result: Register, source: Register },

    // Arithmetic on numbers; result precision is the max of the operands.
    Add { left: Register, right: Register, result: Register },
    Subtract { left: Register, right: Register, result: Register },
    Multiply { left: Register, right: Register, result: Register },
    Divide { left: Register, right: Register, result: Register },
    Remainder { left: Register, right: Register, result: Register },

    // Comparison; results are booleans.
    Equal { left: Register, right: Register, result: Register },
    NotEqual { left: Register, right: Register, result: Register },
    LessThan { left: Register, right: Register, result: Register },
    LessThanEqual { left: Register, right: Register, result: Register },
    GreaterThan { left: Register, right: Register, result: Register },
    GreaterThanEqual { left: Register, right: Register, result: Register },

    // Logic on booleans.
    And { left: Register, right: Register, result: Register },
    Or { left: Register, right: Register, result: Register },
    Not { value: Register, result: Register },

    /// String concatenation through each operand's textual value.
    Concat { left: Register, right: Register, result: Register },

    // Control flow.
    Jump { to: usize },
    JumpIfTrue { condition: Register, to: usize },
    JumpIfFalse { condition: Register, to: usize },

    // Arrays.
    ArrayAlloc { kind: Type, size: Register, result: Register },
    ArraySet { array: Register, index: Register, value: Register },
    ArrayGet { array: Register, index: Register, result: Register },

    // Maps.
    MapAlloc { kind: Type, size: Register, result: Register },
    MapSet { map: Register, key: Register, value: Register },
    MapGet { map: Register, key: Register, result: Register },

    /// Element, key, or rune count depending on the argument's kind.
    Len { argument: Register, result: Register },

    /// Call a function. `function` is either a register holding a function
    /// reference or a unique compiled name; results are copied into the
    /// destination registers on return.
    Call {
        function: String,
        arguments: Vec<Register>,
        results: Vec<Register>,
    },

    /// Return zero or more register values to the caller.
    Return { results: Vec<Register> },

    /// Materialize a package's exported interface as a value.
    LoadPackage { package: String, result: Register },

    /// Mark that the function value in `register` captures the frame
    /// active at this point; parent-scope registers inside it resolve
    /// against that frame when it is called.
    ParentScope { register: Register },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Assign { result, value } => write!(f, "{} = {:?}", result, value),
            Instruction::Move { result, source } => write!(f, "{} = {}", result, source),
            Instruction::Add { left, right, result } => write!(f, "{} = {} + {}", result, left, right),
            Instruction::Subtract { left, right, result } => write!(f, "{} = {} - {}", result, left, right),
            Instruction::Multiply { left, right, result } => write!(f, "{} = {} * {}", result, left, right),
            Instruction::Divide { left, right, result } => write!(f, "{} = {} / {}", result, left, right),
            Instruction::Remainder { left, right, result } => write!(f, "{} = {} % {}", result, left, right),
            Instruction::Equal { left, right, result } => write!(f, "{} = {} == {}", result, left, right),
            Instruction::NotEqual { left, right, result } => write!(f, "{} = {} != {}", result, left, right),
            Instruction::LessThan { left, right, result } => write!(f, "{} = {} < {}", result, left, right),
            Instruction::LessThanEqual { left, right, result } => write!(f, "{} = {} <= {}", result, left, right),
            Instruction::GreaterThan { left, right, result } => write!(f, "{} = {} > {}", result, left, right),
            Instruction::GreaterThanEqual { left, right, result } => write!(f, "{} = {} >= {}", result, left, right),
            Instruction::And { left, right, result } => write!(f, "{} = {} and {}", result, left, right),
            Instruction::Or { left, right, result } => write!(f, "{} = {} or {}", result, left, right),
            Instruction::Not { value, result } => write!(f, "{} = !{}", result, value),
            Instruction::Concat { left, right, result } => write!(f, "{} = concat {} {}", result, left, right),
            Instruction::Jump { to } => write!(f, "jump {}", to),
            Instruction::JumpIfTrue { condition, to } => write!(f, "if {} jump {}", condition, to),
            Instruction::JumpIfFalse { condition, to } => write!(f, "if !{} jump {}", condition, to),
            Instruction::ArrayAlloc { kind, size, result } => {
                write!(f, "{} = alloc []{} size {}", result, kind, size)
            }
            Instruction::ArraySet { array, index, value } => {
                write!(f, "{}[{}] = {}", array, index, value)
            }
            Instruction::ArrayGet { array, index, result } => {
                write!(f, "{} = {}[{}]", result, array, index)
            }
            Instruction::MapAlloc { kind, size, result } => {
                write!(f, "{} = alloc {{}}{} size {}", result, kind, size)
            }
            Instruction::MapSet { map, key, value } => write!(f, "{}[{}] = {}", map, key, value),
            Instruction::MapGet { map, key, result } => write!(f, "{} = {}[{}]", result, map, key),
            Instruction::Len { argument, result } => write!(f, "{} = len({})", result, argument),
            Instruction::Call { function, arguments, results } => {
                let args: Vec<String> = arguments.iter().map(Register::to_string).collect();
                let rets: Vec<String> = results.iter().map(Register::to_string).collect();
                write!(f, "{} = call {}({})", rets.join(", "), function, args.join(", "))
            }
            Instruction::Return { results } => {
                let rets: Vec<String> = results.iter().map(Register::to_string).collect();
                write!(f, "return {}", rets.join(", "))
            }
            Instruction::LoadPackage { package, result } => {
                write!(f, "{} = package {}", result, package)
            }
            Instruction::ParentScope { register } => write!(f, "parent scope {}", register),
        }
    }
}

/// A compiled function: its instruction stream, the types of the variables
/// in scope at compile time, its signature, and a name that is unique
/// across every package loadable into one VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunc {
    /// Declared source name; empty for the package function.
    pub name: String,

    /// Globally unique compiled name, `<package alias>.<name>`.
    pub unique_name: String,

    /// The function's signature.
    pub kind: Type,

    /// Argument names in declaration order; the VM binds call arguments
    /// into registers with these names.
    pub arguments: Vec<String>,

    pub instructions: Vec<Instruction>,

    /// Compile-time scope: variable name to its type.
    pub variables: BTreeMap<String, Type>,

    allocator: RegisterAllocator,
}

impl CompiledFunc {
    pub fn new(
        name: impl Into<String>,
        unique_name: impl Into<String>,
        kind: Type,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            unique_name: unique_name.into(),
            kind,
            arguments,
            instructions: Vec::new(),
            variables: BTreeMap::new(),
            allocator: RegisterAllocator::default(),
        }
    }

    /// Allocate a fresh register.
    pub fn next_register(&mut self) -> Register {
        self.allocator.alloc()
    }

    /// Append an instruction, returning its index for jump patching.
    pub fn append(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Point the jump at `index` to the instruction at `to`.
    pub fn patch_jump(&mut self, index: usize, to: usize) {
        match &mut self.instructions[index] {
            Instruction::Jump { to: target }
            | Instruction::JumpIfTrue { to: target, .. }
            | Instruction::JumpIfFalse { to: target, .. } => *target = to,
            other => unreachable!("patching non-jump instruction {}", other),
        }
    }
}

/// A compiled test declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTest {
    pub name: String,
    pub func: CompiledFunc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_is_monotonic() {
        let mut func = CompiledFunc::new("f", "main.f", Type::func(vec![], vec![]), vec![]);
        assert_eq!(func.next_register().as_str(), "0");
        assert_eq!(func.next_register().as_str(), "1");
        assert_eq!(func.next_register().as_str(), "2");
    }

    #[test]
    fn test_parent_scope_registers() {
        let plain = Register::from("counter");
        assert!(!plain.is_parent_scope());
        assert_eq!(plain.parent_name(), None);

        let captured = Register::parent("counter");
        assert!(captured.is_parent_scope());
        assert_eq!(captured.parent_name(), Some("counter"));
        assert_eq!(captured.as_str(), "^counter");
    }

    #[test]
    fn test_patch_jump() {
        let mut func = CompiledFunc::new("f", "main.f", Type::func(vec![], vec![]), vec![]);
        let condition = func.next_register();
        let index = func.append(Instruction::JumpIfFalse { condition, to: 0 });
        func.append(Instruction::Return { results: vec![] });
        func.patch_jump(index, 2);
        assert!(matches!(
            func.instructions[index],
            Instruction::JumpIfFalse { to: 2, .. },
        ));
    }

    #[test]
    fn test_display() {
        let ins = Instruction::Add {
            left: Register::from("0"),
            right: Register::from("1"),
            result: Register::from("2"),
        };
        assert_eq!(ins.to_string(), "2 = 0 + 1");

        let ins = Instruction::Len {
            argument: Register::from("xs"),
            result: Register::from("3"),
        };
        assert_eq!(ins.to_string(), "3 = len(xs)");
    }
}
