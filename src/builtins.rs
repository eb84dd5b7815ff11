//! Built-in package registry
//!
//! Standard-library packages exist pre-built in process memory, keyed by
//! package name. The registry is populated once, before any compilation,
//! and never mutated afterwards; the artifact store consults it before
//! touching the disk. Built-ins ship ordinary bytecode so the VM has a
//! single execution path.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::artifact::Artifact;
use crate::ast::Literal;
use crate::instruction::{CompiledFunc, Instruction, Register};
use crate::number::Number;
use crate::types::Type;

static PACKAGES: OnceLock<BTreeMap<String, Artifact>> = OnceLock::new();

/// All built-in packages, keyed by package name.
pub fn packages() -> &'static BTreeMap<String, Artifact> {
    PACKAGES.get_or_init(build_packages)
}

/// Look up a built-in package by name.
pub fn package(name: &str) -> Option<&'static Artifact> {
    packages().get(name)
}

fn build_packages() -> BTreeMap<String, Artifact> {
    let mut packages = BTreeMap::new();
    packages.insert("math".to_string(), math_package());
    packages
}

fn math_package() -> Artifact {
    let mut artifact = Artifact::new("math");

    artifact.add_constant("Pi", Literal::number("3.14159265358979323846"));
    artifact.add_constant("E", Literal::number("2.71828182845904523536"));

    // func Abs(x number) number
    let mut abs = CompiledFunc::new(
        "Abs",
        "math.Abs",
        Type::func(vec![Type::Number], vec![Type::Number]),
        vec!["x".to_string()],
    );
    abs.variables.insert("x".to_string(), Type::Number);

    let x = Register::from("x");
    let zero = abs.next_register();
    abs.append(Instruction::Assign {
        result: zero.clone(),
        value: Literal::Number(Number::zero()),
    });
    let negative = abs.next_register();
    abs.append(Instruction::LessThan {
        left: x.clone(),
        right: zero.clone(),
        result: negative.clone(),
    });
    let skip = abs.append(Instruction::JumpIfFalse { condition: negative, to: 0 });
    let negated = abs.next_register();
    abs.append(Instruction::Subtract {
        left: zero,
        right: x.clone(),
        result: negated.clone(),
    });
    abs.append(Instruction::Return { results: vec![negated] });
    let end = abs.instructions.len();
    abs.patch_jump(skip, end);
    abs.append(Instruction::Return { results: vec![x] });

    artifact.add_func(abs);
    artifact
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_math() {
        let math = package("math").expect("math should be built in");
        assert!(math.symbols.contains_key("Abs"));
        assert!(math.constants.contains_key("Pi"));
        assert!(package("no-such-package").is_none());
    }

    #[test]
    fn test_registry_is_stable() {
        // Two lookups observe the same initialized-once registry.
        let first = packages() as *const _;
        let second = packages() as *const _;
        assert_eq!(first, second);
    }
}
