//! Register virtual machine for rill
//!
//! Executes one compiled function at a time inside a frame: a register
//! file plus a program counter. Frames are shared, reference-counted
//! objects linked to the frame that defined any closure executing within
//! them; a parent-scope register resolves against that chain, so a closure
//! observes and mutates the registers of its defining call for as long as
//! either side is alive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::artifact::{Artifact, Store};
use crate::ast::Literal;
use crate::error::{Error, ErrorKind, Result};
use crate::instruction::{CompiledFunc, Instruction, Register};
use crate::number::Number;

/// Maximum call depth before execution fails with a stack overflow.
const MAX_CALL_DEPTH: usize = 64;

/// The register file and parent link for one in-flight call.
#[derive(Default)]
pub struct Frame {
    pub registers: HashMap<Register, Literal>,
    pub parent: Option<FrameRef>,
}

/// Frames are kept alive by the longest-lived closure that captured them.
pub type FrameRef = Rc<RefCell<Frame>>;

impl Frame {
    pub fn new() -> FrameRef {
        Rc::new(RefCell::new(Frame::default()))
    }

    pub fn with_parent(parent: Option<FrameRef>) -> FrameRef {
        Rc::new(RefCell::new(Frame { registers: HashMap::new(), parent }))
    }
}

/// Read a register. Parent-scope registers walk the defining frame chain.
fn frame_get(frame: &FrameRef, register: &Register) -> Result<Literal> {
    frame_try_get(frame, register).ok_or_else(|| {
        Error::new(ErrorKind::UndefinedVariable(register.to_string()), None)
    })
}

fn frame_try_get(frame: &FrameRef, register: &Register) -> Option<Literal> {
    if let Some(name) = register.parent_name() {
        let target = Register::from(name);
        let mut current = frame.borrow().parent.clone();
        while let Some(f) = current {
            if let Some(value) = f.borrow().registers.get(&target) {
                return Some(value.clone());
            }
            current = f.borrow().parent.clone();
        }
        return None;
    }
    frame.borrow().registers.get(register).cloned()
}

/// Write a register. A parent-scope register writes through to the frame
/// that holds it, so mutations of captured variables are visible to the
/// defining scope.
fn frame_set(frame: &FrameRef, register: &Register, value: Literal) -> Result<()> {
    if let Some(name) = register.parent_name() {
        let target = Register::from(name);
        let mut current = frame.borrow().parent.clone();
        while let Some(f) = current {
            if f.borrow().registers.contains_key(&target) {
                f.borrow_mut().registers.insert(target, value);
                return Ok(());
            }
            current = f.borrow().parent.clone();
        }
        // Not defined anywhere up the chain: define it in the immediate
        // defining frame.
        let parent = frame.borrow().parent.clone();
        return match parent {
            Some(f) => {
                f.borrow_mut().registers.insert(target, value);
                Ok(())
            }
            None => Err(Error::new(
                ErrorKind::UndefinedVariable(register.to_string()),
                None,
            )),
        };
    }
    frame.borrow_mut().registers.insert(register.clone(), value);
    Ok(())
}

/// Mutate a register's value in place, wherever in the frame chain it
/// lives. Used for container writes and closure capture.
fn frame_with_mut<T>(
    frame: &FrameRef,
    register: &Register,
    f: impl FnOnce(&mut Literal) -> Result<T>,
) -> Result<T> {
    let owner = if let Some(name) = register.parent_name() {
        let target = Register::from(name);
        let mut found = None;
        let mut current = frame.borrow().parent.clone();
        while let Some(candidate) = current {
            if candidate.borrow().registers.contains_key(&target) {
                found = Some((candidate.clone(), target.clone()));
                break;
            }
            current = candidate.borrow().parent.clone();
        }
        found
    } else if frame.borrow().registers.contains_key(register) {
        Some((frame.clone(), register.clone()))
    } else {
        None
    };

    let Some((owner, target)) = owner else {
        return Err(Error::new(
            ErrorKind::UndefinedVariable(register.to_string()),
            None,
        ));
    };
    let mut borrowed = owner.borrow_mut();
    let value = borrowed.registers.get_mut(&target).ok_or_else(|| {
        Error::new(ErrorKind::UndefinedVariable(register.to_string()), None)
    })?;
    f(value)
}

fn as_number(value: &Literal) -> Result<&Number> {
    match value {
        Literal::Number(n) => Ok(n),
        other => Err(Error::new(
            ErrorKind::TypeMismatch("number".to_string(), other.kind().to_string()),
            None,
        )),
    }
}

fn as_bool(value: &Literal) -> Result<bool> {
    match value {
        Literal::Bool(b) => Ok(*b),
        other => Err(Error::new(
            ErrorKind::TypeMismatch("bool".to_string(), other.kind().to_string()),
            None,
        )),
    }
}

/// The rill virtual machine. Executes compiled functions from one or more
/// loaded artifacts, loading imported packages' artifacts on demand.
pub struct VM {
    store: Store,

    /// Every known compiled function, by unique name.
    funcs: HashMap<String, Rc<CompiledFunc>>,

    /// Loaded package interface values, by package path.
    packages: HashMap<String, Literal>,

    depth: usize,

    // Test runner counters.
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub total_assertions: usize,
}

impl VM {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            funcs: HashMap::new(),
            packages: HashMap::new(),
            depth: 0,
            tests_passed: 0,
            tests_failed: 0,
            total_assertions: 0,
        }
    }

    /// Register an artifact's functions and run its package function.
    pub fn load_artifact(&mut self, artifact: &Artifact) -> Result<()> {
        for (unique_name, func) in &artifact.funcs {
            self.funcs.insert(unique_name.clone(), Rc::new(func.clone()));
        }
        if let Some(package_func) = &artifact.package_func {
            let func = Rc::new(package_func.clone());
            self.run(&func, Frame::new())?;
        }
        Ok(())
    }

    /// Materialize a package's exported interface, loading and registering
    /// its artifact on first use.
    fn load_package(&mut self, package: &str) -> Result<Literal> {
        if let Some(value) = self.packages.get(package) {
            return Ok(value.clone());
        }
        let artifact = self.store.load(package)?;
        self.load_artifact(&artifact)?;
        let value = artifact.interface_value();
        self.packages.insert(package.to_string(), value.clone());
        Ok(value)
    }

    /// Call a loaded function by unique name with positional arguments.
    pub fn call(&mut self, function: &str, arguments: Vec<Literal>) -> Result<Vec<Literal>> {
        let func = self.funcs.get(function).cloned().ok_or_else(|| {
            Error::new(ErrorKind::UndefinedFunction(function.to_string()), None)
        })?;
        if func.arguments.len() != arguments.len() {
            return Err(Error::new(
                ErrorKind::WrongArity(function.to_string(), func.arguments.len(), arguments.len()),
                None,
            ));
        }

        let frame = Frame::new();
        for (name, value) in func.arguments.iter().zip(arguments) {
            frame
                .borrow_mut()
                .registers
                .insert(Register::from(name.as_str()), value);
        }
        self.run(&func, frame)
    }

    /// Run each compiled test whose name contains `filter`, sequentially
    /// in this VM, accumulating the pass/fail/assertion counters. A
    /// runtime error from a test becomes a failed-test record, not a
    /// crash.
    pub fn run_tests(&mut self, artifact: &Artifact, filter: &str, verbose: bool) {
        for test in &artifact.tests {
            if !filter.is_empty() && !test.name.contains(filter) {
                continue;
            }
            let func = Rc::new(test.func.clone());
            match self.run(&func, Frame::new()) {
                Ok(_) => {
                    self.tests_passed += 1;
                    if verbose {
                        println!("PASS {}", test.name);
                    }
                }
                Err(e) => {
                    self.tests_failed += 1;
                    println!("FAIL {}: {}", test.name, e);
                }
            }
        }
    }

    fn run(&mut self, func: &Rc<CompiledFunc>, frame: FrameRef) -> Result<Vec<Literal>> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::new(ErrorKind::StackOverflow, None));
        }
        self.depth += 1;
        let result = self.execute(func, &frame);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, func: &Rc<CompiledFunc>, frame: &FrameRef) -> Result<Vec<Literal>> {
        let mut pc = 0;

        while pc < func.instructions.len() {
            match &func.instructions[pc] {
                Instruction::Assign { result, value } => {
                    frame_set(frame, result, value.clone())?;
                }

                Instruction::Move { result, source } => {
                    let value = frame_get(frame, source)?;
                    frame_set(frame, result, value)?;
                }

                Instruction::Add { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)?.add(as_number(&r)?);
                    frame_set(frame, result, Literal::Number(value))?;
                }

                Instruction::Subtract { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)?.sub(as_number(&r)?);
                    frame_set(frame, result, Literal::Number(value))?;
                }

                Instruction::Multiply { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)?.mul(as_number(&r)?);
                    frame_set(frame, result, Literal::Number(value))?;
                }

                // Division by zero fails before the destination register is
                // written, leaving it unset.
                Instruction::Divide { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)?
                        .div(as_number(&r)?)
                        .ok_or_else(|| Error::new(ErrorKind::DivisionByZero, None))?;
                    frame_set(frame, result, Literal::Number(value))?;
                }

                Instruction::Remainder { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)?
                        .rem(as_number(&r)?)
                        .ok_or_else(|| Error::new(ErrorKind::DivisionByZero, None))?;
                    frame_set(frame, result, Literal::Number(value))?;
                }

                Instruction::Equal { left, right, result } => {
                    let equal = frame_get(frame, left)? == frame_get(frame, right)?;
                    frame_set(frame, result, Literal::Bool(equal))?;
                }

                Instruction::NotEqual { left, right, result } => {
                    let equal = frame_get(frame, left)? == frame_get(frame, right)?;
                    frame_set(frame, result, Literal::Bool(!equal))?;
                }

                Instruction::LessThan { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)? < as_number(&r)?;
                    frame_set(frame, result, Literal::Bool(value))?;
                }

                Instruction::LessThanEqual { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)? <= as_number(&r)?;
                    frame_set(frame, result, Literal::Bool(value))?;
                }

                Instruction::GreaterThan { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)? > as_number(&r)?;
                    frame_set(frame, result, Literal::Bool(value))?;
                }

                Instruction::GreaterThanEqual { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_number(&l)? >= as_number(&r)?;
                    frame_set(frame, result, Literal::Bool(value))?;
                }

                Instruction::And { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_bool(&l)? && as_bool(&r)?;
                    frame_set(frame, result, Literal::Bool(value))?;
                }

                Instruction::Or { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    let value = as_bool(&l)? || as_bool(&r)?;
                    frame_set(frame, result, Literal::Bool(value))?;
                }

                Instruction::Not { value, result } => {
                    let v = frame_get(frame, value)?;
                    frame_set(frame, result, Literal::Bool(!as_bool(&v)?))?;
                }

                Instruction::Concat { left, right, result } => {
                    let (l, r) = (frame_get(frame, left)?, frame_get(frame, right)?);
                    frame_set(frame, result, Literal::Str(format!("{}{}", l, r)))?;
                }

                Instruction::Jump { to } => {
                    pc = *to;
                    continue;
                }

                Instruction::JumpIfTrue { condition, to } => {
                    let value = frame_get(frame, condition)?;
                    if as_bool(&value)? {
                        pc = *to;
                        continue;
                    }
                }

                Instruction::JumpIfFalse { condition, to } => {
                    let value = frame_get(frame, condition)?;
                    if !as_bool(&value)? {
                        pc = *to;
                        continue;
                    }
                }

                Instruction::ArrayAlloc { kind, size, result } => {
                    let size = frame_get(frame, size)?;
                    let capacity = as_number(&size)?.to_i64().max(0) as usize;
                    frame_set(
                        frame,
                        result,
                        Literal::Array { kind: kind.clone(), elements: Vec::with_capacity(capacity) },
                    )?;
                }

                Instruction::ArraySet { array, index, value } => {
                    let index = frame_get(frame, index)?;
                    let i = as_number(&index)?.to_i64();
                    let value = frame_get(frame, value)?;
                    frame_with_mut(frame, array, |lit| match lit {
                        Literal::Array { elements, .. } => {
                            if i < 0 || i as usize > elements.len() {
                                return Err(Error::new(
                                    ErrorKind::IndexOutOfRange(i, elements.len()),
                                    None,
                                ));
                            }
                            if i as usize == elements.len() {
                                elements.push(value);
                            } else {
                                elements[i as usize] = value;
                            }
                            Ok(())
                        }
                        other => Err(Error::new(
                            ErrorKind::TypeMismatch("array".to_string(), other.kind().to_string()),
                            None,
                        )),
                    })?;
                }

                Instruction::ArrayGet { array, index, result } => {
                    let container = frame_get(frame, array)?;
                    let index = frame_get(frame, index)?;
                    let i = as_number(&index)?.to_i64();
                    let value = match &container {
                        Literal::Array { elements, .. } => {
                            if i < 0 || i as usize >= elements.len() {
                                return Err(Error::new(
                                    ErrorKind::IndexOutOfRange(i, elements.len()),
                                    None,
                                ));
                            }
                            elements[i as usize].clone()
                        }
                        other => {
                            return Err(Error::new(
                                ErrorKind::TypeMismatch("array".to_string(), other.kind().to_string()),
                                None,
                            ));
                        }
                    };
                    frame_set(frame, result, value)?;
                }

                Instruction::MapAlloc { kind, size, result } => {
                    let size = frame_get(frame, size)?;
                    as_number(&size)?;
                    frame_set(
                        frame,
                        result,
                        Literal::Map { kind: kind.clone(), entries: Default::default() },
                    )?;
                }

                Instruction::MapSet { map, key, value } => {
                    let key = match frame_get(frame, key)? {
                        Literal::Str(s) => s,
                        other => {
                            return Err(Error::new(
                                ErrorKind::TypeMismatch("string".to_string(), other.kind().to_string()),
                                None,
                            ));
                        }
                    };
                    let value = frame_get(frame, value)?;
                    frame_with_mut(frame, map, |lit| match lit {
                        Literal::Map { entries, .. } => {
                            entries.insert(key, value);
                            Ok(())
                        }
                        other => Err(Error::new(
                            ErrorKind::TypeMismatch("map".to_string(), other.kind().to_string()),
                            None,
                        )),
                    })?;
                }

                Instruction::MapGet { map, key, result } => {
                    let container = frame_get(frame, map)?;
                    let key = match frame_get(frame, key)? {
                        Literal::Str(s) => s,
                        other => {
                            return Err(Error::new(
                                ErrorKind::TypeMismatch("string".to_string(), other.kind().to_string()),
                                None,
                            ));
                        }
                    };
                    let value = match &container {
                        Literal::Map { entries, .. } => entries.get(&key).cloned(),
                        Literal::Interface { members, .. } => members.get(&key).cloned(),
                        other => {
                            return Err(Error::new(
                                ErrorKind::TypeMismatch("map".to_string(), other.kind().to_string()),
                                None,
                            ));
                        }
                    };
                    let value =
                        value.ok_or_else(|| Error::new(ErrorKind::KeyNotFound(key), None))?;
                    frame_set(frame, result, value)?;
                }

                Instruction::Len { argument, result } => {
                    let value = frame_get(frame, argument)?;
                    let length = match &value {
                        Literal::Array { elements, .. } => elements.len(),
                        Literal::Map { entries, .. } => entries.len(),
                        // Rune count, not byte count.
                        Literal::Str(s) => s.chars().count(),
                        other => other.to_string().chars().count(),
                    };
                    frame_set(frame, result, Literal::Number(Number::from_usize(length)))?;
                }

                Instruction::Call { function, arguments, results } => {
                    let callee = frame_try_get(frame, &Register::from(function.as_str()));
                    let (target, parent) = match callee {
                        Some(Literal::Func { unique_name, parent, .. }) => (unique_name, parent),
                        Some(_) => {
                            return Err(Error::new(
                                ErrorKind::NotAFunction(function.clone()),
                                None,
                            ));
                        }
                        None if self.funcs.contains_key(function) => (function.clone(), None),
                        None => match function.as_str() {
                            "print" => {
                                let mut parts = Vec::new();
                                for argument in arguments {
                                    parts.push(frame_get(frame, argument)?.to_string());
                                }
                                println!("{}", parts.join(" "));
                                pc += 1;
                                continue;
                            }
                            "assert" => {
                                self.total_assertions += 1;
                                let argument = arguments.first().ok_or_else(|| {
                                    Error::new(
                                        ErrorKind::WrongArity("assert".to_string(), 1, 0),
                                        None,
                                    )
                                })?;
                                if !as_bool(&frame_get(frame, argument)?)? {
                                    return Err(Error::new(ErrorKind::AssertionFailed, None));
                                }
                                pc += 1;
                                continue;
                            }
                            _ => {
                                return Err(Error::new(
                                    ErrorKind::UndefinedFunction(function.clone()),
                                    None,
                                ));
                            }
                        },
                    };

                    let callee = self.funcs.get(&target).cloned().ok_or_else(|| {
                        Error::new(ErrorKind::UndefinedFunction(target.clone()), None)
                    })?;
                    if callee.arguments.len() != arguments.len() {
                        return Err(Error::new(
                            ErrorKind::WrongArity(
                                target.clone(),
                                callee.arguments.len(),
                                arguments.len(),
                            ),
                            None,
                        ));
                    }

                    let child = Frame::with_parent(parent);
                    for (name, argument) in callee.arguments.iter().zip(arguments) {
                        let value = frame_get(frame, argument)?;
                        child
                            .borrow_mut()
                            .registers
                            .insert(Register::from(name.as_str()), value);
                    }

                    let returned = self.run(&callee, child)?;
                    if returned.len() < results.len() {
                        return Err(Error::new(
                            ErrorKind::RuntimeError(format!(
                                "{} returned {} values, expected {}",
                                target,
                                returned.len(),
                                results.len(),
                            )),
                            None,
                        ));
                    }
                    for (destination, value) in results.iter().zip(returned) {
                        frame_set(frame, destination, value)?;
                    }
                }

                Instruction::Return { results } => {
                    let mut values = Vec::new();
                    for result in results {
                        values.push(frame_get(frame, result)?);
                    }
                    return Ok(values);
                }

                Instruction::LoadPackage { package, result } => {
                    let value = self.load_package(package)?;
                    frame_set(frame, result, value)?;
                }

                Instruction::ParentScope { register } => {
                    frame_with_mut(frame, register, |lit| match lit {
                        Literal::Func { parent, .. } => {
                            *parent = Some(Rc::clone(frame));
                            Ok(())
                        }
                        other => Err(Error::new(
                            ErrorKind::TypeMismatch(
                                "function".to_string(),
                                other.kind().to_string(),
                            ),
                            None,
                        )),
                    })?;
                }
            }

            pc += 1;
        }

        // Fell off the end: no return values.
        Ok(vec![])
    }
}
