//! Compiler: AST → register bytecode
//!
//! Lowers each function of a parsed package into an instruction stream,
//! allocating registers monotonically and resolving identifiers against
//! locals, imports, package constants, and package-level functions.
//! Imported packages compile first, depth-first, so `pkg.Name` types in
//! signatures can be rewritten from the import's exported interface;
//! type references inside statement bodies resolve lazily at the point
//! they are used.

use std::collections::BTreeMap;

use crate::artifact::{Artifact, Store, Symbol, SymbolTarget};
use crate::ast::{self, AssignTarget, BinaryOp, Expr, Literal, SourceFile, Stmt, UnaryOp};
use crate::builtins;
use crate::error::{Error, ErrorKind, Result};
use crate::instruction::{CompiledFunc, CompiledTest, Instruction, Register};
use crate::lexer::Lexer;
use crate::number::Number;
use crate::parser::Parser;
use crate::token::Span;
use crate::types::Type;

/// Source text for a set of packages, keyed by package path.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: BTreeMap<String, String>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(package.into(), source.into());
    }

    pub fn get(&self, package: &str) -> Option<&str> {
        self.sources.get(package).map(String::as_str)
    }
}

/// Compile `package` and, depth-first, every package it imports. Each
/// compiled artifact is persisted to `store`. Compile errors for this
/// package are collected and returned together; a dependency's errors
/// abort the compilation immediately.
pub fn compile(
    sources: &SourceSet,
    package: &str,
    include_tests: bool,
    store: &Store,
) -> std::result::Result<Artifact, Vec<Error>> {
    let source = sources.get(package).ok_or_else(|| {
        vec![Error::new(ErrorKind::PackageNotFound(package.to_string()), None)]
    })?;

    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| vec![e.with_source(source)])?;
    let file = Parser::new(tokens)
        .parse()
        .map_err(|e| vec![e.with_source(source)])?;

    Compiler::new(package, sources, store)
        .compile_file(&file, include_tests)
        .map_err(|errors| errors.into_iter().map(|e| e.with_source(source)).collect())
}

struct Compiler<'a> {
    artifact: Artifact,
    sources: &'a SourceSet,
    store: &'a Store,

    /// Variable scopes of the enclosing functions, innermost last. A name
    /// found here but not locally compiles to a parent-scope register.
    scopes: Vec<BTreeMap<String, Type>>,

    /// Counter for anonymous function names within this package.
    anon: usize,

    errors: Vec<Error>,
}

impl<'a> Compiler<'a> {
    fn new(package: &str, sources: &'a SourceSet, store: &'a Store) -> Self {
        Self {
            artifact: Artifact::new(package),
            sources,
            store,
            scopes: Vec::new(),
            anon: 0,
            errors: Vec::new(),
        }
    }

    fn compile_file(
        mut self,
        file: &SourceFile,
        include_tests: bool,
    ) -> std::result::Result<Artifact, Vec<Error>> {
        // Dependencies compile depth-first before anything in this
        // package; their errors propagate as-is.
        for import in &file.imports {
            let interface = if let Some(builtin) = builtins::package(&import.path) {
                builtin.interface()
            } else {
                compile(self.sources, &import.path, false, self.store)?.interface()
            };
            self.artifact.imports.insert(import.path.clone(), interface);
        }

        for constant in &file.constants {
            self.artifact.add_constant(constant.name.clone(), constant.value.clone());
        }

        // Gather every function symbol before compiling any body, so
        // bodies can reference package functions in any order. The parser
        // cannot see into other packages, so `pkg.Name` argument and
        // return types are rewritten here against the compiled imports.
        let alias = self.artifact.alias();
        let mut pending = Vec::new();
        for func in &file.funcs {
            let unique_name = format!("{}.{}", alias, func.name);
            match self.resolve_signature(func) {
                Ok((arguments, returns)) => {
                    let kind = Type::func(
                        arguments.iter().map(|a| a.kind.clone()).collect(),
                        returns.clone(),
                    );
                    self.artifact.symbols.insert(
                        func.name.clone(),
                        Symbol {
                            kind,
                            target: SymbolTarget::Func { unique_name: unique_name.clone() },
                        },
                    );
                    pending.push((func, unique_name, arguments, returns));
                }
                Err(e) => self.errors.push(e),
            }
        }

        for (func, unique_name, arguments, returns) in pending {
            match self.compile_func(func, &unique_name, &arguments, &returns) {
                Ok(compiled) => {
                    self.artifact.funcs.insert(unique_name, compiled);
                }
                Err(e) => self.errors.push(e),
            }
        }

        if include_tests {
            for (index, test) in file.tests.iter().enumerate() {
                let func = ast::Func {
                    name: test.name.clone(),
                    arguments: vec![],
                    returns: vec![],
                    statements: test.statements.clone(),
                    span: test.span,
                };
                let unique_name = format!("{}.test{}", alias, index);
                match self.compile_func(&func, &unique_name, &[], &[]) {
                    Ok(compiled) => self.artifact.tests.push(CompiledTest {
                        name: test.name.clone(),
                        func: compiled,
                    }),
                    Err(e) => self.errors.push(e),
                }
            }
        }

        // The package function compiles last: every user function is
        // known by now, so forward references among top-level
        // declarations work.
        self.artifact.package_func = Some(self.compile_package_func(file));

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let package = self.artifact.package.clone();
        if let Err(e) = self.store.store(&self.artifact, &package) {
            return Err(vec![e]);
        }

        Ok(self.artifact)
    }

    /// Rewrite any `pkg.Name` placeholder in a function signature to the
    /// member's declared type on the resolved import.
    fn resolve_signature(&self, func: &ast::Func) -> Result<(Vec<ast::Argument>, Vec<Type>)> {
        let mut arguments = Vec::new();
        for argument in &func.arguments {
            let kind = self
                .artifact
                .resolve_type(&argument.kind)
                .map_err(|e| Error::new(e.kind, Some(func.span)))?;
            arguments.push(ast::Argument { name: argument.name.clone(), kind });
        }

        let mut returns = Vec::new();
        for ret in &func.returns {
            returns.push(
                self.artifact
                    .resolve_type(ret)
                    .map_err(|e| Error::new(e.kind, Some(func.span)))?,
            );
        }

        Ok((arguments, returns))
    }

    fn compile_func(
        &mut self,
        func: &ast::Func,
        unique_name: &str,
        arguments: &[ast::Argument],
        returns: &[Type],
    ) -> Result<CompiledFunc> {
        let kind = Type::func(
            arguments.iter().map(|a| a.kind.clone()).collect(),
            returns.to_vec(),
        );
        let mut compiled = CompiledFunc::new(
            &func.name,
            unique_name,
            kind,
            arguments.iter().map(|a| a.name.clone()).collect(),
        );
        for argument in arguments {
            compiled.variables.insert(argument.name.clone(), argument.kind.clone());
        }

        self.compile_stmts(&mut compiled, &func.statements)?;

        Ok(compiled)
    }

    /// The package function: the ordered top-level constant assignments,
    /// run by the VM when the package loads.
    fn compile_package_func(&self, file: &SourceFile) -> CompiledFunc {
        let mut compiled = CompiledFunc::new(
            "",
            format!("{}.%pkg", self.artifact.alias()),
            Type::func(vec![], vec![]),
            vec![],
        );
        for constant in &file.constants {
            compiled.variables.insert(constant.name.clone(), constant.value.kind());
            compiled.append(Instruction::Assign {
                result: Register::from(constant.name.as_str()),
                value: constant.value.clone(),
            });
        }
        compiled
    }

    fn compile_stmts(&mut self, compiled: &mut CompiledFunc, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.compile_stmt(compiled, stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, compiled: &mut CompiledFunc, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr { expr } => {
                self.compile_expr(compiled, expr)?;
            }

            Stmt::Assign { targets, values, span } => {
                self.compile_assign(compiled, targets, values, *span)?;
            }

            Stmt::Return { values, .. } => {
                let mut results = Vec::new();
                for value in values {
                    let (registers, _) = self.compile_expr(compiled, value)?;
                    results.extend(registers);
                }
                compiled.append(Instruction::Return { results });
            }

            Stmt::If { condition, then_branch, else_branch, span } => {
                self.compile_if(compiled, condition, then_branch, else_branch, *span)?;
            }

            Stmt::For { init, condition, post, body, span } => {
                self.compile_for(compiled, init, condition, post, body, *span)?;
            }
        }
        Ok(())
    }

    /// Lower an expression, appending instructions and returning the
    /// result registers with their inferred types.
    fn compile_expr(
        &mut self,
        compiled: &mut CompiledFunc,
        expr: &Expr,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        match expr {
            Expr::Literal { value, .. } => {
                let kind = value.kind();
                let result = compiled.next_register();
                compiled.append(Instruction::Assign {
                    result: result.clone(),
                    value: value.clone(),
                });
                Ok((vec![result], vec![kind]))
            }

            Expr::Ident { name, span } => self.compile_ident(compiled, name, *span),

            Expr::Func { func, .. } => {
                let unique_name = format!("{}.anon{}", self.artifact.alias(), self.anon);
                self.anon += 1;

                let (arguments, returns) = self.resolve_signature(func)?;
                self.scopes.push(compiled.variables.clone());
                let nested = self.compile_func(func, &unique_name, &arguments, &returns);
                self.scopes.pop();
                let nested = nested?;

                let kind = nested.kind.clone();
                self.artifact.funcs.insert(unique_name.clone(), nested);

                let result = compiled.next_register();
                compiled.append(Instruction::Assign {
                    result: result.clone(),
                    value: Literal::func_ref(kind.clone(), &unique_name),
                });
                compiled.append(Instruction::ParentScope { register: result.clone() });

                Ok((vec![result], vec![kind]))
            }

            Expr::Array { kind, elements, span } => {
                self.compile_array(compiled, kind.as_ref(), elements, *span)
            }

            Expr::Map { kind, elements, span } => {
                self.compile_map(compiled, kind.as_ref(), elements, *span)
            }

            Expr::Call { function, arguments, span } => {
                self.compile_call(compiled, function, arguments, *span)
            }

            Expr::Binary { left, op, right, span } => {
                self.compile_binary(compiled, left, *op, right, *span)
            }

            Expr::Unary { op, operand, span } => {
                self.compile_unary(compiled, *op, operand, *span)
            }

            // A group lowers transparently to its inner expression.
            Expr::Group { expr, .. } => self.compile_expr(compiled, expr),

            Expr::Key { container, key, span } => {
                self.compile_key(compiled, container, key, *span)
            }

            Expr::Interpolate { parts, .. } => self.compile_interpolate(compiled, parts),
        }
    }

    /// Lower an expression expected to produce a single value.
    fn compile_single(&mut self, compiled: &mut CompiledFunc, expr: &Expr) -> Result<(Register, Type)> {
        let span = expr.span();
        let (registers, kinds) = self.compile_expr(compiled, expr)?;
        match (registers.into_iter().next(), kinds.into_iter().next()) {
            (Some(register), Some(kind)) => Ok((register, kind)),
            _ => Err(Error::new(ErrorKind::VoidExpression, Some(span))),
        }
    }

    fn compile_ident(
        &mut self,
        compiled: &mut CompiledFunc,
        name: &str,
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        // A parent-scope marker resolves directly, without a lookup.
        if name.starts_with('^') {
            return Ok((vec![Register::from(name)], vec![Type::Number]));
        }

        if let Some(kind) = compiled.variables.get(name) {
            return Ok((vec![Register::from(name)], vec![kind.clone()]));
        }

        // An imported package name, exact or matched against the last
        // path segment.
        if let Some((path, interface)) = self.find_import(name) {
            let result = compiled.next_register();
            compiled.append(Instruction::LoadPackage { package: path, result: result.clone() });
            return Ok((vec![result], vec![interface]));
        }

        // Constants are copied locally so the stored value cannot be
        // mutated through the returned register.
        if let Some(value) = self.artifact.constants.get(name) {
            let value = value.clone();
            let kind = value.kind();
            let result = compiled.next_register();
            compiled.append(Instruction::Assign { result: result.clone(), value });
            return Ok((vec![result], vec![kind]));
        }

        // A package-level function becomes a function-reference literal.
        if let Some(symbol) = self.artifact.symbols.get(name) {
            if let SymbolTarget::Func { unique_name } = &symbol.target {
                let value = Literal::func_ref(symbol.kind.clone(), unique_name);
                let kind = symbol.kind.clone();
                let result = compiled.next_register();
                compiled.append(Instruction::Assign { result: result.clone(), value });
                return Ok((vec![result], vec![kind]));
            }
        }

        // A variable of an enclosing function compiles to a parent-scope
        // register; the ParentScope marker on the enclosing function
        // literal makes the defining frame reachable at run time.
        for scope in self.scopes.iter().rev() {
            if let Some(kind) = scope.get(name) {
                return Ok((vec![Register::parent(name)], vec![kind.clone()]));
            }
        }

        Err(Error::new(ErrorKind::UndefinedVariable(name.to_string()), Some(span)))
    }

    fn find_import(&self, name: &str) -> Option<(String, Type)> {
        for (path, interface) in &self.artifact.imports {
            if path == name || path.ends_with(&format!("/{}", name)) {
                return Some((path.clone(), interface.clone()));
            }
        }
        None
    }

    fn compile_call(
        &mut self,
        compiled: &mut CompiledFunc,
        function: &str,
        arguments: &[Expr],
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        // `len` is an instruction; `print` and `assert` dispatch in the VM.
        match function {
            "len" => {
                if arguments.len() != 1 {
                    return Err(Error::new(
                        ErrorKind::WrongArity("len".to_string(), 1, arguments.len()),
                        Some(span),
                    ));
                }
                let (argument, _) = self.compile_single(compiled, &arguments[0])?;
                let result = compiled.next_register();
                compiled.append(Instruction::Len { argument, result: result.clone() });
                return Ok((vec![result], vec![Type::Number]));
            }
            "print" => {
                let mut registers = Vec::new();
                for argument in arguments {
                    registers.push(self.compile_single(compiled, argument)?.0);
                }
                compiled.append(Instruction::Call {
                    function: "print".to_string(),
                    arguments: registers,
                    results: vec![],
                });
                return Ok((vec![], vec![]));
            }
            "assert" => {
                if arguments.len() != 1 {
                    return Err(Error::new(
                        ErrorKind::WrongArity("assert".to_string(), 1, arguments.len()),
                        Some(span),
                    ));
                }
                let (argument, _) = self.compile_single(compiled, &arguments[0])?;
                compiled.append(Instruction::Call {
                    function: "assert".to_string(),
                    arguments: vec![argument],
                    results: vec![],
                });
                return Ok((vec![], vec![]));
            }
            _ => {}
        }

        // A local variable holding a function value.
        if let Some(kind) = compiled.variables.get(function).cloned() {
            let Type::Func { arguments: parameter_kinds, returns } = kind else {
                return Err(Error::new(ErrorKind::NotAFunction(function.to_string()), Some(span)));
            };
            return self.finish_call(
                compiled,
                function.to_string(),
                function,
                &parameter_kinds,
                &returns,
                arguments,
                span,
            );
        }

        // A member call through a package or interface value.
        if let Some((head, member)) = function.split_once('.') {
            let (container, interface) = if let Some(kind) = compiled.variables.get(head) {
                (Register::from(head), kind.clone())
            } else if let Some((path, interface)) = self.find_import(head) {
                let result = compiled.next_register();
                compiled.append(Instruction::LoadPackage { package: path, result: result.clone() });
                (result, interface)
            } else {
                return Err(Error::new(
                    ErrorKind::UndefinedFunction(function.to_string()),
                    Some(span),
                ));
            };

            let Type::Interface { members, .. } = &interface else {
                return Err(Error::new(ErrorKind::NotAFunction(function.to_string()), Some(span)));
            };
            let Some(member_kind) = members.get(member) else {
                return Err(Error::new(
                    ErrorKind::MissingMember(head.to_string(), member.to_string()),
                    Some(span),
                ));
            };
            let Type::Func { arguments: parameter_kinds, returns } = member_kind.clone() else {
                return Err(Error::new(ErrorKind::NotAFunction(function.to_string()), Some(span)));
            };

            let key = compiled.next_register();
            compiled.append(Instruction::Assign {
                result: key.clone(),
                value: Literal::string(member),
            });
            let reference = compiled.next_register();
            compiled.append(Instruction::MapGet {
                map: container,
                key,
                result: reference.clone(),
            });
            return self.finish_call(
                compiled,
                reference.as_str().to_string(),
                function,
                &parameter_kinds,
                &returns,
                arguments,
                span,
            );
        }

        // A package-level function in the current package.
        if let Some(symbol) = self.artifact.symbols.get(function) {
            if let SymbolTarget::Func { unique_name } = &symbol.target {
                let unique_name = unique_name.clone();
                let Type::Func { arguments: parameter_kinds, returns } = symbol.kind.clone() else {
                    return Err(Error::new(
                        ErrorKind::NotAFunction(function.to_string()),
                        Some(span),
                    ));
                };
                return self.finish_call(
                    compiled,
                    unique_name,
                    function,
                    &parameter_kinds,
                    &returns,
                    arguments,
                    span,
                );
            }
        }

        // A captured variable of an enclosing function holding a function.
        let captured = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(function).cloned());
        if let Some(kind) = captured {
            let Type::Func { arguments: parameter_kinds, returns } = kind else {
                return Err(Error::new(
                    ErrorKind::NotAFunction(function.to_string()),
                    Some(span),
                ));
            };
            return self.finish_call(
                compiled,
                Register::parent(function).as_str().to_string(),
                function,
                &parameter_kinds,
                &returns,
                arguments,
                span,
            );
        }

        Err(Error::new(ErrorKind::UndefinedFunction(function.to_string()), Some(span)))
    }

    /// Arguments evaluate left to right, then the call instruction names
    /// the callee and one result register per declared return value.
    #[allow(clippy::too_many_arguments)]
    fn finish_call(
        &mut self,
        compiled: &mut CompiledFunc,
        callee: String,
        display_name: &str,
        parameter_kinds: &[Type],
        returns: &[Type],
        arguments: &[Expr],
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        if parameter_kinds.len() != arguments.len() {
            return Err(Error::new(
                ErrorKind::WrongArity(
                    display_name.to_string(),
                    parameter_kinds.len(),
                    arguments.len(),
                ),
                Some(span),
            ));
        }

        let mut argument_registers = Vec::new();
        for argument in arguments {
            argument_registers.push(self.compile_single(compiled, argument)?.0);
        }

        let results: Vec<Register> = returns.iter().map(|_| compiled.next_register()).collect();
        compiled.append(Instruction::Call {
            function: callee,
            arguments: argument_registers,
            results: results.clone(),
        });

        Ok((results, returns.to_vec()))
    }

    fn compile_binary(
        &mut self,
        compiled: &mut CompiledFunc,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        let (left, left_kind) = self.compile_single(compiled, left)?;
        let (right, right_kind) = self.compile_single(compiled, right)?;
        let result = compiled.next_register();

        let both_numbers = left_kind == Type::Number && right_kind == Type::Number;
        let both_bools = left_kind == Type::Bool && right_kind == Type::Bool;

        let invalid = || {
            Err(Error::new(
                ErrorKind::InvalidOperands(op.to_string(), left_kind.to_string(), right_kind.to_string()),
                Some(span),
            ))
        };

        let r = result.clone();
        let (instruction, kind) = match op {
            BinaryOp::Add if left_kind == Type::String && right_kind == Type::String => {
                (Instruction::Concat { left, right, result: r }, Type::String)
            }
            BinaryOp::Add if both_numbers => {
                (Instruction::Add { left, right, result: r }, Type::Number)
            }
            BinaryOp::Sub if both_numbers => {
                (Instruction::Subtract { left, right, result: r }, Type::Number)
            }
            BinaryOp::Mul if both_numbers => {
                (Instruction::Multiply { left, right, result: r }, Type::Number)
            }
            BinaryOp::Div if both_numbers => {
                (Instruction::Divide { left, right, result: r }, Type::Number)
            }
            BinaryOp::Rem if both_numbers => {
                (Instruction::Remainder { left, right, result: r }, Type::Number)
            }
            BinaryOp::Eq if left_kind == right_kind => {
                (Instruction::Equal { left, right, result: r }, Type::Bool)
            }
            BinaryOp::Ne if left_kind == right_kind => {
                (Instruction::NotEqual { left, right, result: r }, Type::Bool)
            }
            BinaryOp::Lt if both_numbers => {
                (Instruction::LessThan { left, right, result: r }, Type::Bool)
            }
            BinaryOp::Le if both_numbers => {
                (Instruction::LessThanEqual { left, right, result: r }, Type::Bool)
            }
            BinaryOp::Gt if both_numbers => {
                (Instruction::GreaterThan { left, right, result: r }, Type::Bool)
            }
            BinaryOp::Ge if both_numbers => {
                (Instruction::GreaterThanEqual { left, right, result: r }, Type::Bool)
            }
            BinaryOp::And if both_bools => {
                (Instruction::And { left, right, result: r }, Type::Bool)
            }
            BinaryOp::Or if both_bools => {
                (Instruction::Or { left, right, result: r }, Type::Bool)
            }
            _ => return invalid(),
        };

        compiled.append(instruction);
        Ok((vec![result], vec![kind]))
    }

    fn compile_unary(
        &mut self,
        compiled: &mut CompiledFunc,
        op: UnaryOp,
        operand: &Expr,
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        let (value, kind) = self.compile_single(compiled, operand)?;
        let result = compiled.next_register();

        match op {
            // Negation lowers to `0 - x`, keeping the operand's precision.
            UnaryOp::Neg => {
                if kind != Type::Number {
                    return Err(Error::new(
                        ErrorKind::InvalidOperands(op.to_string(), kind.to_string(), kind.to_string()),
                        Some(span),
                    ));
                }
                let zero = compiled.next_register();
                compiled.append(Instruction::Assign {
                    result: zero.clone(),
                    value: Literal::Number(Number::zero()),
                });
                compiled.append(Instruction::Subtract {
                    left: zero,
                    right: value,
                    result: result.clone(),
                });
                Ok((vec![result], vec![Type::Number]))
            }
            UnaryOp::Not => {
                if kind != Type::Bool {
                    return Err(Error::new(
                        ErrorKind::InvalidOperands(op.to_string(), kind.to_string(), kind.to_string()),
                        Some(span),
                    ));
                }
                compiled.append(Instruction::Not { value, result: result.clone() });
                Ok((vec![result], vec![Type::Bool]))
            }
        }
    }

    /// Elements compile first so an untyped constructor can take its
    /// element type from the first element; then the size, the alloc
    /// carrying the element type, and one set per element in source order.
    fn compile_array(
        &mut self,
        compiled: &mut CompiledFunc,
        declared: Option<&Type>,
        elements: &[Expr],
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        let mut element_registers = Vec::new();
        for element in elements {
            element_registers.push(self.compile_single(compiled, element)?);
        }

        let element_kind = match declared {
            Some(kind) => self
                .artifact
                .resolve_type(kind)
                .map_err(|e| Error::new(e.kind, Some(span)))?,
            None => match element_registers.first() {
                Some((_, kind)) => kind.clone(),
                None => {
                    return Err(Error::new(
                        ErrorKind::CannotInferType("array".to_string()),
                        Some(span),
                    ));
                }
            },
        };

        let size = compiled.next_register();
        compiled.append(Instruction::Assign {
            result: size.clone(),
            value: Literal::Number(Number::from_usize(elements.len())),
        });
        let result = compiled.next_register();
        compiled.append(Instruction::ArrayAlloc {
            kind: element_kind.clone(),
            size,
            result: result.clone(),
        });

        for (i, (register, _)) in element_registers.into_iter().enumerate() {
            let index = compiled.next_register();
            compiled.append(Instruction::Assign {
                result: index.clone(),
                value: Literal::Number(Number::from_usize(i)),
            });
            compiled.append(Instruction::ArraySet {
                array: result.clone(),
                index,
                value: register,
            });
        }

        Ok((vec![result], vec![Type::array(element_kind)]))
    }

    /// Keys compile before their values, one pair per element; duplicate
    /// keys are not rejected, so the last write wins.
    fn compile_map(
        &mut self,
        compiled: &mut CompiledFunc,
        declared: Option<&Type>,
        elements: &[(Expr, Expr)],
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        let mut pairs = Vec::new();
        for (key, value) in elements {
            let (key_register, key_kind) = self.compile_single(compiled, key)?;
            if key_kind != Type::String {
                return Err(Error::new(
                    ErrorKind::MapKeyNotString(key_kind.to_string()),
                    Some(key.span()),
                ));
            }
            let (value_register, value_kind) = self.compile_single(compiled, value)?;
            pairs.push((key_register, value_register, value_kind));
        }

        let element_kind = match declared {
            Some(kind) => self
                .artifact
                .resolve_type(kind)
                .map_err(|e| Error::new(e.kind, Some(span)))?,
            None => match pairs.first() {
                Some((_, _, kind)) => kind.clone(),
                None => {
                    return Err(Error::new(
                        ErrorKind::CannotInferType("map".to_string()),
                        Some(span),
                    ));
                }
            },
        };

        let size = compiled.next_register();
        compiled.append(Instruction::Assign {
            result: size.clone(),
            value: Literal::Number(Number::from_usize(elements.len())),
        });
        let result = compiled.next_register();
        compiled.append(Instruction::MapAlloc {
            kind: element_kind.clone(),
            size,
            result: result.clone(),
        });

        for (key, value, _) in pairs {
            compiled.append(Instruction::MapSet { map: result.clone(), key, value });
        }

        Ok((vec![result], vec![Type::map(element_kind)]))
    }

    fn compile_key(
        &mut self,
        compiled: &mut CompiledFunc,
        container: &Expr,
        key: &Expr,
        span: Span,
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        let (container_register, container_kind) = self.compile_single(compiled, container)?;

        match &container_kind {
            Type::Array(element) => {
                let (index, index_kind) = self.compile_single(compiled, key)?;
                if index_kind != Type::Number {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("number".to_string(), index_kind.to_string()),
                        Some(key.span()),
                    ));
                }
                let result = compiled.next_register();
                compiled.append(Instruction::ArrayGet {
                    array: container_register,
                    index,
                    result: result.clone(),
                });
                Ok((vec![result], vec![(**element).clone()]))
            }

            Type::Map(element) => {
                let (key_register, key_kind) = self.compile_single(compiled, key)?;
                if key_kind != Type::String {
                    return Err(Error::new(
                        ErrorKind::MapKeyNotString(key_kind.to_string()),
                        Some(key.span()),
                    ));
                }
                let result = compiled.next_register();
                compiled.append(Instruction::MapGet {
                    map: container_register,
                    key: key_register,
                    result: result.clone(),
                });
                Ok((vec![result], vec![(**element).clone()]))
            }

            // Member access on a package value; the member must be known
            // at compile time so its type is.
            Type::Interface { name, members } => {
                let Expr::Literal { value: Literal::Str(member), .. } = key else {
                    return Err(Error::new(
                        ErrorKind::CannotIndex(container_kind.to_string()),
                        Some(span),
                    ));
                };
                let Some(member_kind) = members.get(member) else {
                    return Err(Error::new(
                        ErrorKind::MissingMember(name.clone(), member.clone()),
                        Some(span),
                    ));
                };
                let member_kind = member_kind.clone();
                let key_register = compiled.next_register();
                compiled.append(Instruction::Assign {
                    result: key_register.clone(),
                    value: Literal::string(member),
                });
                let result = compiled.next_register();
                compiled.append(Instruction::MapGet {
                    map: container_register,
                    key: key_register,
                    result: result.clone(),
                });
                Ok((vec![result], vec![member_kind]))
            }

            other => Err(Error::new(ErrorKind::CannotIndex(other.to_string()), Some(span))),
        }
    }

    /// Interpolation folds its parts into a string with Concat, starting
    /// from the empty string; non-string parts concatenate through their
    /// textual value.
    fn compile_interpolate(
        &mut self,
        compiled: &mut CompiledFunc,
        parts: &[Expr],
    ) -> Result<(Vec<Register>, Vec<Type>)> {
        let mut result = compiled.next_register();
        compiled.append(Instruction::Assign {
            result: result.clone(),
            value: Literal::string(""),
        });

        for part in parts {
            let (register, _) = self.compile_single(compiled, part)?;
            let next = compiled.next_register();
            compiled.append(Instruction::Concat {
                left: result,
                right: register,
                result: next.clone(),
            });
            result = next;
        }

        Ok((vec![result], vec![Type::String]))
    }

    fn compile_assign(
        &mut self,
        compiled: &mut CompiledFunc,
        targets: &[AssignTarget],
        values: &[Expr],
        span: Span,
    ) -> Result<()> {
        // Either one value expression producing a register per target
        // (a multi-return call), or one expression per target.
        let mut sources: Vec<(Register, Type)> = Vec::new();
        if values.len() == 1 && targets.len() > 1 {
            let (registers, kinds) = self.compile_expr(compiled, &values[0])?;
            if registers.len() != targets.len() {
                return Err(Error::new(
                    ErrorKind::AssignmentMismatch(targets.len(), registers.len()),
                    Some(span),
                ));
            }
            sources.extend(registers.into_iter().zip(kinds));
        } else {
            if values.len() != targets.len() {
                return Err(Error::new(
                    ErrorKind::AssignmentMismatch(targets.len(), values.len()),
                    Some(span),
                ));
            }
            for value in values {
                sources.push(self.compile_single(compiled, value)?);
            }
        }

        for (target, (source, kind)) in targets.iter().zip(sources) {
            match target {
                AssignTarget::Ident { name, .. } => {
                    if compiled.variables.contains_key(name) {
                        compiled.variables.insert(name.clone(), kind);
                        compiled.append(Instruction::Move {
                            result: Register::from(name.as_str()),
                            source,
                        });
                    } else if self.scopes.iter().any(|scope| scope.contains_key(name)) {
                        // A captured variable: write through to the
                        // defining frame.
                        compiled.append(Instruction::Move {
                            result: Register::parent(name),
                            source,
                        });
                    } else {
                        compiled.variables.insert(name.clone(), kind);
                        compiled.append(Instruction::Move {
                            result: Register::from(name.as_str()),
                            source,
                        });
                    }
                }

                AssignTarget::Index { container, key, span } => {
                    let (container_register, container_kind) =
                        self.compile_single(compiled, container)?;
                    match container_kind {
                        Type::Array(_) => {
                            let (index, index_kind) = self.compile_single(compiled, key)?;
                            if index_kind != Type::Number {
                                return Err(Error::new(
                                    ErrorKind::TypeMismatch(
                                        "number".to_string(),
                                        index_kind.to_string(),
                                    ),
                                    Some(key.span()),
                                ));
                            }
                            compiled.append(Instruction::ArraySet {
                                array: container_register,
                                index,
                                value: source,
                            });
                        }
                        Type::Map(_) => {
                            let (key_register, key_kind) = self.compile_single(compiled, key)?;
                            if key_kind != Type::String {
                                return Err(Error::new(
                                    ErrorKind::MapKeyNotString(key_kind.to_string()),
                                    Some(key.span()),
                                ));
                            }
                            compiled.append(Instruction::MapSet {
                                map: container_register,
                                key: key_register,
                                value: source,
                            });
                        }
                        other => {
                            return Err(Error::new(
                                ErrorKind::CannotIndex(other.to_string()),
                                Some(*span),
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn compile_if(
        &mut self,
        compiled: &mut CompiledFunc,
        condition: &Expr,
        then_branch: &[Stmt],
        else_branch: &[Stmt],
        _span: Span,
    ) -> Result<()> {
        let (condition_register, condition_kind) = self.compile_single(compiled, condition)?;
        if condition_kind != Type::Bool {
            return Err(Error::new(
                ErrorKind::TypeMismatch("bool".to_string(), condition_kind.to_string()),
                Some(condition.span()),
            ));
        }

        let jump_else = compiled.append(Instruction::JumpIfFalse {
            condition: condition_register,
            to: 0,
        });
        self.compile_stmts(compiled, then_branch)?;

        if else_branch.is_empty() {
            let end = compiled.instructions.len();
            compiled.patch_jump(jump_else, end);
        } else {
            let jump_end = compiled.append(Instruction::Jump { to: 0 });
            let else_start = compiled.instructions.len();
            compiled.patch_jump(jump_else, else_start);
            self.compile_stmts(compiled, else_branch)?;
            let end = compiled.instructions.len();
            compiled.patch_jump(jump_end, end);
        }

        Ok(())
    }

    fn compile_for(
        &mut self,
        compiled: &mut CompiledFunc,
        init: &Option<Box<Stmt>>,
        condition: &Expr,
        post: &Option<Box<Stmt>>,
        body: &[Stmt],
        _span: Span,
    ) -> Result<()> {
        if let Some(init) = init {
            self.compile_stmt(compiled, init)?;
        }

        let start = compiled.instructions.len();
        let (condition_register, condition_kind) = self.compile_single(compiled, condition)?;
        if condition_kind != Type::Bool {
            return Err(Error::new(
                ErrorKind::TypeMismatch("bool".to_string(), condition_kind.to_string()),
                Some(condition.span()),
            ));
        }
        let exit = compiled.append(Instruction::JumpIfFalse {
            condition: condition_register,
            to: 0,
        });

        self.compile_stmts(compiled, body)?;
        if let Some(post) = post {
            self.compile_stmt(compiled, post)?;
        }
        compiled.append(Instruction::Jump { to: start });

        let end = compiled.instructions.len();
        compiled.patch_jump(exit, end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_main(source: &str) -> std::result::Result<Artifact, Vec<Error>> {
        let mut sources = SourceSet::new();
        sources.insert("main", source);
        compile(&sources, "main", true, &Store::temporary())
    }

    #[test]
    fn test_undefined_variable_carries_position() {
        let errs = compile_main("func main() {\n    x = missing\n}").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0].kind, ErrorKind::UndefinedVariable(ref n) if n == "missing"));
        let span = errs[0].span.expect("span should be set");
        assert_eq!(span.line, 2);
    }

    #[test]
    fn test_undefined_function() {
        let errs = compile_main("func main() {\n    missing()\n}").unwrap_err();
        assert!(matches!(errs[0].kind, ErrorKind::UndefinedFunction(ref n) if n == "missing"));
    }

    #[test]
    fn test_constant_is_copied_into_registers() {
        let artifact = compile_main("Limit = 10\n\nfunc main() number {\n    return Limit\n}")
            .expect("compile failed");
        assert_eq!(artifact.constants["Limit"], Literal::number("10"));

        // The reference compiles to a defensive copy of the literal.
        let main = artifact.func_by_name("main").expect("main should exist");
        assert!(main.instructions.iter().any(|i| matches!(
            i,
            Instruction::Assign { value, .. } if *value == Literal::number("10"),
        )));

        // The package function re-assigns each constant in order.
        let package_func = artifact.package_func.as_ref().expect("package func");
        assert_eq!(package_func.instructions.len(), 1);
    }

    #[test]
    fn test_function_literal_gets_unique_name() {
        let artifact = compile_main(
            "func main() {\n    f = func (x number) number {\n        return x\n    }\n    f(1)\n}",
        )
        .expect("compile failed");
        assert!(artifact.funcs.contains_key("main.anon0"));
        assert!(artifact.funcs.contains_key("main.main"));
    }

    #[test]
    fn test_closure_captures_compile_to_parent_registers() {
        let artifact = compile_main(
            "func main() number {\n    counter = 0\n    bump = func () {\n        counter = counter + 1\n    }\n    bump()\n    return counter\n}",
        )
        .expect("compile failed");

        let nested = &artifact.funcs["main.anon0"];
        assert!(nested.instructions.iter().any(|i| matches!(
            i,
            Instruction::Move { result, .. } if result.is_parent_scope(),
        )));

        // The defining function marks the closure for capture.
        let main = artifact.func_by_name("main").expect("main should exist");
        assert!(main
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::ParentScope { .. })));
    }

    #[test]
    fn test_duplicate_map_keys_compile() {
        // Documented behavior: no error, last write wins at run time.
        let artifact = compile_main(
            "func main() {\n    m = {\"a\": 1, \"a\": 2}\n    len(m)\n}",
        )
        .expect("duplicate keys should not be a compile error");
        let main = artifact.func_by_name("main").expect("main should exist");
        let sets = main
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::MapSet { .. }))
            .count();
        assert_eq!(sets, 2);
    }

    #[test]
    fn test_untyped_empty_array_is_an_error() {
        let errs = compile_main("func main() {\n    xs = []\n}").unwrap_err();
        assert!(matches!(errs[0].kind, ErrorKind::CannotInferType(ref w) if w == "array"));
    }

    #[test]
    fn test_map_key_must_be_string() {
        let errs = compile_main("func main() {\n    m = {1: 2}\n}").unwrap_err();
        assert!(matches!(errs[0].kind, ErrorKind::MapKeyNotString(_)));
    }

    #[test]
    fn test_wrong_arity() {
        let errs = compile_main(
            "func one(x number) number {\n    return x\n}\n\nfunc main() {\n    one(1, 2)\n}",
        )
        .unwrap_err();
        assert!(matches!(errs[0].kind, ErrorKind::WrongArity(ref n, 1, 2) if n == "one"));
    }

    #[test]
    fn test_len_lowers_to_instruction() {
        let artifact =
            compile_main("func main() number {\n    return len(\"hello\")\n}").expect("compile failed");
        let main = artifact.func_by_name("main").expect("main should exist");
        assert!(main.instructions.iter().any(|i| matches!(i, Instruction::Len { .. })));
    }

    #[test]
    fn test_errors_are_collected_across_functions() {
        let errs = compile_main(
            "func a() {\n    missing1()\n}\n\nfunc b() {\n    missing2()\n}",
        )
        .unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn test_import_compiles_dependency_first() {
        let mut sources = SourceSet::new();
        sources.insert(
            "demo/util",
            "func Double(x number) number {\n    return x * 2\n}",
        );
        sources.insert(
            "app",
            "import \"demo/util\"\n\nfunc main() number {\n    return util.Double(21)\n}",
        );

        let store = Store::temporary();
        let artifact = compile(&sources, "app", false, &store).expect("compile failed");
        assert!(artifact.imports.contains_key("demo/util"));

        // The dependency was compiled and persisted along the way.
        let dep = store.load("demo/util").expect("dependency should be cached");
        assert!(dep.symbols.contains_key("Double"));
    }

    #[test]
    fn test_deferred_import_typing_resolves_signature() {
        let mut sources = SourceSet::new();
        sources.insert("lib", "func Greet(name string) string {\n    return \"hi {name}\"\n}");
        sources.insert(
            "app",
            "import \"lib\"\n\nfunc Apply(f lib.Greet) string {\n    return f(\"x\")\n}",
        );

        let artifact =
            compile(&sources, "app", false, &Store::temporary()).expect("compile failed");
        let apply = &artifact.symbols["Apply"];
        let Type::Func { arguments, .. } = &apply.kind else {
            panic!("Apply should be a function symbol");
        };
        assert_eq!(
            arguments[0],
            Type::func(vec![Type::String], vec![Type::String]),
        );
    }

    #[test]
    fn test_deferred_import_typing_missing_member() {
        let mut sources = SourceSet::new();
        sources.insert("lib", "func Greet(name string) string {\n    return name\n}");
        sources.insert(
            "app",
            "import \"lib\"\n\nfunc Apply(f lib.Missing) string {\n    return \"\"\n}",
        );

        let errs = compile(&sources, "app", false, &Store::temporary()).unwrap_err();
        assert!(matches!(errs[0].kind, ErrorKind::MissingMember(_, ref m) if m == "Missing"));
    }

    #[test]
    fn test_dependency_errors_abort_the_importer() {
        let mut sources = SourceSet::new();
        sources.insert("lib", "func Broken() {\n    missing()\n}");
        sources.insert("app", "import \"lib\"\n\nfunc main() {\n}");

        let errs = compile(&sources, "app", false, &Store::temporary()).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0].kind, ErrorKind::UndefinedFunction(_)));
    }

    #[test]
    fn test_builtin_import_short_circuits() {
        let mut sources = SourceSet::new();
        sources.insert(
            "app",
            "import \"math\"\n\nfunc main() number {\n    return math.Abs(0 - 5)\n}",
        );

        let artifact =
            compile(&sources, "app", false, &Store::temporary()).expect("compile failed");
        let main = artifact.func_by_name("main").expect("main should exist");
        assert!(main.instructions.iter().any(|i| matches!(
            i,
            Instruction::LoadPackage { package, .. } if package == "math",
        )));
    }

    #[test]
    fn test_tests_compile_only_when_requested() {
        let source = "test \"adds\" {\n    assert(1 + 1 == 2)\n}";
        let with_tests = compile_main(source).expect("compile failed");
        assert_eq!(with_tests.tests.len(), 1);
        assert_eq!(with_tests.tests[0].name, "adds");

        let mut sources = SourceSet::new();
        sources.insert("main", source);
        let without_tests =
            compile(&sources, "main", false, &Store::temporary()).expect("compile failed");
        assert!(without_tests.tests.is_empty());
    }
}
