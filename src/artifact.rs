//! Compiled package artifacts and the on-disk cache
//!
//! A package compiles once into an `Artifact`: its symbol table, imports,
//! constants, compiled functions, and tests. Artifacts are persisted as
//! MessagePack under a cache directory, one file per package, and loaded
//! lazily by importers. Built-in packages short-circuit to an in-process
//! registry and never touch the disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::ast::Literal;
use crate::builtins;
use crate::error::{Error, ErrorKind, Result};
use crate::instruction::{CompiledFunc, CompiledTest};
use crate::types::Type;

/// Artifact format version, checked on load. The encoding carries no other
/// schema validation; a version bump invalidates every cached artifact.
pub const FORMAT_VERSION: u32 = 1;

/// Default cache directory, relative to the working directory.
pub const CACHE_DIRECTORY: &str = ".rill";

const ARTIFACT_EXTENSION: &str = "rlc";

static NEXT_TEMPORARY: AtomicUsize = AtomicUsize::new(0);

/// Flatten a package path into a single path-safe token.
pub fn package_alias(package: &str) -> String {
    package.replace('/', "__")
}

/// A named, typed export of a package: either a compiled function or a
/// constant value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: Type,
    pub target: SymbolTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolTarget {
    Func { unique_name: String },
    Constant { value: Literal },
}

/// The compiled form of one source package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub version: u32,

    /// Full package path, like `demo/util`.
    pub package: String,

    /// Import path to the dependency's exported interface.
    pub imports: BTreeMap<String, Type>,

    /// Package-level constants, referenceable from any function.
    pub constants: BTreeMap<String, Literal>,

    /// Exported name to symbol.
    pub symbols: BTreeMap<String, Symbol>,

    /// Unique name to compiled function, anonymous functions included.
    pub funcs: BTreeMap<String, CompiledFunc>,

    /// Top-level initialization, compiled after all user functions.
    pub package_func: Option<CompiledFunc>,

    pub tests: Vec<CompiledTest>,
}

impl Artifact {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            package: package.into(),
            imports: BTreeMap::new(),
            constants: BTreeMap::new(),
            symbols: BTreeMap::new(),
            funcs: BTreeMap::new(),
            package_func: None,
            tests: Vec::new(),
        }
    }

    /// The package path flattened into a symbol-safe prefix.
    pub fn alias(&self) -> String {
        package_alias(&self.package)
    }

    /// Register a named function: a symbol entry plus the compiled body.
    pub fn add_func(&mut self, func: CompiledFunc) {
        self.symbols.insert(
            func.name.clone(),
            Symbol {
                kind: func.kind.clone(),
                target: SymbolTarget::Func { unique_name: func.unique_name.clone() },
            },
        );
        self.funcs.insert(func.unique_name.clone(), func);
    }

    /// Register a package-level constant.
    pub fn add_constant(&mut self, name: impl Into<String>, value: Literal) {
        let name = name.into();
        self.symbols.insert(
            name.clone(),
            Symbol {
                kind: value.kind(),
                target: SymbolTarget::Constant { value: value.clone() },
            },
        );
        self.constants.insert(name, value);
    }

    /// Find a compiled function by its declared source name.
    pub fn func_by_name(&self, name: &str) -> Option<&CompiledFunc> {
        self.funcs.values().find(|f| f.name == name)
    }

    /// The package's exported surface as an interface type.
    pub fn interface(&self) -> Type {
        let members = self
            .symbols
            .iter()
            .map(|(name, symbol)| (name.clone(), symbol.kind.clone()))
            .collect();
        Type::interface(self.package.clone(), members)
    }

    /// The package's exported surface as a first-class value: function
    /// references for functions, copies for constants.
    pub fn interface_value(&self) -> Literal {
        let members = self
            .symbols
            .iter()
            .map(|(name, symbol)| {
                let value = match &symbol.target {
                    SymbolTarget::Func { unique_name } => {
                        Literal::func_ref(symbol.kind.clone(), unique_name)
                    }
                    SymbolTarget::Constant { value } => value.clone(),
                };
                (name.clone(), value)
            })
            .collect();
        Literal::Interface { kind: self.interface(), members }
    }

    /// Replace an unresolved `pkg.Member` placeholder with the member's
    /// declared type on the already-compiled import. Resolving a resolved
    /// type returns it unchanged.
    pub fn resolve_type(&self, ty: &Type) -> Result<Type> {
        match ty {
            Type::UnresolvedInterface { name } => {
                let Some((package, member)) = name.split_once('.') else {
                    return Err(Error::new(ErrorKind::UnresolvedType(name.clone()), None));
                };
                for (path, interface) in &self.imports {
                    if path != package && !path.ends_with(&format!("/{}", package)) {
                        continue;
                    }
                    if let Type::Interface { members, .. } = interface {
                        return members.get(member).cloned().ok_or_else(|| {
                            Error::new(
                                ErrorKind::MissingMember(package.to_string(), member.to_string()),
                                None,
                            )
                        });
                    }
                }
                Err(Error::new(ErrorKind::UnresolvedType(name.clone()), None))
            }
            Type::Array(element) => Ok(Type::array(self.resolve_type(element)?)),
            Type::Map(element) => Ok(Type::map(self.resolve_type(element)?)),
            Type::Func { arguments, returns } => {
                let arguments = arguments
                    .iter()
                    .map(|t| self.resolve_type(t))
                    .collect::<Result<Vec<Type>>>()?;
                let returns = returns
                    .iter()
                    .map(|t| self.resolve_type(t))
                    .collect::<Result<Vec<Type>>>()?;
                Ok(Type::func(arguments, returns))
            }
            resolved => Ok(resolved.clone()),
        }
    }
}

/// The artifact cache: one binary file per compiled package.
#[derive(Debug, Clone)]
pub struct Store {
    directory: PathBuf,
}

impl Store {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// A store under a process-unique temporary directory. Used by the
    /// REPL and by tests so concurrent runs never share a cache.
    pub fn temporary() -> Self {
        let n = NEXT_TEMPORARY.fetch_add(1, Ordering::Relaxed);
        Self::new(std::env::temp_dir().join(format!("rill-{}-{}", std::process::id(), n)))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The deterministic cache path for a package name.
    pub fn path_for_package(&self, package: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", package_alias(package), ARTIFACT_EXTENSION))
    }

    /// Create or replace the cached artifact for `package`.
    pub fn store(&self, artifact: &Artifact, package: &str) -> Result<()> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| Error::new(ErrorKind::Io(e.to_string()), None))?;

        let encoded = rmp_serde::to_vec(artifact)
            .map_err(|e| Error::new(ErrorKind::Encoding(e.to_string()), None))?;

        fs::write(self.path_for_package(package), encoded)
            .map_err(|e| Error::new(ErrorKind::Io(e.to_string()), None))
    }

    /// Load a package artifact, consulting the built-in registry first.
    pub fn load(&self, package: &str) -> Result<Artifact> {
        if let Some(builtin) = builtins::package(package) {
            return Ok(builtin.clone());
        }

        let bytes = fs::read(self.path_for_package(package))
            .map_err(|_| Error::new(ErrorKind::PackageNotFound(package.to_string()), None))?;

        let artifact: Artifact = rmp_serde::from_slice(&bytes)
            .map_err(|e| Error::new(ErrorKind::Encoding(e.to_string()), None))?;

        if artifact.version != FORMAT_VERSION {
            return Err(Error::new(
                ErrorKind::IncompatibleArtifact(artifact.version, FORMAT_VERSION),
                None,
            ));
        }

        Ok(artifact)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(CACHE_DIRECTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Register};
    use crate::number::Number;

    fn sample_artifact() -> Artifact {
        let mut artifact = Artifact::new("demo/util");
        artifact.add_constant("Limit", Literal::number("10"));

        let mut func = CompiledFunc::new(
            "Double",
            "demo__util.Double",
            Type::func(vec![Type::Number], vec![Type::Number]),
            vec!["x".to_string()],
        );
        func.variables.insert("x".to_string(), Type::Number);
        let two = func.next_register();
        func.append(Instruction::Assign {
            result: two.clone(),
            value: Literal::Number(Number::new("2")),
        });
        let result = func.next_register();
        func.append(Instruction::Multiply {
            left: Register::from("x"),
            right: two,
            result: result.clone(),
        });
        func.append(Instruction::Return { results: vec![result] });
        artifact.add_func(func);
        artifact
    }

    #[test]
    fn test_path_flattens_package_separators() {
        let store = Store::new("/tmp/cache");
        assert_eq!(
            store.path_for_package("demo/util"),
            PathBuf::from("/tmp/cache/demo__util.rlc"),
        );
    }

    #[test]
    fn test_round_trip_preserves_symbols_and_instructions() {
        let store = Store::temporary();
        let artifact = sample_artifact();
        store.store(&artifact, "demo/util").expect("store failed");

        let loaded = store.load("demo/util").expect("load failed");
        assert_eq!(loaded.symbols, artifact.symbols);
        assert_eq!(loaded.constants, artifact.constants);
        assert_eq!(
            loaded.funcs["demo__util.Double"].instructions.len(),
            artifact.funcs["demo__util.Double"].instructions.len(),
        );
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_load_missing_package() {
        let store = Store::temporary();
        let err = store.load("no/such/package").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::PackageNotFound(_)));
    }

    #[test]
    fn test_load_rejects_incompatible_version() {
        let store = Store::temporary();
        let mut artifact = sample_artifact();
        artifact.version = FORMAT_VERSION + 1;
        store.store(&artifact, "demo/util").expect("store failed");

        let err = store.load("demo/util").unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::IncompatibleArtifact(v, FORMAT_VERSION) if v == FORMAT_VERSION + 1,
        ));
    }

    #[test]
    fn test_builtins_never_touch_the_store() {
        let store = Store::temporary();
        let artifact = store.load("math").expect("builtin load failed");
        assert_eq!(artifact.package, "math");
        assert!(!store.path_for_package("math").exists());
    }

    #[test]
    fn test_interface_value_exposes_symbols() {
        let artifact = sample_artifact();
        let Literal::Interface { members, .. } = artifact.interface_value() else {
            panic!("expected interface literal");
        };
        assert_eq!(members["Limit"], Literal::number("10"));
        assert!(matches!(members["Double"], Literal::Func { .. }));
    }

    #[test]
    fn test_resolve_type_is_idempotent() {
        let mut artifact = Artifact::new("app");
        let dep = sample_artifact();
        artifact.imports.insert("demo/util".to_string(), dep.interface());

        let resolved = artifact
            .resolve_type(&Type::unresolved("util.Double"))
            .expect("resolve failed");
        assert_eq!(resolved, Type::func(vec![Type::Number], vec![Type::Number]));
        assert_eq!(artifact.resolve_type(&resolved).expect("resolve failed"), resolved);
    }

    #[test]
    fn test_resolve_type_missing_member() {
        let mut artifact = Artifact::new("app");
        artifact
            .imports
            .insert("demo/util".to_string(), sample_artifact().interface());

        let err = artifact.resolve_type(&Type::unresolved("util.Missing")).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MissingMember(_, ref m) if m == "Missing"));
    }
}
