use rill::{compile, run_package, ErrorKind, Literal, SourceSet, Store, Type, VM};

fn demo_sources() -> SourceSet {
    let mut sources = SourceSet::new();
    sources.insert(
        "demo/util",
        r#"
Limit = 10

func Double(x number) number {
    return x * 2
}

func Pair(x number) (number, number) {
    return x, x * 2
}
"#,
    );
    sources.insert(
        "app",
        r#"
import "demo/util"

func main() (number, number) {
    a = util.Double(21)
    return a, util.Limit
}
"#,
    );
    sources
}

#[test]
fn test_import_and_call_across_packages() {
    let results = run_package(&demo_sources(), "app").expect("execution failed");
    assert_eq!(results, vec![Literal::number("42"), Literal::number("10")]);
}

#[test]
fn test_round_trip_caching() {
    // Compiling persists the artifact; loading it back yields the same
    // symbols, types, and instruction streams.
    let store = Store::temporary();
    let compiled = compile(&demo_sources(), "demo/util", false, &store).expect("compile failed");

    let loaded = store.load("demo/util").expect("load failed");
    assert_eq!(loaded.symbols, compiled.symbols);
    assert_eq!(loaded.constants, compiled.constants);
    for (unique_name, func) in &compiled.funcs {
        assert_eq!(
            loaded.funcs[unique_name].instructions.len(),
            func.instructions.len(),
        );
    }

    // A fresh VM can run straight from the cached artifact.
    let mut vm = VM::new(store);
    vm.load_artifact(&loaded).expect("load failed");
    let results = vm
        .call("demo__util.Double", vec![Literal::number("4")])
        .expect("call failed");
    assert_eq!(results, vec![Literal::number("8")]);
}

#[test]
fn test_importer_runs_against_cached_dependency() {
    let store = Store::temporary();
    let artifact = compile(&demo_sources(), "app", false, &store).expect("compile failed");

    // The dependency artifact is loaded from the store when the VM hits
    // the load-package instruction.
    let mut vm = VM::new(store);
    vm.load_artifact(&artifact).expect("load failed");
    let results = vm.call("app.main", vec![]).expect("call failed");
    assert_eq!(results, vec![Literal::number("42"), Literal::number("10")]);
}

#[test]
fn test_deferred_import_typing() {
    let mut sources = SourceSet::new();
    sources.insert(
        "lib",
        "func Greet(name string) string {\n    return \"hi {name}\"\n}",
    );
    sources.insert(
        "app",
        r#"
import "lib"

func Apply(f lib.Greet, name string) string {
    return f(name)
}

func main() string {
    return Apply(lib.Greet, "rill")
}
"#,
    );

    let store = Store::temporary();
    let artifact = compile(&sources, "app", false, &store).expect("compile failed");

    // The argument type was rewritten to lib's exported declaration.
    let Type::Func { arguments, .. } = &artifact.symbols["Apply"].kind else {
        panic!("Apply should be a function");
    };
    assert_eq!(arguments[0], Type::func(vec![Type::String], vec![Type::String]));

    let mut vm = VM::new(store);
    vm.load_artifact(&artifact).expect("load failed");
    let results = vm.call("app.main", vec![]).expect("call failed");
    assert_eq!(results, vec![Literal::string("hi rill")]);
}

#[test]
fn test_import_without_member_is_a_compile_error() {
    let mut sources = SourceSet::new();
    sources.insert("lib", "func Greet(name string) string {\n    return name\n}");
    sources.insert(
        "app",
        "import \"lib\"\n\nfunc Apply(f lib.Missing) string {\n    return \"\"\n}",
    );

    let errors = compile(&sources, "app", false, &Store::temporary()).unwrap_err();
    assert!(matches!(
        errors[0].kind,
        ErrorKind::MissingMember(_, ref member) if member == "Missing",
    ));
}

#[test]
fn test_missing_import_source() {
    let mut sources = SourceSet::new();
    sources.insert("app", "import \"nowhere\"\n\nfunc main() {\n}");

    let errors = compile(&sources, "app", false, &Store::temporary()).unwrap_err();
    assert!(matches!(
        errors[0].kind,
        ErrorKind::PackageNotFound(ref package) if package == "nowhere",
    ));
}

#[test]
fn test_multi_value_call_across_packages() {
    let mut sources = demo_sources();
    sources.insert(
        "pairs",
        r#"
import "demo/util"

func main() number {
    a, b = util.Pair(3)
    return a + b
}
"#,
    );

    let results = run_package(&sources, "pairs").expect("execution failed");
    assert_eq!(results, vec![Literal::number("9")]);
}

#[test]
fn test_tests_run_with_counters() {
    let mut sources = SourceSet::new();
    sources.insert(
        "checked",
        r#"
func Square(x number) number {
    return x * x
}

test "squares" {
    assert(Square(3) == 9)
    assert(Square(0 - 2) == 4)
}

test "fails" {
    assert(1 == 2)
}
"#,
    );

    let store = Store::temporary();
    let artifact = compile(&sources, "checked", true, &store).expect("compile failed");
    assert_eq!(artifact.tests.len(), 2);

    let mut vm = VM::new(store);
    vm.load_artifact(&artifact).expect("load failed");
    vm.run_tests(&artifact, "", false);
    assert_eq!(vm.tests_passed, 1);
    assert_eq!(vm.tests_failed, 1);
    assert_eq!(vm.total_assertions, 3);

    // A fresh VM with a name filter runs only the matching test.
    let store = Store::temporary();
    let artifact = compile(&sources, "checked", true, &store).expect("compile failed");
    let mut vm = VM::new(store);
    vm.load_artifact(&artifact).expect("load failed");
    vm.run_tests(&artifact, "squares", false);
    assert_eq!(vm.tests_passed, 1);
    assert_eq!(vm.tests_failed, 0);
}
