//! Rill CLI and REPL
//!
//! Usage:
//!   rill run <path>              - Execute a package's main function
//!   rill test <path> [-f] [-v]   - Run a package's tests
//!   rill build <path>            - Compile a package to the artifact cache
//!   rill repl                    - Start interactive REPL
//!   rill help                    - Show help message

use std::env;
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rill::{compile, Error, SourceSet, Store, VERSION, VM};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "run" => {
            if args.len() < 3 {
                eprintln!("{}: missing path argument", "error".red());
                eprintln!("Usage: rill run <path>");
                process::exit(1);
            }
            run_command(&args[2]);
        }
        "test" => test_command(&args[2..]),
        "build" => {
            if args.len() < 3 {
                eprintln!("{}: missing path argument", "error".red());
                eprintln!("Usage: rill build <path>");
                process::exit(1);
            }
            build_command(&args[2]);
        }
        "repl" => run_repl(),
        "help" | "--help" | "-h" => print_help(),
        "version" | "--version" | "-v" => println!("rill {}", VERSION),
        _ => {
            // Assume it's a file
            if args[1].ends_with(".rill") {
                run_command(&args[1]);
            } else {
                eprintln!("{}: unknown command '{}'", "error".red(), args[1]);
                print_help();
                process::exit(1);
            }
        }
    }
}

fn print_help() {
    println!("{}", "Rill".cyan().bold());
    println!("A small scripting language with exact decimal arithmetic");
    println!("{} {}\n", "Version".cyan(), VERSION);
    println!("{}", "USAGE:".yellow());
    println!("  rill run <path>             Execute a package's main function");
    println!("  rill test <path> [-f] [-v]  Run a package's tests");
    println!("  rill build <path>           Compile a package to the artifact cache");
    println!("  rill repl                   Start interactive REPL");
    println!("  rill help                   Show this help message");
    println!("  rill version                Show version\n");
    println!("{}", "FLAGS:".yellow());
    println!("  -f <filter>   only run tests whose name contains the filter");
    println!("  -v            print the name of every test as it runs\n");
    println!("{}", "EXAMPLES:".yellow());
    println!("  rill run demos/hello.rill");
    println!("  rill test demos/fib -v");
}

/// Build a source set from a `.rill` file or a package directory. A
/// directory becomes a package named after it; nested directories become
/// `<name>/<sub>` packages, so they can be imported by that path.
fn collect_sources(path: &Path) -> Result<(SourceSet, String), String> {
    let mut sources = SourceSet::new();

    if path.is_file() {
        let package = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        let content =
            fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        sources.insert(package.clone(), content);
        return Ok((sources, package));
    }

    if !path.is_dir() {
        return Err(format!("no such file or directory: '{}'", path.display()));
    }

    let package = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    collect_directory(path, &package, &mut sources)?;

    if sources.get(&package).is_none() {
        return Err(format!("no .rill files in '{}'", path.display()));
    }
    Ok((sources, package))
}

fn collect_directory(dir: &Path, package: &str, sources: &mut SourceSet) -> Result<(), String> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| format!("cannot read '{}': {}", dir.display(), e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut combined = String::new();
    for entry in &entries {
        if entry.is_file() && entry.extension().map_or(false, |ext| ext == "rill") {
            let content = fs::read_to_string(entry)
                .map_err(|e| format!("cannot read '{}': {}", entry.display(), e))?;
            combined.push_str(&content);
            combined.push('\n');
        } else if entry.is_dir() {
            let name = entry
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            collect_directory(entry, &format!("{}/{}", package, name), sources)?;
        }
    }

    if !combined.is_empty() {
        sources.insert(package.to_string(), combined);
    }
    Ok(())
}

fn report_errors(errors: &[Error]) {
    for error in errors {
        eprintln!("{}", error.to_string().red());
    }
}

fn run_command(path: &str) {
    let (sources, package) = match collect_sources(Path::new(path)) {
        Ok(collected) => collected,
        Err(message) => {
            eprintln!("{}: {}", "error".red(), message);
            process::exit(1);
        }
    };

    let store = Store::default();
    let artifact = match compile(&sources, &package, false, &store) {
        Ok(artifact) => artifact,
        Err(errors) => {
            report_errors(&errors);
            process::exit(1);
        }
    };

    let mut vm = VM::new(store);
    let result = vm
        .load_artifact(&artifact)
        .and_then(|_| vm.call(&format!("{}.main", artifact.alias()), vec![]));
    if let Err(error) = result {
        eprintln!("{}", error.to_string().red());
        process::exit(1);
    }
}

fn test_command(args: &[String]) {
    let mut path = None;
    let mut filter = String::new();
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-f" => {
                i += 1;
                filter = args.get(i).cloned().unwrap_or_default();
            }
            "-v" => verbose = true,
            other => path = Some(other.to_string()),
        }
        i += 1;
    }
    let path = path.unwrap_or_else(|| ".".to_string());

    let (sources, package) = match collect_sources(Path::new(&path)) {
        Ok(collected) => collected,
        Err(message) => {
            eprintln!("{}: {}", "error".red(), message);
            process::exit(1);
        }
    };

    let store = Store::default();
    let artifact = match compile(&sources, &package, true, &store) {
        Ok(artifact) => artifact,
        Err(errors) => {
            report_errors(&errors);
            process::exit(1);
        }
    };

    let mut vm = VM::new(store);
    let started = Instant::now();
    if let Err(error) = vm.load_artifact(&artifact) {
        eprintln!("{}", error.to_string().red());
        process::exit(1);
    }
    vm.run_tests(&artifact, &filter, verbose);
    let elapsed = started.elapsed().as_millis();

    let asserts = pluralise("assert", vm.total_assertions);
    if vm.tests_failed > 0 {
        println!(
            "{}: {} failed {} passed {} {} ({} ms)",
            package, vm.tests_failed, vm.tests_passed, vm.total_assertions, asserts, elapsed,
        );
        process::exit(1);
    }
    println!(
        "{}: {} passed {} {} ({} ms)",
        package, vm.tests_passed, vm.total_assertions, asserts, elapsed,
    );
}

fn build_command(path: &str) {
    let (sources, package) = match collect_sources(Path::new(path)) {
        Ok(collected) => collected,
        Err(message) => {
            eprintln!("{}: {}", "error".red(), message);
            process::exit(1);
        }
    };

    let store = Store::default();
    match compile(&sources, &package, true, &store) {
        Ok(_) => {
            println!("{}", store.path_for_package(&package).display());
        }
        Err(errors) => {
            report_errors(&errors);
            process::exit(1);
        }
    }
}

fn run_repl() {
    println!("{} {}", "Rill".cyan().bold(), VERSION);
    println!("Type expressions or statements; Ctrl-D exits.\n");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: cannot start line editor: {}", "error".red(), e);
            process::exit(1);
        }
    };

    loop {
        match editor.readline("rill> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                eval_line(line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "error".red(), e);
                break;
            }
        }
    }
}

/// Evaluate one REPL line: first as an expression to print, then as a
/// bare statement.
fn eval_line(line: &str) {
    let as_expression = format!("func main() {{\n    print({})\n}}", line);
    if rill::run_source(&as_expression).is_ok() {
        return;
    }

    let as_statement = format!("func main() {{\n    {}\n}}", line);
    if let Err(error) = rill::run_source(&as_statement) {
        eprintln!("{}", error.to_string().red());
    }
}
