use rill::run_source;
use rill::{ErrorKind, Literal};

#[test]
fn test_precision_survives_arithmetic() {
    let results = run_source("func main() number {\n    return 1.2200 - 4.7\n}")
        .expect("execution failed");
    assert_eq!(results[0].to_string(), "-3.4800");

    let results = run_source("func main() number {\n    return 1.2200 + 4.7\n}")
        .expect("execution failed");
    assert_eq!(results[0].to_string(), "5.9200");
}

#[test]
fn test_division_by_zero_fails() {
    let err = run_source("func main() number {\n    return 1.2200 / 0\n}").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DivisionByZero));
}

#[test]
fn test_negative_literal_keeps_precision() {
    let results =
        run_source("func main() number {\n    return -3.20\n}").expect("execution failed");
    assert_eq!(results[0].to_string(), "-3.20");
}

#[test]
fn test_remainder() {
    let results =
        run_source("func main() number {\n    return 7 % 3\n}").expect("execution failed");
    assert_eq!(results[0], Literal::number("1"));
}

#[test]
fn test_interpolation() {
    let source = r#"
func main() string {
    n = 3
    return "n = {n}!"
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::string("n = 3!"));
}

#[test]
fn test_interpolation_of_expressions() {
    let source = r#"
func main() string {
    a = 1.50
    b = 2
    return "sum is {a + b}"
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::string("sum is 3.50"));
}

#[test]
fn test_string_concatenation() {
    let source = r#"
func main() string {
    return "foo" + "bar"
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::string("foobar"));
}

#[test]
fn test_arrays() {
    let source = r#"
func main() (number, number) {
    xs = [10, 20, 30]
    xs[1] = 25
    return xs[1], len(xs)
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("25"), Literal::number("3")]);
}

#[test]
fn test_array_out_of_range() {
    let source = r#"
func main() number {
    xs = [1]
    return xs[5]
}
"#;
    let err = run_source(source).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IndexOutOfRange(5, 1)));
}

#[test]
fn test_maps_and_duplicate_keys() {
    // Duplicate keys are not rejected; the last write wins.
    let source = r#"
func main() (number, number) {
    m = {"a": 1, "a": 2, "b": 3}
    return m["a"], len(m)
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("2"), Literal::number("2")]);
}

#[test]
fn test_len_counts_runes() {
    let results =
        run_source("func main() number {\n    return len(\"héllo\")\n}").expect("execution failed");
    assert_eq!(results[0], Literal::number("5"));
}

#[test]
fn test_if_else_chain() {
    let source = r#"
func classify(n number) string {
    if n < 0 {
        return "negative"
    } else if n == 0 {
        return "zero"
    } else {
        return "positive"
    }
}

func main() string {
    return classify(0 - 1) + classify(0) + classify(1)
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::string("negativezeropositive"));
}

#[test]
fn test_for_loop_sums() {
    let source = r#"
func main() number {
    total = 0
    for i = 1; i <= 10; i = i + 1 {
        total = total + i
    }
    return total
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::number("55"));
}

#[test]
fn test_condition_only_for_loop() {
    let source = r#"
func main() number {
    n = 1
    for n < 100 {
        n = n * 2
    }
    return n
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::number("128"));
}

#[test]
fn test_multiple_return_values() {
    let source = r#"
func divmod(a number, b number) (number, number) {
    return a / b, a % b
}

func main() (number, number) {
    q, r = divmod(7, 2)
    return q, r
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::number("3.5"));
    assert_eq!(results[1], Literal::number("1"));
}

#[test]
fn test_recursive_function() {
    let source = r#"
func fib(n number) number {
    if n < 2 {
        return n
    }
    return fib(n - 1) + fib(n - 2)
}

func main() number {
    return fib(10)
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::number("55"));
}

#[test]
fn test_builtin_math_package() {
    let source = r#"
import "math"

func main() (number, number) {
    return math.Abs(0 - 4.2), math.Pi
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::number("4.2"));
    assert_eq!(results[1].to_string(), "3.14159265358979323846");
}

#[test]
fn test_undefined_variable_has_position() {
    let err = run_source("func main() {\n    x = missing\n}").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UndefinedVariable(ref n) if n == "missing"));
    assert_eq!(err.span.expect("span should be set").line, 2);
}

#[test]
fn test_character_literals() {
    let source = r#"
func main() (char, bool) {
    c = 'x'
    return c, c == 'x'
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::Char('x'));
    assert_eq!(results[1], Literal::Bool(true));
}

#[test]
fn test_logic_operators() {
    let source = r#"
func main() bool {
    a = true
    b = false
    return (a or b) and !(a and b)
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::Bool(true));
}

#[test]
fn test_package_constants() {
    let source = r#"
Greeting = "hello"
Limit = 3

func main() string {
    out = ""
    for i = 0; i < Limit; i = i + 1 {
        out = out + Greeting
    }
    return out
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results[0], Literal::string("hellohellohello"));
}
