use rill::run_source;
use rill::Literal;

#[test]
fn test_counter_closure_mutates_captured_state() {
    let source = r#"
func makeCounter() func () number {
    count = 0
    return func () number {
        count = count + 1
        return count
    }
}

func main() number {
    counter = makeCounter()
    counter()
    counter()
    return counter()
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("3")]);
}

#[test]
fn test_closure_observes_latest_value_and_writes_back() {
    // The closure reads the value at call time, not definition time, and
    // its own mutations are visible in the enclosing scope.
    let source = r#"
func main() (number, number) {
    x = 1
    get = func () number {
        return x
    }
    bump = func () {
        x = x + 10
    }
    x = 2
    a = get()
    bump()
    return a, x
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("2"), Literal::number("12")]);
}

#[test]
fn test_closure_survives_the_defining_call() {
    // makeCounter has returned by the time the closure runs; the captured
    // frame stays alive for as long as the closure does.
    let source = r#"
func makeCounter() func () number {
    count = 100
    return func () number {
        count = count + 1
        return count
    }
}

func main() number {
    a = makeCounter()
    b = makeCounter()
    a()
    a()
    b()
    return a() + b()
}
"#;
    // a counts to 103, b counts to 102.
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("205")]);
}

#[test]
fn test_capture_through_two_levels() {
    let source = r#"
func outer() func () number {
    a = 5
    middle = func () func () number {
        return func () number {
            return a
        }
    }
    return middle()
}

func main() number {
    f = outer()
    return f()
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("5")]);
}

#[test]
fn test_closure_as_argument() {
    let source = r#"
func apply(f func (number) number, x number) number {
    return f(x)
}

func main() number {
    base = 10
    add = func (n number) number {
        return base + n
    }
    return apply(add, 32)
}
"#;
    let results = run_source(source).expect("execution failed");
    assert_eq!(results, vec![Literal::number("42")]);
}
