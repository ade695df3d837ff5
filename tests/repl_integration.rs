// ABOUTME: End-to-end tests driving the compiler the way the REPL does

use calc_jit::ast::{BinaryOp, Expr};
use calc_jit::driver::{format_value, Driver, Reply};
use calc_jit::error::CalcError;
use calc_jit::parser::Parser;
use inkwell::context::Context;
use serial_test::serial;

/// Runs `test` against a fresh driver with IR dumping silenced.
fn with_driver<T>(test: impl FnOnce(&mut Driver) -> T) -> T {
    let context = Context::create();
    let mut driver = Driver::new(&context).expect("driver construction failed");
    driver.set_dump_ir(false);
    test(&mut driver)
}

/// Evaluates a line holding exactly one top-level expression.
fn eval(driver: &mut Driver, line: &str) -> f64 {
    let mut replies = driver.run_line(line);
    assert_eq!(replies.len(), 1, "expected one statement in {:?}", line);
    match replies.pop().unwrap() {
        Ok(Reply::Value(value)) => value,
        other => panic!("expected a value from {:?}, got {:?}", line, other),
    }
}

/// Handles a definition line, asserting success.
fn define(driver: &mut Driver, line: &str) {
    let mut replies = driver.run_line(line);
    assert_eq!(replies.len(), 1, "expected one statement in {:?}", line);
    match replies.pop().unwrap() {
        Ok(Reply::Definition(_)) => {}
        other => panic!("expected a definition from {:?}, got {:?}", line, other),
    }
}

// ===== The documented end-to-end scenarios =====

#[test]
#[serial]
fn test_scenario_simple_arithmetic() {
    with_driver(|driver| {
        let value = eval(driver, "(5+2)*8");
        assert_eq!(value, 56.0);
        assert_eq!(format_value(value), "56");
    });
}

#[test]
#[serial]
fn test_scenario_power_is_right_associative() {
    with_driver(|driver| {
        // 2^(3^2), not (2^3)^2
        assert_eq!(eval(driver, "2^3^2"), 512.0);
        assert_eq!(eval(driver, "(2^3)^2"), 64.0);
    });
}

#[test]
#[serial]
fn test_scenario_definition_and_call() {
    with_driver(|driver| {
        define(driver, "def sq(x) x*x");
        assert_eq!(eval(driver, "sq(7)"), 49.0);
    });
}

#[test]
#[serial]
fn test_scenario_derivative_is_installed() {
    with_driver(|driver| {
        define(driver, "def sq(x) x*x");
        assert_eq!(eval(driver, "dsq_dx(3)"), 6.0);
    });
}

#[test]
#[serial]
fn test_scenario_chain_rule_through_user_calls() {
    with_driver(|driver| {
        define(driver, "def sq(x) x*x");
        define(driver, "def f(x) sq(sq(x))");
        // f(x) = x^4, f'(2) = 4 * 2^3 = 32
        assert_eq!(eval(driver, "df_dx(2)"), 32.0);
    });
}

#[test]
#[serial]
fn test_scenario_extern_resolves_against_libm() {
    with_driver(|driver| {
        let mut replies = driver.run_line("extern sin(x)");
        assert_eq!(replies.len(), 1);
        match replies.pop().unwrap() {
            Ok(Reply::Extern(name)) => assert_eq!(name, "sin"),
            other => panic!("expected an extern reply, got {:?}", other),
        }
        assert_eq!(eval(driver, "sin(0)"), 0.0);
    });
}

// ===== Value semantics =====

/// Reference evaluation of a call-free expression tree, honoring the
/// operator semantics the compiled code must match.
fn reference_eval(expr: &Expr) -> f64 {
    match expr {
        Expr::Number(n) => *n,
        Expr::Binary { op, lhs, rhs } => {
            let l = reference_eval(lhs);
            let r = reference_eval(rhs);
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Pow => l.powf(r),
                BinaryOp::Less => {
                    if l < r {
                        1.0
                    } else {
                        0.0
                    }
                }
            }
        }
        other => panic!("reference evaluator does not handle {:?}", other),
    }
}

#[test]
#[serial]
fn test_numeric_expressions_match_reference_evaluator() {
    let sources = [
        "1 + 2 * 3",
        "1 * 2 + 3",
        "10 - 4 - 3",
        "100 / 5 / 2",
        "2 ^ 3 ^ 2",
        "-2 ^ 2",
        "+7 - -3",
        "2 * (3 + 4) ^ 2",
        "1 / 3",
        "2.5e2 - .5",
        "1 + 2 < 4",
        "4 < 1 + 2",
    ];
    with_driver(|driver| {
        for source in sources {
            let expr = Parser::new(source)
                .parse_expression()
                .expect("reference parse failed");
            let expected = reference_eval(&expr);
            let actual = eval(driver, source);
            assert_eq!(actual, expected, "mismatch for {:?}", source);
        }
    });
}

#[test]
#[serial]
fn test_unary_sign_identities() {
    with_driver(|driver| {
        for n in [0.0, 1.0, 2.5, 1e10, 0.125] {
            let source = format!("+{}", n);
            assert_eq!(eval(driver, &source), n);
            let source = format!("-{}", n);
            assert_eq!(eval(driver, &source), -n);
        }
    });
}

#[test]
#[serial]
fn test_if_selects_branch_values() {
    with_driver(|driver| {
        assert_eq!(eval(driver, "if 1 < 2 then 10 else 20"), 10.0);
        assert_eq!(eval(driver, "if 2 < 1 then 10 else 20"), 20.0);
        // Any nonzero condition takes the then branch.
        assert_eq!(eval(driver, "if 3 then 1 else 2"), 1.0);
        assert_eq!(eval(driver, "if 0 then 1 else 2"), 2.0);
    });
}

#[test]
#[serial]
fn test_comparison_widens_to_zero_or_one() {
    with_driver(|driver| {
        assert_eq!(eval(driver, "1 < 2"), 1.0);
        assert_eq!(eval(driver, "2 < 1"), 0.0);
        assert_eq!(eval(driver, "2 < 2"), 0.0);
    });
}

#[test]
#[serial]
fn test_for_loop_always_yields_zero() {
    with_driver(|driver| {
        assert_eq!(eval(driver, "for i = 1, i < 10 in i"), 0.0);
        assert_eq!(eval(driver, "for i = 1, i < 10, 2 in i * i"), 0.0);
    });
}

#[test]
#[serial]
fn test_function_with_control_flow() {
    with_driver(|driver| {
        define(driver, "def absolute(x) if x < 0 then 0 - x else x");
        assert_eq!(eval(driver, "absolute(-3)"), 3.0);
        assert_eq!(eval(driver, "absolute(4)"), 4.0);
        assert_eq!(eval(driver, "absolute(0)"), 0.0);

        define(driver, "def spin(n) for i = 0, i < n in sin(i)");
        assert_eq!(eval(driver, "spin(5)"), 0.0);
    });
}

#[test]
#[serial]
fn test_multi_parameter_functions() {
    with_driver(|driver| {
        define(driver, "def area(w, h) w * h");
        assert_eq!(eval(driver, "area(6, 7)"), 42.0);
        // Partial derivatives exist for every formal parameter.
        assert_eq!(eval(driver, "darea_dw(6, 7)"), 7.0);
        assert_eq!(eval(driver, "darea_dh(6, 7)"), 6.0);
    });
}

// ===== Driver state and module lifecycle =====

#[test]
#[serial]
fn test_earlier_definitions_stay_callable() {
    with_driver(|driver| {
        define(driver, "def one() 1");
        define(driver, "def two() one() + one()");
        define(driver, "def three() two() + one()");
        // Every function lives in its own long-installed module.
        assert_eq!(eval(driver, "one()"), 1.0);
        assert_eq!(eval(driver, "two()"), 2.0);
        assert_eq!(eval(driver, "three()"), 3.0);
        assert_eq!(eval(driver, "one() + two() + three()"), 6.0);
    });
}

#[test]
#[serial]
fn test_redefinition_shadows_for_later_input() {
    with_driver(|driver| {
        define(driver, "def g(x) x + 1");
        assert_eq!(eval(driver, "g(1)"), 2.0);
        define(driver, "def g(x) x * 2");
        assert_eq!(eval(driver, "g(3)"), 6.0);
    });
}

#[test]
#[serial]
fn test_anonymous_expressions_are_unloaded() {
    with_driver(|driver| {
        // Each top-level expression reuses the __anon_expr name; if the
        // previous one leaked, installation or lookup would go stale.
        for i in 1..20 {
            assert_eq!(eval(driver, &format!("{} + {}", i, i)), (2 * i) as f64);
        }
    });
}

#[test]
#[serial]
fn test_multiple_statements_on_one_line() {
    with_driver(|driver| {
        let replies = driver.run_line("2 + 3; 4 * 5");
        let values: Vec<f64> = replies
            .into_iter()
            .map(|reply| match reply {
                Ok(Reply::Value(value)) => value,
                other => panic!("expected a value, got {:?}", other),
            })
            .collect();
        assert_eq!(values, vec![5.0, 20.0]);

        // Bare semicolons produce no reply at all.
        assert!(driver.run_line(";;;").is_empty());
    });
}

// ===== Error handling and recovery =====

#[test]
#[serial]
fn test_parse_error_then_recovery() {
    with_driver(|driver| {
        let replies = driver.run_line("(1 + 2");
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], Err(CalcError::Parse(_))));
        // The driver is still usable afterwards.
        assert_eq!(eval(driver, "1 + 2"), 3.0);
    });
}

#[test]
#[serial]
fn test_unknown_variable_is_reported_and_function_discarded() {
    with_driver(|driver| {
        let replies = driver.run_line("def broken(x) y");
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], Err(CalcError::UnknownVariable(_))));
        // The failed definition did not register a callable function.
        let replies = driver.run_line("broken(1)");
        assert!(replies[0].is_err());
        // And the driver still works.
        assert_eq!(eval(driver, "2 * 21"), 42.0);
    });
}

#[test]
#[serial]
fn test_unknown_function_call_is_reported() {
    with_driver(|driver| {
        let replies = driver.run_line("mystery(1)");
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], Err(CalcError::UnknownFunction(_))));
    });
}

#[test]
#[serial]
fn test_call_arity_mismatch_is_reported() {
    with_driver(|driver| {
        define(driver, "def sq(x) x*x");
        let replies = driver.run_line("sq(1, 2)");
        assert!(matches!(replies[0], Err(CalcError::Arity { .. })));
        let replies = driver.run_line("pow(1)");
        assert!(matches!(replies[0], Err(CalcError::Arity { .. })));
    });
}

#[test]
#[serial]
fn test_extern_without_host_symbol_fails_on_use() {
    with_driver(|driver| {
        let replies = driver.run_line("extern nosuchsymbol(x)");
        assert!(matches!(replies[0], Ok(Reply::Extern(_))));
        // Using the bogus extern is an installation error, not a crash.
        let replies = driver.run_line("nosuchsymbol(1)");
        assert!(matches!(replies[0], Err(CalcError::Jit(_))));
        // The session survives.
        assert_eq!(eval(driver, "8 / 2"), 4.0);
    });
}

#[test]
#[serial]
fn test_unknown_token_is_rejected() {
    with_driver(|driver| {
        let replies = driver.run_line("1 + @");
        assert!(replies.iter().any(|reply| reply.is_err()));
        assert_eq!(eval(driver, "1 + 1"), 2.0);
    });
}
