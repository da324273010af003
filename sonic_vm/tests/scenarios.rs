//! End-to-end programs: parse, optimize, schedule and evaluate.

use pretty_assertions::assert_eq;
use sonic_jit::{ArgType, CodeGen, CodeGenConfig, CompileError, Op};
use sonic_parser::compile;
use sonic_vm::{evaluate, evaluate_with_fuel, EvalError};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(src: &str) -> CodeGen {
    compile(src, CodeGenConfig::default()).unwrap()
}

fn run(src: &str, arg: i64) -> String {
    evaluate(&mut build(src), arg).unwrap()
}

/// No peephole ever moved a type up the lattice.
fn assert_monotone(code: &CodeGen) {
    assert_eq!(code.graph.stats.monotone_violations, 0);
}

#[test]
fn test_constant_folding() {
    init_logger();
    let code = build("return 1+2*3+-5;");
    assert_eq!(code.print(), "return 2;");
    assert_eq!(run("return 1+2*3+-5;", 0), "2");
}

#[test]
fn test_if_merge() {
    let src = "int a=1; if(arg==1) a=2; else a=3; return a;";
    assert_eq!(build(src).print(), "return Phi(Region,2,3);");
    assert_eq!(run(src, 1), "2");
    assert_eq!(run(src, 0), "3");
}

#[test]
fn test_cyclic_struct() {
    let src = "struct C { C? l; } C c = new C; c.l = c; return c;";
    let code = build(src);
    assert_eq!(code.print(), "return C;");
    assert_monotone(&code);
    assert_eq!(run(src, 0), "C{l=$cyclic}");
}

#[test]
fn test_loop_hoists_invariant() {
    init_logger();
    let src = "while(arg<10){arg=arg+1;} return arg;";
    let code = build(src);
    assert_eq!(code.print(), "return Phi(Loop,arg,(Phi_arg+1));");

    let one = code
        .graph
        .live_nodes()
        .find(|&n| {
            matches!(code.graph.op(n), Op::Con(_))
                && code.types.int_value(code.graph.ty(n)) == Some(1)
        })
        .unwrap();
    assert_eq!(code.loop_depth(one), 0);
    assert!(code.blocks().iter().any(|b| b.loop_depth == 1));
    assert_monotone(&code);

    assert_eq!(run(src, 3), "10");
    assert_eq!(run(src, 42), "42");
}

#[test]
fn test_nested_loops() {
    let src = "
        int s = 0;
        int i = 0;
        while (i < arg) {
            int j = 0;
            while (j < i) { s = s + 1; j = j + 1; }
            i = i + 1;
        }
        return s;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 5), "10");
    assert_eq!(run(src, 0), "0");
}

#[test]
fn test_function_calls() {
    let src = "val sq = {int x -> x*x;}; return sq(arg) + sq(2);";
    assert_eq!(run(src, 3), "13");
}

#[test]
fn test_call_results_drive_a_loop() {
    let src = "
        val sq = {int x -> x*x;};
        int s = 0;
        int i = 0;
        while (i < sq(arg)) { s = s + sq(i) + 1; i = i + 1; }
        return s * 2;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 2), "36");
    assert_eq!(run(src, 0), "0");
}

#[test]
fn test_break_exits_loop() {
    let src = "int i = 0; while (1) { if (i == arg) break; i = i + 1; } return i;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 5), "5");
    assert_eq!(run(src, 0), "0");
}

#[test]
fn test_loop_with_two_exits() {
    let src = "int i = 0; while (i < 10) { if (i * i > arg) break; i = i + 1; } return i;";
    assert_eq!(run(src, 20), "5");
    assert_eq!(run(src, 1000), "10");
}

#[test]
fn test_break_leaves_only_the_inner_loop() {
    let src = "
        int n = 0;
        int i = 0;
        while (i < arg) {
            int j = 0;
            while (1) {
                if (j == i) break;
                j = j + 1;
                n = n + 1;
            }
            i = i + 1;
        }
        return n;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 4), "6");
}

#[test]
fn test_for_sums_a_range() {
    let src = "int s = 0; for (int i = 1; i <= arg; i = i + 1) s = s + i; return s;";
    assert_eq!(run(src, 4), "10");
    assert_eq!(run(src, 0), "0");
}

#[test]
fn test_continue_runs_the_step() {
    let src = "
        int s = 0;
        for (int i = 0; i < arg; i = i + 1) {
            if (i == 2) continue;
            s = s + i;
        }
        return s;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 5), "8");
    assert_eq!(run(src, 0), "0");
}

#[test]
fn test_for_without_a_test_needs_a_break() {
    let src = "int i = 0; for (;; i = i + 1) { if (i == arg) break; } return i * 3;";
    assert_eq!(run(src, 4), "12");
}

#[test]
fn test_struct_fields() {
    let src = "
        struct P { int x; int y; }
        P p = new P;
        p.x = arg;
        p.y = p.x * 2;
        return p.y + 1;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 4), "9");
}

#[test]
fn test_float_arg() {
    let config = CodeGenConfig::default().with_arg(ArgType::Flt);
    let mut code = compile("return arg * 0.5;", config).unwrap();
    assert_eq!(evaluate(&mut code, 3).unwrap(), "1.5");
}

#[test]
fn test_seed_confluence() {
    let src = "int a = arg + 1; int b = 2 + arg; if (a == b) return a * 3; return b;";
    let base = build(src).print();
    for seed in [1, 7, 42, 1234] {
        let code = compile(src, CodeGenConfig::default().with_seed(seed)).unwrap();
        assert_eq!(code.print(), base, "seed {seed}");
    }
}

#[test]
fn test_optimized_matches_unoptimized() {
    let src = "
        int s = 0;
        int i = 0;
        while (i < 10) { s = s + i * arg; i = i + 1; }
        return s;";
    for arg in [0, 1, 3] {
        let full = run(src, arg);
        let mut plain = compile(src, CodeGenConfig::minimal()).unwrap();
        assert_eq!(evaluate(&mut plain, arg).unwrap(), full);
    }
    assert_eq!(run(src, 2), "90");
}

#[test]
fn test_null_check_rejected() {
    let src = "struct S { int x; } S? s = null; if (arg) s = new S; return s.x;";
    let err = compile(src, CodeGenConfig::default()).err().unwrap();
    assert!(matches!(err, CompileError::TypeCheck(_)));
}

#[test]
fn test_infinite_loop_times_out() {
    let src = "int i = 0; while (arg) i = i + 1; return i;";
    let mut code = build(src);
    assert_eq!(evaluate_with_fuel(&mut code, 1, 100), Err(EvalError::Timeout));
    assert_eq!(evaluate_with_fuel(&mut code, 0, 100).unwrap(), "0");
}

#[test]
fn test_null_check_refines_pointer() {
    let src = "
        struct S { int x; }
        S? s = null;
        if (arg) s = new S;
        if (s) return s.x + 5;
        return -1;";
    assert_monotone(&build(src));
    assert_eq!(run(src, 1), "5");
    assert_eq!(run(src, 0), "-1");
}
