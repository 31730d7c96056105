mod common;

use common::{output_of, run, run_ok};
use langur::{ErrorKind, Object};
use pretty_assertions::assert_eq;

#[test]
fn while_loop_with_break_and_continue() {
    let output = output_of(
        "var i = 0; var sum = 0; \
         while (i < 10) { i = i + 1; if (i % 2 == 0) { continue } if (i > 7) { break } sum = sum + i } \
         println(sum)",
    );
    // 1 + 3 + 5 + 7 = 16
    assert_eq!(output, "16\n");
}

#[test]
fn classic_for_loop() {
    let output = output_of("var sum = 0; for (var i = 0; i < 5; i++) { sum += i } println(sum)");
    assert_eq!(output, "10\n");
}

#[test]
fn foreach_over_array_map_and_string() {
    assert_eq!(
        output_of("var sum = 0; for (x in [1, 2, 3]) { sum += x } println(sum)"),
        "6\n"
    );
    assert_eq!(
        output_of(
            "var m = { a: 1, b: 2 }; var out = \"\"; \
             for (pair in m) { out = out + pair[0] + \"=\" + pair[1] + \";\" } println(out)"
        ),
        "a=1;b=2;\n"
    );
    assert_eq!(
        output_of("var out = \"\"; for (c in \"abc\") { out = out + c } println(out)"),
        "abc\n"
    );
}

#[test]
fn foreach_over_expression_source() {
    assert_eq!(
        output_of("var sum = 0; for (x in range(1, 4)) { sum += x } println(sum)"),
        "6\n"
    );
}

#[test]
fn nested_loops_break_the_right_level() {
    let output = output_of(
        "var hits = 0; \
         for (var i = 0; i < 3; i++) { \
           for (var j = 0; j < 3; j++) { if (j == 1) { break } hits = hits + 1 } \
         } \
         println(hits)",
    );
    assert_eq!(output, "3\n");
}

#[test]
fn ternary_and_logical_short_circuit() {
    assert_eq!(run_ok("true ? 1 : 2"), Object::Number(1.0));
    assert_eq!(run_ok("false ? 1 : 2"), Object::Number(2.0));
    // rhs of && must not run when lhs is false
    let output = output_of(
        "var ran = false; \
         function touch() { ran = true; return true } \
         var r = false && touch(); \
         println(ran); println(r)",
    );
    assert_eq!(output, "false\nfalse\n");
    let output = output_of("println(null || \"fallback\")");
    assert_eq!(output, "fallback\n");
}

#[test]
fn logical_yields_operand_values() {
    assert_eq!(run_ok("1 && 2"), Object::Number(2.0));
    assert_eq!(run_ok("0 || 3"), Object::Number(3.0));
    assert_eq!(run_ok("0 && 2"), Object::Number(0.0));
}

#[test]
fn prefix_and_postfix_incdec() {
    let output = output_of("var x = 5; println(x++); println(x); println(++x); println(x--)");
    assert_eq!(output, "5\n6\n7\n7\n");
}

#[test]
fn compound_assignment_operators() {
    assert_eq!(run_ok("var x = 8; x -= 3; x *= 2; x"), Object::Number(10.0));
    assert_eq!(run_ok("var x = 6; x &= 3; x"), Object::Number(2.0));
    assert_eq!(run_ok("var x = 1; x <<= 4; x"), Object::Number(16.0));
}

#[test]
fn comparison_operators() {
    assert_eq!(run_ok("1 < 2"), Object::Bool(true));
    assert_eq!(run_ok("2 <= 2"), Object::Bool(true));
    assert_eq!(run_ok("3 > 4"), Object::Bool(false));
    assert_eq!(run_ok("4 >= 5"), Object::Bool(false));
    assert_eq!(run_ok("\"a\" < \"b\""), Object::Bool(true));
    assert_eq!(run_ok("\"abc\" == \"abc\""), Object::Bool(true));
    assert_eq!(run_ok("1 != 2"), Object::Bool(true));
    // equality across types is false, not an error
    assert_eq!(run_ok("1 == \"1\""), Object::Bool(false));
}

#[test]
fn ordering_arrays_is_a_runtime_error() {
    let (result, _) = run("[1] < [2]");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn string_concatenation_stringifies_right_operand() {
    assert_eq!(run_ok("\"n=\" + 4"), Object::String("n=4".into()));
    assert_eq!(run_ok("\"v=\" + true"), Object::String("v=true".into()));
    assert_eq!(run_ok("\"x\" + null"), Object::String("xnull".into()));
}

#[test]
fn array_plus_mutates_in_place() {
    let output = output_of("var a = [1]; var b = a + 2; println(a); println(b)");
    assert_eq!(output, "[1, 2]\n[1, 2]\n");
}

#[test]
fn null_coerces_to_zero_in_arithmetic() {
    assert_eq!(run_ok("null + 5"), Object::Number(5.0));
    assert_eq!(run_ok("3 * null"), Object::Number(0.0));
}

#[test]
fn bitwise_and_shift_truncate_operands() {
    assert_eq!(run_ok("6.9 & 3"), Object::Number(2.0));
    assert_eq!(run_ok("1 << 3"), Object::Number(8.0));
    assert_eq!(run_ok("9 >> 1"), Object::Number(4.0));
    assert_eq!(run_ok("5 ^ 3"), Object::Number(6.0));
    assert_eq!(run_ok("5 | 2"), Object::Number(7.0));
}

#[test]
fn division_by_zero_is_not_finite() {
    let Object::Number(n) = run_ok("1 / 0") else {
        panic!("expected number");
    };
    assert!(n.is_infinite());
}

#[test]
fn modulo_by_zero_is_a_runtime_error() {
    let (result, _) = run("1 % 0");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn negative_array_indices_wrap_for_reads() {
    assert_eq!(run_ok("var a = [1, 2, 3]; a[-1]"), Object::Number(3.0));
    assert_eq!(run_ok("var a = [1, 2, 3]; a[-3]"), Object::Number(1.0));
    assert_eq!(run_ok("var a = [1, 2, 3]; a[5]"), Object::Null);
    assert_eq!(run_ok("var a = [1, 2, 3]; a[-4]"), Object::Null);
}

#[test]
fn out_of_range_array_writes_are_errors() {
    let (result, _) = run("var a = [1]; a[3] = 9");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn map_keys_of_mixed_hashable_kinds() {
    let output = output_of(
        "var m = { 1: \"one\", true: \"yes\" }; m[null] = \"nil\"; \
         println(m[1]); println(m[true]); println(m[null])",
    );
    assert_eq!(output, "one\nyes\nnil\n");
}

#[test]
fn unhashable_map_key_is_a_runtime_error() {
    let (result, _) = run("var m = {}; m[[1]] = 2");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn missing_map_key_reads_null() {
    assert_eq!(run_ok("var m = { a: 1 }; m.missing"), Object::Null);
}

#[test]
fn string_indexing_by_byte() {
    assert_eq!(run_ok("\"abc\"[1]"), Object::String("b".into()));
    assert_eq!(run_ok("\"abc\"[9]"), Object::Null);
}

#[test]
fn this_refers_to_the_map_under_construction() {
    // entries land in the map only when the literal completes
    assert_eq!(run_ok("var m = { a: len(this) }; m.a"), Object::Number(0.0));
}

#[test]
fn this_values_keep_the_map_identity() {
    assert_eq!(run_ok("var m = { self: this }; is_map(m.self)"), Object::Bool(true));
    // the stored handle is the containing map itself
    assert_eq!(run_ok("var m = { self: this }; m.self.self == m.self"), Object::Bool(true));
}

#[test]
fn this_outside_map_construction_is_a_runtime_error() {
    let (result, _) = run("var m = { f: function() { return this } }; m.f()");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn recursion_through_the_function_symbol() {
    assert_eq!(
        run_ok("function fib(n) { if (n < 2) { return n } return fib(n - 1) + fib(n - 2) } fib(10)"),
        Object::Number(55.0)
    );
}

#[test]
fn closures_capture_by_value_at_creation() {
    let output = output_of(
        "function mk() { var n = 1; var get = function() { return n }; n = 2; return get } \
         println(mk()())",
    );
    // the closure copied n when it was created
    assert_eq!(output, "1\n");
}

#[test]
fn operator_overloading_dispatches_on_maps() {
    let output = output_of(
        "var vec = { x: 1, y: 2, __operator_add__: function(a, b) { \
             return { x: a.x + b.x, y: a.y + b.y } } }; \
         var sum = vec + { x: 10, y: 20 }; \
         println(sum.x); println(sum.y)",
    );
    assert_eq!(output, "11\n22\n");
}

#[test]
fn cmp_overload_feeds_comparison_consumers() {
    let output = output_of(
        "var obj = { rank: 2, __cmp__: function(a, b) { return a.rank - b.rank } }; \
         println(obj > { rank: 1 }); println(obj == { rank: 2 })",
    );
    assert_eq!(output, "true\ntrue\n");
}

#[test]
fn wrong_argument_count_is_a_runtime_error() {
    let (result, _) = run("function f(a, b) { return a } f(1)");
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("arguments"), "{}", err.message);
}

#[test]
fn calling_a_number_is_a_runtime_error() {
    let (result, _) = run("var x = 3; x()");
    let err = result.unwrap_err();
    assert!(err.message.contains("not callable"), "{}", err.message);
}

#[test]
fn unrecovered_errors_carry_a_traceback() {
    let (result, _) = run("function inner() { crash(\"deep\") } function outer() { inner() } outer()");
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert_eq!(err.message, "deep");
    let traceback = err.traceback.expect("traceback attached");
    let names: Vec<&str> = traceback
        .entries()
        .iter()
        .map(|entry| entry.function_name.as_str())
        .collect();
    assert_eq!(names, vec!["inner", "outer", "main"]);
}

#[test]
fn recover_rethrow_is_visible_to_outer_frames() {
    let output = output_of(
        "function risky() { recover (e) { return \"handled\" } crash(\"first\") } \
         println(risky())",
    );
    assert_eq!(output, "handled\n");
}

#[test]
fn error_values_flow_as_data() {
    assert_eq!(run_ok("is_error(error(\"oops\"))"), Object::Bool(true));
    assert_eq!(run_ok("is_error(\"oops\")"), Object::Bool(false));
    // returning an error from a function does not raise
    let (result, _) = run("function f() { return error(\"flag\") } is_error(f())");
    assert_eq!(result.unwrap(), Object::Bool(true));
}

#[test]
fn timeout_stops_infinite_loops() {
    use std::time::Duration;
    let mut ctx = langur::Context::with_config(langur::Config {
        repl_mode: false,
        max_execution_time: Some(Duration::from_millis(50)),
        stdio: Box::new(langur::NullOut),
        files: Box::new(langur::NoFiles),
    });
    let err = ctx.execute_source("while (true) { 1 }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[test]
fn deep_call_chains_overflow_gracefully() {
    let (result, _) = run("function f() { return f() } f()");
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[test]
fn gc_preserves_reachable_values_under_pressure() {
    // enough garbage to force several sweeps; the kept structure must survive
    let output = output_of(
        "var keep = [1, 2, 3]; \
         for (var i = 0; i < 2000; i++) { var junk = [i, { k: i }, \"tmp\" + i] } \
         println(keep)",
    );
    assert_eq!(output, "[1, 2, 3]\n");
}

#[test]
fn cyclic_structures_are_collected_and_printable_logic_survives() {
    let output = output_of(
        "for (var i = 0; i < 600; i++) { var a = []; var b = [a]; append(a, b) } \
         println(\"done\")",
    );
    assert_eq!(output, "done\n");
}

#[test]
fn import_is_cached_across_importers() {
    let mut files = langur::MemFiles::new();
    files.insert("util.ape", "var twice = function(x) { return x * 2 }");
    files.insert("mid.ape", "import \"util\"; var four = util::twice(2)");
    let (result, output) = common::run_with_files(
        "import \"mid\"; import \"util\"; println(mid::four + util::twice(3))",
        files,
    );
    result.expect("nested imports run");
    assert_eq!(output, "10\n");
}

#[test]
fn cyclic_imports_are_rejected() {
    let mut files = langur::MemFiles::new();
    files.insert("a.ape", "import \"b\"; var x = 1");
    files.insert("b.ape", "import \"a\"; var y = 2");
    let (result, _) = common::run_with_files("import \"a\"", files);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Compilation);
    assert!(err.message.contains("yclic"), "{}", err.message);
}

#[test]
fn repl_mode_returns_top_level_map_literals() {
    let mut ctx = langur::Context::with_config(langur::Config {
        repl_mode: true,
        max_execution_time: None,
        stdio: Box::new(langur::NullOut),
        files: Box::new(langur::NoFiles),
    });
    let result = ctx.execute_source("{ a: 1 }").unwrap();
    let Object::Map(entries) = result else {
        panic!("expected map, got {result:?}");
    };
    assert_eq!(entries, vec![(Object::String("a".into()), Object::Number(1.0))]);
}
