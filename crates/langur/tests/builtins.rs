mod common;

use std::rc::Rc;

use common::{output_of, run, run_ok};
use langur::{Context, ErrorKind, Object};
use pretty_assertions::assert_eq;

#[test]
fn len_first_last_rest() {
    assert_eq!(run_ok("len([1, 2, 3])"), Object::Number(3.0));
    assert_eq!(run_ok("len(\"abcd\")"), Object::Number(4.0));
    assert_eq!(run_ok("len({ a: 1 })"), Object::Number(1.0));
    assert_eq!(run_ok("first([7, 8])"), Object::Number(7.0));
    assert_eq!(run_ok("last([7, 8])"), Object::Number(8.0));
    assert_eq!(run_ok("first([])"), Object::Null);
    assert_eq!(
        run_ok("rest([1, 2, 3])"),
        Object::Array(vec![Object::Number(2.0), Object::Number(3.0)])
    );
    assert_eq!(run_ok("rest([])"), Object::Null);
}

#[test]
fn len_of_a_number_is_an_error() {
    let (result, _) = run("len(5)");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn append_returns_new_length_and_mutates() {
    let output = output_of("var a = [1]; println(append(a, 2)); println(a)");
    assert_eq!(output, "2\n[1, 2]\n");
}

#[test]
fn remove_and_remove_at() {
    let output = output_of("var a = [1, 2, 3]; println(remove(a, 2)); println(a)");
    assert_eq!(output, "true\n[1, 3]\n");
    let output = output_of("var a = [1, 2, 3]; println(remove(a, 9)); println(a)");
    assert_eq!(output, "false\n[1, 2, 3]\n");
    let output = output_of("var a = [1, 2, 3]; println(remove_at(a, 0)); println(a)");
    assert_eq!(output, "true\n[2, 3]\n");
}

#[test]
fn reverse_round_trips() {
    assert_eq!(
        run_ok("reverse(reverse([1, 2, 3]))"),
        Object::Array(vec![Object::Number(1.0), Object::Number(2.0), Object::Number(3.0)])
    );
    assert_eq!(run_ok("reverse(\"abc\")"), Object::String("cba".into()));
    assert_eq!(run_ok("reverse(reverse(\"abc\"))"), Object::String("abc".into()));
}

#[test]
fn copy_is_shallow_and_identity_distinct() {
    let output = output_of("var a = [1, 2]; var b = copy(a); append(b, 3); println(a); println(b)");
    assert_eq!(output, "[1, 2]\n[1, 2, 3]\n");
    // nested containers stay shared in a shallow copy
    let output = output_of("var a = [[1]]; var b = copy(a); append(b[0], 2); println(a)");
    assert_eq!(output, "[[1, 2]]\n");
}

#[test]
fn deep_copy_isolates_nested_containers() {
    let output = output_of("var a = [[1]]; var b = deep_copy(a); append(b[0], 2); println(a); println(b)");
    assert_eq!(output, "[[1]]\n[[1, 2]]\n");
    let output = output_of(
        "var m = { inner: { n: 1 } }; var c = deep_copy(m); c.inner.n = 5; println(m.inner.n)",
    );
    assert_eq!(output, "1\n");
}

#[test]
fn deep_copy_handles_cycles() {
    let output = output_of("var a = []; append(a, a); var b = deep_copy(a); println(len(b))");
    assert_eq!(output, "1\n");
}

#[test]
fn concat_arrays_and_strings() {
    let output = output_of("var a = [1]; concat(a, [2, 3]); println(a)");
    assert_eq!(output, "[1, 2, 3]\n");
    assert_eq!(run_ok("concat(\"ab\", \"cd\")"), Object::String("abcd".into()));
}

#[test]
fn range_forms_and_step_validation() {
    assert_eq!(
        run_ok("range(3)"),
        Object::Array(vec![Object::Number(0.0), Object::Number(1.0), Object::Number(2.0)])
    );
    assert_eq!(
        run_ok("range(1, 4)"),
        Object::Array(vec![Object::Number(1.0), Object::Number(2.0), Object::Number(3.0)])
    );
    assert_eq!(
        run_ok("range(0, 10, 5)"),
        Object::Array(vec![Object::Number(0.0), Object::Number(5.0)])
    );
    let (result, _) = run("range(0, 5, 0)");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn keys_and_values_preserve_insertion_order() {
    let output = output_of("var m = { b: 2, a: 1, c: 3 }; println(keys(m)); println(values(m))");
    assert_eq!(output, "[\"b\", \"a\", \"c\"]\n[2, 1, 3]\n");
}

#[test]
fn slice_suffixes() {
    assert_eq!(
        run_ok("slice([1, 2, 3], 1)"),
        Object::Array(vec![Object::Number(2.0), Object::Number(3.0)])
    );
    assert_eq!(
        run_ok("slice([1, 2, 3], -2)"),
        Object::Array(vec![Object::Number(2.0), Object::Number(3.0)])
    );
    assert_eq!(run_ok("slice(\"hello\", 2)"), Object::String("llo".into()));
    assert_eq!(run_ok("slice(\"hello\", -3)"), Object::String("llo".into()));
    // below -len the result is empty
    assert_eq!(run_ok("slice(\"abc\", -9)"), Object::String("".into()));
}

#[test]
fn string_helpers() {
    assert_eq!(run_ok("trim(\"  x  \")"), Object::String("x".into()));
    assert_eq!(
        run_ok("split(\"a,b,c\", \",\")"),
        Object::Array(vec![
            Object::String("a".into()),
            Object::String("b".into()),
            Object::String("c".into()),
        ])
    );
    assert_eq!(
        run_ok("split(\"ab\", \"\")"),
        Object::Array(vec![Object::String("a".into()), Object::String("b".into())])
    );
    assert_eq!(run_ok("substr(\"hello\", 1, 3)"), Object::String("el".into()));
    assert_eq!(run_ok("substr(\"hello\", 3)"), Object::String("lo".into()));
    assert_eq!(run_ok("chr(65)"), Object::String("A".into()));
    assert_eq!(run_ok("ord(\"A\")"), Object::Number(65.0));
    assert_eq!(run_ok("ord(null)"), Object::Number(0.0));
}

#[test]
fn tostring_round_trips_scalars() {
    assert_eq!(run_ok("tostring(42)"), Object::String("42".into()));
    assert_eq!(run_ok("tostring(1.5)"), Object::String("1.5".into()));
    assert_eq!(run_ok("tostring(true)"), Object::String("true".into()));
    assert_eq!(run_ok("tostring(null)"), Object::String("null".into()));
    assert_eq!(run_ok("tostring(\"s\")"), Object::String("s".into()));
    // parsing the rendering back yields the original value
    assert_eq!(run_ok("to_num(tostring(42.5))"), Object::Number(42.5));
}

#[test]
fn tostring_renders_containers() {
    assert_eq!(
        run_ok("tostring([1, \"a\", true])"),
        Object::String("[1, \"a\", true]".into())
    );
    assert_eq!(
        run_ok("tostring({ k: 1 })"),
        Object::String("{\"k\": 1}".into())
    );
}

#[test]
fn to_num_conversions() {
    assert_eq!(run_ok("to_num(\"12\")"), Object::Number(12.0));
    assert_eq!(run_ok("to_num(\"1.5\")"), Object::Number(1.5));
    assert_eq!(run_ok("to_num(\"12abc\")"), Object::Number(12.0));
    assert_eq!(run_ok("to_num(\"abc\")"), Object::Number(0.0));
    assert_eq!(run_ok("to_num(null)"), Object::Number(0.0));
    assert_eq!(run_ok("to_num(true)"), Object::Number(1.0));
}

#[test]
fn type_and_type_checks() {
    assert_eq!(run_ok("type(1)"), Object::String("NUMBER".into()));
    assert_eq!(run_ok("type(\"s\")"), Object::String("STRING".into()));
    assert_eq!(run_ok("type([])"), Object::String("ARRAY".into()));
    assert_eq!(run_ok("type({})"), Object::String("MAP".into()));
    assert_eq!(run_ok("type(null)"), Object::String("NULL".into()));
    assert_eq!(run_ok("type(println)"), Object::String("NATIVE_FUNCTION".into()));
    assert_eq!(run_ok("is_number(1) && is_string(\"\") && is_bool(false)"), Object::Bool(true));
    assert_eq!(run_ok("is_array([]) && is_map({}) && is_null(null)"), Object::Bool(true));
    assert_eq!(run_ok("is_function(function(){ return 0 })"), Object::Bool(true));
    assert_eq!(run_ok("is_native_function(len)"), Object::Bool(true));
}

#[test]
fn math_builtins() {
    assert_eq!(run_ok("sqrt(16)"), Object::Number(4.0));
    assert_eq!(run_ok("pow(2, 10)"), Object::Number(1024.0));
    assert_eq!(run_ok("floor(1.9)"), Object::Number(1.0));
    assert_eq!(run_ok("ceil(1.1)"), Object::Number(2.0));
    assert_eq!(run_ok("abs(0 - 7)"), Object::Number(7.0));
    assert_eq!(run_ok("log(1)"), Object::Number(0.0));
    assert_eq!(run_ok("sin(0)"), Object::Number(0.0));
}

#[test]
fn seeded_random_is_deterministic_and_in_range() {
    let first = run_ok("random_seed(42); random()");
    let second = run_ok("random_seed(42); random()");
    assert_eq!(first, second);
    let Object::Number(sample) = run_ok("random_seed(7); random(5, 10)") else {
        panic!("expected number");
    };
    assert!((5.0..10.0).contains(&sample));
}

#[test]
fn assert_builtin() {
    assert_eq!(run_ok("assert(1 == 1)"), Object::Bool(true));
    let (result, _) = run("assert(1 == 2)");
    let err = result.unwrap_err();
    assert!(err.message.contains("assertion failed"), "{}", err.message);
}

#[test]
fn file_builtins_use_the_host_hooks() {
    let mut files = langur::MemFiles::new();
    files.insert("in.txt", "payload");
    let (result, output) = common::run_with_files(
        "println(read_file(\"in.txt\")); write_file(\"out.txt\", \"data\")",
        files,
    );
    result.expect("file builtins run");
    assert_eq!(output, "payload\n");
    let (result, _) = run("read_file(\"missing.txt\")");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn host_natives_are_callable() {
    let mut ctx = Context::new();
    ctx.register_native("add_ints", |args| {
        let (Some(Object::Number(a)), Some(Object::Number(b))) = (args.first(), args.get(1)) else {
            return Err("add_ints requires two numbers".to_owned());
        };
        Ok(Object::Number(a + b))
    })
    .unwrap();
    assert_eq!(ctx.execute_source("add_ints(2, 40)").unwrap(), Object::Number(42.0));
}

#[test]
fn host_native_errors_raise_user_errors() {
    let mut ctx = Context::new();
    ctx.register_native("always_fails", |_| Err("nope".to_owned())).unwrap();
    let err = ctx.execute_source("always_fails()").unwrap_err();
    assert_eq!(err.kind, ErrorKind::User);
    assert_eq!(err.message, "nope");
}

#[test]
fn namespaces_group_host_functions() {
    let mut ctx = Context::new();
    let double: langur::HostFunction = Rc::new(|args| {
        let Some(Object::Number(n)) = args.first() else {
            return Err("number required".to_owned());
        };
        Ok(Object::Number(n * 2.0))
    });
    ctx.register_namespace("Util", vec![("double", double)]).unwrap();
    assert_eq!(ctx.execute_source("Util.double(21)").unwrap(), Object::Number(42.0));
}

#[test]
fn globals_round_trip_through_the_host() {
    let mut ctx = Context::new();
    ctx.set_global("answer", Object::Number(42.0)).unwrap();
    assert_eq!(ctx.execute_source("answer").unwrap(), Object::Number(42.0));
    assert_eq!(ctx.get_global("answer"), Some(Object::Number(42.0)));
    ctx.set_global(
        "config",
        Object::Map(vec![(Object::from("debug"), Object::Bool(true))]),
    )
    .unwrap();
    assert_eq!(ctx.execute_source("config.debug").unwrap(), Object::Bool(true));
}

#[test]
fn externals_are_opaque_but_detectable() {
    let mut ctx = Context::new();
    ctx.set_external("handle", Rc::new(7usize)).unwrap();
    assert_eq!(ctx.execute_source("is_external(handle)").unwrap(), Object::Bool(true));
    let data = ctx.get_external("handle").expect("external readable");
    assert_eq!(*data.downcast::<usize>().unwrap(), 7);
}
