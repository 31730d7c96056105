mod common;

use common::{output_of, run, run_ok};
use langur::{Context, Object};
use pretty_assertions::assert_eq;

#[test]
fn repeat_execute_on_one_context() {
    let mut ctx = Context::new();
    let code = ctx.compile("1 + 2").unwrap();
    let first = ctx.execute(&code).unwrap();
    assert_eq!(first, Object::Number(3.0));
    let second = ctx.execute(&code).unwrap();
    assert_eq!(second, Object::Number(3.0));
}

#[test]
fn globals_persist_between_executes() {
    let mut ctx = Context::new();
    ctx.execute_source("var total = 10").unwrap();
    let result = ctx.execute_source("total + 5").unwrap();
    assert_eq!(result, Object::Number(15.0));
}

#[test]
fn last_expression_value_is_the_result() {
    assert_eq!(run_ok("1; 2; 3"), Object::Number(3.0));
    assert_eq!(run_ok("var x = 9"), Object::Null);
}

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(output_of("println(1 + 2 * 3)"), "7\n");
}

#[test]
fn closures_share_their_upvalue_across_calls() {
    let output = output_of(
        "function mk(){ var n=0; return function(){ n = n + 1; return n } } \
         var c = mk(); println(c()); println(c()); println(c())",
    );
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn map_literal_with_bare_key_and_lookup() {
    let output = output_of(r#"var m = { a: 1, "b": 2 }; println(m.a + m["b"])"#);
    assert_eq!(output, "3\n");
}

#[test]
fn recovery_catches_a_crash() {
    let (result, output) = run(
        "function f(){ recover(e){ return \"caught:\" + tostring(e) } crash(\"boom\") } println(f())",
    );
    result.expect("recovered execution returns normally");
    assert!(output.starts_with("caught:ERROR: boom"), "output: {output}");
    assert!(output.contains("boom"));
}

#[test]
fn template_strings_splice_expressions() {
    let output = output_of("var n = 4; println(`n*n = ${ n*n }`)");
    assert_eq!(output, "n*n = 16\n");
}

#[test]
fn import_binds_qualified_module_globals() {
    let mut files = langur::MemFiles::new();
    files.insert(
        "lib.ape",
        "var hello = function(name){ return \"hi \" + name }",
    );
    let (result, output) =
        common::run_with_files("import \"lib\"; println(lib::hello(\"world\"))", files);
    result.expect("import scenario runs");
    assert_eq!(output, "hi world\n");
}

#[test]
fn duplicate_import_is_a_compile_error() {
    let mut files = langur::MemFiles::new();
    files.insert("lib.ape", "var hello = 1");
    let (result, _) = common::run_with_files("import \"lib\"; import \"lib\"", files);
    let err = result.unwrap_err();
    assert_eq!(err.kind, langur::ErrorKind::Compilation);
    assert!(err.message.contains("already imported"), "{}", err.message);
}
