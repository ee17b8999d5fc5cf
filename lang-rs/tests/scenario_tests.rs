//! End-to-end scripts run through the public host API.

use std::time::Duration;

use lang::script::{
    DataObject, DataType, Descriptor, InterpretingError, Interpreter, InterpreterOptions, LangError,
    ModuleContext, ModuleError, NativeModule, NativeResult, Value, MODULE_SCOPE,
};
use pretty_assertions::assert_eq;

fn interp() -> Interpreter {
    Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() })
}

fn ret(it: &mut Interpreter, src: &str) -> DataObject {
    it.interpret(src).unwrap();
    it.get_and_reset_return_value().expect("script returned nothing")
}

fn output(src: &str) -> Vec<String> {
    let mut it = interp();
    it.interpret(src).unwrap();
    it.take_output()
}

// ── Evaluation ────────────────────────────────────────────────────────────────

#[test]
fn assignment_arithmetic_return() {
    let mut it = interp();
    let v = ret(&mut it, "$x = 5\n$y = $x + 3\nreturn $y");
    assert_eq!(v.data_type(), DataType::Int);
    assert_eq!(v.int(), 8);
    assert!(!it.is_thrown_value());
}

#[test]
fn foreach_over_empty_collection_runs_else_only() {
    assert_eq!(
        output("&arr =\ncon.foreach($e, &arr)\n\tfunc.print(body)\ncon.else\n\tfunc.print(empty)\ncon.endloop"),
        vec!["empty"]
    );
}

#[test]
fn break_levels_in_nested_loops() {
    let nested = |level: u32| {
        output(&format!(
            "con.repeat($i, 3)\n\
             \tcon.repeat($j, 3)\n\
             \t\tcon.if(parser.con($j == 1))\n\t\t\tcon.break({level})\n\t\tcon.endif\n\
             \t\tfunc.print($i$j-)\n\
             \tcon.endloop\n\
             con.endloop\n\
             func.print(end)"
        ))
    };
    assert_eq!(nested(1), vec!["00-10-20-end"]);
    assert_eq!(nested(2), vec!["00-end"]);
    // Deeper than the nesting still stops at the outermost loop.
    assert_eq!(nested(7), vec!["00-end"]);
}

#[test]
fn functions_closures_and_recursion() {
    let mut it = interp();
    let src = "fp.makeAdder = ($n) -> {\n\
               \tfp.add = ($x) -> return parser.op($x + $n)\n\
               \treturn fp.add\n\
               }\n\
               fp.add5 = fp.makeAdder(5)\n\
               return fp.add5(10)";
    assert_eq!(ret(&mut it, src).int(), 15);
}

#[test]
fn top_level_throw_is_reported_to_the_host() {
    let mut it = interp();
    it.interpret("throw $LANG_ERROR_NO_NUM, bad input").unwrap();
    assert!(it.is_thrown_value());
    let v = it.get_and_reset_return_value().unwrap();
    let err = v.error().unwrap();
    assert_eq!(err.err, InterpretingError::NoNum);
    assert_eq!(err.message(), "bad input");
    assert!(!it.is_thrown_value());
}

#[test]
fn translation_map_is_queryable_per_scope() {
    let mut it = interp();
    it.interpret("lang.name = Demo\nmenu.title = Main menu").unwrap();
    let map = it.translation_map(MODULE_SCOPE).unwrap();
    assert_eq!(map["lang.name"], "Demo");
    assert_eq!(map["menu.title"], "Main menu");
    assert!(it.translation_map(9_999).is_none());
}

#[test]
fn oversized_text_repetition_is_a_script_error() {
    let mut it = interp();
    let v = ret(&mut it, "$r = parser.op(ab * 100000000000)\nreturn $LANG_ERRNO");
    assert_eq!(v.int(), InterpretingError::InvalidArguments.code());
}

// ── Natives ───────────────────────────────────────────────────────────────────

#[test]
fn numeric_native_rejects_text() {
    let mut it = interp();
    it.register_native(
        Descriptor::function("myAdd").number_param("$a").number_param("$b"),
        |_, args, _| Ok(DataObject::long(args[0].long() + args[1].long())),
    );
    let v = ret(&mut it, "return func.myAdd(x, 1)");
    assert_eq!(v.error().map(|e| e.err), Some(InterpretingError::NoNum));
}

#[test]
fn arity_errors_say_which_way() {
    let mut it = interp();
    let few = ret(&mut it, "return func.add(1)");
    let many = ret(&mut it, "return func.add(1, 2, 3)");
    let (few, many) = (few.error().unwrap(), many.error().unwrap());
    assert_eq!(few.err, InterpretingError::InvalidArgCount);
    assert_eq!(many.err, InterpretingError::InvalidArgCount);
    assert!(few.message().contains("Not enough arguments (2 needed)"));
    assert!(many.message().contains("Too many arguments (2 needed)"));
}

#[test]
fn type_violations_name_position_and_allowed_set() {
    let mut it = interp();
    let v = ret(&mut it, "return func.arrayLength(text)");
    let err = v.error().unwrap();
    assert_eq!(err.err, InterpretingError::InvalidArguments);
    assert!(err.message().contains("Argument 1"));
    assert!(err.message().contains("[ARRAY]"));
}

#[test]
fn panicking_native_becomes_system_error() {
    let mut it = interp();
    it.register_native(Descriptor::function("boom"), |_, _, _| panic!("native exploded"));
    let v = ret(&mut it, "$r = func.boom()\nreturn $LANG_ERRNO");
    assert_eq!(v.int(), InterpretingError::SystemError.code());
}

#[test]
fn natives_get_copies_of_scalars() {
    let mut it = interp();
    it.register_native(Descriptor::function("clobber").param("$v"), |_, mut args, _| {
        args[0].set(Value::Text("changed".into()))?;
        Ok(DataObject::void())
    });
    assert_eq!(ret(&mut it, "$x = original\nfunc.clobber($x)\nreturn $x").to_string(), "original");
}

// ── Modules ───────────────────────────────────────────────────────────────────

struct ReservedName;

impl NativeModule for ReservedName {
    fn load(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
        ctx.export_normal_variable("LANGfoo", Value::Int(1), true)?;
        Ok(DataObject::void())
    }
}

struct Greeter;

impl NativeModule for Greeter {
    fn load(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
        ctx.export_function(Descriptor::function("greet").param("$name"), |_, args, _| {
            Ok(DataObject::text(format!("Hello, {}!", args[0])))
        })?;
        ctx.export_normal_variable("greeting", Value::from("hi"), true)?;
        Ok(DataObject::text("loaded"))
    }
}

#[test]
fn reserved_prefix_export_fails_the_load() {
    let mut it = interp();
    it.register_module("bad", Box::new(ReservedName));
    let err = it.load_module("bad", &[]).unwrap_err();
    assert!(matches!(err, LangError::Module(ModuleError::ReservedPrefix(ref n)) if n == "LANGfoo"));
}

#[test]
fn module_exports_are_visible_until_unload() {
    let mut it = interp();
    it.register_module("greeter", Box::new(Greeter));
    assert_eq!(ret(&mut it, "return linker.loadModule(greeter)").to_string(), "loaded");
    assert_eq!(ret(&mut it, "return func.greet(Lang)").to_string(), "Hello, Lang!");
    assert_eq!(ret(&mut it, "return $greeting").to_string(), "hi");

    it.interpret("linker.unloadModule(greeter)").unwrap();
    let v = ret(&mut it, "$r = func.greet(x)\nreturn $LANG_ERRNO");
    assert_eq!(v.int(), InterpretingError::FunctionNotFound.code());
}

// ── Host control ──────────────────────────────────────────────────────────────

#[test]
fn stop_request_from_another_thread() {
    let mut it = interp();
    let stop = it.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        stop.request_stop();
    });
    assert!(matches!(it.interpret("con.loop\ncon.endloop"), Err(LangError::Stopped)));
    stopper.join().unwrap();

    it.reset_stop_flag();
    assert_eq!(ret(&mut it, "return 1").int(), 1);
}

#[test]
fn script_files_see_their_own_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.lang");
    std::fs::write(&path, "return $LANG_FILE").unwrap();
    let mut it = interp();
    it.interpret_file(&path.to_string_lossy()).unwrap();
    assert_eq!(it.get_and_reset_return_value().unwrap().to_string(), "main.lang");

    let missing = dir.path().join("missing.lang");
    assert!(matches!(it.interpret_file(&missing.to_string_lossy()), Err(LangError::Io { .. })));
}

#[test]
fn script_args_are_bound() {
    let mut it = interp();
    it.set_args(&["a".to_owned(), "b".to_owned()]);
    assert_eq!(ret(&mut it, "return &LANG_ARGS").to_string(), "[a, b]");
}
