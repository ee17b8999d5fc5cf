use std::collections::BTreeMap;

use lang::langfile;
use lang::script::{parser, DataObject, InterpretingError, Interpreter, InterpreterOptions, Value};
use proptest::prelude::*;

fn interp() -> Interpreter {
    Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() })
}

proptest! {
    /// Parsing arbitrary text yields a tree (possibly with error nodes),
    /// never a panic.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = parser::parse(&s);
        let _ = parser::is_open(&s);
    }

    /// Statement-shaped noise exercises the block parser too.
    #[test]
    fn parser_survives_statement_soup(
        lines in prop::collection::vec(
            prop_oneof![
                Just("con.if(1)"), Just("con.else"), Just("con.endif"),
                Just("con.loop"), Just("con.endloop"), Just("con.try"),
                Just("con.catch"), Just("con.endtry"), Just("fp.f = () -> {"),
                Just("}"), Just("{{{"), Just("}}}"), Just("$x = parser.op(1 +"),
                Just("func.print($[x]"), Just("\\"),
            ],
            0..20,
        )
    ) {
        let _ = parser::parse(&lines.join("\n"));
    }
}

proptest! {
    /// Writing a translation map and reading it back gives the same map.
    #[test]
    fn translation_map_round_trips(
        map in prop::collection::btree_map(
            "k[a-z0-9_.]{0,10}",
            "[a-z0-9 =\\\\n\n]{0,24}",
            0..12,
        )
    ) {
        let text = langfile::write_map(&map);
        let (read, errors) = langfile::read_str(&text);
        prop_assert!(errors.is_empty(), "errors: {:?}", errors);
        prop_assert_eq!(&read, &map);
        prop_assert_eq!(langfile::write_map(&read), text);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// `repeat` with a non-positive count skips the body and runs `else` once.
    #[test]
    fn repeat_non_positive_runs_else_once(n in -50i32..=0) {
        let mut it = interp();
        it.interpret(&format!(
            "con.repeat($i, {n})\n\tfunc.print(body)\ncon.else\n\tfunc.print(E)\ncon.endloop"
        )).unwrap();
        prop_assert_eq!(it.take_output(), vec!["E".to_owned()]);
    }

    /// Any argument count other than the declared one is INVALID_ARG_COUNT.
    #[test]
    fn wrong_arity_is_invalid_arg_count(n in 0usize..6) {
        prop_assume!(n != 2);
        let args: Vec<String> = (0..n).map(|i| i.to_string()).collect();
        let mut it = interp();
        let v = it.eval(&format!("return func.add({})", args.join(", "))).unwrap().unwrap();
        prop_assert_eq!(v.error().map(|e| e.err), Some(InterpretingError::InvalidArgCount));
    }

    /// Mismatched accessors read as neutral defaults.
    #[test]
    fn accessors_default_on_mismatch(n in any::<i32>(), s in "[a-z]{1,8}") {
        let int = Value::Int(n);
        prop_assert_eq!(int.text(), "");
        prop_assert_eq!(int.long(), 0);
        prop_assert!(int.array().is_none());
        let text = DataObject::text(s);
        prop_assert_eq!(text.int(), 0);
        prop_assert_eq!(text.double(), 0.0);
        prop_assert!(text.error().is_none());
    }

    /// Int arithmetic wraps like Rust's `wrapping_*`.
    #[test]
    fn int_arithmetic_matches_rust(a in -10_000i32..10_000, b in -10_000i32..10_000) {
        let mut it = interp();
        let v = it.eval(&format!("$a = {a}\n$b = {b}\nreturn parser.op($a * $b + $a)")).unwrap().unwrap();
        prop_assert_eq!(v.int(), a.wrapping_mul(b).wrapping_add(a));
    }
}

#[test]
fn empty_translation_map_writes_nothing() {
    assert_eq!(langfile::write_map(&BTreeMap::new()), "");
}

#[test]
fn translation_text_keeps_literal_backslashes_and_blanks() {
    for text in ["path = C:\\dir\\file\n", "greeting = hi \n"] {
        let (map, errors) = langfile::read_str(text);
        assert!(errors.is_empty());
        assert_eq!(langfile::write_map(&map), text);
    }
}
