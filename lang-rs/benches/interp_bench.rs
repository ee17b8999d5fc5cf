use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lang::script::{parser, Interpreter, InterpreterOptions};

fn make_script(functions: usize) -> String {
    let mut src = String::new();
    for i in 0..functions {
        src.push_str(&format!(
            "fp.f{i} = ($a, $b) -> {{\n\
             \tcon.if(parser.con($a > $b))\n\t\treturn parser.op($a - $b)\n\tcon.else\n\
             \t\treturn func.format(%s and %s, $a, $b)\n\tcon.endif\n}}\n"
        ));
    }
    src
}

fn bench_parse(c: &mut Criterion) {
    let small = make_script(10);
    let large = make_script(500);
    c.bench_function("parse 10 functions", |b| b.iter(|| parser::parse(black_box(&small))));
    c.bench_function("parse 500 functions", |b| b.iter(|| parser::parse(black_box(&large))));
}

fn bench_loop(c: &mut Criterion) {
    let src = "$sum = 0\n\
               con.repeat($i, 10000)\n\
               \tcon.if(parser.con($i % 3 == 0))\n\t\tcon.continue\n\tcon.endif\n\
               \t$sum = parser.op($sum + $i)\n\
               con.endloop\n\
               return $sum";
    c.bench_function("loop 10k iterations", |b| {
        b.iter(|| {
            let mut it = Interpreter::new(InterpreterOptions::default());
            it.interpret(black_box(src)).ok();
            it.get_and_reset_return_value()
        })
    });
}

fn bench_recursion(c: &mut Criterion) {
    let src = "fp.fib = ($n) -> {\n\
               \tcon.if(parser.con($n < 2))\n\t\treturn $n\n\tcon.endif\n\
               \treturn parser.op(fp.fib(parser.op($n - 1)) + fp.fib(parser.op($n - 2)))\n\
               }\n\
               return fp.fib(15)";
    c.bench_function("recursive fib(15)", |b| {
        b.iter(|| {
            let mut it = Interpreter::new(InterpreterOptions::default());
            it.interpret(black_box(src)).ok();
            it.get_and_reset_return_value()
        })
    });
}

criterion_group!(benches, bench_parse, bench_loop, bench_recursion);
criterion_main!(benches);
