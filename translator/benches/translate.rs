use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relational::parser::parse_problem;
use translator::{
    sat::{Interrupt, SatFactory},
    translate::translate,
};

const RING: &str = "
universe A0 A1 A2 A3 A4 A5 A6 A7
static next: 2 <= {(A0, A1), (A1, A2), (A2, A3), (A3, A4), (A4, A5), (A5, A6), (A6, A7), (A7, A0),
                   (A0, A4), (A1, A5), (A2, A6), (A3, A7)}
static leader: 1 within univ
fact one leader
fact all x: univ | one x.next
fact all x: univ | x in leader.^next
";

pub fn translate_benchmark(c: &mut Criterion) {
    let problem = parse_problem(RING).unwrap();
    let formula = problem.formula();
    c.bench_function("translate::translate", |b| {
        b.iter(|| {
            translate(
                black_box(&formula),
                &problem.bounds,
                &SatFactory::Cadical,
                &Interrupt::new(),
            )
            .unwrap()
        })
    });
}

pub fn solve_benchmark(c: &mut Criterion) {
    let problem = parse_problem(RING).unwrap();
    let formula = problem.formula();
    c.bench_function("translate::solve", |b| {
        b.iter(|| {
            let mut t = translate(&formula, &problem.bounds, &SatFactory::Cadical, &Interrupt::new())
                .unwrap();
            t.solve().unwrap()
        })
    });
}

criterion_group!(benches, translate_benchmark, solve_benchmark);
criterion_main!(benches);
