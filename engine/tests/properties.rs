// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::{Duration, Instant},
};

use engine::{
    reporter::{Event, RecordingReporter},
    ConfigError, Explorer, HolError, Options, SolveError, TemporalSolver,
};
use relational::{
    instance::TemporalInstance,
    parser::{parse_formula, parse_problem, Problem},
    syntax::{Formula, Relation},
    universe::TupleSet,
};
use translator::sat::{Interrupt, SatError, SatFactory};

fn problem(text: &str) -> Problem {
    parse_problem(text).unwrap()
}

fn value(instance: &TemporalInstance, name: &str, state: usize) -> TupleSet {
    instance
        .state(state)
        .iter()
        .find(|(r, _)| r.name == name)
        .map(|(_, ts)| ts.clone())
        .unwrap()
}

/// Parse a formula over the relations of a solution, skolem relations
/// included.
fn formula_over(instance: &TemporalInstance, text: &str) -> Formula {
    let relations: BTreeMap<String, Relation> = instance
        .state(0)
        .relations()
        .map(|r| (r.name.clone(), r.clone()))
        .collect();
    parse_formula(&relations, Some(instance.universe().as_ref()), text).unwrap()
}

#[test]
fn contiguous_trace_lengths() {
    let problem = problem(
        "universe A0 A1 A2 A3
        var p: 1 <= {A0, A1, A2, A3}
        fact no p
        fact always (lone (p' - p) && p in p')
        fact eventually p = univ",
    );
    let solver = TemporalSolver::new(Options::default().with_trace_lengths(2, 10));
    let solution = solver.solve(&problem.formula(), &problem.bounds).unwrap();
    assert!(solution.is_sat());
    // one atom is added per step, and the full set needs to be reached
    assert_eq!(solution.statistics.trace_lengths, vec![2, 3, 4, 5]);
    assert!(solution
        .instance()
        .unwrap()
        .evaluate(&problem.formula())
        .unwrap());
}

#[test]
fn enumerated_traces_are_distinct() {
    let problem = problem(
        "universe A0 A1
        var p: 1 <= {A0, A1}
        fact always lone p
        fact always (p' = p || no p')",
    );
    let options = Options::default().with_trace_lengths(1, 2);
    let solver = TemporalSolver::new(options);
    let mut lengths = BTreeSet::new();
    let mut traces = vec![];
    for solution in solver.solve_all(&problem.formula(), &problem.bounds).unwrap() {
        let trace = solution.unwrap().instance().unwrap().canonize();
        assert!(trace.evaluate(&problem.formula()).unwrap());
        assert!(!traces.contains(&trace));
        lengths.insert(trace.prefix_length());
        traces.push(trace);
        assert!(traces.len() < 100);
    }
    // constant traces have one state, others need two
    assert_eq!(lengths, BTreeSet::from([1, 2]));
}

#[test]
fn trivial_problems_skip_the_solver() {
    for (fact, sat) in [("some r && r in s", true), ("no r", false), ("r = s", false)] {
        let problem = problem(&format!(
            "universe A0 A1
            static r: 1 = {{A0}}
            static s: 1 = {{A0, A1}}
            fact {fact}"
        ));
        let solution = TemporalSolver::default()
            .solve(&problem.formula(), &problem.bounds)
            .unwrap();
        assert_eq!(solution.is_sat(), sat, "{fact}");
        assert_eq!(solution.statistics.sat_calls, 0, "{fact}");
        assert_eq!(solution.statistics.trace_lengths, vec![1]);
        if let Some(instance) = solution.instance() {
            assert!(instance.evaluate(&problem.formula()).unwrap());
        }
    }
}

#[test]
fn segments_change_only_their_window() {
    let problem = problem(
        "universe A0 A1
        var p: 1 <= {A0, A1}
        static s: 1 <= {A0, A1}
        fact some s",
    );
    let solver = TemporalSolver::new(Options::default().with_trace_lengths(3, 3));
    let mut it = solver.solve_all(&problem.formula(), &problem.bounds).unwrap();
    let first = it.next_p().unwrap();
    let first = first.instance().unwrap().clone();
    let mut middles = vec![value(&first, "p", 1)];
    loop {
        let solution = it.next_s(1, 1, &BTreeSet::new()).unwrap();
        let Some(next) = solution.instance() else {
            break;
        };
        assert_eq!(value(next, "s", 0), value(&first, "s", 0));
        assert_eq!(value(next, "p", 0), value(&first, "p", 0));
        assert_eq!(value(next, "p", 2), value(&first, "p", 2));
        let middle = value(next, "p", 1);
        assert!(!middles.contains(&middle));
        middles.push(middle);
    }
    assert_eq!(middles.len(), 4);
    // exhausted enumerations keep answering unsat
    assert!(!it.next_s(1, 1, &BTreeSet::new()).unwrap().is_sat());
}

#[test]
fn segments_move_back() {
    let problem = problem(
        "universe A0 A1
        var p: 1 <= {A0, A1}
        fact always lone p",
    );
    let solver = TemporalSolver::new(Options::default().with_trace_lengths(3, 3));
    let mut it = solver.solve_all(&problem.formula(), &problem.bounds).unwrap();
    let first = it.next_p().unwrap().instance().unwrap().clone();
    let none = BTreeSet::new();

    // three values of a lone p in the last state
    let mut last = vec![value(&first, "p", 2)];
    while let Some(next) = it.next_s(2, 1, &none).unwrap().instance().cloned() {
        assert_eq!(value(&next, "p", 0), value(&first, "p", 0));
        assert_eq!(value(&next, "p", 1), value(&first, "p", 1));
        let v = value(&next, "p", 2);
        assert!(!last.contains(&v));
        last.push(v);
    }
    assert_eq!(last.len(), 3);

    // an earlier window forgets the later steps
    let mut middle = vec![value(&first, "p", 1)];
    while let Some(next) = it.next_s(1, 1, &none).unwrap().instance().cloned() {
        assert_eq!(value(&next, "p", 0), value(&first, "p", 0));
        let v = value(&next, "p", 1);
        assert!(!middle.contains(&v));
        middle.push(v);
    }
    assert_eq!(middle.len(), 3);
}

#[test]
fn forced_relations() {
    let problem = problem(
        "universe A0 A1
        var p: 1 <= {A0, A1}
        var q: 1 <= {A0, A1}
        fact always one p",
    );
    let solver = TemporalSolver::new(Options::default().with_trace_lengths(2, 2));
    let mut it = solver.solve_all(&problem.formula(), &problem.bounds).unwrap();
    let first = it.next_p().unwrap().instance().unwrap().clone();
    let p = Relation::variable("p", 1);
    let second = it.next_s(0, 1, &BTreeSet::from([p])).unwrap();
    let second = second.instance().unwrap();
    assert_eq!(value(second, "q", 0), value(&first, "q", 0));
    assert_ne!(value(second, "p", 0), value(&first, "p", 0));

    let unknown = Relation::variable("r", 1);
    assert_eq!(
        it.next_s(0, 1, &BTreeSet::from([unknown])).unwrap_err(),
        SolveError::Config(ConfigError::UnknownRelation("r".to_string()))
    );
}

#[test]
fn invalid_configurations() {
    let problem = problem(
        "universe A0 A1
        static r: 1 <= {A0, A1}
        var p: 1 <= {A0, A1}
        fact some X: set univ | X = p",
    );
    let e = TemporalSolver::default()
        .solve_all(&problem.formula(), &problem.bounds)
        .err()
        .unwrap();
    assert_eq!(e, SolveError::Config(ConfigError::HigherOrderEnumeration));

    let e = TemporalSolver::new(Options::default().with_trace_lengths(0, 3))
        .solve(&problem.formula(), &problem.bounds)
        .unwrap_err();
    assert!(e.is_config());

    let external = Options::default().with_solver(SatFactory::External {
        command: "minisat".to_string(),
        args: vec![],
    });
    let e = TemporalSolver::new(external)
        .solve_all(&Formula::true_(), &problem.bounds)
        .err()
        .unwrap();
    assert_eq!(e, SolveError::Config(ConfigError::NotIncremental));

    let mut it = TemporalSolver::default()
        .solve_all(&Formula::true_(), &problem.bounds)
        .unwrap();
    assert!(it.next_s(0, 1, &BTreeSet::new()).unwrap().is_sat());
    assert!(it.next_s(0, 1, &BTreeSet::new()).unwrap().is_sat());
    assert_eq!(
        it.next_p().unwrap_err(),
        SolveError::Config(ConfigError::ModeSwitch {
            from: "segment",
            to: "path"
        })
    );
    assert!(it.next_c().unwrap().is_sat());
    assert!(it.next_p().unwrap().is_sat());
}

#[test]
fn interrupted() {
    let problem = problem(
        "universe A0 A1
        var p: 1 <= {A0, A1}
        fact eventually some p",
    );
    let interrupt = Interrupt::new();
    interrupt.interrupt();
    let solver = TemporalSolver::new(Options::default().with_interrupt(interrupt));
    let e = solver.solve(&problem.formula(), &problem.bounds).unwrap_err();
    assert_eq!(e, SolveError::Aborted(SatError::Interrupted));
}

#[test]
fn deadline_during_solve() {
    // eleven pigeons do not fit in ten holes, and resolution needs
    // exponentially long to find out
    let pigeons: Vec<String> = (0..11).map(|i| format!("P{i}")).collect();
    let holes: Vec<String> = (0..10).map(|i| format!("H{i}")).collect();
    let problem = problem(&format!(
        "universe {} {}
        static pigeon: 1 = {{{}}}
        static hole: 1 = {{{}}}
        static f: 2 within pigeon -> hole
        fact all x: pigeon | one x.f
        fact all y: hole | lone f.y",
        pigeons.join(" "),
        holes.join(" "),
        pigeons.join(", "),
        holes.join(", "),
    ));
    let solver = TemporalSolver::new(Options::default().with_timeout(Duration::from_millis(200)));
    let start = Instant::now();
    let e = solver.solve(&problem.formula(), &problem.bounds).unwrap_err();
    assert_eq!(e, SolveError::Aborted(SatError::Timeout));
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[test]
fn higher_order_witness_is_checked() {
    let problem = problem(
        "universe A0 A1 A2
        static r: 1 <= {A0, A1, A2}
        fact some r
        fact some X: set univ | all Y: set univ | Y in X",
    );
    let solution = TemporalSolver::default()
        .solve(&problem.formula(), &problem.bounds)
        .unwrap();
    let instance = solution.instance().unwrap();
    let check = formula_over(instance, "all Y: set univ | Y in $X");
    assert!(instance.evaluate(&check).unwrap());
    assert!(solution.statistics.hol_candidates >= 1);
}

#[test]
fn higher_order_unsat_and_exhausted() {
    let problem = problem(
        "universe A0 A1 A2
        fact some X: set univ | all Y: set univ | Y != X",
    );
    // every candidate is refuted by itself, so each subset is tried once
    let reporter = Arc::new(RecordingReporter::new());
    let solver = TemporalSolver::new(Options::default().with_reporter(reporter.clone()));
    let solution = solver.solve(&problem.formula(), &problem.bounds).unwrap();
    assert!(!solution.is_sat());
    assert_eq!(solution.statistics.hol_candidates, 8);
    assert_eq!(
        reporter.events().last(),
        Some(&Event::HolLoopUnsat {
            depth: 0,
            iterations: 8
        })
    );

    // a bound equal to the candidates needed still proves unsat
    let solver = TemporalSolver::new(Options::default().with_hol_max_iterations(8));
    let solution = solver.solve(&problem.formula(), &problem.bounds).unwrap();
    assert!(!solution.is_sat());

    let reporter = Arc::new(RecordingReporter::new());
    let solver = TemporalSolver::new(
        Options::default()
            .with_hol_max_iterations(1)
            .with_reporter(reporter.clone()),
    );
    let e = solver.solve(&problem.formula(), &problem.bounds).unwrap_err();
    assert!(e.is_search_exhausted());
    assert_eq!(e, SolveError::Hol(HolError::SearchExhausted(2)));
    let events = reporter.events();
    assert!(events.contains(&Event::HolLoopStarted { depth: 0 }));
    assert!(events.contains(&Event::HolCandidateFound {
        depth: 0,
        iteration: 1
    }));
    assert!(events.contains(&Event::HolCandidateRefuted { depth: 0 }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::HolLoopUnsat { .. })));
    assert_eq!(
        events.last(),
        Some(&Event::HolLoopExhausted {
            depth: 0,
            iterations: 2
        })
    );
}

#[test]
fn candidate_at_the_bound_is_checked() {
    // at most two candidates: the empty set, then the full one
    let problem = problem(
        "universe A0
        fact some X: set univ | all Y: set univ | Y in X",
    );
    let solver = TemporalSolver::new(Options::default().with_hol_max_iterations(1));
    let solution = solver.solve(&problem.formula(), &problem.bounds).unwrap();
    assert!(solution.is_sat());
    assert!(solution.statistics.hol_candidates <= 2);
    let instance = solution.instance().unwrap();
    assert_eq!(value(instance, "$X", 0), instance.universe().all(1));
}

#[test]
fn nested_existential_in_universal() {
    let problem = problem(
        "universe A0 A1 A2
        static p: 1 <= {A0, A1, A2}
        fact all Y: set univ | some Z: set univ | Z in p && (some Y => some (Z & Y))",
    );
    let solution = TemporalSolver::default()
        .solve(&problem.formula(), &problem.bounds)
        .unwrap();
    assert!(solution.is_sat());
    let instance = solution.instance().unwrap();
    // every atom needs a witness inside p
    assert_eq!(value(instance, "p", 0), instance.universe().all(1));
    assert!(instance.evaluate(&problem.formula()).unwrap());
}

#[test]
fn nested_universal_in_universal() {
    // every set has a superset inside p only if p is everything
    let problem = problem(
        "universe A0 A1
        static p: 1 <= {A0, A1}
        fact all Y: set univ | some Z: set univ | Y in Z && (all W: set univ | W in Z => W in p)",
    );
    let solution = TemporalSolver::default()
        .solve(&problem.formula(), &problem.bounds)
        .unwrap();
    assert!(solution.is_sat());
    let instance = solution.instance().unwrap();
    assert_eq!(value(instance, "p", 0), instance.universe().all(1));
    assert!(instance.evaluate(&problem.formula()).unwrap());
}

#[test]
fn temporal_universal() {
    let problem = problem(
        "universe A0 A1
        var p: 1 <= {A0, A1}
        fact some p
        fact always p' = p
        fact all var Y: set univ | eventually Y in p",
    );
    let reporter = Arc::new(RecordingReporter::new());
    let solver = TemporalSolver::new(
        Options::default()
            .with_trace_lengths(1, 3)
            .with_reporter(reporter.clone()),
    );
    let solution = solver.solve(&problem.formula(), &problem.bounds).unwrap();
    let instance = solution.instance().unwrap();
    for i in 0..instance.prefix_length() {
        assert_eq!(value(instance, "p", i), instance.universe().all(1));
    }
    assert!(solution.statistics.hol_candidates <= 3);
    assert!(reporter
        .events()
        .contains(&Event::HolCandidateVerified { depth: 0 }));
}

#[test]
fn alternatives_are_tried_in_order() {
    let text = |first: &str| {
        format!(
            "universe A0 A1
            static r: 1 <= {{A0, A1}}
            fact some r
            fact (some X: set r | some X && {first}) || (some X: set r | X = r)"
        )
    };
    let splits = |events: Vec<Event>| -> Vec<Event> {
        events
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::SplitStarted { .. }
                        | Event::SplitChoice { .. }
                        | Event::SplitChoiceSat { .. }
                        | Event::SplitChoiceUnsat { .. }
                )
            })
            .collect()
    };

    let problem = problem(&text("no r"));
    let reporter = Arc::new(RecordingReporter::new());
    let solver = TemporalSolver::new(Options::default().with_reporter(reporter.clone()));
    assert!(solver
        .solve(&problem.formula(), &problem.bounds)
        .unwrap()
        .is_sat());
    assert_eq!(
        splits(reporter.events()),
        vec![
            Event::SplitStarted { alternatives: 2 },
            Event::SplitChoice { index: 0 },
            Event::SplitChoiceUnsat { index: 0 },
            Event::SplitChoice { index: 1 },
            Event::SplitChoiceSat { index: 1 },
        ]
    );

    // the second alternative is never translated
    let problem = self::problem(&text("X in r"));
    let reporter = Arc::new(RecordingReporter::new());
    let solver = TemporalSolver::new(Options::default().with_reporter(reporter.clone()));
    assert!(solver
        .solve(&problem.formula(), &problem.bounds)
        .unwrap()
        .is_sat());
    assert_eq!(
        splits(reporter.events()),
        vec![
            Event::SplitStarted { alternatives: 2 },
            Event::SplitChoice { index: 0 },
            Event::SplitChoiceSat { index: 0 },
        ]
    );
    let translations = reporter
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Translating { .. }))
        .count();
    assert_eq!(translations, 1);
}
