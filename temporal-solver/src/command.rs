// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The temporal-solver binary's command-line interface.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use std::{fs, process};

use clap::Args;
use codespan_reporting::{
    files::SimpleFile,
    term::{
        self as terminal,
        termcolor::{ColorChoice, StandardStream},
    },
};
use path_slash::PathExt;
use thiserror::Error;

use engine::{
    ConfigError, Explorer, IterationEncoding, Options, Outcome, Solution, SolveError, Statistics,
    TemporalSolver,
};
use relational::{
    bounds::Bounds,
    instance::TemporalInstance,
    parser::{parse_error_diagnostic, parse_problem, Problem},
    printer,
    semantics::EvalError,
    syntax::{Formula, Relation},
};
use translator::sat::SatFactory;

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum SolverType {
    Cadical,
    External,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum ColorOutput {
    Never,
    Auto,
    Always,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    /// Whole traces that differ somewhere
    Path,
    /// Traces that differ in their static relations
    Config,
    /// Traces that differ only within a window of states
    Segment,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum Encoding {
    Sat,
    Formula,
}

impl From<Encoding> for IterationEncoding {
    fn from(e: Encoding) -> Self {
        match e {
            Encoding::Sat => IterationEncoding::Sat,
            Encoding::Formula => IterationEncoding::Formula,
        }
    }
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
struct SolveArgs {
    #[arg(long, default_value_t = 1)]
    /// Shortest trace length to try
    min_trace: usize,

    #[arg(long, default_value_t = 20)]
    /// Longest trace length to try
    max_trace: usize,

    #[arg(long)]
    /// Give up after this many seconds
    timeout: Option<u64>,

    #[arg(long, default_value_t = 500)]
    /// Bound on the candidates of each higher-order loop (0 is unbounded)
    hol_max_iter: usize,

    #[arg(long)]
    /// Report an unsatisfiable core when there is no solution
    proof: bool,

    #[arg(value_enum, long, default_value_t = SolverType::Cadical)]
    /// SAT solver to use
    solver: SolverType,

    #[arg(long)]
    /// Command line of the external DIMACS solver
    solver_command: Option<String>,

    #[arg(long)]
    /// Print solutions as JSON
    json: bool,

    #[arg(long)]
    /// Evaluate the problem on every solution found
    check: bool,

    /// File name for a problem file
    file: String,
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
struct EnumerateArgs {
    #[command(flatten)]
    solve: SolveArgs,

    #[arg(value_enum, long, default_value_t = Mode::Path)]
    /// How successive solutions differ
    mode: Mode,

    #[arg(long, default_value_t = 10)]
    /// Maximum number of solutions to print
    limit: usize,

    #[arg(long, default_value_t = 0)]
    /// First state of the window in segment mode
    state: usize,

    #[arg(long, default_value_t = 1)]
    /// Width of the window in segment mode
    delta: usize,

    #[arg(long, num_args = 1..)]
    /// Relations allowed to change in segment mode (default: all mutable
    /// relations)
    force: Vec<String>,

    #[arg(value_enum, long, default_value_t = Encoding::Sat)]
    /// How previous solutions are excluded
    encoding: Encoding,
}

#[derive(clap::Subcommand, Clone, Debug, PartialEq, Eq)]
enum Command {
    /// Find one solution by iterative deepening over the trace length.
    Solve(SolveArgs),
    /// Enumerate solutions of a first-order problem.
    Enumerate(EnumerateArgs),
    /// Parse and pretty-print a problem.
    Print {
        /// File name for a problem file
        file: String,
    },
}

impl Command {
    fn file(&self) -> &str {
        match self {
            Command::Solve(SolveArgs { file, .. }) => file,
            Command::Enumerate(EnumerateArgs {
                solve: SolveArgs { file, .. },
                ..
            }) => file,
            Command::Print { file } => file,
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(about, long_about=None)]
/// Entrypoint for the temporal-solver binary, including all commands.
pub struct App {
    #[arg(value_enum, long, default_value_t = ColorOutput::Auto)]
    /// Control color output. Auto disables colors with TERM=dumb or
    /// NO_COLOR=true.
    color: ColorOutput,

    #[command(subcommand)]
    /// Command to run
    command: Command,
}

/// An error after the problem has been parsed.
#[derive(Error, Debug)]
enum CommandError {
    #[error("{0}")]
    Usage(&'static str),
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error("could not check solution: {0}")]
    Eval(#[from] EvalError),
    #[error("solution check failed: {0}")]
    Check(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SolveArgs {
    fn get_solver(&self) -> Result<SatFactory, CommandError> {
        match (self.solver, &self.solver_command) {
            (SolverType::Cadical, None) if self.proof => Ok(SatFactory::CadicalProver),
            (SolverType::Cadical, None) => Ok(SatFactory::Cadical),
            (SolverType::Cadical, Some(_)) => Err(CommandError::Usage(
                "--solver-command requires --solver external",
            )),
            (SolverType::External, _) if self.proof => {
                Err(CommandError::Usage("--proof requires --solver cadical"))
            }
            (SolverType::External, None) => Err(CommandError::Usage(
                "--solver external requires --solver-command",
            )),
            (SolverType::External, Some(cmd)) => {
                let mut words = cmd.split_whitespace().map(|w| w.to_string());
                let command = words
                    .next()
                    .ok_or(CommandError::Usage("empty --solver-command"))?;
                Ok(SatFactory::External {
                    command,
                    args: words.collect(),
                })
            }
        }
    }

    fn get_options(&self) -> Result<Options, CommandError> {
        let mut options = Options::default()
            .with_trace_lengths(self.min_trace, self.max_trace)
            .with_solver(self.get_solver()?)
            .with_hol_max_iterations(self.hol_max_iter);
        if let Some(secs) = self.timeout {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        Ok(options)
    }

    fn report(&self, problem: &Problem, solution: &Solution, pretty: bool) -> Result<(), CommandError> {
        if self.json {
            let json = if pretty {
                serde_json::to_string_pretty(solution)?
            } else {
                serde_json::to_string(solution)?
            };
            println!("{json}");
        } else {
            print!("{}", render(&problem.bounds, solution));
            print!("{}", render_statistics(&solution.statistics));
        }
        if self.check {
            if let Some(instance) = solution.instance() {
                check(problem, instance)?;
                if !self.json {
                    println!("check: ok");
                }
            }
        }
        Ok(())
    }
}

impl EnumerateArgs {
    fn get_force(&self, bounds: &Bounds) -> Result<BTreeSet<Relation>, CommandError> {
        self.force
            .iter()
            .map(|name| {
                bounds
                    .relations()
                    .find(|r| &r.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        CommandError::from(SolveError::from(ConfigError::UnknownRelation(
                            name.clone(),
                        )))
                    })
            })
            .collect()
    }
}

/// The verdict followed by the trace or the core.
fn render(bounds: &Bounds, solution: &Solution) -> String {
    match &solution.outcome {
        Outcome::Sat { instance } => {
            let n = instance.prefix_length();
            let states = if n == 1 { "state" } else { "states" };
            format!("sat, trace of {n} {states}\n{instance}")
        }
        Outcome::Unsat {
            trace_length,
            proof,
        } => {
            let mut out = format!("unsat up to trace length {trace_length}\n");
            if let Some(proof) = proof {
                out.push_str("core:\n");
                for f in &proof.core {
                    out.push_str(&format!("  {}\n", printer::formula_in(bounds.universe(), f)));
                }
            }
            out
        }
    }
}

fn render_statistics(stats: &Statistics) -> String {
    let lengths = stats
        .trace_lengths
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = String::from("statistics:\n");
    out.push_str(&format!("  trace lengths: {lengths}\n"));
    out.push_str(&format!(
        "  variables: {} ({} primary)\n",
        stats.variables, stats.primary_variables
    ));
    out.push_str(&format!("  clauses: {}\n", stats.clauses));
    out.push_str(&format!("  sat calls: {}\n", stats.sat_calls));
    if stats.hol_candidates > 0 {
        out.push_str(&format!("  candidates: {}\n", stats.hol_candidates));
    }
    out.push_str(&format!(
        "  translation: {:?}, solving: {:?}\n",
        stats.translation_time, stats.solving_time
    ));
    out
}

/// Check a trace against the bounds and facts of the problem it solves.
fn check(problem: &Problem, instance: &TemporalInstance) -> Result<(), CommandError> {
    for (r, b) in problem.bounds.iter() {
        for i in 0..instance.prefix_length() {
            let value = instance
                .state(i)
                .tuples(r)
                .ok_or_else(|| CommandError::Check(format!("{} has no value", r.name)))?;
            if !b.lower.is_subset(value) || !value.is_subset(&b.upper) {
                return Err(CommandError::Check(format!(
                    "{} is outside its bounds in state {i}",
                    r.name
                )));
            }
        }
    }
    let formula = Formula::and([problem.formula(), problem.bounds.resolve()]);
    if !instance.evaluate(&formula)? {
        return Err(CommandError::Check("the facts do not hold".to_string()));
    }
    Ok(())
}

impl Command {
    fn run(&self, problem: &Problem) -> Result<(), CommandError> {
        match self {
            Command::Solve(args) => {
                let solver = TemporalSolver::new(args.get_options()?);
                let solution = solver.solve(&problem.formula(), &problem.bounds)?;
                args.report(problem, &solution, true)?;
            }
            Command::Enumerate(args) => {
                let options = args
                    .solve
                    .get_options()?
                    .with_iteration_encoding(args.encoding.into());
                let force = args.get_force(&problem.bounds)?;
                let solver = TemporalSolver::new(options);
                let mut solutions = solver.solve_all(&problem.formula(), &problem.bounds)?;
                for i in 1..=args.limit {
                    let solution = match args.mode {
                        Mode::Path => solutions.next_p()?,
                        Mode::Config => solutions.next_c()?,
                        Mode::Segment => solutions.next_s(args.state, args.delta, &force)?,
                    };
                    if !solution.is_sat() {
                        if args.solve.json {
                            args.solve.report(problem, &solution, false)?;
                        } else {
                            println!("no more solutions");
                        }
                        break;
                    }
                    if !args.solve.json {
                        println!("solution {i}:");
                    }
                    args.solve.report(problem, &solution, false)?;
                }
            }
            Command::Print { .. } => print!("{}", printer::problem(problem)),
        }
        Ok(())
    }
}

impl App {
    /// Run the application.
    pub fn exec(self) {
        let file = match fs::read_to_string(self.command.file()) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("could not read {}: {err}", self.command.file());
                process::exit(1);
            }
        };
        // We make sure paths look like Unix paths on all platforms, otherwise test snapshots don't match.
        let standardized_filename = Path::new(self.command.file()).to_slash_lossy();
        let files = SimpleFile::new(standardized_filename, &file);

        let writer = StandardStream::stderr(match &self.color {
            ColorOutput::Never => ColorChoice::Never,
            ColorOutput::Always => ColorChoice::Always,
            ColorOutput::Auto => ColorChoice::Auto,
        });
        let config = codespan_reporting::term::Config {
            start_context_lines: 3,
            end_context_lines: 3,
            ..Default::default()
        };

        let problem = match parse_problem(&file) {
            Ok(problem) => problem,
            Err(err) => {
                let diagnostic = parse_error_diagnostic((), &err);
                if terminal::emit(&mut writer.lock(), &config, &files, &diagnostic).is_err() {
                    eprintln!("{err}");
                }
                process::exit(1);
            }
        };
        log::info!(
            "parsed {} relations and {} facts",
            problem.bounds.relations().count(),
            problem.facts.len()
        );

        if let Err(err) = self.command.run(&problem) {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}
