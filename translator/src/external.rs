// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Run a DIMACS SAT solver as an external process.
//!
//! The solver is not incremental: every call writes the whole clause set
//! (with assumptions as unit clauses) to the solver's stdin and parses the
//! competition output format (`s SATISFIABLE` followed by `v` lines).

use std::{
    io::{self, Read, Write},
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use crate::sat::{Interrupt, SatError, SatSolver};

/// A solver process launched afresh for every call.
pub struct ExternalSolver {
    command: String,
    args: Vec<String>,
    interrupt: Interrupt,
    clauses: Vec<Vec<i32>>,
    max_var: i32,
    model: Vec<bool>,
}

impl From<io::Error> for SatError {
    fn from(e: io::Error) -> Self {
        SatError::Io(e.to_string())
    }
}

impl ExternalSolver {
    /// A solver that runs `command args...` with the problem on stdin.
    pub fn new(command: String, args: Vec<String>, interrupt: Interrupt) -> Self {
        Self {
            command,
            args,
            interrupt,
            clauses: vec![],
            max_var: 0,
            model: vec![],
        }
    }

    fn dimacs(&self, assumptions: &[i32]) -> String {
        let mut out = format!(
            "p cnf {} {}\n",
            self.max_var,
            self.clauses.len() + assumptions.len()
        );
        let units = assumptions.iter().map(std::slice::from_ref);
        for clause in self.clauses.iter().map(|c| c.as_slice()).chain(units) {
            for lit in clause {
                out.push_str(&lit.to_string());
                out.push(' ');
            }
            out.push_str("0\n");
        }
        out
    }

    // Wait for the process, killing it if the interrupt fires or it cannot
    // be polled.
    fn wait(&self, child: &mut Child) -> Result<(), SatError> {
        loop {
            let stop = match child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => self.interrupt.check(),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = stop {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn parse_output(&mut self, output: &str) -> Result<bool, SatError> {
        let mut status = None;
        let mut model = vec![false; self.max_var as usize + 1];
        for line in output.lines() {
            let line = line.trim();
            if let Some(s) = line.strip_prefix("s ") {
                status = match s.trim() {
                    "SATISFIABLE" => Some(true),
                    "UNSATISFIABLE" => Some(false),
                    other => return Err(SatError::Failed(other.to_string())),
                };
            } else if let Some(values) = line.strip_prefix("v ") {
                for v in values.split_whitespace() {
                    let lit: i32 = v
                        .parse()
                        .map_err(|_| SatError::Failed(format!("bad literal {v}")))?;
                    if lit > 0 && (lit as usize) < model.len() {
                        model[lit as usize] = true;
                    }
                }
            }
        }
        let status = status.ok_or_else(|| SatError::Failed("no status line".to_string()))?;
        self.model = if status { model } else { vec![] };
        Ok(status)
    }
}

impl SatSolver for ExternalSolver {
    fn add_clause(&mut self, clause: &[i32]) {
        if let Some(m) = clause.iter().map(|l| l.abs()).max() {
            self.max_var = self.max_var.max(m);
        }
        self.clauses.push(clause.to_vec());
    }

    fn solve(&mut self, assumptions: &[i32]) -> Result<bool, SatError> {
        self.interrupt.check()?;
        if let Some(m) = assumptions.iter().map(|l| l.abs()).max() {
            self.max_var = self.max_var.max(m);
        }
        let input = self.dimacs(assumptions);
        log::debug!(
            "running {} on {} variables, {} clauses",
            self.command,
            self.max_var,
            self.clauses.len()
        );
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SatError::Io("no pipes to the solver".to_string()));
        };
        // both pipes get their own thread: a solver may not drain its input
        // before writing, and a blocked write must not outlive an interrupt
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let reader = thread::spawn(move || {
            let mut s = String::new();
            stdout.read_to_string(&mut s).map(|_| s)
        });
        let waited = self.wait(&mut child);
        // the process is gone, so both pipes are closed and the threads end
        let written = writer
            .join()
            .map_err(|_| SatError::Io("input writer panicked".to_string()))?;
        let output = reader
            .join()
            .map_err(|_| SatError::Io("output reader panicked".to_string()))?;
        waited?;
        written?;
        self.parse_output(&output?)
    }

    fn value(&self, lit: i32) -> bool {
        let var = lit.unsigned_abs() as usize;
        let v = self.model.get(var).copied().unwrap_or(false);
        if lit > 0 {
            v
        } else {
            !v && var < self.model.len()
        }
    }

    // no cores from an external process
    fn failed(&self, _lit: i32) -> bool {
        false
    }

    fn num_variables(&self) -> i32 {
        self.max_var
    }

    fn num_clauses(&self) -> usize {
        self.clauses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimacs() {
        let mut solver = ExternalSolver::new("true".to_string(), vec![], Interrupt::new());
        solver.add_clause(&[1, -2]);
        solver.add_clause(&[3]);
        insta::assert_display_snapshot!(solver.dimacs(&[-1]).trim_end(), @r###"
        p cnf 3 3
        1 -2 0
        3 0
        -1 0
        "###);
    }

    #[test]
    fn test_parse_output() {
        let mut solver = ExternalSolver::new("true".to_string(), vec![], Interrupt::new());
        solver.add_clause(&[1, 2]);
        solver.add_clause(&[-1]);
        assert_eq!(
            solver.parse_output("c comment\ns SATISFIABLE\nv -1 2 0\n"),
            Ok(true)
        );
        assert!(solver.value(2));
        assert!(solver.value(-1));
        assert!(!solver.value(1));
        assert_eq!(solver.parse_output("s UNSATISFIABLE\n"), Ok(false));
        assert!(solver.parse_output("nothing useful").is_err());
    }

    fn large(command: &str, args: &[&str], interrupt: Interrupt) -> ExternalSolver {
        let mut solver = ExternalSolver::new(
            command.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
            interrupt,
        );
        // well past the capacity of a pipe
        for i in 1..50_000 {
            solver.add_clause(&[i, -(i + 1)]);
        }
        solver
    }

    #[test]
    fn test_solver_ignores_input() {
        let mut solver = large("true", &[], Interrupt::new());
        assert!(solver.solve(&[]).is_err());
        // the next call starts from a clean slate
        assert!(solver.solve(&[]).is_err());
    }

    #[test]
    fn test_interrupted_while_writing() {
        let interrupt = Interrupt::new().with_timeout(Duration::from_millis(200));
        let mut solver = large("sleep", &["30"], interrupt);
        let start = std::time::Instant::now();
        assert_eq!(solver.solve(&[]), Err(SatError::Timeout));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_executable() {
        let mut solver = ExternalSolver::new(
            "/nonexistent/sat-solver".to_string(),
            vec![],
            Interrupt::new(),
        );
        solver.add_clause(&[1]);
        assert!(matches!(solver.solve(&[]), Err(SatError::Io(_))));
    }
}
