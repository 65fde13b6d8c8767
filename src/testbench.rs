//! Scripted stimulus with expectations, and breakpoint conditions.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::circuit::{Circuit, ComponentKind, Signal};
use crate::engine::Engine;
use crate::error::{CircuitError, Result};
use crate::expr::Expr;

/// One scripted entry: at relative tick `at`, drive `set` then check `expect`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestbenchStep {
    pub at: u64,
    #[serde(default)]
    pub set: BTreeMap<String, u64>,
    #[serde(default)]
    pub expect: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestFailure {
    pub component: String,
    pub expected: u64,
    pub actual: Signal,
    pub tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestbenchReport {
    pub passed: bool,
    pub failures: Vec<TestFailure>,
    pub ticks_run: u64,
}

fn validate(steps: &[TestbenchStep], circuit: &Circuit) -> Result<()> {
    for step in steps {
        for id in step.set.keys() {
            match circuit.component(id).map(|c| &c.kind) {
                Some(ComponentKind::Input { .. }) => {}
                Some(_) => {
                    return Err(CircuitError::InvalidPort {
                        component: id.clone(),
                        port: "out".into(),
                        reason: "testbench can only drive INPUT components".into(),
                    })
                }
                None => return Err(CircuitError::UnknownComponent(id.clone())),
            }
        }
        for id in step.expect.keys() {
            if circuit.signal(id).is_none() {
                return Err(CircuitError::UnknownComponent(id.clone()));
            }
        }
    }
    Ok(())
}

/// Drive `circuit` from its current state through every scripted tick.
/// Mismatches are collected, not raised; only unknown ids are errors, and
/// they are reported before any tick runs.
pub fn run(steps: &[TestbenchStep], circuit: &mut Circuit, engine: &Engine) -> Result<TestbenchReport> {
    validate(steps, circuit)?;
    let last = match steps.iter().map(|s| s.at).max() {
        Some(last) => last,
        None => {
            return Ok(TestbenchReport {
                passed: true,
                failures: Vec::new(),
                ticks_run: 0,
            })
        }
    };

    let mut failures = Vec::new();
    for tick in 0..=last {
        let due: Vec<&TestbenchStep> = steps.iter().filter(|s| s.at == tick).collect();
        for step in &due {
            for (id, value) in &step.set {
                circuit.set_input(id, *value)?;
            }
        }
        engine.step(circuit)?;
        for step in &due {
            for (id, expected) in &step.expect {
                let actual = circuit.signal(id).unwrap_or_default();
                if actual != Signal::Value(*expected) {
                    debug!("Testbench tick {}: {} = {}, expected {:x}", tick, id, actual, expected);
                    failures.push(TestFailure {
                        component: id.clone(),
                        expected: *expected,
                        actual,
                        tick,
                    });
                }
            }
        }
    }

    info!(
        "Testbench finished after {} tick(s) with {} failure(s)",
        last + 1,
        failures.len()
    );
    Ok(TestbenchReport {
        passed: failures.is_empty(),
        failures,
        ticks_run: last + 1,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Breakpoint {
    pub id: usize,
    pub expression: String,
    #[serde(skip)]
    condition: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointHit {
    pub breakpoint: usize,
    pub expression: String,
    pub tick: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BreakpointSet {
    breakpoints: Vec<Breakpoint>,
    next_id: usize,
}

impl BreakpointSet {
    pub fn new() -> Self {
        BreakpointSet::default()
    }

    /// Parse and add a condition. Returns its id.
    pub fn add(&mut self, source: &str) -> Result<usize> {
        let condition = Expr::parse(source)?;
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.push(Breakpoint {
            id,
            expression: source.trim().to_string(),
            condition,
        });
        Ok(id)
    }

    pub fn list(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn remove(&mut self, id: usize) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|b| b.id != id);
        self.breakpoints.len() != before
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// First breakpoint, in the order added, whose condition holds.
    /// A condition naming a missing signal does not fire.
    pub fn check(&self, circuit: &Circuit, tick: u64) -> Option<BreakpointHit> {
        let lookup = |name: &str| circuit.signal(name).map(|s| s.bits());
        self.breakpoints
            .iter()
            .find(|b| b.condition.is_true(&lookup).unwrap_or(false))
            .map(|b| BreakpointHit {
                breakpoint: b.id,
                expression: b.expression.clone(),
                tick,
            })
    }
}
