//! State and update rules for the stateful primitives: clock source, DFF,
//! ROM/RAM and finite-state machine.
//!
//! All edge-triggered elements record the clock level sampled at the start
//! of a tick-step (`sampled_clock`) and compare it with the settled level
//! afterwards; see [`rising_edge`].

use serde::{Deserialize, Serialize};

use crate::circuit::mask;
use crate::error::{CircuitError, Result};
use crate::expr::Expr;

/// Largest ROM/RAM the catalog accepts, in words.
pub const MAX_MEMORY_WORDS: usize = 1 << 16;

/// Bits needed to address `entries` slots (at least 1).
pub fn address_width(entries: usize) -> u32 {
    let mut width = 1;
    while (1usize << width) < entries {
        width += 1;
    }
    width
}

/// 0 → nonzero transition
pub fn rising_edge(before: u64, after: u64) -> bool {
    before == 0 && after != 0
}

/// Free-running clock source. Toggles once per tick-step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockState {
    pub level: bool,
}

impl ClockState {
    pub fn advance(&mut self) {
        self.level = !self.level;
    }

    pub fn value(&self) -> u64 {
        self.level as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DffState {
    pub latched: u64,
    pub sampled_clock: u64,
}

/// Fixed-size array of fixed-width words, shared by ROM and RAM.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    words: Vec<u64>,
    width: u32,
    pub sampled_clock: u64,
}

impl Memory {
    pub fn new(size: usize, width: u32, init: Option<&[u64]>, component: &str) -> Result<Self> {
        let mut memory = Memory {
            words: vec![0; size],
            width,
            sampled_clock: 0,
        };
        if let Some(init) = init {
            memory.load(init, component)?;
        }
        Ok(memory)
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Combinational read; out-of-range addresses read 0.
    pub fn read(&self, addr: u64) -> u64 {
        usize::try_from(addr)
            .ok()
            .and_then(|a| self.words.get(a))
            .copied()
            .unwrap_or(0)
    }

    /// Returns true when the stored word changed.
    pub fn write(&mut self, addr: u64, value: u64) -> bool {
        let value = value & mask(self.width);
        match usize::try_from(addr).ok().and_then(|a| self.words.get_mut(a)) {
            Some(slot) if *slot != value => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Overwrite contents from the start; words past the end of `words`
    /// are cleared.
    pub fn load(&mut self, words: &[u64], component: &str) -> Result<()> {
        if words.len() > self.words.len() {
            return Err(CircuitError::SizeMismatch {
                component: component.to_string(),
                capacity: self.words.len(),
                actual: words.len(),
            });
        }
        let m = mask(self.width);
        for (i, slot) in self.words.iter_mut().enumerate() {
            *slot = words.get(i).map(|w| w & m).unwrap_or(0);
        }
        Ok(())
    }

    /// Keep the overlapping contents of a memory this one replaces.
    pub fn adopt(&mut self, previous: &Memory) {
        let m = mask(self.width);
        for (slot, old) in self.words.iter_mut().zip(previous.words.iter()) {
            *slot = old & m;
        }
        self.sampled_clock = previous.sampled_clock;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsmStateSpec {
    pub id: String,
    #[serde(default)]
    pub output: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsmTransitionSpec {
    pub from: String,
    pub to: String,
    /// Guard over the machine's input ports; absent means always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// State machine description as stored in component properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    pub states: Vec<FsmStateSpec>,
    #[serde(default)]
    pub transitions: Vec<FsmTransitionSpec>,
}

#[derive(Debug, Clone)]
struct Transition {
    from: usize,
    to: usize,
    guard: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Fsm {
    states: Vec<FsmStateSpec>,
    transitions: Vec<Transition>,
    current: usize,
    width: u32,
    pub sampled_clock: u64,
}

impl Fsm {
    /// Compile a description. Guards may only reference `inputs`.
    pub fn build(spec: &FsmSpec, inputs: &[String], width: u32, component: &str) -> Result<Self> {
        let invalid = |reason: String| CircuitError::InvalidParameter {
            name: "fsm".into(),
            context: format!("component '{}'", component),
            reason,
        };
        if spec.states.is_empty() {
            return Err(invalid("a state machine needs at least one state".into()));
        }
        let lookup = |id: &str| {
            spec.states
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| invalid(format!("unknown state '{}'", id)))
        };
        for (i, state) in spec.states.iter().enumerate() {
            if spec.states[..i].iter().any(|s| s.id == state.id) {
                return Err(invalid(format!("state '{}' declared twice", state.id)));
            }
        }

        let mut transitions = Vec::with_capacity(spec.transitions.len());
        for t in &spec.transitions {
            let guard = match &t.when {
                Some(text) => {
                    let expr = Expr::parse(text)?;
                    if let Some(name) = expr.signals().into_iter().find(|n| !inputs.iter().any(|i| i.as_str() == *n)) {
                        return Err(invalid(format!("guard '{}' reads unknown input '{}'", text, name)));
                    }
                    Some(expr)
                }
                None => None,
            };
            transitions.push(Transition {
                from: lookup(&t.from)?,
                to: lookup(&t.to)?,
                guard,
            });
        }

        let current = match &spec.initial {
            Some(id) => lookup(id)?,
            None => 0,
        };
        Ok(Fsm {
            states: spec.states.clone(),
            transitions,
            current,
            width,
            sampled_clock: 0,
        })
    }

    /// Declared output of the current state.
    pub fn output(&self) -> u64 {
        self.states[self.current].output & mask(self.width)
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_state(&self) -> &str {
        &self.states[self.current].id
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[FsmStateSpec] {
        &self.states
    }

    /// `(from, to, guard)` state indices in declaration order
    pub fn transitions(&self) -> impl Iterator<Item = (usize, usize, Option<&Expr>)> {
        self.transitions.iter().map(|t| (t.from, t.to, t.guard.as_ref()))
    }

    /// Target of the first transition out of the current state whose guard
    /// holds; the current state when none does.
    pub fn next_state(&self, inputs: &dyn Fn(&str) -> Option<u64>) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.from == self.current)
            .find(|t| match &t.guard {
                Some(guard) => guard.is_true(inputs).unwrap_or(false),
                None => true,
            })
            .map(|t| t.to)
            .unwrap_or(self.current)
    }

    pub fn set_current(&mut self, state: usize) -> Result<()> {
        if state >= self.states.len() {
            return Err(CircuitError::SimulationInvariant(format!(
                "FSM state index {} out of range ({} states)",
                state,
                self.states.len()
            )));
        }
        self.current = state;
        Ok(())
    }

    pub fn adopt(&mut self, previous: &Fsm) {
        if let Some(same) = self
            .states
            .iter()
            .position(|s| s.id == previous.current_state())
        {
            self.current = same;
        }
        self.sampled_clock = previous.sampled_clock;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traffic_light() -> FsmSpec {
        serde_json::from_str(
            r#"{
                "initial": "RED",
                "states": [
                    {"id": "RED", "output": 1},
                    {"id": "GREEN", "output": 2},
                    {"id": "YELLOW", "output": 4}
                ],
                "transitions": [
                    {"from": "RED", "to": "GREEN", "when": "in0 == 1"},
                    {"from": "RED", "to": "YELLOW", "when": "in0 == 1"},
                    {"from": "GREEN", "to": "YELLOW"},
                    {"from": "YELLOW", "to": "RED"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_address_width() {
        assert_eq!(address_width(1), 1);
        assert_eq!(address_width(2), 1);
        assert_eq!(address_width(4), 2);
        assert_eq!(address_width(5), 3);
        assert_eq!(address_width(256), 8);
    }

    #[test]
    fn test_rising_edge() {
        assert!(rising_edge(0, 1));
        assert!(!rising_edge(1, 1));
        assert!(!rising_edge(1, 0));
        assert!(!rising_edge(0, 0));
    }

    #[test]
    fn test_memory_load_and_read() {
        let mut rom = Memory::new(4, 8, None, "rom1").unwrap();
        rom.load(&[0xaa, 0xbb, 0xcc, 0xdd], "rom1").unwrap();
        assert_eq!(rom.read(1), 0xbb);
        assert_eq!(rom.read(9), 0);
        rom.load(&[0x1ff], "rom1").unwrap();
        assert_eq!(rom.words(), &[0xff, 0, 0, 0]);
    }

    #[test]
    fn test_memory_load_too_large() {
        let mut rom = Memory::new(2, 8, None, "rom1").unwrap();
        let err = rom.load(&[1, 2, 3], "rom1").unwrap_err();
        assert_eq!(
            err,
            CircuitError::SizeMismatch { component: "rom1".into(), capacity: 2, actual: 3 }
        );
    }

    #[test]
    fn test_memory_write_reports_change() {
        let mut ram = Memory::new(4, 8, None, "ram").unwrap();
        assert!(ram.write(2, 0x5a));
        assert!(!ram.write(2, 0x5a));
        assert!(!ram.write(7, 1));
        assert_eq!(ram.read(2), 0x5a);
    }

    #[test]
    fn test_fsm_first_match_wins() {
        let fsm = Fsm::build(&traffic_light(), &["in0".to_string()], 4, "fsm").unwrap();
        assert_eq!(fsm.current_state(), "RED");
        assert_eq!(fsm.output(), 1);
        let go = |name: &str| if name == "in0" { Some(1) } else { None };
        let stay = |name: &str| if name == "in0" { Some(0) } else { None };
        // both RED transitions match; the first declared wins
        assert_eq!(fsm.next_state(&go), 1);
        assert_eq!(fsm.next_state(&stay), 0);
    }

    #[test]
    fn test_fsm_rejects_unknown_input() {
        let mut spec = traffic_light();
        spec.transitions[0].when = Some("in3 == 1".into());
        assert!(Fsm::build(&spec, &["in0".to_string()], 4, "fsm").is_err());
    }

    #[test]
    fn test_fsm_rejects_unknown_state() {
        let mut spec = traffic_light();
        spec.transitions[2].to = "BLUE".into();
        assert!(Fsm::build(&spec, &["in0".to_string()], 4, "fsm").is_err());
    }
}
