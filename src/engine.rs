//! Discrete-tick propagation.
//!
//! A tick-step runs four phases:
//! 1. every edge-triggered element samples its clock input, and clock
//!    sources advance;
//! 2. combinational logic settles by Gauss-Seidel passes, each output
//!    forwarded along its wires immediately, until a pass changes nothing
//!    or [`SETTLE_PASS_CAP`] passes have run;
//! 3. elements whose clock rose collect their pending state update;
//! 4. all updates are applied together, then logic settles once more so
//!    outputs reflect the new state.
//!
//! Passes visit components in signal-flow order: a depth-first walk along
//! the wires, rooted at undriven components and then at the rest in
//! insertion order, reversed on the way out. Acyclic logic is visited
//! drivers first, and every combinational loop is visited as a contiguous
//! chain whatever order its parts were inserted in.
//!
//! The pass cap is part of the contract: a combinational loop that never
//! settles keeps whatever the cap-th pass produced. A chain-visited odd
//! inverter ring flips on every pass, so with an odd cap it toggles once
//! per tick-step. Custom instances run one pass of their private graph per
//! outer pass and share the same budget. The settle after a state update
//! only stops early on convergence or after an even number of passes, so
//! free-running loops keep the phase reached in phase 2.

use log::{debug, trace, warn};
use serde::Serialize;

use crate::circuit::{Circuit, Component, ComponentKind, Port, Signal};
use crate::error::{CircuitError, Result};
use crate::primitives::rising_edge;
use crate::subcircuit::Instance;

/// Maximum settle passes per phase.
pub const SETTLE_PASS_CAP: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SettleStats {
    pub passes: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StepStats {
    pub settle: SettleStats,
    pub state_changed: bool,
    pub resettle: Option<SettleStats>,
}

/// Precomputed fan-out of one output port
#[derive(Debug, Clone, Copy)]
struct Route {
    port: usize,
    target: usize,
    target_port: usize,
}

/// Visit order and fan-out of one graph, with the schedules of the custom
/// instances placed in it.
#[derive(Debug, Clone)]
struct Schedule {
    order: Vec<usize>,
    routes: Vec<Vec<Route>>,
    nested: Vec<Option<Schedule>>,
}

impl Schedule {
    fn of(circuit: &Circuit) -> Schedule {
        let routes = routes(circuit);
        let order = flow_order(&routes);
        let nested = circuit
            .components
            .iter()
            .map(|component| match &component.kind {
                ComponentKind::Custom(instance) => Some(Schedule::of(&instance.circuit)),
                _ => None,
            })
            .collect();
        Schedule { order, routes, nested }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateUpdate {
    Latch(u64),
    Write { addr: u64, value: u64 },
    Enter(usize),
}

/// A state update addressed by its component index path through nested
/// custom instances.
#[derive(Debug, Clone)]
struct PendingUpdate {
    path: Vec<usize>,
    update: StateUpdate,
}

#[derive(Debug, Clone)]
pub struct Engine {
    pass_cap: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            pass_cap: SETTLE_PASS_CAP,
        }
    }

    pub fn with_pass_cap(pass_cap: usize) -> Self {
        Engine {
            pass_cap: pass_cap.max(1),
        }
    }

    pub fn pass_cap(&self) -> usize {
        self.pass_cap
    }

    /// Settle combinational logic without advancing time.
    pub fn settle(&self, circuit: &mut Circuit) -> SettleStats {
        self.settle_within(circuit, self.pass_cap, 1)
    }

    /// Run passes until one changes nothing, or until `budget` passes have
    /// run. Convergence is only checked after a multiple of `stride`
    /// passes.
    fn settle_within(&self, circuit: &mut Circuit, budget: usize, stride: usize) -> SettleStats {
        let schedule = Schedule::of(circuit);
        let mut changed = false;
        for pass in 1..=budget {
            changed |= self.pass(circuit, &schedule);
            if pass % stride == 0 {
                if !changed {
                    return SettleStats {
                        passes: pass,
                        converged: true,
                    };
                }
                changed = false;
            }
        }
        SettleStats {
            passes: budget,
            converged: false,
        }
    }

    /// One Gauss-Seidel pass. Returns true when any port changed.
    fn pass(&self, circuit: &mut Circuit, schedule: &Schedule) -> bool {
        let mut changed = false;
        for &index in &schedule.order {
            let nested = schedule.nested.get(index).and_then(Option::as_ref);
            changed |= self.evaluate(&mut circuit.components[index], nested);
            for route in &schedule.routes[index] {
                let value = circuit.components[index].ports[route.port].value;
                changed |= circuit.components[route.target].ports[route.target_port].drive(value);
            }
        }
        changed
    }

    /// Advance one tick-step.
    pub fn step(&self, circuit: &mut Circuit) -> Result<StepStats> {
        begin_step(circuit);

        let settle = self.settle(circuit);
        if !settle.converged {
            debug!(
                "Combinational loop still changing after {} passes; keeping last pass",
                settle.passes
            );
        }

        let mut pending = Vec::new();
        collect_updates(circuit, &mut Vec::new(), &mut pending);
        for update in &pending {
            check_update(circuit, update)?;
        }
        let mut state_changed = false;
        for update in pending {
            state_changed |= apply_update(circuit, update)?;
        }

        let resettle = if state_changed {
            Some(self.settle_within(circuit, self.pass_cap * 2, 2))
        } else {
            None
        };
        Ok(StepStats {
            settle,
            state_changed,
            resettle,
        })
    }

    fn evaluate(&self, component: &mut Component, nested: Option<&Schedule>) -> bool {
        let Component { kind, ports, .. } = component;
        match kind {
            ComponentKind::Input { value } | ComponentKind::Constant { value } => {
                drive(ports, "out", *value)
            }
            ComponentKind::Clock(clock) => drive(ports, "out", clock.value()),
            ComponentKind::Output => false,
            ComponentKind::Gate(op) => {
                let width = ports.iter().find(|p| !p.is_input()).map(|p| p.width).unwrap_or(1);
                let value = op.apply(ports.iter().filter(|p| p.is_input()).map(|p| p.bits()), width);
                drive(ports, "out", value)
            }
            ComponentKind::Mux => {
                let sel = bits(ports, "sel");
                let value = bits(ports, &format!("in{}", sel));
                drive(ports, "out", value)
            }
            ComponentKind::Dff(state) => {
                let q = drive(ports, "q", state.latched);
                let qn = drive(ports, "qn", !state.latched);
                q || qn
            }
            ComponentKind::Rom(memory) | ComponentKind::Ram(memory) => {
                let value = memory.read(bits(ports, "addr"));
                drive(ports, "data", value)
            }
            ComponentKind::Fsm(fsm) => drive(ports, "out", fsm.output()),
            ComponentKind::Custom(instance) => match nested {
                Some(schedule) => self.evaluate_instance(instance, ports, schedule),
                None => {
                    let schedule = Schedule::of(&instance.circuit);
                    self.evaluate_instance(instance, ports, &schedule)
                }
            },
        }
    }

    /// Feed an instance its pin values, run one pass of its private graph,
    /// and publish its outputs.
    fn evaluate_instance(&self, instance: &mut Instance, ports: &mut [Port], schedule: &Schedule) -> bool {
        for (pin, port) in instance.inputs.iter().zip(ports.iter().filter(|p| p.is_input())) {
            if let Err(e) = instance.circuit.set_input(pin, port.bits()) {
                warn!("Instance of '{}': {}", instance.definition, e);
            }
        }
        let mut changed = self.pass(&mut instance.circuit, schedule);
        trace!("Instance of '{}' passed (changed: {})", instance.definition, changed);

        let outputs: Vec<Signal> = instance
            .outputs
            .iter()
            .map(|id| {
                instance
                    .circuit
                    .component(id)
                    .map(|c| c.observed())
                    .unwrap_or_default()
            })
            .collect();
        for (port, value) in ports.iter_mut().filter(|p| !p.is_input()).zip(outputs) {
            changed |= port.drive(value);
        }
        changed
    }
}

fn drive(ports: &mut [Port], name: &str, value: u64) -> bool {
    match ports.iter_mut().find(|p| p.name == name) {
        Some(port) => port.drive(Signal::Value(value)),
        None => false,
    }
}

fn bits(ports: &[Port], name: &str) -> u64 {
    ports.iter().find(|p| p.name == name).map(|p| p.bits()).unwrap_or(0)
}

fn routes(circuit: &Circuit) -> Vec<Vec<Route>> {
    let mut routes: Vec<Vec<Route>> = vec![Vec::new(); circuit.components.len()];
    for wire in &circuit.wires {
        // dangling wires (e.g. after a definition lost a port) carry nothing
        let (Some(source), Some(target)) = (
            circuit.component_index(&wire.from.comp),
            circuit.component_index(&wire.to.comp),
        ) else {
            continue;
        };
        let (Some(port), Some(target_port)) = (
            circuit.components[source].port_index(&wire.from.port),
            circuit.components[target].port_index(&wire.to.port),
        ) else {
            continue;
        };
        routes[source].push(Route {
            port,
            target,
            target_port,
        });
    }
    routes
}

/// Reverse postorder of a depth-first walk over the routes. Undriven
/// components are roots first, then the rest in insertion order.
fn flow_order(routes: &[Vec<Route>]) -> Vec<usize> {
    let count = routes.len();
    let mut driven = vec![false; count];
    for route in routes.iter().flatten() {
        driven[route.target] = true;
    }
    let roots = (0..count)
        .filter(|&i| !driven[i])
        .chain((0..count).filter(|&i| driven[i]));

    let mut visited = vec![false; count];
    let mut postorder = Vec::with_capacity(count);
    for root in roots {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        let mut stack = vec![(root, 0usize)];
        while let Some((node, next)) = stack.last_mut() {
            match routes[*node].get(*next) {
                Some(route) => {
                    *next += 1;
                    let target = route.target;
                    if !visited[target] {
                        visited[target] = true;
                        stack.push((target, 0));
                    }
                }
                None => {
                    postorder.push(*node);
                    stack.pop();
                }
            }
        }
    }
    postorder.reverse();
    postorder
}

/// Phase 1: sample clocks and advance clock sources, recursively.
fn begin_step(circuit: &mut Circuit) {
    for component in circuit.components.iter_mut() {
        let clk = component.input_bits("clk");
        match &mut component.kind {
            ComponentKind::Dff(state) => state.sampled_clock = clk,
            ComponentKind::Ram(memory) => memory.sampled_clock = clk,
            ComponentKind::Fsm(fsm) => fsm.sampled_clock = clk,
            ComponentKind::Clock(clock) => clock.advance(),
            ComponentKind::Custom(instance) => begin_step(&mut instance.circuit),
            _ => {}
        }
    }
}

/// Phase 3: gather updates for every element that saw a rising clock.
fn collect_updates(circuit: &Circuit, path: &mut Vec<usize>, out: &mut Vec<PendingUpdate>) {
    for (index, component) in circuit.components.iter().enumerate() {
        let clk = component.input_bits("clk");
        let update = match &component.kind {
            ComponentKind::Dff(state) if rising_edge(state.sampled_clock, clk) => {
                Some(StateUpdate::Latch(component.input_bits("d")))
            }
            ComponentKind::Ram(memory)
                if rising_edge(memory.sampled_clock, clk) && component.input_bits("we") != 0 =>
            {
                Some(StateUpdate::Write {
                    addr: component.input_bits("addr"),
                    value: component.input_bits("data_in"),
                })
            }
            ComponentKind::Fsm(fsm) if rising_edge(fsm.sampled_clock, clk) => {
                let lookup = |name: &str| component.port(name).map(|p| p.bits());
                Some(StateUpdate::Enter(fsm.next_state(&lookup)))
            }
            ComponentKind::Custom(instance) => {
                path.push(index);
                collect_updates(&instance.circuit, path, out);
                path.pop();
                None
            }
            _ => None,
        };
        if let Some(update) = update {
            let mut at = path.clone();
            at.push(index);
            out.push(PendingUpdate { path: at, update });
        }
    }
}

fn invariant(message: String) -> CircuitError {
    CircuitError::SimulationInvariant(message)
}

/// Verify an update still addresses a component of the right kind, so that
/// no update is applied unless all of them can be.
fn check_update(circuit: &Circuit, pending: &PendingUpdate) -> Result<()> {
    let (last, parents) = pending
        .path
        .split_last()
        .ok_or_else(|| invariant("empty update path".into()))?;
    let mut scope = circuit;
    for &index in parents {
        match scope.components.get(index).map(|c| &c.kind) {
            Some(ComponentKind::Custom(instance)) => scope = &instance.circuit,
            _ => return Err(invariant(format!("update path {:?} leaves the hierarchy", pending.path))),
        }
    }
    let component = scope
        .components
        .get(*last)
        .ok_or_else(|| invariant(format!("update path {:?} has no target", pending.path)))?;
    match (&component.kind, pending.update) {
        (ComponentKind::Dff(_), StateUpdate::Latch(_))
        | (ComponentKind::Ram(_), StateUpdate::Write { .. }) => Ok(()),
        (ComponentKind::Fsm(fsm), StateUpdate::Enter(next)) if next < fsm.state_count() => Ok(()),
        _ => Err(invariant(format!(
            "update {:?} does not fit {} '{}'",
            pending.update,
            component.type_name(),
            component.id
        ))),
    }
}

fn scope_mut<'a>(circuit: &'a mut Circuit, parents: &[usize]) -> Result<&'a mut Circuit> {
    let mut scope = circuit;
    for &index in parents {
        let component = scope
            .components
            .get_mut(index)
            .ok_or_else(|| invariant(format!("no component at index {}", index)))?;
        match &mut component.kind {
            ComponentKind::Custom(instance) => scope = &mut instance.circuit,
            _ => return Err(invariant(format!("'{}' is not a custom instance", component.id))),
        }
    }
    Ok(scope)
}

/// Phase 4: apply one checked update. Returns true when state changed.
fn apply_update(circuit: &mut Circuit, pending: PendingUpdate) -> Result<bool> {
    let (last, parents) = pending
        .path
        .split_last()
        .ok_or_else(|| invariant("empty update path".into()))?;
    let scope = scope_mut(circuit, parents)?;
    let component = scope
        .components
        .get_mut(*last)
        .ok_or_else(|| invariant(format!("no component at index {}", last)))?;
    match (&mut component.kind, pending.update) {
        (ComponentKind::Dff(state), StateUpdate::Latch(value)) => {
            let changed = state.latched != value;
            state.latched = value;
            Ok(changed)
        }
        (ComponentKind::Ram(memory), StateUpdate::Write { addr, value }) => Ok(memory.write(addr, value)),
        (ComponentKind::Fsm(fsm), StateUpdate::Enter(next)) => {
            let changed = fsm.current() != next;
            fsm.set_current(next)?;
            Ok(changed)
        }
        (_, update) => Err(invariant(format!("update {:?} lost its target", update))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{ComponentSpec, Properties};
    use crate::params::{ParamEnv, ParamExpr};

    fn add(circuit: &mut Circuit, spec: ComponentSpec) {
        circuit
            .add_component(Component::primitive(&spec, &ParamEnv::new()).unwrap())
            .unwrap();
    }

    fn observed(circuit: &Circuit, id: &str) -> Signal {
        circuit.component(id).unwrap().observed()
    }

    #[test]
    fn test_acyclic_settles_to_composition() {
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("y", "OUTPUT", 6, 0));
        add(&mut circuit, ComponentSpec::new("or", "OR", 4, 0));
        add(&mut circuit, ComponentSpec::new("and", "AND", 2, 0));
        add(&mut circuit, ComponentSpec::new("a", "INPUT", 0, 0));
        add(&mut circuit, ComponentSpec::new("b", "INPUT", 0, 1));
        add(&mut circuit, ComponentSpec::new("c", "INPUT", 0, 2));
        circuit.connect(("a", "out"), ("and", "in0"), 1).unwrap();
        circuit.connect(("b", "out"), ("and", "in1"), 1).unwrap();
        circuit.connect(("and", "out"), ("or", "in0"), 1).unwrap();
        circuit.connect(("c", "out"), ("or", "in1"), 1).unwrap();
        circuit.connect(("or", "out"), ("y", "in"), 1).unwrap();

        let engine = Engine::new();
        for bits in 0..8u64 {
            let (a, b, c) = (bits & 1, (bits >> 1) & 1, (bits >> 2) & 1);
            circuit.set_input("a", a).unwrap();
            circuit.set_input("b", b).unwrap();
            circuit.set_input("c", c).unwrap();
            let stats = engine.step(&mut circuit).unwrap();
            assert!(stats.settle.converged);
            assert_eq!(observed(&circuit, "y"), Signal::Value((a & b) | c));
        }
    }

    #[test]
    fn test_single_inverter_loop_hits_cap_and_toggles() {
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("n", "NOT", 0, 0));
        add(&mut circuit, ComponentSpec::new("y", "OUTPUT", 2, 0));
        circuit.connect(("n", "out"), ("n", "in"), 1).unwrap();
        circuit.connect(("n", "out"), ("y", "in"), 1).unwrap();

        let engine = Engine::new();
        let first = engine.step(&mut circuit).unwrap();
        assert!(!first.settle.converged);
        assert_eq!(first.settle.passes, SETTLE_PASS_CAP);
        let a = observed(&circuit, "y");
        engine.step(&mut circuit).unwrap();
        let b = observed(&circuit, "y");
        engine.step(&mut circuit).unwrap();
        let c = observed(&circuit, "y");
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_flow_order_walks_loops_as_chains() {
        // n0 -> n1 -> n2 -> n0, inserted as n0, n2, n1
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("n0", "NOT", 0, 0));
        add(&mut circuit, ComponentSpec::new("n2", "NOT", 4, 0));
        add(&mut circuit, ComponentSpec::new("n1", "NOT", 2, 0));
        circuit.connect(("n0", "out"), ("n1", "in"), 1).unwrap();
        circuit.connect(("n1", "out"), ("n2", "in"), 1).unwrap();
        circuit.connect(("n2", "out"), ("n0", "in"), 1).unwrap();
        assert_eq!(flow_order(&routes(&circuit)), vec![0, 2, 1]);

        // a driver entering a loop roots the walk at the entry gate
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("x0", "NOT", 0, 0));
        add(&mut circuit, ComponentSpec::new("g", "AND", 2, 0));
        add(&mut circuit, ComponentSpec::new("x1", "NOT", 4, 0));
        add(&mut circuit, ComponentSpec::new("a", "INPUT", 0, 2));
        circuit.connect(("g", "out"), ("x0", "in"), 1).unwrap();
        circuit.connect(("x0", "out"), ("x1", "in"), 1).unwrap();
        circuit.connect(("x1", "out"), ("g", "in1"), 1).unwrap();
        circuit.connect(("a", "out"), ("g", "in0"), 1).unwrap();
        assert_eq!(flow_order(&routes(&circuit)), vec![3, 1, 0, 2]);
    }

    #[test]
    fn test_ring_keeps_toggling_beside_state_updates() {
        let mut circuit = Circuit::new();
        for id in ["r0", "r1", "r2"] {
            add(&mut circuit, ComponentSpec::new(id, "NOT", 0, 0));
        }
        add(&mut circuit, ComponentSpec::new("clk", "CLOCK", 0, 2));
        add(&mut circuit, ComponentSpec::new("ff", "DFF", 2, 2));
        circuit.connect(("r0", "out"), ("r1", "in"), 1).unwrap();
        circuit.connect(("r1", "out"), ("r2", "in"), 1).unwrap();
        circuit.connect(("r2", "out"), ("r0", "in"), 1).unwrap();
        circuit.connect(("clk", "out"), ("ff", "clk"), 1).unwrap();
        circuit.connect(("ff", "qn"), ("ff", "d"), 1).unwrap();

        let engine = Engine::new();
        let mut ring = Vec::new();
        for _ in 0..6 {
            let stats = engine.step(&mut circuit).unwrap();
            if let Some(resettle) = stats.resettle {
                assert_eq!(resettle.passes % 2, 0);
            }
            ring.push(observed(&circuit, "r2"));
        }
        for t in 0..4 {
            assert_ne!(ring[t], ring[t + 1], "tick {}", t);
            assert_eq!(ring[t], ring[t + 2], "tick {}", t);
        }
    }

    #[test]
    fn test_dff_latches_on_rising_edge_only() {
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("d", "INPUT", 0, 0).with_width(4));
        add(&mut circuit, ComponentSpec::new("clk", "INPUT", 0, 1));
        add(&mut circuit, ComponentSpec::new("ff", "DFF", 2, 0).with_width(4));
        circuit.connect(("d", "out"), ("ff", "d"), 4).unwrap();
        circuit.connect(("clk", "out"), ("ff", "clk"), 1).unwrap();

        let engine = Engine::new();
        circuit.set_input("d", 9).unwrap();
        engine.step(&mut circuit).unwrap();
        assert_eq!(circuit.signal("ff.q"), Some(Signal::Value(0)));

        circuit.set_input("clk", 1).unwrap();
        let stats = engine.step(&mut circuit).unwrap();
        assert!(stats.state_changed);
        assert!(stats.resettle.is_some());
        assert_eq!(circuit.signal("ff.q"), Some(Signal::Value(9)));
        assert_eq!(circuit.signal("ff.qn"), Some(Signal::Value(6)));

        // high clock, new data: no edge
        circuit.set_input("d", 3).unwrap();
        engine.step(&mut circuit).unwrap();
        assert_eq!(circuit.signal("ff.q"), Some(Signal::Value(9)));
    }

    #[test]
    fn test_clock_source_drives_toggle_flop() {
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("clk", "CLOCK", 0, 0));
        add(&mut circuit, ComponentSpec::new("ff", "DFF", 2, 0));
        circuit.connect(("clk", "out"), ("ff", "clk"), 1).unwrap();
        circuit.connect(("ff", "qn"), ("ff", "d"), 1).unwrap();

        let engine = Engine::new();
        let mut samples = Vec::new();
        for _ in 0..8 {
            engine.step(&mut circuit).unwrap();
            samples.push(circuit.signal("ff.q").unwrap().bits());
        }
        // rising edge every second step halves the clock
        assert_eq!(samples, vec![1, 1, 0, 0, 1, 1, 0, 0]);
    }

    #[test]
    fn test_fsm_advances_on_clock() {
        let fsm: crate::primitives::FsmSpec = serde_json::from_str(
            r#"{"states":[{"id":"IDLE","output":0},{"id":"RUN","output":5}],
                "transitions":[{"from":"IDLE","to":"RUN","when":"in0==1"},{"from":"RUN","to":"IDLE","when":"in0==0"}]}"#,
        )
        .unwrap();
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("go", "INPUT", 0, 0));
        add(&mut circuit, ComponentSpec::new("clk", "INPUT", 0, 1));
        add(
            &mut circuit,
            ComponentSpec::new("m", "FSM", 2, 0).with_property(|p: &mut Properties| {
                p.bit_width = Some(ParamExpr::Literal(4));
                p.fsm = Some(fsm);
            }),
        );
        circuit.connect(("go", "out"), ("m", "in0"), 1).unwrap();
        circuit.connect(("clk", "out"), ("m", "clk"), 1).unwrap();

        let engine = Engine::new();
        circuit.set_input("go", 1).unwrap();
        engine.step(&mut circuit).unwrap();
        assert_eq!(circuit.signal("m"), Some(Signal::Value(0)));
        circuit.set_input("clk", 1).unwrap();
        engine.step(&mut circuit).unwrap();
        assert_eq!(circuit.signal("m"), Some(Signal::Value(5)));
        circuit.set_input("clk", 0).unwrap();
        circuit.set_input("go", 0).unwrap();
        engine.step(&mut circuit).unwrap();
        assert_eq!(circuit.signal("m"), Some(Signal::Value(5)));
    }

    #[test]
    fn test_mux_selects_input() {
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("s", "INPUT", 0, 0));
        add(&mut circuit, ComponentSpec::new("a", "CONST", 0, 1).with_width(8).with_property(|p| p.value = Some(0x11)));
        add(&mut circuit, ComponentSpec::new("b", "CONST", 0, 2).with_width(8).with_property(|p| p.value = Some(0x22)));
        add(&mut circuit, ComponentSpec::new("m", "MUX", 2, 0).with_width(8));
        circuit.connect(("s", "out"), ("m", "sel"), 1).unwrap();
        circuit.connect(("a", "out"), ("m", "in0"), 8).unwrap();
        circuit.connect(("b", "out"), ("m", "in1"), 8).unwrap();

        let engine = Engine::new();
        engine.settle(&mut circuit);
        assert_eq!(circuit.signal("m"), Some(Signal::Value(0x11)));
        circuit.set_input("s", 1).unwrap();
        engine.settle(&mut circuit);
        assert_eq!(circuit.signal("m"), Some(Signal::Value(0x22)));
    }

    #[test]
    fn test_undriven_input_stays_floating() {
        let mut circuit = Circuit::new();
        add(&mut circuit, ComponentSpec::new("y", "OUTPUT", 0, 0));
        Engine::new().settle(&mut circuit);
        assert_eq!(observed(&circuit, "y"), Signal::Floating);
    }
}
