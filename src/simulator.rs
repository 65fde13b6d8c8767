use log::{debug, info};
use serde::Serialize;
use std::path::Path;

use crate::assembler::Assembler;
use crate::circuit::{mask, Circuit, ComponentKind, ComponentSpec, ComponentView, PortRef, Position, Signal, WireSpec};
use crate::engine::{Engine, SETTLE_PASS_CAP};
use crate::error::{CircuitError, Result};
use crate::history::{Command, History};
use crate::netlist::{self, Bundle, DrcViolation, Net, NetAnalyzer};
use crate::params::ParamExpr;
use crate::project::ProjectRecord;
use crate::subcircuit::{DefinitionSpec, Workspace};
use crate::testbench::{self, Breakpoint, BreakpointHit, BreakpointSet, TestbenchReport, TestbenchStep};
use crate::verilog;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Settle passes per phase before a combinational loop is cut off
    pub settle_pass_cap: usize,
    /// Undo entries kept; older ones are dropped
    pub history_limit: usize,
    /// Upper bound on tick-steps for one `run_free` call
    pub free_run_step_limit: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            settle_pass_cap: SETTLE_PASS_CAP,
            history_limit: 256,
            free_run_step_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Csv,
    Json,
}

/// OUTPUT values recorded after every tick-step
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    pub signals: Vec<String>,
    pub rows: Vec<TraceRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRow {
    pub tick: u64,
    pub values: Vec<Signal>,
}

/// One simulation session: the graph, its library, history, derived nets,
/// testbench and breakpoints. Sessions share nothing.
pub struct Simulator {
    workspace: Workspace,
    engine: Engine,
    history: History,
    analyzer: NetAnalyzer,
    testbench: Vec<TestbenchStep>,
    breakpoints: BreakpointSet,
    last_hit: Option<BreakpointHit>,
    run_state: RunState,
    tick: u64,
    trace: Option<Trace>,
    config: SimulatorConfig,
}

impl Simulator {
    /// Create a new simulator with default configuration
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    /// Create a new simulator with custom configuration
    pub fn with_config(config: SimulatorConfig) -> Self {
        Simulator {
            workspace: Workspace::default(),
            engine: Engine::with_pass_cap(config.settle_pass_cap),
            history: History::new(config.history_limit),
            analyzer: NetAnalyzer::new(),
            testbench: Vec::new(),
            breakpoints: BreakpointSet::new(),
            last_hit: None,
            run_state: RunState::Running,
            tick: 0,
            trace: None,
            config,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The main graph, which is what ticks advance
    pub fn circuit(&self) -> &Circuit {
        &self.workspace.main
    }

    /// The graph structural edits apply to
    pub fn active_circuit(&self) -> &Circuit {
        self.workspace.active()
    }

    /// Discard everything and start from an empty graph.
    pub fn reset(&mut self) {
        debug!("Resetting session");
        self.workspace = Workspace::default();
        self.history.clear();
        self.analyzer.invalidate();
        self.testbench.clear();
        self.breakpoints.clear();
        self.last_hit = None;
        self.run_state = RunState::Running;
        self.tick = 0;
        self.trace = None;
    }

    /// Replace the session with a project. On error the session is left
    /// exactly as it was.
    pub fn load(&mut self, project: &ProjectRecord) -> Result<()> {
        let mut workspace = project.build()?;
        let stats = self.engine.settle(&mut workspace.main);
        self.reset();
        self.workspace = workspace;
        info!(
            "Loaded project: {} components, {} wires, {} definitions (initial settle: {} passes)",
            self.workspace.main.components().len(),
            self.workspace.main.wires().len(),
            self.workspace.library.len(),
            stats.passes
        );
        Ok(())
    }

    pub fn load_json(&mut self, text: &str) -> Result<()> {
        self.load(&ProjectRecord::from_json(text)?)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading project from: {}", path.display());
        self.load(&ProjectRecord::read_file(path)?)
    }

    pub fn save(&self) -> ProjectRecord {
        ProjectRecord::capture(&self.workspace)
    }

    fn step_once(&mut self) -> Result<()> {
        self.engine.step(&mut self.workspace.main)?;
        self.tick += 1;
        if let Some(trace) = &mut self.trace {
            let main = &self.workspace.main;
            trace.rows.push(TraceRow {
                tick: self.tick,
                values: trace
                    .signals
                    .iter()
                    .map(|id| main.signal(id).unwrap_or_default())
                    .collect(),
            });
        }
        Ok(())
    }

    /// Advance `n` tick-steps under caller control. Breakpoints are not
    /// consulted.
    pub fn tick(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.step_once()?;
        }
        Ok(())
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Drive an INPUT of the main graph. Takes effect on the next tick.
    pub fn set_input(&mut self, id: &str, value: u64) -> Result<()> {
        self.workspace.main.set_input(id, value)
    }

    pub fn read_component(&self, id: &str) -> Result<ComponentView> {
        self.workspace
            .active()
            .component(id)
            .map(|c| c.view())
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))
    }

    pub fn read_signal(&self, name: &str) -> Option<Signal> {
        self.workspace.active().signal(name)
    }

    /// Register (or replace) a definition. Replacing one re-expands every
    /// instance built from it.
    pub fn register_custom_tool(&mut self, definition: impl Into<DefinitionSpec>) -> Result<()> {
        let spec = definition.into();
        let name = spec.name.clone();
        if self.workspace.library.register(spec)? {
            let count = self.workspace.refresh(&name)?;
            info!("Definition '{}' replaced; re-expanded {} instance(s)", name, count);
        }
        self.analyzer.invalidate();
        Ok(())
    }

    pub fn enter_custom_edit(&mut self, name: &str) -> Result<()> {
        self.workspace.enter_edit(name)?;
        self.analyzer.invalidate();
        Ok(())
    }

    /// Leave the edit context; returns the number of main-graph instances
    /// re-expanded.
    pub fn exit_custom_edit(&mut self) -> Result<usize> {
        let count = self.workspace.exit_edit()?;
        self.analyzer.invalidate();
        Ok(count)
    }

    pub fn editing(&self) -> Option<&str> {
        self.workspace.editing()
    }

    fn scope(&self) -> Option<String> {
        self.workspace.editing().map(str::to_string)
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        command.apply(self.workspace.active_mut())?;
        let scope = self.scope();
        self.history.record(scope, command);
        Ok(())
    }

    fn record(&mut self, command: Command) {
        let scope = self.scope();
        self.history.record(scope, command);
    }

    pub fn add_component(&mut self, spec: &ComponentSpec) -> Result<()> {
        let component = self.workspace.build_component(spec)?;
        let index = self.workspace.active().components().len();
        self.execute(Command::AddComponent { index, component })
    }

    /// Remove a component together with its wires.
    pub fn remove_component(&mut self, id: &str) -> Result<()> {
        let (index, component, wires) = self.workspace.active_mut().remove_component(id)?;
        self.record(Command::RemoveComponent { index, component, wires });
        Ok(())
    }

    /// Add a wire; returns its id.
    pub fn add_wire(&mut self, spec: &WireSpec) -> Result<String> {
        let env = self.workspace.active_env();
        let circuit = self.workspace.active_mut();
        let wire = circuit.wire_from_spec(spec, &env)?;
        let id = wire.id.clone();
        let index = circuit.wires().len();
        self.execute(Command::AddWire { index, wire })?;
        Ok(id)
    }

    pub fn remove_wire(&mut self, id: &str) -> Result<()> {
        let (index, wire) = self.workspace.active_mut().remove_wire(id)?;
        self.record(Command::RemoveWire { index, wire });
        Ok(())
    }

    pub fn reconnect_wire(&mut self, id: &str, from: PortRef, to: PortRef) -> Result<()> {
        let before = self
            .workspace
            .active_mut()
            .reconnect_wire(id, from.clone(), to.clone())?;
        self.record(Command::Reconnect {
            id: id.to_string(),
            before,
            after: (from, to),
        });
        Ok(())
    }

    pub fn move_component(&mut self, id: &str, x: i32, y: i32) -> Result<()> {
        let to = Position::new(x, y);
        let from = self.workspace.active_mut().move_component(id, to)?;
        self.record(Command::MoveComponent {
            id: id.to_string(),
            from,
            to,
        });
        Ok(())
    }

    /// Edit one property (`bitWidth`, `inputs`, `size`, `value`, or a
    /// custom instance's parameter) and rebuild the component. Existing
    /// wires are kept even if widths no longer agree; `run_drc` reports them.
    pub fn set_parameter(&mut self, id: &str, name: &str, value: ParamExpr) -> Result<()> {
        let before = self
            .workspace
            .active()
            .component(id)
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))?
            .clone();
        let mut spec = before.spec();
        let properties = &mut spec.properties;
        match name {
            "bitWidth" => properties.bit_width = Some(value),
            "inputs" => properties.inputs = Some(value),
            "size" => properties.size = Some(value),
            "value" => {
                let v = value.eval(&self.workspace.active_env())?;
                properties.value = Some(v.max(0) as u64);
            }
            other if matches!(before.kind, ComponentKind::Custom(_)) => {
                properties.parameters.insert(other.to_string(), value);
            }
            other => {
                return Err(CircuitError::InvalidParameter {
                    name: other.to_string(),
                    context: format!("component '{}'", id),
                    reason: format!("{} has no such property", before.type_name()),
                })
            }
        }
        let mut after = self.workspace.build_component(&spec)?;
        after.adopt_state(&before);
        if name == "value" {
            if let (ComponentKind::Input { value }, Some(v)) = (&mut after.kind, spec.properties.value) {
                *value = v & mask(after.ports[0].width);
            }
        }
        self.execute(Command::ReplaceComponent { before, after })
    }

    /// Undo the latest edit. Returns false when there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        match self.history.undo(&mut self.workspace)? {
            Some(scope) => {
                self.after_replay(scope)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool> {
        match self.history.redo(&mut self.workspace)? {
            Some(scope) => {
                self.after_replay(scope)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // A replayed edit inside a closed definition reaches its instances now;
    // an open one waits for exit_custom_edit like any other edit.
    fn after_replay(&mut self, scope: Option<String>) -> Result<()> {
        if let Some(name) = scope {
            if self.workspace.editing() != Some(name.as_str()) {
                self.workspace.refresh(&name)?;
            }
        }
        Ok(())
    }

    pub fn set_net_name(&mut self, wire: &str, name: &str) -> Result<()> {
        let scope = self.scope();
        self.analyzer
            .set_net_name(self.workspace.active_mut(), scope.as_deref(), wire, name)
    }

    pub fn get_net_name(&mut self, wire: &str) -> Result<Option<String>> {
        let scope = self.scope();
        self.analyzer
            .get_net_name(self.workspace.active(), scope.as_deref(), wire)
    }

    pub fn list_nets(&mut self) -> Vec<Net> {
        let scope = self.scope();
        self.analyzer.nets(self.workspace.active(), scope.as_deref())
    }

    pub fn run_drc(&self) -> Vec<DrcViolation> {
        netlist::run_drc(self.workspace.active())
    }

    pub fn bundle_wire(&mut self, wire: &str, name: &str, width: u32) -> Result<()> {
        netlist::bundle_wire(self.workspace.active_mut(), wire, name, width)
    }

    pub fn list_bundles(&self) -> Vec<Bundle> {
        netlist::list_bundles(self.workspace.active())
    }

    /// Overwrite a ROM/RAM directly. Words past the end of `words` are
    /// cleared.
    pub fn load_memory(&mut self, id: &str, words: &[u64]) -> Result<()> {
        let component = self
            .workspace
            .active_mut()
            .component_mut(id)
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))?;
        match &mut component.kind {
            ComponentKind::Rom(memory) | ComponentKind::Ram(memory) => memory.load(words, id)?,
            _ => return Err(CircuitError::UnknownComponent(id.to_string())),
        }
        debug!("Loaded {} word(s) into '{}'", words.len(), id);
        Ok(())
    }

    /// Assemble `source` and load the bytes into memory `id`. Returns the
    /// number of bytes loaded.
    pub fn load_assembly(&mut self, id: &str, assembler: &Assembler, source: &str) -> Result<usize> {
        let bytes = assembler.assemble(source)?;
        let words: Vec<u64> = bytes.iter().map(|b| *b as u64).collect();
        self.load_memory(id, &words)?;
        Ok(bytes.len())
    }

    pub fn set_testbench(&mut self, steps: Vec<TestbenchStep>) {
        self.testbench = steps;
    }

    pub fn testbench(&self) -> &[TestbenchStep] {
        &self.testbench
    }

    /// Run the testbench from the current state. Nothing is reset first.
    pub fn run_testbench(&mut self) -> Result<TestbenchReport> {
        let report = testbench::run(&self.testbench, &mut self.workspace.main, &self.engine)?;
        self.tick += report.ticks_run;
        Ok(report)
    }

    pub fn add_breakpoint(&mut self, expression: &str) -> Result<usize> {
        self.breakpoints.add(expression)
    }

    pub fn list_breakpoints(&self) -> &[Breakpoint] {
        self.breakpoints.list()
    }

    pub fn remove_breakpoint(&mut self, id: usize) -> bool {
        self.breakpoints.remove(id)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn last_breakpoint_hit(&self) -> Option<&BreakpointHit> {
        self.last_hit.as_ref()
    }

    pub fn pause(&mut self) {
        self.run_state = RunState::Paused;
    }

    pub fn resume(&mut self) {
        self.run_state = RunState::Running;
    }

    pub fn is_paused(&self) -> bool {
        self.run_state == RunState::Paused
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Free-running scheduler: one tick-step at a time, checking every
    /// breakpoint after each, until paused or `max_steps` (capped by
    /// `free_run_step_limit`). Returns the number of steps run.
    pub fn run_free(&mut self, max_steps: usize) -> Result<usize> {
        let bound = max_steps.min(self.config.free_run_step_limit);
        let mut steps = 0;
        while steps < bound && !self.is_paused() {
            self.step_once()?;
            steps += 1;
            if let Some(hit) = self.breakpoints.check(&self.workspace.main, self.tick) {
                info!(
                    "Breakpoint {} ({}) hit at tick {}",
                    hit.breakpoint, hit.expression, hit.tick
                );
                self.last_hit = Some(hit);
                self.run_state = RunState::Paused;
            }
        }
        Ok(steps)
    }

    /// Verilog for the main graph and every definition it uses.
    pub fn export_verilog(&self, module: &str) -> String {
        verilog::emit_design(&self.workspace.main, &self.workspace.library, module)
    }

    /// Start recording OUTPUT values after every tick-step.
    pub fn enable_trace(&mut self) {
        self.trace = Some(Trace {
            signals: self.workspace.main.output_ids(),
            rows: Vec::new(),
        });
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// Export the recorded trace to file
    pub fn export_trace(&self, filename: &str, format: TraceFormat) -> anyhow::Result<()> {
        let trace = self
            .trace
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No trace recorded"))?;

        match format {
            TraceFormat::Csv => self.export_csv(trace, filename),
            TraceFormat::Json => self.export_json(trace, filename),
        }
    }

    fn export_csv(&self, trace: &Trace, filename: &str) -> anyhow::Result<()> {
        use csv::Writer;
        use std::fs::File;

        let file = File::create(filename)?;
        let mut writer = Writer::from_writer(file);

        let mut header = vec!["tick".to_string()];
        header.extend(trace.signals.iter().cloned());
        writer.write_record(&header)?;

        for row in &trace.rows {
            let mut record = vec![row.tick.to_string()];
            record.extend(row.values.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        info!("Trace exported to CSV: {}", filename);
        Ok(())
    }

    fn export_json(&self, trace: &Trace, filename: &str) -> anyhow::Result<()> {
        use std::fs::File;

        let file = File::create(filename)?;
        serde_json::to_writer_pretty(file, trace)?;

        info!("Trace exported to JSON: {}", filename);
        Ok(())
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
