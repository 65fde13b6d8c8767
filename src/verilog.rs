//! Verilog export of a finished graph.
//!
//! INPUT and OUTPUT components become module ports, every other component
//! output becomes a `wire` (or `reg` for state) named `<component>_<port>`.
//! CLOCK sources are emitted as free-running behavioural registers.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

use crate::circuit::{Circuit, Component, ComponentKind, GateOp, PortRef};
use crate::primitives::address_width;
use crate::subcircuit::Library;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref NON_IDENTIFIER: Regex = Regex::new(r"[^A-Za-z0-9_]").unwrap();
}

const KEYWORDS: &[&str] = &[
    "always", "assign", "begin", "case", "else", "end", "endcase", "endmodule", "if", "initial", "input",
    "module", "output", "reg", "wire",
];

/// A valid Verilog identifier for `name`: whitespace dropped, other
/// non-identifier characters replaced with `_`, a leading digit prefixed.
pub fn sanitize_identifier(name: &str) -> String {
    let compact = WHITESPACE.replace_all(name, "");
    let mut ident = NON_IDENTIFIER.replace_all(&compact, "_").into_owned();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

fn range(width: u32) -> String {
    if width > 1 {
        format!("[{}:0] ", width - 1)
    } else {
        String::new()
    }
}

fn net(component: &Component, port: &str) -> String {
    match component.kind {
        ComponentKind::Input { .. } => sanitize_identifier(&component.id),
        _ => sanitize_identifier(&format!("{}_{}", component.id, port)),
    }
}

/// Expression feeding input `port` of `comp`; undriven inputs read 0.
fn source(circuit: &Circuit, comp: &str, port: &str, width: u32) -> String {
    circuit
        .driver_of(&PortRef::new(comp, port))
        .and_then(|w| circuit.component(&w.from.comp).map(|c| net(c, &w.from.port)))
        .unwrap_or_else(|| format!("{}'d0", width))
}

fn gate_expr(op: GateOp, operands: &[String]) -> String {
    let join = |sep: &str| operands.join(sep);
    match op {
        GateOp::Buffer => operands.join(""),
        GateOp::Not => format!("~{}", operands.join("")),
        GateOp::And => join(" & "),
        GateOp::Or => join(" | "),
        GateOp::Xor => join(" ^ "),
        GateOp::Nand => format!("~({})", join(" & ")),
        GateOp::Nor => format!("~({})", join(" | ")),
        GateOp::Xnor => format!("~({})", join(" ^ ")),
    }
}

struct ModuleWriter<'a> {
    circuit: &'a Circuit,
    ports: Vec<String>,
    decls: Vec<String>,
    body: Vec<String>,
}

impl<'a> ModuleWriter<'a> {
    fn new(circuit: &'a Circuit) -> Self {
        ModuleWriter {
            circuit,
            ports: Vec::new(),
            decls: Vec::new(),
            body: Vec::new(),
        }
    }

    fn width(component: &Component, port: &str) -> u32 {
        component.port(port).map(|p| p.width).unwrap_or(1)
    }

    fn src(&self, component: &Component, port: &str) -> String {
        source(self.circuit, &component.id, port, Self::width(component, port))
    }

    fn wire(&mut self, component: &Component, port: &str, value: String) {
        let name = net(component, port);
        self.decls
            .push(format!("  wire {}{};", range(Self::width(component, port)), name));
        self.body.push(format!("  assign {} = {};", name, value));
    }

    fn component(&mut self, component: &Component) {
        let id = &component.id;
        match &component.kind {
            ComponentKind::Input { .. } => {}
            ComponentKind::Output => {
                let value = self.src(component, "in");
                self.body
                    .push(format!("  assign {} = {};", sanitize_identifier(id), value));
            }
            ComponentKind::Constant { value } => {
                let width = Self::width(component, "out");
                self.wire(component, "out", format!("{}'h{:x}", width, value));
            }
            ComponentKind::Clock(_) => {
                let name = net(component, "out");
                self.decls.push(format!("  reg {} = 1'b0;", name));
                self.body.push(format!("  always #1 {} = ~{};", name, name));
            }
            ComponentKind::Gate(op) => {
                let operands: Vec<String> = component
                    .inputs()
                    .map(|p| self.src(component, &p.name))
                    .collect();
                self.wire(component, "out", gate_expr(*op, &operands));
            }
            ComponentKind::Mux => {
                let sel = self.src(component, "sel");
                let choices: Vec<String> = component
                    .inputs()
                    .filter(|p| p.name != "sel")
                    .map(|p| self.src(component, &p.name))
                    .collect();
                let mut expr = choices.last().cloned().unwrap_or_default();
                for (i, choice) in choices.iter().enumerate().rev().skip(1) {
                    expr = format!("({} == {}) ? {} : {}", sel, i, choice, expr);
                }
                self.wire(component, "out", expr);
            }
            ComponentKind::Dff(_) => {
                let width = Self::width(component, "q");
                let q = net(component, "q");
                let (clk, d) = (self.src(component, "clk"), self.src(component, "d"));
                self.decls.push(format!("  reg {}{} = {}'d0;", range(width), q, width));
                self.body.push(format!("  always @(posedge {}) {} <= {};", clk, q, d));
                self.wire(component, "qn", format!("~{}", q));
            }
            ComponentKind::Rom(memory) | ComponentKind::Ram(memory) => {
                let mem = sanitize_identifier(&format!("{}_mem", id));
                self.decls.push(format!(
                    "  reg {}{} [0:{}];",
                    range(memory.width()),
                    mem,
                    memory.capacity() - 1
                ));
                let init: Vec<String> = memory
                    .words()
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| **w != 0)
                    .map(|(i, w)| format!("    {}[{}] = {}'h{:x};", mem, i, memory.width(), w))
                    .collect();
                if !init.is_empty() {
                    self.body.push("  initial begin".to_string());
                    self.body.extend(init);
                    self.body.push("  end".to_string());
                }
                let addr = self.src(component, "addr");
                if let ComponentKind::Ram(_) = component.kind {
                    let write = format!(
                        "  always @(posedge {}) if ({}) {}[{}] <= {};",
                        self.src(component, "clk"),
                        self.src(component, "we"),
                        mem,
                        addr,
                        self.src(component, "data_in")
                    );
                    self.body.push(write);
                }
                self.wire(component, "data", format!("{}[{}]", mem, addr));
            }
            ComponentKind::Fsm(fsm) => {
                let state = sanitize_identifier(&format!("{}_state", id));
                let bits = address_width(fsm.state_count());
                self.decls.push(format!(
                    "  reg {}{} = {}'d{};",
                    range(bits),
                    state,
                    bits,
                    fsm.current()
                ));
                let clk = self.src(component, "clk");
                let mut lines = vec![format!("  always @(posedge {}) begin", clk), format!("    case ({})", state)];
                {
                    let rename = |name: &str| self.src(component, name);
                    for index in 0..fsm.state_count() {
                        let mut arms = Vec::new();
                        for (_, to, guard) in fsm.transitions().filter(|(from, _, _)| *from == index) {
                            match guard {
                                Some(guard) => arms.push(format!("if ({}) {} <= {};", guard.render(&rename), state, to)),
                                None => {
                                    arms.push(format!("{} <= {};", state, to));
                                    break;
                                }
                            }
                        }
                        if !arms.is_empty() {
                            lines.push(format!("      {}: {}", index, arms.join(" else ")));
                        }
                    }
                }
                lines.push("    endcase".to_string());
                lines.push("  end".to_string());
                self.body.extend(lines);

                let width = Self::width(component, "out");
                let outputs = fsm.states();
                let mut expr = format!("{}'h{:x}", width, outputs.last().map(|s| s.output).unwrap_or(0));
                for (i, s) in outputs.iter().enumerate().rev().skip(1) {
                    expr = format!("({} == {}) ? {}'h{:x} : {}", state, i, width, s.output, expr);
                }
                self.wire(component, "out", expr);
            }
            ComponentKind::Custom(instance) => {
                let mut connections: Vec<String> = component
                    .inputs()
                    .map(|p| self.src(component, &p.name))
                    .collect();
                let outputs: Vec<(String, u32)> = component
                    .outputs()
                    .map(|p| (net(component, &p.name), p.width))
                    .collect();
                for (name, width) in outputs {
                    self.decls.push(format!("  wire {}{};", range(width), name));
                    connections.push(name);
                }
                self.body.push(format!(
                    "  {} {} ({});",
                    sanitize_identifier(&instance.definition),
                    sanitize_identifier(id),
                    connections.join(", ")
                ));
            }
        }
    }

    fn finish(mut self, name: &str, inputs: &[&Component], outputs: &[&Component]) -> String {
        for input in inputs {
            self.ports.push(format!(
                "input {}{}",
                range(Self::width(input, "out")),
                sanitize_identifier(&input.id)
            ));
        }
        for output in outputs {
            self.ports.push(format!(
                "output {}{}",
                range(Self::width(output, "in")),
                sanitize_identifier(&output.id)
            ));
        }
        let circuit = self.circuit;
        for component in circuit.components() {
            self.component(component);
        }

        let mut out = format!("module {}(", sanitize_identifier(name));
        if self.ports.is_empty() {
            out.push_str(");\n");
        } else {
            out.push('\n');
            out.push_str(&format!("  {}\n);\n", self.ports.join(",\n  ")));
        }
        for line in self.decls.iter().chain(self.body.iter()) {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("endmodule\n");
        out
    }
}

/// One module for `circuit`. INPUTs then OUTPUTs, in insertion order, form
/// the port list.
pub fn emit_verilog(circuit: &Circuit, name: &str) -> String {
    let inputs: Vec<&Component> = circuit
        .components()
        .iter()
        .filter(|c| matches!(c.kind, ComponentKind::Input { .. }))
        .collect();
    let outputs: Vec<&Component> = circuit
        .components()
        .iter()
        .filter(|c| matches!(c.kind, ComponentKind::Output))
        .collect();
    ModuleWriter::new(circuit).finish(name, &inputs, &outputs)
}

fn collect_used(circuit: &Circuit, library: &Library, used: &mut BTreeSet<String>) {
    for component in circuit.components() {
        if let ComponentKind::Custom(instance) = &component.kind {
            if used.insert(instance.definition.clone()) {
                if let Some(definition) = library.get(&instance.definition) {
                    collect_used(&definition.circuit, library, used);
                }
            }
        }
    }
}

/// `circuit` as module `name`, preceded by a module for every definition
/// it instantiates. Definition modules follow pin order and use the
/// definition's default parameter values.
pub fn emit_design(circuit: &Circuit, library: &Library, name: &str) -> String {
    let mut used = BTreeSet::new();
    collect_used(circuit, library, &mut used);

    let mut modules = Vec::new();
    for definition in library.definitions().iter().filter(|d| used.contains(&d.name)) {
        let pins = |ids: Vec<&str>| -> Vec<&Component> {
            ids.into_iter()
                .filter_map(|id| definition.circuit.component(id))
                .collect()
        };
        let inputs = pins(definition.inputs.iter().map(|p| p.component_id.as_str()).collect());
        let outputs = pins(definition.outputs.iter().map(|p| p.component_id.as_str()).collect());
        modules.push(ModuleWriter::new(&definition.circuit).finish(&definition.name, &inputs, &outputs));
    }
    modules.push(emit_verilog(circuit, name));
    modules.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{ComponentSpec, WireSpec};
    use crate::params::ParamEnv;
    use crate::subcircuit::{DefinitionSpec, PinSpec};

    fn place(circuit: &mut Circuit, spec: ComponentSpec) {
        circuit
            .add_component(Component::primitive(&spec, &ParamEnv::new()).unwrap())
            .unwrap();
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("not gate"), "notgate");
        assert_eq!(sanitize_identifier("in-1"), "in_1");
        assert_eq!(sanitize_identifier("4bit adder"), "_4bitadder");
        assert_eq!(sanitize_identifier("module"), "module_");
        assert_eq!(sanitize_identifier(""), "_");
    }

    #[test]
    fn test_inverter_module() {
        let mut circuit = Circuit::new();
        place(&mut circuit, ComponentSpec::new("in-a", "INPUT", 0, 0));
        place(&mut circuit, ComponentSpec::new("inv", "NOT", 2, 0));
        place(&mut circuit, ComponentSpec::new("y", "OUTPUT", 4, 0));
        circuit.connect(("in-a", "out"), ("inv", "in"), 1).unwrap();
        circuit.connect(("inv", "out"), ("y", "in"), 1).unwrap();

        let text = emit_verilog(&circuit, "my chip");
        assert!(text.starts_with("module mychip(\n  input in_a,\n  output y\n);"));
        assert!(text.contains("  wire inv_out;"));
        assert!(text.contains("  assign inv_out = ~in_a;"));
        assert!(text.contains("  assign y = inv_out;"));
        assert!(text.trim_end().ends_with("endmodule"));
    }

    #[test]
    fn test_wide_ports_and_state() {
        let mut circuit = Circuit::new();
        place(&mut circuit, ComponentSpec::new("d", "INPUT", 0, 0).with_width(8));
        place(&mut circuit, ComponentSpec::new("clk", "INPUT", 0, 2));
        place(&mut circuit, ComponentSpec::new("ff", "DFF", 2, 0).with_width(8));
        place(&mut circuit, ComponentSpec::new("q", "OUTPUT", 4, 0).with_width(8));
        circuit.connect(("d", "out"), ("ff", "d"), 8).unwrap();
        circuit.connect(("clk", "out"), ("ff", "clk"), 1).unwrap();
        circuit.connect(("ff", "q"), ("q", "in"), 8).unwrap();

        let text = emit_verilog(&circuit, "reg8");
        assert!(text.contains("input [7:0] d,"));
        assert!(text.contains("input clk,"));
        assert!(text.contains("always @(posedge clk) ff_q <= d;"));
        assert!(text.contains("assign ff_qn = ~ff_q;"));
        assert!(text.contains("assign q = ff_q;"));
    }

    #[test]
    fn test_rom_contents_become_initial_block() {
        let mut circuit = Circuit::new();
        place(
            &mut circuit,
            ComponentSpec::new("rom", "ROM", 0, 0)
                .with_width(8)
                .with_property(|p| {
                    p.size = Some(4.into());
                    p.contents = Some(vec![0, 0xbb]);
                }),
        );
        let text = emit_verilog(&circuit, "rom");
        assert!(text.contains("reg [7:0] rom_mem [0:3];"));
        assert!(text.contains("rom_mem[1] = 8'hbb;"));
        assert!(!text.contains("rom_mem[0] ="));
        assert!(text.contains("assign rom_data = rom_mem[2'd0];"));
    }

    #[test]
    fn test_design_emits_definitions_first() {
        let mut library = Library::new();
        library
            .register(DefinitionSpec {
                name: "pass thru".into(),
                components: vec![
                    ComponentSpec::new("i", "INPUT", 0, 0),
                    ComponentSpec::new("o", "OUTPUT", 4, 0),
                ],
                wires: vec![WireSpec::new(("i", "out"), ("o", "in"), 1)],
                inputs: vec![PinSpec::new("i")],
                outputs: vec![PinSpec::new("o")],
                ..Default::default()
            })
            .unwrap();
        let mut main = Circuit::new();
        for spec in [
            ComponentSpec::new("a", "INPUT", 0, 0),
            ComponentSpec::new("u1", "pass thru", 2, 0),
            ComponentSpec::new("y", "OUTPUT", 4, 0),
        ] {
            let component = library
                .build_component(&spec, &ParamEnv::new(), &mut Vec::new())
                .unwrap();
            main.add_component(component).unwrap();
        }
        main.connect(("a", "out"), ("u1", "in0"), 1).unwrap();
        main.connect(("u1", "out0"), ("y", "in"), 1).unwrap();

        let text = emit_design(&main, &library, "top");
        let def_at = text.find("module passthru(").unwrap();
        let top_at = text.find("module top(").unwrap();
        assert!(def_at < top_at);
        assert!(text.contains("passthru u1 (a, u1_out0);"));
        assert!(text.contains("assign y = u1_out0;"));
    }
}
