use std::collections::{BTreeMap, HashMap};
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{CircuitError, Result};
use crate::params::{ParamEnv, ParamExpr};
use crate::primitives::{address_width, ClockState, DffState, Fsm, FsmSpec, Memory, MAX_MEMORY_WORDS};
use crate::subcircuit::Instance;

/// Widest port the engine models.
pub const MAX_WIDTH: u32 = 64;

/// Most data inputs a gate or multiplexer may declare.
pub const MAX_GATE_INPUTS: usize = 32;

/// All-ones mask for a port of `width` bits.
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Current value of a port. An undriven port is `Floating`, which logic
/// reads as 0 but which stays distinguishable from a driven zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Signal {
    #[default]
    Floating,
    Value(u64),
}

impl Signal {
    pub fn bits(self) -> u64 {
        match self {
            Signal::Floating => 0,
            Signal::Value(v) => v,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Signal::Floating)
    }

    pub fn masked(self, width: u32) -> Signal {
        match self {
            Signal::Floating => Signal::Floating,
            Signal::Value(v) => Signal::Value(v & mask(width)),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Floating => write!(f, "z"),
            Signal::Value(v) => write!(f, "{:x}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

/// A named, fixed-width terminal of a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,
    pub width: u32,
    pub value: Signal,
}

impl Port {
    pub fn input(name: &str, width: u32) -> Self {
        Port {
            name: name.to_string(),
            direction: PortDirection::Input,
            width,
            value: Signal::Floating,
        }
    }

    pub fn output(name: &str, width: u32) -> Self {
        Port {
            name: name.to_string(),
            direction: PortDirection::Output,
            width,
            value: Signal::Floating,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn bits(&self) -> u64 {
        self.value.bits()
    }

    /// Store `signal` truncated to the port width. Returns true when the
    /// stored value changed.
    pub fn drive(&mut self, signal: Signal) -> bool {
        let next = signal.masked(self.width);
        if next != self.value {
            self.value = next;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }
}

/// Reference to one port of one component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub comp: String,
    pub port: String,
}

impl PortRef {
    pub fn new(comp: &str, port: &str) -> Self {
        PortRef {
            comp: comp.to_string(),
            port: port.to_string(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.comp, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOp {
    Buffer,
    Not,
    And,
    Or,
    Nand,
    Nor,
    Xor,
    Xnor,
}

impl GateOp {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BUF" => Some(GateOp::Buffer),
            "NOT" => Some(GateOp::Not),
            "AND" => Some(GateOp::And),
            "OR" => Some(GateOp::Or),
            "NAND" => Some(GateOp::Nand),
            "NOR" => Some(GateOp::Nor),
            "XOR" => Some(GateOp::Xor),
            "XNOR" => Some(GateOp::Xnor),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            GateOp::Buffer => "BUF",
            GateOp::Not => "NOT",
            GateOp::And => "AND",
            GateOp::Or => "OR",
            GateOp::Nand => "NAND",
            GateOp::Nor => "NOR",
            GateOp::Xor => "XOR",
            GateOp::Xnor => "XNOR",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, GateOp::Buffer | GateOp::Not)
    }

    /// Bitwise reduction of `inputs` at `width` bits
    pub fn apply(self, inputs: impl Iterator<Item = u64>, width: u32) -> u64 {
        let m = mask(width);
        let mut inputs = inputs;
        let value = match self {
            GateOp::Buffer => inputs.next().unwrap_or(0),
            GateOp::Not => !inputs.next().unwrap_or(0),
            GateOp::And => inputs.fold(m, |acc, v| acc & v),
            GateOp::Or => inputs.fold(0, |acc, v| acc | v),
            GateOp::Nand => !inputs.fold(m, |acc, v| acc & v),
            GateOp::Nor => !inputs.fold(0, |acc, v| acc | v),
            GateOp::Xor => inputs.fold(0, |acc, v| acc ^ v),
            GateOp::Xnor => !inputs.fold(0, |acc, v| acc ^ v),
        };
        value & m
    }
}

/// Component behaviour over a closed catalog. Each variant carries only the
/// state its kind needs.
#[derive(Debug, Clone)]
pub enum ComponentKind {
    Input { value: u64 },
    Output,
    Constant { value: u64 },
    Clock(ClockState),
    Gate(GateOp),
    Mux,
    Dff(DffState),
    Rom(Memory),
    Ram(Memory),
    Fsm(Fsm),
    Custom(Box<Instance>),
}

impl ComponentKind {
    pub fn type_name(&self) -> &str {
        match self {
            ComponentKind::Input { .. } => "INPUT",
            ComponentKind::Output => "OUTPUT",
            ComponentKind::Constant { .. } => "CONST",
            ComponentKind::Clock(_) => "CLOCK",
            ComponentKind::Gate(op) => op.tag(),
            ComponentKind::Mux => "MUX",
            ComponentKind::Dff(_) => "DFF",
            ComponentKind::Rom(_) => "ROM",
            ComponentKind::Ram(_) => "RAM",
            ComponentKind::Fsm(_) => "FSM",
            ComponentKind::Custom(instance) => &instance.definition,
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            ComponentKind::Dff(_) | ComponentKind::Ram(_) | ComponentKind::Fsm(_) | ComponentKind::Clock(_)
        )
    }
}

/// Returns true for type tags in the fixed primitive catalog.
pub fn is_builtin_type(tag: &str) -> bool {
    matches!(
        tag.to_ascii_uppercase().as_str(),
        "INPUT" | "OUTPUT" | "CONST" | "CLOCK" | "MUX" | "DFF" | "ROM" | "RAM" | "FSM"
    ) || GateOp::from_tag(&tag.to_ascii_uppercase()).is_some()
}

/// User-facing properties as they appear in a project file. Numeric entries
/// may reference parameters of an enclosing custom definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_width: Option<ParamExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<ParamExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ParamExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParamExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsm: Option<FsmSpec>,
}

impl Properties {
    /// Every parameter expression held by these properties.
    pub fn expressions(&self) -> Vec<(&str, &ParamExpr)> {
        let mut out = Vec::new();
        if let Some(e) = &self.bit_width {
            out.push(("bitWidth", e));
        }
        if let Some(e) = &self.inputs {
            out.push(("inputs", e));
        }
        if let Some(e) = &self.size {
            out.push(("size", e));
        }
        for (name, e) in &self.parameters {
            out.push((name.as_str(), e));
        }
        out
    }
}

/// Everything needed to build a component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub id: String,
    pub kind: String,
    pub position: Position,
    pub properties: Properties,
}

impl ComponentSpec {
    pub fn new(id: &str, kind: &str, x: i32, y: i32) -> Self {
        ComponentSpec {
            id: id.to_string(),
            kind: kind.to_string(),
            position: Position::new(x, y),
            properties: Properties::default(),
        }
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.properties.bit_width = Some(ParamExpr::Literal(width as i64));
        self
    }

    pub fn with_property(mut self, edit: impl FnOnce(&mut Properties)) -> Self {
        edit(&mut self.properties);
        self
    }
}

/// Read-only snapshot of one port, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortView {
    pub name: String,
    pub width: u32,
    pub value: Signal,
}

/// Read-only snapshot of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub params: BTreeMap<String, i64>,
    pub inputs: Vec<PortView>,
    pub outputs: Vec<PortView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A placed component
#[derive(Debug, Clone)]
pub struct Component {
    pub id: String,
    pub position: Position,
    pub props: Properties,
    pub params: BTreeMap<String, i64>,
    pub kind: ComponentKind,
    pub ports: Vec<Port>,
}

fn resolve_width(expr: Option<&ParamExpr>, env: &ParamEnv, context: &str) -> Result<u32> {
    let width = match expr {
        Some(e) => e.eval(env)?,
        None => 1,
    };
    if width < 1 || width > MAX_WIDTH as i64 {
        return Err(CircuitError::InvalidParameter {
            name: "bitWidth".into(),
            context: context.to_string(),
            reason: format!("{} is outside 1..={}", width, MAX_WIDTH),
        });
    }
    Ok(width as u32)
}

fn resolve_count(
    expr: Option<&ParamExpr>,
    env: &ParamEnv,
    name: &str,
    default: usize,
    range: std::ops::RangeInclusive<usize>,
    context: &str,
) -> Result<usize> {
    let count = match expr {
        Some(e) => e.eval(env)?,
        None => default as i64,
    };
    if count < 0 || !range.contains(&(count as usize)) {
        return Err(CircuitError::InvalidParameter {
            name: name.to_string(),
            context: context.to_string(),
            reason: format!("{} is outside {}..={}", count, range.start(), range.end()),
        });
    }
    Ok(count as usize)
}

fn numbered_inputs(count: usize, width: u32) -> Vec<Port> {
    (0..count).map(|i| Port::input(&format!("in{}", i), width)).collect()
}

impl Component {
    /// Build a component from the primitive catalog.
    pub fn primitive(spec: &ComponentSpec, env: &ParamEnv) -> Result<Self> {
        let tag = spec.kind.to_ascii_uppercase();
        let props = &spec.properties;
        let context = format!("component '{}'", spec.id);
        let width = resolve_width(props.bit_width.as_ref(), env, &context)?;
        let mut params = BTreeMap::new();
        params.insert("bitWidth".to_string(), width as i64);

        let (kind, ports) = match tag.as_str() {
            "INPUT" => (
                ComponentKind::Input { value: props.value.unwrap_or(0) & mask(width) },
                vec![Port::output("out", width)],
            ),
            "OUTPUT" => (ComponentKind::Output, vec![Port::input("in", width)]),
            "CONST" => (
                ComponentKind::Constant { value: props.value.unwrap_or(0) & mask(width) },
                vec![Port::output("out", width)],
            ),
            "CLOCK" => (ComponentKind::Clock(ClockState::default()), vec![Port::output("out", 1)]),
            "MUX" => {
                let n = resolve_count(props.inputs.as_ref(), env, "inputs", 2, 2..=MAX_GATE_INPUTS, &context)?;
                params.insert("inputs".to_string(), n as i64);
                let mut ports = vec![Port::input("sel", address_width(n))];
                ports.extend(numbered_inputs(n, width));
                ports.push(Port::output("out", width));
                (ComponentKind::Mux, ports)
            }
            "DFF" => (
                ComponentKind::Dff(DffState::default()),
                vec![
                    Port::input("d", width),
                    Port::input("clk", 1),
                    Port::output("q", width),
                    Port::output("qn", width),
                ],
            ),
            "ROM" | "RAM" => {
                let size = resolve_count(props.size.as_ref(), env, "size", 16, 1..=MAX_MEMORY_WORDS, &context)?;
                params.insert("size".to_string(), size as i64);
                let memory = Memory::new(size, width, props.contents.as_deref(), &spec.id)?;
                let addr = Port::input("addr", address_width(size));
                if tag == "ROM" {
                    (ComponentKind::Rom(memory), vec![addr, Port::output("data", width)])
                } else {
                    (
                        ComponentKind::Ram(memory),
                        vec![
                            addr,
                            Port::input("data_in", width),
                            Port::input("we", 1),
                            Port::input("clk", 1),
                            Port::output("data", width),
                        ],
                    )
                }
            }
            "FSM" => {
                let n = resolve_count(props.inputs.as_ref(), env, "inputs", 1, 0..=MAX_GATE_INPUTS, &context)?;
                params.insert("inputs".to_string(), n as i64);
                let fsm_spec = props.fsm.as_ref().ok_or_else(|| CircuitError::InvalidParameter {
                    name: "fsm".into(),
                    context: context.clone(),
                    reason: "missing state machine description".into(),
                })?;
                let mut ports = numbered_inputs(n, 1);
                let names: Vec<String> = ports.iter().map(|p| p.name.clone()).collect();
                let fsm = Fsm::build(fsm_spec, &names, width, &spec.id)?;
                ports.push(Port::input("clk", 1));
                ports.push(Port::output("out", width));
                (ComponentKind::Fsm(fsm), ports)
            }
            other => match GateOp::from_tag(other) {
                Some(op) if op.is_unary() => (
                    ComponentKind::Gate(op),
                    vec![Port::input("in", width), Port::output("out", width)],
                ),
                Some(op) => {
                    let n = resolve_count(props.inputs.as_ref(), env, "inputs", 2, 2..=MAX_GATE_INPUTS, &context)?;
                    params.insert("inputs".to_string(), n as i64);
                    let mut ports = numbered_inputs(n, width);
                    ports.push(Port::output("out", width));
                    (ComponentKind::Gate(op), ports)
                }
                None => return Err(CircuitError::UnknownType(spec.kind.clone())),
            },
        };

        Ok(Component {
            id: spec.id.clone(),
            position: spec.position,
            props: props.clone(),
            params,
            kind,
            ports,
        })
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.name == name)
    }

    pub fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| !p.is_input())
    }

    /// Logic value on an input port; missing or floating reads as 0.
    pub fn input_bits(&self, name: &str) -> u64 {
        self.port(name).map(|p| p.bits()).unwrap_or(0)
    }

    /// The value a probe on this component shows: the input of an OUTPUT,
    /// otherwise the first output port.
    pub fn observed(&self) -> Signal {
        match self.kind {
            ComponentKind::Output => self.port("in").map(|p| p.value).unwrap_or_default(),
            _ => self
                .outputs()
                .next()
                .or_else(|| self.inputs().next())
                .map(|p| p.value)
                .unwrap_or_default(),
        }
    }

    /// The description this component was built from. Rebuilding from it and
    /// then calling [`Component::adopt_state`] reproduces the component.
    pub fn spec(&self) -> ComponentSpec {
        ComponentSpec {
            id: self.id.clone(),
            kind: self.type_name().to_string(),
            position: self.position,
            properties: self.props.clone(),
        }
    }

    /// Like [`Component::spec`], with runtime state folded back into the
    /// properties (current INPUT value, memory contents) for saving.
    pub fn snapshot(&self) -> ComponentSpec {
        let mut properties = self.props.clone();
        match &self.kind {
            ComponentKind::Input { value } => properties.value = Some(*value),
            ComponentKind::Rom(memory) | ComponentKind::Ram(memory) => {
                if memory.words().iter().any(|w| *w != 0) {
                    properties.contents = Some(memory.words().to_vec());
                }
            }
            _ => {}
        }
        ComponentSpec {
            id: self.id.clone(),
            kind: self.type_name().to_string(),
            position: self.position,
            properties,
        }
    }

    /// Carry runtime state over from the component this one replaces.
    pub fn adopt_state(&mut self, previous: &Component) {
        for port in self.ports.iter_mut() {
            if let Some(old) = previous.port(&port.name) {
                port.drive(old.value);
            }
        }
        let width = self.params.get("bitWidth").copied().unwrap_or(1) as u32;
        match (&mut self.kind, &previous.kind) {
            (ComponentKind::Input { value }, ComponentKind::Input { value: old }) => {
                *value = *old & mask(width);
            }
            (ComponentKind::Clock(state), ComponentKind::Clock(old)) => *state = old.clone(),
            (ComponentKind::Dff(state), ComponentKind::Dff(old)) => {
                state.latched = old.latched & mask(width);
                state.sampled_clock = old.sampled_clock;
            }
            (ComponentKind::Rom(memory), ComponentKind::Rom(old))
            | (ComponentKind::Ram(memory), ComponentKind::Ram(old)) => memory.adopt(old),
            (ComponentKind::Fsm(fsm), ComponentKind::Fsm(old)) => fsm.adopt(old),
            (ComponentKind::Custom(instance), ComponentKind::Custom(old)) => instance.adopt(old),
            _ => {}
        }
    }

    pub fn view(&self) -> ComponentView {
        let port_view = |p: &Port| PortView {
            name: p.name.clone(),
            width: p.width,
            value: p.value,
        };
        let state = match &self.kind {
            ComponentKind::Dff(s) => Some(format!("{:x}", s.latched)),
            ComponentKind::Fsm(f) => Some(f.current_state().to_string()),
            ComponentKind::Clock(c) => Some(format!("{}", c.value())),
            _ => None,
        };
        ComponentView {
            id: self.id.clone(),
            kind: self.type_name().to_string(),
            position: self.position,
            params: self.params.clone(),
            inputs: self.inputs().map(port_view).collect(),
            outputs: self.outputs().map(port_view).collect(),
            state,
        }
    }
}

/// Description of a wire before its width is resolved
#[derive(Debug, Clone, PartialEq)]
pub struct WireSpec {
    pub id: Option<String>,
    pub from: PortRef,
    pub to: PortRef,
    pub bit_width: ParamExpr,
    pub name: Option<String>,
    pub path: Option<Vec<Position>>,
}

impl WireSpec {
    pub fn new(from: (&str, &str), to: (&str, &str), width: u32) -> Self {
        WireSpec {
            id: None,
            from: PortRef::new(from.0, from.1),
            to: PortRef::new(to.0, to.1),
            bit_width: ParamExpr::Literal(width as i64),
            name: None,
            path: None,
        }
    }
}

/// Connection from one output port to one input port
#[derive(Debug, Clone, PartialEq)]
pub struct Wire {
    pub id: String,
    pub from: PortRef,
    pub to: PortRef,
    pub width_expr: ParamExpr,
    pub width: u32,
    pub net_name: Option<String>,
    pub bundle: Option<(String, u32)>,
    pub path: Option<Vec<Position>>,
}

impl Wire {
    pub fn spec(&self) -> WireSpec {
        WireSpec {
            id: Some(self.id.clone()),
            from: self.from.clone(),
            to: self.to.clone(),
            bit_width: self.width_expr.clone(),
            name: self.net_name.clone(),
            path: self.path.clone(),
        }
    }
}

/// A component/wire graph. Components keep insertion order, which seeds the
/// propagation engine's visit order.
#[derive(Debug, Clone, Default)]
pub struct Circuit {
    pub(crate) components: Vec<Component>,
    pub(crate) wires: Vec<Wire>,
    index: HashMap<String, usize>,
    next_wire: u64,
    revision: u64,
}

impl Circuit {
    pub fn new() -> Self {
        Circuit::default()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    /// Bumped on every structural change; derived views compare against it.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.index.get(id).and_then(|&i| self.components.get(i))
    }

    pub fn component_mut(&mut self, id: &str) -> Option<&mut Component> {
        match self.index.get(id) {
            Some(&i) => self.components.get_mut(i),
            None => None,
        }
    }

    pub fn component_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn require(&self, id: &str) -> Result<&Component> {
        self.component(id)
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))
    }

    pub fn wire(&self, id: &str) -> Option<&Wire> {
        self.wires.iter().find(|w| w.id == id)
    }

    /// Mutable access for annotations (net name, bundle, path). Endpoints
    /// and width change only through the checked edit methods.
    pub fn wire_mut(&mut self, id: &str) -> Option<&mut Wire> {
        self.wires.iter_mut().find(|w| w.id == id)
    }

    pub fn wire_index(&self, id: &str) -> Option<usize> {
        self.wires.iter().position(|w| w.id == id)
    }

    fn reindex(&mut self) {
        self.index = self
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
    }

    /// Add a component at the end of the evaluation order.
    pub fn add_component(&mut self, component: Component) -> Result<()> {
        let at = self.components.len();
        self.insert_component(at, component)
    }

    pub fn insert_component(&mut self, index: usize, component: Component) -> Result<()> {
        if self.index.contains_key(&component.id) {
            return Err(CircuitError::DuplicateId(component.id.clone()));
        }
        let index = index.min(self.components.len());
        self.components.insert(index, component);
        self.reindex();
        self.touch();
        Ok(())
    }

    /// Remove a component and every wire attached to it. Returns the
    /// component's former index, the component, and the removed wires with
    /// their former indices (ascending).
    pub fn remove_component(&mut self, id: &str) -> Result<(usize, Component, Vec<(usize, Wire)>)> {
        let index = self
            .component_index(id)
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))?;
        let attached: Vec<String> = self
            .wires
            .iter()
            .filter(|w| w.from.comp == id || w.to.comp == id)
            .map(|w| w.id.clone())
            .collect();
        let mut removed = Vec::new();
        for wire_id in attached {
            removed.push(self.remove_wire(&wire_id)?);
        }
        removed.sort_by_key(|(i, _)| *i);
        let component = self.components.remove(index);
        self.reindex();
        self.touch();
        Ok((index, component, removed))
    }

    /// Swap in a rebuilt component under the same id.
    pub fn replace_component(&mut self, component: Component) -> Result<Component> {
        let index = self
            .component_index(&component.id)
            .ok_or_else(|| CircuitError::UnknownComponent(component.id.clone()))?;
        let old = std::mem::replace(&mut self.components[index], component);
        self.touch();
        Ok(old)
    }

    pub fn move_component(&mut self, id: &str, to: Position) -> Result<Position> {
        let component = self
            .component_mut(id)
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))?;
        let from = component.position;
        component.position = to;
        self.touch();
        Ok(from)
    }

    pub fn fresh_wire_id(&mut self) -> String {
        loop {
            let id = format!("w{}", self.next_wire);
            self.next_wire += 1;
            if self.wire(&id).is_none() {
                return id;
            }
        }
    }

    /// The wire currently driving input `to`, if any.
    pub fn driver_of(&self, to: &PortRef) -> Option<&Wire> {
        self.wires.iter().find(|w| &w.to == to)
    }

    fn check_endpoint(&self, at: &PortRef, direction: PortDirection) -> Result<&Port> {
        let component = self.require(&at.comp)?;
        let port = component.port(&at.port).ok_or_else(|| CircuitError::UnknownPort {
            component: at.comp.clone(),
            port: at.port.clone(),
        })?;
        if port.direction != direction {
            return Err(CircuitError::InvalidPort {
                component: at.comp.clone(),
                port: at.port.clone(),
                reason: match direction {
                    PortDirection::Output => "a wire must start at an output".into(),
                    PortDirection::Input => "a wire must end at an input".into(),
                },
            });
        }
        Ok(port)
    }

    /// Validate a prospective connection. `replacing` names a wire that is
    /// being rerouted and so does not count as an existing driver.
    pub fn check_connection(
        &self,
        from: &PortRef,
        to: &PortRef,
        width: u32,
        replacing: Option<&str>,
    ) -> Result<()> {
        let source = self.check_endpoint(from, PortDirection::Output)?;
        if source.width != width {
            return Err(CircuitError::WidthMismatch {
                context: format!("wire from {}", from),
                expected: source.width,
                actual: width,
            });
        }
        let target = self.check_endpoint(to, PortDirection::Input)?;
        if target.width != width {
            return Err(CircuitError::WidthMismatch {
                context: format!("wire into {}", to),
                expected: target.width,
                actual: width,
            });
        }
        if let Some(existing) = self.driver_of(to) {
            if Some(existing.id.as_str()) != replacing {
                return Err(CircuitError::FanInConflict {
                    component: to.comp.clone(),
                    port: to.port.clone(),
                    existing: existing.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a wire description against `env` into a wire. Does not add it.
    pub fn wire_from_spec(&mut self, spec: &WireSpec, env: &ParamEnv) -> Result<Wire> {
        let width = spec.bit_width.eval(env)?;
        if width < 1 || width > MAX_WIDTH as i64 {
            return Err(CircuitError::InvalidParameter {
                name: "bitWidth".into(),
                context: format!("wire {} -> {}", spec.from, spec.to),
                reason: format!("{} is outside 1..={}", width, MAX_WIDTH),
            });
        }
        let id = match &spec.id {
            Some(id) => id.clone(),
            None => self.fresh_wire_id(),
        };
        Ok(Wire {
            id,
            from: spec.from.clone(),
            to: spec.to.clone(),
            width_expr: spec.bit_width.clone(),
            width: width as u32,
            net_name: spec.name.clone(),
            bundle: None,
            path: spec.path.clone(),
        })
    }

    pub fn add_wire(&mut self, wire: Wire) -> Result<()> {
        let at = self.wires.len();
        self.insert_wire(at, wire)
    }

    pub fn insert_wire(&mut self, index: usize, wire: Wire) -> Result<()> {
        if self.wire(&wire.id).is_some() {
            return Err(CircuitError::DuplicateId(wire.id.clone()));
        }
        self.check_connection(&wire.from, &wire.to, wire.width, None)?;
        let index = index.min(self.wires.len());
        self.wires.insert(index, wire);
        self.touch();
        Ok(())
    }

    /// Convenience for building graphs in code: connect with a fresh wire id.
    pub fn connect(&mut self, from: (&str, &str), to: (&str, &str), width: u32) -> Result<String> {
        let wire = self.wire_from_spec(&WireSpec::new(from, to, width), &ParamEnv::new())?;
        let id = wire.id.clone();
        self.add_wire(wire)?;
        Ok(id)
    }

    /// Remove a wire; its target input becomes undriven.
    pub fn remove_wire(&mut self, id: &str) -> Result<(usize, Wire)> {
        let index = self
            .wire_index(id)
            .ok_or_else(|| CircuitError::UnknownWire(id.to_string()))?;
        let wire = self.wires.remove(index);
        if let Some(port) = self
            .component_mut(&wire.to.comp)
            .and_then(|c| c.port_mut(&wire.to.port))
        {
            port.value = Signal::Floating;
        }
        self.touch();
        Ok((index, wire))
    }

    /// Re-point an existing wire. Returns the previous endpoints.
    pub fn reconnect_wire(&mut self, id: &str, from: PortRef, to: PortRef) -> Result<(PortRef, PortRef)> {
        let index = self
            .wire_index(id)
            .ok_or_else(|| CircuitError::UnknownWire(id.to_string()))?;
        let width = self.wires[index].width;
        self.check_connection(&from, &to, width, Some(id))?;
        let old_to = self.wires[index].to.clone();
        if old_to != to {
            if let Some(port) = self
                .component_mut(&old_to.comp)
                .and_then(|c| c.port_mut(&old_to.port))
            {
                port.value = Signal::Floating;
            }
        }
        let wire = &mut self.wires[index];
        let previous = (
            std::mem::replace(&mut wire.from, from),
            std::mem::replace(&mut wire.to, to),
        );
        self.touch();
        Ok(previous)
    }

    pub fn port_value(&self, at: &PortRef) -> Result<Signal> {
        let component = self.require(&at.comp)?;
        component
            .port(&at.port)
            .map(|p| p.value)
            .ok_or_else(|| CircuitError::UnknownPort {
                component: at.comp.clone(),
                port: at.port.clone(),
            })
    }

    /// Write a port value directly. The next settle may overwrite it.
    pub fn set_port_value(&mut self, at: &PortRef, value: u64) -> Result<()> {
        let component = self
            .component_mut(&at.comp)
            .ok_or_else(|| CircuitError::UnknownComponent(at.comp.clone()))?;
        let port = component.port_mut(&at.port).ok_or_else(|| CircuitError::UnknownPort {
            component: at.comp.clone(),
            port: at.port.clone(),
        })?;
        port.drive(Signal::Value(value));
        Ok(())
    }

    /// Drive an INPUT component.
    pub fn set_input(&mut self, id: &str, value: u64) -> Result<()> {
        let component = self
            .component_mut(id)
            .ok_or_else(|| CircuitError::UnknownComponent(id.to_string()))?;
        let width = component.port("out").map(|p| p.width).unwrap_or(1);
        let type_name = component.type_name().to_string();
        match &mut component.kind {
            ComponentKind::Input { value: stored } => {
                *stored = value & mask(width);
            }
            _ => {
                return Err(CircuitError::InvalidPort {
                    component: id.to_string(),
                    port: "out".into(),
                    reason: format!("{} is not an INPUT component", type_name),
                })
            }
        }
        if let Some(port) = component.port_mut("out") {
            port.drive(Signal::Value(value));
        }
        Ok(())
    }

    /// Look up a signal by `component` or `component.port`.
    pub fn signal(&self, name: &str) -> Option<Signal> {
        if let Some(component) = self.component(name) {
            return Some(component.observed());
        }
        let (comp, port) = name.rsplit_once('.')?;
        self.component(comp)?.port(port).map(|p| p.value)
    }

    /// Ids of OUTPUT components in insertion order.
    pub fn output_ids(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| matches!(c.kind, ComponentKind::Output))
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(circuit: &mut Circuit, spec: ComponentSpec) {
        let component = Component::primitive(&spec, &ParamEnv::new()).unwrap();
        circuit.add_component(component).unwrap();
    }

    fn inverter_chain() -> Circuit {
        let mut circuit = Circuit::new();
        build(&mut circuit, ComponentSpec::new("a", "INPUT", 0, 0));
        build(&mut circuit, ComponentSpec::new("n", "NOT", 2, 0));
        build(&mut circuit, ComponentSpec::new("y", "OUTPUT", 4, 0));
        circuit.connect(("a", "out"), ("n", "in"), 1).unwrap();
        circuit.connect(("n", "out"), ("y", "in"), 1).unwrap();
        circuit
    }

    #[test]
    fn test_signal_display_and_mask() {
        assert_eq!(Signal::Value(0xbb).to_string(), "bb");
        assert_eq!(Signal::Floating.to_string(), "z");
        assert_eq!(Signal::Value(0x1ff).masked(8), Signal::Value(0xff));
        assert_eq!(mask(64), u64::MAX);
        assert_ne!(Signal::Floating, Signal::Value(0));
    }

    #[test]
    fn test_gate_ops() {
        let v = [0b1100u64, 0b1010];
        assert_eq!(GateOp::And.apply(v.iter().copied(), 4), 0b1000);
        assert_eq!(GateOp::Or.apply(v.iter().copied(), 4), 0b1110);
        assert_eq!(GateOp::Xor.apply(v.iter().copied(), 4), 0b0110);
        assert_eq!(GateOp::Nand.apply(v.iter().copied(), 4), 0b0111);
        assert_eq!(GateOp::Not.apply([0u64].into_iter(), 1), 1);
    }

    #[test]
    fn test_port_layouts() {
        let and = Component::primitive(&ComponentSpec::new("g", "and", 0, 0), &ParamEnv::new()).unwrap();
        let names: Vec<&str> = and.ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["in0", "in1", "out"]);
        assert_eq!(and.type_name(), "AND");

        let rom = Component::primitive(
            &ComponentSpec::new("r", "ROM", 0, 0)
                .with_width(8)
                .with_property(|p| p.size = Some(ParamExpr::Literal(4))),
            &ParamEnv::new(),
        )
        .unwrap();
        assert_eq!(rom.port("addr").unwrap().width, 2);
        assert_eq!(rom.port("data").unwrap().width, 8);
    }

    #[test]
    fn test_unknown_type_and_bad_width() {
        let err = Component::primitive(&ComponentSpec::new("x", "FLUX", 0, 0), &ParamEnv::new()).unwrap_err();
        assert!(matches!(err, CircuitError::UnknownType(_)));
        let err = Component::primitive(&ComponentSpec::new("x", "INPUT", 0, 0).with_width(65), &ParamEnv::new())
            .unwrap_err();
        assert!(matches!(err, CircuitError::InvalidParameter { .. }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut circuit = inverter_chain();
        let again = Component::primitive(&ComponentSpec::new("a", "INPUT", 0, 0), &ParamEnv::new()).unwrap();
        assert_eq!(
            circuit.add_component(again).unwrap_err(),
            CircuitError::DuplicateId("a".into())
        );
    }

    #[test]
    fn test_fan_in_conflict() {
        let mut circuit = inverter_chain();
        build(&mut circuit, ComponentSpec::new("b", "INPUT", 0, 2));
        let err = circuit.connect(("b", "out"), ("n", "in"), 1).unwrap_err();
        assert!(matches!(err, CircuitError::FanInConflict { ref existing, .. } if existing == "w0"));
    }

    #[test]
    fn test_width_mismatch() {
        let mut circuit = Circuit::new();
        build(&mut circuit, ComponentSpec::new("a", "INPUT", 0, 0).with_width(4));
        build(&mut circuit, ComponentSpec::new("y", "OUTPUT", 2, 0).with_width(8));
        let err = circuit.connect(("a", "out"), ("y", "in"), 8).unwrap_err();
        assert!(matches!(err, CircuitError::WidthMismatch { expected: 4, actual: 8, .. }));
    }

    #[test]
    fn test_wire_direction_checked() {
        let mut circuit = inverter_chain();
        let err = circuit.connect(("y", "in"), ("n", "out"), 1).unwrap_err();
        assert!(matches!(err, CircuitError::InvalidPort { .. }));
    }

    #[test]
    fn test_remove_component_takes_wires() {
        let mut circuit = inverter_chain();
        let before = circuit.revision();
        let (index, component, wires) = circuit.remove_component("n").unwrap();
        assert_eq!(index, 1);
        assert_eq!(component.id, "n");
        assert_eq!(wires.len(), 2);
        assert!(circuit.wires().is_empty());
        assert!(circuit.revision() > before);
        assert_eq!(circuit.component_index("y"), Some(1));
    }

    #[test]
    fn test_reconnect_allows_same_target() {
        let mut circuit = inverter_chain();
        build(&mut circuit, ComponentSpec::new("b", "INPUT", 0, 2));
        let (from, to) = circuit
            .reconnect_wire("w0", PortRef::new("b", "out"), PortRef::new("n", "in"))
            .unwrap();
        assert_eq!(from, PortRef::new("a", "out"));
        assert_eq!(to, PortRef::new("n", "in"));
        assert_eq!(circuit.wire("w0").unwrap().from.comp, "b");
    }

    #[test]
    fn test_set_input_and_signal_lookup() {
        let mut circuit = inverter_chain();
        circuit.set_input("a", 3).unwrap();
        assert_eq!(circuit.signal("a"), Some(Signal::Value(1)));
        assert_eq!(circuit.signal("y"), Some(Signal::Floating));
        assert_eq!(circuit.signal("n.in"), Some(Signal::Floating));
        assert!(circuit.set_input("n", 1).is_err());
    }

    #[test]
    fn test_port_value_write_is_masked_until_next_settle() {
        let mut circuit = inverter_chain();
        let at = PortRef::new("n", "in");
        assert_eq!(circuit.port_value(&at).unwrap(), Signal::Floating);

        circuit.set_port_value(&at, 3).unwrap();
        assert_eq!(circuit.port_value(&at).unwrap(), Signal::Value(1));

        crate::engine::Engine::new().settle(&mut circuit);
        assert_eq!(circuit.port_value(&at).unwrap(), Signal::Value(0));
        assert_eq!(circuit.port_value(&PortRef::new("y", "in")).unwrap(), Signal::Value(1));

        assert!(matches!(
            circuit.port_value(&PortRef::new("n", "q")),
            Err(CircuitError::UnknownPort { .. })
        ));
        assert!(matches!(
            circuit.set_port_value(&PortRef::new("ghost", "in"), 1),
            Err(CircuitError::UnknownComponent(_))
        ));
    }
}
