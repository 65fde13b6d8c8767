//! Custom components: reusable, parameterised sub-circuits.
//!
//! A [`Definition`] owns one canonical internal graph, resolved with the
//! parameter defaults. Placing the definition produces an [`Instance`]: a
//! private copy with every width and size re-resolved against the
//! instance's own bindings. Instance ports are named by position (`in0`,
//! `out0`, ...) so external wires stay attached when the definition is
//! edited and re-expanded.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::circuit::{is_builtin_type, Circuit, Component, ComponentKind, ComponentSpec, Port, WireSpec};
use crate::error::{CircuitError, Result};
use crate::params::{ParamEnv, ParamExpr};

/// Marks an internal INPUT/OUTPUT component as a top-level pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinSpec {
    pub component_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_width: Option<ParamExpr>,
}

impl PinSpec {
    pub fn new(component_id: &str) -> Self {
        PinSpec {
            component_id: component_id.to_string(),
            bit_width: None,
        }
    }
}

/// An unvalidated definition, as handed to [`Library::register`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefinitionSpec {
    pub name: String,
    pub parameters: ParamEnv,
    pub components: Vec<ComponentSpec>,
    pub wires: Vec<WireSpec>,
    pub inputs: Vec<PinSpec>,
    pub outputs: Vec<PinSpec>,
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    /// Declared parameters and their defaults
    pub parameters: ParamEnv,
    pub circuit: Circuit,
    pub inputs: Vec<PinSpec>,
    pub outputs: Vec<PinSpec>,
}

/// A placed copy of a definition
#[derive(Debug, Clone)]
pub struct Instance {
    pub definition: String,
    pub bindings: ParamEnv,
    pub circuit: Circuit,
    /// Internal INPUT ids in pin order
    pub inputs: Vec<String>,
    /// Internal OUTPUT ids in pin order
    pub outputs: Vec<String>,
}

impl Instance {
    /// Keep the runtime state of internal components that survive a
    /// re-expansion (same id, same type).
    pub fn adopt(&mut self, previous: &Instance) {
        for component in self.circuit.components.iter_mut() {
            if let Some(old) = previous.circuit.component(&component.id) {
                if old.type_name() == component.type_name() {
                    component.adopt_state(old);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinSide {
    Input,
    Output,
}

impl PinSide {
    fn expected(self) -> (&'static str, &'static str) {
        match self {
            PinSide::Input => ("INPUT", "out"),
            PinSide::Output => ("OUTPUT", "in"),
        }
    }
}

/// Check pins against a resolved internal graph. Returns `(id, width)` per pin.
fn resolve_pins(
    definition: &str,
    circuit: &Circuit,
    pins: &[PinSpec],
    env: &ParamEnv,
    side: PinSide,
) -> Result<Vec<(String, u32)>> {
    let (expected, port) = side.expected();
    let mut resolved = Vec::with_capacity(pins.len());
    for (i, pin) in pins.iter().enumerate() {
        let component = circuit
            .component(&pin.component_id)
            .ok_or_else(|| CircuitError::UnknownComponent(pin.component_id.clone()))?;
        if component.type_name() != expected {
            return Err(CircuitError::InvalidPort {
                component: pin.component_id.clone(),
                port: port.to_string(),
                reason: format!("pin {} of '{}' must be an {} component", i, definition, expected),
            });
        }
        let width = component.port(port).map(|p| p.width).unwrap_or(1);
        if let Some(expr) = &pin.bit_width {
            let declared = expr.eval(env)?;
            if declared != width as i64 {
                return Err(CircuitError::WidthMismatch {
                    context: format!("pin {} of '{}'", i, definition),
                    expected: width,
                    actual: declared.clamp(0, u32::MAX as i64) as u32,
                });
            }
        }
        resolved.push((pin.component_id.clone(), width));
    }
    Ok(resolved)
}

fn check_symbols(spec: &DefinitionSpec) -> Result<()> {
    let check = |expr: &ParamExpr, context: String| -> Result<()> {
        match expr.symbols().into_iter().find(|s| !spec.parameters.contains_key(*s)) {
            Some(symbol) => Err(CircuitError::UnknownParameter {
                symbol: symbol.to_string(),
                context,
            }),
            None => Ok(()),
        }
    };
    for component in &spec.components {
        for (property, expr) in component.properties.expressions() {
            check(expr, format!("'{}'.{} in definition '{}'", component.id, property, spec.name))?;
        }
    }
    for wire in &spec.wires {
        check(&wire.bit_width, format!("wire {} -> {} in definition '{}'", wire.from, wire.to, spec.name))?;
    }
    for pin in spec.inputs.iter().chain(&spec.outputs) {
        if let Some(expr) = &pin.bit_width {
            check(expr, format!("pin '{}' of definition '{}'", pin.component_id, spec.name))?;
        }
    }
    Ok(())
}

/// Registered definitions, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Library {
    definitions: Vec<Definition>,
}

impl Library {
    pub fn new() -> Self {
        Library::default()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.definitions.iter().position(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Definition> {
        self.definitions.iter_mut().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Validate and store a definition, replacing one of the same name.
    /// Returns true when an existing definition was replaced.
    pub fn register(&mut self, spec: DefinitionSpec) -> Result<bool> {
        if spec.name.is_empty() || is_builtin_type(&spec.name) {
            return Err(CircuitError::InvalidParameter {
                name: "name".into(),
                context: format!("definition '{}'", spec.name),
                reason: "must be non-empty and not a built-in type".into(),
            });
        }
        check_symbols(&spec)?;

        let mut stack = vec![spec.name.clone()];
        let mut circuit = Circuit::new();
        for component in &spec.components {
            circuit.add_component(self.build_component(component, &spec.parameters, &mut stack)?)?;
        }
        for wire in &spec.wires {
            let wire = circuit.wire_from_spec(wire, &spec.parameters)?;
            circuit.add_wire(wire)?;
        }
        resolve_pins(&spec.name, &circuit, &spec.inputs, &spec.parameters, PinSide::Input)?;
        resolve_pins(&spec.name, &circuit, &spec.outputs, &spec.parameters, PinSide::Output)?;

        let definition = Definition {
            name: spec.name,
            parameters: spec.parameters,
            circuit,
            inputs: spec.inputs,
            outputs: spec.outputs,
        };
        info!(
            "Registered custom component '{}' ({} components, {} in, {} out)",
            definition.name,
            definition.circuit.components().len(),
            definition.inputs.len(),
            definition.outputs.len()
        );
        match self.position(&definition.name) {
            Some(i) => {
                self.definitions[i] = definition;
                Ok(true)
            }
            None => {
                self.definitions.push(definition);
                Ok(false)
            }
        }
    }

    /// Validate a definition's pins against its current canonical graph.
    pub fn check_definition(&self, name: &str) -> Result<()> {
        let definition = self
            .get(name)
            .ok_or_else(|| CircuitError::UnknownDefinition(name.to_string()))?;
        resolve_pins(name, &definition.circuit, &definition.inputs, &definition.parameters, PinSide::Input)?;
        resolve_pins(name, &definition.circuit, &definition.outputs, &definition.parameters, PinSide::Output)?;
        Ok(())
    }

    /// Build any component: a catalog primitive or an instance of a
    /// registered definition. `stack` holds the definitions currently being
    /// expanded and guards against self-instantiation.
    pub fn build_component(&self, spec: &ComponentSpec, env: &ParamEnv, stack: &mut Vec<String>) -> Result<Component> {
        if is_builtin_type(&spec.kind) {
            return Component::primitive(spec, env);
        }
        let instance = self.instantiate(&spec.kind, &spec.properties.parameters, env, stack)?;
        let definition = self
            .get(&spec.kind)
            .ok_or_else(|| CircuitError::UnknownType(spec.kind.clone()))?;

        let inputs = resolve_pins(&definition.name, &instance.circuit, &definition.inputs, &instance.bindings, PinSide::Input)?;
        let outputs = resolve_pins(&definition.name, &instance.circuit, &definition.outputs, &instance.bindings, PinSide::Output)?;
        let mut ports: Vec<Port> = inputs
            .iter()
            .enumerate()
            .map(|(i, (_, width))| Port::input(&format!("in{}", i), *width))
            .collect();
        ports.extend(
            outputs
                .iter()
                .enumerate()
                .map(|(i, (_, width))| Port::output(&format!("out{}", i), *width)),
        );

        Ok(Component {
            id: spec.id.clone(),
            position: spec.position,
            props: spec.properties.clone(),
            params: instance.bindings.clone(),
            kind: ComponentKind::Custom(Box::new(instance)),
            ports,
        })
    }

    /// Expand definition `name` with `overrides` (evaluated in `outer_env`)
    /// layered over its defaults.
    pub fn instantiate(
        &self,
        name: &str,
        overrides: &std::collections::BTreeMap<String, ParamExpr>,
        outer_env: &ParamEnv,
        stack: &mut Vec<String>,
    ) -> Result<Instance> {
        let definition = self
            .get(name)
            .ok_or_else(|| CircuitError::UnknownType(name.to_string()))?;
        if stack.iter().any(|open| open == name) {
            return Err(CircuitError::RecursiveDefinition(name.to_string()));
        }

        let mut bindings = definition.parameters.clone();
        for (key, expr) in overrides {
            if !bindings.contains_key(key) {
                return Err(CircuitError::UnknownParameter {
                    symbol: key.clone(),
                    context: format!("instance of '{}'", name),
                });
            }
            bindings.insert(key.clone(), expr.eval(outer_env)?);
        }

        stack.push(name.to_string());
        let circuit = self.resolve_circuit(&definition.circuit, &bindings, stack);
        stack.pop();
        let circuit = circuit?;

        let inputs = resolve_pins(name, &circuit, &definition.inputs, &bindings, PinSide::Input)?;
        let outputs = resolve_pins(name, &circuit, &definition.outputs, &bindings, PinSide::Output)?;
        debug!("Instantiated '{}' with {:?}", name, bindings);
        Ok(Instance {
            definition: name.to_string(),
            bindings,
            circuit,
            inputs: inputs.into_iter().map(|(id, _)| id).collect(),
            outputs: outputs.into_iter().map(|(id, _)| id).collect(),
        })
    }

    /// Rebuild `template` with every width and size re-resolved in `env`.
    fn resolve_circuit(&self, template: &Circuit, env: &ParamEnv, stack: &mut Vec<String>) -> Result<Circuit> {
        let mut circuit = Circuit::new();
        for old in template.components() {
            let mut component = self.build_component(&old.spec(), env, stack)?;
            component.adopt_state(old);
            circuit.add_component(component)?;
        }
        for old in template.wires() {
            let mut wire = circuit.wire_from_spec(&old.spec(), env)?;
            wire.bundle = old.bundle.clone();
            circuit.add_wire(wire)?;
        }
        Ok(circuit)
    }

    /// True when `name` is `target` or instantiates it at any depth.
    pub fn depends_on(&self, name: &str, target: &str) -> bool {
        if name == target {
            return true;
        }
        match self.get(name) {
            Some(definition) => definition.circuit.components().iter().any(|c| match &c.kind {
                ComponentKind::Custom(instance) => self.depends_on(&instance.definition, target),
                _ => false,
            }),
            None => false,
        }
    }

    /// Definitions other than `name` that depend on it, each listed after
    /// every definition it itself depends on.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut pending: Vec<&str> = self
            .definitions
            .iter()
            .map(|d| d.name.as_str())
            .filter(|d| *d != name && self.depends_on(d, name))
            .collect();
        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .position(|d| !pending.iter().any(|other| other != d && self.depends_on(d, other)))
                .unwrap_or(0);
            order.push(pending.remove(next).to_string());
        }
        order
    }

    /// Re-expand every instance in `circuit` whose definition depends on
    /// `changed`. All replacements are built before any is swapped in.
    pub fn reexpand(&self, circuit: &mut Circuit, changed: &str, env: &ParamEnv, stack: &mut Vec<String>) -> Result<usize> {
        let mut fresh = Vec::new();
        for old in circuit.components() {
            if let ComponentKind::Custom(instance) = &old.kind {
                if self.depends_on(&instance.definition, changed) {
                    let mut component = self.build_component(&old.spec(), env, stack)?;
                    component.adopt_state(old);
                    fresh.push(component);
                }
            }
        }
        let count = fresh.len();
        for component in fresh {
            circuit.replace_component(component)?;
        }
        Ok(count)
    }
}

/// The main graph plus the library, and which graph edits apply to.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub main: Circuit,
    pub library: Library,
    editing: Option<String>,
}

impl Workspace {
    pub fn new(main: Circuit, library: Library) -> Self {
        Workspace {
            main,
            library,
            editing: None,
        }
    }

    /// Name of the definition open for dive-in editing
    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    pub fn active(&self) -> &Circuit {
        match self.editing.as_deref().and_then(|name| self.library.get(name)) {
            Some(definition) => &definition.circuit,
            None => &self.main,
        }
    }

    pub fn active_mut(&mut self) -> &mut Circuit {
        match self.editing.as_deref().and_then(|name| self.library.position(name)) {
            Some(i) => &mut self.library.definitions[i].circuit,
            None => &mut self.main,
        }
    }

    /// Parameter environment of the active graph: the open definition's
    /// defaults, or nothing for the main graph.
    pub fn active_env(&self) -> ParamEnv {
        self.editing
            .as_deref()
            .and_then(|name| self.library.get(name))
            .map(|d| d.parameters.clone())
            .unwrap_or_default()
    }

    /// Graph for a history scope: `None` is the main graph.
    pub fn circuit_mut(&mut self, scope: Option<&str>) -> Result<&mut Circuit> {
        match scope {
            None => Ok(&mut self.main),
            Some(name) => self
                .library
                .get_mut(name)
                .map(|d| &mut d.circuit)
                .ok_or_else(|| CircuitError::UnknownDefinition(name.to_string())),
        }
    }

    /// Build a component for the active graph.
    pub fn build_component(&self, spec: &ComponentSpec) -> Result<Component> {
        let mut stack: Vec<String> = self.editing.iter().cloned().collect();
        self.library.build_component(spec, &self.active_env(), &mut stack)
    }

    pub fn enter_edit(&mut self, name: &str) -> Result<()> {
        if let Some(open) = &self.editing {
            return Err(CircuitError::EditContext(format!(
                "already editing '{}'; exit it first",
                open
            )));
        }
        if !self.library.contains(name) {
            return Err(CircuitError::UnknownDefinition(name.to_string()));
        }
        info!("Entering edit of '{}'", name);
        self.editing = Some(name.to_string());
        Ok(())
    }

    /// Close the edit context and propagate the edit to every live
    /// instance. On error the context stays open so the edit can be fixed.
    /// Returns the number of main-graph instances re-expanded.
    pub fn exit_edit(&mut self) -> Result<usize> {
        let name = self
            .editing
            .clone()
            .ok_or_else(|| CircuitError::EditContext("no definition is being edited".into()))?;
        self.library.check_definition(&name)?;
        self.editing = None;
        let count = match self.refresh(&name) {
            Ok(count) => count,
            Err(e) => {
                self.editing = Some(name);
                return Err(e);
            }
        };
        info!("Exited edit of '{}'; re-expanded {} instance(s)", name, count);
        Ok(count)
    }

    /// Re-expand everything built from `name`: dependent definitions first,
    /// then instances in the main graph.
    pub fn refresh(&mut self, name: &str) -> Result<usize> {
        for dependent in self.library.dependents(name) {
            let Some(i) = self.library.position(&dependent) else {
                continue;
            };
            let mut circuit = std::mem::take(&mut self.library.definitions[i].circuit);
            let env = self.library.definitions[i].parameters.clone();
            let result = self.library.reexpand(&mut circuit, name, &env, &mut vec![dependent.clone()]);
            self.library.definitions[i].circuit = circuit;
            result?;
        }
        let mut main = std::mem::take(&mut self.main);
        let result = self.library.reexpand(&mut main, name, &ParamEnv::new(), &mut Vec::new());
        self.main = main;
        result
    }
}
