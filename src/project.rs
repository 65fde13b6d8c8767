//! Project files: the JSON record a session loads from and saves to.
//!
//! Loading builds a complete [`Workspace`] off to the side and only then
//! hands it over, so a bad entry never leaves a half-built graph behind.
//! Errors name the offending entry (`main.components[3] 'u1'`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::circuit::{Circuit, Component, ComponentSpec, PortRef, Position, Properties, Wire, WireSpec};
use crate::error::{CircuitError, Result};
use crate::params::{ParamEnv, ParamExpr};
use crate::subcircuit::{DefinitionSpec, Library, PinSpec, Workspace};

pub const FORMAT: &str = "OpenCircuit";

fn default_format() -> String {
    FORMAT.to_string()
}

fn one_bit() -> ParamExpr {
    ParamExpr::Literal(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub main: CircuitRecord,
    #[serde(default)]
    pub library: Vec<DefinitionRecord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CircuitRecord {
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
    #[serde(default)]
    pub wires: Vec<WireRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "pos", skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing)]
    pub gx: Option<i32>,
    #[serde(default, skip_serializing)]
    pub gy: Option<i32>,
    #[serde(default)]
    pub properties: Properties,
}

impl ComponentRecord {
    pub fn to_spec(&self) -> ComponentSpec {
        let position = self
            .position
            .unwrap_or_else(|| Position::new(self.gx.unwrap_or(0), self.gy.unwrap_or(0)));
        ComponentSpec {
            id: self.id.clone(),
            kind: self.kind.to_string(),
            position,
            properties: self.properties.clone(),
        }
    }

    pub fn from_spec(spec: ComponentSpec) -> Self {
        ComponentRecord {
            id: spec.id,
            kind: spec.kind,
            position: Some(spec.position),
            gx: None,
            gy: None,
            properties: spec.properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub name: String,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: PortRef,
    pub to: PortRef,
    #[serde(default = "one_bit")]
    pub bit_width: ParamExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Position>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleRecord>,
}

/// Wire shape used by definitions exported from the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from_comp_id: String,
    pub from_port_id: String,
    pub to_comp_id: String,
    pub to_port_id: String,
    #[serde(default = "one_bit")]
    pub bit_width: ParamExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireRecord {
    Nested(NestedWire),
    Flat(FlatWire),
}

impl WireRecord {
    pub fn to_spec(&self) -> WireSpec {
        match self {
            WireRecord::Nested(w) => WireSpec {
                id: w.id.clone(),
                from: w.from.clone(),
                to: w.to.clone(),
                bit_width: w.bit_width.clone(),
                name: w.name.clone(),
                path: w.path.clone(),
            },
            WireRecord::Flat(w) => WireSpec {
                id: w.id.clone(),
                from: PortRef::new(&w.from_comp_id, &w.from_port_id),
                to: PortRef::new(&w.to_comp_id, &w.to_port_id),
                bit_width: w.bit_width.clone(),
                name: w.name.clone(),
                path: None,
            },
        }
    }

    fn bundle(&self) -> Option<(String, u32)> {
        match self {
            WireRecord::Nested(NestedWire { bundle: Some(b), .. }) => Some((b.name.clone(), b.width)),
            _ => None,
        }
    }

    pub fn nested(wire: &Wire) -> Self {
        let spec = wire.spec();
        WireRecord::Nested(NestedWire {
            id: spec.id,
            from: spec.from,
            to: spec.to,
            bit_width: spec.bit_width,
            name: spec.name,
            path: spec.path,
            bundle: wire.bundle.as_ref().map(|(name, width)| BundleRecord {
                name: name.clone(),
                width: *width,
            }),
        })
    }

    pub fn flat(wire: &Wire) -> Self {
        WireRecord::Flat(FlatWire {
            id: Some(wire.id.clone()),
            from_comp_id: wire.from.comp.clone(),
            from_port_id: wire.from.port.clone(),
            to_comp_id: wire.to.comp.clone(),
            to_port_id: wire.to.port.clone(),
            bit_width: wire.width_expr.clone(),
            name: wire.net_name.clone(),
        })
    }
}

/// A custom-component definition as stored in a project or passed to
/// `register_custom_tool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, i64>,
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
    #[serde(default)]
    pub wires: Vec<WireRecord>,
    #[serde(default)]
    pub inputs: Vec<PinSpec>,
    #[serde(default)]
    pub outputs: Vec<PinSpec>,
}

impl From<&DefinitionRecord> for DefinitionSpec {
    fn from(record: &DefinitionRecord) -> Self {
        DefinitionSpec {
            name: record.name.clone(),
            parameters: record.parameters.clone(),
            components: record.components.iter().map(ComponentRecord::to_spec).collect(),
            wires: record.wires.iter().map(WireRecord::to_spec).collect(),
            inputs: record.inputs.clone(),
            outputs: record.outputs.clone(),
        }
    }
}

impl From<DefinitionRecord> for DefinitionSpec {
    fn from(record: DefinitionRecord) -> Self {
        DefinitionSpec::from(&record)
    }
}

fn load_error(entry: &str, reason: impl ToString) -> CircuitError {
    CircuitError::Load {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}

impl ProjectRecord {
    pub fn from_json(text: &str) -> Result<Self> {
        let record: ProjectRecord = serde_json::from_str(text).map_err(|e| load_error("project", e))?;
        if record.format != FORMAT {
            return Err(load_error(
                "format",
                format!("expected '{}', found '{}'", FORMAT, record.format),
            ));
        }
        Ok(record)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| load_error(&path.display().to_string(), e))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| load_error("project", e))
    }

    /// Build a workspace from this record. Definitions are registered in
    /// order, so a definition may only use ones listed before it.
    pub fn build(&self) -> Result<Workspace> {
        let mut library = Library::new();
        for (i, record) in self.library.iter().enumerate() {
            library
                .register(DefinitionSpec::from(record))
                .map_err(|e| e.at_entry(format!("library[{}] '{}'", i, record.name)))?;
        }

        let env = ParamEnv::new();
        let mut main = Circuit::new();
        for (i, record) in self.main.components.iter().enumerate() {
            library
                .build_component(&record.to_spec(), &env, &mut Vec::new())
                .and_then(|component| main.add_component(component))
                .map_err(|e| e.at_entry(format!("main.components[{}] '{}'", i, record.id)))?;
        }
        for (i, record) in self.main.wires.iter().enumerate() {
            main.wire_from_spec(&record.to_spec(), &env)
                .and_then(|mut wire| {
                    wire.bundle = record.bundle();
                    main.add_wire(wire)
                })
                .map_err(|e| e.at_entry(format!("main.wires[{}]", i)))?;
        }
        Ok(Workspace::new(main, library))
    }

    /// Snapshot a workspace, runtime state included.
    pub fn capture(workspace: &Workspace) -> Self {
        let components = |circuit: &Circuit| -> Vec<ComponentRecord> {
            circuit
                .components()
                .iter()
                .map(|c: &Component| ComponentRecord::from_spec(c.snapshot()))
                .collect()
        };
        ProjectRecord {
            format: default_format(),
            main: CircuitRecord {
                components: components(&workspace.main),
                wires: workspace.main.wires().iter().map(WireRecord::nested).collect(),
            },
            library: workspace
                .library
                .definitions()
                .iter()
                .map(|d| DefinitionRecord {
                    name: d.name.clone(),
                    parameters: d.parameters.clone(),
                    components: components(&d.circuit),
                    wires: d.circuit.wires().iter().map(WireRecord::flat).collect(),
                    inputs: d.inputs.clone(),
                    outputs: d.outputs.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const PROJECT: &str = r#"{
        "format": "OpenCircuit",
        "main": {
            "components": [
                {"id": "a", "type": "INPUT", "pos": {"x": 1, "y": 1}},
                {"id": "u", "type": "PASS", "gx": 3, "gy": 1, "properties": {"parameters": {"WIDTH": 1}}},
                {"id": "b", "type": "OUTPUT", "position": {"x": 4, "y": 1}}
            ],
            "wires": [
                {"from": {"comp": "a", "port": "out"}, "to": {"comp": "u", "port": "in0"}, "bitWidth": 1},
                {"fromCompId": "u", "fromPortId": "out0", "toCompId": "b", "toPortId": "in"}
            ]
        },
        "library": [{
            "name": "PASS",
            "parameters": {"WIDTH": 4},
            "components": [
                {"id": "in", "type": "INPUT", "gx": 0, "gy": 0, "properties": {"bitWidth": "$WIDTH"}},
                {"id": "out", "type": "OUTPUT", "gx": 2, "gy": 0, "properties": {"bitWidth": "$WIDTH"}}
            ],
            "wires": [{"fromCompId": "in", "fromPortId": "out", "toCompId": "out", "toPortId": "in", "bitWidth": "$WIDTH"}],
            "inputs": [{"componentId": "in", "bitWidth": "$WIDTH"}],
            "outputs": [{"componentId": "out", "bitWidth": "$WIDTH"}]
        }]
    }"#;

    #[test]
    fn test_load_accepts_both_wire_shapes() {
        let workspace = ProjectRecord::from_json(PROJECT).unwrap().build().unwrap();
        assert_eq!(workspace.main.components().len(), 3);
        assert_eq!(workspace.main.wires().len(), 2);
        assert_eq!(workspace.main.component("u").unwrap().position, Position::new(3, 1));
        assert_eq!(workspace.main.component("a").unwrap().position, Position::new(1, 1));
        assert!(workspace.library.contains("PASS"));
    }

    #[test]
    fn test_bad_entry_names_location() {
        let broken = PROJECT.replace(r#""toCompId": "b", "toPortId": "in""#, r#""toCompId": "b", "toPortId": "nope""#);
        let err = ProjectRecord::from_json(&broken).unwrap().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(err.to_string().contains("main.wires[1]"), "{}", err);
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        let err = ProjectRecord::from_json("{\"main\": 3}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        let err = ProjectRecord::from_json(r#"{"format": "Other"}"#).unwrap_err();
        assert!(matches!(err, CircuitError::Load { ref entry, .. } if entry == "format"));
    }

    #[test]
    fn test_capture_round_trips() {
        let mut workspace = ProjectRecord::from_json(PROJECT).unwrap().build().unwrap();
        workspace.main.set_input("a", 1).unwrap();
        let saved = ProjectRecord::capture(&workspace);
        let json = saved.to_json().unwrap();
        let again = ProjectRecord::from_json(&json).unwrap();
        assert_eq!(again, saved);
        let rebuilt = again.build().unwrap();
        assert_eq!(rebuilt.main.wires().len(), 2);
        match &rebuilt.main.component("a").unwrap().kind {
            crate::circuit::ComponentKind::Input { value } => assert_eq!(*value, 1),
            other => panic!("unexpected {:?}", other.type_name()),
        }
    }
}
