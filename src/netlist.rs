//! Nets, bundles and design-rule checks derived from wire connectivity.
//!
//! Nets are never stored. [`NetAnalyzer`] rebuilds them on the first query
//! after the graph's revision changes and keeps them until the next one.
//! Net names live on the wires themselves, so they survive undo/redo and
//! save/load without the analyzer's involvement.

use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::circuit::{Circuit, PortRef};
use crate::error::{CircuitError, Result};

/// A maximal set of ports joined by wires
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Net {
    pub id: String,
    pub name: Option<String>,
    pub width: u32,
    pub drivers: Vec<PortRef>,
    pub ports: Vec<PortRef>,
    pub wires: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    pub name: String,
    pub width: u32,
    pub wires: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrcCode {
    UnconnectedInput,
    WidthMismatch,
    FanInConflict,
    DanglingWire,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrcViolation {
    pub code: DrcCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub message: String,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // lower root wins so numbering stays stable
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Group wires into nets. Nets are ordered by their first wire.
pub fn derive_nets(circuit: &Circuit) -> Vec<Net> {
    let mut slots: HashMap<&PortRef, usize> = HashMap::new();
    let mut refs: Vec<&PortRef> = Vec::new();
    for wire in circuit.wires() {
        for end in [&wire.from, &wire.to] {
            if !slots.contains_key(end) {
                slots.insert(end, refs.len());
                refs.push(end);
            }
        }
    }
    let mut sets = UnionFind::new(refs.len());
    for wire in circuit.wires() {
        sets.union(slots[&wire.from], slots[&wire.to]);
    }

    let mut by_root: BTreeMap<usize, usize> = BTreeMap::new();
    let mut nets: Vec<Net> = Vec::new();
    for wire in circuit.wires() {
        let root = sets.find(slots[&wire.from]);
        let index = *by_root.entry(root).or_insert_with(|| {
            nets.push(Net {
                id: format!("net{}", nets.len()),
                name: None,
                width: wire.width,
                drivers: Vec::new(),
                ports: Vec::new(),
                wires: Vec::new(),
            });
            nets.len() - 1
        });
        let net = &mut nets[index];
        net.wires.push(wire.id.clone());
        if net.name.is_none() {
            net.name = wire.net_name.clone();
        }
        if !net.drivers.contains(&wire.from) {
            net.drivers.push(wire.from.clone());
        }
        for end in [&wire.from, &wire.to] {
            if !net.ports.contains(end) {
                net.ports.push(end.clone());
            }
        }
    }
    nets
}

#[derive(Debug)]
struct NetCache {
    scope: Option<String>,
    revision: u64,
    nets: Vec<Net>,
    by_wire: HashMap<String, usize>,
}

/// Lazily derived nets for one graph at a time
#[derive(Debug, Default)]
pub struct NetAnalyzer {
    cache: Option<NetCache>,
}

impl NetAnalyzer {
    pub fn new() -> Self {
        NetAnalyzer::default()
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    fn refresh(&mut self, circuit: &Circuit, scope: Option<&str>) -> &NetCache {
        let stale = match &self.cache {
            Some(cache) => cache.revision != circuit.revision() || cache.scope.as_deref() != scope,
            None => true,
        };
        if stale {
            self.cache = None;
        }
        self.cache.get_or_insert_with(|| {
            let nets = derive_nets(circuit);
            debug!("Derived {} nets from {} wires", nets.len(), circuit.wires().len());
            let by_wire = nets
                .iter()
                .enumerate()
                .flat_map(|(i, net)| net.wires.iter().map(move |w| (w.clone(), i)))
                .collect();
            NetCache {
                scope: scope.map(str::to_string),
                revision: circuit.revision(),
                nets,
                by_wire,
            }
        })
    }

    pub fn nets(&mut self, circuit: &Circuit, scope: Option<&str>) -> Vec<Net> {
        self.refresh(circuit, scope).nets.clone()
    }

    pub fn net_of_wire(&mut self, circuit: &Circuit, scope: Option<&str>, wire: &str) -> Result<Net> {
        let cache = self.refresh(circuit, scope);
        cache
            .by_wire
            .get(wire)
            .map(|&i| cache.nets[i].clone())
            .ok_or_else(|| CircuitError::UnknownWire(wire.to_string()))
    }

    /// Name the net containing `wire`; every wire of that net carries it.
    pub fn set_net_name(&mut self, circuit: &mut Circuit, scope: Option<&str>, wire: &str, name: &str) -> Result<()> {
        let net = self.net_of_wire(circuit, scope, wire)?;
        for id in &net.wires {
            if let Some(w) = circuit.wire_mut(id) {
                w.net_name = Some(name.to_string());
            }
        }
        // names are read into the cache on derivation
        self.invalidate();
        Ok(())
    }

    pub fn get_net_name(&mut self, circuit: &Circuit, scope: Option<&str>, wire: &str) -> Result<Option<String>> {
        Ok(self.net_of_wire(circuit, scope, wire)?.name)
    }
}

/// Tag a wire as part of bundle `name` of `width` bits.
pub fn bundle_wire(circuit: &mut Circuit, wire: &str, name: &str, width: u32) -> Result<()> {
    let existing = circuit
        .wires()
        .iter()
        .find_map(|w| w.bundle.as_ref().filter(|(n, _)| n == name).map(|(_, bw)| *bw));
    if let Some(declared) = existing {
        if declared != width {
            return Err(CircuitError::WidthMismatch {
                context: format!("bundle '{}'", name),
                expected: declared,
                actual: width,
            });
        }
    }
    let target = circuit
        .wire_mut(wire)
        .ok_or_else(|| CircuitError::UnknownWire(wire.to_string()))?;
    if target.width != width {
        return Err(CircuitError::WidthMismatch {
            context: format!("wire '{}' in bundle '{}'", wire, name),
            expected: target.width,
            actual: width,
        });
    }
    target.bundle = Some((name.to_string(), width));
    Ok(())
}

/// Bundles in order of first appearance.
pub fn list_bundles(circuit: &Circuit) -> Vec<Bundle> {
    let mut bundles: Vec<Bundle> = Vec::new();
    for wire in circuit.wires() {
        let Some((name, width)) = &wire.bundle else {
            continue;
        };
        match bundles.iter_mut().find(|b| &b.name == name) {
            Some(bundle) => bundle.wires.push(wire.id.clone()),
            None => bundles.push(Bundle {
                name: name.clone(),
                width: *width,
                wires: vec![wire.id.clone()],
            }),
        }
    }
    bundles
}

/// Structural checks the edit operations cannot enforce on their own, such
/// as widths invalidated by a later parameter change.
pub fn run_drc(circuit: &Circuit) -> Vec<DrcViolation> {
    let mut violations = Vec::new();
    let mut drivers: HashMap<&PortRef, &str> = HashMap::new();

    for wire in circuit.wires() {
        let mut endpoint_ok = true;
        for end in [&wire.from, &wire.to] {
            let port = circuit.component(&end.comp).and_then(|c| c.port(&end.port));
            match port {
                None => {
                    endpoint_ok = false;
                    violations.push(DrcViolation {
                        code: DrcCode::DanglingWire,
                        component: Some(end.comp.clone()),
                        wire: Some(wire.id.clone()),
                        port: Some(end.port.clone()),
                        message: format!("wire '{}' ends at missing port {}", wire.id, end),
                    });
                }
                Some(port) if port.width != wire.width => violations.push(DrcViolation {
                    code: DrcCode::WidthMismatch,
                    component: Some(end.comp.clone()),
                    wire: Some(wire.id.clone()),
                    port: Some(end.port.clone()),
                    message: format!("wire '{}' is {} bits but {} is {}", wire.id, wire.width, end, port.width),
                }),
                Some(_) => {}
            }
        }
        if let Some((name, width)) = &wire.bundle {
            if *width != wire.width {
                violations.push(DrcViolation {
                    code: DrcCode::WidthMismatch,
                    component: None,
                    wire: Some(wire.id.clone()),
                    port: None,
                    message: format!("wire '{}' is {} bits but bundle '{}' is {}", wire.id, wire.width, name, width),
                });
            }
        }
        if !endpoint_ok {
            continue;
        }
        match drivers.get(&wire.to) {
            Some(first) => violations.push(DrcViolation {
                code: DrcCode::FanInConflict,
                component: Some(wire.to.comp.clone()),
                wire: Some(wire.id.clone()),
                port: Some(wire.to.port.clone()),
                message: format!("{} is driven by both '{}' and '{}'", wire.to, first, wire.id),
            }),
            None => {
                drivers.insert(&wire.to, &wire.id);
            }
        }
    }

    for component in circuit.components() {
        for port in component.inputs() {
            let at = PortRef::new(&component.id, &port.name);
            if !drivers.contains_key(&at) {
                violations.push(DrcViolation {
                    code: DrcCode::UnconnectedInput,
                    component: Some(component.id.clone()),
                    wire: None,
                    port: Some(port.name.clone()),
                    message: format!("input {} has no driver", at),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Component, ComponentSpec};
    use crate::params::ParamEnv;

    fn fan_out() -> Circuit {
        let mut circuit = Circuit::new();
        for spec in [
            ComponentSpec::new("a", "INPUT", 1, 1),
            ComponentSpec::new("b", "OUTPUT", 4, 1),
            ComponentSpec::new("gate", "AND", 2, 3),
        ] {
            circuit
                .add_component(Component::primitive(&spec, &ParamEnv::new()).unwrap())
                .unwrap();
        }
        circuit.connect(("a", "out"), ("gate", "in0"), 1).unwrap();
        circuit.connect(("a", "out"), ("b", "in"), 1).unwrap();
        circuit
    }

    #[test]
    fn test_fan_out_is_one_net() {
        let circuit = fan_out();
        let nets = derive_nets(&circuit);
        assert_eq!(nets.len(), 1);
        assert_eq!(nets[0].id, "net0");
        assert_eq!(nets[0].wires, vec!["w0", "w1"]);
        assert_eq!(nets[0].drivers, vec![PortRef::new("a", "out")]);
        assert_eq!(nets[0].ports.len(), 3);
    }

    #[test]
    fn test_net_name_applies_to_whole_net() {
        let mut circuit = fan_out();
        let mut analyzer = NetAnalyzer::new();
        analyzer.set_net_name(&mut circuit, None, "w1", "BUS1").unwrap();
        assert_eq!(analyzer.get_net_name(&circuit, None, "w0").unwrap().as_deref(), Some("BUS1"));
        let nets = analyzer.nets(&circuit, None);
        assert!(nets.iter().any(|n| n.name.as_deref() == Some("BUS1")));
        assert!(analyzer.get_net_name(&circuit, None, "w9").is_err());
    }

    #[test]
    fn test_cache_follows_revision() {
        let mut circuit = fan_out();
        let mut analyzer = NetAnalyzer::new();
        assert_eq!(analyzer.nets(&circuit, None).len(), 1);
        circuit.remove_wire("w0").unwrap();
        circuit.remove_wire("w1").unwrap();
        assert!(analyzer.nets(&circuit, None).is_empty());
    }

    #[test]
    fn test_drc_reports_unconnected_input() {
        let circuit = fan_out();
        let violations = run_drc(&circuit);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, DrcCode::UnconnectedInput);
        assert_eq!(violations[0].port.as_deref(), Some("in1"));
    }

    #[test]
    fn test_drc_catches_width_change_after_wiring() {
        let mut circuit = fan_out();
        let wider = Component::primitive(&ComponentSpec::new("b", "OUTPUT", 4, 1).with_width(4), &ParamEnv::new())
            .unwrap();
        circuit.replace_component(wider).unwrap();
        let violations = run_drc(&circuit);
        assert!(violations
            .iter()
            .any(|v| v.code == DrcCode::WidthMismatch && v.wire.as_deref() == Some("w1")));
    }

    #[test]
    fn test_drc_dangling_wire() {
        let mut circuit = fan_out();
        let n = circuit.component_index("gate").unwrap();
        circuit.components.remove(n);
        let violations = run_drc(&circuit);
        assert!(violations.iter().any(|v| v.code == DrcCode::DanglingWire));
    }

    #[test]
    fn test_bundle_widths_checked() {
        let mut circuit = fan_out();
        bundle_wire(&mut circuit, "w0", "CTRL", 1).unwrap();
        bundle_wire(&mut circuit, "w1", "CTRL", 1).unwrap();
        assert!(matches!(
            bundle_wire(&mut circuit, "w1", "CTRL", 2).unwrap_err(),
            CircuitError::WidthMismatch { .. }
        ));
        assert!(matches!(
            bundle_wire(&mut circuit, "w1", "DATA", 8).unwrap_err(),
            CircuitError::WidthMismatch { expected: 1, actual: 8, .. }
        ));
        let bundles = list_bundles(&circuit);
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].wires, vec!["w0", "w1"]);
    }
}
