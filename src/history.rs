//! Undo/redo over structural edits.
//!
//! Every edit is a [`Command`] that carries enough data to run forwards and
//! backwards. Entries remember which graph they were recorded against (the
//! main graph or a definition's canonical graph) so they replay there even
//! after the edit context has changed.

use log::debug;

use crate::circuit::{Circuit, Component, PortRef, Position, Wire};
use crate::error::Result;
use crate::subcircuit::Workspace;

#[derive(Debug, Clone)]
pub enum Command {
    AddComponent {
        index: usize,
        component: Component,
    },
    RemoveComponent {
        index: usize,
        component: Component,
        /// Wires removed along with the component, with their former indices
        wires: Vec<(usize, Wire)>,
    },
    MoveComponent {
        id: String,
        from: Position,
        to: Position,
    },
    AddWire {
        index: usize,
        wire: Wire,
    },
    RemoveWire {
        index: usize,
        wire: Wire,
    },
    Reconnect {
        id: String,
        before: (PortRef, PortRef),
        after: (PortRef, PortRef),
    },
    /// Property edit: the component rebuilt with new properties
    ReplaceComponent {
        before: Component,
        after: Component,
    },
}

impl Command {
    pub fn apply(&self, circuit: &mut Circuit) -> Result<()> {
        match self {
            Command::AddComponent { index, component } => circuit.insert_component(*index, component.clone()),
            Command::RemoveComponent { component, .. } => circuit.remove_component(&component.id).map(|_| ()),
            Command::MoveComponent { id, to, .. } => circuit.move_component(id, *to).map(|_| ()),
            Command::AddWire { index, wire } => circuit.insert_wire(*index, wire.clone()),
            Command::RemoveWire { wire, .. } => circuit.remove_wire(&wire.id).map(|_| ()),
            Command::Reconnect { id, after, .. } => circuit
                .reconnect_wire(id, after.0.clone(), after.1.clone())
                .map(|_| ()),
            Command::ReplaceComponent { after, .. } => circuit.replace_component(after.clone()).map(|_| ()),
        }
    }

    pub fn revert(&self, circuit: &mut Circuit) -> Result<()> {
        match self {
            Command::AddComponent { component, .. } => circuit.remove_component(&component.id).map(|_| ()),
            Command::RemoveComponent { index, component, wires } => {
                circuit.insert_component(*index, component.clone())?;
                // ascending order puts every wire back at its old index
                for (at, wire) in wires {
                    circuit.insert_wire(*at, wire.clone())?;
                }
                Ok(())
            }
            Command::MoveComponent { id, from, .. } => circuit.move_component(id, *from).map(|_| ()),
            Command::AddWire { wire, .. } => circuit.remove_wire(&wire.id).map(|_| ()),
            Command::RemoveWire { index, wire } => circuit.insert_wire(*index, wire.clone()),
            Command::Reconnect { id, before, .. } => circuit
                .reconnect_wire(id, before.0.clone(), before.1.clone())
                .map(|_| ()),
            Command::ReplaceComponent { before, .. } => circuit.replace_component(before.clone()).map(|_| ()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Command::AddComponent { component, .. } => format!("add {}", component.id),
            Command::RemoveComponent { component, .. } => format!("remove {}", component.id),
            Command::MoveComponent { id, to, .. } => format!("move {} to ({}, {})", id, to.x, to.y),
            Command::AddWire { wire, .. } => format!("wire {} -> {}", wire.from, wire.to),
            Command::RemoveWire { wire, .. } => format!("unwire {}", wire.id),
            Command::Reconnect { id, after, .. } => format!("reconnect {} as {} -> {}", id, after.0, after.1),
            Command::ReplaceComponent { after, .. } => format!("edit {}", after.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Definition whose graph the command edits; `None` for the main graph
    pub scope: Option<String>,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        History::new(256)
    }
}

impl History {
    pub fn new(limit: usize) -> Self {
        History {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Push an already-applied command. Clears the redo stack.
    pub fn record(&mut self, scope: Option<String>, command: Command) {
        debug!("History: {}", command.describe());
        self.redo.clear();
        self.undo.push(HistoryEntry { scope, command });
        if self.undo.len() > self.limit {
            let excess = self.undo.len() - self.limit;
            self.undo.drain(..excess);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Revert the latest entry. Returns the entry's scope, or `None` when
    /// there was nothing to undo. A failed revert leaves the entry in place.
    pub fn undo(&mut self, workspace: &mut Workspace) -> Result<Option<Option<String>>> {
        let Some(entry) = self.undo.pop() else {
            return Ok(None);
        };
        if let Err(e) = workspace
            .circuit_mut(entry.scope.as_deref())
            .and_then(|circuit| entry.command.revert(circuit))
        {
            self.undo.push(entry);
            return Err(e);
        }
        debug!("Undo: {}", entry.command.describe());
        let scope = entry.scope.clone();
        self.redo.push(entry);
        Ok(Some(scope))
    }

    /// Re-apply the latest undone entry; the mirror of [`History::undo`].
    pub fn redo(&mut self, workspace: &mut Workspace) -> Result<Option<Option<String>>> {
        let Some(entry) = self.redo.pop() else {
            return Ok(None);
        };
        if let Err(e) = workspace
            .circuit_mut(entry.scope.as_deref())
            .and_then(|circuit| entry.command.apply(circuit))
        {
            self.redo.push(entry);
            return Err(e);
        }
        debug!("Redo: {}", entry.command.describe());
        let scope = entry.scope.clone();
        self.undo.push(entry);
        Ok(Some(scope))
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
