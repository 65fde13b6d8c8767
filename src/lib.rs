pub mod assembler;
pub mod circuit;
pub mod cli;
pub mod engine;
pub mod error;
pub mod expr;
pub mod history;
pub mod netlist;
pub mod params;
pub mod primitives;
pub mod project;
pub mod simulator;
pub mod subcircuit;
pub mod testbench;
pub mod verilog;

// Re-export commonly used types
pub use assembler::{Assembler, Rule};
pub use circuit::{Circuit, Component, ComponentSpec, ComponentView, PortRef, Signal, WireSpec};
pub use engine::{Engine, SETTLE_PASS_CAP};
pub use error::{CircuitError, ErrorKind};
pub use netlist::{Bundle, DrcCode, DrcViolation, Net};
pub use params::ParamExpr;
pub use project::ProjectRecord;
pub use simulator::{Simulator, SimulatorConfig};
pub use subcircuit::{DefinitionSpec, PinSpec};
pub use testbench::{BreakpointHit, TestbenchReport, TestbenchStep};

// Error types
pub use error::Result;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
