//! Process registry — resolves a stored process name to a handler kind.

use std::collections::HashMap;
use std::fmt;

use crate::dispatch::process::ProcessKind;
use crate::status::Gate;

/// Why a record could not be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unroutable {
    /// The name is not a known process.
    UnknownProcess,
    /// The process exists but runs in the other batch.
    WrongGate { expected: Gate },
}

impl fmt::Display for Unroutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unroutable::UnknownProcess => write!(f, "unknown process"),
            Unroutable::WrongGate { expected } => {
                write!(f, "process is handled in the {expected} batch")
            }
        }
    }
}

/// Routes `(gate, process name)` to a `ProcessKind`. Never performs I/O.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    routes: HashMap<&'static str, ProcessKind>,
}

impl ProcessRegistry {
    /// Registry with every known process kind.
    pub fn new() -> Self {
        Self::with_kinds(ProcessKind::ALL)
    }

    /// Registry limited to the given kinds.
    pub fn with_kinds(kinds: impl IntoIterator<Item = ProcessKind>) -> Self {
        let routes = kinds.into_iter().map(|k| (k.name(), k)).collect();
        Self { routes }
    }

    pub fn resolve(&self, gate: Gate, process: &str) -> Result<ProcessKind, Unroutable> {
        let kind = *self
            .routes
            .get(process)
            .ok_or(Unroutable::UnknownProcess)?;
        if kind.gate() != gate {
            return Err(Unroutable::WrongGate {
                expected: kind.gate(),
            });
        }
        Ok(kind)
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
