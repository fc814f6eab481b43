//! Loaded, verified code units and the byte artefacts mutants travel in.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::verify::{VerifyError, label_table, verify_method};
use super::{CodeGroup, CodeUnit, LabelId, Method, Program};

/// Failures while turning units or artefacts into a class path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// A unit failed structural verification.
    #[error("unit {unit} failed verification: {source}")]
    Verify {
        /// Unit name.
        unit: String,
        /// Verifier finding.
        #[source]
        source: VerifyError,
    },
    /// An artefact could not be decoded.
    #[error("malformed artefact: {0}")]
    Decode(String),
    /// A group could not be encoded.
    #[error("artefact encoding failed: {0}")]
    Encode(String),
    /// Two methods in one unit share a name.
    #[error("unit {unit} declares method {method} twice")]
    DuplicateMethod {
        /// Unit name.
        unit: String,
        /// Method name.
        method: String,
    },
}

/// A verified method plus its resolved label table.
#[derive(Debug)]
pub struct LoadedMethod {
    /// Method body.
    pub method: Method,
    /// Label id to instruction index.
    pub labels: HashMap<LabelId, usize>,
}

/// A verified code unit.
#[derive(Debug)]
pub struct LoadedUnit {
    /// Qualified unit name.
    pub name: String,
    methods: HashMap<String, Arc<LoadedMethod>>,
}

impl LoadedUnit {
    /// Verify and load one unit.
    pub fn load(unit: &CodeUnit) -> Result<Self, LoadError> {
        let mut methods = HashMap::new();
        for method in &unit.methods {
            verify_method(method).map_err(|source| LoadError::Verify {
                unit: unit.name.clone(),
                source,
            })?;
            let labels = label_table(method).map_err(|source| LoadError::Verify {
                unit: unit.name.clone(),
                source,
            })?;
            let loaded = Arc::new(LoadedMethod {
                method: method.clone(),
                labels,
            });
            if methods.insert(method.name.clone(), loaded).is_some() {
                return Err(LoadError::DuplicateMethod {
                    unit: unit.name.clone(),
                    method: method.name.clone(),
                });
            }
        }
        Ok(Self {
            name: unit.name.clone(),
            methods,
        })
    }

    /// Find a method by name.
    pub fn method(&self, name: &str) -> Option<Arc<LoadedMethod>> {
        self.methods.get(name).cloned()
    }
}

/// The set of units visible to one execution.
///
/// Cloning is cheap: units are shared behind `Arc` and never mutated after loading.
#[derive(Debug, Clone, Default)]
pub struct ClassPath {
    units: HashMap<String, Arc<LoadedUnit>>,
}

impl ClassPath {
    /// Load and verify every unit of a program.
    pub fn load_program(program: &Program) -> Result<Self, LoadError> {
        let mut units = HashMap::new();
        for unit in &program.units {
            units.insert(unit.name.clone(), Arc::new(LoadedUnit::load(unit)?));
        }
        Ok(Self { units })
    }

    /// Look up a unit.
    pub fn unit(&self, name: &str) -> Option<Arc<LoadedUnit>> {
        self.units.get(name).cloned()
    }

    /// Number of loaded units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// A new class path in which the group encoded in `artifact` replaces its original units.
    ///
    /// `self` is left untouched, so other executions keep seeing the original group.
    pub fn with_artifact(&self, artifact: &[u8]) -> Result<ClassPath, LoadError> {
        let group = decode_group(artifact)?;
        let mut units = self.units.clone();
        units.retain(|name, _| super::group_of(name) != group.name);
        for unit in &group.units {
            units.insert(unit.name.clone(), Arc::new(LoadedUnit::load(unit)?));
        }
        Ok(Self { units })
    }
}

/// Encode a group into a loadable artefact.
pub fn encode_group(group: &CodeGroup) -> Result<Vec<u8>, LoadError> {
    bincode::serialize(group).map_err(|e| LoadError::Encode(e.to_string()))
}

/// Decode an artefact produced by [`encode_group`].
pub fn decode_group(bytes: &[u8]) -> Result<CodeGroup, LoadError> {
    bincode::deserialize(bytes).map_err(|e| LoadError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Insn, Method};

    fn program() -> Program {
        Program::new(vec![
            CodeUnit::new("Answer", vec![Method::new("get", 0, vec![Insn::int(42), Insn::Return])]),
            CodeUnit::new(
                "Answer$Twice",
                vec![Method::new("get", 0, vec![Insn::int(84), Insn::Return])],
            ),
            CodeUnit::new("Other", vec![Method::new("get", 0, vec![Insn::int(1), Insn::Return])]),
        ])
    }

    #[test]
    fn artifact_replaces_only_its_group() {
        let base = ClassPath::load_program(&program()).expect("program should load");
        let mut group = program().group("Answer").expect("group should exist");
        group.units[0].methods[0].body[0] = Insn::int(0);
        let artifact = encode_group(&group).expect("group should encode");

        let mutated = base.with_artifact(&artifact).expect("artifact should load");
        assert_eq!(mutated.len(), 3);
        let loaded = mutated.unit("Answer").and_then(|u| u.method("get")).expect("method");
        assert_eq!(loaded.method.body[0], Insn::int(0));

        let original = base.unit("Answer").and_then(|u| u.method("get")).expect("method");
        assert_eq!(original.method.body[0], Insn::int(42));
    }

    #[test]
    fn invalid_artifacts_are_rejected() {
        let base = ClassPath::load_program(&program()).expect("program should load");
        assert!(matches!(
            base.with_artifact(b"not an artefact"),
            Err(LoadError::Decode(_))
        ));

        let mut group = program().group("Other").expect("group should exist");
        group.units[0].methods[0].body = vec![Insn::Pop, Insn::Return];
        let artifact = encode_group(&group).expect("group should encode");
        assert!(matches!(
            base.with_artifact(&artifact),
            Err(LoadError::Verify { .. })
        ));
    }
}
