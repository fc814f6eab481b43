//! Mutation engine abstraction and the bytecode engine.

use super::context::{MutationContext, MutationIdentifier};
use super::operators::{self, CatalogError, MutationOperator, rewrite_method};
use crate::bytecode::classpath::encode_group;
use crate::bytecode::{CodeGroup, CodeUnit, LoadError, Method};

/// One group variant with at most one point substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutant {
    /// The active point, or `None` when the requested index matched nothing.
    pub id: Option<MutationIdentifier>,
    /// Rewritten group.
    pub group: CodeGroup,
}

impl Mutant {
    /// Encode the rewritten group into a loadable artefact.
    pub fn artifact(&self) -> Result<Vec<u8>, LoadError> {
        encode_group(&self.group)
    }
}

/// Mutation engine contract.
pub trait MutationEngine: Send + Sync {
    /// Ids of the operators this engine applies, in application order.
    fn operator_ids(&self) -> Vec<&'static str>;

    /// Dry-enumerate every point of `group` in index order.
    fn find_mutations(&self, group: &CodeGroup) -> Vec<MutationIdentifier>;

    /// Build the variant of `group` in which only point `index` is active.
    ///
    /// An index past the last point yields the group unchanged.
    fn get_mutation(&self, group: &CodeGroup, index: usize) -> Mutant;
}

/// Engine that rewrites bytecode groups through a chain of catalog operators.
#[derive(Clone)]
pub struct BytecodeEngine {
    operators: Vec<&'static dyn MutationOperator>,
}

impl std::fmt::Debug for BytecodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytecodeEngine")
            .field("operators", &self.operator_ids())
            .finish()
    }
}

impl Default for BytecodeEngine {
    fn default() -> Self {
        Self {
            operators: operators::catalog().to_vec(),
        }
    }
}

impl BytecodeEngine {
    /// Engine applying the configured operator ids in order.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, CatalogError> {
        Ok(Self {
            operators: operators::resolve(ids)?,
        })
    }

    /// Engine applying `operators` in order.
    pub fn with_operators(operators: Vec<&'static dyn MutationOperator>) -> Self {
        Self { operators }
    }

    fn rewrite(&self, group: &CodeGroup, target: Option<usize>) -> (CodeGroup, Vec<MutationIdentifier>) {
        let mut cx = MutationContext::new(group.name.clone(), target);
        let mut units = Vec::with_capacity(group.units.len());
        for unit in &group.units {
            let mut methods = Vec::with_capacity(unit.methods.len());
            for method in &unit.methods {
                cx.enter_method(&unit.name, method);
                let body = rewrite_method(&self.operators, method, &mut cx);
                methods.push(Method {
                    body,
                    ..method.clone()
                });
            }
            units.push(CodeUnit::new(unit.name.clone(), methods));
        }
        let rewritten = CodeGroup {
            name: group.name.clone(),
            units,
        };
        (rewritten, cx.into_points())
    }
}

impl MutationEngine for BytecodeEngine {
    fn operator_ids(&self) -> Vec<&'static str> {
        self.operators.iter().map(|op| op.id()).collect()
    }

    fn find_mutations(&self, group: &CodeGroup) -> Vec<MutationIdentifier> {
        self.rewrite(group, None).1
    }

    fn get_mutation(&self, group: &CodeGroup, index: usize) -> Mutant {
        let (rewritten, points) = self.rewrite(group, Some(index));
        Mutant {
            id: points.into_iter().nth(index),
            group: rewritten,
        }
    }
}
