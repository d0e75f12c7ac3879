use std::collections::HashMap;
use std::sync::Arc;

use super::action::ActionDefinition;
use super::schema::ActionDeclaration;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum TableError {
    #[error("action `{0}` is already registered")]
    DuplicateAction(String),
}

/// Per-session registry of action definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    actions: HashMap<String, Arc<ActionDefinition>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A duplicate name leaves the table unchanged.
    pub fn register(&mut self, definition: ActionDefinition) -> Result<(), TableError> {
        let name = definition.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(TableError::DuplicateAction(name));
        }
        self.actions.insert(name, Arc::new(definition));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ActionDefinition>> {
        self.actions.get(name).cloned()
    }

    /// Declarations sorted by name, for advertising to the agent.
    pub fn declarations(&self) -> Vec<ActionDeclaration> {
        let mut decls: Vec<_> = self
            .actions
            .values()
            .map(|d| d.declaration.clone())
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
