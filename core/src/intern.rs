//! String interning.
//!
//! Render-graph resources are declared by name but referenced by integer id
//! everywhere after setup.

use std::collections::HashMap;

/// An interned string id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Raw index of the symbol.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maps strings to dense [`Symbol`] ids.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    ids: HashMap<String, Symbol>,
    names: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing id if it was seen before.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = Symbol(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        id
    }

    /// Look up an already interned name.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.ids.get(name).copied()
    }

    pub fn resolve(&self, id: Symbol) -> &str {
        &self.names[id.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Forget every name, keeping allocations.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.names.clear();
    }
}
