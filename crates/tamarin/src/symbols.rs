//! Symbol tables: name resolution across nested function scopes.
//!
//! Each function literal gets its own table whose `outer` points at the
//! enclosing one. Resolution walks outward; a hit in an enclosing *function*
//! scope is promoted to a free variable in every table it crossed, which is
//! what builds the capture list for closures.

use std::collections::HashMap;

/// Storage class of a resolved name.
///
/// `Function` is internal to the compiler: it marks the name a function
/// literal is bound to, so a self-reference inside the body compiles to
/// `CurrentClosure` instead of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    Function,
}

/// A resolved name: where it lives and at which index.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    /// Count of `define` calls; becomes `num_locals` of the compiled function.
    pub num_definitions: usize,
    /// Symbols captured from enclosing scopes, in capture order. The order
    /// matches the `GetFree` indices handed out for this table.
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    /// Whether this is the root (global) table.
    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Unwrap one level of nesting, discarding this table.
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    /// Define a new binding in this table. Global in the root table, local
    /// everywhere else; indices are dense per table.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    /// Register a builtin at a fixed index. Only meaningful on the root
    /// table, before any user code is compiled.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Mark `name` as the function currently being compiled. Does not count
    /// towards `num_definitions`.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Resolve a name, walking outward. Globals and builtins pass through
    /// unchanged from any depth; locals of an enclosing function are
    /// promoted to free variables in this table.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }

        let outer_symbol = self.outer.as_mut()?.resolve(name)?;
        match outer_symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(outer_symbol),
            _ => Some(self.define_free(outer_symbol)),
        }
    }
}
