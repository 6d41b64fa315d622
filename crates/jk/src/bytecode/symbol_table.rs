//! Compile-time scope resolution.
//!
//! Each function under compilation gets its own table chained to the
//! enclosing one. `define` hands out Global indices at the root and Local
//! indices elsewhere; `resolve` walks outward and *promotes* enclosing
//! locals to Free symbols, which is what drives closure capture: when an
//! inner function finishes compiling, `free_symbols` lists exactly the
//! variables the enclosing frame must load before `OpClosure`, in order.

use ahash::AHashMap;

/// Where a resolved name lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// A slot in the VM's global array.
    Global,
    /// A slot relative to the current frame's base pointer.
    Local,
    /// A cell in the current closure's free-variable vector.
    Free,
    /// The name of the function currently being compiled; loads as a
    /// self-reference.
    Function,
}

/// A resolved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One scope's definitions plus the link outward.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: AHashMap<String, Symbol>,
    /// Count of Global/Local definitions; becomes the compiled function's
    /// `num_locals`.
    pub num_definitions: usize,
    /// Symbols captured from enclosing scopes, in first-reference order.
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh scope enclosed by `outer`.
    #[must_use]
    pub fn enclosed(outer: Box<SymbolTable>) -> Self {
        Self {
            outer: Some(outer),
            ..Self::default()
        }
    }

    /// True for the root table.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Detaches and returns the enclosing table.
    pub fn take_outer(&mut self) -> Option<Box<SymbolTable>> {
        self.outer.take()
    }

    /// Defines `name` in this scope: Global at the root, Local elsewhere.
    /// The index is the pre-increment definition count.
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

    /// Defines the current function's own name, resolvable inside its body as
    /// a self-reference. Does not consume a local slot.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Resolves `name`, searching this scope and then outward.
    ///
    /// Globals pass through unchanged. A Local, Free, or Function symbol
    /// found in an enclosing scope is promoted: a Free symbol is registered
    /// here (recording the original in `free_symbols`) and returned in its
    /// place.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.outer.as_mut()?;
        let symbol = outer.resolve(name)?;
        if symbol.scope == SymbolScope::Global {
            return Some(symbol);
        }
        Some(self.define_free(symbol))
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
}
