//! Symbol resolution: nested block scopes inside a chain of per-file symbol
//! tables, plus the host-provided global store.
//!
//! Module globals and context globals are disjoint namespaces with distinct
//! opcodes; the resolver never lowers one into the other. Crossing a function
//! boundary captures locals (and `this`/self-references) as free symbols.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolKind {
    /// Name bound at a file's top level; a fixed index in the VM globals.
    ModuleGlobal,
    /// Frame-relative slot.
    Local,
    /// Index into the enclosing function's captured values.
    Free,
    /// Recursion self-reference inside a function body.
    Function,
    /// Receiver of the map literal under construction.
    This,
    /// Host-provided name in the shared global store.
    ContextGlobal,
}

#[derive(Debug, Clone)]
pub(crate) struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub index: u16,
    pub assignable: bool,
}

/// One lexical block: a name map plus the slot bookkeeping that gives each
/// definition a frame-relative index.
#[derive(Debug, Clone)]
struct BlockScope {
    store: AHashMap<String, Symbol>,
    offset: u16,
    num_definitions: u16,
}

impl BlockScope {
    fn new(offset: u16) -> Self {
        Self {
            store: AHashMap::new(),
            offset,
            num_definitions: 0,
        }
    }
}

/// Symbol table for one function (or one file at the bottom of a file scope).
#[derive(Debug, Clone)]
pub(crate) struct SymbolTable {
    scopes: Vec<BlockScope>,
    /// Original symbols captured from the enclosing table, in capture order.
    pub free_symbols: Vec<Symbol>,
    /// Module-global symbols defined through this table, in definition order.
    pub module_global_symbols: Vec<Symbol>,
    /// Offset applied to module-global indices, carried over from previously
    /// compiled files so globals accumulate across imports.
    module_global_offset: u16,
    /// High-water mark of slot usage; becomes the function's local count.
    pub max_num_definitions: u16,
    /// Whether this table sits at the bottom of a file scope (no enclosing
    /// function), which is what makes its top-scope definitions module
    /// globals.
    is_file_table: bool,
}

impl SymbolTable {
    pub fn new_file_table(module_global_offset: u16) -> Self {
        Self {
            scopes: vec![BlockScope::new(0)],
            free_symbols: Vec::new(),
            module_global_symbols: Vec::new(),
            module_global_offset,
            max_num_definitions: 0,
            is_file_table: true,
        }
    }

    pub fn new_function_table() -> Self {
        Self {
            scopes: vec![BlockScope::new(0)],
            free_symbols: Vec::new(),
            module_global_symbols: Vec::new(),
            module_global_offset: 0,
            max_num_definitions: 0,
            is_file_table: false,
        }
    }

    pub fn push_block_scope(&mut self) {
        let offset = {
            let top = self.top_scope();
            top.offset + top.num_definitions
        };
        self.scopes.push(BlockScope::new(offset));
    }

    pub fn pop_block_scope(&mut self) {
        if let Some(popped) = self.scopes.pop() {
            self.max_num_definitions = self
                .max_num_definitions
                .max(popped.offset + popped.num_definitions);
        }
    }

    fn top_scope(&self) -> &BlockScope {
        self.scopes.last().expect("symbol table always has a block scope")
    }

    fn top_scope_mut(&mut self) -> &mut BlockScope {
        self.scopes.last_mut().expect("symbol table always has a block scope")
    }

    /// Whether definitions here become module globals: a file table's first
    /// block scope.
    pub fn is_module_global_scope(&self) -> bool {
        self.is_file_table && self.scopes.len() == 1
    }

    pub fn is_top_block_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    /// Number of definitions in the top block scope; absorbed by the
    /// importing file's table when a file scope pops.
    pub fn top_scope_num_definitions(&self) -> u16 {
        self.top_scope().num_definitions
    }

    /// The module-global index that the next file table should start from.
    pub fn next_module_global_offset(&self) -> u16 {
        let top = &self.scopes[0];
        self.module_global_offset + top.offset + top.num_definitions
    }

    pub fn absorb_popped_file_definitions(&mut self, num_definitions: u16) {
        self.top_scope_mut().num_definitions += num_definitions;
    }

    /// Defines `name` in the innermost scope. Fails when the name shadows a
    /// context global, contains a colon, or is `this`. Redefining a name in
    /// the same scope assigns a fresh slot (the compiler rejects duplicates
    /// outside the module-global scope before calling this).
    pub fn define(&mut self, name: &str, assignable: bool, global_store: &GlobalStore) -> Option<Symbol> {
        if name == "this" || name.contains(':') {
            return None;
        }
        if global_store.lookup(name).is_some() {
            return None;
        }
        let module_global = self.is_module_global_scope();
        let kind = if module_global { SymbolKind::ModuleGlobal } else { SymbolKind::Local };
        let index = {
            let top = self.top_scope();
            let ix = top.offset + top.num_definitions;
            if module_global { ix + self.module_global_offset } else { ix }
        };
        let symbol = Symbol {
            name: name.to_owned(),
            kind,
            index,
            assignable,
        };
        let top = self.top_scope_mut();
        top.store.insert(name.to_owned(), symbol.clone());
        top.num_definitions += 1;
        let new_max = top.offset + top.num_definitions;
        self.max_num_definitions = self.max_num_definitions.max(new_max);
        if module_global {
            self.module_global_symbols.push(symbol.clone());
        }
        Some(symbol)
    }

    /// Inserts an already-formed symbol under a (possibly qualified) name.
    /// Used for `module::name` bindings created by imports.
    pub fn define_qualified(&mut self, qualified_name: &str, symbol: Symbol) {
        self.top_scope_mut().store.insert(qualified_name.to_owned(), symbol);
    }

    /// Defines the function's own name for recursive self-reference.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_owned(),
            kind: SymbolKind::Function,
            index: 0,
            assignable: false,
        };
        self.top_scope_mut().store.insert(name.to_owned(), symbol.clone());
        symbol
    }

    /// Defines the `this` pseudo-symbol.
    pub fn define_this(&mut self) -> Symbol {
        let symbol = Symbol {
            name: "this".to_owned(),
            kind: SymbolKind::This,
            index: 0,
            assignable: false,
        };
        self.top_scope_mut().store.insert("this".to_owned(), symbol.clone());
        symbol
    }

    /// Registers a captured free slot for `original` and returns the `Free`
    /// symbol addressing it.
    fn define_free(&mut self, original: &Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let free = Symbol {
            name: original.name.clone(),
            kind: SymbolKind::Free,
            index: (self.free_symbols.len() - 1) as u16,
            assignable: original.assignable,
        };
        self.top_scope_mut().store.insert(free.name.clone(), free.clone());
        free
    }

    fn resolve_own(&self, name: &str) -> Option<Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.store.get(name) {
                return Some(symbol.clone());
            }
        }
        None
    }
}

/// Resolves `name` against a stack of nested symbol tables (innermost last).
///
/// Search order: the innermost table's block scopes inside-out, then context
/// globals, then recursively outward. A local, function-name, `this`, or
/// free symbol found in an enclosing table is captured as `Free` in every
/// table crossed on the way back in.
pub(crate) fn resolve(tables: &mut [SymbolTable], global_store: &GlobalStore, name: &str) -> Option<Symbol> {
    let depth = tables.len();
    if depth == 0 {
        return None;
    }
    if let Some(symbol) = tables[depth - 1].resolve_own(name) {
        return Some(symbol);
    }
    if let Some(symbol) = global_store.lookup(name) {
        return Some(symbol);
    }
    let outer_symbol = resolve(&mut tables[..depth - 1], global_store, name)?;
    match outer_symbol.kind {
        SymbolKind::ModuleGlobal | SymbolKind::ContextGlobal => Some(outer_symbol),
        _ => Some(tables[depth - 1].define_free(&outer_symbol)),
    }
}

/// Host-provided globals: builtins and injected values, addressed by a fixed
/// index assigned at first insertion.
#[derive(Debug, Default)]
pub(crate) struct GlobalStore {
    store: IndexMap<String, Value, ahash::RandomState>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a named global, returning its index.
    pub fn set(&mut self, name: &str, value: Value) -> u16 {
        let entry = self.store.entry(name.to_owned());
        let index = entry.index() as u16;
        *entry.or_insert(Value::Null) = value;
        index
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.store.get_index_of(name).map(|index| Symbol {
            name: name.to_owned(),
            kind: SymbolKind::ContextGlobal,
            index: index as u16,
            assignable: false,
        })
    }

    pub fn get_by_name(&self, name: &str) -> Option<Value> {
        self.store.get(name).copied()
    }

    pub fn get_by_index(&self, index: u16) -> Option<Value> {
        self.store.get_index(usize::from(index)).map(|(_, value)| *value)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.store.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn file_top_scope_defines_module_globals() {
        let store = GlobalStore::new();
        let mut table = SymbolTable::new_file_table(0);
        let a = table.define("a", true, &store).unwrap();
        assert_eq!(a.kind, SymbolKind::ModuleGlobal);
        assert_eq!(a.index, 0);
        table.push_block_scope();
        let b = table.define("b", true, &store).unwrap();
        assert_eq!(b.kind, SymbolKind::Local);
        assert_eq!(b.index, 1);
    }

    #[test]
    fn module_global_offset_is_applied() {
        let store = GlobalStore::new();
        let mut table = SymbolTable::new_file_table(5);
        let a = table.define("a", true, &store).unwrap();
        assert_eq!(a.index, 5);
        assert_eq!(table.next_module_global_offset(), 6);
    }

    #[test]
    fn module_scope_redefinition_takes_a_fresh_slot() {
        let store = GlobalStore::new();
        let mut table = SymbolTable::new_file_table(0);
        let first = table.define("a", true, &store).unwrap();
        let second = table.define("a", true, &store).unwrap();
        assert_ne!(first.index, second.index);
    }

    #[test]
    fn this_and_colons_are_rejected() {
        let store = GlobalStore::new();
        let mut table = SymbolTable::new_file_table(0);
        assert!(table.define("this", true, &store).is_none());
        assert!(table.define("a::b", true, &store).is_none());
    }

    #[test]
    fn shadowing_a_context_global_fails() {
        let mut store = GlobalStore::new();
        store.set("println", Value::Null);
        let mut table = SymbolTable::new_file_table(0);
        assert!(table.define("println", true, &store).is_none());
    }

    #[test]
    fn resolution_captures_locals_as_free() {
        let store = GlobalStore::new();
        let mut outer = SymbolTable::new_function_table();
        outer.define("n", true, &store).unwrap();
        let inner = SymbolTable::new_function_table();
        let mut tables = vec![outer, inner];
        let resolved = resolve(&mut tables, &store, "n").unwrap();
        assert_eq!(resolved.kind, SymbolKind::Free);
        assert_eq!(resolved.index, 0);
        assert_eq!(tables[1].free_symbols.len(), 1);
        assert_eq!(tables[1].free_symbols[0].kind, SymbolKind::Local);
    }

    #[test]
    fn module_globals_resolve_without_capture() {
        let store = GlobalStore::new();
        let mut file = SymbolTable::new_file_table(0);
        file.define("g", true, &store).unwrap();
        let inner = SymbolTable::new_function_table();
        let mut tables = vec![file, inner];
        let resolved = resolve(&mut tables, &store, "g").unwrap();
        assert_eq!(resolved.kind, SymbolKind::ModuleGlobal);
        assert!(tables[1].free_symbols.is_empty());
    }

    #[test]
    fn free_of_free_chains_through_intermediate_tables() {
        let store = GlobalStore::new();
        let mut outer = SymbolTable::new_function_table();
        outer.define("n", true, &store).unwrap();
        let middle = SymbolTable::new_function_table();
        let inner = SymbolTable::new_function_table();
        let mut tables = vec![outer, middle, inner];
        let resolved = resolve(&mut tables, &store, "n").unwrap();
        assert_eq!(resolved.kind, SymbolKind::Free);
        // middle captured the local, inner captured middle's free slot
        assert_eq!(tables[1].free_symbols[0].kind, SymbolKind::Local);
        assert_eq!(tables[2].free_symbols[0].kind, SymbolKind::Free);
    }

    #[test]
    fn global_store_indices_are_stable() {
        let mut store = GlobalStore::new();
        let a = store.set("a", Value::Number(1.0));
        let b = store.set("b", Value::Number(2.0));
        assert_eq!((a, b), (0, 1));
        // update keeps the index
        assert_eq!(store.set("a", Value::Number(3.0)), 0);
        assert_eq!(store.get_by_index(0), Some(Value::Number(3.0)));
    }
}
