//! AST to bytecode compilation.
//!
//! The compiler owns the context-wide constant pool (with string-literal
//! dedup), a stack of file scopes (one per file being compiled, pushed by
//! imports), a stack of compilation scopes (one per function literal being
//! compiled), and the cache of imported modules. Compiler state persists
//! across `compile` calls so module globals accumulate, which is what lets a
//! REPL-style host define a variable in one call and read it in the next.

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use super::{builder::CompilationScope, code::Code, op::Opcode};
use crate::{
    ast::{Block, ExprKind, Expression, FnLiteral, Operator, Statement, StmtKind},
    errors::{ErrorKind, Errors, Position},
    heap::{Heap, ScriptFunction},
    io::FileLoader,
    parser::Parser,
    symbols::{GlobalStore, Symbol, SymbolKind, SymbolTable, resolve},
    value::Value,
};

/// Borrowed context a compilation runs against.
pub(crate) struct CompilerEnv<'a> {
    pub heap: &'a mut Heap,
    pub global_store: &'a GlobalStore,
    pub errors: &'a mut Errors,
    pub files: &'a mut dyn FileLoader,
    pub repl_mode: bool,
}

/// A compiled module: its short name and the module-global symbols it
/// exports, with indices already fixed in the shared globals array.
#[derive(Debug, Clone)]
struct Module {
    name: String,
    symbols: Vec<Symbol>,
}

/// Parser, symbol table stack, and loaded-module list for one source file.
#[derive(Debug, Clone)]
struct FileScope {
    file: Option<Rc<str>>,
    loaded_module_names: Vec<String>,
    /// Function-nesting stack; index 0 is the file-level table.
    tables: Vec<SymbolTable>,
}

#[derive(Debug, Default)]
pub(crate) struct Compiler {
    /// Context-wide constant pool. A GC root: string and function constants
    /// live on the heap.
    pub constants: Vec<Value>,
    /// Dedup table from string-literal contents to constant-pool index.
    string_constants: AHashMap<String, u16>,
    file_scopes: Vec<FileScope>,
    scopes: Vec<CompilationScope>,
    /// Imported modules keyed by canonical file path.
    modules: AHashMap<String, Module>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
            string_constants: AHashMap::new(),
            file_scopes: vec![FileScope {
                file: None,
                loaded_module_names: Vec::new(),
                tables: vec![SymbolTable::new_file_table(0)],
            }],
            scopes: vec![CompilationScope::new()],
            modules: AHashMap::new(),
        }
    }

    /// Compiles `source` into the persistent base scope and returns the
    /// result. On error the compiler rolls back to its pre-call state.
    pub fn compile_source(
        &mut self,
        env: &mut CompilerEnv<'_>,
        source: &str,
        file: Option<Rc<str>>,
    ) -> Option<Rc<Code>> {
        let saved_file_scopes = self.file_scopes.clone();
        let saved_constants_len = self.constants.len();
        let saved_string_constants = self.string_constants.clone();

        let prev_file = if file.is_some() {
            let scope = self.current_file_scope_mut();
            let prev = scope.file.clone();
            scope.file = file;
            Some(prev)
        } else {
            None
        };

        let result = self.compile_code(env, source);

        if let Some(prev) = prev_file {
            self.current_file_scope_mut().file = prev;
        }

        match result {
            Some(()) => Some(self.scope().take_code()),
            None => {
                self.file_scopes = saved_file_scopes;
                self.constants.truncate(saved_constants_len);
                self.string_constants = saved_string_constants;
                self.scopes.truncate(1);
                let _ = self.scope().take_code();
                None
            }
        }
    }

    /// Reads `path` through the host file hook and compiles it.
    pub fn compile_file(&mut self, env: &mut CompilerEnv<'_>, path: &str) -> Option<Rc<Code>> {
        let Some(source) = env.files.read_file(path) else {
            env.errors.add(
                ErrorKind::Compilation,
                Position::default(),
                format!("reading file \"{path}\" failed"),
            );
            return None;
        };
        self.compile_source(env, &source, Some(Rc::from(path)))
    }

    fn compile_code(&mut self, env: &mut CompilerEnv<'_>, source: &str) -> Option<()> {
        let file = self.current_file_scope().file.clone();
        let parser = Parser::new(source, file, env.repl_mode, env.errors);
        let statements = parser.parse_all()?;
        self.compile_statements(env, &statements)
    }

    fn compile_statements(&mut self, env: &mut CompilerEnv<'_>, statements: &[Statement]) -> Option<()> {
        for statement in statements {
            self.compile_statement(env, statement)?;
        }
        Some(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    fn scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compilation scope stack is never empty")
    }

    fn current_file_scope(&self) -> &FileScope {
        self.file_scopes.last().expect("file scope stack is never empty")
    }

    fn current_file_scope_mut(&mut self) -> &mut FileScope {
        self.file_scopes.last_mut().expect("file scope stack is never empty")
    }

    fn tables_mut(&mut self) -> &mut Vec<SymbolTable> {
        &mut self.current_file_scope_mut().tables
    }

    fn table_mut(&mut self) -> &mut SymbolTable {
        self.tables_mut().last_mut().expect("symbol table stack is never empty")
    }

    fn emit(&mut self, op: Opcode, operands: &[u64], pos: &Position) -> usize {
        self.scope().emit(op, operands, pos)
    }

    fn error(&self, env: &mut CompilerEnv<'_>, pos: &Position, message: impl Into<String>) {
        env.errors.add(ErrorKind::Compilation, pos.clone(), message);
    }

    fn add_constant(&mut self, env: &mut CompilerEnv<'_>, value: Value, pos: &Position) -> Option<u16> {
        if self.constants.len() >= usize::from(u16::MAX) {
            self.error(env, pos, "constant pool overflow");
            return None;
        }
        self.constants.push(value);
        Some((self.constants.len() - 1) as u16)
    }

    /// Constant-pool index for a string literal, deduplicated by contents.
    fn string_constant(&mut self, env: &mut CompilerEnv<'_>, literal: &str, pos: &Position) -> Option<u16> {
        if let Some(&ix) = self.string_constants.get(literal) {
            return Some(ix);
        }
        let value = match env.heap.alloc_str(literal) {
            Ok(value) => value,
            Err(err) => {
                self.error(env, pos, err.message);
                return None;
            }
        };
        let ix = self.add_constant(env, value, pos)?;
        self.string_constants.insert(literal.to_owned(), ix);
        Some(ix)
    }

    fn define_symbol(
        &mut self,
        env: &mut CompilerEnv<'_>,
        pos: &Position,
        name: &str,
        assignable: bool,
        can_shadow: bool,
    ) -> Option<Symbol> {
        if !can_shadow && !self.table_mut().is_module_global_scope() {
            let file_scope = self.current_file_scope_mut();
            if resolve(&mut file_scope.tables, env.global_store, name).is_some() {
                self.error(env, pos, format!("symbol \"{name}\" is already defined"));
                return None;
            }
        }
        let symbol = self.table_mut().define(name, assignable, env.global_store);
        match symbol {
            Some(symbol) => Some(symbol),
            None => {
                self.error(env, pos, format!("cannot define symbol \"{name}\""));
                None
            }
        }
    }

    fn resolve_symbol(&mut self, env: &mut CompilerEnv<'_>, name: &str) -> Option<Symbol> {
        let file_scope = self.current_file_scope_mut();
        resolve(&mut file_scope.tables, env.global_store, name)
    }

    fn read_symbol(&mut self, symbol: &Symbol, pos: &Position) {
        match symbol.kind {
            SymbolKind::ModuleGlobal => {
                self.emit(Opcode::GetModuleGlobal, &[u64::from(symbol.index)], pos);
            }
            SymbolKind::ContextGlobal => {
                self.emit(Opcode::GetContextGlobal, &[u64::from(symbol.index)], pos);
            }
            SymbolKind::Local => {
                self.emit(Opcode::GetLocal, &[u64::from(symbol.index)], pos);
            }
            SymbolKind::Free => {
                self.emit(Opcode::GetFree, &[u64::from(symbol.index)], pos);
            }
            SymbolKind::Function => {
                self.emit(Opcode::CurrentFunction, &[], pos);
            }
            SymbolKind::This => {
                self.emit(Opcode::GetThis, &[], pos);
            }
        }
    }

    fn write_symbol(&mut self, env: &mut CompilerEnv<'_>, symbol: &Symbol, define: bool, pos: &Position) -> Option<()> {
        match symbol.kind {
            SymbolKind::ModuleGlobal => {
                let op = if define { Opcode::DefineModuleGlobal } else { Opcode::SetModuleGlobal };
                self.emit(op, &[u64::from(symbol.index)], pos);
                Some(())
            }
            SymbolKind::Local => {
                let op = if define { Opcode::DefineLocal } else { Opcode::SetLocal };
                self.emit(op, &[u64::from(symbol.index)], pos);
                Some(())
            }
            SymbolKind::Free => {
                self.emit(Opcode::SetFree, &[u64::from(symbol.index)], pos);
                Some(())
            }
            _ => {
                self.error(env, pos, format!("symbol \"{}\" is not writable", symbol.name));
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_statement(&mut self, env: &mut CompilerEnv<'_>, statement: &Statement) -> Option<()> {
        let pos = &statement.pos;
        match &statement.kind {
            StmtKind::Define { name, value, assignable } => {
                self.compile_expression(env, value)?;
                let symbol = self.define_symbol(env, &name.pos, &name.name, *assignable, false)?;
                self.write_symbol(env, &symbol, true, pos)?;
            }
            StmtKind::If { cases, alternative } => {
                self.compile_if(env, cases, alternative.as_ref(), pos)?;
            }
            StmtKind::Return(value) => {
                match value {
                    Some(value) => {
                        self.compile_expression(env, value)?;
                        self.emit(Opcode::ReturnValue, &[], pos);
                    }
                    None => {
                        self.emit(Opcode::ReturnNothing, &[], pos);
                    }
                }
            }
            StmtKind::Expression(expression) => {
                self.compile_expression(env, expression)?;
                self.emit(Opcode::Pop, &[], pos);
            }
            StmtKind::While { test, body } => {
                self.compile_while(env, test, body, pos)?;
            }
            StmtKind::Break => {
                let Some(break_ip) = self.scope().current_break_ip() else {
                    self.error(env, pos, "nothing to break from");
                    return None;
                };
                self.emit(Opcode::Jump, &[break_ip as u64], pos);
            }
            StmtKind::Continue => {
                let Some(continue_ip) = self.scope().current_continue_ip() else {
                    self.error(env, pos, "nothing to continue from");
                    return None;
                };
                self.emit(Opcode::Jump, &[continue_ip as u64], pos);
            }
            StmtKind::Foreach { iterator, source, body } => {
                self.compile_foreach(env, iterator, source, body, pos)?;
            }
            StmtKind::ForLoop { init, test, update, body } => {
                self.compile_for_loop(env, init.as_deref(), test.as_deref(), update.as_deref(), body, pos)?;
            }
            StmtKind::Block(block) => {
                self.compile_code_block(env, block)?;
            }
            StmtKind::Import { path } => {
                self.compile_import(env, path, pos)?;
            }
            StmtKind::Recover { error_ident, body } => {
                self.compile_recover(env, error_ident, body, pos)?;
            }
        }
        Some(())
    }

    fn compile_code_block(&mut self, env: &mut CompilerEnv<'_>, block: &Block) -> Option<()> {
        self.table_mut().push_block_scope();
        let result = self.compile_statements(env, &block.statements);
        self.table_mut().pop_block_scope();
        result
    }

    fn compile_if(
        &mut self,
        env: &mut CompilerEnv<'_>,
        cases: &[crate::ast::IfCase],
        alternative: Option<&Block>,
        pos: &Position,
    ) -> Option<()> {
        let mut jump_to_end_ips = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            self.compile_expression(env, &case.test)?;
            let next_case_jump_ip = self.emit(Opcode::JumpIfFalse, &[0xbeef], pos);
            self.compile_code_block(env, &case.consequence)?;
            // no jump needed after the final arm when there is no else
            if i + 1 < cases.len() || alternative.is_some() {
                jump_to_end_ips.push(self.emit(Opcode::Jump, &[0xbeef], pos));
            }
            let after_case_ip = self.scope().ip();
            self.scope().patch_u16_operand(next_case_jump_ip, after_case_ip as u16);
        }
        if let Some(alternative) = alternative {
            self.compile_code_block(env, alternative)?;
        }
        let end_ip = self.scope().ip();
        for jump_ip in jump_to_end_ips {
            self.scope().patch_u16_operand(jump_ip, end_ip as u16);
        }
        Some(())
    }

    fn compile_while(&mut self, env: &mut CompilerEnv<'_>, test: &Expression, body: &Block, pos: &Position) -> Option<()> {
        let before_test_ip = self.scope().ip();
        self.compile_expression(env, test)?;
        let after_test_ip = self.scope().ip();
        // JumpIfTrue hops over the exit jump; break jumps land on it
        self.emit(Opcode::JumpIfTrue, &[(after_test_ip + 6) as u64], pos);
        let jump_to_after_body_ip = self.emit(Opcode::Jump, &[0xdead], pos);
        self.scope().push_continue_ip(before_test_ip);
        self.scope().push_break_ip(jump_to_after_body_ip);
        self.compile_code_block(env, body)?;
        self.scope().pop_break_ip();
        self.scope().pop_continue_ip();
        self.emit(Opcode::Jump, &[before_test_ip as u64], pos);
        let after_body_ip = self.scope().ip();
        self.scope().patch_u16_operand(jump_to_after_body_ip, after_body_ip as u16);
        Some(())
    }

    fn compile_for_loop(
        &mut self,
        env: &mut CompilerEnv<'_>,
        init: Option<&Statement>,
        test: Option<&Expression>,
        update: Option<&Expression>,
        body: &Block,
        pos: &Position,
    ) -> Option<()> {
        self.table_mut().push_block_scope();
        let result = self.compile_for_loop_inner(env, init, test, update, body, pos);
        self.table_mut().pop_block_scope();
        result
    }

    fn compile_for_loop_inner(
        &mut self,
        env: &mut CompilerEnv<'_>,
        init: Option<&Statement>,
        test: Option<&Expression>,
        update: Option<&Expression>,
        body: &Block,
        pos: &Position,
    ) -> Option<()> {
        let mut jump_to_after_update_ip = None;
        if let Some(init) = init {
            self.compile_statement(env, init)?;
            jump_to_after_update_ip = Some(self.emit(Opcode::Jump, &[0xbeef], pos));
        }

        let update_ip = self.scope().ip();
        if let Some(update) = update {
            self.compile_expression(env, update)?;
            self.emit(Opcode::Pop, &[], pos);
        }
        if let Some(jump_ip) = jump_to_after_update_ip {
            let after_update_ip = self.scope().ip();
            self.scope().patch_u16_operand(jump_ip, after_update_ip as u16);
        }

        match test {
            Some(test) => self.compile_expression(env, test)?,
            None => {
                self.emit(Opcode::True, &[], pos);
            }
        }
        let after_test_ip = self.scope().ip();
        self.emit(Opcode::JumpIfTrue, &[(after_test_ip + 6) as u64], pos);
        let jump_to_after_body_ip = self.emit(Opcode::Jump, &[0xdead], pos);

        self.scope().push_continue_ip(update_ip);
        self.scope().push_break_ip(jump_to_after_body_ip);
        self.compile_code_block(env, body)?;
        self.scope().pop_break_ip();
        self.scope().pop_continue_ip();

        self.emit(Opcode::Jump, &[update_ip as u64], pos);
        let after_body_ip = self.scope().ip();
        self.scope().patch_u16_operand(jump_to_after_body_ip, after_body_ip as u16);
        Some(())
    }

    /// Foreach lowers to a hidden index `@i` (plus `@source` when the source
    /// is not already an identifier), a `len(source) == @i` exit test, and a
    /// positional `GetValueAt` read each iteration.
    fn compile_foreach(
        &mut self,
        env: &mut CompilerEnv<'_>,
        iterator: &crate::ast::Ident,
        source: &Expression,
        body: &Block,
        pos: &Position,
    ) -> Option<()> {
        self.table_mut().push_block_scope();
        let result = self.compile_foreach_inner(env, iterator, source, body, pos);
        self.table_mut().pop_block_scope();
        result
    }

    fn compile_foreach_inner(
        &mut self,
        env: &mut CompilerEnv<'_>,
        iterator: &crate::ast::Ident,
        source: &Expression,
        body: &Block,
        pos: &Position,
    ) -> Option<()> {
        // init: @i = 0
        let index_symbol = self.define_symbol(env, pos, "@i", false, true)?;
        self.emit(Opcode::Number, &[0.0f64.to_bits()], pos);
        self.write_symbol(env, &index_symbol, true, pos)?;

        let source_symbol = if let ExprKind::Ident(ident) = &source.kind {
            let Some(symbol) = self.resolve_symbol(env, &ident.name) else {
                self.error(env, &source.pos, format!("symbol \"{}\" could not be resolved", ident.name));
                return None;
            };
            symbol
        } else {
            self.compile_expression(env, source)?;
            let symbol = self.define_symbol(env, &source.pos, "@source", false, true)?;
            self.write_symbol(env, &symbol, true, pos)?;
            symbol
        };

        // update: @i = @i + 1
        let jump_to_after_update_ip = self.emit(Opcode::Jump, &[0xbeef], pos);
        let update_ip = self.scope().ip();
        self.read_symbol(&index_symbol, pos);
        self.emit(Opcode::Number, &[1.0f64.to_bits()], pos);
        self.emit(Opcode::Add, &[], pos);
        self.write_symbol(env, &index_symbol, false, pos)?;
        let after_update_ip = self.scope().ip();
        self.scope().patch_u16_operand(jump_to_after_update_ip, after_update_ip as u16);

        // test: len(source) == @i leaves the loop
        self.read_symbol(&source_symbol, &source.pos);
        self.emit(Opcode::Len, &[], &source.pos);
        self.read_symbol(&index_symbol, pos);
        self.emit(Opcode::ComparePlain, &[], pos);
        self.emit(Opcode::Equal, &[], pos);
        let after_test_ip = self.scope().ip();
        self.emit(Opcode::JumpIfFalse, &[(after_test_ip + 6) as u64], pos);
        let jump_to_after_body_ip = self.emit(Opcode::Jump, &[0xdead], pos);

        // iterator = source[@i]
        self.read_symbol(&source_symbol, pos);
        self.read_symbol(&index_symbol, pos);
        self.emit(Opcode::GetValueAt, &[], pos);
        let iter_symbol = self.define_symbol(env, &iterator.pos, &iterator.name, false, false)?;
        self.write_symbol(env, &iter_symbol, true, pos)?;

        self.scope().push_continue_ip(update_ip);
        self.scope().push_break_ip(jump_to_after_body_ip);
        self.compile_code_block(env, body)?;
        self.scope().pop_break_ip();
        self.scope().pop_continue_ip();

        self.emit(Opcode::Jump, &[update_ip as u64], pos);
        let after_body_ip = self.scope().ip();
        self.scope().patch_u16_operand(jump_to_after_body_ip, after_body_ip as u16);
        Some(())
    }

    fn compile_recover(
        &mut self,
        env: &mut CompilerEnv<'_>,
        error_ident: &crate::ast::Ident,
        body: &Block,
        pos: &Position,
    ) -> Option<()> {
        if self.table_mut().is_module_global_scope() {
            self.error(env, pos, "recover statement cannot be defined in global scope");
            return None;
        }
        if !self.table_mut().is_top_block_scope() {
            self.error(env, pos, "recover statement cannot be defined within other statements");
            return None;
        }

        let recover_ip = self.emit(Opcode::SetRecover, &[0xbeef], pos);
        let jump_to_after_recover_ip = self.emit(Opcode::Jump, &[0xbeef], pos);
        let after_jump_ip = self.scope().ip();
        self.scope().patch_u16_operand(recover_ip, after_jump_ip as u16);

        self.table_mut().push_block_scope();
        let result = (|| {
            let error_symbol = self.define_symbol(env, &error_ident.pos, &error_ident.name, false, false)?;
            // the VM pushes the recovered error before jumping here
            self.write_symbol(env, &error_symbol, true, pos)?;
            self.compile_statements(env, &body.statements)?;
            if !matches!(
                self.scope().last_opcode(),
                Some(Opcode::ReturnValue | Opcode::ReturnNothing)
            ) {
                self.error(env, pos, "recover body must end with a return statement");
                return None;
            }
            Some(())
        })();
        self.table_mut().pop_block_scope();
        result?;

        let after_recover_ip = self.scope().ip();
        self.scope().patch_u16_operand(jump_to_after_recover_ip, after_recover_ip as u16);
        Some(())
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    fn compile_import(&mut self, env: &mut CompilerEnv<'_>, module_path: &str, pos: &Position) -> Option<()> {
        let module_name = module_name_of(module_path).to_owned();
        if self
            .current_file_scope()
            .loaded_module_names
            .iter()
            .any(|loaded| *loaded == module_name)
        {
            self.error(env, pos, format!("module \"{module_name}\" was already imported"));
            return None;
        }

        let file_path = if module_path.starts_with('/') {
            format!("{module_path}.ape")
        } else {
            let dir = self
                .current_file_scope()
                .file
                .as_deref()
                .map(dir_path_of)
                .unwrap_or_default();
            format!("{dir}{module_path}.ape")
        };
        let canonical_path = canonicalise_path(&file_path);

        if !self.table_mut().is_module_global_scope() {
            self.error(env, pos, "modules can only be imported in global scope");
            return None;
        }

        let cyclic = self
            .file_scopes
            .iter()
            .any(|scope| scope.file.as_deref() == Some(canonical_path.as_str()));
        if cyclic {
            self.error(env, pos, format!("cyclic reference of file \"{canonical_path}\""));
            return None;
        }

        if !self.modules.contains_key(&canonical_path) {
            let Some(source) = env.files.read_file(&canonical_path) else {
                self.error(env, pos, format!("reading module file \"{canonical_path}\" failed"));
                return None;
            };
            self.push_file_scope(&canonical_path);
            let compiled = self.compile_code(env, &source);
            let module = compiled.map(|()| Module {
                name: module_name.clone(),
                symbols: self.table_mut().module_global_symbols.clone(),
            });
            self.pop_file_scope();
            let module = module?;
            self.modules.insert(canonical_path.clone(), module);
        }

        let module = self.modules.get(&canonical_path).cloned().expect("module cached above");
        for symbol in &module.symbols {
            let qualified = format!("{}::{}", module.name, symbol.name);
            self.table_mut().define_qualified(&qualified, symbol.clone());
        }
        self.current_file_scope_mut().loaded_module_names.push(module_name);
        Some(())
    }

    fn push_file_scope(&mut self, path: &str) {
        let offset = self
            .table_mut()
            .next_module_global_offset();
        self.file_scopes.push(FileScope {
            file: Some(Rc::from(path)),
            loaded_module_names: Vec::new(),
            tables: vec![SymbolTable::new_file_table(offset)],
        });
    }

    fn pop_file_scope(&mut self) {
        let popped = self.file_scopes.pop().expect("file scope stack is never empty");
        let popped_num_defs = popped
            .tables
            .first()
            .map(SymbolTable::top_scope_num_definitions)
            .unwrap_or_default();
        if !self.file_scopes.is_empty() {
            self.table_mut().absorb_popped_file_definitions(popped_num_defs);
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expression(&mut self, env: &mut CompilerEnv<'_>, expression: &Expression) -> Option<()> {
        let pos = &expression.pos;
        match &expression.kind {
            ExprKind::Ident(ident) => {
                let Some(symbol) = self.resolve_symbol(env, &ident.name) else {
                    self.error(env, &ident.pos, format!("symbol \"{}\" could not be resolved", ident.name));
                    return None;
                };
                self.read_symbol(&symbol, &ident.pos);
            }
            ExprKind::NumberLiteral(value) => {
                self.emit(Opcode::Number, &[value.to_bits()], pos);
            }
            ExprKind::BoolLiteral(true) => {
                self.emit(Opcode::True, &[], pos);
            }
            ExprKind::BoolLiteral(false) => {
                self.emit(Opcode::False, &[], pos);
            }
            ExprKind::StringLiteral(literal) => {
                let ix = self.string_constant(env, literal, pos)?;
                self.emit(Opcode::Constant, &[u64::from(ix)], pos);
            }
            ExprKind::NullLiteral => {
                self.emit(Opcode::Null, &[], pos);
            }
            ExprKind::ArrayLiteral(items) => {
                for item in items {
                    self.compile_expression(env, item)?;
                }
                self.emit(Opcode::Array, &[items.len() as u64], pos);
            }
            ExprKind::MapLiteral(entries) => {
                self.emit(Opcode::MapStart, &[entries.len() as u64], pos);
                for (key, value) in entries {
                    self.compile_expression(env, key)?;
                    self.compile_expression(env, value)?;
                }
                self.emit(Opcode::MapEnd, &[entries.len() as u64], pos);
            }
            ExprKind::Prefix { op, right } => {
                self.compile_expression(env, right)?;
                let opcode = match op {
                    Operator::Minus => Opcode::Minus,
                    Operator::Bang => Opcode::Not,
                    _ => {
                        self.error(env, pos, format!("unknown prefix operator \"{op}\""));
                        return None;
                    }
                };
                self.emit(opcode, &[], pos);
            }
            ExprKind::Infix { op, left, right } => {
                self.compile_infix(env, *op, left, right, pos)?;
            }
            ExprKind::FnLiteral(fn_literal) => {
                self.compile_fn_literal(env, fn_literal, pos)?;
            }
            ExprKind::Call { function, args } => {
                self.compile_expression(env, function)?;
                for arg in args {
                    self.compile_expression(env, arg)?;
                }
                self.emit(Opcode::Call, &[args.len() as u64], pos);
            }
            ExprKind::Index { left, index } => {
                self.compile_expression(env, left)?;
                self.compile_expression(env, index)?;
                self.emit(Opcode::GetIndex, &[], pos);
            }
            ExprKind::Assign { dest, source, is_postfix } => {
                self.compile_assign(env, dest, source, *is_postfix)?;
            }
            ExprKind::Logical { op, left, right } => {
                self.compile_expression(env, left)?;
                self.emit(Opcode::Dup, &[], pos);
                let short_circuit_ip = if *op == Operator::LogicalAnd {
                    self.emit(Opcode::JumpIfFalse, &[0xbeef], pos)
                } else {
                    self.emit(Opcode::JumpIfTrue, &[0xbeef], pos)
                };
                self.emit(Opcode::Pop, &[], pos);
                self.compile_expression(env, right)?;
                let after_right_ip = self.scope().ip();
                self.scope().patch_u16_operand(short_circuit_ip, after_right_ip as u16);
            }
            ExprKind::Ternary { test, if_true, if_false } => {
                self.compile_expression(env, test)?;
                let else_jump_ip = self.emit(Opcode::JumpIfFalse, &[0xbeef], pos);
                self.compile_expression(env, if_true)?;
                let end_jump_ip = self.emit(Opcode::Jump, &[0xbeef], pos);
                let else_ip = self.scope().ip();
                self.scope().patch_u16_operand(else_jump_ip, else_ip as u16);
                self.compile_expression(env, if_false)?;
                let end_ip = self.scope().ip();
                self.scope().patch_u16_operand(end_jump_ip, end_ip as u16);
            }
        }
        Some(())
    }

    /// Comparison operators go through the two-step protocol: a compare
    /// opcode pushes a signed number, then a consumer turns it into a bool.
    /// `<`/`<=` swap operands and reuse the greater-than consumers.
    fn compile_infix(
        &mut self,
        env: &mut CompilerEnv<'_>,
        op: Operator,
        left: &Expression,
        right: &Expression,
        pos: &Position,
    ) -> Option<()> {
        let swap_operands = matches!(op, Operator::Lt | Operator::Lte);
        if swap_operands {
            self.compile_expression(env, right)?;
            self.compile_expression(env, left)?;
        } else {
            self.compile_expression(env, left)?;
            self.compile_expression(env, right)?;
        }
        match op {
            Operator::Plus => {
                self.emit(Opcode::Add, &[], pos);
            }
            Operator::Minus => {
                self.emit(Opcode::Sub, &[], pos);
            }
            Operator::Asterisk => {
                self.emit(Opcode::Mul, &[], pos);
            }
            Operator::Slash => {
                self.emit(Opcode::Div, &[], pos);
            }
            Operator::Percent => {
                self.emit(Opcode::Mod, &[], pos);
            }
            Operator::BitAnd => {
                self.emit(Opcode::BitAnd, &[], pos);
            }
            Operator::BitOr => {
                self.emit(Opcode::BitOr, &[], pos);
            }
            Operator::BitXor => {
                self.emit(Opcode::BitXor, &[], pos);
            }
            Operator::LShift => {
                self.emit(Opcode::LShift, &[], pos);
            }
            Operator::RShift => {
                self.emit(Opcode::RShift, &[], pos);
            }
            Operator::Eq => {
                self.emit(Opcode::CompareEq, &[], pos);
                self.emit(Opcode::Equal, &[], pos);
            }
            Operator::NotEq => {
                self.emit(Opcode::CompareEq, &[], pos);
                self.emit(Opcode::NotEqual, &[], pos);
            }
            Operator::Gt | Operator::Lt => {
                self.emit(Opcode::ComparePlain, &[], pos);
                self.emit(Opcode::GreaterThan, &[], pos);
            }
            Operator::Gte | Operator::Lte => {
                self.emit(Opcode::ComparePlain, &[], pos);
                self.emit(Opcode::GreaterEqual, &[], pos);
            }
            _ => {
                self.error(env, pos, format!("unknown infix operator \"{op}\""));
                return None;
            }
        }
        Some(())
    }

    fn compile_assign(
        &mut self,
        env: &mut CompilerEnv<'_>,
        dest: &Expression,
        source: &Expression,
        is_postfix: bool,
    ) -> Option<()> {
        if !matches!(dest.kind, ExprKind::Ident(_) | ExprKind::Index { .. }) {
            self.error(env, &dest.pos, "expression is not assignable");
            return None;
        }

        // postfix keeps the original value as the expression result
        if is_postfix {
            self.compile_expression(env, dest)?;
        }

        self.compile_expression(env, source)?;
        self.emit(Opcode::Dup, &[], &dest.pos);

        match &dest.kind {
            ExprKind::Ident(ident) => {
                let symbol = match self.resolve_symbol(env, &ident.name) {
                    Some(symbol) => symbol,
                    // assigning to an unknown name defines it
                    None => self.define_symbol(env, &ident.pos, &ident.name, true, true)?,
                };
                if !symbol.assignable {
                    self.error(env, &dest.pos, format!("symbol \"{}\" is not assignable", ident.name));
                    return None;
                }
                self.write_symbol(env, &symbol, false, &dest.pos)?;
            }
            ExprKind::Index { left, index } => {
                self.compile_expression(env, left)?;
                self.compile_expression(env, index)?;
                self.emit(Opcode::SetIndex, &[], &dest.pos);
            }
            _ => unreachable!("checked above"),
        }

        if is_postfix {
            self.emit(Opcode::Pop, &[], &dest.pos);
        }
        Some(())
    }

    fn compile_fn_literal(&mut self, env: &mut CompilerEnv<'_>, fn_literal: &FnLiteral, pos: &Position) -> Option<()> {
        self.scopes.push(CompilationScope::new());
        self.tables_mut().push(SymbolTable::new_function_table());

        let result = (|| {
            if let Some(name) = &fn_literal.name {
                self.table_mut().define_function_name(name);
            }
            self.table_mut().define_this();
            for param in &fn_literal.params {
                self.define_symbol(env, &param.pos, &param.name, true, false)?;
            }

            self.compile_statements(env, &fn_literal.body.statements)?;
            if !matches!(
                self.scope().last_opcode(),
                Some(Opcode::ReturnValue | Opcode::ReturnNothing)
            ) {
                self.emit(Opcode::ReturnNothing, &[], pos);
            }
            Some(())
        })();

        let table = self.tables_mut().pop().expect("function table pushed above");
        let scope = self.scopes.pop().expect("function scope pushed above");
        result?;

        let num_locals = table.max_num_definitions;
        let free_symbols = table.free_symbols;
        let code = scope.into_code();

        let function = ScriptFunction {
            name: fn_literal.name.clone(),
            code,
            num_locals,
            num_args: fn_literal.params.len() as u8,
            free_values: SmallVec::new(),
        };
        let value = match env.heap.alloc_function(function) {
            Ok(value) => value,
            Err(err) => {
                self.error(env, pos, err.message);
                return None;
            }
        };
        let const_ix = self.add_constant(env, value, pos)?;

        for free_symbol in &free_symbols {
            self.read_symbol(free_symbol, pos);
        }
        self.emit(Opcode::Function, &[u64::from(const_ix), free_symbols.len() as u64], pos);
        Some(())
    }
}

fn module_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Directory prefix of a file path, including the trailing slash.
fn dir_path_of(path: &str) -> String {
    match path.rfind('/') {
        Some(ix) => path[..=ix].to_owned(),
        None => String::new(),
    }
}

/// Normalizes a path: drops `.` segments and collapses `..` into their
/// parent. Leading slashes (absolute paths) are preserved.
fn canonicalise_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() && !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::NoFiles;

    fn compile(source: &str) -> (Rc<Code>, Compiler, Heap) {
        let mut heap = Heap::new();
        let global_store = GlobalStore::new();
        let mut errors = Errors::new();
        let mut files = NoFiles;
        let mut compiler = Compiler::new();
        let code = {
            let mut env = CompilerEnv {
                heap: &mut heap,
                global_store: &global_store,
                errors: &mut errors,
                files: &mut files,
                repl_mode: false,
            };
            compiler.compile_source(&mut env, source, None)
        };
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors.first());
        (code.expect("compilation failed"), compiler, heap)
    }

    fn compile_err(source: &str) -> String {
        let mut heap = Heap::new();
        let global_store = GlobalStore::new();
        let mut errors = Errors::new();
        let mut files = NoFiles;
        let mut compiler = Compiler::new();
        let code = {
            let mut env = CompilerEnv {
                heap: &mut heap,
                global_store: &global_store,
                errors: &mut errors,
                files: &mut files,
                repl_mode: false,
            };
            compiler.compile_source(&mut env, source, None)
        };
        assert!(code.is_none());
        errors.first().expect("error expected").message.clone()
    }

    #[test]
    fn source_positions_parallel_bytecode() {
        let (code, _, _) = compile("var x = 1 + 2\nx * 3");
        assert_eq!(code.len(), code.src_positions().len());
        assert!(code.src_positions().iter().all(|p| p.line < 2));
    }

    #[test]
    fn string_literals_deduplicate() {
        let (_, compiler, _) = compile(r#"var a = "s"; var b = "s"; var c = "t""#);
        // two distinct strings in the pool
        assert_eq!(compiler.constants.len(), 2);
    }

    #[test]
    fn numbers_are_inline_not_pooled() {
        let (_, compiler, _) = compile("1 + 2 + 3");
        assert_eq!(compiler.constants.len(), 0);
    }

    #[test]
    fn assignment_to_const_is_rejected() {
        let message = compile_err("const x = 1; x = 2");
        assert!(message.contains("not assignable"), "{message}");
    }

    #[test]
    fn duplicate_local_definition_is_rejected() {
        let message = compile_err("function f() { var a = 1; var a = 2 }");
        assert!(message.contains("already defined"), "{message}");
    }

    #[test]
    fn unresolved_symbol_is_rejected() {
        let message = compile_err("missing()");
        assert!(message.contains("could not be resolved"), "{message}");
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let message = compile_err("break");
        assert!(message.contains("break"), "{message}");
    }

    #[test]
    fn recover_in_global_scope_is_rejected() {
        let message = compile_err("recover (e) { return 1 }");
        assert!(message.contains("global scope"), "{message}");
    }

    #[test]
    fn recover_body_must_end_with_return() {
        let message = compile_err("function f() { recover (e) { var x = 1 } }");
        assert!(message.contains("return"), "{message}");
    }

    #[test]
    fn import_outside_global_scope_is_rejected() {
        let message = compile_err("function f() { import \"lib\" }");
        // inner statements hit the module-global check first
        assert!(message.contains("global scope"), "{message}");
    }

    #[test]
    fn failed_compile_rolls_back_constants() {
        let mut heap = Heap::new();
        let global_store = GlobalStore::new();
        let mut errors = Errors::new();
        let mut files = NoFiles;
        let mut compiler = Compiler::new();
        let mut env = CompilerEnv {
            heap: &mut heap,
            global_store: &global_store,
            errors: &mut errors,
            files: &mut files,
            repl_mode: false,
        };
        assert!(compiler.compile_source(&mut env, "var a = \"x\"; missing()", None).is_none());
        assert_eq!(compiler.constants.len(), 0);
        assert!(compiler.string_constants.is_empty());
    }

    #[test]
    fn canonicalise_collapses_dots() {
        assert_eq!(canonicalise_path("a/./b/../c.ape"), "a/c.ape");
        assert_eq!(canonicalise_path("/x/y/../z.ape"), "/x/z.ape");
        assert_eq!(canonicalise_path("../lib.ape"), "../lib.ape");
    }

    #[test]
    fn module_globals_persist_across_compiles() {
        let mut heap = Heap::new();
        let global_store = GlobalStore::new();
        let mut errors = Errors::new();
        let mut files = NoFiles;
        let mut compiler = Compiler::new();
        let mut env = CompilerEnv {
            heap: &mut heap,
            global_store: &global_store,
            errors: &mut errors,
            files: &mut files,
            repl_mode: false,
        };
        compiler.compile_source(&mut env, "var a = 1", None).expect("first compile");
        // `a` is still defined for the next compilation
        compiler.compile_source(&mut env, "a + 1", None).expect("second compile");
        assert!(env.errors.is_empty());
    }
}
