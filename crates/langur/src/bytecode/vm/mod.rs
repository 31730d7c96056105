//! The virtual machine: frame stack, evaluation stack, opcode dispatch,
//! recovery, timeouts, and collection triggers.
//!
//! Execution state that must survive between host `execute` calls (module
//! globals, the interned operator-overload keys) lives in [`VmState`] on the
//! context; a [`Vm`] wires that state to the heap, global store, error list,
//! and host hooks for the duration of one run.

mod binary;
mod call;
mod compare;

use std::{
    rc::Rc,
    time::{Duration, Instant},
};

use super::{code::Code, op::Opcode};
use crate::{
    errors::{ErrorKind, Errors, Position, RunError, RunResult, Traceback},
    heap::{Heap, ScriptFunction},
    io::{FileLoader, ScriptOut},
    symbols::GlobalStore,
    tracer::VmTracer,
    value::Value,
};

pub(crate) const STACK_MAX: usize = 2048;
pub(crate) const THIS_STACK_MAX: usize = 256;
pub(crate) const FRAMES_MAX: usize = 1024;

/// Instructions between wall-clock checks when a time limit is configured.
const TIME_CHECK_INTERVAL: usize = 1000;

/// Size of the opcode-indexed overload-key table.
const OVERLOAD_TABLE_SIZE: usize = 64;

/// A single function activation record.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The function value being executed; a GC root while the frame lives.
    pub function: Value,
    pub code: Rc<Code>,
    pub ip: usize,
    pub base_pointer: usize,
    /// Armed recovery target within this frame's bytecode.
    pub recover_ip: Option<usize>,
    pub is_recovering: bool,
}

/// VM state preserved across `execute` calls on one context.
#[derive(Debug)]
pub(crate) struct VmState {
    /// Module globals, addressed by fixed index; grows on define.
    pub globals: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    /// Auxiliary stack holding composites under construction so collection
    /// can find them as roots.
    this_stack: Vec<Value>,
    this_sp: usize,
    frames: Vec<Frame>,
    last_popped: Value,
    /// Interned overload key strings indexed by opcode byte.
    overload_keys: [Option<Value>; OVERLOAD_TABLE_SIZE],
    running: bool,
}

impl VmState {
    pub fn new(heap: &mut Heap) -> RunResult<Self> {
        let mut overload_keys = [None; OVERLOAD_TABLE_SIZE];
        let pairs: [(Opcode, &str); 13] = [
            (Opcode::Add, "__operator_add__"),
            (Opcode::Sub, "__operator_sub__"),
            (Opcode::Mul, "__operator_mul__"),
            (Opcode::Div, "__operator_div__"),
            (Opcode::Mod, "__operator_mod__"),
            (Opcode::BitOr, "__operator_or__"),
            (Opcode::BitXor, "__operator_xor__"),
            (Opcode::BitAnd, "__operator_and__"),
            (Opcode::LShift, "__operator_lshift__"),
            (Opcode::RShift, "__operator_rshift__"),
            (Opcode::Minus, "__operator_minus__"),
            (Opcode::Not, "__operator_bang__"),
            (Opcode::ComparePlain, "__cmp__"),
        ];
        for (op, key) in pairs {
            overload_keys[op as usize] = Some(heap.alloc_str(key)?);
        }
        Ok(Self {
            globals: Vec::new(),
            stack: vec![Value::Null; STACK_MAX],
            sp: 0,
            this_stack: vec![Value::Null; THIS_STACK_MAX],
            this_sp: 0,
            frames: Vec::new(),
            last_popped: Value::Null,
            overload_keys,
            running: false,
        })
    }

    /// Empties both stacks and pops all frames, preserving globals. Used
    /// between independent host calls to `execute`.
    pub fn reset(&mut self) {
        self.sp = 0;
        self.this_sp = 0;
        self.frames.clear();
        self.last_popped = Value::Null;
        self.running = false;
    }

    /// Marks every root reachable from VM state.
    pub fn mark_roots(&self, heap: &mut Heap) {
        for value in &self.globals {
            heap.mark_value(*value);
        }
        for value in &self.stack[..self.sp] {
            heap.mark_value(*value);
        }
        for value in &self.this_stack[..self.this_sp] {
            heap.mark_value(*value);
        }
        for frame in &self.frames {
            heap.mark_value(frame.function);
        }
        heap.mark_value(self.last_popped);
        for key in self.overload_keys.iter().flatten() {
            heap.mark_value(*key);
        }
    }
}

/// A VM wired to the context it runs against.
pub(crate) struct Vm<'a> {
    pub state: &'a mut VmState,
    pub heap: &'a mut Heap,
    pub global_store: &'a GlobalStore,
    pub constants: &'a [Value],
    pub errors: &'a mut Errors,
    pub out: &'a mut dyn ScriptOut,
    pub files: &'a mut dyn FileLoader,
    pub tracer: &'a mut dyn VmTracer,
    pub max_execution_time: Option<Duration>,
}

impl Vm<'_> {
    /// Wraps `code` in a synthetic main function and executes it. The result
    /// is the value popped by the last top-level expression statement; errors
    /// are reported through the shared error list.
    pub fn run(&mut self, code: &Rc<Code>) -> Value {
        if self.state.running {
            self.errors.add(
                ErrorKind::Runtime,
                Position::default(),
                "context is already executing",
            );
            return Value::Null;
        }
        self.state.running = true;
        let result = self.run_main(code);
        self.state.running = false;
        match result {
            Ok(value) => value,
            Err(err) => {
                // errors raised outside the dispatch loop (e.g. setup)
                self.errors.add_run_error(err, Position::default());
                Value::Null
            }
        }
    }

    fn run_main(&mut self, code: &Rc<Code>) -> RunResult<Value> {
        let main_fn = self.heap.alloc_function(ScriptFunction {
            name: Some("main".to_owned()),
            code: code.clone(),
            num_locals: 0,
            num_args: 0,
            free_values: smallvec::SmallVec::new(),
        })?;
        self.push(main_fn)?;
        self.push_frame(main_fn, self.state.sp)?;
        self.dispatch_loop();
        // unrecovered errors get a traceback before control returns
        if !self.errors.is_empty() {
            let mut traceback = Traceback::default();
            self.append_frames(&mut traceback);
            if let Some(error) = self.errors.last_mut() {
                match &mut error.traceback {
                    Some(existing) => {
                        for entry in traceback.entries() {
                            existing.append(entry.function_name.clone(), entry.position.clone());
                        }
                    }
                    None => error.traceback = Some(traceback),
                }
            }
        }
        while !self.state.frames.is_empty() {
            self.pop_frame();
        }
        Ok(self.state.last_popped)
    }

    fn dispatch_loop(&mut self) {
        let start = Instant::now();
        let mut time_check_counter = 0usize;
        loop {
            let Some(frame) = self.state.frames.last() else { break };
            if frame.ip >= frame.code.len() {
                break;
            }
            let src_ip = frame.ip;
            let step = self.dispatch_one();
            match step {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::MainReturned) => break,
                Err(err) => {
                    if !self.raise(err, src_ip) {
                        break;
                    }
                }
            }
            if let Some(limit) = self.max_execution_time {
                time_check_counter += 1;
                if time_check_counter > TIME_CHECK_INTERVAL {
                    time_check_counter = 0;
                    let elapsed = start.elapsed();
                    if elapsed > limit {
                        let err = RunError::timeout(format!(
                            "execution took more than {} ms",
                            limit.as_millis()
                        ));
                        if !self.raise(err, src_ip) {
                            break;
                        }
                    }
                }
            }
            if self.heap.should_sweep() {
                self.collect_garbage();
            }
        }
    }

    fn dispatch_one(&mut self) -> RunResult<StepResult> {
        let op_byte = self.fetch_byte();
        let Some(op) = Opcode::from_repr(op_byte) else {
            return Err(RunError::runtime(format!("unknown opcode: 0x{op_byte:x}")));
        };
        match op {
            Opcode::Constant => {
                let ix = usize::from(self.fetch_u16());
                let Some(constant) = self.constants.get(ix).copied() else {
                    return Err(RunError::runtime(format!("constant at {ix} not found")));
                };
                self.push(constant)?;
            }
            Opcode::Pop => {
                self.state.last_popped = self.pop()?;
            }
            Opcode::Dup => {
                let top = self.stack_top()?;
                self.push(top)?;
            }
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,
            Opcode::Null => self.push(Value::Null)?,
            Opcode::Number => {
                let bits = self.fetch_u64();
                self.push(Value::Number(f64::from_bits(bits)))?;
            }
            Opcode::Array => {
                let count = usize::from(self.fetch_u16());
                let items = self.pop_many(count)?;
                let array = self.heap.alloc_array(items)?;
                self.push(array)?;
            }
            Opcode::MapStart => {
                let count = usize::from(self.fetch_u16());
                let map = self.heap.alloc_map_with_capacity(count)?;
                self.this_push(map)?;
            }
            Opcode::MapEnd => {
                let count = usize::from(self.fetch_u16());
                self.finish_map(count)?;
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::BitAnd
            | Opcode::LShift
            | Opcode::RShift => {
                self.binary_op(op)?;
            }
            Opcode::Minus | Opcode::Not => {
                self.unary_op(op)?;
            }
            Opcode::Equal => {
                let result = self.pop_comparison_result()?;
                self.push(Value::Bool(result == 0.0))?;
            }
            Opcode::NotEqual => {
                let result = self.pop_comparison_result()?;
                self.push(Value::Bool(result != 0.0))?;
            }
            Opcode::GreaterThan => {
                let result = self.pop_comparison_result()?;
                self.push(Value::Bool(result > 0.0))?;
            }
            Opcode::GreaterEqual => {
                let result = self.pop_comparison_result()?;
                self.push(Value::Bool(result >= 0.0))?;
            }
            Opcode::ComparePlain | Opcode::CompareEq => {
                self.compare_op(op)?;
            }
            Opcode::Jump => {
                let target = usize::from(self.fetch_u16());
                self.frame_mut().ip = target;
            }
            Opcode::JumpIfFalse => {
                let target = usize::from(self.fetch_u16());
                let test = self.pop()?;
                if !test.is_truthy(self.heap) {
                    self.frame_mut().ip = target;
                }
            }
            Opcode::JumpIfTrue => {
                let target = usize::from(self.fetch_u16());
                let test = self.pop()?;
                if test.is_truthy(self.heap) {
                    self.frame_mut().ip = target;
                }
            }
            Opcode::DefineModuleGlobal | Opcode::SetModuleGlobal => {
                let ix = usize::from(self.fetch_u16());
                let value = self.pop()?;
                if self.state.globals.len() <= ix {
                    self.state.globals.resize(ix + 1, Value::Null);
                }
                self.state.globals[ix] = value;
            }
            Opcode::GetModuleGlobal => {
                let ix = usize::from(self.fetch_u16());
                let value = self.state.globals.get(ix).copied().unwrap_or(Value::Null);
                self.push(value)?;
            }
            Opcode::GetContextGlobal => {
                let ix = self.fetch_u16();
                let Some(value) = self.global_store.get_by_index(ix) else {
                    return Err(RunError::runtime(format!("global value at {ix} not found")));
                };
                self.push(value)?;
            }
            Opcode::DefineLocal | Opcode::SetLocal => {
                let slot = usize::from(self.fetch_u8());
                let value = self.pop()?;
                let base = self.frame().base_pointer;
                self.stack_set(base + slot, value)?;
            }
            Opcode::GetLocal => {
                let slot = usize::from(self.fetch_u8());
                let base = self.frame().base_pointer;
                let value = self.stack_get(base + slot)?;
                self.push(value)?;
            }
            Opcode::GetFree => {
                let slot = usize::from(self.fetch_u8());
                let Value::Function(id) = self.frame().function else {
                    return Err(RunError::runtime("current frame has no function"));
                };
                let value = self
                    .heap
                    .function(id)
                    .free_values
                    .get(slot)
                    .copied()
                    .unwrap_or(Value::Null);
                self.push(value)?;
            }
            Opcode::SetFree => {
                let slot = usize::from(self.fetch_u8());
                let value = self.pop()?;
                let Value::Function(id) = self.frame().function else {
                    return Err(RunError::runtime("current frame has no function"));
                };
                let function = self.heap.function_mut(id);
                if slot < function.free_values.len() {
                    function.free_values[slot] = value;
                } else {
                    return Err(RunError::runtime(format!("free value at {slot} not found")));
                }
            }
            Opcode::CurrentFunction => {
                let function = self.frame().function;
                self.push(function)?;
            }
            Opcode::GetThis => {
                if self.state.this_sp == 0 {
                    return Err(RunError::runtime("\"this\" is not available here"));
                }
                let value = self.state.this_stack[self.state.this_sp - 1];
                self.push(value)?;
            }
            Opcode::GetIndex => self.get_index()?,
            Opcode::SetIndex => self.set_index()?,
            Opcode::GetValueAt => self.get_value_at()?,
            Opcode::Call => {
                let argc = usize::from(self.fetch_u8());
                self.call_value(argc)?;
            }
            Opcode::ReturnValue => {
                let value = self.pop()?;
                let finished = self.return_from_frame(value)?;
                if finished {
                    return Ok(StepResult::MainReturned);
                }
            }
            Opcode::ReturnNothing => {
                let finished = self.return_from_frame(Value::Null)?;
                if finished {
                    return Ok(StepResult::MainReturned);
                }
            }
            Opcode::Function => {
                let const_ix = usize::from(self.fetch_u16());
                let num_free = usize::from(self.fetch_u8());
                self.make_closure(const_ix, num_free)?;
            }
            Opcode::Len => {
                let value = self.pop()?;
                let length = match value {
                    Value::Str(id) => self.heap.str_value(id).len(),
                    Value::Array(id) => self.heap.array(id).len(),
                    Value::Map(id) => self.heap.map(id).len(),
                    other => {
                        return Err(RunError::runtime(format!(
                            "cannot get length of {}",
                            other.kind_name()
                        )));
                    }
                };
                self.push(Value::Number(length as f64))?;
            }
            Opcode::SetRecover => {
                let target = usize::from(self.fetch_u16());
                self.frame_mut().recover_ip = Some(target);
            }
        }
        Ok(StepResult::Continue)
    }

    // ------------------------------------------------------------------
    // Frames and fetching
    // ------------------------------------------------------------------

    fn frame(&self) -> &Frame {
        self.state.frames.last().expect("dispatch requires a live frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.state.frames.last_mut().expect("dispatch requires a live frame")
    }

    fn fetch_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.code.bytecode()[frame.ip];
        frame.ip += 1;
        byte
    }

    fn fetch_u8(&mut self) -> u8 {
        self.fetch_byte()
    }

    fn fetch_u16(&mut self) -> u16 {
        let hi = self.fetch_byte();
        let lo = self.fetch_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn fetch_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = self.fetch_byte();
        }
        u64::from_be_bytes(bytes)
    }

    pub(super) fn position_of(&self, src_ip: usize) -> Position {
        self.state
            .frames
            .last()
            .map(|frame| frame.code.position_at(src_ip))
            .unwrap_or_default()
    }

    pub(super) fn push_frame(&mut self, function: Value, base_pointer: usize) -> RunResult<()> {
        if self.state.frames.len() >= FRAMES_MAX {
            return Err(RunError::runtime("frames overflow"));
        }
        let Value::Function(id) = function else {
            return Err(RunError::runtime("cannot push frame for a non-function"));
        };
        let script_fn = self.heap.function(id);
        let code = script_fn.code.clone();
        let num_locals = usize::from(script_fn.num_locals);
        let name = script_fn.name.clone().unwrap_or_else(|| "anonymous".to_owned());
        let new_sp = base_pointer + num_locals;
        if new_sp > STACK_MAX {
            return Err(RunError::runtime("stack overflow"));
        }
        self.state.frames.push(Frame {
            function,
            code,
            ip: 0,
            base_pointer,
            recover_ip: None,
            is_recovering: false,
        });
        self.state.sp = new_sp;
        self.tracer.on_frame_push(&name);
        Ok(())
    }

    fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.state.frames.pop()?;
        self.state.sp = frame.base_pointer.saturating_sub(1);
        self.tracer.on_frame_pop();
        Some(frame)
    }

    /// Pops the current frame and pushes `value` as the call's result.
    /// Returns `true` when the popped frame was the outermost one.
    fn return_from_frame(&mut self, value: Value) -> RunResult<bool> {
        let Some(_) = self.pop_frame() else {
            return Err(RunError::runtime("nothing to return from"));
        };
        let finished = self.state.frames.is_empty();
        self.push(value)?;
        Ok(finished)
    }

    // ------------------------------------------------------------------
    // Stacks
    // ------------------------------------------------------------------

    pub(super) fn push(&mut self, value: Value) -> RunResult<()> {
        if self.state.sp >= STACK_MAX {
            return Err(RunError::runtime("stack overflow"));
        }
        self.state.stack[self.state.sp] = value;
        self.state.sp += 1;
        Ok(())
    }

    pub(super) fn pop(&mut self) -> RunResult<Value> {
        if self.state.sp == 0 {
            return Err(RunError::runtime("stack underflow"));
        }
        self.state.sp -= 1;
        Ok(self.state.stack[self.state.sp])
    }

    fn pop_many(&mut self, count: usize) -> RunResult<Vec<Value>> {
        if self.state.sp < count {
            return Err(RunError::runtime("stack underflow"));
        }
        let items = self.state.stack[self.state.sp - count..self.state.sp].to_vec();
        self.state.sp -= count;
        Ok(items)
    }

    fn stack_top(&self) -> RunResult<Value> {
        if self.state.sp == 0 {
            return Err(RunError::runtime("stack underflow"));
        }
        Ok(self.state.stack[self.state.sp - 1])
    }

    pub(super) fn stack_get(&self, ix: usize) -> RunResult<Value> {
        if ix >= STACK_MAX {
            return Err(RunError::runtime("stack access out of bounds"));
        }
        Ok(self.state.stack[ix])
    }

    fn stack_set(&mut self, ix: usize, value: Value) -> RunResult<()> {
        if ix >= STACK_MAX {
            return Err(RunError::runtime("stack overflow"));
        }
        self.state.stack[ix] = value;
        self.state.sp = self.state.sp.max(ix + 1);
        Ok(())
    }

    pub(super) fn sp(&self) -> usize {
        self.state.sp
    }

    pub(super) fn set_sp(&mut self, sp: usize) {
        self.state.sp = sp;
    }

    fn this_push(&mut self, value: Value) -> RunResult<()> {
        if self.state.this_sp >= THIS_STACK_MAX {
            return Err(RunError::runtime("this stack overflow"));
        }
        self.state.this_stack[self.state.this_sp] = value;
        self.state.this_sp += 1;
        Ok(())
    }

    fn this_pop(&mut self) -> RunResult<Value> {
        if self.state.this_sp == 0 {
            return Err(RunError::runtime("this stack underflow"));
        }
        self.state.this_sp -= 1;
        Ok(self.state.this_stack[self.state.this_sp])
    }

    // ------------------------------------------------------------------
    // Composite construction and indexing
    // ------------------------------------------------------------------

    fn finish_map(&mut self, count: usize) -> RunResult<()> {
        let map_value = self.this_pop()?;
        let Value::Map(map_id) = map_value else {
            return Err(RunError::runtime("this stack does not hold a map"));
        };
        if self.state.sp < count * 2 {
            return Err(RunError::runtime("stack underflow"));
        }
        let base = self.state.sp - count * 2;
        for i in 0..count {
            let key = self.state.stack[base + i * 2];
            let value = self.state.stack[base + i * 2 + 1];
            if !is_hashable(&key) {
                return Err(RunError::runtime(format!(
                    "key of type {} is not hashable",
                    key.kind_name()
                )));
            }
            self.heap.with_map_mut(map_id, |map, heap| map.set(heap, key, value))?;
        }
        self.state.sp = base;
        self.push(map_value)
    }

    fn get_index(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let left = self.pop()?;
        let result = match left {
            Value::Array(id) => {
                let Value::Number(n) = index else {
                    return Err(RunError::runtime(format!(
                        "cannot index ARRAY with {}",
                        index.kind_name()
                    )));
                };
                let items = self.heap.array(id);
                let mut ix = n.trunc() as i64;
                if ix < 0 {
                    ix += items.len() as i64;
                }
                if ix >= 0 && (ix as usize) < items.len() {
                    items[ix as usize]
                } else {
                    Value::Null
                }
            }
            Value::Map(id) => self.heap.map(id).get(self.heap, &index)?.unwrap_or(Value::Null),
            Value::Str(id) => {
                let Value::Number(n) = index else {
                    return Err(RunError::runtime(format!(
                        "cannot index STRING with {}",
                        index.kind_name()
                    )));
                };
                let contents = self.heap.str_value(id);
                let ix = n.trunc() as i64;
                if ix >= 0 && (ix as usize) < contents.len() {
                    let byte = contents.as_bytes()[ix as usize];
                    let single = (byte as char).to_string();
                    self.heap.alloc_str(&single)?
                } else {
                    Value::Null
                }
            }
            other => {
                return Err(RunError::runtime(format!(
                    "type {} is not indexable",
                    other.kind_name()
                )));
            }
        };
        self.push(result)
    }

    fn set_index(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let left = self.pop()?;
        let new_value = self.pop()?;
        match left {
            Value::Array(id) => {
                let Value::Number(n) = index else {
                    return Err(RunError::runtime(format!(
                        "cannot index ARRAY with {}",
                        index.kind_name()
                    )));
                };
                let items = self.heap.array_mut(id);
                let ix = n.trunc() as i64;
                if ix < 0 || ix as usize >= items.len() {
                    return Err(RunError::runtime(format!(
                        "setting array item failed (index {ix} out of bounds of {})",
                        items.len()
                    )));
                }
                items[ix as usize] = new_value;
                Ok(())
            }
            Value::Map(id) => {
                if !is_hashable(&index) {
                    return Err(RunError::runtime(format!(
                        "key of type {} is not hashable",
                        index.kind_name()
                    )));
                }
                self.heap
                    .with_map_mut(id, |map, heap| map.set(heap, index, new_value))
            }
            other => Err(RunError::runtime(format!(
                "type {} is not indexable",
                other.kind_name()
            ))),
        }
    }

    /// Positional access used by foreach: arrays by element, maps yield a
    /// two-element `[key, value]` pair, strings by byte.
    fn get_value_at(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let left = self.pop()?;
        let Value::Number(n) = index else {
            return Err(RunError::runtime(format!(
                "cannot index {} with {}",
                left.kind_name(),
                index.kind_name()
            )));
        };
        let ix = n.trunc() as i64;
        let result = match left {
            Value::Array(id) => {
                let items = self.heap.array(id);
                if ix >= 0 && (ix as usize) < items.len() {
                    items[ix as usize]
                } else {
                    Value::Null
                }
            }
            Value::Map(id) => {
                let entry = if ix >= 0 { self.heap.map(id).get_at(ix as usize) } else { None };
                match entry {
                    Some((key, value)) => self.heap.alloc_array(vec![key, value])?,
                    None => Value::Null,
                }
            }
            Value::Str(id) => {
                let contents = self.heap.str_value(id);
                if ix >= 0 && (ix as usize) < contents.len() {
                    let byte = contents.as_bytes()[ix as usize];
                    let single = (byte as char).to_string();
                    self.heap.alloc_str(&single)?
                } else {
                    Value::Null
                }
            }
            other => {
                return Err(RunError::runtime(format!(
                    "type {} is not indexable",
                    other.kind_name()
                )));
            }
        };
        self.push(result)
    }

    fn make_closure(&mut self, const_ix: usize, num_free: usize) -> RunResult<()> {
        let Some(template) = self.constants.get(const_ix).copied() else {
            return Err(RunError::runtime(format!("constant {const_ix} not found")));
        };
        let Value::Function(template_id) = template else {
            return Err(RunError::runtime(format!(
                "{} is not a function",
                template.kind_name()
            )));
        };
        let free_values = self.pop_many(num_free)?;
        let template_fn = self.heap.function(template_id);
        let closure = ScriptFunction {
            name: template_fn.name.clone(),
            code: template_fn.code.clone(),
            num_locals: template_fn.num_locals,
            num_args: template_fn.num_args,
            free_values: free_values.into_iter().collect(),
        };
        let value = self.heap.alloc_function(closure)?;
        self.push(value)
    }

    fn pop_comparison_result(&mut self) -> RunResult<f64> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(f64::from(u8::from(b))),
            other => Err(RunError::runtime(format!(
                "expected a numeric comparison result, got {}",
                other.kind_name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Errors, recovery, and collection
    // ------------------------------------------------------------------

    /// Appends the error to the list and attempts recovery. Returns `true`
    /// when a recovery frame took over and execution should continue.
    fn raise(&mut self, err: RunError, src_ip: usize) -> bool {
        let position = self.position_of(src_ip);
        let kind = err.kind;
        self.errors.add_run_error(err, position);
        if let Some(error) = self.errors.last() {
            let error = error.clone();
            self.tracer.on_error(&error);
        }
        if kind != ErrorKind::Runtime || self.errors.len() != 1 {
            return false;
        }

        let recover_frame_ix = self
            .state
            .frames
            .iter()
            .rposition(|frame| frame.recover_ip.is_some() && !frame.is_recovering);
        let Some(recover_frame_ix) = recover_frame_ix else {
            return false;
        };

        // complete the traceback before frames are popped
        let mut frame_walk = Traceback::default();
        self.append_frames(&mut frame_walk);
        let Some(error) = self.errors.last_mut() else { return false };
        let mut traceback = error.traceback.take().unwrap_or_default();
        for entry in frame_walk.entries() {
            traceback.append(entry.function_name.clone(), entry.position.clone());
        }
        let message = error.message.clone();

        while self.state.frames.len() > recover_frame_ix + 1 {
            self.pop_frame();
        }

        let error_value = match self.heap.alloc_error(message, Some(traceback)) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if self.push(error_value).is_err() {
            return false;
        }
        let frame = self.frame_mut();
        frame.ip = frame.recover_ip.expect("recovery frame is armed");
        frame.is_recovering = true;
        self.errors.clear();
        true
    }

    /// Appends one traceback entry per live frame, innermost first.
    pub(super) fn append_frames(&self, traceback: &mut Traceback) {
        for frame in self.state.frames.iter().rev() {
            let name = match frame.function {
                Value::Function(id) => self
                    .heap
                    .function(id)
                    .name
                    .clone()
                    .unwrap_or_else(|| "anonymous".to_owned()),
                _ => "unknown".to_owned(),
            };
            let position = frame.code.position_at(frame.ip.saturating_sub(1));
            traceback.append(name, position);
        }
    }

    /// Stop-the-world mark–sweep over every root the VM can see.
    fn collect_garbage(&mut self) {
        for value in self.global_store.values() {
            self.heap.mark_value(value);
        }
        for value in self.constants {
            self.heap.mark_value(*value);
        }
        self.state.mark_roots(self.heap);
        self.heap.sweep();
    }
}

enum StepResult {
    Continue,
    MainReturned,
}

fn is_hashable(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_)
    )
}
