//! The GC heap: an arena of per-kind object records, a small object pool for
//! recycled bodies, and a stop-the-world mark–sweep collector.
//!
//! Objects are addressed by [`HeapId`]. A slot holds its kind-specific
//! payload, a mark bit, and a pool-free bit; freed slots are recycled through
//! a free list while their bodies (string buffers, element vectors, map
//! storage) are cached in the pool so later allocations of the same kind
//! reuse capacity.

use std::{any::Any, cell::Cell, collections::BTreeMap, rc::Rc};

use smallvec::SmallVec;

use crate::{
    builtins::BuiltinFn,
    bytecode::Code,
    errors::{RunError, RunResult, Traceback},
    map::Map,
    object::Object,
    value::{Value, str_key_hash},
};

/// Inline capacity of string objects; longer strings spill to an owned
/// allocation.
pub(crate) const STR_INLINE_CAP: usize = 24;

/// Allocations between collection triggers.
const GC_SWEEP_INTERVAL: usize = 512;

/// Recycled bodies retained per kind.
const POOL_MAX_PER_KIND: usize = 32;

/// Hard ceiling on live heap slots; exceeding it raises an allocation error
/// instead of aborting the process.
const HEAP_MAX_OBJECTS: usize = 1 << 22;

/// Index of an object in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// String object: a small-buffer-optimized byte vector plus a lazily
/// computed content hash (0 = not yet computed; a real 0 remaps to 1).
#[derive(Debug, Default)]
pub(crate) struct Str {
    bytes: SmallVec<[u8; STR_INLINE_CAP]>,
    hash: Cell<u64>,
}

impl Str {
    pub fn from_str(s: &str) -> Self {
        Self {
            bytes: SmallVec::from_slice(s.as_bytes()),
            hash: Cell::new(0),
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).expect("string object bytes are valid UTF-8")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the contents live in an owned allocation rather than the
    /// inline buffer.
    pub fn is_allocated(&self) -> bool {
        self.bytes.spilled()
    }

    pub fn push_str(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
        self.hash.set(0);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.hash.set(0);
    }

    pub fn hash(&self) -> u64 {
        let cached = self.hash.get();
        if cached != 0 {
            return cached;
        }
        let hash = str_key_hash(self.as_str());
        self.hash.set(hash);
        hash
    }
}

/// A compiled script function plus its captured free values.
///
/// The compilation result is shared through `Rc`: the synthetic main built by
/// the VM and user-defined functions reference code the same way.
#[derive(Debug)]
pub(crate) struct ScriptFunction {
    pub name: Option<String>,
    pub code: Rc<Code>,
    pub num_locals: u16,
    pub num_args: u8,
    pub free_values: SmallVec<[Value; 4]>,
}

/// Callback invoked when a native function object is called.
#[derive(Clone)]
pub(crate) enum NativeCallback {
    /// Interpreter-native builtin, dispatched by enum.
    Builtin(BuiltinFn),
    /// Host-registered function operating on public objects.
    Host(Rc<HostCallback>),
}

pub(crate) type HostCallback = dyn Fn(&[Object]) -> Result<Object, String>;

impl std::fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(builtin) => write!(f, "Builtin({builtin:?})"),
            Self::Host(_) => write!(f, "Host(..)"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct NativeFunction {
    pub name: String,
    pub callback: NativeCallback,
}

/// First-class error value carried on the stack by `error(..)` and `recover`.
#[derive(Debug)]
pub(crate) struct ErrorValue {
    pub message: String,
    pub traceback: Option<Traceback>,
}

/// Opaque host data attached to the heap. Dropping the last handle runs the
/// host's destructor through `Rc`/`Drop`.
#[derive(Debug)]
pub(crate) struct ExternalValue {
    pub data: Rc<dyn Any>,
}

/// Kind-specific payload of a heap slot.
#[derive(Debug)]
pub(crate) enum HeapData {
    /// Reclaimed slot awaiting reuse.
    Freed,
    Str(Str),
    Array(Vec<Value>),
    Map(Map),
    Function(ScriptFunction),
    Native(NativeFunction),
    Error(ErrorValue),
    External(ExternalValue),
}

impl HeapData {
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Freed => "Freed",
            Self::Str(_) => "Str",
            Self::Array(_) => "Array",
            Self::Map(_) => "Map",
            Self::Function(_) => "Function",
            Self::Native(_) => "Native",
            Self::Error(_) => "Error",
            Self::External(_) => "External",
        }
    }
}

#[derive(Debug)]
struct Slot {
    data: HeapData,
    marked: bool,
    /// Set while the slot sits on the free list.
    pooled: bool,
}

/// Recycled object bodies, reused by subsequent allocations of the same kind.
#[derive(Debug, Default)]
struct ObjectPool {
    strings: Vec<Str>,
    arrays: Vec<Vec<Value>>,
    maps: Vec<Map>,
}

/// Snapshot of heap occupancy, used by tests and host diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub total_slots: usize,
    /// Breakdown of live objects by kind name.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Default)]
pub(crate) struct Heap {
    slots: Vec<Slot>,
    free_ids: Vec<usize>,
    allocations_since_sweep: usize,
    pool: ObjectPool,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        self.allocations_since_sweep += 1;
        if let Some(ix) = self.free_ids.pop() {
            let slot = &mut self.slots[ix];
            slot.data = data;
            slot.marked = false;
            slot.pooled = false;
            return Ok(HeapId(ix));
        }
        if self.slots.len() >= HEAP_MAX_OBJECTS {
            return Err(RunError::allocation("heap object limit exceeded"));
        }
        self.slots.push(Slot {
            data,
            marked: false,
            pooled: false,
        });
        Ok(HeapId(self.slots.len() - 1))
    }

    pub fn alloc_str(&mut self, s: &str) -> RunResult<Value> {
        let body = match self.pool.strings.pop() {
            Some(mut body) => {
                body.clear();
                body.push_str(s);
                body
            }
            None => Str::from_str(s),
        };
        Ok(Value::Str(self.allocate(HeapData::Str(body))?))
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> RunResult<Value> {
        Ok(Value::Array(self.allocate(HeapData::Array(items))?))
    }

    pub fn alloc_array_with_capacity(&mut self, capacity: usize) -> RunResult<Value> {
        let body = match self.pool.arrays.pop() {
            Some(mut body) => {
                body.reserve(capacity);
                body
            }
            None => Vec::with_capacity(capacity),
        };
        Ok(Value::Array(self.allocate(HeapData::Array(body))?))
    }

    pub fn alloc_map(&mut self, map: Map) -> RunResult<Value> {
        Ok(Value::Map(self.allocate(HeapData::Map(map))?))
    }

    pub fn alloc_map_with_capacity(&mut self, capacity: usize) -> RunResult<Value> {
        let body = match self.pool.maps.pop() {
            Some(body) => body,
            None => Map::with_capacity(capacity),
        };
        Ok(Value::Map(self.allocate(HeapData::Map(body))?))
    }

    pub fn alloc_function(&mut self, function: ScriptFunction) -> RunResult<Value> {
        Ok(Value::Function(self.allocate(HeapData::Function(function))?))
    }

    pub fn alloc_native(&mut self, native: NativeFunction) -> RunResult<Value> {
        Ok(Value::Native(self.allocate(HeapData::Native(native))?))
    }

    pub fn alloc_error(&mut self, message: impl Into<String>, traceback: Option<Traceback>) -> RunResult<Value> {
        Ok(Value::Error(self.allocate(HeapData::Error(ErrorValue {
            message: message.into(),
            traceback,
        }))?))
    }

    pub fn alloc_external(&mut self, data: Rc<dyn Any>) -> RunResult<Value> {
        Ok(Value::External(self.allocate(HeapData::External(ExternalValue { data }))?))
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()].data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()].data
    }

    pub fn str_value(&self, id: HeapId) -> &str {
        match self.get(id) {
            HeapData::Str(s) => s.as_str(),
            other => panic!("expected Str slot, found {}", other.variant_name()),
        }
    }

    pub fn str_hash(&self, id: HeapId) -> u64 {
        match self.get(id) {
            HeapData::Str(s) => s.hash(),
            other => panic!("expected Str slot, found {}", other.variant_name()),
        }
    }

    pub fn array(&self, id: HeapId) -> &[Value] {
        match self.get(id) {
            HeapData::Array(items) => items,
            other => panic!("expected Array slot, found {}", other.variant_name()),
        }
    }

    pub fn array_mut(&mut self, id: HeapId) -> &mut Vec<Value> {
        match self.get_mut(id) {
            HeapData::Array(items) => items,
            other => panic!("expected Array slot, found {}", other.variant_name()),
        }
    }

    pub fn map(&self, id: HeapId) -> &Map {
        match self.get(id) {
            HeapData::Map(map) => map,
            other => panic!("expected Map slot, found {}", other.variant_name()),
        }
    }

    /// Runs `f` with mutable access to a map and shared access to the rest of
    /// the heap (needed to hash and compare keys that are string objects).
    /// The map is temporarily detached from its slot, so `f` must not touch
    /// the map's own id through the heap.
    pub fn with_map_mut<R>(&mut self, id: HeapId, f: impl FnOnce(&mut Map, &Self) -> R) -> R {
        let mut data = std::mem::replace(&mut self.slots[id.index()].data, HeapData::Freed);
        let result = match &mut data {
            HeapData::Map(map) => f(map, self),
            other => panic!("expected Map slot, found {}", other.variant_name()),
        };
        self.slots[id.index()].data = data;
        result
    }

    pub fn function(&self, id: HeapId) -> &ScriptFunction {
        match self.get(id) {
            HeapData::Function(function) => function,
            other => panic!("expected Function slot, found {}", other.variant_name()),
        }
    }

    pub fn function_mut(&mut self, id: HeapId) -> &mut ScriptFunction {
        match self.get_mut(id) {
            HeapData::Function(function) => function,
            other => panic!("expected Function slot, found {}", other.variant_name()),
        }
    }

    pub fn native(&self, id: HeapId) -> &NativeFunction {
        match self.get(id) {
            HeapData::Native(native) => native,
            other => panic!("expected Native slot, found {}", other.variant_name()),
        }
    }

    pub fn error_value(&self, id: HeapId) -> &ErrorValue {
        match self.get(id) {
            HeapData::Error(error) => error,
            other => panic!("expected Error slot, found {}", other.variant_name()),
        }
    }

    pub fn error_value_mut(&mut self, id: HeapId) -> &mut ErrorValue {
        match self.get_mut(id) {
            HeapData::Error(error) => error,
            other => panic!("expected Error slot, found {}", other.variant_name()),
        }
    }

    pub fn external(&self, id: HeapId) -> &ExternalValue {
        match self.get(id) {
            HeapData::External(external) => external,
            other => panic!("expected External slot, found {}", other.variant_name()),
        }
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Whether enough allocations have happened since the last sweep for a
    /// collection to be worthwhile.
    pub fn should_sweep(&self) -> bool {
        self.allocations_since_sweep > GC_SWEEP_INTERVAL
    }

    /// Marks `value` and everything reachable from it.
    pub fn mark_value(&mut self, value: Value) {
        let mut work = vec![value];
        while let Some(current) = work.pop() {
            let Some(id) = current.heap_id() else { continue };
            let slot = &mut self.slots[id.index()];
            if slot.marked || matches!(slot.data, HeapData::Freed) {
                continue;
            }
            slot.marked = true;
            match &slot.data {
                HeapData::Array(items) => work.extend_from_slice(items),
                HeapData::Map(map) => map.extend_mark_worklist(&mut work),
                HeapData::Function(function) => work.extend_from_slice(&function.free_values),
                _ => {}
            }
        }
    }

    pub fn mark_values(&mut self, values: &[Value]) {
        for value in values {
            self.mark_value(*value);
        }
    }

    /// Frees every unmarked object, clearing composite contents first and
    /// recycling bodies through the pool. Survivors have their mark bit
    /// cleared for the next cycle.
    pub fn sweep(&mut self) {
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot.data, HeapData::Freed) {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                continue;
            }
            let data = std::mem::replace(&mut slot.data, HeapData::Freed);
            slot.pooled = true;
            self.free_ids.push(ix);
            match data {
                HeapData::Str(mut body) => {
                    if self.pool.strings.len() < POOL_MAX_PER_KIND {
                        body.clear();
                        self.pool.strings.push(body);
                    }
                }
                HeapData::Array(mut body) => {
                    if self.pool.arrays.len() < POOL_MAX_PER_KIND {
                        body.clear();
                        self.pool.arrays.push(body);
                    }
                }
                HeapData::Map(mut body) => {
                    if self.pool.maps.len() < POOL_MAX_PER_KIND {
                        body.clear();
                        self.pool.maps.push(body);
                    }
                }
                _ => {}
            }
        }
        self.allocations_since_sweep = 0;
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_kind = BTreeMap::new();
        let mut live = 0;
        for slot in &self.slots {
            if matches!(slot.data, HeapData::Freed) {
                continue;
            }
            live += 1;
            *objects_by_kind.entry(slot.data.variant_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: live,
            free_slots: self.free_ids.len(),
            total_slots: self.slots.len(),
            objects_by_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn mark_sweep_frees_unreachable_objects() {
        let mut heap = Heap::new();
        let kept = heap.alloc_str("kept").unwrap();
        let _dropped = heap.alloc_str("dropped").unwrap();
        heap.mark_value(kept);
        heap.sweep();
        let stats = heap.stats();
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.free_slots, 1);
        // the surviving handle still resolves to the same bytes
        let Value::Str(id) = kept else { panic!("expected string") };
        assert_eq!(heap.str_value(id), "kept");
    }

    #[test]
    fn mark_traverses_containers_and_closures() {
        let mut heap = Heap::new();
        let inner = heap.alloc_str("inner").unwrap();
        let array = heap.alloc_array(vec![inner]).unwrap();
        let mut map = Map::new();
        let key = heap.alloc_str("key").unwrap();
        map.set(&heap, key, array).unwrap();
        let map_value = heap.alloc_map(map).unwrap();
        heap.mark_value(map_value);
        heap.sweep();
        assert_eq!(heap.stats().live_objects, 4);
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = Heap::new();
        let a = heap.alloc_array(vec![]).unwrap();
        let b = heap.alloc_array(vec![a]).unwrap();
        let Value::Array(a_id) = a else { panic!("expected array") };
        heap.array_mut(a_id).push(b);
        // no roots: both die despite referencing each other
        heap.sweep();
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new();
        let dropped = heap.alloc_str("x".repeat(100).as_str()).unwrap();
        let dropped_id = dropped.heap_id().unwrap();
        heap.sweep();
        let reused = heap.alloc_str("y").unwrap();
        assert_eq!(reused.heap_id().unwrap(), dropped_id);
        assert_eq!(heap.stats().total_slots, 1);
    }

    #[test]
    fn string_hash_is_cached_and_nonzero() {
        let s = Str::from_str("hello");
        let first = s.hash();
        assert_ne!(first, 0);
        assert_eq!(s.hash(), first);
    }

    #[test]
    fn small_strings_stay_inline() {
        let small = Str::from_str("short");
        assert!(!small.is_allocated());
        let large = Str::from_str(&"x".repeat(STR_INLINE_CAP + 1));
        assert!(large.is_allocated());
    }

    #[test]
    fn sweep_counter_triggers() {
        let mut heap = Heap::new();
        assert!(!heap.should_sweep());
        for _ in 0..=super::GC_SWEEP_INTERVAL {
            heap.alloc_str("x").unwrap();
        }
        assert!(heap.should_sweep());
        heap.sweep();
        assert!(!heap.should_sweep());
    }
}
