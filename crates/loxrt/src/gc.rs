//! The memory manager: single allocation entry point plus mark-sweep
//! collection.
//!
//! Every heap object is created through one of `Heap`'s `alloc_*` methods,
//! which register it in `objects` (the "intrusive objects list" played by a
//! `Vec` here — see [`crate::object`] for why that's safe) and account its
//! size in `bytes_allocated`. Collection runs when `bytes_allocated` crosses
//! `next_gc`, or on every call when [`GcConfig::stress_gc`] is set.
//!
//! Rust's ownership rules mean a `Gc<T>` can never outlive the `GcBox<T>` it
//! points at *unless this module's own bookkeeping is wrong* — so the
//! callers in [`crate::compiler`] and [`crate::vm`] are responsible for
//! calling [`Heap::maybe_collect`] with a closure that marks every live root
//! *before* each allocation that could trigger a sweep. See the safety note
//! on that method.

use std::mem::size_of;

use crate::object::Gc;
use crate::object::{
    fnv1a_hash, GcBox, Header, NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction,
    ObjInstance, ObjString, ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;
use std::ptr::NonNull;

/// Tunable knobs for the memory manager, in the spirit of the teacher
/// crate's builder-style `RuntimeConfig`.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Force a full collection on every allocation. Used by the test suite
    /// to verify GC soundness (every live value survives collection at
    /// every possible collection point).
    pub stress_gc: bool,
    pub initial_next_gc: usize,
    pub heap_grow_factor: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            stress_gc: false,
            initial_next_gc: 1024 * 1024,
            heap_grow_factor: 2,
        }
    }
}

impl GcConfig {
    pub fn with_stress_gc(mut self, stress: bool) -> Self {
        self.stress_gc = stress;
        self
    }

    pub fn with_initial_threshold(mut self, bytes: usize) -> Self {
        self.initial_next_gc = bytes;
        self
    }
}

enum HeapSlot {
    String(Box<GcBox<ObjString>>),
    Function(Box<GcBox<ObjFunction>>),
    Native(Box<GcBox<NativeFn>>),
    Closure(Box<GcBox<ObjClosure>>),
    Upvalue(Box<GcBox<ObjUpvalue>>),
    Class(Box<GcBox<ObjClass>>),
    Instance(Box<GcBox<ObjInstance>>),
    BoundMethod(Box<GcBox<ObjBoundMethod>>),
}

impl HeapSlot {
    fn header(&self) -> &Header {
        match self {
            HeapSlot::String(b) => &b.header,
            HeapSlot::Function(b) => &b.header,
            HeapSlot::Native(b) => &b.header,
            HeapSlot::Closure(b) => &b.header,
            HeapSlot::Upvalue(b) => &b.header,
            HeapSlot::Class(b) => &b.header,
            HeapSlot::Instance(b) => &b.header,
            HeapSlot::BoundMethod(b) => &b.header,
        }
    }

    fn approx_size(&self) -> usize {
        match self {
            HeapSlot::String(b) => size_of::<GcBox<ObjString>>() + b.data.value.capacity(),
            HeapSlot::Function(b) => size_of::<GcBox<ObjFunction>>() + b.data.chunk.code.capacity(),
            HeapSlot::Native(_) => size_of::<GcBox<NativeFn>>(),
            HeapSlot::Closure(b) => {
                size_of::<GcBox<ObjClosure>>()
                    + b.data.upvalues.capacity() * size_of::<Gc<ObjUpvalue>>()
            }
            HeapSlot::Upvalue(_) => size_of::<GcBox<ObjUpvalue>>(),
            HeapSlot::Class(_) => size_of::<GcBox<ObjClass>>(),
            HeapSlot::Instance(_) => size_of::<GcBox<ObjInstance>>(),
            HeapSlot::BoundMethod(_) => size_of::<GcBox<ObjBoundMethod>>(),
        }
    }
}

pub struct Heap {
    objects: Vec<HeapSlot>,
    /// Weak string interner: one entry per live, deduplicated string.
    strings: Table,
    gray: Vec<Obj>,
    bytes_allocated: usize,
    next_gc: usize,
    config: GcConfig,
    collections_run: usize,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Self {
            objects: Vec::new(),
            strings: Table::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: config.initial_next_gc,
            config,
            collections_run: 0,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn collections_run(&self) -> usize {
        self.collections_run
    }

    fn should_collect(&self) -> bool {
        self.config.stress_gc || self.bytes_allocated > self.next_gc
    }

    /// Collects garbage if the allocation threshold (or the stress-test
    /// flag) says to. `mark_extra` is invoked with `&mut self` *before*
    /// tracing starts, and must mark every root the caller currently holds
    /// that this module can't see on its own (the VM's value stack and call
    /// frames, or the compiler's in-progress chunk chain).
    ///
    /// # Safety discipline
    /// Call this immediately before every `alloc_*` call, including inside
    /// loops that allocate more than once (closure/upvalue construction).
    /// Anything allocated in a previous loop iteration must already be
    /// reachable from a root the closure marks (e.g. the VM's
    /// `open_upvalues` list) by the time the next call happens — seeing
    /// mark as idempotent, calling it eagerly is always safe, just
    /// sometimes redundant.
    pub fn maybe_collect(&mut self, mark_extra: impl FnOnce(&mut Heap)) {
        if !self.should_collect() {
            return;
        }
        mark_extra(self);
        self.trace();
        self.strings.remove_unmarked_keys();
        self.sweep();
        self.next_gc = self
            .bytes_allocated
            .saturating_mul(self.config.heap_grow_factor)
            .max(self.config.initial_next_gc);
        self.collections_run += 1;
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Obj(obj) = value {
            self.mark_obj(*obj);
        }
    }

    pub fn mark_obj(&mut self, obj: Obj) {
        if obj.header().is_marked() {
            return;
        }
        obj.header().set_marked(true);
        self.gray.push(obj);
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_obj(Obj::String(key));
            self.mark_value(&value);
        }
    }

    fn trace(&mut self) {
        while let Some(obj) = self.gray.pop() {
            self.blacken(obj);
        }
    }

    fn blacken(&mut self, obj: Obj) {
        match obj {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    self.mark_obj(Obj::String(name));
                }
                for constant in &f.chunk.constants {
                    self.mark_value(constant);
                }
            }
            Obj::Closure(c) => {
                self.mark_obj(Obj::Function(c.function));
                for upvalue in &c.upvalues {
                    self.mark_obj(Obj::Upvalue(*upvalue));
                }
            }
            Obj::Upvalue(u) => {
                if let crate::object::UpvalueLocation::Closed(value) = u.location.get() {
                    self.mark_value(&value);
                }
            }
            Obj::Class(class) => {
                self.mark_obj(Obj::String(class.name));
                let methods = class.methods.borrow();
                for (name, value) in methods.iter() {
                    self.mark_obj(Obj::String(name));
                    self.mark_value(&value);
                }
            }
            Obj::Instance(instance) => {
                self.mark_obj(Obj::Class(instance.class));
                let fields = instance.fields.borrow();
                for (name, value) in fields.iter() {
                    self.mark_obj(Obj::String(name));
                    self.mark_value(&value);
                }
            }
            Obj::BoundMethod(bound) => {
                self.mark_value(&bound.receiver);
                self.mark_obj(Obj::Closure(bound.method));
            }
        }
    }

    fn sweep(&mut self) {
        let mut freed = 0usize;
        self.objects.retain(|slot| {
            let marked = slot.header().is_marked();
            if marked {
                slot.header().set_marked(false);
                true
            } else {
                freed += slot.approx_size();
                false
            }
        });
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
    }

    fn account(&mut self, size: usize) {
        self.bytes_allocated += size;
    }

    /// Dedup-and-allocate: the intern path for both literal strings (copied
    /// from source) and computed strings (concatenation results). Returns
    /// the existing interned string if the byte sequence is already live.
    pub fn intern(&mut self, s: &str) -> Gc<ObjString> {
        let hash = fnv1a_hash(s.as_bytes());
        if let Some(existing) = self.strings.find_string(s.as_bytes(), hash) {
            return existing;
        }
        let gc = self.push_box(HeapSlot::String(Box::new(GcBox {
            header: Header::default(),
            data: ObjString {
                value: s.to_string(),
                hash,
            },
        })));
        let gc = match gc {
            Obj::String(gc) => gc,
            _ => unreachable!(),
        };
        self.strings.set(gc, Value::Nil);
        gc
    }

    fn push_box(&mut self, slot: HeapSlot) -> Obj {
        self.account(slot.approx_size());
        let obj = match &slot {
            HeapSlot::String(b) => Obj::String(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) }),
            HeapSlot::Function(b) => {
                Obj::Function(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) })
            }
            HeapSlot::Native(b) => Obj::Native(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) }),
            HeapSlot::Closure(b) => {
                Obj::Closure(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) })
            }
            HeapSlot::Upvalue(b) => {
                Obj::Upvalue(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) })
            }
            HeapSlot::Class(b) => Obj::Class(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) }),
            HeapSlot::Instance(b) => {
                Obj::Instance(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) })
            }
            HeapSlot::BoundMethod(b) => {
                Obj::BoundMethod(unsafe { Gc::from_raw(NonNull::from(b.as_ref())) })
            }
        };
        self.objects.push(slot);
        obj
    }

    pub fn alloc_function(&mut self, data: ObjFunction) -> Gc<ObjFunction> {
        let obj = self.push_box(HeapSlot::Function(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::Function(gc) => gc,
            _ => unreachable!(),
        }
    }

    pub fn alloc_native(&mut self, data: NativeFn) -> Gc<NativeFn> {
        let obj = self.push_box(HeapSlot::Native(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::Native(gc) => gc,
            _ => unreachable!(),
        }
    }

    pub fn alloc_closure(&mut self, data: ObjClosure) -> Gc<ObjClosure> {
        let obj = self.push_box(HeapSlot::Closure(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::Closure(gc) => gc,
            _ => unreachable!(),
        }
    }

    pub fn alloc_upvalue(&mut self, data: ObjUpvalue) -> Gc<ObjUpvalue> {
        let obj = self.push_box(HeapSlot::Upvalue(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::Upvalue(gc) => gc,
            _ => unreachable!(),
        }
    }

    pub fn alloc_class(&mut self, data: ObjClass) -> Gc<ObjClass> {
        let obj = self.push_box(HeapSlot::Class(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::Class(gc) => gc,
            _ => unreachable!(),
        }
    }

    pub fn alloc_instance(&mut self, data: ObjInstance) -> Gc<ObjInstance> {
        let obj = self.push_box(HeapSlot::Instance(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::Instance(gc) => gc,
            _ => unreachable!(),
        }
    }

    pub fn alloc_bound_method(&mut self, data: ObjBoundMethod) -> Gc<ObjBoundMethod> {
        let obj = self.push_box(HeapSlot::BoundMethod(Box::new(GcBox {
            header: Header::default(),
            data,
        })));
        match obj {
            Obj::BoundMethod(gc) => gc,
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_equal_byte_sequences() {
        let mut heap = Heap::new(GcConfig::default());
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        assert_eq!(a, b);
        assert_eq!(heap.object_count(), 1);
    }

    #[test]
    fn distinct_strings_are_distinct_objects() {
        let mut heap = Heap::new(GcConfig::default());
        let a = heap.intern("hello");
        let b = heap.intern("world");
        assert_ne!(a, b);
    }

    #[test]
    fn unreferenced_string_is_collected() {
        let mut heap = Heap::new(GcConfig::default().with_stress_gc(true));
        heap.intern("transient");
        assert_eq!(heap.object_count(), 1);
        // Nothing roots "transient"; the next allocation sweeps it.
        heap.maybe_collect(|_| {});
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn rooted_string_survives_collection() {
        let mut heap = Heap::new(GcConfig::default().with_stress_gc(true));
        let s = heap.intern("kept");
        heap.maybe_collect(|h| h.mark_obj(Obj::String(s)));
        assert_eq!(heap.object_count(), 1);
        assert_eq!(s.value, "kept");
    }

    #[test]
    fn intern_table_drops_entries_for_collected_strings() {
        let mut heap = Heap::new(GcConfig::default().with_stress_gc(true));
        heap.intern("gone");
        heap.maybe_collect(|_| {});
        assert!(heap
            .strings
            .find_string(b"gone", fnv1a_hash(b"gone"))
            .is_none());
    }
}
