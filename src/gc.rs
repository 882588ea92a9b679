//! The heap: allocation, the intrusive allocation list, and the precise
//! tri-color mark-sweep collector of spec.md §4.5.
//!
//! The teacher's object graph is reference-counted (`Rc<RefCell<_>>`
//! everywhere in `vm.rs`/`value.rs`), which cannot reclaim cycles and so
//! cannot stand in for the mark-sweep collector spec.md requires (classes
//! holding method closures that capture instances of themselves, etc).
//! This module instead follows `original_source/cLox`'s `memory.c`/`gc`
//! design directly: objects live behind a thin `Gc` handle (a `NonNull`
//! pointer, `Copy`, compared by identity), threaded into a singly linked
//! allocation list via an intrusive `next` pointer, swept by walking that
//! list and freeing anything left unmarked.

use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;

use crate::object::{Obj, ObjKind};
use crate::table::Table;
use crate::value::Value;

const INITIAL_NEXT_GC: usize = 1024 * 1024;
const GC_GROWTH_FACTOR: usize = 2;

struct GcBox {
    marked: Cell<bool>,
    next: Option<NonNull<GcBox>>,
    obj: Obj,
}

/// A handle to a heap-allocated [`Obj`]. Copy, compared by pointer identity
/// (matching spec.md §3: "objects by identity ... strings compare equal
/// iff they are the same interned object").
#[derive(Clone, Copy)]
pub struct Gc(NonNull<GcBox>);

impl Gc {
    pub fn kind(&self) -> &ObjKind {
        unsafe { &self.0.as_ref().obj.kind }
    }

    fn header(&self) -> &GcBox {
        unsafe { self.0.as_ref() }
    }

    pub fn is_marked(&self) -> bool {
        self.header().marked.get()
    }

    fn mark(&self) {
        self.header().marked.set(true);
    }
}

impl PartialEq for Gc {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Gc {}

impl std::hash::Hash for Gc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ptr().hash(state)
    }
}

impl fmt::Debug for Gc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// Implemented by whichever component owns live roots at the moment an
/// allocation may trigger a collection (the `Compiler` during compilation,
/// the `Vm` during execution) — see spec.md §9 "Allocation during
/// compilation" and §4.5 "Roots".
pub trait RootSource {
    fn mark_roots(&self, heap: &mut Heap);
}

pub struct Heap {
    objects: Option<NonNull<GcBox>>,
    bytes_allocated: usize,
    next_gc: usize,
    gray_stack: Vec<Gc>,
    strings: Table,
    stress: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: None,
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            gray_stack: Vec::new(),
            strings: Table::new(),
            stress: cfg!(feature = "stress-gc"),
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated >= self.next_gc
    }

    /// Allocates `kind` on the heap, running a collection first if the
    /// allocator is over threshold (or in stress mode). `source` supplies
    /// this collection's roots.
    pub fn alloc(&mut self, kind: ObjKind, source: &dyn RootSource) -> Gc {
        if self.should_collect() {
            self.collect_garbage(source);
        }

        let boxed = Box::new(GcBox {
            marked: Cell::new(false),
            next: self.objects,
            obj: Obj { kind },
        });
        self.bytes_allocated += std::mem::size_of::<GcBox>();
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) };
        self.objects = Some(ptr);
        Gc(ptr)
    }

    /// Interns a string, returning the canonical handle. Matches
    /// `copyString`/`tableFindString`: looks the bytes up in the intern
    /// table first so two literals with identical bytes are the same
    /// object (spec.md §8's identity-equality testable property).
    pub fn intern_str(&mut self, text: &str, source: &dyn RootSource) -> Gc {
        let hash = fnv1a(text.as_bytes());
        if let Some(existing) = self.strings.find_string(text, hash) {
            return existing;
        }
        // Root the half-built string across the allocation below: push it
        // onto the gray stack isn't right (it isn't marked yet and has no
        // stack slot) — instead we allocate first, then immediately insert
        // into the intern table, which itself becomes reachable the next
        // time `source` walks the VM's roots because the caller is always
        // about to either push the value or store it as a constant.
        let handle = self.alloc(
            ObjKind::String(crate::object::LoxString {
                value: text.to_owned(),
                hash,
            }),
            source,
        );
        self.strings.set(handle, Value::Bool(true));
        handle
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(gc) = value {
            self.mark_object(gc);
        }
    }

    pub fn mark_object(&mut self, gc: Gc) {
        if gc.is_marked() {
            return;
        }
        gc.mark();
        self.gray_stack.push(gc);
    }

    fn blacken(&mut self, gc: Gc) {
        // SAFETY: the object isn't freed while referenced from the gray
        // stack — sweep only frees unmarked objects, and this one just got
        // marked above.
        let kind_ptr: *const ObjKind = gc.kind();
        let kind = unsafe { &*kind_ptr };
        match kind {
            ObjKind::String(_) | ObjKind::Native(_) => {}
            ObjKind::Upvalue(up) => {
                if let crate::object::UpvalueState::Closed(v) = &*up.borrow() {
                    self.mark_value(*v);
                }
            }
            ObjKind::Function(f) => {
                if let Some(name) = f.name {
                    self.mark_object(name);
                }
                for c in f.chunk.constants() {
                    self.mark_value(*c);
                }
            }
            ObjKind::Closure(c) => {
                self.mark_object(c.function);
                for up in &c.upvalues {
                    self.mark_object(*up);
                }
            }
            ObjKind::Class(class) => {
                let class = class.borrow();
                self.mark_object(class.name);
                for (k, v) in class.methods.entries() {
                    self.mark_object(k);
                    self.mark_value(v);
                }
            }
            ObjKind::Instance(inst) => {
                let inst = inst.borrow();
                self.mark_object(inst.class);
                for (k, v) in inst.fields.entries() {
                    self.mark_object(k);
                    self.mark_value(v);
                }
            }
            ObjKind::BoundMethod(bm) => {
                self.mark_value(bm.receiver);
                self.mark_object(bm.method);
            }
        }
    }

    fn mark_gray_stack(&mut self) {
        while let Some(gc) = self.gray_stack.pop() {
            self.blacken(gc);
        }
    }

    /// Drops intern-table entries for strings that didn't survive marking,
    /// so the collector doesn't resurrect dead strings through the global
    /// intern set (spec.md §4.5 "Intern handling").
    fn remove_white_strings(&mut self) {
        self.strings.remove_unmarked();
    }

    fn sweep(&mut self) {
        let mut prev: Option<NonNull<GcBox>> = None;
        let mut current = self.objects;
        let mut freed = 0usize;

        while let Some(node) = current {
            let node_ref = unsafe { node.as_ref() };
            let next = node_ref.next;

            if node_ref.marked.get() {
                node_ref.marked.set(false);
                prev = Some(node);
                current = next;
            } else {
                current = next;
                if let Some(p) = prev {
                    unsafe {
                        (*p.as_ptr()).next = next;
                    }
                } else {
                    self.objects = next;
                }
                freed += std::mem::size_of::<GcBox>();
                // SAFETY: `node` is unlinked from the allocation list and
                // unreachable from any remaining root, so dropping it here
                // is the only reference to it.
                unsafe {
                    drop(Box::from_raw(node.as_ptr()));
                }
            }
        }

        self.bytes_allocated -= freed;
        log::debug!(
            "gc: collected {freed} bytes, {} remaining, next threshold {}",
            self.bytes_allocated,
            self.next_gc
        );
    }

    pub fn collect_garbage(&mut self, source: &dyn RootSource) {
        let before = self.bytes_allocated;
        source.mark_roots(self);
        self.mark_gray_stack();
        self.remove_white_strings();
        self.sweep();
        self.next_gc = self.bytes_allocated * GC_GROWTH_FACTOR;
        if self.next_gc < INITIAL_NEXT_GC {
            self.next_gc = INITIAL_NEXT_GC;
        }
        log::debug!(
            "gc: cycle done, {before} -> {} bytes allocated",
            self.bytes_allocated
        );
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.objects;
        while let Some(node) = current {
            let next = unsafe { node.as_ref().next };
            unsafe {
                drop(Box::from_raw(node.as_ptr()));
            }
            current = next;
        }
    }
}

/// FNV-1a, matching `original_source/cLox`'s string hash.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
