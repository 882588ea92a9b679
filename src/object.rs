//! Heap object variants (spec.md §3's "one discriminated union").
//!
//! Grounded on `original_source/cLox/compiler/object.h` for the field
//! layout of each variant, and on the teacher's `value.rs`/`vm.rs` for how
//! a Rust port represents them (`Rc<Function>`, `Closure { function,
//! up_values }`, native functions as plain `fn` pointers). Where the
//! teacher uses `Rc<RefCell<_>>` for shared mutable state we use a plain
//! `RefCell` behind the GC's own `Gc` handle instead, since `Gc` is the
//! thing providing shared ownership here.

use std::cell::RefCell;
use std::fmt;

use crate::chunk::Chunk;
use crate::gc::Gc;
use crate::table::Table;
use crate::value::Value;
use crate::error::RuntimeError;
use crate::vm::Vm;

pub struct Obj {
    pub kind: ObjKind,
}

pub enum ObjKind {
    String(LoxString),
    Function(LoxFunction),
    Native(NativeFn),
    Closure(Closure),
    Upvalue(RefCell<UpvalueState>),
    Class(RefCell<Class>),
    Instance(RefCell<Instance>),
    BoundMethod(BoundMethod),
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjKind::String(s) => write!(f, "{}", s.value),
            ObjKind::Function(func) => match &func.name {
                Some(name) => write!(f, "<fn {}>", name_of(*name)),
                None => write!(f, "<script>"),
            },
            ObjKind::Native(_) => write!(f, "<native fn>"),
            ObjKind::Closure(c) => match &c.function.kind() {
                ObjKind::Function(func) => match &func.name {
                    Some(name) => write!(f, "<fn {}>", name_of(*name)),
                    None => write!(f, "<script>"),
                },
                _ => unreachable!(),
            },
            ObjKind::Upvalue(_) => write!(f, "upvalue"),
            ObjKind::Class(class) => write!(f, "{}", name_of(class.borrow().name)),
            ObjKind::Instance(inst) => write!(f, "{} instance", name_of(inst.borrow().class)),
            ObjKind::BoundMethod(bm) => write!(f, "{}", bm.method.kind()),
        }
    }
}

fn name_of(gc: Gc) -> String {
    match gc.kind() {
        ObjKind::String(s) => s.value.clone(),
        _ => unreachable!("name handles are always strings"),
    }
}

pub struct LoxString {
    pub value: String,
    pub hash: u32,
}

pub struct LoxFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub name: Option<Gc>,
}

impl LoxFunction {
    pub fn new(name: Option<Gc>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

pub type NativeImpl = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

pub struct NativeFn {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeImpl,
}

pub struct Closure {
    pub function: Gc,
    pub upvalues: Vec<Gc>,
}

pub enum UpvalueState {
    /// Index into the VM's value stack — the local is still live there.
    Open(usize),
    Closed(Value),
}

pub struct Class {
    pub name: Gc,
    pub methods: Table,
}

impl Class {
    pub fn new(name: Gc) -> Self {
        Self {
            name,
            methods: Table::new(),
        }
    }
}

pub struct Instance {
    pub class: Gc,
    pub fields: Table,
}

impl Instance {
    pub fn new(class: Gc) -> Self {
        Self {
            class,
            fields: Table::new(),
        }
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub method: Gc,
}

/// Narrowing accessors. The compiler/VM only call these where the
/// surrounding opcode already guarantees the variant (mirroring cLox's
/// `AS_CLOSURE`-style macros, which likewise don't re-check `IS_CLOSURE`);
/// a mismatch means the compiler emitted the wrong bytecode, which is an
/// internal invariant violation, not a user-facing runtime error.
impl Gc {
    pub fn as_string(&self) -> &str {
        match self.kind() {
            ObjKind::String(s) => &s.value,
            _ => unreachable!("expected string object"),
        }
    }

    pub fn as_function(&self) -> &LoxFunction {
        match self.kind() {
            ObjKind::Function(f) => f,
            _ => unreachable!("expected function object"),
        }
    }

    pub fn as_closure(&self) -> &Closure {
        match self.kind() {
            ObjKind::Closure(c) => c,
            _ => unreachable!("expected closure object"),
        }
    }

    pub fn as_class(&self) -> &RefCell<Class> {
        match self.kind() {
            ObjKind::Class(c) => c,
            _ => unreachable!("expected class object"),
        }
    }

    pub fn as_instance(&self) -> &RefCell<Instance> {
        match self.kind() {
            ObjKind::Instance(i) => i,
            _ => unreachable!("expected instance object"),
        }
    }

    pub fn as_upvalue(&self) -> &RefCell<UpvalueState> {
        match self.kind() {
            ObjKind::Upvalue(u) => u,
            _ => unreachable!("expected upvalue object"),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind(), ObjKind::String(_))
    }
}
