//! The stack-based bytecode interpreter (spec.md §4.4).
//!
//! Grounded on the teacher's `vm.rs` for the call-frame/value-stack shape
//! (`Frame { closure, ip, slots_start }`, `execute_instr` dispatch, open
//! upvalue bookkeeping via `close_up_values`) and on
//! `original_source/cLox/compiler/vm.h`'s header for `FRAMES_MAX` — the
//! class/instance/method dispatch (`OP_INVOKE`, `OP_SUPER_INVOKE`,
//! `bindMethod`, `OP_INHERIT`) has no counterpart in the teacher (qatam has
//! no classes) and is ported from `original_source/cLox` instead.

use std::io::{self, Write};
use std::time::Instant;

use crate::chunk::OpCode;
use crate::compiler;
use crate::error::{CompileError, InterpretError, RuntimeError};
use crate::gc::{Gc, Heap, RootSource};
use crate::object::{
    BoundMethod, Class, Closure, Instance, LoxFunction, NativeFn, ObjKind, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

pub const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: Gc,
    ip: usize,
    slots_start: usize,
}

impl CallFrame {
    fn function(&self) -> &LoxFunction {
        self.closure.as_closure().function.as_function()
    }
}

/// Borrows exactly the fields a GC cycle needs to trace, built fresh at
/// each allocation site so the borrow checker sees disjoint field
/// projections rather than a whole-`&self` call (see `gc.rs`'s module doc).
struct Roots<'a> {
    stack: &'a [Value],
    frames_closures: Vec<Gc>,
    globals: &'a Table,
    open_upvalues: &'a [Gc],
    init_string: Gc,
}

impl<'a> RootSource for Roots<'a> {
    fn mark_roots(&self, heap: &mut Heap) {
        for v in self.stack {
            heap.mark_value(*v);
        }
        for closure in &self.frames_closures {
            heap.mark_object(*closure);
        }
        for (k, v) in self.globals.entries() {
            heap.mark_object(k);
            heap.mark_value(v);
        }
        for up in self.open_upvalues {
            heap.mark_object(*up);
        }
        heap.mark_object(self.init_string);
    }
}

/// A `Write` sink backed by a shared, cloneable buffer, so callers can read
/// captured `print` output after the VM has finished running (SPEC_FULL.md
/// §4.9 — tests drive the VM through `interpret` and assert on output
/// rather than peeking at internal state).
#[derive(Clone, Default)]
pub struct SharedBuffer(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    open_upvalues: Vec<Gc>,
    heap: Heap,
    init_string: Gc,
    started_at: Instant,
    output: Box<dyn Write>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Builds a VM writing `print` output to `output` instead of stdout,
    /// so tests can capture it (SPEC_FULL.md §4.9).
    pub fn with_output(output: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        // No roots exist yet (the stack, globals and frame list are all
        // still empty), so this first allocation can't trigger a
        // collection that would need to trace anything beyond itself.
        let init_string = heap.intern_str("init", &EmptyRoots);

        let mut vm = Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            heap,
            init_string,
            started_at: Instant::now(),
            output,
        };

        vm.define_native("clock", 0, crate::natives::clock);
        vm
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    fn define_native(&mut self, name: &'static str, arity: u8, function: crate::object::NativeImpl) {
        let name_handle = self.intern(name);
        let native = self.alloc(ObjKind::Native(NativeFn { name, arity, function }));
        self.globals.set(name_handle, Value::Obj(native));
    }

    /// Builds a root set from this call's field projections directly
    /// (never through a `&self` method) so the borrow checker can see it
    /// as disjoint from the `&mut self.heap` borrow the caller takes right
    /// after — see `gc.rs`'s module doc on why `RootSource` objects are
    /// built fresh at each allocation site instead of cached.
    fn alloc(&mut self, kind: ObjKind) -> Gc {
        let roots = Roots {
            stack: &self.stack,
            frames_closures: self.frames.iter().map(|f| f.closure).collect(),
            globals: &self.globals,
            open_upvalues: &self.open_upvalues,
            init_string: self.init_string,
        };
        self.heap.alloc(kind, &roots)
    }

    fn intern(&mut self, text: &str) -> Gc {
        let roots = Roots {
            stack: &self.stack,
            frames_closures: self.frames.iter().map(|f| f.closure).collect(),
            globals: &self.globals,
            open_upvalues: &self.open_upvalues,
            init_string: self.init_string,
        };
        self.heap.intern_str(text, &roots)
    }

    // ---- top level --------------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compiler::compile(source, &mut self.heap).map_err(InterpretError::Compile)?;
        let stack_base = self.stack.len();
        let frames_base = self.frames.len();
        let upvalues_base = self.open_upvalues.len();

        let closure = self.alloc(ObjKind::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.push(Value::Obj(closure));
        let result = self.call_value(Value::Obj(closure), 0).and_then(|()| self.run());

        if result.is_err() {
            // A runtime error unwinds out of `run()` mid-loop, leaving the
            // stack/frames/open upvalues exactly as they were when it fired.
            // The REPL reuses this Vm across lines, so leftover state here
            // would corrupt slot indices for every line after this one.
            self.stack.truncate(stack_base);
            self.frames.truncate(frames_base);
            self.open_upvalues.truncate(upvalues_base);
        }
        result.map_err(InterpretError::from)
    }

    /// Used by the REPL (SPEC_FULL.md §4.8) to report compile errors without
    /// tearing down VM state between lines.
    pub fn interpret_line(&mut self, source: &str) -> Result<(), InterpretError> {
        self.interpret(source)
    }

    // ---- stack helpers ------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow is a compiler bug")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- bytecode reads -----------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let ip = self.frames.last().unwrap().ip;
        let byte = self.frames.last().unwrap().function().chunk.byte(ip);
        self.frames.last_mut().unwrap().ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        self.frames.last().unwrap().function().chunk.constant(idx)
    }

    fn read_string(&mut self) -> Gc {
        match self.read_constant() {
            Value::Obj(gc) if gc.is_string() => gc,
            _ => unreachable!("identifier constants are always interned strings"),
        }
    }

    // ---- errors ---------------------------------------------------------------

    pub(crate) fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = frame.function();
            let line = if frame.ip == 0 {
                function.chunk.line(0)
            } else {
                function.chunk.line(frame.ip - 1)
            };
            let name = match function.name {
                Some(name) => format!("{}()", name.as_string()),
                None => "script".to_string(),
            };
            trace.push(format!("[line {line}] in {name}"));
        }
        RuntimeError {
            message: message.into(),
            trace,
        }
    }

    // ---- upvalues -----------------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> Gc {
        for up in &self.open_upvalues {
            if let UpvalueState::Open(idx) = &*up.as_upvalue().borrow() {
                if *idx == stack_index {
                    return *up;
                }
            }
        }
        let handle = self.alloc(ObjKind::Upvalue(std::cell::RefCell::new(UpvalueState::Open(
            stack_index,
        ))));
        self.open_upvalues.push(handle);
        handle
    }

    fn close_upvalues(&mut self, from: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|up| {
            let mut state = up.as_upvalue().borrow_mut();
            let idx = match &*state {
                UpvalueState::Open(idx) => *idx,
                UpvalueState::Closed(_) => return false,
            };
            if idx >= from {
                *state = UpvalueState::Closed(stack[idx]);
                false
            } else {
                true
            }
        });
    }

    // ---- calling --------------------------------------------------------------

    fn call_closure(&mut self, closure: Gc, argc: u8) -> Result<(), RuntimeError> {
        let arity = closure.as_closure().function.as_function().arity;
        if argc != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {argc}."
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slots_start = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_start,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        if let Value::Obj(gc) = callee {
            match gc.kind() {
                ObjKind::Closure(_) => return self.call_closure(gc, argc),
                ObjKind::Native(native) => {
                    if argc != native.arity {
                        return Err(self.runtime_error(format!(
                            "Expected {} arguments but got {argc}.",
                            native.arity
                        )));
                    }
                    let start = self.stack.len() - argc as usize;
                    let args: Vec<Value> = self.stack[start..].to_vec();
                    let result = (native.function)(self, &args)?;
                    self.stack.truncate(start - 1);
                    self.push(result);
                    return Ok(());
                }
                ObjKind::Class(_) => {
                    let instance = self.alloc(ObjKind::Instance(std::cell::RefCell::new(
                        Instance::new(gc),
                    )));
                    let slot = self.stack.len() - argc as usize - 1;
                    self.stack[slot] = Value::Obj(instance);

                    let initializer = gc.as_class().borrow().methods.get(self.init_string);
                    if let Some(Value::Obj(init_closure)) = initializer {
                        return self.call_closure(init_closure, argc);
                    } else if argc != 0 {
                        return Err(
                            self.runtime_error(format!("Expected 0 arguments but got {argc}."))
                        );
                    }
                    return Ok(());
                }
                ObjKind::BoundMethod(bm) => {
                    let slot = self.stack.len() - argc as usize - 1;
                    self.stack[slot] = bm.receiver;
                    return self.call_closure(bm.method, argc);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn bind_method(&mut self, class: Gc, name: Gc) -> Result<(), RuntimeError> {
        let method = class.as_class().borrow().methods.get(name);
        let method_closure = match method {
            Some(Value::Obj(closure)) => closure,
            _ => {
                return Err(self.runtime_error(format!(
                    "Undefined property '{}'.",
                    name.as_string()
                )))
            }
        };
        let receiver = self.pop();
        let bound = self.alloc(ObjKind::BoundMethod(BoundMethod {
            receiver,
            method: method_closure,
        }));
        self.push(Value::Obj(bound));
        Ok(())
    }

    fn invoke_from_class(&mut self, class: Gc, name: Gc, argc: u8) -> Result<(), RuntimeError> {
        let method = class.as_class().borrow().methods.get(name);
        match method {
            Some(Value::Obj(closure)) => self.call_closure(closure, argc),
            _ => Err(self.runtime_error(format!("Undefined property '{}'.", name.as_string()))),
        }
    }

    fn invoke(&mut self, name: Gc, argc: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc as usize);
        let instance = match receiver {
            Value::Obj(gc) if matches!(gc.kind(), ObjKind::Instance(_)) => gc,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        if let Some(field) = instance.as_instance().borrow().fields.get(name) {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }

        let class = instance.as_instance().borrow().class;
        self.invoke_from_class(class, name, argc)
    }

    // ---- the interpreter loop ---------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            #[cfg(feature = "debug-execution")]
            {
                let frame = self.frames.last().unwrap();
                let ip = frame.ip;
                let (line, _) = frame.function().chunk.disassemble_at(ip);
                log::trace!("{}", line.trim_end());
            }

            let byte = self.read_byte();
            let op = OpCode::from_u8(byte);

            match op {
                OpCode::Constant => {
                    let v = self.read_constant();
                    self.push(v);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let idx = self.frames.last().unwrap().slots_start + slot;
                    self.push(self.stack[idx]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let idx = self.frames.last().unwrap().slots_start + slot;
                    self.stack[idx] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(v) => self.push(v),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                name.as_string()
                            )))
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            name.as_string()
                        )));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.frames.last().unwrap().closure.as_closure().upvalues[slot];
                    let value = match &*upvalue.as_upvalue().borrow() {
                        UpvalueState::Open(idx) => self.stack[*idx],
                        UpvalueState::Closed(v) => *v,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.frames.last().unwrap().closure.as_closure().upvalues[slot];
                    let value = self.peek(0);
                    let mut state = upvalue.as_upvalue().borrow_mut();
                    match &mut *state {
                        UpvalueState::Open(idx) => self.stack[*idx] = value,
                        UpvalueState::Closed(slot) => *slot = value,
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let instance = match self.peek(0) {
                        Value::Obj(gc) if matches!(gc.kind(), ObjKind::Instance(_)) => gc,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    let field = instance.as_instance().borrow().fields.get(name);
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = instance.as_instance().borrow().class;
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let instance = match self.peek(1) {
                        Value::Obj(gc) if matches!(gc.kind(), ObjKind::Instance(_)) => gc,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let value = self.peek(0);
                    instance.as_instance().borrow_mut().fields.set(name, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = match self.pop() {
                        Value::Obj(gc) if matches!(gc.kind(), ObjKind::Class(_)) => gc,
                        _ => unreachable!("compiler only emits OP_GET_SUPER with a class on top"),
                    };
                    self.bind_method(superclass, name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }
                OpCode::Print => {
                    let v = self.pop();
                    let _ = writeln!(self.output, "{v}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    let superclass = match self.pop() {
                        Value::Obj(gc) if matches!(gc.kind(), ObjKind::Class(_)) => gc,
                        _ => unreachable!("compiler only emits OP_SUPER_INVOKE with a class on top"),
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(gc) if matches!(gc.kind(), ObjKind::Function(_)) => gc,
                        _ => unreachable!("OP_CLOSURE always references a function constant"),
                    };
                    let upvalue_count = function.as_function().upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let slots_start = self.frames.last().unwrap().slots_start;
                            upvalues.push(self.capture_upvalue(slots_start + index));
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            upvalues.push(enclosing.as_closure().upvalues[index]);
                        }
                    }
                    let closure = self.alloc(ObjKind::Closure(Closure { function, upvalues }));
                    self.push(Value::Obj(closure));
                }
                OpCode::CloseUpvalue => {
                    let idx = self.stack.len() - 1;
                    self.close_upvalues(idx);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slots_start);
                    self.stack.truncate(frame.slots_start);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(ObjKind::Class(std::cell::RefCell::new(Class::new(name))));
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Obj(gc) if matches!(gc.kind(), ObjKind::Class(_)) => gc,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let subclass = match self.peek(0) {
                        Value::Obj(gc) => gc,
                        _ => unreachable!(),
                    };
                    let methods = superclass.as_class().borrow().methods.entries().collect::<Vec<_>>();
                    for (k, v) in methods {
                        subclass.as_class().borrow_mut().methods.set(k, v);
                    }
                    self.pop(); // subclass; superclass stays bound as the `super` local.
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.pop();
                    let class = match self.peek(0) {
                        Value::Obj(gc) => gc,
                        _ => unreachable!(),
                    };
                    class.as_class().borrow_mut().methods.set(name, method);
                }
            }
        }
    }

    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(op(a, b));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(_), Value::Number(_)) => {
                let b = self.pop().as_number().unwrap();
                let a = self.pop().as_number().unwrap();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (a, b) if a.is_string() && b.is_string() => {
                let b = self.pop();
                let a = self.pop();
                let concatenated = format!("{}{}", a.as_string().unwrap(), b.as_string().unwrap());
                let handle = self.intern(&concatenated);
                self.push(Value::Obj(handle));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }
}

struct EmptyRoots;
impl RootSource for EmptyRoots {
    fn mark_roots(&self, _heap: &mut Heap) {}
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<String, InterpretError> {
        let output = SharedBuffer::new();
        let mut vm = Vm::with_output(Box::new(output.clone()));
        vm.interpret(source)?;
        Ok(output.contents())
    }

    #[test]
    fn stack_and_frames_are_empty_after_clean_completion() {
        let output = SharedBuffer::new();
        let mut vm = Vm::with_output(Box::new(output.clone()));
        vm.interpret("var a = 1; { var b = 2; print a + b; } print a;")
            .expect("program should run without error");
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        assert_eq!(output.contents().trim_end(), "3\n1");
    }

    #[test]
    fn instances_store_and_return_fields() {
        let out = run(
            r#"
            class Point {}
            var p = Point();
            p.x = 3;
            p.y = 4;
            print p.x + p.y;
            "#,
        )
        .expect("program should run");
        assert_eq!(out.trim_end(), "7");
    }

    #[test]
    fn calling_with_wrong_arity_is_a_runtime_error() {
        let err = run("fun f(a, b) { return a + b; } f(1);").unwrap_err();
        match err {
            InterpretError::Runtime(e) => assert!(e.message.contains("Expected 2 arguments")),
            InterpretError::Compile(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn undefined_global_read_is_a_runtime_error() {
        let err = run("print nope;").unwrap_err();
        match err {
            InterpretError::Runtime(e) => assert!(e.message.contains("Undefined variable")),
            InterpretError::Compile(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn repeated_interpret_line_calls_share_globals() {
        let output = SharedBuffer::new();
        let mut vm = Vm::with_output(Box::new(output.clone()));
        vm.interpret_line("var x = 10;").expect("line should run");
        vm.interpret_line("print x + 1;").expect("line should run");
        assert_eq!(output.contents().trim_end(), "11");
    }
}
