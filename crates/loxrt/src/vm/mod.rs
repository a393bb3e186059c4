//! The bytecode interpreter: a stack of values, a stack of call frames, and
//! a dispatch loop over [`Opcode`].

use crate::bytecode::Opcode;
use crate::diagnostic::Diagnostic;
use crate::gc::{GcConfig, Heap};
use crate::object::{
    Gc, NativeFn, NativeFnPtr, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjString,
    ObjUpvalue, UpvalueLocation,
};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;

/// Outcome of running a source string end to end.
#[derive(Debug)]
pub enum InterpretResult {
    Ok,
    CompileError(Vec<Diagnostic>),
    RuntimeError(Diagnostic),
}

struct CallFrame {
    closure: Gc<ObjClosure>,
    ip: usize,
    /// Index into `Vm::stack` of this frame's slot 0.
    stack_base: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    open_upvalues: Vec<Gc<ObjUpvalue>>,
    heap: Heap,
    /// The interned `"init"` string, compared against on every class
    /// instantiation; kept as a standing GC root.
    init_string: Gc<ObjString>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::with_config(GcConfig::default())
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Self {
        let mut heap = Heap::new(config);
        let init_string = heap.intern("init");
        let mut vm = Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            heap,
            init_string,
        };
        vm.define_native("clock", Some(0), crate::native::clock);
        vm
    }

    pub fn bytes_allocated(&self) -> usize {
        self.heap.bytes_allocated()
    }

    pub fn collections_run(&self) -> usize {
        self.heap.collections_run()
    }

    fn define_native(&mut self, name: &'static str, arity: Option<u8>, function: NativeFnPtr) {
        let name_gc = self.intern(name);
        // `name_gc` isn't reachable from any root yet (the intern table is
        // weak) until it's installed in `globals` below, so it has to sit on
        // the stack across the `alloc_native` that could collect.
        self.push(Value::Obj(Obj::String(name_gc)));
        self.maybe_gc();
        let native = self.heap.alloc_native(NativeFn {
            name,
            arity,
            function,
        });
        self.pop();
        self.globals.set(name_gc, Value::Obj(Obj::Native(native)));
    }

    /// Compiles and runs `source` against this VM's existing global and
    /// heap state (so a REPL can build up globals across calls).
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let Vm {
            stack,
            frames,
            globals,
            open_upvalues,
            heap,
            init_string,
        } = self;
        let function = match crate::compiler::compile(source, heap, |h| {
            // A GC cycle can run mid-compile (while interning an
            // identifier); this VM's previously-established state is just
            // as much a root then as it is once the VM is running.
            for value in stack.iter() {
                h.mark_value(value);
            }
            for frame in frames.iter() {
                h.mark_obj(Obj::Closure(frame.closure));
            }
            h.mark_table(globals);
            for uv in open_upvalues.iter() {
                h.mark_obj(Obj::Upvalue(*uv));
            }
            h.mark_obj(Obj::String(*init_string));
        }) {
            Ok(f) => f,
            Err(diagnostics) => return InterpretResult::CompileError(diagnostics),
        };
        // `function` has no root yet (the compiler that protected it is
        // gone) until it's wrapped in the closure pushed below, so park it
        // on the stack across the `alloc_closure` that could collect.
        self.push(Value::Obj(Obj::Function(function)));
        self.maybe_gc();
        let closure = self.heap.alloc_closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        });
        self.pop();
        self.push(Value::Obj(Obj::Closure(closure)));
        if let Err(diag) = self.call_closure(closure, 0) {
            self.reset_stack();
            return InterpretResult::RuntimeError(diag);
        }
        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(diag) => {
                self.reset_stack();
                InterpretResult::RuntimeError(diag)
            }
        }
    }

    /// Clears the value stack, call-frame stack, and open-upvalue list after
    /// a runtime error. `run()` propagates a failing opcode's `Err` straight
    /// out via `?` without unwinding any frames it already pushed, so a
    /// persistent `Vm` (as kept alive across REPL lines) would otherwise
    /// carry a stale frame into the next `interpret` call.
    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // ---- GC plumbing --------------------------------------------------------

    /// Roots the VM's value stack, every live call frame's closure, globals,
    /// open upvalues, and the standing `"init"` string.
    fn maybe_gc(&mut self) {
        let Vm {
            stack,
            frames,
            globals,
            open_upvalues,
            heap,
            init_string,
        } = self;
        heap.maybe_collect(|h| {
            for value in stack.iter() {
                h.mark_value(value);
            }
            for frame in frames.iter() {
                h.mark_obj(Obj::Closure(frame.closure));
            }
            h.mark_table(globals);
            for uv in open_upvalues.iter() {
                h.mark_obj(Obj::Upvalue(*uv));
            }
            h.mark_obj(Obj::String(*init_string));
        });
    }

    fn intern(&mut self, s: &str) -> Gc<ObjString> {
        self.maybe_gc();
        self.heap.intern(s)
    }

    // ---- stack / frame plumbing ----------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("stack underflow cannot happen for well-formed bytecode")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames
            .last()
            .expect("run() never executes with an empty frame stack")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames
            .last_mut()
            .expect("run() never executes with an empty frame stack")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        self.current_frame().closure.function.chunk.constants[idx as usize]
    }

    fn read_string_constant(&mut self) -> Gc<ObjString> {
        match self.read_constant() {
            Value::Obj(Obj::String(s)) => s,
            other => unreachable!("expected a string constant operand, found {other:?}"),
        }
    }

    /// Attaches a source line (from the innermost frame) and a Lox-style
    /// call-stack trace to a runtime failure message.
    fn runtime_error(&self, message: impl Into<String>) -> Diagnostic {
        let message = message.into();
        let mut trace = String::new();
        for frame in self.frames.iter().rev() {
            let function = frame.closure.function;
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(name) => format!("{}()", name.value),
                None => "script".to_string(),
            };
            trace.push_str(&format!("[line {line}] in {name}\n"));
        }
        let line = self
            .frames
            .last()
            .map(|f| f.closure.function.chunk.line_at(f.ip.saturating_sub(1)))
            .unwrap_or(0);
        let message = if trace.is_empty() {
            message
        } else {
            format!("{message}\n{}", trace.trim_end())
        };
        Diagnostic::runtime_error(line, message)
    }

    // ---- dispatch loop --------------------------------------------------------

    fn run(&mut self) -> Result<(), Diagnostic> {
        loop {
            let byte = self.read_byte();
            let opcode =
                Opcode::from_byte(byte).expect("compiler only ever emits well-formed opcode bytes");
            match opcode {
                Opcode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                Opcode::Nil => self.push(Value::Nil),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().stack_base;
                    self.push(self.stack[base + slot]);
                }
                Opcode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().stack_base;
                    self.stack[base + slot] = self.peek(0);
                }
                Opcode::GetGlobal => {
                    let name = self.read_string_constant();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(
                                self.runtime_error(format!("Undefined variable '{}'.", name.value))
                            )
                        }
                    }
                }
                Opcode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                Opcode::SetGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        return Err(
                            self.runtime_error(format!("Undefined variable '{}'.", name.value))
                        );
                    }
                }
                Opcode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let uv = self.current_frame().closure.upvalues[slot];
                    self.push(self.read_upvalue(uv));
                }
                Opcode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let uv = self.current_frame().closure.upvalues[slot];
                    let value = self.peek(0);
                    self.write_upvalue(uv, value);
                }
                Opcode::GetProperty => self.get_property()?,
                Opcode::SetProperty => self.set_property()?,
                Opcode::GetSuper => self.get_super()?,
                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Opcode::Greater => self.numeric_binary(|a, b| Value::Bool(a > b))?,
                Opcode::Less => self.numeric_binary(|a, b| Value::Bool(a < b))?,
                Opcode::Add => self.add()?,
                Opcode::Subtract => self.numeric_binary(|a, b| Value::Number(a - b))?,
                Opcode::Multiply => self.numeric_binary(|a, b| Value::Number(a * b))?,
                Opcode::Divide => self.numeric_binary(|a, b| Value::Number(a / b))?,
                Opcode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Opcode::Negate => match self.peek(0).as_number() {
                    Some(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    None => return Err(self.runtime_error("Operand must be a number.")),
                },
                Opcode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                Opcode::Jump => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip += offset as usize;
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                Opcode::Loop => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip -= offset as usize;
                }
                Opcode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                Opcode::Invoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                Opcode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte();
                    let superclass = match self.pop() {
                        Value::Obj(Obj::Class(c)) => c,
                        other => {
                            unreachable!("compiler always pushes a class here, found {other:?}")
                        }
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }
                Opcode::Closure => self.make_closure()?,
                Opcode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues_from(top);
                    self.pop();
                }
                Opcode::Return => {
                    let result = self.pop();
                    let base = self.current_frame().stack_base;
                    self.close_upvalues_from(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                Opcode::Class => {
                    let name = self.read_string_constant();
                    self.maybe_gc();
                    let class = self.heap.alloc_class(ObjClass::new(name));
                    self.push(Value::Obj(Obj::Class(class)));
                }
                Opcode::Inherit => self.inherit()?,
                Opcode::Method => self.bind_pending_method()?,
            }
        }
    }

    fn numeric_binary(&mut self, f: impl Fn(f64, f64) -> Value) -> Result<(), Diagnostic> {
        match (self.peek(1).as_number(), self.peek(0).as_number()) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(f(a, b));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    /// `+` overloads onto string concatenation. Operands stay on the stack
    /// (rooted) through the byte copy and the possibly-GC-triggering
    /// `intern` call; only popped once their data is safely captured.
    fn add(&mut self) -> Result<(), Diagnostic> {
        match (self.peek(1), self.peek(0)) {
            (Value::Obj(Obj::String(a)), Value::Obj(Obj::String(b))) => {
                let mut concatenated = a.value.clone();
                concatenated.push_str(&b.value);
                let s = self.intern(&concatenated);
                self.pop();
                self.pop();
                self.push(Value::Obj(Obj::String(s)));
                Ok(())
            }
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(a), Some(b)) => {
                    self.pop();
                    self.pop();
                    self.push(Value::Number(a + b));
                    Ok(())
                }
                _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
            },
        }
    }

    // ---- calls ----------------------------------------------------------------

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), Diagnostic> {
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, argc),
            Value::Obj(Obj::Native(native)) => {
                if let Some(expected) = native.arity {
                    if expected != argc {
                        return Err(self.runtime_error(format!(
                            "Expected {expected} arguments but got {argc}."
                        )));
                    }
                }
                let start = self.stack.len() - argc as usize;
                let result =
                    (native.function)(&self.stack[start..]).map_err(|e| self.runtime_error(e))?;
                self.stack.truncate(start - 1);
                self.push(result);
                Ok(())
            }
            Value::Obj(Obj::Class(class)) => {
                self.maybe_gc();
                let instance = self.heap.alloc_instance(ObjInstance::new(class));
                let slot = self.stack.len() - 1 - argc as usize;
                self.stack[slot] = Value::Obj(Obj::Instance(instance));
                let initializer = class.methods.borrow().get(self.init_string);
                match initializer {
                    Some(Value::Obj(Obj::Closure(init))) => self.call_closure(init, argc),
                    _ if argc != 0 => {
                        Err(self.runtime_error(format!("Expected 0 arguments but got {argc}.")))
                    }
                    _ => Ok(()),
                }
            }
            Value::Obj(Obj::BoundMethod(bound)) => {
                let slot = self.stack.len() - 1 - argc as usize;
                self.stack[slot] = bound.receiver;
                self.call_closure(bound.method, argc)
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure: Gc<ObjClosure>, argc: u8) -> Result<(), Diagnostic> {
        let arity = closure.function.arity;
        if argc != arity {
            return Err(self.runtime_error(format!("Expected {arity} arguments but got {argc}.")));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let stack_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            stack_base,
        });
        Ok(())
    }

    fn invoke(&mut self, name: Gc<ObjString>, argc: u8) -> Result<(), Diagnostic> {
        let instance = match self.peek(argc as usize) {
            Value::Obj(Obj::Instance(i)) => i,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };
        if let Some(value) = instance.fields.borrow().get(name) {
            let slot = self.stack.len() - 1 - argc as usize;
            self.stack[slot] = value;
            return self.call_value(value, argc);
        }
        self.invoke_from_class(instance.class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: Gc<ObjClass>,
        name: Gc<ObjString>,
        argc: u8,
    ) -> Result<(), Diagnostic> {
        let method = class.methods.borrow().get(name);
        match method {
            Some(Value::Obj(Obj::Closure(closure))) => self.call_closure(closure, argc),
            _ => Err(self.runtime_error(format!("Undefined property '{}'.", name.value))),
        }
    }

    // ---- closures / upvalues ----------------------------------------------------

    fn make_closure(&mut self) -> Result<(), Diagnostic> {
        let function = match self.read_constant() {
            Value::Obj(Obj::Function(f)) => f,
            other => {
                unreachable!("OP_CLOSURE always operates on a function constant, found {other:?}")
            }
        };
        let count = function.upvalue_count;
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte();
            let uv = if is_local {
                let base = self.current_frame().stack_base;
                self.capture_upvalue(base + index as usize)
            } else {
                self.current_frame().closure.upvalues[index as usize]
            };
            upvalues.push(uv);
        }
        self.maybe_gc();
        let closure = self.heap.alloc_closure(ObjClosure { function, upvalues });
        self.push(Value::Obj(Obj::Closure(closure)));
        Ok(())
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> Gc<ObjUpvalue> {
        for uv in &self.open_upvalues {
            if uv.stack_index() == Some(stack_index) {
                return *uv;
            }
        }
        self.maybe_gc();
        let uv = self.heap.alloc_upvalue(ObjUpvalue::new(stack_index));
        self.open_upvalues.push(uv);
        uv
    }

    fn read_upvalue(&self, uv: Gc<ObjUpvalue>) -> Value {
        match uv.location.get() {
            UpvalueLocation::Open(idx) => self.stack[idx],
            UpvalueLocation::Closed(value) => value,
        }
    }

    fn write_upvalue(&mut self, uv: Gc<ObjUpvalue>, value: Value) {
        match uv.location.get() {
            UpvalueLocation::Open(idx) => self.stack[idx] = value,
            UpvalueLocation::Closed(_) => uv.location.set(UpvalueLocation::Closed(value)),
        }
    }

    /// Closes every open upvalue pointing at or past `from`, copying the
    /// current stack value in. Driven by scope exit (`OP_CLOSE_UPVALUE`) and
    /// by `OP_RETURN` closing everything at or above the returning frame's base.
    fn close_upvalues_from(&mut self, from: usize) {
        let Vm {
            stack,
            open_upvalues,
            ..
        } = self;
        open_upvalues.retain(|uv| match uv.location.get() {
            UpvalueLocation::Open(idx) if idx >= from => {
                uv.location.set(UpvalueLocation::Closed(stack[idx]));
                false
            }
            _ => true,
        });
    }

    // ---- classes ----------------------------------------------------------------

    fn get_property(&mut self) -> Result<(), Diagnostic> {
        let name = self.read_string_constant();
        let instance = match self.peek(0) {
            Value::Obj(Obj::Instance(i)) => i,
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };
        if let Some(value) = instance.fields.borrow().get(name) {
            self.pop();
            self.push(value);
            return Ok(());
        }
        self.bind_method(instance.class, name)
    }

    fn set_property(&mut self) -> Result<(), Diagnostic> {
        let name = self.read_string_constant();
        let instance = match self.peek(1) {
            Value::Obj(Obj::Instance(i)) => i,
            _ => return Err(self.runtime_error("Only instances have fields.")),
        };
        let value = self.peek(0);
        instance.fields.borrow_mut().set(name, value);
        let value = self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn get_super(&mut self) -> Result<(), Diagnostic> {
        let name = self.read_string_constant();
        let superclass = match self.pop() {
            Value::Obj(Obj::Class(c)) => c,
            other => {
                unreachable!("compiler always pushes a class before GET_SUPER, found {other:?}")
            }
        };
        self.bind_method(superclass, name)
    }

    fn bind_method(&mut self, class: Gc<ObjClass>, name: Gc<ObjString>) -> Result<(), Diagnostic> {
        let method = class.methods.borrow().get(name);
        let closure = match method {
            Some(Value::Obj(Obj::Closure(c))) => c,
            _ => return Err(self.runtime_error(format!("Undefined property '{}'.", name.value))),
        };
        let receiver = self.peek(0);
        self.maybe_gc();
        let bound = self.heap.alloc_bound_method(ObjBoundMethod {
            receiver,
            method: closure,
        });
        self.pop();
        self.push(Value::Obj(Obj::BoundMethod(bound)));
        Ok(())
    }

    fn inherit(&mut self) -> Result<(), Diagnostic> {
        let superclass = match self.peek(1) {
            Value::Obj(Obj::Class(c)) => c,
            _ => return Err(self.runtime_error("Superclass must be a class.")),
        };
        let subclass = match self.peek(0) {
            Value::Obj(Obj::Class(c)) => c,
            other => unreachable!("OP_INHERIT always follows a class push, found {other:?}"),
        };
        let inherited = superclass.methods.borrow().clone();
        subclass.methods.borrow_mut().add_all_from(&inherited);
        self.pop();
        Ok(())
    }

    fn bind_pending_method(&mut self) -> Result<(), Diagnostic> {
        let name = self.read_string_constant();
        let method = self.pop();
        let class = match self.peek(0) {
            Value::Obj(Obj::Class(c)) => c,
            other => unreachable!("OP_METHOD always follows a class push, found {other:?}"),
        };
        class.methods.borrow_mut().set(name, method);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ok(source: &str) -> Vm {
        let mut vm = Vm::with_config(GcConfig::default());
        match vm.interpret(source) {
            InterpretResult::Ok => vm,
            InterpretResult::CompileError(diags) => panic!("compile error: {diags:?}"),
            InterpretResult::RuntimeError(diag) => panic!("runtime error: {diag}"),
        }
    }

    #[test]
    fn arithmetic_and_globals() {
        let mut vm = run_ok("var x = 1 + 2 * 3;");
        let key = vm.intern("x");
        assert_eq!(vm.globals.get(key), Some(Value::Number(7.0)));
    }

    #[test]
    fn string_concatenation_interns_result() {
        let mut vm = run_ok("var s = \"foo\" + \"bar\";");
        let key = vm.intern("s");
        match vm.globals.get(key) {
            Some(Value::Obj(Obj::String(s))) => assert_eq!(s.value, "foobar"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn closures_capture_and_mutate_upvalues() {
        let mut vm = run_ok(
            "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } return count; } \
             var c = makeCounter(); var a = c(); var b = c();",
        );
        let a = vm.intern("a");
        let b = vm.intern("b");
        assert_eq!(vm.globals.get(a), Some(Value::Number(1.0)));
        assert_eq!(vm.globals.get(b), Some(Value::Number(2.0)));
    }

    #[test]
    fn classes_methods_and_init() {
        let mut vm = run_ok(
            "class Counter { init() { this.count = 0; } \
             bump() { this.count = this.count + 1; return this.count; } } \
             var c = Counter(); var r = c.bump();",
        );
        let r = vm.intern("r");
        assert_eq!(vm.globals.get(r), Some(Value::Number(1.0)));
    }

    #[test]
    fn inheritance_and_super_dispatch() {
        let mut vm = run_ok(
            "class A { greet() { return \"A\"; } } \
             class B < A { greet() { return super.greet() + \"B\"; } } \
             var r = B().greet();",
        );
        let r = vm.intern("r");
        match vm.globals.get(r) {
            Some(Value::Obj(Obj::String(s))) => assert_eq!(s.value, "AB"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn undefined_variable_is_runtime_error() {
        let mut vm = Vm::with_config(GcConfig::default());
        match vm.interpret("print nope;") {
            InterpretResult::RuntimeError(diag) => {
                assert!(diag.message.contains("Undefined variable"))
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let mut vm = Vm::with_config(GcConfig::default());
        match vm.interpret("var x = 1; x();") {
            InterpretResult::RuntimeError(diag) => {
                assert!(diag.message.contains("Can only call"))
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn stress_gc_survives_a_nontrivial_program() {
        let mut vm = Vm::with_config(GcConfig::default().with_stress_gc(true));
        let result = vm.interpret(
            "class Tree { init(v) { this.v = v; } } \
             var items = Tree(1); \
             for (var i = 0; i < 50; i = i + 1) { var t = Tree(i); }",
        );
        assert!(matches!(result, InterpretResult::Ok));
        assert!(vm.collections_run() > 0);
    }
}
