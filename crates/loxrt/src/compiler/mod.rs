//! Single-pass Pratt compiler: parses, resolves lexical scope, and emits
//! bytecode directly, with no separate AST stage.
//!
//! Dispatch for prefix/infix parselets is a plain `match` on [`TokenKind`]
//! rather than a table of function pointers (the book's `ParseRule[]`):
//! Rust's borrow checker makes a `&mut Compiler`-taking function-pointer
//! table awkward across the compiler's lifetime parameter, and a `match` is
//! exactly as fast and reads the same as a table lookup would.

use crate::bytecode::{Chunk, Opcode};
use crate::diagnostic::{Diagnostic, DiagnosticAt};
use crate::gc::Heap;
use crate::object::{Gc, Obj, ObjFunction, ObjString};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next_higher(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    /// -1 means "declared but not yet initialized" and may not be read.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDescriptor {
    index: u8,
    is_local: bool,
}

struct FunctionCompiler<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDescriptor>,
}

impl<'src> FunctionCompiler<'src> {
    fn new(kind: FunctionKind, name: Option<Gc<ObjString>>) -> Self {
        // Slot 0 is reserved: the receiver for methods/initializers (named
        // "this" so `this` resolves as an ordinary local read), empty and
        // unused otherwise.
        let slot_zero_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
            "this"
        } else {
            ""
        };
        Self {
            function: ObjFunction::new(name),
            kind,
            locals: vec![Local {
                name: slot_zero_name,
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct ClassCompiler {
    has_superclass: bool,
}

pub struct Compiler<'src, F: FnMut(&mut Heap)> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    heap: &'src mut Heap,
    functions: Vec<FunctionCompiler<'src>>,
    classes: Vec<ClassCompiler>,
    /// Marks every root the *caller* holds that isn't visible from the
    /// compiler's own function chain: a REPL-style `Vm`'s persistent value
    /// stack, call frames, globals, open upvalues, and interned `"init"`
    /// string. A GC cycle can run mid-compile (while interning an
    /// identifier), so those roots need marking here too, not just at the
    /// end of the previous `interpret` call.
    mark_extra: F,
}

/// Compiles `source` into a top-level script function. On failure, returns
/// every diagnostic collected up to the end of compilation (panic-mode
/// synchronization means later, unrelated errors are also reported).
///
/// `mark_extra` marks whatever GC roots the caller holds outside of this
/// compilation (see [`Compiler::mark_extra`]); pass `|_| {}` for a one-shot
/// compile against a scratch heap with no other live roots.
pub fn compile<F: FnMut(&mut Heap)>(
    source: &str,
    heap: &mut Heap,
    mark_extra: F,
) -> Result<Gc<ObjFunction>, Vec<Diagnostic>> {
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        current: Token::new(TokenKind::Eof, "", 0),
        previous: Token::new(TokenKind::Eof, "", 0),
        had_error: false,
        panic_mode: false,
        diagnostics: Vec::new(),
        heap,
        functions: vec![FunctionCompiler::new(FunctionKind::Script, None)],
        classes: Vec::new(),
        mark_extra,
    };

    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }

    let (function, _upvalues) = compiler.end_function();
    if compiler.had_error {
        Err(compiler.diagnostics)
    } else {
        Ok(function)
    }
}

impl<'src, F: FnMut(&mut Heap)> Compiler<'src, F> {
    // ---- token stream plumbing -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &'static str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let at = match token.kind {
            TokenKind::Eof => DiagnosticAt::End,
            TokenKind::Error => DiagnosticAt::ScanError,
            _ => DiagnosticAt::Lexeme(token.lexeme.to_string()),
        };
        self.diagnostics
            .push(Diagnostic::compile_error(token.line, at, message));
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Class | Fun | Var | For | If | While | Print | Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- GC plumbing -------------------------------------------------------

    /// Every function's in-progress chunk is a GC root: collection may run
    /// while we're still interning an identifier or string literal that
    /// hasn't been wired into any (yet-unfinished) constant pool elsewhere.
    fn maybe_gc(&mut self) {
        let Compiler {
            heap,
            functions,
            mark_extra,
            ..
        } = self;
        heap.maybe_collect(|h| {
            for fc in functions.iter() {
                if let Some(name) = fc.function.name {
                    h.mark_obj(Obj::String(name));
                }
                for constant in &fc.function.chunk.constants {
                    h.mark_value(constant);
                }
            }
            mark_extra(h);
        });
    }

    fn intern(&mut self, s: &str) -> Gc<ObjString> {
        self.maybe_gc();
        self.heap.intern(s)
    }

    // ---- bytecode emission --------------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.functions.last_mut().unwrap().function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.emit_byte(op.to_byte());
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let bytes = (jump as u16).to_be_bytes();
        self.current_chunk().code[offset] = bytes[0];
        self.current_chunk().code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Opcode::Loop);
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
            return;
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn emit_return(&mut self) {
        match self.functions.last().unwrap().kind {
            FunctionKind::Initializer => self.emit_bytes(Opcode::GetLocal.to_byte(), 0),
            _ => self.emit_op(Opcode::Nil),
        }
        self.emit_op(Opcode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_bytes(Opcode::Constant.to_byte(), idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let s = self.intern(name);
        self.make_constant(Value::Obj(Obj::String(s)))
    }

    // ---- scope / locals / upvalues ------------------------------------------

    fn begin_scope(&mut self) {
        let level = self.functions.len() - 1;
        self.functions[level].scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let level = self.functions.len() - 1;
        self.functions[level].scope_depth -= 1;
        let depth = self.functions[level].scope_depth;
        loop {
            let should_pop =
                matches!(self.functions[level].locals.last(), Some(l) if l.depth > depth);
            if !should_pop {
                break;
            }
            let captured = self.functions[level].locals.pop().unwrap().is_captured;
            if captured {
                self.emit_op(Opcode::CloseUpvalue);
            } else {
                self.emit_op(Opcode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &'src str) {
        let level = self.functions.len() - 1;
        if self.functions[level].locals.len() == 256 {
            self.error("Too many local variables in function.");
            return;
        }
        self.functions[level].locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        let level = self.functions.len() - 1;
        if self.functions[level].scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let scope_depth = self.functions[level].scope_depth;
        let mut duplicate = false;
        for local in self.functions[level].locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &'static str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        let level = self.functions.len() - 1;
        if self.functions[level].scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        let level = self.functions.len() - 1;
        if self.functions[level].scope_depth == 0 {
            return;
        }
        let depth = self.functions[level].scope_depth;
        self.functions[level].locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        let level = self.functions.len() - 1;
        if self.functions[level].scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(Opcode::DefineGlobal.to_byte(), global);
    }

    fn resolve_local_at(&mut self, level: usize, name: &str) -> Option<usize> {
        let mut found: Option<(usize, bool)> = None;
        for (i, local) in self.functions[level].locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((i, local.depth == -1));
                break;
            }
        }
        let (index, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(index)
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> u8 {
        for (i, uv) in self.functions[level].upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if self.functions[level].upvalues.len() == 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.functions[level]
            .upvalues
            .push(UpvalueDescriptor { index, is_local });
        self.functions[level].function.upvalue_count = self.functions[level].upvalues.len();
        (self.functions[level].upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let parent = level - 1;
        if let Some(local_idx) = self.resolve_local_at(parent, name) {
            self.functions[parent].locals[local_idx].is_captured = true;
            return Some(self.add_upvalue(level, local_idx as u8, true));
        }
        if let Some(upvalue_idx) = self.resolve_upvalue(parent, name) {
            return Some(self.add_upvalue(level, upvalue_idx, false));
        }
        None
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let level = self.functions.len() - 1;
        let (get_op, set_op, arg) = if let Some(idx) = self.resolve_local_at(level, name) {
            (Opcode::GetLocal, Opcode::SetLocal, idx as u8)
        } else if let Some(idx) = self.resolve_upvalue(level, name) {
            (Opcode::GetUpvalue, Opcode::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(name);
            (Opcode::GetGlobal, Opcode::SetGlobal, idx)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op.to_byte(), arg);
        } else {
            self.emit_bytes(get_op.to_byte(), arg);
        }
    }

    // ---- Pratt parser --------------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix_rule(self.previous.kind, can_assign) {
            self.error("Expected expression.");
            return;
        }

        while precedence <= Self::precedence_of(self.current.kind) {
            self.advance();
            self.infix_rule(self.previous.kind, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn precedence_of(kind: TokenKind) -> Precedence {
        use TokenKind::*;
        match kind {
            Or => Precedence::Or,
            And => Precedence::And,
            BangEqual | EqualEqual => Precedence::Equality,
            Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
            Plus | Minus => Precedence::Term,
            Star | Slash => Precedence::Factor,
            LeftParen | Dot => Precedence::Call,
            _ => Precedence::None,
        }
    }

    fn prefix_rule(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string(),
            False | True | Nil => self.literal(),
            Identifier => self.variable(can_assign),
            This => self.this_expr(),
            Super => self.super_expr(),
            _ => return false,
        }
        true
    }

    fn infix_rule(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            And => self.and_expr(),
            Or => self.or_expr(),
            LeftParen => self.call_expr(),
            Dot => self.dot_expr(can_assign),
            _ => unreachable!("token {kind:?} has no infix rule"),
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        let value: f64 = self
            .previous
            .lexeme
            .parse()
            .expect("scanner only produces well-formed number lexemes");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        let inner = &lexeme[1..lexeme.len() - 1];
        let s = self.intern(inner);
        self.emit_constant(Value::Obj(Obj::String(s)));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(Opcode::False),
            TokenKind::Nil => self.emit_op(Opcode::Nil),
            TokenKind::True => self.emit_op(Opcode::True),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn this_expr(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_expr(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_bytes(Opcode::SuperInvoke.to_byte(), name_const);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_bytes(Opcode::GetSuper.to_byte(), name_const);
        }
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(Opcode::Not),
            TokenKind::Minus => self.emit_op(Opcode::Negate),
            _ => unreachable!(),
        }
    }

    /// `!=`, `>=`, `<=` are lowered to the primitive comparison plus `NOT`
    /// rather than given their own opcodes.
    fn binary(&mut self) {
        let operator = self.previous.kind;
        let rule_prec = Self::precedence_of(operator);
        self.parse_precedence(rule_prec.next_higher());
        match operator {
            TokenKind::BangEqual => self.emit_bytes(Opcode::Equal.to_byte(), Opcode::Not.to_byte()),
            TokenKind::EqualEqual => self.emit_op(Opcode::Equal),
            TokenKind::Greater => self.emit_op(Opcode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_bytes(Opcode::Less.to_byte(), Opcode::Not.to_byte())
            }
            TokenKind::Less => self.emit_op(Opcode::Less),
            TokenKind::LessEqual => {
                self.emit_bytes(Opcode::Greater.to_byte(), Opcode::Not.to_byte())
            }
            TokenKind::Plus => self.emit_op(Opcode::Add),
            TokenKind::Minus => self.emit_op(Opcode::Subtract),
            TokenKind::Star => self.emit_op(Opcode::Multiply),
            TokenKind::Slash => self.emit_op(Opcode::Divide),
            _ => unreachable!(),
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(Opcode::JumpIfFalse);
        let end_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(Opcode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn call_expr(&mut self) {
        let argc = self.argument_list();
        self.emit_bytes(Opcode::Call.to_byte(), argc);
    }

    fn dot_expr(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(Opcode::SetProperty.to_byte(), name_const);
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_bytes(Opcode::Invoke.to_byte(), name_const);
            self.emit_byte(argc);
        } else {
            self.emit_bytes(Opcode::GetProperty.to_byte(), name_const);
        }
    }

    // ---- statements ------------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_const = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_bytes(Opcode::Class.to_byte(), name_const);
        self.define_variable(name_const);

        self.classes.push(ClassCompiler {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous.lexeme;
            self.variable(false);

            if superclass_name == class_name {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(Opcode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(Opcode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_bytes(Opcode::Method.to_byte(), name_const);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.previous.lexeme;
        let name_gc = self.intern(name);
        self.functions
            .push(FunctionCompiler::new(kind, Some(name_gc)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let overflowed = {
                    let fc = self.functions.last_mut().unwrap();
                    if fc.function.arity == u8::MAX {
                        true
                    } else {
                        fc.function.arity += 1;
                        false
                    }
                };
                if overflowed {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let const_idx = self.make_constant(Value::Obj(Obj::Function(function)));
        self.emit_bytes(Opcode::Closure.to_byte(), const_idx);
        for uv in upvalues {
            self.emit_byte(uv.is_local as u8);
            self.emit_byte(uv.index);
        }
    }

    /// Emits the implicit return, allocates the finished function on the
    /// heap, and pops its `FunctionCompiler`. Must run `maybe_gc` *before*
    /// popping: the popped compiler's chunk is the last root that protects
    /// its own not-yet-installed string constants.
    fn end_function(&mut self) -> (Gc<ObjFunction>, Vec<UpvalueDescriptor>) {
        self.emit_return();
        self.maybe_gc();
        let fc = self.functions.pop().expect("function stack non-empty");
        (self.heap.alloc_function(fc.function), fc.upvalues)
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(Opcode::Print);
    }

    fn return_statement(&mut self) {
        if self.functions.last().unwrap().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.functions.last().unwrap().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(Opcode::Return);
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(Opcode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();

        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
    }

    /// Desugars to `{ init; while (cond) { body; inc; } }` by splicing the
    /// increment between the body and the next condition check via two
    /// patched jumps.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_op(Opcode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_op(Opcode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(Opcode::Pop);
        }

        self.end_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcConfig;

    fn compile_ok(source: &str) -> Gc<ObjFunction> {
        let mut heap = Heap::new(GcConfig::default());
        compile(source, &mut heap, |_| {})
            .unwrap_or_else(|diags| panic!("expected successful compile, got: {diags:?}"))
    }

    fn compile_err(source: &str) -> Vec<Diagnostic> {
        let mut heap = Heap::new(GcConfig::default());
        compile(source, &mut heap, |_| {}).expect_err("expected compile error")
    }

    #[test]
    fn compiles_trivial_expression_statement() {
        let function = compile_ok("1 + 2;");
        assert!(!function.chunk.code.is_empty());
    }

    #[test]
    fn rejects_reading_local_in_own_initializer() {
        let diags = compile_err("{ var a = a; }");
        assert!(diags[0].message.contains("own initializer"));
    }

    #[test]
    fn rejects_redeclaration_in_same_scope() {
        let diags = compile_err("{ var a = 1; var a = 2; }");
        assert!(diags[0].message.contains("Already a variable"));
    }

    #[test]
    fn rejects_return_at_top_level() {
        let diags = compile_err("return 1;");
        assert!(diags[0].message.contains("top-level"));
    }

    #[test]
    fn rejects_return_value_from_initializer() {
        let diags = compile_err("class A { init() { return 1; } }");
        assert!(diags[0].message.contains("initializer"));
    }

    #[test]
    fn rejects_this_outside_class() {
        let diags = compile_err("print this;");
        assert!(diags[0].message.contains("'this'"));
    }

    #[test]
    fn rejects_super_without_superclass() {
        let diags = compile_err("class A { m() { super.m(); } }");
        assert!(diags[0].message.contains("no superclass"));
    }

    #[test]
    fn rejects_self_inheritance() {
        let diags = compile_err("class A < A {}");
        assert!(diags[0].message.contains("inherit from itself"));
    }

    #[test]
    fn rejects_too_many_locals() {
        let mut src = String::from("{ ");
        for i in 0..257 {
            src.push_str(&format!("var v{i} = 0; "));
        }
        src.push('}');
        let diags = compile_err(&src);
        assert!(diags.iter().any(|d| d.message.contains("Too many local")));
    }

    #[test]
    fn collects_multiple_diagnostics_across_synchronization() {
        let diags = compile_err("var = ; var = ;");
        assert!(diags.len() >= 2);
    }
}
