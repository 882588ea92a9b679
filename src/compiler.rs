//! Single-pass Pratt compiler: tokens -> bytecode directly, no separate
//! parse tree (spec.md §1 Non-goals, §4.2).
//!
//! Grounded on `original_source/cLox/compiler/compiler.c` for the parsing
//! algorithm (the Pratt table, scope/local/upvalue resolution, class and
//! function compilation) and on the teacher's `compiler.rs` for how a Rust
//! port shapes the per-function compiler state (`CompilerState` with an
//! `enclosing` chain, a `Local`/`UpValue` array, `resolve_local`) — here
//! flattened from the teacher's `Rc<RefCell<_>>` chain into a plain `Vec`
//! of frames, since single ownership (no aliasing) is all a single-pass
//! compiler ever needs; the spec's Design Notes explicitly allow either a
//! function-pointer Pratt table or a match-based dispatch, and we take the
//! latter (also grounded in the teacher, whose own table is a plain array
//! of precedence tuples rather than function pointers).

use crate::chunk::OpCode;
use crate::error::CompileError;
use crate::gc::{Gc, Heap, RootSource};
use crate::object::{LoxFunction, ObjKind};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
// `function.upvalue_count` is a `u8`, so 256 upvalues would wrap to 0.
const MAX_UPVALUES: usize = 255;
const MAX_CONSTANTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Clone, Copy, PartialEq, PartialOrd)]
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
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

struct Local<'src> {
    name: Token<'src>,
    depth: i32,
    is_captured: bool,
}

struct UpvalueSlot {
    is_local: bool,
    index: u8,
}

struct Frame<'src> {
    function: LoxFunction,
    function_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueSlot>,
    scope_depth: u32,
}

impl<'src> Frame<'src> {
    fn new(function_type: FunctionType, name: Option<Gc>) -> Self {
        let slot0_name = match function_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            _ => "",
        };
        Self {
            function: LoxFunction::new(name),
            function_type,
            locals: vec![Local {
                name: Token::synthetic(slot0_name),
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

/// Roots for a frame that `end_function` has already popped off
/// `frames` but hasn't finished turning into a heap `Function` yet — see
/// `mark_roots` and `end_function`.
struct FinishingRoots {
    name: Option<Gc>,
    constants: Vec<Value>,
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    panic_mode: bool,
    errors: Vec<CompileError>,
    frames: Vec<Frame<'src>>,
    classes: Vec<ClassState>,
    finishing: Option<FinishingRoots>,
}

impl<'src> RootSource for Compiler<'src> {
    fn mark_roots(&self, heap: &mut Heap) {
        for frame in &self.frames {
            if let Some(name) = frame.function.name {
                heap.mark_object(name);
            }
            for constant in frame.function.chunk.constants() {
                heap.mark_value(*constant);
            }
        }
        // `end_function` has already popped its frame off `frames` by the
        // time its allocation can trigger a GC, so its constants (and any
        // string/function they reference) need a separate root here or
        // they look unreachable for the instant between the pop and the
        // new Function object existing.
        if let Some(finishing) = &self.finishing {
            if let Some(name) = finishing.name {
                heap.mark_object(name);
            }
            for constant in &finishing.constants {
                heap.mark_value(*constant);
            }
        }
    }
}

pub fn compile(source: &str, heap: &mut Heap) -> Result<Gc, Vec<CompileError>> {
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        current: Token::synthetic(""),
        previous: Token::synthetic(""),
        panic_mode: false,
        errors: Vec::new(),
        frames: vec![Frame::new(FunctionType::Script, None)],
        classes: Vec::new(),
        finishing: None,
    };

    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration(heap);
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");

    let (function, _upvalues) = compiler.end_function(heap);

    if compiler.errors.is_empty() {
        Ok(function)
    } else {
        Err(compiler.errors)
    }
}

impl<'src> Compiler<'src> {
    // ---- token stream -----------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
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

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let at = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(CompileError::new(token.line, at, message));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- frame plumbing ----------------------------------------------

    fn frame(&self) -> &Frame<'src> {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut Frame<'src> {
        self.frames.last_mut().unwrap()
    }

    fn current_line(&self) -> u32 {
        self.previous.line
    }

    // ---- bytecode emission --------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.current_line();
        self.frame_mut().function.chunk.write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, a: OpCode, b: u8) {
        self.emit_op(a);
        self.emit_byte(b);
    }

    fn emit_return(&mut self) {
        match self.frame().function_type {
            FunctionType::Initializer => self.emit_ops(OpCode::GetLocal, 0),
            _ => self.emit_op(OpCode::Nil),
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.frame_mut().function.chunk.add_constant(value);
        if idx >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_ops(OpCode::Constant, idx);
    }

    fn identifier_constant(&mut self, name: Token<'src>, heap: &mut Heap) -> u8 {
        let handle = heap.intern_str(name.lexeme, &*self);
        self.make_constant(Value::Obj(handle))
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.frame().function.chunk.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.frame().function.chunk.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.frame_mut().function.chunk.patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.frame().function.chunk.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // ---- scopes, locals, upvalues --------------------------------------

    fn begin_scope(&mut self) {
        self.frame_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.frame_mut().scope_depth -= 1;
        let depth = self.frame().scope_depth as i32;
        loop {
            let action = match self.frame().locals.last() {
                Some(local) if local.depth > depth => Some(local.is_captured),
                _ => None,
            };
            match action {
                Some(is_captured) => {
                    if is_captured {
                        self.emit_op(OpCode::CloseUpvalue);
                    } else {
                        self.emit_op(OpCode::Pop);
                    }
                    self.frame_mut().locals.pop();
                }
                None => break,
            }
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.frame_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self, name: Token<'src>) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let depth = self.frame().scope_depth as i32;
        let mut conflict = false;
        for local in self.frame().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if identifiers_equal(&local.name, &name) {
                conflict = true;
                break;
            }
        }
        if conflict {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let depth = self.frame().scope_depth as i32;
        if let Some(local) = self.frame_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, message: &str, heap: &mut Heap) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous;
        self.declare_variable(name);
        if self.frame().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name, heap)
    }

    fn define_variable(&mut self, global: u8) {
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_ops(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, frame_idx: usize, name: &Token<'src>) -> Option<u8> {
        let mut found: Option<(u8, bool)> = None;
        for (idx, local) in self.frames[frame_idx].locals.iter().enumerate().rev() {
            if identifiers_equal(&local.name, name) {
                found = Some((idx as u8, local.depth == -1));
                break;
            }
        }
        let (idx, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(idx)
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let existing = self.frames[frame_idx]
            .upvalues
            .iter()
            .position(|up| up.index == index && up.is_local == is_local);
        if let Some(i) = existing {
            return i as u8;
        }
        if self.frames[frame_idx].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let frame = &mut self.frames[frame_idx];
        frame.upvalues.push(UpvalueSlot { is_local, index });
        frame.function.upvalue_count = frame.upvalues.len() as u8;
        (frame.upvalues.len() - 1) as u8
    }

    /// Resolves `name` as an upvalue of `frame_idx`, recursing into
    /// enclosing frames. Fixes the bug spec.md §9 flags in the original:
    /// the captured flag is set on the local in the enclosing frame that
    /// *actually owns it* — i.e. only in the direct-local branch below,
    /// never on a stale index carried over from a different branch.
    fn resolve_upvalue(&mut self, frame_idx: usize, name: &Token<'src>) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        let enclosing = frame_idx - 1;

        if let Some(local_idx) = self.resolve_local(enclosing, name) {
            self.frames[enclosing].locals[local_idx as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, local_idx, true));
        }

        if let Some(up_idx) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame_idx, up_idx, false));
        }

        None
    }

    // ---- declarations ---------------------------------------------------

    fn declaration(&mut self, heap: &mut Heap) {
        if self.matches(TokenKind::Class) {
            self.class_declaration(heap);
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration(heap);
        } else if self.matches(TokenKind::Var) {
            self.var_declaration(heap);
        } else {
            self.statement(heap);
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_idx = self.identifier_constant(class_name, heap);
        self.declare_variable(class_name);

        self.emit_ops(OpCode::Class, name_idx);
        self.define_variable(name_idx);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous;
            self.variable(super_name, false, heap);

            if identifiers_equal(&super_name, &class_name) {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(class_name, false, heap);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false, heap);

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method(heap);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous;
        let name_idx = self.identifier_constant(name, heap);

        let function_type = if name.lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type, heap);
        self.emit_ops(OpCode::Method, name_idx);
    }

    fn fun_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("Expect function name.", heap);
        self.mark_initialized();
        self.function(FunctionType::Function, heap);
        self.define_variable(global);
    }

    /// Compiles a function's parameter list and body. The name token must
    /// already be sitting in `self.previous` (both `fun_declaration` and
    /// `method` consume it themselves, since each needs it for its own
    /// purposes — a global/local binding, or a method-table key — before
    /// the function body is compiled).
    fn function(&mut self, function_type: FunctionType, heap: &mut Heap) {
        let name_token = self.previous;
        let name_handle = heap.intern_str(name_token.lexeme, &*self);
        self.frames.push(Frame::new(function_type, Some(name_handle)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.frame_mut().function.arity += 1;
                if self.frame().function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let param_const = self.parse_variable("Expect parameter name.", heap);
                self.define_variable(param_const);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block(heap);

        let (function_gc, upvalues) = self.end_function(heap);
        let idx = self.make_constant(Value::Obj(function_gc));
        self.emit_ops(OpCode::Closure, idx);
        for up in &upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
    }

    fn var_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("Expect variable name.", heap);

        if self.matches(TokenKind::Equal) {
            self.expression(heap);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    // ---- statements -----------------------------------------------------

    fn statement(&mut self, heap: &mut Heap) {
        if self.matches(TokenKind::Print) {
            self.print_statement(heap);
        } else if self.matches(TokenKind::If) {
            self.if_statement(heap);
        } else if self.matches(TokenKind::Return) {
            self.return_statement(heap);
        } else if self.matches(TokenKind::While) {
            self.while_statement(heap);
        } else if self.matches(TokenKind::For) {
            self.for_statement(heap);
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block(heap);
            self.end_scope();
        } else {
            self.expression_statement(heap);
        }
    }

    fn block(&mut self, heap: &mut Heap) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration(heap);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement(heap);

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement(heap);
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self, heap: &mut Heap) {
        let loop_start = self.frame().function.chunk.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement(heap);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self, heap: &mut Heap) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration(heap);
        } else {
            self.expression_statement(heap);
        }

        let mut loop_start = self.frame().function.chunk.len();
        let mut exit_jump: Option<usize> = None;

        if !self.matches(TokenKind::Semicolon) {
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.frame().function.chunk.len();
            self.expression(heap);
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement(heap);
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self, heap: &mut Heap) {
        if self.frame().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.frame().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // ---- expressions ------------------------------------------------------

    fn expression(&mut self, heap: &mut Heap) {
        self.parse_precedence(Precedence::Assignment, heap);
    }

    fn parse_precedence(&mut self, precedence: Precedence, heap: &mut Heap) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign, heap) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign, heap);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool, heap: &mut Heap) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(heap),
            TokenKind::Minus | TokenKind::Bang => self.unary(kind, heap),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(heap),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::Identifier => {
                let name = self.previous;
                self.named_variable(name, can_assign, heap);
            }
            TokenKind::This => self.this_expr(heap),
            TokenKind::Super => self.super_expr(heap),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool, heap: &mut Heap) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(kind, heap),
            TokenKind::And => self.and_expr(heap),
            TokenKind::Or => self.or_expr(heap),
            TokenKind::LeftParen => self.call(heap),
            TokenKind::Dot => self.dot(can_assign, heap),
            _ => unreachable!("not an infix operator: {kind:?}"),
        }
    }

    fn grouping(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner guarantees a valid number literal");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, heap: &mut Heap) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let handle = heap.intern_str(text, &*self);
        self.emit_constant(Value::Obj(handle));
    }

    fn unary(&mut self, operator: TokenKind, heap: &mut Heap) {
        self.parse_precedence(Precedence::Unary, heap);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, operator: TokenKind, heap: &mut Heap) {
        let next_prec = infix_precedence(operator).next();
        self.parse_precedence(next_prec, heap);
        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn and_expr(&mut self, heap: &mut Heap) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And, heap);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self, heap: &mut Heap) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or, heap);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, heap: &mut Heap) {
        let argc = self.argument_list(heap);
        self.emit_ops(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous;
        let name_idx = self.identifier_constant(name, heap);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression(heap);
            self.emit_ops(OpCode::SetProperty, name_idx);
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list(heap);
            self.emit_ops(OpCode::Invoke, name_idx);
            self.emit_byte(argc);
        } else {
            self.emit_ops(OpCode::GetProperty, name_idx);
        }
    }

    fn argument_list(&mut self, heap: &mut Heap) -> u8 {
        let mut argc: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression(heap);
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

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool, heap: &mut Heap) {
        let frame_idx = self.frames.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(frame_idx, &name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, &name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let idx = self.identifier_constant(name, heap);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression(heap);
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }

    fn variable(&mut self, name: Token<'src>, can_assign: bool, heap: &mut Heap) {
        self.named_variable(name, can_assign, heap);
    }

    fn this_expr(&mut self, heap: &mut Heap) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable(Token::synthetic("this"), false, heap);
    }

    fn super_expr(&mut self, heap: &mut Heap) {
        let has_superclass = self.classes.last().map(|class| class.has_superclass);
        match has_superclass {
            None => {
                self.error("Can't use 'super' outside of a class.");
            }
            Some(false) => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(true) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method_name = self.previous;
        let name_idx = self.identifier_constant(method_name, heap);

        self.named_variable(Token::synthetic("this"), false, heap);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list(heap);
            self.named_variable(Token::synthetic("super"), false, heap);
            self.emit_ops(OpCode::SuperInvoke, name_idx);
            self.emit_byte(argc);
        } else {
            self.named_variable(Token::synthetic("super"), false, heap);
            self.emit_ops(OpCode::GetSuper, name_idx);
        }
    }

    // ---- function bodies --------------------------------------------------

    fn end_function(&mut self, heap: &mut Heap) -> (Gc, Vec<UpvalueSlot>) {
        self.emit_return();
        let frame = self.frames.pop().unwrap();
        self.finishing = Some(FinishingRoots {
            name: frame.function.name,
            constants: frame.function.chunk.constants().to_vec(),
        });
        let handle = heap.alloc(ObjKind::Function(frame.function), &*self);
        self.finishing = None;
        (handle, frame.upvalues)
    }
}

fn identifiers_equal(a: &Token, b: &Token) -> bool {
    a.lexeme == b.lexeme
}

fn infix_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        Or => Precedence::Or,
        And => Precedence::And,
        EqualEqual | BangEqual => Precedence::Equality,
        Less | LessEqual | Greater | GreaterEqual => Precedence::Comparison,
        Plus | Minus => Precedence::Term,
        Star | Slash => Precedence::Factor,
        LeftParen | Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{SharedBuffer, Vm};

    fn run(source: &str) -> String {
        let output = SharedBuffer::new();
        let mut vm = Vm::with_output(Box::new(output.clone()));
        vm.interpret(source).expect("program should run without error");
        output.contents()
    }

    /// Regression test for the `resolveUpvalue` bug spec.md §9 flags: a
    /// grandchild function capturing a local two frames up must mark the
    /// *actual* owning local as captured, not a stale index from the
    /// recursive branch. If the capture flag lands on the wrong local (or
    /// no local at all), `OP_CLOSE_UPVALUE` never fires for it and the two
    /// sibling closures below end up with independent copies instead of a
    /// shared upvalue.
    #[test]
    fn nested_function_resolves_upvalue_through_two_frames() {
        let source = r#"
            fun level0() {
                var x = "owned-by-level0";
                fun level1() {
                    fun level2() {
                        return x;
                    }
                    return level2();
                }
                return level1();
            }
            print level0();
        "#;
        assert_eq!(run(source).trim_end(), "owned-by-level0");
    }

    #[test]
    fn sibling_closures_share_a_single_upvalue() {
        let source = r#"
            fun outer() {
                var x = "a";
                fun get() { return x; }
                fun set(v) { x = v; }
                set("b");
                print get();
            }
            outer();
        "#;
        assert_eq!(run(source).trim_end(), "b");
    }

    #[test]
    fn class_cannot_inherit_from_itself() {
        let mut heap = crate::gc::Heap::new();
        let errors = compile("class A < A {}", &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("can't inherit from itself")));
    }
}
