//! x86-64 emitter: walks the IR and produces GNU-syntax assembly
//! (`.intel_syntax noprefix`) that `gcc` assembles and links against libc.
//!
//! Evaluation is stack-disciplined: every IR value lives on the machine
//! stack, materialized through `rax`. The emitter mirrors the run-time
//! stack in a bookkeeping array of semantic tags so string-typed `add` and
//! comparisons can route through helper code. `rbx` holds the saved stack
//! pointer around 16-byte-aligned libc calls and is itself preserved in a
//! hidden frame slot.

use std::collections::{HashMap, HashSet};

use crate::diagnostic::Diagnostic;
use crate::ir::{Function, Inst, Module, PrintKind};
use crate::span::Span;
use crate::types::Ty;

use super::Platform;

/// Semantic tag of a tracked stack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tag {
    Int,
    Float,
    Str,
}

impl Tag {
    fn from_ty(ty: Ty) -> Tag {
        match ty {
            Ty::Str => Tag::Str,
            Ty::Float => Tag::Float,
            _ => Tag::Int,
        }
    }
}

pub struct X86Emitter {
    platform: Platform,
    out: Vec<String>,
    diagnostics: Vec<Diagnostic>,

    /// Bookkeeping mirror of the run-time evaluation stack.
    stack: Vec<Tag>,
    /// Expected stack state at each forward label, recorded at the jump.
    label_stacks: HashMap<String, Vec<Tag>>,
    /// Tags of frame slots in the current function.
    slot_tags: HashMap<i32, Tag>,
    /// Return tags of user functions.
    fn_return_tags: HashMap<String, Tag>,
    /// Names of functions defined in the module.
    fn_names: HashSet<String>,
    /// Concat helpers referenced by the emitted code.
    helpers: HashSet<&'static str>,
    /// Offset of the hidden rbx spill slot in the current frame.
    rbx_slot: i32,
}

impl X86Emitter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            out: Vec::new(),
            diagnostics: Vec::new(),
            stack: Vec::new(),
            label_stacks: HashMap::new(),
            slot_tags: HashMap::new(),
            fn_return_tags: HashMap::new(),
            fn_names: HashSet::new(),
            helpers: HashSet::new(),
            rbx_slot: 0,
        }
    }

    pub fn emit_module(mut self, module: &Module) -> Result<String, Vec<Diagnostic>> {
        for function in &module.functions {
            self.fn_names.insert(function.name.clone());
            self.fn_return_tags
                .insert(function.name.clone(), Tag::from_ty(function.return_ty));
        }

        self.line(".intel_syntax noprefix");
        self.emit_rodata_pool(module);

        self.line("");
        self.line(".text");
        for function in &module.functions {
            self.emit_function(function);
        }

        self.emit_helpers();
        self.emit_helper_formats();

        if self.diagnostics.is_empty() {
            Ok(self.out.join("\n") + "\n")
        } else {
            Err(self.diagnostics)
        }
    }

    fn emit_rodata_pool(&mut self, module: &Module) {
        self.line("");
        let section = self.platform.rodata_section();
        self.line(section);
        self.line("fmt_int:");
        self.line("    .asciz \"%ld\\n\"");
        self.line("fmt_str:");
        self.line("    .asciz \"%s\\n\"");
        for (idx, body) in module.strings.iter().enumerate() {
            self.line(&format!(".LC{}:", idx));
            let escaped = escape_asciz(body);
            self.line(&format!("    .asciz \"{}\"", escaped));
        }
    }

    fn emit_function(&mut self, function: &Function) {
        self.stack.clear();
        self.label_stacks.clear();
        self.slot_tags.clear();

        // Hidden slot beyond the locals preserves rbx across the function.
        let frame_slots = function.locals + 1;
        self.rbx_slot = -8 * frame_slots as i32;

        let symbol = self.platform.symbol(&function.name);
        self.line("");
        if function.name == "main" {
            self.line(&format!(".globl {}", symbol));
            if self.platform.uses_type_directive() {
                self.line(&format!(".type {}, @function", symbol));
            }
        }
        self.line(&format!("{}:", symbol));
        self.line("    push rbp");
        self.line("    mov rbp, rsp");
        self.line(&format!("    sub rsp, {}", 8 * frame_slots));
        self.line(&format!("    mov [rbp{}], rbx", self.rbx_slot));

        // Copy stack-passed arguments into the first local slots. The
        // caller pushed in evaluation order, so the last argument sits just
        // above the return address.
        let argc = function.params.len();
        for (i, (_name, ty)) in function.params.iter().enumerate() {
            let src = 16 + 8 * (argc - 1 - i) as i32;
            let dst = -8 * (i as i32 + 1);
            self.line(&format!("    mov rax, [rbp+{}]", src));
            self.line(&format!("    mov [rbp{}], rax", dst));
            self.slot_tags.insert(dst, Tag::from_ty(*ty));
        }

        for inst in &function.insts {
            self.emit_inst(inst);
        }
    }

    fn emit_inst(&mut self, inst: &Inst) {
        match inst {
            Inst::ConstInt(v) => {
                if i32::try_from(*v).is_ok() {
                    self.line(&format!("    mov rax, {}", v));
                } else {
                    self.line(&format!("    movabs rax, {}", v));
                }
                self.push(Tag::Int);
            }
            Inst::ConstFloat(v) => {
                let bits = v.to_bits();
                self.line(&format!("    movabs rax, {}", bits as i64));
                self.push(Tag::Float);
            }
            Inst::ConstStr(label) => {
                self.line(&format!("    lea rax, [rip+{}]", label));
                self.push(Tag::Str);
            }
            Inst::Load(off) => {
                self.line(&format!("    mov rax, [rbp{}]", off));
                let tag = self.slot_tags.get(off).copied().unwrap_or(Tag::Int);
                self.push(tag);
            }
            Inst::Store(off) => {
                self.line("    pop rax");
                self.line(&format!("    mov [rbp{}], rax", off));
                let tag = self.pop();
                self.slot_tags.insert(*off, tag);
            }
            Inst::Push => {
                self.line("    mov rax, [rsp]");
                self.line("    push rax");
                let tag = self.stack.last().copied().unwrap_or(Tag::Int);
                self.stack.push(tag);
            }
            Inst::Pop => {
                self.line("    add rsp, 8");
                self.pop();
            }
            Inst::Add => self.emit_add(),
            Inst::Sub => self.emit_int_binop("sub rax, rcx"),
            Inst::Mul => self.emit_int_binop("imul rax, rcx"),
            Inst::Div => {
                self.line("    pop rcx");
                self.line("    pop rax");
                self.line("    cqo");
                self.line("    idiv rcx");
                self.line("    push rax");
                self.pop2_push(Tag::Int);
            }
            Inst::Mod => {
                self.line("    pop rcx");
                self.line("    pop rax");
                self.line("    cqo");
                self.line("    idiv rcx");
                self.line("    push rdx");
                self.pop2_push(Tag::Int);
            }
            Inst::Eq => self.emit_compare("sete"),
            Inst::Ne => self.emit_compare("setne"),
            Inst::Lt => self.emit_compare("setl"),
            Inst::Le => self.emit_compare("setle"),
            Inst::Gt => self.emit_compare("setg"),
            Inst::Ge => self.emit_compare("setge"),
            Inst::And => self.emit_int_binop("and rax, rcx"),
            Inst::Or => self.emit_int_binop("or rax, rcx"),
            Inst::Not => {
                self.line("    pop rax");
                self.line("    xor rax, 1");
                self.line("    push rax");
                self.pop();
                self.stack.push(Tag::Int);
            }
            Inst::Jump(label) => {
                self.line(&format!("    jmp {}", label));
                let snapshot = self.stack.clone();
                self.label_stacks.entry(label.clone()).or_insert(snapshot);
            }
            Inst::JumpIfNot(label) => {
                self.line("    pop rax");
                self.line("    test rax, rax");
                self.pop();
                self.line(&format!("    jz {}", label));
                let snapshot = self.stack.clone();
                self.label_stacks.entry(label.clone()).or_insert(snapshot);
            }
            Inst::Label(label) => {
                self.line(&format!("{}:", label));
                // Fall-through state can disagree after an unconditional
                // jump (ternary arms); the state recorded at the branch is
                // the true one.
                if let Some(snapshot) = self.label_stacks.remove(label) {
                    self.stack = snapshot;
                }
            }
            Inst::Call { name, argc } => {
                if !self.fn_names.contains(name) {
                    self.diagnostics.push(Diagnostic::error(
                        format!("internal error: call to unknown function '{}'", name),
                        Span::dummy(),
                    ));
                    return;
                }
                let symbol = self.platform.symbol(name);
                self.line(&format!("    call {}", symbol));
                if *argc > 0 {
                    self.line(&format!("    add rsp, {}", 8 * argc));
                }
                for _ in 0..*argc {
                    self.pop();
                }
                let tag = self.fn_return_tags.get(name).copied().unwrap_or(Tag::Int);
                self.push(tag);
            }
            Inst::Return => {
                self.line("    pop rax");
                self.pop();
                self.line(&format!("    mov rbx, [rbp{}]", self.rbx_slot));
                self.line("    mov rsp, rbp");
                self.line("    pop rbp");
                self.line("    ret");
            }
            Inst::Print(kind) => {
                self.line("    pop rsi");
                self.pop();
                let fmt = match kind {
                    PrintKind::Int => "fmt_int",
                    PrintKind::Str => "fmt_str",
                };
                self.line(&format!("    lea rdi, [rip+{}]", fmt));
                self.line("    xor eax, eax");
                self.aligned_call("printf");
            }
            Inst::Comment(text) => {
                self.line(&format!("    # {}", text));
            }
        }
    }

    /// `add` dispatches on the tracked tags: integers use the ALU, anything
    /// string-typed concatenates through a runtime helper.
    fn emit_add(&mut self) {
        let rhs = self.peek(0);
        let lhs = self.peek(1);
        match (lhs, rhs) {
            (Tag::Str, Tag::Str) => {
                self.line("    pop rsi");
                self.line("    pop rdi");
                self.aligned_call("__sb_concat_ss");
                self.helpers.insert("ss");
                self.line("    push rax");
                self.pop2_push(Tag::Str);
            }
            (Tag::Str, _) => {
                self.line("    pop rsi");
                self.line("    pop rdi");
                self.aligned_call("__sb_concat_si");
                self.helpers.insert("si");
                self.line("    push rax");
                self.pop2_push(Tag::Str);
            }
            (_, Tag::Str) => {
                self.line("    pop rsi");
                self.line("    pop rdi");
                self.aligned_call("__sb_concat_is");
                self.helpers.insert("is");
                self.line("    push rax");
                self.pop2_push(Tag::Str);
            }
            _ => self.emit_int_binop("add rax, rcx"),
        }
    }

    fn emit_int_binop(&mut self, op: &str) {
        self.line("    pop rcx");
        self.line("    pop rax");
        self.line(&format!("    {}", op));
        self.line("    push rax");
        self.pop2_push(Tag::Int);
    }

    fn emit_compare(&mut self, setcc: &str) {
        let rhs = self.peek(0);
        let lhs = self.peek(1);
        if lhs == Tag::Str && rhs == Tag::Str {
            self.line("    pop rsi");
            self.line("    pop rdi");
            self.aligned_call("strcmp");
            self.line("    cmp eax, 0");
        } else {
            self.line("    pop rcx");
            self.line("    pop rax");
            self.line("    cmp rax, rcx");
        }
        self.line(&format!("    {} al", setcc));
        self.line("    movzx rax, al");
        self.line("    push rax");
        self.pop2_push(Tag::Int);
    }

    /// Call into libc with a 16-byte-aligned stack. `rbx` carries the saved
    /// stack pointer; the prologue spilled the caller's rbx to the frame.
    fn aligned_call(&mut self, callee: &str) {
        let symbol = self.platform.symbol(callee);
        self.line("    mov rbx, rsp");
        self.line("    and rsp, -16");
        self.line(&format!("    call {}", symbol));
        self.line("    mov rsp, rbx");
    }

    // --- Helper routines, emitted once per module when referenced ---

    fn emit_helpers(&mut self) {
        if self.helpers.contains("ss") {
            self.line("");
            self.line(&format!("{}:", self.platform.symbol("__sb_concat_ss")));
            self.helper_prologue();
            self.line("    mov rbx, rdi");
            self.line("    mov r12, rsi");
            self.call_libc("strlen");
            self.line("    mov r13, rax");
            self.line("    mov rdi, r12");
            self.call_libc("strlen");
            self.line("    lea rdi, [r13+rax+2]");
            self.call_libc("malloc");
            self.line("    mov r13, rax");
            self.line("    mov rdi, r13");
            self.line("    lea rsi, [rip+fmt_cat_ss]");
            self.line("    mov rdx, rbx");
            self.line("    mov rcx, r12");
            self.line("    xor eax, eax");
            self.call_libc("sprintf");
            self.line("    mov rax, r13");
            self.helper_epilogue();
        }
        if self.helpers.contains("si") {
            self.line("");
            self.line(&format!("{}:", self.platform.symbol("__sb_concat_si")));
            self.helper_prologue();
            self.line("    mov rbx, rdi");
            self.line("    mov r12, rsi");
            self.call_libc("strlen");
            self.line("    lea rdi, [rax+32]");
            self.call_libc("malloc");
            self.line("    mov r13, rax");
            self.line("    mov rdi, r13");
            self.line("    lea rsi, [rip+fmt_cat_si]");
            self.line("    mov rdx, rbx");
            self.line("    mov rcx, r12");
            self.line("    xor eax, eax");
            self.call_libc("sprintf");
            self.line("    mov rax, r13");
            self.helper_epilogue();
        }
        if self.helpers.contains("is") {
            self.line("");
            self.line(&format!("{}:", self.platform.symbol("__sb_concat_is")));
            self.helper_prologue();
            self.line("    mov rbx, rdi");
            self.line("    mov r12, rsi");
            self.line("    mov rdi, r12");
            self.call_libc("strlen");
            self.line("    lea rdi, [rax+32]");
            self.call_libc("malloc");
            self.line("    mov r13, rax");
            self.line("    mov rdi, r13");
            self.line("    lea rsi, [rip+fmt_cat_is]");
            self.line("    mov rdx, rbx");
            self.line("    mov rcx, r12");
            self.line("    xor eax, eax");
            self.call_libc("sprintf");
            self.line("    mov rax, r13");
            self.helper_epilogue();
        }
    }

    fn helper_prologue(&mut self) {
        self.line("    push rbp");
        self.line("    mov rbp, rsp");
        self.line("    push rbx");
        self.line("    push r12");
        self.line("    push r13");
        self.line("    sub rsp, 8");
    }

    fn helper_epilogue(&mut self) {
        self.line("    add rsp, 8");
        self.line("    pop r13");
        self.line("    pop r12");
        self.line("    pop rbx");
        self.line("    pop rbp");
        self.line("    ret");
    }

    fn call_libc(&mut self, name: &str) {
        let symbol = self.platform.symbol(name);
        self.line(&format!("    call {}", symbol));
    }

    fn emit_helper_formats(&mut self) {
        if self.helpers.is_empty() {
            return;
        }
        self.line("");
        let section = self.platform.rodata_section();
        self.line(section);
        if self.helpers.contains("ss") {
            self.line("fmt_cat_ss:");
            self.line("    .asciz \"%s%s\"");
        }
        if self.helpers.contains("si") {
            self.line("fmt_cat_si:");
            self.line("    .asciz \"%s%ld\"");
        }
        if self.helpers.contains("is") {
            self.line("fmt_cat_is:");
            self.line("    .asciz \"%ld%s\"");
        }
    }

    // --- Bookkeeping ---

    fn line(&mut self, text: &str) {
        self.out.push(text.to_string());
    }

    fn push(&mut self, tag: Tag) {
        self.line("    push rax");
        self.stack.push(tag);
    }

    /// Unreachable instruction sequences after `return` may pop an empty
    /// tracked stack; default to Int rather than fault.
    fn pop(&mut self) -> Tag {
        self.stack.pop().unwrap_or(Tag::Int)
    }

    fn pop2_push(&mut self, result: Tag) {
        self.pop();
        self.pop();
        self.stack.push(result);
    }

    fn peek(&self, depth: usize) -> Tag {
        if self.stack.len() > depth {
            self.stack[self.stack.len() - 1 - depth]
        } else {
            Tag::Int
        }
    }
}

/// Escape a pool body for a `.asciz` directive.
fn escape_asciz(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    for byte in body.bytes() {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(byte as char),
            other => out.push_str(&format!("\\{:03o}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_program;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::typeck::TypeChecker;

    fn emit(source: &str, platform: Platform) -> String {
        let (tokens, lex_diags) = Lexer::new(source).tokenize();
        assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
        let (program, parse_diags) = Parser::new(tokens).parse_program();
        assert!(parse_diags.is_empty(), "parse errors: {:?}", parse_diags);
        TypeChecker::new()
            .check_program(&program)
            .expect("type errors");
        let module = lower_program(&program).expect("lowering errors");
        X86Emitter::new(platform)
            .emit_module(&module)
            .expect("emit errors")
    }

    #[test]
    fn test_module_skeleton() {
        let asm = emit("print(1)", Platform::Linux);
        assert!(asm.starts_with(".intel_syntax noprefix"));
        assert!(asm.contains(".section .rodata"));
        assert!(asm.contains("fmt_int:"));
        assert!(asm.contains(".asciz \"%ld\\n\""));
        assert!(asm.contains("fmt_str:"));
        assert!(asm.contains(".asciz \"%s\\n\""));
        assert!(asm.contains(".globl main"));
        assert!(asm.contains(".type main, @function"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("call printf"));
    }

    #[test]
    fn test_prologue_and_epilogue() {
        let asm = emit("var x = 1\nprint(x)", Platform::Linux);
        assert!(asm.contains("push rbp"));
        assert!(asm.contains("mov rbp, rsp"));
        // one local plus the hidden rbx slot
        assert!(asm.contains("sub rsp, 16"));
        assert!(asm.contains("mov rsp, rbp"));
        assert!(asm.contains("pop rbp"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn test_macos_symbols() {
        let asm = emit("print(1)", Platform::MacOs);
        assert!(asm.contains(".globl _main"));
        assert!(asm.contains("_main:"));
        assert!(asm.contains("call _printf"));
        assert!(!asm.contains(".type"));
        assert!(asm.contains("__TEXT,__cstring"));
    }

    #[test]
    fn test_windows_sections() {
        let asm = emit("print(1)", Platform::Windows);
        assert!(asm.contains(".section .rdata"));
        assert!(asm.contains(".globl main"));
        assert!(!asm.contains(".type"));
    }

    #[test]
    fn test_string_pool_entries() {
        let asm = emit("print(\"hello\")\nprint(\"hello\")", Platform::Linux);
        assert!(asm.contains(".LC0:"));
        assert!(asm.contains(".asciz \"hello\""));
        // deduplicated: exactly one pool entry
        assert!(!asm.contains(".LC1:"));
    }

    #[test]
    fn test_string_escaping() {
        let asm = emit("print(\"a\\\"b\\n\")", Platform::Linux);
        assert!(asm.contains(".asciz \"a\\\"b\\n\""));
    }

    #[test]
    fn test_concat_helper_emitted_once_when_used() {
        let asm = emit("var s = \"n=\" + 42\nprint(s)", Platform::Linux);
        assert!(asm.contains("call __sb_concat_si"));
        assert_eq!(asm.matches("__sb_concat_si:").count(), 1);
        assert!(asm.contains("fmt_cat_si:"));
        assert!(asm.contains(".asciz \"%s%ld\""));
        assert!(asm.contains("call sprintf"));
        assert!(asm.contains("call malloc"));
    }

    #[test]
    fn test_no_helpers_without_string_concat() {
        let asm = emit("var x = 1 + 2\nprint(x)", Platform::Linux);
        assert!(!asm.contains("__sb_concat"));
        assert!(!asm.contains("fmt_cat"));
    }

    #[test]
    fn test_string_comparison_uses_strcmp() {
        let asm = emit(
            "var a = \"x\"\nvar b = \"y\"\nif a == b { print(1) }",
            Platform::Linux,
        );
        assert!(asm.contains("call strcmp"));
        assert!(asm.contains("sete al"));
    }

    #[test]
    fn test_integer_division_and_modulo() {
        let asm = emit("var a = 7\nvar b = a / 2\nvar c = a % 2", Platform::Linux);
        assert!(asm.contains("cqo"));
        assert!(asm.contains("idiv rcx"));
        assert!(asm.contains("push rdx"));
    }

    #[test]
    fn test_call_cleans_up_stack_arguments() {
        let asm = emit(
            "function add(a: int, b: int): int {\n    return a + b\n}\nprint(add(1, 2))",
            Platform::Linux,
        );
        assert!(asm.contains("call add"));
        assert!(asm.contains("add rsp, 16"));
        // parameter copy from above the return address
        assert!(asm.contains("mov rax, [rbp+16]"));
        assert!(asm.contains("mov rax, [rbp+24]"));
    }

    #[test]
    fn test_conditional_jumps() {
        let asm = emit("if 1 < 2 { print(1) } else { print(2) }", Platform::Linux);
        assert!(asm.contains("jz L_ELSE_0"));
        assert!(asm.contains("jmp L_END_IF_0"));
        assert!(asm.contains("L_ELSE_0:"));
        assert!(asm.contains("L_END_IF_0:"));
        assert!(asm.contains("setl al"));
    }

    #[test]
    fn test_aligned_libc_calls() {
        let asm = emit("print(1)", Platform::Linux);
        assert!(asm.contains("and rsp, -16"));
        assert!(asm.contains("mov rbx, rsp"));
    }

    #[test]
    fn test_fibonacci_end_to_end_shape() {
        let asm = emit(
            "function f(n: int): int {\n    if n < 2 {\n        return n\n    }\n    return f(n - 1) + f(n - 2)\n}\nprint(f(10))",
            Platform::Linux,
        );
        assert_eq!(asm.matches("call f").count(), 3); // two recursive + one from main
        assert!(asm.contains("f:"));
    }

    #[test]
    fn test_large_integer_uses_movabs() {
        let asm = emit("var x = 5000000000\nprint(x)", Platform::Linux);
        assert!(asm.contains("movabs rax, 5000000000"));
    }
}
