use crate::diagnostic::Diagnostic;
use crate::emit::{Segment, VmWriter};
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};
use crate::symtab::{SymbolEntry, SymbolTable, VarKind};

/// What an identifier in receiver position denotes.
///
/// A name that resolves in the symbol table is an instance; anything else is
/// taken to be a class name (the runtime resolves the call target by name).
enum Resolved {
    Variable(SymbolEntry),
    ClassName,
}

/// The result of compiling one class: the VM program text and the final
/// symbol tables (the subroutine table reflects the last subroutine).
#[derive(Debug)]
pub struct CompiledClass {
    pub vm: String,
    pub symbols: SymbolTable,
}

/// The single-pass compilation engine.
///
/// A recursive-descent parser over a token cursor that validates the grammar,
/// maintains the symbol table, and emits VM instructions as it goes; there
/// is no AST. Each production consumes exactly its tokens and leaves the
/// cursor on the first token of the follower. The first violation aborts the
/// unit with a `Diagnostic`.
pub struct CompilationEngine {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    class_name: String,
    symbols: SymbolTable,
    vm: VmWriter,
    label_seq: u32,
}

impl CompilationEngine {
    /// `basename` is the source file's stem; the declared class name must
    /// match it. `tokens` is a lexer-produced stream ending in `Eof`.
    pub fn new(basename: &str, tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            class_name: basename.to_string(),
            symbols: SymbolTable::new(),
            vm: VmWriter::new(),
            label_seq: 0,
        }
    }

    /// Class = 'class' ClassName '{' ClassVarDec* SubroutineDec* '}'
    pub fn compile_class(mut self) -> Result<CompiledClass, Diagnostic> {
        self.expect(&Lexeme::Class)?;
        let name = self.expect_ident()?;
        if name.node != self.class_name {
            return Err(Diagnostic::error(
                format!(
                    "class '{}' does not match the file basename '{}'",
                    name.node, self.class_name
                ),
                name.span,
            )
            .with_help(format!(
                "rename the class to '{}' or the file to '{}.jack'",
                self.class_name, name.node
            )));
        }
        self.expect(&Lexeme::LBrace)?;

        while matches!(self.peek(), Lexeme::Static | Lexeme::Field) {
            self.compile_class_var_dec()?;
        }
        while matches!(
            self.peek(),
            Lexeme::Constructor | Lexeme::Function | Lexeme::Method
        ) {
            self.compile_subroutine()?;
        }

        self.expect(&Lexeme::RBrace)?;
        if !self.at(&Lexeme::Eof) {
            return Err(Diagnostic::error(
                format!("unexpected {} after the class body", self.peek().description()),
                self.current_span(),
            )
            .with_note("each source file holds exactly one class".to_string()));
        }

        Ok(CompiledClass {
            vm: self.vm.finish(),
            symbols: self.symbols,
        })
    }

    /// ClassVarDec = ('static' | 'field') Type VarName (',' VarName)* ';'
    fn compile_class_var_dec(&mut self) -> Result<(), Diagnostic> {
        let kind = if self.eat(&Lexeme::Static) {
            VarKind::Static
        } else {
            self.expect(&Lexeme::Field)?;
            VarKind::Field
        };
        let ty = self.parse_type()?;
        loop {
            let name = self.expect_ident()?;
            self.define(&name, &ty, kind)?;
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::Semicolon)?;
        Ok(())
    }

    /// SubroutineDec = ('constructor' | 'function' | 'method')
    ///                 ('void' | Type) Name '(' ParamList ')' Body
    ///
    /// The `function` directive declares the subroutine's local count, so it
    /// is emitted only after all `var` declarations are in the symbol table.
    fn compile_subroutine(&mut self) -> Result<(), Diagnostic> {
        let kind = self.advance().node.clone();
        self.symbols.start_subroutine();

        if kind == Lexeme::Method {
            // the implicit receiver occupies argument 0
            let receiver_ty = self.class_name.clone();
            let _ = self.symbols.define("this", &receiver_ty, VarKind::Arg);
        }

        // Return type is validated but not recorded: identifier resolution is
        // the only semantic analysis this compiler performs.
        if !self.eat(&Lexeme::Void) {
            self.parse_type()?;
        }
        let name = self.expect_ident()?;

        self.expect(&Lexeme::LParen)?;
        self.compile_parameter_list()?;
        self.expect(&Lexeme::RParen)?;

        self.expect(&Lexeme::LBrace)?;
        while self.at(&Lexeme::Var) {
            self.compile_var_dec()?;
        }

        let function_name = format!("{}.{}", self.class_name, name.node);
        self.vm
            .function(&function_name, self.symbols.var_count(VarKind::Var));

        match kind {
            Lexeme::Constructor => {
                // allocate one word per field and anchor `this` to the object
                self.vm
                    .push(Segment::Constant, self.symbols.var_count(VarKind::Field));
                self.vm.call("Memory.alloc", 1);
                self.vm.pop(Segment::Pointer, 0);
            }
            Lexeme::Method => {
                // anchor `this` to the receiver
                self.vm.push(Segment::Argument, 0);
                self.vm.pop(Segment::Pointer, 0);
            }
            _ => {}
        }

        self.compile_statements()?;
        self.expect(&Lexeme::RBrace)?;
        Ok(())
    }

    /// ParamList = (Type VarName (',' Type VarName)*)?
    fn compile_parameter_list(&mut self) -> Result<(), Diagnostic> {
        if self.at(&Lexeme::RParen) {
            return Ok(());
        }
        loop {
            let ty = self.parse_type()?;
            let name = self.expect_ident()?;
            self.define(&name, &ty, VarKind::Arg)?;
            if !self.eat(&Lexeme::Comma) {
                return Ok(());
            }
        }
    }

    /// VarDec = 'var' Type VarName (',' VarName)* ';'
    fn compile_var_dec(&mut self) -> Result<(), Diagnostic> {
        self.expect(&Lexeme::Var)?;
        let ty = self.parse_type()?;
        loop {
            let name = self.expect_ident()?;
            self.define(&name, &ty, VarKind::Var)?;
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::Semicolon)?;
        Ok(())
    }

    /// Type = 'int' | 'char' | 'boolean' | ClassName
    fn parse_type(&mut self) -> Result<String, Diagnostic> {
        let ty = match self.peek() {
            Lexeme::IntTy => "int".to_string(),
            Lexeme::CharTy => "char".to_string(),
            Lexeme::BooleanTy => "boolean".to_string(),
            Lexeme::Ident(name) => name.clone(),
            other => {
                return Err(Diagnostic::error(
                    format!("expected a type, found {}", other.description()),
                    self.current_span(),
                ))
            }
        };
        self.advance();
        Ok(ty)
    }

    fn compile_statements(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Lexeme::Let => self.compile_let()?,
                Lexeme::If => self.compile_if()?,
                Lexeme::While => self.compile_while()?,
                Lexeme::Do => self.compile_do()?,
                Lexeme::Return => self.compile_return()?,
                _ => return Ok(()),
            }
        }
    }

    /// Let = 'let' VarName ('[' Expression ']')? '=' Expression ';'
    fn compile_let(&mut self) -> Result<(), Diagnostic> {
        self.expect(&Lexeme::Let)?;
        let name = self.expect_ident()?;
        let target = self.resolve_variable(&name)?;

        if self.eat(&Lexeme::LBracket) {
            // compute the cell address (base + index), then the value
            self.vm.push(target.kind.segment(), target.index);
            self.compile_expression()?;
            self.expect(&Lexeme::RBracket)?;
            self.vm.binary('+');

            self.expect(&Lexeme::Eq)?;
            self.compile_expression()?;
            self.expect(&Lexeme::Semicolon)?;

            // the value expression may itself have rebound pointer 1, so it
            // is parked in temp 0 while `that` is re-anchored
            self.vm.pop(Segment::Temp, 0);
            self.vm.pop(Segment::Pointer, 1);
            self.vm.push(Segment::Temp, 0);
            self.vm.pop(Segment::That, 0);
        } else {
            self.expect(&Lexeme::Eq)?;
            self.compile_expression()?;
            self.expect(&Lexeme::Semicolon)?;
            self.vm.pop(target.kind.segment(), target.index);
        }
        Ok(())
    }

    /// If = 'if' '(' Expression ')' '{' Statements '}'
    ///      ('else' '{' Statements '}')?
    ///
    /// Both labels are emitted whether or not an else clause follows.
    fn compile_if(&mut self) -> Result<(), Diagnostic> {
        let else_label = self.fresh_label("ELSE");
        let end_label = self.fresh_label("ENDIF");

        self.expect(&Lexeme::If)?;
        self.expect(&Lexeme::LParen)?;
        self.compile_expression()?;
        self.expect(&Lexeme::RParen)?;
        self.vm.unary('~');
        self.vm.if_goto(&else_label);

        self.expect(&Lexeme::LBrace)?;
        self.compile_statements()?;
        self.expect(&Lexeme::RBrace)?;
        self.vm.goto(&end_label);
        self.vm.label(&else_label);

        if self.eat(&Lexeme::Else) {
            self.expect(&Lexeme::LBrace)?;
            self.compile_statements()?;
            self.expect(&Lexeme::RBrace)?;
        }
        self.vm.label(&end_label);
        Ok(())
    }

    /// While = 'while' '(' Expression ')' '{' Statements '}'
    fn compile_while(&mut self) -> Result<(), Diagnostic> {
        let loop_label = self.fresh_label("WHILE_LOOP");
        let exit_label = self.fresh_label("WHILE_EXIT");

        self.expect(&Lexeme::While)?;
        self.vm.label(&loop_label);
        self.expect(&Lexeme::LParen)?;
        self.compile_expression()?;
        self.expect(&Lexeme::RParen)?;
        self.vm.unary('~');
        self.vm.if_goto(&exit_label);

        self.expect(&Lexeme::LBrace)?;
        self.compile_statements()?;
        self.expect(&Lexeme::RBrace)?;
        self.vm.goto(&loop_label);
        self.vm.label(&exit_label);
        Ok(())
    }

    /// Do = 'do' SubroutineCall ';'
    fn compile_do(&mut self) -> Result<(), Diagnostic> {
        self.expect(&Lexeme::Do)?;
        let name = self.expect_ident()?;
        self.compile_subroutine_call(name)?;
        self.expect(&Lexeme::Semicolon)?;
        // discard the callee's return value
        self.vm.pop(Segment::Temp, 0);
        Ok(())
    }

    /// Return = 'return' Expression? ';'
    fn compile_return(&mut self) -> Result<(), Diagnostic> {
        self.expect(&Lexeme::Return)?;
        if self.eat(&Lexeme::Semicolon) {
            self.vm.ret(true);
        } else {
            self.compile_expression()?;
            self.expect(&Lexeme::Semicolon)?;
            self.vm.ret(false);
        }
        Ok(())
    }

    /// Expression = Term (Op Term)*
    ///
    /// Operators are left-associative with equal precedence: each one is
    /// emitted as soon as its right operand has been compiled.
    fn compile_expression(&mut self) -> Result<(), Diagnostic> {
        self.compile_term()?;
        while let Some(op) = self.peek().binary_op() {
            self.advance();
            self.compile_term()?;
            self.vm.binary(op);
        }
        Ok(())
    }

    /// Term = IntConst | StrConst | KwConst | VarName | VarName '[' Expr ']'
    ///      | SubroutineCall | '(' Expr ')' | UnaryOp Term
    ///
    /// Dispatch is on one token of lookahead; `-` here is always unary
    /// because the parser only enters a term when it expects one.
    fn compile_term(&mut self) -> Result<(), Diagnostic> {
        match self.peek().clone() {
            Lexeme::IntConst(n) => {
                self.advance();
                self.vm.push(Segment::Constant, n);
            }
            Lexeme::StrConst(s) => {
                self.advance();
                self.vm.string(&s);
            }
            Lexeme::True => {
                // true is all ones (-1) so bitwise ops work on it
                self.advance();
                self.vm.push(Segment::Constant, 0);
                self.vm.unary('~');
            }
            Lexeme::False | Lexeme::Null => {
                self.advance();
                self.vm.push(Segment::Constant, 0);
            }
            Lexeme::This => {
                self.advance();
                self.vm.push(Segment::Pointer, 0);
            }
            Lexeme::Minus => {
                self.advance();
                self.compile_term()?;
                self.vm.unary('-');
            }
            Lexeme::Tilde => {
                self.advance();
                self.compile_term()?;
                self.vm.unary('~');
            }
            Lexeme::LParen => {
                self.advance();
                self.compile_expression()?;
                self.expect(&Lexeme::RParen)?;
            }
            Lexeme::Ident(_) => {
                let name = self.expect_ident()?;
                match self.peek() {
                    Lexeme::LBracket => {
                        // indexed read through `that`
                        let array = self.resolve_variable(&name)?;
                        self.advance();
                        self.vm.push(array.kind.segment(), array.index);
                        self.compile_expression()?;
                        self.expect(&Lexeme::RBracket)?;
                        self.vm.binary('+');
                        self.vm.pop(Segment::Pointer, 1);
                        self.vm.push(Segment::That, 0);
                    }
                    Lexeme::Dot | Lexeme::LParen => self.compile_subroutine_call(name)?,
                    _ => {
                        let var = self.resolve_variable(&name)?;
                        self.vm.push(var.kind.segment(), var.index);
                    }
                }
            }
            other => {
                return Err(Diagnostic::error(
                    format!("expected a term, found {}", other.description()),
                    self.current_span(),
                ));
            }
        }
        Ok(())
    }

    /// SubroutineCall = Name '(' ExprList ')'
    ///                | (VarName | ClassName) '.' Name '(' ExprList ')'
    ///
    /// An unqualified call is a method call on the current object. A
    /// qualified call pushes the instance as the hidden first argument when
    /// the qualifier names a variable, and is a plain class-level call
    /// otherwise.
    fn compile_subroutine_call(&mut self, first: Spanned<String>) -> Result<(), Diagnostic> {
        if self.eat(&Lexeme::Dot) {
            let sub_name = self.expect_ident()?;
            let (callee_class, receiver_args) = match self.resolve(&first.node) {
                Resolved::Variable(receiver) => {
                    self.vm.push(receiver.kind.segment(), receiver.index);
                    (receiver.ty, 1)
                }
                Resolved::ClassName => (first.node, 0),
            };
            self.expect(&Lexeme::LParen)?;
            let n_args = receiver_args + self.compile_expression_list()?;
            self.expect(&Lexeme::RParen)?;
            self.vm
                .call(&format!("{}.{}", callee_class, sub_name.node), n_args);
        } else {
            self.vm.push(Segment::Pointer, 0);
            self.expect(&Lexeme::LParen)?;
            let n_args = self.compile_expression_list()? + 1;
            self.expect(&Lexeme::RParen)?;
            let callee = format!("{}.{}", self.class_name, first.node);
            self.vm.call(&callee, n_args);
        }
        Ok(())
    }

    /// ExprList = (Expression (',' Expression)*)?  Returns the count.
    fn compile_expression_list(&mut self) -> Result<u16, Diagnostic> {
        if self.at(&Lexeme::RParen) {
            return Ok(0);
        }
        self.compile_expression()?;
        let mut n = 1;
        while self.eat(&Lexeme::Comma) {
            self.compile_expression()?;
            n += 1;
        }
        Ok(n)
    }

    // --- Naming ---

    fn resolve(&self, name: &str) -> Resolved {
        match self.symbols.lookup(name) {
            Some(entry) => Resolved::Variable(entry.clone()),
            None => Resolved::ClassName,
        }
    }

    fn resolve_variable(&self, name: &Spanned<String>) -> Result<SymbolEntry, Diagnostic> {
        self.symbols.lookup(&name.node).cloned().ok_or_else(|| {
            Diagnostic::error(format!("undefined variable '{}'", name.node), name.span).with_help(
                "declare it with 'var', as a parameter, or as a 'field'/'static' of the class"
                    .to_string(),
            )
        })
    }

    fn define(&mut self, name: &Spanned<String>, ty: &str, kind: VarKind) -> Result<(), Diagnostic> {
        if self.symbols.define(&name.node, ty, kind).is_none() {
            return Err(Diagnostic::error(
                format!("'{}' is already declared in this scope", name.node),
                name.span,
            ));
        }
        Ok(())
    }

    /// Mint a unique VM label: `<CLASS>_<SUFFIX><seq>`, uppercased.
    fn fresh_label(&mut self, suffix: &str) -> String {
        let label = format!("{}_{}{}", self.class_name, suffix, self.label_seq).to_uppercase();
        self.label_seq += 1;
        label
    }

    // --- Cursor ---

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let pos = self.pos;
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        &self.tokens[pos]
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Result<Span, Diagnostic> {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(Diagnostic::error(
                format!(
                    "expected {}, found {}",
                    token.description(),
                    self.peek().description()
                ),
                self.current_span(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, Diagnostic> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Ok(Spanned::new(name, span))
        } else {
            Err(Diagnostic::error(
                format!("expected identifier, found {}", self.peek().description()),
                self.current_span(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn compile(basename: &str, source: &str) -> String {
        let tokens = Lexer::new(source).tokenize().unwrap();
        CompilationEngine::new(basename, tokens)
            .compile_class()
            .unwrap()
            .vm
    }

    fn compile_err(basename: &str, source: &str) -> Diagnostic {
        let tokens = Lexer::new(source).tokenize().unwrap();
        CompilationEngine::new(basename, tokens)
            .compile_class()
            .unwrap_err()
    }

    fn lines(vm: &str) -> Vec<&str> {
        vm.lines().collect()
    }

    #[test]
    fn test_integer_expression_return() {
        let vm = compile("Main", "class Main { function void main() { return 1 + 2; } }");
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.main 0",
                "push constant 1",
                "push constant 2",
                "add",
                "return",
            ]
        );
    }

    #[test]
    fn test_void_do_call() {
        let vm = compile(
            "Main",
            "class Main { function void main() { do Output.printInt(42); return; } }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.main 0",
                "push constant 42",
                "call Output.printInt 1",
                "pop temp 0",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_method_call_on_field() {
        let vm = compile(
            "Game",
            "class Game {
                 field Board b;
                 method void run() { do b.draw(); return; }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Game.run 0",
                "push argument 0",
                "pop pointer 0",
                "push this 0",
                "call Board.draw 1",
                "pop temp 0",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_array_store_swaps_through_temp() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var Array a;
                     var int i, j;
                     let a[i] = a[j];
                     return;
                 }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.main 3",
                "push local 0",
                "push local 1",
                "add",
                "push local 0",
                "push local 2",
                "add",
                "pop pointer 1",
                "push that 0",
                "pop temp 0",
                "pop pointer 1",
                "push temp 0",
                "pop that 0",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_while_loop_negates_condition() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var int x;
                     while (x < 10) { let x = x + 1; }
                     return;
                 }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.main 1",
                "label MAIN_WHILE_LOOP0",
                "push local 0",
                "push constant 10",
                "lt",
                "not",
                "if-goto MAIN_WHILE_EXIT1",
                "push local 0",
                "push constant 1",
                "add",
                "pop local 0",
                "goto MAIN_WHILE_LOOP0",
                "label MAIN_WHILE_EXIT1",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_constructor_allocates_field_count() {
        let vm = compile(
            "Point",
            "class Point {
                 field int x, y;
                 constructor Point new(int ax, int ay) {
                     let x = ax;
                     let y = ay;
                     return this;
                 }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Point.new 0",
                "push constant 2",
                "call Memory.alloc 1",
                "pop pointer 0",
                "push argument 0",
                "pop this 0",
                "push argument 1",
                "pop this 1",
                "push pointer 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_constructor_counts_fields_not_locals() {
        // one field, three locals: Memory.alloc gets 1, the function
        // directive gets 3
        let vm = compile(
            "Counter",
            "class Counter {
                 field int value;
                 constructor Counter new() {
                     var int a, b, c;
                     let value = 0;
                     return this;
                 }
             }",
        );
        assert_eq!(
            lines(&vm)[..4],
            [
                "function Counter.new 3",
                "push constant 1",
                "call Memory.alloc 1",
                "pop pointer 0",
            ]
        );
    }

    #[test]
    fn test_if_else_emits_two_labels_one_goto() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var boolean c;
                     if (c) { return; } else { return; }
                     return;
                 }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.main 1",
                "push local 0",
                "not",
                "if-goto MAIN_ELSE0",
                "push constant 0",
                "return",
                "goto MAIN_ENDIF1",
                "label MAIN_ELSE0",
                "push constant 0",
                "return",
                "label MAIN_ENDIF1",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_if_without_else_still_emits_both_labels() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var boolean c;
                     if (c) { let c = false; }
                     return;
                 }
             }",
        );
        let label_count = vm.lines().filter(|l| l.starts_with("label ")).count();
        let goto_count = vm.lines().filter(|l| l.starts_with("goto ")).count();
        assert_eq!(label_count, 2);
        assert_eq!(goto_count, 1);
        assert!(vm.contains("label MAIN_ELSE0"));
        assert!(vm.contains("label MAIN_ENDIF1"));
    }

    #[test]
    fn test_keyword_constants() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var boolean b;
                     var Array a;
                     let b = true;
                     let b = false;
                     let a = null;
                     return;
                 }
             }",
        );
        assert_eq!(
            lines(&vm)[1..7],
            [
                "push constant 0",
                "not",
                "pop local 0",
                "push constant 0",
                "pop local 0",
                "push constant 0",
            ]
        );
    }

    #[test]
    fn test_this_term_in_expression() {
        let vm = compile(
            "Point",
            "class Point { method Point clone() { return this; } }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Point.clone 0",
                "push argument 0",
                "pop pointer 0",
                "push pointer 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_operators_fold_left_with_equal_precedence() {
        // 2 + 3 * 4 evaluates as (2 + 3) * 4: no precedence climbing
        let vm = compile(
            "Main",
            "class Main { function int f() { return 2 + 3 * 4; } }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.f 0",
                "push constant 2",
                "push constant 3",
                "add",
                "push constant 4",
                "call Math.multiply 2",
                "return",
            ]
        );
    }

    #[test]
    fn test_parenthesized_expression() {
        let vm = compile(
            "Main",
            "class Main { function int f(int x) { return x * (1 + 2); } }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.f 0",
                "push argument 0",
                "push constant 1",
                "push constant 2",
                "add",
                "call Math.multiply 2",
                "return",
            ]
        );
    }

    #[test]
    fn test_unary_minus_and_not() {
        let vm = compile(
            "Main",
            "class Main { function int f(int x) { return -x + ~x; } }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.f 0",
                "push argument 0",
                "neg",
                "push argument 0",
                "not",
                "add",
                "return",
            ]
        );
    }

    #[test]
    fn test_division_lowers_to_math_divide() {
        let vm = compile(
            "Main",
            "class Main { function int half(int x) { return x / 2; } }",
        );
        assert!(vm.contains("call Math.divide 2"));
    }

    #[test]
    fn test_string_constant_term() {
        let vm = compile(
            "Main",
            "class Main { function void main() { do Output.printString(\"Ok\"); return; } }",
        );
        assert_eq!(
            lines(&vm)[1..8],
            [
                "push constant 2",
                "call String.new 1",
                "push constant 79",
                "call String.appendChar 2",
                "push constant 107",
                "call String.appendChar 2",
                "call Output.printString 1",
            ]
        );
    }

    #[test]
    fn test_array_read_through_that() {
        let vm = compile(
            "Main",
            "class Main {
                 function int get() {
                     var Array a;
                     let a = Array.new(5);
                     return a[2];
                 }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.get 1",
                "push constant 5",
                "call Array.new 1",
                "pop local 0",
                "push local 0",
                "push constant 2",
                "add",
                "pop pointer 1",
                "push that 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_unqualified_call_is_method_on_this() {
        let vm = compile(
            "Square",
            "class Square {
                 method void draw() { return; }
                 method void redraw() { do draw(); return; }
             }",
        );
        let redraw: Vec<&str> = vm
            .lines()
            .skip_while(|l| *l != "function Square.redraw 0")
            .collect();
        assert_eq!(
            redraw[..6],
            [
                "function Square.redraw 0",
                "push argument 0",
                "pop pointer 0",
                "push pointer 0",
                "call Square.draw 1",
                "pop temp 0",
            ]
        );
    }

    #[test]
    fn test_unqualified_call_as_term() {
        let vm = compile(
            "Square",
            "class Square {
                 method int size() { return 3; }
                 method int area() { return size() * size(); }
             }",
        );
        let area: Vec<&str> = vm
            .lines()
            .skip_while(|l| *l != "function Square.area 0")
            .collect();
        assert_eq!(
            area,
            vec![
                "function Square.area 0",
                "push argument 0",
                "pop pointer 0",
                "push pointer 0",
                "call Square.size 1",
                "push pointer 0",
                "call Square.size 1",
                "call Math.multiply 2",
                "return",
            ]
        );
    }

    #[test]
    fn test_qualified_call_on_local_instance() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var SquareGame game;
                     let game = SquareGame.new();
                     do game.run(1, 2);
                     return;
                 }
             }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Main.main 1",
                "call SquareGame.new 0",
                "pop local 0",
                "push local 0",
                "push constant 1",
                "push constant 2",
                "call SquareGame.run 3",
                "pop temp 0",
                "push constant 0",
                "return",
            ]
        );
    }

    #[test]
    fn test_static_variable_uses_static_segment() {
        let vm = compile(
            "Counter",
            "class Counter {
                 static int count;
                 function void bump() { let count = count + 1; return; }
             }",
        );
        assert!(vm.contains("push static 0"));
        assert!(vm.contains("pop static 0"));
    }

    #[test]
    fn test_method_parameters_start_at_argument_one() {
        let vm = compile(
            "Point",
            "class Point { method int scaled(int factor) { return factor; } }",
        );
        assert_eq!(
            lines(&vm),
            vec![
                "function Point.scaled 0",
                "push argument 0",
                "pop pointer 0",
                "push argument 1",
                "return",
            ]
        );
    }

    #[test]
    fn test_function_parameters_start_at_argument_zero() {
        let vm = compile(
            "Main",
            "class Main { function int id(int x) { return x; } }",
        );
        assert_eq!(
            lines(&vm),
            vec!["function Main.id 0", "push argument 0", "return"]
        );
    }

    #[test]
    fn test_local_shadows_field() {
        let vm = compile(
            "Thing",
            "class Thing {
                 field int size;
                 method int grab() {
                     var int size;
                     let size = 9;
                     return size;
                 }
             }",
        );
        // both the store and the read hit the local, not the field
        assert!(vm.contains("pop local 0"));
        assert!(vm.contains("push local 0"));
        assert!(!vm.contains("this 0"));
    }

    #[test]
    fn test_labels_are_unique_within_a_unit() {
        let vm = compile(
            "Main",
            "class Main {
                 function void main() {
                     var int i;
                     while (i < 3) {
                         if (i > 1) { let i = i + 2; } else { let i = i + 1; }
                     }
                     if (i = 3) { return; }
                     return;
                 }
             }",
        );
        let mut labels: Vec<&str> = vm
            .lines()
            .filter_map(|l| l.strip_prefix("label "))
            .collect();
        let total = labels.len();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(total, 6, "two per while, two per each of the two ifs");
        assert_eq!(labels.len(), total, "labels must be pairwise distinct");
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let source = "class Main {
            static int seed;
            function int next() {
                let seed = seed * 7 + 1;
                return seed;
            }
        }";
        assert_eq!(compile("Main", source), compile("Main", source));
    }

    #[test]
    fn test_class_name_must_match_basename() {
        let err = compile_err("Main", "class Wrong { }");
        assert!(err.message.contains("does not match the file basename"));
        assert!(err.help.is_some());
    }

    #[test]
    fn test_undefined_variable_in_let() {
        let err = compile_err(
            "Main",
            "class Main { function void main() { let x = 1; return; } }",
        );
        assert!(err.message.contains("undefined variable 'x'"));
    }

    #[test]
    fn test_undefined_variable_in_term() {
        let err = compile_err(
            "Main",
            "class Main { function int f() { return y + 1; } }",
        );
        assert!(err.message.contains("undefined variable 'y'"));
    }

    #[test]
    fn test_unresolved_call_receiver_is_a_class_name() {
        // no error: `Keyboard` never resolves, so it is a class-level call
        let vm = compile(
            "Main",
            "class Main { function void main() { do Keyboard.readInt(); return; } }",
        );
        assert!(vm.contains("call Keyboard.readInt 0"));
    }

    #[test]
    fn test_redeclaration_is_an_error() {
        let err = compile_err(
            "Main",
            "class Main { function void main() { var int x; var char x; return; } }",
        );
        assert!(err.message.contains("already declared"));
    }

    #[test]
    fn test_unexpected_token_in_term() {
        let err = compile_err(
            "Main",
            "class Main { function int f() { return + ; } }",
        );
        assert!(err.message.contains("expected a term"));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = compile_err(
            "Main",
            "class Main { function void main() { return } }",
        );
        assert!(err.message.contains("expected ';'"));
    }

    #[test]
    fn test_trailing_tokens_after_class() {
        let err = compile_err("Main", "class Main { } class Extra { }");
        assert!(err.message.contains("after the class body"));
    }

    #[test]
    fn test_expected_type_diagnostic() {
        let err = compile_err(
            "Main",
            "class Main { function void main() { var 5 x; return; } }",
        );
        assert!(err.message.contains("expected a type"));
    }
}
