use std::collections::HashMap;

use crate::nest::{Nest, NestKind, NestStack};
use crate::tables::{CASE_DEFAULT, NativeKind, OpcodeTable, cast_type_name};
use crate::token::{DecodedBody, Token, TokenKind};
use crate::{Decompilation, DecompileOptions, Diagnostic, DiagnosticKind, SymbolResolver};

/// Jump classification computed before rendering. Back-edges have to be
/// known before the renderer passes their target offset, otherwise their
/// tentative labels would already have been printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JumpRole {
    None,
    LoopHeader,
    LoopBackEdge,
}

/// Forward cursor over the flat token list. `next_significant` is the one
/// place that knows how to skip debug markers; every operand pull goes
/// through it.
#[derive(Default)]
struct Cursor {
    index: usize,
}

impl Cursor {
    fn next_significant(&mut self, tokens: &[Token]) -> Option<usize> {
        while let Some(t) = tokens.get(self.index) {
            self.index += 1;
            if !t.kind.is_debug() {
                return Some(self.index - 1);
            }
        }
        None
    }

    fn peek_significant(&self, tokens: &[Token]) -> Option<usize> {
        let mut i = self.index;
        while let Some(t) = tokens.get(i) {
            if !t.kind.is_debug() {
                return Some(i);
            }
            i += 1;
        }
        None
    }
}

struct Renderer<'a> {
    tokens: &'a [Token],
    table: &'a OpcodeTable,
    symbols: &'a dyn SymbolResolver,
    options: &'a DecompileOptions,
    labels: crate::nest::LabelTable,
    nests: NestStack,
    roles: Vec<JumpRole>,
    by_position: HashMap<u32, usize>,
    diagnostics: Vec<Diagnostic>,
    pending_open: Vec<Nest>,
    out: String,
    semicolon: bool,
    comment: Option<String>,
    enum_context: Option<i32>,
}

/// Renders a decoded body to structured pseudo-source. Rendering never
/// fails; anything unrecognized degrades to placeholders, `goto`, or a
/// diagnostic.
pub fn render_body(
    body: DecodedBody,
    table: &OpcodeTable,
    symbols: &dyn SymbolResolver,
    options: &DecompileOptions,
) -> Decompilation {
    let DecodedBody {
        tokens,
        labels,
        mut diagnostics,
    } = body;
    let by_position = tokens
        .iter()
        .enumerate()
        .map(|(i, t)| (t.position, i))
        .collect();
    let mut r = Renderer {
        tokens: &tokens,
        table,
        symbols,
        options,
        labels,
        nests: NestStack::default(),
        roles: vec![JumpRole::None; tokens.len()],
        by_position,
        diagnostics: Vec::new(),
        pending_open: Vec::new(),
        out: String::new(),
        semicolon: true,
        comment: None,
        enum_context: None,
    };

    r.analyze_jumps();
    let mut cur = Cursor::default();
    while let Some(idx) = cur.next_significant(r.tokens) {
        r.statement(idx, &mut cur);
    }
    r.finish();

    diagnostics.extend(r.diagnostics);
    Decompilation {
        text: r.out,
        diagnostics,
    }
}

impl<'a> Renderer<'a> {
    /// A conditional jump whose own position is the target of a later
    /// unconditional jump inside its span is a loop header; the jump is its
    /// back edge. Resolved up front so the back edge's label candidate is
    /// gone before the renderer passes the header offset.
    fn analyze_jumps(&mut self) {
        for i in 0..self.tokens.len() {
            if self.tokens[i].depth != 0 {
                continue;
            }
            let TokenKind::JumpIfNot { target } = self.tokens[i].kind else {
                continue;
            };
            let p = self.tokens[i].position;
            let t = target as u32;
            if t <= p {
                continue;
            }
            for j in 0..self.tokens.len() {
                if self.tokens[j].depth != 0 {
                    continue;
                }
                let TokenKind::Jump { target: back } = self.tokens[j].kind else {
                    continue;
                };
                let z = self.tokens[j].position;
                if z > p && z < t && back as u32 == p {
                    self.roles[i] = JumpRole::LoopHeader;
                    self.roles[j] = JumpRole::LoopBackEdge;
                    self.labels.release(p);
                }
            }
        }
    }

    fn indent(&self) -> String {
        "  ".repeat(self.nests.depth())
    }

    fn line(&mut self, text: &str) {
        let pad = self.indent();
        self.out.push_str(&pad);
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn note(&mut self, text: String) {
        if self.options.annotate_jumps {
            self.comment = Some(text);
        }
    }

    fn object_name(&self, index: i32) -> String {
        self.symbols
            .object_name(index)
            .unwrap_or_else(|| format!("<object:{index}>"))
    }

    fn name_text(&self, index: u32) -> String {
        self.symbols
            .name(index)
            .unwrap_or_else(|| format!("<name:{index}>"))
    }

    fn label_name(&self, target: u32) -> String {
        match self.labels.explicit_at(target).first() {
            Some(&name) => self.name_text(name),
            None => format!("J0x{target:04X}"),
        }
    }

    fn emit_labels(&mut self, pos: u32) {
        for name in self.labels.explicit_at(pos) {
            let text = format!("{}:", self.name_text(name));
            self.line(&text);
        }
        if self.labels.synthetic_at(pos) {
            self.line(&format!("J0x{pos:04X}:"));
        }
    }

    fn close_top_nest(&mut self) {
        let synthesize_default = self
            .nests
            .top()
            .is_some_and(|n| n.kind == NestKind::Switch && !n.had_default);
        if synthesize_default {
            // the switch end was only proven by an exiting jump; give the
            // block its missing default boundary
            self.line("default:");
        }
        let Some(nest) = self.nests.pop() else { return };
        if nest.kind.braced() {
            self.line("}");
        }
    }

    /// Closes every nest ending at `pos`, innermost first. A nest ending
    /// here underneath one that does not is a crossing violation: reported,
    /// then force-closed so rendering can continue.
    fn close_nests(&mut self, pos: u32) {
        while self.nests.top().is_some_and(|n| n.end == Some(pos)) {
            self.close_top_nest();
        }
        if self.nests.any_ends_at(pos) {
            log::warn!("crossing scopes at 0x{pos:04X}");
            self.diagnostics.push(Diagnostic {
                position: pos,
                kind: DiagnosticKind::UnbalancedScope,
            });
            while self.nests.any_ends_at(pos) {
                self.close_top_nest();
            }
        }
    }

    fn statement(&mut self, idx: usize, cur: &mut Cursor) {
        let pos = self.tokens[idx].position;
        self.close_nests(pos);
        self.emit_labels(pos);
        self.semicolon = true;
        self.comment = None;
        let text = self.token_text(idx, cur);
        if !text.is_empty() {
            let mut line = text;
            if self.semicolon {
                line.push(';');
            }
            if let Some(c) = self.comment.take() {
                line.push_str("  // ");
                line.push_str(&c);
            }
            self.line(&line);
        } else {
            self.comment = None;
        }
        for nest in std::mem::take(&mut self.pending_open) {
            self.nests.open(nest);
        }
    }

    fn finish(&mut self) {
        let end = self
            .tokens
            .last()
            .map(|t| t.position + t.size)
            .unwrap_or(0);
        self.close_nests(end);
        while !self.nests.is_empty() {
            // ends that were never discovered (e.g. a switch nothing broke
            // out of) close at the end of the body
            self.close_top_nest();
        }
        self.emit_labels(end);
    }

    /// Next operand expression, already positioned in the flat list.
    fn operand(&mut self, cur: &mut Cursor) -> String {
        match cur.next_significant(self.tokens) {
            Some(i) => self.token_text(i, cur),
            None => {
                log::warn!("operand missing at end of token list");
                "<truncated>".into()
            }
        }
    }

    /// Call arguments up to the sentinel, with trailing skipped optionals
    /// trimmed.
    fn call_args(&mut self, cur: &mut Cursor) -> Vec<String> {
        let mut args = Vec::new();
        loop {
            let Some(i) = cur.next_significant(self.tokens) else {
                break;
            };
            if self.tokens[i].kind == TokenKind::EndFunctionParms {
                break;
            }
            args.push(self.token_text(i, cur));
        }
        while args.last().is_some_and(|a| a.is_empty()) {
            args.pop();
        }
        args
    }

    /// Consumes through the argument sentinel, rendering and discarding
    /// anything unexpected so the cursor stays aligned with the decoder.
    fn drain_args(&mut self, cur: &mut Cursor) {
        loop {
            let Some(i) = cur.next_significant(self.tokens) else {
                return;
            };
            if self.tokens[i].kind == TokenKind::EndFunctionParms {
                return;
            }
            let _ = self.token_text(i, cur);
        }
    }

    /// Renders an operator operand, parenthesizing nested operator calls
    /// that bind looser than the parent (or equally, on the right side).
    /// Function-style calls never need parentheses.
    fn operator_operand(&mut self, cur: &mut Cursor, parent: u8, right: bool) -> String {
        let nested = cur.peek_significant(self.tokens).and_then(|i| {
            let TokenKind::NativeFunction { index } = self.tokens[i].kind else {
                return None;
            };
            match self.table.native(index)?.kind {
                NativeKind::Operator { precedence, .. } => Some(precedence),
                _ => None,
            }
        });
        let text = self.operand(cur);
        match nested {
            Some(p) if p > parent || (right && p == parent) => format!("({text})"),
            _ => text,
        }
    }

    fn variable_object(kind: &TokenKind) -> Option<i32> {
        match *kind {
            TokenKind::LocalVariable { object }
            | TokenKind::InstanceVariable { object }
            | TokenKind::DefaultVariable { object }
            | TokenKind::StateVariable { object } => Some(object),
            _ => None,
        }
    }

    fn byte_text(&self, value: u8) -> String {
        self.enum_context
            .and_then(|p| self.symbols.enum_member(p, value))
            .unwrap_or_else(|| value.to_string())
    }

    fn escape(s: &str) -> String {
        s.replace('\\', "\\\\").replace('"', "\\\"")
    }

    /// Nested switch balancing: the span between a jump and its target
    /// closes every switch it opens exactly when switch and default
    /// markers pair up, which proves the target lies outside the smallest
    /// enclosing switch.
    fn balanced_switch_exit(&self, from: u32, to: u32) -> bool {
        if to <= from {
            return false;
        }
        let mut switches = 0usize;
        let mut defaults = 0usize;
        for t in self.tokens {
            if t.position <= from {
                continue;
            }
            if t.position >= to {
                break;
            }
            match t.kind {
                TokenKind::Switch { .. } => switches += 1,
                TokenKind::Case { next } if next == CASE_DEFAULT => defaults += 1,
                _ => {}
            }
        }
        switches == defaults
    }

    /// Resolves a jump as the break of the switch enclosing the container
    /// nest at `from`, fixing the retroactively discovered ends.
    fn switch_break(&mut self, from: usize, target: u32) -> String {
        let switch = (0..=from)
            .rev()
            .find(|&i| self.nests.get(i).is_some_and(|n| n.kind == NestKind::Switch));
        if let Some(si) = switch {
            let nest = self.nests.get_mut(si).unwrap();
            if nest.end.is_none() {
                nest.end = Some(target);
            }
        }
        if let Some(di) = self.nests.innermost(NestKind::Default) {
            let nest = self.nests.get_mut(di).unwrap();
            if nest.end.is_none() {
                nest.end = Some(target);
            }
        }
        self.labels.release(target);
        self.note(format!("[break] 0x{target:04X}"));
        "break".into()
    }

    /// An unconditional jump that is the final token of an open If nest
    /// starts that nest's Else block: the If is re-terminated one token
    /// early and the Else spans to the jump's own target.
    fn try_else(&mut self, idx: usize, own_end: u32, target: u32) -> Option<String> {
        if target <= own_end {
            return None;
        }
        let ii = self
            .nests
            .innermost_where(|n| n.kind == NestKind::If && n.end == Some(own_end))?;
        if ii + 1 != self.nests.depth() {
            // something inside the then-block is still open; not an else
            return None;
        }
        self.nests.pop();
        self.line("}");
        self.pending_open
            .push(Nest::new(NestKind::Else, own_end, Some(target), idx));
        self.labels.release(target);
        self.semicolon = false;
        self.note(format!("[else] end=0x{target:04X}"));
        Some("else {".into())
    }

    /// The unconditional-jump resolution ladder: structural container
    /// rules, then fallthrough suppression, then else splitting, then the
    /// literal `goto` fallback.
    fn jump_text(&mut self, idx: usize) -> String {
        let TokenKind::Jump { target } = self.tokens[idx].kind else {
            unreachable!();
        };
        let pos = self.tokens[idx].position;
        let own_end = pos + self.tokens[idx].size;
        let t = target as u32;

        // A marked back edge is a continue of the loop it re-enters even
        // when a switch or foreach sits between them; its label candidate
        // was already released during analysis.
        if self.roles[idx] == JumpRole::LoopBackEdge {
            if let Some(li) = self.nests.innermost(NestKind::Loop) {
                if self.nests.get(li).unwrap().begin == t {
                    self.labels.release(t);
                    self.note(format!("[continue] 0x{t:04X}"));
                    return "continue".into();
                }
            }
        }

        let container = self.nests.innermost_where(|n| {
            matches!(
                n.kind,
                NestKind::Loop
                    | NestKind::ForEach
                    | NestKind::Switch
                    | NestKind::Case
                    | NestKind::Default
            )
        });

        if let Some(ci) = container {
            let kind = self.nests.get(ci).unwrap().kind;
            match kind {
                NestKind::ForEach => {
                    let (begin, end) = {
                        let n = self.nests.get(ci).unwrap();
                        (n.begin, n.end)
                    };
                    if t >= begin && end.is_some_and(|e| t <= e) {
                        if let Some(&ti) = self.by_position.get(&t) {
                            match self.tokens[ti].kind {
                                TokenKind::IteratorPop => {
                                    self.labels.release(t);
                                    self.note(format!("[break] 0x{t:04X}"));
                                    return "break".into();
                                }
                                TokenKind::IteratorNext => {
                                    self.labels.release(t);
                                    self.note(format!("[continue] 0x{t:04X}"));
                                    return "continue".into();
                                }
                                _ => {}
                            }
                        }
                    }
                }
                NestKind::Loop => {
                    let (begin, end) = {
                        let n = self.nests.get(ci).unwrap();
                        (n.begin, n.end)
                    };
                    if t == begin {
                        self.labels.release(t);
                        self.note(format!("[continue] 0x{t:04X}"));
                        return "continue".into();
                    }
                    if let Some(e) = end {
                        if t == e {
                            self.labels.release(t);
                            self.note(format!("[break] 0x{t:04X}"));
                            return "break".into();
                        }
                        if t + self.options.loop_continue_offset == e {
                            // jump to the iteration step before the re-test
                            self.labels.release(t);
                            self.note(format!("[continue] 0x{t:04X}"));
                            return "continue".into();
                        }
                    }
                }
                NestKind::Case => {
                    let case_end = self.nests.get(ci).unwrap().end;
                    if case_end.is_some_and(|e| t >= e) {
                        return self.switch_break(ci, t);
                    }
                }
                NestKind::Default | NestKind::Switch => {
                    if let Some(text) = self.try_else(idx, own_end, t) {
                        return text;
                    }
                    if self.balanced_switch_exit(pos, t) {
                        return self.switch_break(ci, t);
                    }
                }
                _ => {}
            }
        }

        if t == own_end {
            // no-op jump to the next instruction
            self.labels.release(t);
            return String::new();
        }

        if let Some(text) = self.try_else(idx, own_end, t) {
            return text;
        }

        log::warn!("unresolved jump at 0x{pos:04X} -> 0x{t:04X}");
        format!("goto {}", self.label_name(t))
    }

    fn jump_if_not_text(&mut self, idx: usize, cur: &mut Cursor) -> String {
        let TokenKind::JumpIfNot { target } = self.tokens[idx].kind else {
            unreachable!();
        };
        let pos = self.tokens[idx].position;
        let size = self.tokens[idx].size;
        let role = self.roles[idx];
        let cond = self.operand(cur);
        let t = target as u32;

        if role == JumpRole::LoopHeader {
            // the loop construct itself is not recoverable; a re-tested
            // condition with a back edge renders as `while`
            self.labels.release(t);
            self.pending_open
                .push(Nest::new(NestKind::Loop, pos, Some(t), idx));
            self.semicolon = false;
            self.note(format!("[loop] end=0x{t:04X}"));
            return format!("while ({cond}) {{");
        }
        if t > pos {
            self.labels.release(t);
            self.pending_open
                .push(Nest::new(NestKind::If, pos + size, Some(t), idx));
            self.semicolon = false;
            return format!("if ({cond}) {{");
        }

        // backward conditional jump: no structural pattern covers it
        log::warn!("backward conditional jump at 0x{pos:04X} -> 0x{t:04X}");
        format!("if (!({cond})) goto {}", self.label_name(t))
    }

    fn token_text(&mut self, idx: usize, cur: &mut Cursor) -> String {
        let pos = self.tokens[idx].position;
        let size = self.tokens[idx].size;
        // clone is cheap: fixed fields only, except the rare label directory
        let kind = self.tokens[idx].kind.clone();
        match kind {
            TokenKind::LocalVariable { object }
            | TokenKind::InstanceVariable { object }
            | TokenKind::StateVariable { object } => self.object_name(object),
            TokenKind::DefaultVariable { object } => {
                format!("default.{}", self.object_name(object))
            }
            TokenKind::Return => {
                let value = self.operand(cur);
                if value.is_empty() {
                    "return".into()
                } else {
                    format!("return {value}")
                }
            }
            TokenKind::ReturnNothing => String::new(),
            TokenKind::Switch { .. } => {
                let scrutinee = cur.peek_significant(self.tokens);
                let expr = self.operand(cur);
                let mut nest = Nest::new(NestKind::Switch, pos, None, idx);
                nest.enum_source =
                    scrutinee.and_then(|i| Self::variable_object(&self.tokens[i].kind));
                self.pending_open.push(nest);
                self.semicolon = false;
                format!("switch ({expr}) {{")
            }
            TokenKind::Jump { .. } => self.jump_text(idx),
            TokenKind::JumpIfNot { .. } => self.jump_if_not_text(idx, cur),
            TokenKind::Stop => "stop".into(),
            TokenKind::Assert { .. } => {
                let expr = self.operand(cur);
                format!("assert({expr})")
            }
            TokenKind::Case { next } => {
                let switch = self.nests.innermost(NestKind::Switch);
                if switch.is_none() {
                    log::warn!("case marker outside any switch at 0x{pos:04X}");
                    self.diagnostics.push(Diagnostic {
                        position: pos,
                        kind: DiagnosticKind::OrphanCase,
                    });
                }
                if next == CASE_DEFAULT {
                    if let Some(si) = switch {
                        self.nests.get_mut(si).unwrap().had_default = true;
                    }
                    self.pending_open
                        .push(Nest::new(NestKind::Default, pos, None, idx));
                    self.semicolon = false;
                    "default:".into()
                } else {
                    let saved = self.enum_context;
                    self.enum_context =
                        switch.and_then(|si| self.nests.get(si).unwrap().enum_source);
                    let expr = self.operand(cur);
                    self.enum_context = saved;
                    self.pending_open
                        .push(Nest::new(NestKind::Case, pos, Some(next as u32), idx));
                    self.semicolon = false;
                    format!("case {expr}:")
                }
            }
            TokenKind::Nothing => String::new(),
            TokenKind::LabelDirectory { .. } => String::new(),
            TokenKind::GotoLabel => {
                let label = self.operand(cur);
                format!("goto {label}")
            }
            TokenKind::EatReturnValue => self.operand(cur),
            TokenKind::Let | TokenKind::LetBool | TokenKind::LetDelegate => {
                let lhs_idx = cur.peek_significant(self.tokens);
                let lhs = self.operand(cur);
                let saved = self.enum_context;
                self.enum_context =
                    lhs_idx.and_then(|i| Self::variable_object(&self.tokens[i].kind));
                let rhs = self.operand(cur);
                self.enum_context = saved;
                format!("{lhs} = {rhs}")
            }
            TokenKind::DynArrayElement | TokenKind::ArrayElement => {
                let index = self.operand(cur);
                let array = self.operand(cur);
                format!("{array}[{index}]")
            }
            TokenKind::New => {
                let outer = self.operand(cur);
                let name = self.operand(cur);
                let class = self.operand(cur);
                let args: Vec<String> =
                    [outer, name].into_iter().filter(|a| !a.is_empty()).collect();
                if args.is_empty() {
                    format!("new {class}")
                } else {
                    format!("new({}) {class}", args.join(", "))
                }
            }
            TokenKind::ClassContext { .. } => {
                let object = self.operand(cur);
                let member = self.operand(cur);
                format!("{object}.static.{member}")
            }
            TokenKind::Context { .. } => {
                let object = self.operand(cur);
                let member = self.operand(cur);
                format!("{object}.{member}")
            }
            TokenKind::MetaCast { class } => {
                let expr = self.operand(cur);
                format!("class<{}>({expr})", self.object_name(class))
            }
            TokenKind::DynamicCast { class } => {
                let expr = self.operand(cur);
                format!("{}({expr})", self.object_name(class))
            }
            TokenKind::InterfaceCast { interface } => {
                let expr = self.operand(cur);
                format!("{}({expr})", self.object_name(interface))
            }
            TokenKind::PrimitiveCast { cast } => {
                let expr = self.operand(cur);
                match cast_type_name(cast) {
                    Some(ty) => format!("{ty}({expr})"),
                    None => {
                        // missing reverse-engineering data, not a stream
                        // ambiguity: report loudly, keep the raw code visible
                        log::error!("no destination type for cast 0x{cast:02X} at 0x{pos:04X}");
                        self.diagnostics.push(Diagnostic {
                            position: pos,
                            kind: DiagnosticKind::UnknownCast { code: cast },
                        });
                        format!("__cast_0x{cast:02X}({expr})")
                    }
                }
            }
            TokenKind::Skip { .. } => self.operand(cur),
            TokenKind::EndFunctionParms => String::new(),
            TokenKind::SelfObject => "self".into(),
            TokenKind::VirtualFunction { name } => {
                let args = self.call_args(cur);
                format!("{}({})", self.name_text(name), args.join(", "))
            }
            TokenKind::FinalFunction { object } => {
                let args = self.call_args(cur);
                format!("{}({})", self.object_name(object), args.join(", "))
            }
            TokenKind::GlobalFunction { name } => {
                let args = self.call_args(cur);
                format!("global.{}({})", self.name_text(name), args.join(", "))
            }
            TokenKind::DelegateFunction { name } => {
                let args = self.call_args(cur);
                format!("{}({})", self.name_text(name), args.join(", "))
            }
            TokenKind::DelegateProperty { name } => self.name_text(name),
            TokenKind::NativeFunction { index } => match self.table.native(index) {
                Some(desc) => match desc.kind {
                    NativeKind::Operator { symbol, precedence } => {
                        let lhs = self.operator_operand(cur, precedence, false);
                        let rhs = self.operator_operand(cur, precedence, true);
                        self.drain_args(cur);
                        format!("{lhs} {symbol} {rhs}")
                    }
                    NativeKind::PreOperator { symbol } => {
                        let value = self.operator_operand(cur, 0, false);
                        self.drain_args(cur);
                        format!("{symbol}{value}")
                    }
                    NativeKind::PostOperator { symbol } => {
                        let value = self.operator_operand(cur, 0, false);
                        self.drain_args(cur);
                        format!("{value}{symbol}")
                    }
                    NativeKind::Function => {
                        let args = self.call_args(cur);
                        format!("{}({})", desc.name, args.join(", "))
                    }
                },
                None => {
                    log::error!("no native descriptor for index {index} in this build");
                    self.diagnostics.push(Diagnostic {
                        position: pos,
                        kind: DiagnosticKind::UnknownNative { index },
                    });
                    let args = self.call_args(cur);
                    format!("__native_{index}({})", args.join(", "))
                }
            },
            TokenKind::IntConst { value } => value.to_string(),
            TokenKind::FloatConst { value } => format!("{value}"),
            TokenKind::StringConst { value } | TokenKind::UnicodeStringConst { value } => {
                format!("\"{}\"", Self::escape(&value))
            }
            TokenKind::ObjectConst { object } => self.object_name(object),
            TokenKind::NameConst { name } => format!("'{}'", self.name_text(name)),
            TokenKind::RotatorConst { pitch, yaw, roll } => {
                format!("rot({pitch}, {yaw}, {roll})")
            }
            TokenKind::VectorConst { x, y, z } => format!("vect({x}, {y}, {z})"),
            TokenKind::ByteConst { value } | TokenKind::IntConstByte { value } => {
                self.byte_text(value)
            }
            TokenKind::IntZero => "0".into(),
            TokenKind::IntOne => "1".into(),
            TokenKind::True => "true".into(),
            TokenKind::False => "false".into(),
            TokenKind::NativeParm { .. } => String::new(),
            TokenKind::NoObject => "none".into(),
            TokenKind::BoolVariable => self.operand(cur),
            TokenKind::Iterator { end } => {
                let expr = self.operand(cur);
                self.pending_open
                    .push(Nest::new(NestKind::ForEach, pos, Some(end as u32), idx));
                self.semicolon = false;
                self.note(format!("[foreach] end=0x{end:04X}"));
                format!("foreach {expr} {{")
            }
            TokenKind::ArrayIterator { end, with_index } => {
                let array = self.operand(cur);
                let item = self.operand(cur);
                let index = if with_index {
                    Some(self.operand(cur))
                } else {
                    None
                };
                self.pending_open
                    .push(Nest::new(NestKind::ForEach, pos, Some(end as u32), idx));
                self.semicolon = false;
                self.note(format!("[foreach] end=0x{end:04X}"));
                match index {
                    Some(i) => format!("foreach {array}({item}, {i}) {{"),
                    None => format!("foreach {array}({item}) {{"),
                }
            }
            TokenKind::IteratorPop | TokenKind::IteratorNext => String::new(),
            TokenKind::StructCmpEq { .. } => {
                let a = self.operand(cur);
                let b = self.operand(cur);
                format!("{a} == {b}")
            }
            TokenKind::StructCmpNe { .. } => {
                let a = self.operand(cur);
                let b = self.operand(cur);
                format!("{a} != {b}")
            }
            TokenKind::StructMember { property, .. } => {
                let expr = self.operand(cur);
                format!("{expr}.{}", self.object_name(property))
            }
            TokenKind::DynArrayLength => {
                let array = self.operand(cur);
                format!("{array}.Length")
            }
            TokenKind::DynArrayInsert => {
                let array = self.operand(cur);
                let index = self.operand(cur);
                let count = self.operand(cur);
                format!("{array}.Insert({index}, {count})")
            }
            TokenKind::DynArrayRemove => {
                let array = self.operand(cur);
                let index = self.operand(cur);
                let count = self.operand(cur);
                format!("{array}.Remove({index}, {count})")
            }
            TokenKind::Conditional { .. } => {
                let cond = self.operand(cur);
                let a = self.operand(cur);
                let b = self.operand(cur);
                format!("(({cond}) ? {a} : {b})")
            }
            TokenKind::DebugInfo { .. } => String::new(),
            TokenKind::FilterScope { end } => {
                self.pending_open
                    .push(Nest::new(NestKind::Scope, pos + size, Some(end as u32), idx));
                self.semicolon = false;
                self.note(format!("[filtered] end=0x{end:04X}"));
                "{".into()
            }
            TokenKind::EndOfScript => String::new(),
            TokenKind::Unknown { op } => {
                self.note(format!("[unknown opcode 0x{op:02X}]"));
                format!("__unknown_0x{op:02X}")
            }
        }
    }
}

/// Raw per-token diagnostic form, independent of the structured-text path.
pub fn disassemble(tokens: &[Token]) -> String {
    let mut out = String::new();
    for t in tokens {
        let indent = "  ".repeat(t.depth as usize);
        let detail = kind_detail(&t.kind);
        if detail.is_empty() {
            out.push_str(&format!(
                "{:05}  {:02X}  {indent}{}\n",
                t.position,
                t.opcode,
                kind_name(&t.kind)
            ));
        } else {
            out.push_str(&format!(
                "{:05}  {:02X}  {indent}{} {detail}\n",
                t.position,
                t.opcode,
                kind_name(&t.kind)
            ));
        }
    }
    out
}

fn kind_name(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::LocalVariable { .. } => "local_variable",
        TokenKind::InstanceVariable { .. } => "instance_variable",
        TokenKind::DefaultVariable { .. } => "default_variable",
        TokenKind::StateVariable { .. } => "state_variable",
        TokenKind::Return => "return",
        TokenKind::ReturnNothing => "return_nothing",
        TokenKind::Switch { .. } => "switch",
        TokenKind::Jump { .. } => "jump",
        TokenKind::JumpIfNot { .. } => "jump_if_not",
        TokenKind::Stop => "stop",
        TokenKind::Assert { .. } => "assert",
        TokenKind::Case { next } if *next == CASE_DEFAULT => "default_case",
        TokenKind::Case { .. } => "case",
        TokenKind::Nothing => "nothing",
        TokenKind::LabelDirectory { .. } => "label_directory",
        TokenKind::GotoLabel => "goto_label",
        TokenKind::EatReturnValue => "eat_return_value",
        TokenKind::Let => "let",
        TokenKind::LetBool => "let_bool",
        TokenKind::LetDelegate => "let_delegate",
        TokenKind::DynArrayElement => "dyn_array_element",
        TokenKind::ArrayElement => "array_element",
        TokenKind::New => "new",
        TokenKind::ClassContext { .. } => "class_context",
        TokenKind::Context { .. } => "context",
        TokenKind::MetaCast { .. } => "meta_cast",
        TokenKind::DynamicCast { .. } => "dynamic_cast",
        TokenKind::InterfaceCast { .. } => "interface_cast",
        TokenKind::PrimitiveCast { .. } => "primitive_cast",
        TokenKind::Skip { .. } => "skip",
        TokenKind::EndFunctionParms => "end_function_parms",
        TokenKind::SelfObject => "self",
        TokenKind::VirtualFunction { .. } => "virtual_function",
        TokenKind::FinalFunction { .. } => "final_function",
        TokenKind::GlobalFunction { .. } => "global_function",
        TokenKind::DelegateFunction { .. } => "delegate_function",
        TokenKind::DelegateProperty { .. } => "delegate_property",
        TokenKind::NativeFunction { .. } => "native_function",
        TokenKind::IntConst { .. } => "int_const",
        TokenKind::FloatConst { .. } => "float_const",
        TokenKind::StringConst { .. } => "string_const",
        TokenKind::UnicodeStringConst { .. } => "unicode_string_const",
        TokenKind::ObjectConst { .. } => "object_const",
        TokenKind::NameConst { .. } => "name_const",
        TokenKind::RotatorConst { .. } => "rotator_const",
        TokenKind::VectorConst { .. } => "vector_const",
        TokenKind::ByteConst { .. } => "byte_const",
        TokenKind::IntZero => "int_zero",
        TokenKind::IntOne => "int_one",
        TokenKind::True => "true",
        TokenKind::False => "false",
        TokenKind::NativeParm { .. } => "native_parm",
        TokenKind::NoObject => "no_object",
        TokenKind::IntConstByte { .. } => "int_const_byte",
        TokenKind::BoolVariable => "bool_variable",
        TokenKind::Iterator { .. } => "iterator",
        TokenKind::IteratorPop => "iterator_pop",
        TokenKind::IteratorNext => "iterator_next",
        TokenKind::StructCmpEq { .. } => "struct_cmp_eq",
        TokenKind::StructCmpNe { .. } => "struct_cmp_ne",
        TokenKind::StructMember { .. } => "struct_member",
        TokenKind::DynArrayLength => "dyn_array_length",
        TokenKind::DynArrayInsert => "dyn_array_insert",
        TokenKind::DynArrayRemove => "dyn_array_remove",
        TokenKind::Conditional { .. } => "conditional",
        TokenKind::DebugInfo { .. } => "debug_info",
        TokenKind::FilterScope { .. } => "filter_scope",
        TokenKind::EndOfScript => "end_of_script",
        TokenKind::ArrayIterator { .. } => "array_iterator",
        TokenKind::Unknown { .. } => "unknown",
    }
}

fn kind_detail(kind: &TokenKind) -> String {
    match kind {
        TokenKind::LocalVariable { object }
        | TokenKind::InstanceVariable { object }
        | TokenKind::DefaultVariable { object }
        | TokenKind::StateVariable { object }
        | TokenKind::ObjectConst { object }
        | TokenKind::NativeParm { object }
        | TokenKind::FinalFunction { object }
        | TokenKind::StructCmpEq { object }
        | TokenKind::StructCmpNe { object } => format!("obj {object}"),
        TokenKind::VirtualFunction { name }
        | TokenKind::GlobalFunction { name }
        | TokenKind::DelegateFunction { name }
        | TokenKind::DelegateProperty { name }
        | TokenKind::NameConst { name } => format!("name {name}"),
        TokenKind::Jump { target } | TokenKind::JumpIfNot { target } => {
            format!("-> 0x{target:04X}")
        }
        TokenKind::Case { next } if *next == CASE_DEFAULT => String::new(),
        TokenKind::Case { next } => format!("next 0x{next:04X}"),
        TokenKind::Switch { size_hint } => format!("size {size_hint}"),
        TokenKind::Assert { line } => format!("line {line}"),
        TokenKind::LabelDirectory { entries } => format!("{} labels", entries.len()),
        TokenKind::MetaCast { class }
        | TokenKind::DynamicCast { class } => format!("obj {class}"),
        TokenKind::InterfaceCast { interface } => format!("obj {interface}"),
        TokenKind::PrimitiveCast { cast } => format!("cast 0x{cast:02X}"),
        TokenKind::Skip { size } => format!("size {size}"),
        TokenKind::NativeFunction { index } => format!("native {index}"),
        TokenKind::IntConst { value } => value.to_string(),
        TokenKind::FloatConst { value } => format!("{value}"),
        TokenKind::StringConst { value } | TokenKind::UnicodeStringConst { value } => {
            format!("{value:?}")
        }
        TokenKind::RotatorConst { pitch, yaw, roll } => format!("{pitch} {yaw} {roll}"),
        TokenKind::VectorConst { x, y, z } => format!("{x} {y} {z}"),
        TokenKind::ByteConst { value } | TokenKind::IntConstByte { value } => value.to_string(),
        TokenKind::StructMember { property, .. } => format!("prop {property}"),
        TokenKind::Conditional { skip_true, skip_false } => {
            format!("skip {skip_true}/{skip_false}")
        }
        TokenKind::DebugInfo { line, .. } => format!("line {line}"),
        TokenKind::Iterator { end } => format!("end 0x{end:04X}"),
        TokenKind::ArrayIterator { end, with_index } => {
            format!("end 0x{end:04X} indexed {with_index}")
        }
        TokenKind::FilterScope { end } => format!("end 0x{end:04X}"),
        TokenKind::Unknown { op } => format!("raw 0x{op:02X}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Asm, symbols};
    use crate::token::decode_body;
    use crate::{BuildDescriptor, DecompileOptions};

    fn options() -> DecompileOptions {
        DecompileOptions {
            annotate_jumps: false,
            ..DecompileOptions::default()
        }
    }

    fn decompile_with(bytes: &[u8], opts: &DecompileOptions) -> Decompilation {
        let build = BuildDescriptor::default();
        let table = OpcodeTable::for_build(&build);
        let decoded = decode_body(bytes, &build, &table).expect("decode");
        render_body(decoded, &table, &symbols(), opts)
    }

    fn decompile(bytes: &[u8]) -> Decompilation {
        decompile_with(bytes, &options())
    }

    #[test]
    fn loop_back_edge_renders_while_and_continue() {
        let mut a = Asm::new();
        a.op(0x07).u16(8).op(0x27); // re-tested condition, exits to 8
        a.op(0x08);
        a.op(0x06).u16(0); // back edge to the header
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "while (true) {\n  stop;\n  continue;\n}\n");
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn loop_keywords_carry_provenance_comments() {
        let mut a = Asm::new();
        a.op(0x07).u16(8).op(0x27);
        a.op(0x08);
        a.op(0x06).u16(0);
        let out = decompile_with(&a.bytes, &DecompileOptions::default());
        assert!(out.text.contains("while (true) {  // [loop] end=0x0008"));
        assert!(out.text.contains("continue;  // [continue] 0x0000"));
    }

    #[test]
    fn explicit_continue_through_the_step_offset() {
        let mut a = Asm::new();
        a.op(0x07).u16(17).op(0x27); // loop over [0, 17)
        a.op(0x06).u16(7); // 7 + LOOP_CONTINUE_OFFSET == 17
        a.op(0x08);
        a.op(0x06).u16(0); // back edge
        for _ in 0..6 {
            a.op(0x08); // iteration-step region
        }
        assert_eq!(a.bytes.len(), 17);
        let out = decompile(&a.bytes);
        assert_eq!(out.text.matches("continue;").count(), 2);
        assert!(!out.text.contains("goto"));
    }

    #[test]
    fn else_block_splits_off_the_if() {
        let mut a = Asm::new();
        a.op(0x07).u16(8).op(0x27);
        a.op(0x08);
        a.op(0x06).u16(9); // final token of the then-block
        a.op(0x08);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "if (true) {\n  stop;\n} else {\n  stop;\n}\n");
        assert!(!out.text.contains("goto"));
    }

    #[test]
    fn unresolved_jump_falls_back_to_goto_with_one_label() {
        let mut a = Asm::new();
        a.op(0x06).u16(4);
        a.op(0x08);
        a.op(0x08);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "goto J0x0004;\nstop;\nJ0x0004:\nstop;\n");
        assert_eq!(out.text.matches("goto ").count(), 1);
        assert_eq!(out.text.matches("J0x0004:").count(), 1);
    }

    #[test]
    fn fallthrough_jump_renders_nothing_and_drops_its_label() {
        let mut a = Asm::new();
        a.op(0x06).u16(3);
        a.op(0x08);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "stop;\n");
    }

    #[test]
    fn switch_without_default_synthesizes_the_boundary() {
        let mut a = Asm::new();
        a.op(0x05).op(0x00); // switch
        a.op(0x01).i32(8); // Team
        a.op(0x0A).u16(11).op(0x25); // case 0, falls through
        a.op(0x0A).u16(19).op(0x26); // case 1
        a.op(0x08);
        a.op(0x06).u16(19); // break proves the switch end
        let out = decompile(&a.bytes);
        assert_eq!(
            out.text,
            "switch (Team) {\n  case 0:\n  case 1:\n    stop;\n    break;\n  default:\n}\n"
        );
    }

    #[test]
    fn explicit_default_closes_with_the_switch() {
        let mut a = Asm::new();
        a.op(0x05).op(0x00);
        a.op(0x00).i32(1); // a
        a.op(0x0A).u16(CASE_DEFAULT); // default:
        a.op(0x08);
        a.op(0x06).u16(14); // break out of the default
        let out = decompile(&a.bytes);
        assert_eq!(
            out.text,
            "switch (a) {\n  default:\n    stop;\n    break;\n}\n"
        );
        // no synthesized boundary on top of the real one
        assert_eq!(out.text.matches("default:").count(), 1);
    }

    #[test]
    fn case_bytes_render_through_the_scrutinee_enum() {
        let mut a = Asm::new();
        a.op(0x05).op(0x00);
        a.op(0x01).i32(8); // Team, enum-typed in the test symbols
        a.op(0x0A).u16(15);
        a.op(0x24).op(0x01); // byte 1
        a.op(0x06).u16(15);
        let out = decompile(&a.bytes);
        assert_eq!(
            out.text,
            "switch (Team) {\n  case TEAM_Blue:\n    break;\n  default:\n}\n"
        );
    }

    #[test]
    fn foreach_jumps_resolve_against_iterator_markers() {
        let mut a = Asm::new();
        a.op(0x2F); // iterator
        a.op(0x1C).i32(20); // AllActors(...)
        a.op(0x16);
        a.u16(17); // ends at the pop marker
        a.op(0x08);
        a.op(0x06).u16(16); // to the next marker
        a.op(0x06).u16(17); // to the pop marker
        a.op(0x31);
        a.op(0x30);
        let out = decompile(&a.bytes);
        assert_eq!(
            out.text,
            "foreach AllActors() {\n  stop;\n  continue;\n  break;\n}\n"
        );
    }

    #[test]
    fn debug_markers_never_change_the_rendering() {
        let mut plain = Asm::new();
        plain.op(0x0F);
        plain.op(0x00).i32(5); // Health
        plain.op(0x1D).i32(5);

        let mut noisy = Asm::new();
        noisy.op(0x42).u32(1).u32(3).u32(0).op(0); // before the statement
        noisy.op(0x0F);
        noisy.op(0x00).i32(5);
        noisy.op(0x42).u32(1).u32(3).u32(6).op(0); // between the operands
        noisy.op(0x1D).i32(5);

        let a = decompile(&plain.bytes);
        let b = decompile(&noisy.bytes);
        assert_eq!(a.text, "Health = 5;\n");
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn unknown_opcode_leaves_a_placeholder_and_keeps_going() {
        let mut a = Asm::new();
        a.op(0x5F);
        a.op(0x08);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "__unknown_0x5F;\nstop;\n");
        assert!(matches!(
            out.diagnostics[..],
            [Diagnostic {
                kind: DiagnosticKind::UnknownOpcode { op: 0x5F },
                ..
            }]
        ));
    }

    #[test]
    fn operator_operands_parenthesize_by_precedence() {
        // (a + b) * c: addition binds looser than multiplication
        let mut a = Asm::new();
        a.op(0x7B);
        a.op(0x79);
        a.op(0x00).i32(1);
        a.op(0x00).i32(2);
        a.op(0x16);
        a.op(0x00).i32(3);
        a.op(0x16);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "(a + b) * c;\n");

        // a + (b + c): equal precedence on the right keeps its parentheses
        let mut a = Asm::new();
        a.op(0x79);
        a.op(0x00).i32(1);
        a.op(0x79);
        a.op(0x00).i32(2);
        a.op(0x00).i32(3);
        a.op(0x16);
        a.op(0x16);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "a + (b + c);\n");
    }

    #[test]
    fn prefix_and_postfix_operators() {
        let mut a = Asm::new();
        a.op(0x80); // !
        a.op(0x7E); // &&
        a.op(0x27);
        a.op(0x28);
        a.op(0x16);
        a.op(0x16);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "!(true && false);\n");

        let mut a = Asm::new();
        a.op(0x82); // ++
        a.op(0x00).i32(1);
        a.op(0x16);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "a++;\n");
    }

    #[test]
    fn ternary_renders_guarded() {
        let mut a = Asm::new();
        a.op(0x41);
        a.op(0x27); // condition
        a.u16(1);
        a.op(0x25);
        a.u16(1);
        a.op(0x26);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "((true) ? 0 : 1);\n");
    }

    #[test]
    fn primitive_cast_maps_to_a_type_name() {
        let mut a = Asm::new();
        a.op(0x38).op(0x04);
        a.op(0x00).i32(1);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "float(a);\n");
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn unknown_cast_is_loud_but_recoverable() {
        let mut a = Asm::new();
        a.op(0x38).op(0x7F);
        a.op(0x25);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "__cast_0x7F(0);\n");
        assert!(matches!(
            out.diagnostics[..],
            [Diagnostic {
                kind: DiagnosticKind::UnknownCast { code: 0x7F },
                ..
            }]
        ));
    }

    #[test]
    fn unknown_native_is_loud_but_recoverable() {
        let mut a = Asm::new();
        a.op(0xF0);
        a.op(0x16);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "__native_240();\n");
        assert!(matches!(
            out.diagnostics[..],
            [Diagnostic {
                kind: DiagnosticKind::UnknownNative { index: 240 },
                ..
            }]
        ));
    }

    #[test]
    fn assignment_propagates_enum_context() {
        let mut a = Asm::new();
        a.op(0x0F);
        a.op(0x01).i32(8); // Team
        a.op(0x24).op(0x01);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "Team = TEAM_Blue;\n");
    }

    #[test]
    fn trailing_skipped_arguments_are_trimmed() {
        let mut a = Asm::new();
        a.op(0x1C).i32(12); // Fire
        a.op(0x25);
        a.op(0x0B); // skipped optional argument
        a.op(0x16);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "Fire(0);\n");
    }

    #[test]
    fn directory_labels_render_by_name() {
        let mut a = Asm::new();
        a.op(0x0D); // goto
        a.op(0x21).name(7); // 'Begin'
        a.op(0x08);
        a.op(0x0C); // label directory
        a.name(7).u32(10);
        a.name(0);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "goto 'Begin';\nBegin:\nstop;\n");
    }

    #[test]
    fn nested_scopes_close_innermost_first() {
        let mut a = Asm::new();
        a.op(0x07).u16(9).op(0x27);
        a.op(0x07).u16(9).op(0x27);
        a.op(0x08);
        let out = decompile(&a.bytes);
        assert_eq!(
            out.text,
            "if (true) {\n  if (true) {\n    stop;\n  }\n}\n"
        );
        assert_eq!(
            out.text.matches('{').count(),
            out.text.matches('}').count()
        );
    }

    #[test]
    fn filter_scope_is_an_opaque_block() {
        let mut a = Asm::new();
        a.op(0x43).u16(4);
        a.op(0x08);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "{\n  stop;\n}\n");
    }

    #[test]
    fn backward_conditional_jump_falls_back() {
        let mut a = Asm::new();
        a.op(0x08);
        a.op(0x07).u16(0).op(0x27);
        let out = decompile(&a.bytes);
        assert_eq!(out.text, "J0x0000:\nstop;\nif (!(true)) goto J0x0000;\n");
    }

    #[test]
    fn disassembly_lists_positions_and_operands() {
        let mut a = Asm::new();
        a.op(0x06).u16(9);
        a.op(0x1D).i32(-3);
        let build = BuildDescriptor::default();
        let table = OpcodeTable::for_build(&build);
        let decoded = decode_body(&a.bytes, &build, &table).expect("decode");
        let text = disassemble(&decoded.tokens);
        assert!(text.contains("00000  06  jump -> 0x0009"));
        assert!(text.contains("00003  1D  int_const -3"));
    }
}
