use crate::nest::LabelTable;
use crate::reader::ScriptReader;
use crate::tables::{CASE_DEFAULT, EXTENDED_NATIVE_START, FIRST_NATIVE, Opcode, OpcodeTable, VER_STRUCT_MEMBER_FLAGS};
use crate::{BuildDescriptor, Diagnostic, DiagnosticKind, ScriptError};

/// Operand sub-expressions nest at most this deep; anything beyond is a
/// malformed stream, not real compiler output.
pub const MAX_OPERAND_DEPTH: u8 = 64;

/// One decoded instruction. Tokens live in one flat, position-ordered
/// vector; operand tokens follow their parent at `depth + 1` and the tree
/// is implicit. For any token, `position + size` equals the position of
/// the next token at the same depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub position: u32,
    pub size: u32,
    pub opcode: u8,
    pub depth: u8,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelDirEntry {
    pub name: u32,
    pub offset: u32,
}

/// Decoded instruction payloads. Fixed-width fields only; operands are
/// re-pulled from the flat token list at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LocalVariable { object: i32 },
    InstanceVariable { object: i32 },
    DefaultVariable { object: i32 },
    StateVariable { object: i32 },
    Return,
    ReturnNothing,
    Switch { size_hint: u8 },
    Jump { target: u16 },
    JumpIfNot { target: u16 },
    Stop,
    Assert { line: u16 },
    Case { next: u16 },
    Nothing,
    LabelDirectory { entries: Vec<LabelDirEntry> },
    GotoLabel,
    EatReturnValue,
    Let,
    LetBool,
    LetDelegate,
    DynArrayElement,
    ArrayElement,
    New,
    ClassContext { skip: u16, size_hint: u8 },
    Context { skip: u16, size_hint: u8 },
    MetaCast { class: i32 },
    DynamicCast { class: i32 },
    InterfaceCast { interface: i32 },
    PrimitiveCast { cast: u8 },
    Skip { size: u16 },
    EndFunctionParms,
    SelfObject,
    VirtualFunction { name: u32 },
    FinalFunction { object: i32 },
    GlobalFunction { name: u32 },
    DelegateFunction { name: u32 },
    DelegateProperty { name: u32 },
    NativeFunction { index: u16 },
    IntConst { value: i32 },
    FloatConst { value: f32 },
    StringConst { value: String },
    UnicodeStringConst { value: String },
    ObjectConst { object: i32 },
    NameConst { name: u32 },
    RotatorConst { pitch: i32, yaw: i32, roll: i32 },
    VectorConst { x: f32, y: f32, z: f32 },
    ByteConst { value: u8 },
    IntZero,
    IntOne,
    True,
    False,
    NativeParm { object: i32 },
    NoObject,
    IntConstByte { value: u8 },
    BoolVariable,
    Iterator { end: u16 },
    IteratorPop,
    IteratorNext,
    StructCmpEq { object: i32 },
    StructCmpNe { object: i32 },
    StructMember { property: i32, parent: i32 },
    DynArrayLength,
    DynArrayInsert,
    DynArrayRemove,
    Conditional { skip_true: u16, skip_false: u16 },
    DebugInfo { version: u32, line: u32, pos: u32, marker: u8 },
    FilterScope { end: u16 },
    EndOfScript,
    ArrayIterator { end: u16, with_index: bool },
    Unknown { op: u8 },
}

impl TokenKind {
    pub fn is_debug(&self) -> bool {
        matches!(self, TokenKind::DebugInfo { .. })
    }
}

/// One script body, fully decoded but not yet rendered.
pub struct DecodedBody {
    pub tokens: Vec<Token>,
    pub labels: LabelTable,
    pub diagnostics: Vec<Diagnostic>,
}

struct Decoder<'a> {
    r: ScriptReader<'a>,
    table: &'a OpcodeTable,
    build: BuildDescriptor,
    tokens: Vec<Token>,
    labels: LabelTable,
    diagnostics: Vec<Diagnostic>,
}

/// Decodes a whole script body into the flat token list, registering a
/// tentative synthetic label for every jump target along the way.
pub fn decode_body(
    bytes: &[u8],
    build: &BuildDescriptor,
    table: &OpcodeTable,
) -> Result<DecodedBody, ScriptError> {
    let mut d = Decoder {
        r: ScriptReader::new(bytes, *build),
        table,
        build: *build,
        tokens: Vec::new(),
        labels: LabelTable::default(),
        diagnostics: Vec::new(),
    };
    while !d.r.is_empty() {
        d.decode_token(0)?;
    }
    Ok(DecodedBody {
        tokens: d.tokens,
        labels: d.labels,
        diagnostics: d.diagnostics,
    })
}

impl<'a> Decoder<'a> {
    fn decode_token(&mut self, depth: u8) -> Result<usize, ScriptError> {
        if depth > MAX_OPERAND_DEPTH {
            return Err(ScriptError::OperandDepthExceeded(self.r.position()));
        }
        let position = self.r.position() as u32;
        let op = self.r.get_u8()?;

        // Slot goes in before the operands so the flat list stays in
        // position order; kind and size are filled in afterwards.
        let index = self.tokens.len();
        self.tokens.push(Token {
            position,
            size: 0,
            opcode: op,
            depth,
            kind: TokenKind::Nothing,
        });

        let kind = self.decode_kind(op, position, depth)?;
        let size = self.r.position() as u32 - position;
        let token = &mut self.tokens[index];
        token.kind = kind;
        token.size = size;
        Ok(index)
    }

    /// Decodes the next operand expression, transparently absorbing debug
    /// markers the compiler interleaves with real instructions.
    fn decode_operand(&mut self, depth: u8) -> Result<usize, ScriptError> {
        loop {
            let index = self.decode_token(depth + 1)?;
            if !self.tokens[index].kind.is_debug() {
                return Ok(index);
            }
        }
    }

    /// Decodes call arguments up to and including the end-of-arguments
    /// sentinel.
    fn decode_call_args(&mut self, depth: u8) -> Result<(), ScriptError> {
        loop {
            let index = self.decode_token(depth + 1)?;
            if self.tokens[index].kind == TokenKind::EndFunctionParms {
                return Ok(());
            }
        }
    }

    fn decode_kind(&mut self, op: u8, position: u32, depth: u8) -> Result<TokenKind, ScriptError> {
        if op >= FIRST_NATIVE {
            self.decode_call_args(depth)?;
            return Ok(TokenKind::NativeFunction { index: op as u16 });
        }
        if op >= EXTENDED_NATIVE_START {
            let low = self.r.get_u8()?;
            let index = (((op & 0x0F) as u16) << 8) | low as u16;
            self.decode_call_args(depth)?;
            return Ok(TokenKind::NativeFunction { index });
        }

        let Some(opcode) = self.table.opcode(op) else {
            // Unassigned byte: keep going with a size-1 placeholder; the
            // rest of the stream may still decode.
            log::warn!("unrecognized opcode 0x{op:02X} at 0x{position:04X}");
            self.diagnostics.push(Diagnostic {
                position,
                kind: DiagnosticKind::UnknownOpcode { op },
            });
            return Ok(TokenKind::Unknown { op });
        };

        Ok(match opcode {
            Opcode::LocalVariable => TokenKind::LocalVariable { object: self.r.get_object_index()? },
            Opcode::InstanceVariable => TokenKind::InstanceVariable { object: self.r.get_object_index()? },
            Opcode::DefaultVariable => TokenKind::DefaultVariable { object: self.r.get_object_index()? },
            Opcode::StateVariable => TokenKind::StateVariable { object: self.r.get_object_index()? },
            Opcode::Return => {
                self.decode_operand(depth)?;
                TokenKind::Return
            }
            Opcode::ReturnNothing => TokenKind::ReturnNothing,
            Opcode::Switch => {
                let size_hint = self.r.get_u8()?;
                self.decode_operand(depth)?;
                TokenKind::Switch { size_hint }
            }
            Opcode::Jump => {
                let target = self.r.get_u16()?;
                self.labels.reference(target as u32);
                TokenKind::Jump { target }
            }
            Opcode::JumpIfNot => {
                let target = self.r.get_u16()?;
                self.labels.reference(target as u32);
                self.decode_operand(depth)?;
                TokenKind::JumpIfNot { target }
            }
            Opcode::Stop => TokenKind::Stop,
            Opcode::Assert => {
                let line = self.r.get_u16()?;
                self.decode_operand(depth)?;
                TokenKind::Assert { line }
            }
            Opcode::Case => {
                let next = self.r.get_u16()?;
                if next != CASE_DEFAULT {
                    self.decode_operand(depth)?;
                }
                TokenKind::Case { next }
            }
            Opcode::Nothing => TokenKind::Nothing,
            Opcode::LabelDirectory => {
                let mut entries = Vec::new();
                loop {
                    let (name, _number) = self.r.get_name_index()?;
                    if name == 0 {
                        break;
                    }
                    let offset = self.r.get_u32()?;
                    self.labels.add_explicit(name, offset);
                    entries.push(LabelDirEntry { name, offset });
                }
                TokenKind::LabelDirectory { entries }
            }
            Opcode::GotoLabel => {
                self.decode_operand(depth)?;
                TokenKind::GotoLabel
            }
            Opcode::EatReturnValue => {
                self.decode_operand(depth)?;
                TokenKind::EatReturnValue
            }
            Opcode::Let => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::Let
            }
            Opcode::LetBool => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::LetBool
            }
            Opcode::LetDelegate => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::LetDelegate
            }
            Opcode::DynArrayElement => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::DynArrayElement
            }
            Opcode::ArrayElement => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::ArrayElement
            }
            Opcode::New => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::New
            }
            Opcode::ClassContext => {
                self.decode_operand(depth)?;
                let skip = self.r.get_u16()?;
                let size_hint = self.r.get_u8()?;
                self.decode_operand(depth)?;
                TokenKind::ClassContext { skip, size_hint }
            }
            Opcode::Context => {
                self.decode_operand(depth)?;
                let skip = self.r.get_u16()?;
                let size_hint = self.r.get_u8()?;
                self.decode_operand(depth)?;
                TokenKind::Context { skip, size_hint }
            }
            Opcode::MetaCast => {
                let class = self.r.get_object_index()?;
                self.decode_operand(depth)?;
                TokenKind::MetaCast { class }
            }
            Opcode::DynamicCast => {
                let class = self.r.get_object_index()?;
                self.decode_operand(depth)?;
                TokenKind::DynamicCast { class }
            }
            Opcode::InterfaceCast => {
                let interface = self.r.get_object_index()?;
                self.decode_operand(depth)?;
                TokenKind::InterfaceCast { interface }
            }
            Opcode::PrimitiveCast => {
                let cast = self.r.get_u8()?;
                self.decode_operand(depth)?;
                TokenKind::PrimitiveCast { cast }
            }
            Opcode::Skip => {
                let size = self.r.get_u16()?;
                self.decode_operand(depth)?;
                TokenKind::Skip { size }
            }
            Opcode::EndFunctionParms => TokenKind::EndFunctionParms,
            Opcode::SelfObject => TokenKind::SelfObject,
            Opcode::VirtualFunction => {
                let (name, _) = self.r.get_name_index()?;
                self.decode_call_args(depth)?;
                TokenKind::VirtualFunction { name }
            }
            Opcode::FinalFunction => {
                let object = self.r.get_object_index()?;
                self.decode_call_args(depth)?;
                TokenKind::FinalFunction { object }
            }
            Opcode::GlobalFunction => {
                let (name, _) = self.r.get_name_index()?;
                self.decode_call_args(depth)?;
                TokenKind::GlobalFunction { name }
            }
            Opcode::DelegateFunction => {
                let (name, _) = self.r.get_name_index()?;
                self.decode_call_args(depth)?;
                TokenKind::DelegateFunction { name }
            }
            Opcode::DelegateProperty => {
                let (name, _) = self.r.get_name_index()?;
                TokenKind::DelegateProperty { name }
            }
            Opcode::IntConst => TokenKind::IntConst { value: self.r.get_i32()? },
            Opcode::FloatConst => TokenKind::FloatConst { value: self.r.get_f32()? },
            Opcode::StringConst => TokenKind::StringConst { value: self.r.get_string()? },
            Opcode::UnicodeStringConst => {
                TokenKind::UnicodeStringConst { value: self.r.get_unicode_string()? }
            }
            Opcode::ObjectConst => TokenKind::ObjectConst { object: self.r.get_object_index()? },
            Opcode::NameConst => {
                let (name, _) = self.r.get_name_index()?;
                TokenKind::NameConst { name }
            }
            Opcode::RotatorConst => TokenKind::RotatorConst {
                pitch: self.r.get_i32()?,
                yaw: self.r.get_i32()?,
                roll: self.r.get_i32()?,
            },
            Opcode::VectorConst => TokenKind::VectorConst {
                x: self.r.get_f32()?,
                y: self.r.get_f32()?,
                z: self.r.get_f32()?,
            },
            Opcode::ByteConst => TokenKind::ByteConst { value: self.r.get_u8()? },
            Opcode::IntZero => TokenKind::IntZero,
            Opcode::IntOne => TokenKind::IntOne,
            Opcode::True => TokenKind::True,
            Opcode::False => TokenKind::False,
            Opcode::NativeParm => TokenKind::NativeParm { object: self.r.get_object_index()? },
            Opcode::NoObject => TokenKind::NoObject,
            Opcode::IntConstByte => TokenKind::IntConstByte { value: self.r.get_u8()? },
            Opcode::BoolVariable => {
                self.decode_operand(depth)?;
                TokenKind::BoolVariable
            }
            Opcode::Iterator => {
                self.decode_operand(depth)?;
                let end = self.r.get_u16()?;
                TokenKind::Iterator { end }
            }
            Opcode::IteratorPop => TokenKind::IteratorPop,
            Opcode::IteratorNext => TokenKind::IteratorNext,
            Opcode::StructCmpEq => {
                let object = self.r.get_object_index()?;
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::StructCmpEq { object }
            }
            Opcode::StructCmpNe => {
                let object = self.r.get_object_index()?;
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::StructCmpNe { object }
            }
            Opcode::StructMember => {
                let property = self.r.get_object_index()?;
                let parent = self.r.get_object_index()?;
                if self.build.package_version >= VER_STRUCT_MEMBER_FLAGS {
                    let _copy = self.r.get_u8()?;
                    let _modify = self.r.get_u8()?;
                }
                self.decode_operand(depth)?;
                TokenKind::StructMember { property, parent }
            }
            Opcode::DynArrayLength => {
                self.decode_operand(depth)?;
                TokenKind::DynArrayLength
            }
            Opcode::DynArrayInsert => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::DynArrayInsert
            }
            Opcode::DynArrayRemove => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                TokenKind::DynArrayRemove
            }
            Opcode::Conditional => {
                self.decode_operand(depth)?;
                let skip_true = self.r.get_u16()?;
                let before = self.r.position();
                self.decode_operand(depth)?;
                self.validate_skip(position, skip_true, before);
                let skip_false = self.r.get_u16()?;
                let before = self.r.position();
                self.decode_operand(depth)?;
                self.validate_skip(position, skip_false, before);
                TokenKind::Conditional { skip_true, skip_false }
            }
            Opcode::DebugInfo => TokenKind::DebugInfo {
                version: self.r.get_u32()?,
                line: self.r.get_u32()?,
                pos: self.r.get_u32()?,
                marker: self.r.get_u8()?,
            },
            Opcode::FilterScope => {
                let end = self.r.get_u16()?;
                TokenKind::FilterScope { end }
            }
            Opcode::EndOfScript => TokenKind::EndOfScript,
            Opcode::ArrayIterator => {
                self.decode_operand(depth)?;
                self.decode_operand(depth)?;
                let with_index = self.r.get_u8()? != 0;
                if with_index {
                    self.decode_operand(depth)?;
                }
                let end = self.r.get_u16()?;
                TokenKind::ArrayIterator { end, with_index }
            }
        })
    }

    /// The ternary's skip fields exist to validate structure only; a
    /// mismatch is logged, never propagated into the output.
    fn validate_skip(&self, position: u32, declared: u16, before: usize) {
        let consumed = self.r.position() - before;
        if consumed != declared as usize {
            log::debug!(
                "conditional at 0x{position:04X}: skip field {declared} != {consumed} consumed"
            );
        }
    }
}
