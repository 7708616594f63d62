use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod nest;
mod reader;
mod render;
mod tables;
mod token;

pub use reader::ScriptReader;
pub use render::disassemble;
pub use tables::{
    CASE_DEFAULT, EXTENDED_NATIVE_START, FIRST_NATIVE, LOOP_CONTINUE_OFFSET, NativeDesc,
    NativeKind, Opcode, OpcodeTable, VER_NAME_NUMBER, VER_STRUCT_MEMBER_FLAGS,
    VER_WIDE_OBJECT_INDEX, cast_type_name,
};
pub use token::{DecodedBody, LabelDirEntry, MAX_OPERAND_DEPTH, Token, TokenKind, decode_body};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    Pseudo,
    Disasm,
}

/// Engine lineage of a package. Together with the version pair this
/// selects the opcode dispatch table and the handful of field-layout
/// gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildFamily {
    Mainline,
    Legacy,
    Stormfall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub package_version: u16,
    pub licensee_version: u16,
    pub family: BuildFamily,
}

impl Default for BuildDescriptor {
    fn default() -> Self {
        Self {
            package_version: 512,
            licensee_version: 0,
            family: BuildFamily::Mainline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    /// Annotate structural keywords with jump-offset provenance comments.
    pub annotate_jumps: bool,
    /// See `LOOP_CONTINUE_OFFSET`.
    pub loop_continue_offset: u32,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: DecompileMode::Pseudo,
            annotate_jumps: true,
            loop_continue_offset: LOOP_CONTINUE_OFFSET,
        }
    }
}

/// Hard per-body failures. Everything recoverable is a `Diagnostic`
/// instead; a failed body never affects its siblings.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unexpected end of script at offset 0x{0:04X}")]
    Eof(usize),

    #[error("truncated instruction at 0x{pos:04X} (need {need} bytes, {remaining} remaining)")]
    Truncated {
        pos: usize,
        need: usize,
        remaining: usize,
    },

    #[error("malformed compact index at offset 0x{0:04X}")]
    MalformedCompactIndex(usize),

    #[error("operand nesting too deep at offset 0x{0:04X}")]
    OperandDepthExceeded(usize),
}

/// Recoverable oddities surfaced alongside the rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    UnknownOpcode { op: u8 },
    UnknownNative { index: u16 },
    UnknownCast { code: u8 },
    UnbalancedScope,
    OrphanCase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub position: u32,
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::UnknownOpcode { op } => {
                write!(f, "unrecognized opcode 0x{op:02X} at 0x{:04X}", self.position)
            }
            DiagnosticKind::UnknownNative { index } => {
                write!(f, "no native descriptor for index {index} at 0x{:04X}", self.position)
            }
            DiagnosticKind::UnknownCast { code } => {
                write!(f, "no destination type for cast 0x{code:02X} at 0x{:04X}", self.position)
            }
            DiagnosticKind::UnbalancedScope => {
                write!(f, "crossing scopes at 0x{:04X}", self.position)
            }
            DiagnosticKind::OrphanCase => {
                write!(f, "case marker outside any switch at 0x{:04X}", self.position)
            }
        }
    }
}

/// Symbol lookups supplied by the container's object graph. Implementations
/// must be safe to share across bodies decompiled in parallel.
pub trait SymbolResolver {
    /// Name of an object-table entry (functions, properties, classes).
    fn object_name(&self, index: i32) -> Option<String>;

    /// Name-table entry.
    fn name(&self, index: u32) -> Option<String>;

    /// Enum member for a byte value, when the given property is enum-typed.
    fn enum_member(&self, property: i32, value: u8) -> Option<String> {
        let _ = (property, value);
        None
    }
}

/// Resolver with no symbol information; every reference renders as a
/// placeholder.
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn object_name(&self, _index: i32) -> Option<String> {
        None
    }

    fn name(&self, _index: u32) -> Option<String> {
        None
    }
}

/// One decompiled script body: best-effort structured text plus whatever
/// recoverable oddities were seen along the way.
#[derive(Debug, Clone)]
pub struct Decompilation {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

fn run_one(
    bytes: &[u8],
    build: &BuildDescriptor,
    table: &OpcodeTable,
    symbols: &dyn SymbolResolver,
    options: &DecompileOptions,
) -> Result<Decompilation, ScriptError> {
    let decoded = token::decode_body(bytes, build, table)?;
    Ok(match options.mode {
        DecompileMode::Pseudo => render::render_body(decoded, table, symbols, options),
        DecompileMode::Disasm => Decompilation {
            text: render::disassemble(&decoded.tokens),
            diagnostics: decoded.diagnostics,
        },
    })
}

/// Decompiles one script body. `Err` means the stream itself could not be
/// decoded (truncation, malformed size fields); every structural ambiguity
/// short of that degrades into the rendered text and `diagnostics`.
pub fn decompile_body(
    bytes: &[u8],
    build: &BuildDescriptor,
    symbols: &dyn SymbolResolver,
    options: &DecompileOptions,
) -> Result<Decompilation, ScriptError> {
    let table = OpcodeTable::for_build(build);
    run_one(bytes, build, &table, symbols, options)
}

/// Raw disassembly of one script body.
pub fn disassemble_body(bytes: &[u8], build: &BuildDescriptor) -> Result<String, ScriptError> {
    let table = OpcodeTable::for_build(build);
    let decoded = token::decode_body(bytes, build, &table)?;
    Ok(render::disassemble(&decoded.tokens))
}

/// Decompiles many bodies against one dispatch table. Failures are
/// isolated per body: a truncated body yields its own `Err` without
/// touching the others.
pub fn decompile_many(
    bodies: &[&[u8]],
    build: &BuildDescriptor,
    symbols: &dyn SymbolResolver,
    options: &DecompileOptions,
) -> Vec<Result<Decompilation, ScriptError>> {
    let table = OpcodeTable::for_build(build);
    bodies
        .iter()
        .map(|bytes| run_one(bytes, build, &table, symbols, options))
        .collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;

    use crate::SymbolResolver;

    /// Byte-stream assembler for hand-built script fixtures.
    pub struct Asm {
        pub bytes: Vec<u8>,
    }

    impl Asm {
        pub fn new() -> Self {
            Self { bytes: Vec::new() }
        }

        pub fn op(&mut self, op: u8) -> &mut Self {
            self.bytes.push(op);
            self
        }

        pub fn u16(&mut self, v: u16) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u32(&mut self, v: u32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn i32(&mut self, v: i32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn f32(&mut self, v: f32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        /// Name reference for the default test build: index plus number.
        pub fn name(&mut self, index: u32) -> &mut Self {
            self.u32(index).u32(0)
        }

        pub fn here(&self) -> u16 {
            self.bytes.len() as u16
        }
    }

    #[derive(Default)]
    pub struct TestSymbols {
        pub objects: HashMap<i32, &'static str>,
        pub names: HashMap<u32, &'static str>,
        pub enums: HashMap<(i32, u8), &'static str>,
    }

    impl SymbolResolver for TestSymbols {
        fn object_name(&self, index: i32) -> Option<String> {
            self.objects.get(&index).map(|s| s.to_string())
        }

        fn name(&self, index: u32) -> Option<String> {
            self.names.get(&index).map(|s| s.to_string())
        }

        fn enum_member(&self, property: i32, value: u8) -> Option<String> {
            self.enums.get(&(property, value)).map(|s| s.to_string())
        }
    }

    /// Symbols shared by the render fixtures.
    pub fn symbols() -> TestSymbols {
        let mut s = TestSymbols::default();
        s.objects.insert(1, "a");
        s.objects.insert(2, "b");
        s.objects.insert(3, "c");
        s.objects.insert(5, "Health");
        s.objects.insert(8, "Team");
        s.objects.insert(12, "Fire");
        s.objects.insert(20, "AllActors");
        s.names.insert(7, "Begin");
        s.names.insert(9, "Reload");
        s.enums.insert((8, 0), "TEAM_Red");
        s.enums.insert((8, 1), "TEAM_Blue");
        s
    }
}
