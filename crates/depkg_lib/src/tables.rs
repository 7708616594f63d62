use std::collections::HashMap;

use crate::{BuildDescriptor, BuildFamily};

/// Object references widen from compact indices to plain i32 here.
pub const VER_WIDE_OBJECT_INDEX: u16 = 178;
/// Name references gain an instance-number field here.
pub const VER_NAME_NUMBER: u16 = 343;
/// StructMember gains two access-flag bytes here.
pub const VER_STRUCT_MEMBER_FLAGS: u16 = 300;

/// Distance between an explicit `continue` jump's target and the loop end:
/// the compiler places the iteration step this many bytes before the loop's
/// re-test. Compiler-specific; overridable through
/// `DecompileOptions::loop_continue_offset`. A body where it misfires falls
/// back to a literal `goto`.
pub const LOOP_CONTINUE_OFFSET: u32 = 10;

/// First opcode of the two-byte extended native encoding.
pub const EXTENDED_NATIVE_START: u8 = 0x60;
/// Opcodes at or above this value are direct native indices.
pub const FIRST_NATIVE: u8 = 0x70;
/// Size of the primary (non-native) opcode space.
pub const PRIMARY_OPCODE_COUNT: usize = 0x60;

/// Case link value marking the `default` case.
pub const CASE_DEFAULT: u16 = 0xFFFF;

/// Instruction selector for the primary opcode space. The decoder matches
/// on this exhaustively; adding a variant forces every consumer to handle
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LocalVariable,
    InstanceVariable,
    DefaultVariable,
    StateVariable,
    Return,
    Switch,
    Jump,
    JumpIfNot,
    Stop,
    Assert,
    Case,
    Nothing,
    LabelDirectory,
    GotoLabel,
    EatReturnValue,
    Let,
    DynArrayElement,
    New,
    ClassContext,
    MetaCast,
    LetBool,
    Skip,
    EndFunctionParms,
    SelfObject,
    Context,
    ArrayElement,
    VirtualFunction,
    FinalFunction,
    IntConst,
    FloatConst,
    StringConst,
    ObjectConst,
    NameConst,
    RotatorConst,
    VectorConst,
    ByteConst,
    IntZero,
    IntOne,
    True,
    False,
    NativeParm,
    NoObject,
    IntConstByte,
    BoolVariable,
    DynamicCast,
    Iterator,
    IteratorPop,
    IteratorNext,
    StructCmpEq,
    StructCmpNe,
    UnicodeStringConst,
    StructMember,
    DynArrayLength,
    GlobalFunction,
    PrimitiveCast,
    DynArrayInsert,
    ReturnNothing,
    DynArrayRemove,
    DelegateFunction,
    DelegateProperty,
    LetDelegate,
    Conditional,
    DebugInfo,
    FilterScope,
    InterfaceCast,
    EndOfScript,
    ArrayIterator,
}

/// Mainline opcode assignments. Builds start from this table and patch it.
static MAINLINE_OPCODES: &[(u8, Opcode)] = &[
    (0x00, Opcode::LocalVariable),
    (0x01, Opcode::InstanceVariable),
    (0x02, Opcode::DefaultVariable),
    (0x03, Opcode::StateVariable),
    (0x04, Opcode::Return),
    (0x05, Opcode::Switch),
    (0x06, Opcode::Jump),
    (0x07, Opcode::JumpIfNot),
    (0x08, Opcode::Stop),
    (0x09, Opcode::Assert),
    (0x0A, Opcode::Case),
    (0x0B, Opcode::Nothing),
    (0x0C, Opcode::LabelDirectory),
    (0x0D, Opcode::GotoLabel),
    (0x0E, Opcode::EatReturnValue),
    (0x0F, Opcode::Let),
    (0x10, Opcode::DynArrayElement),
    (0x11, Opcode::New),
    (0x12, Opcode::ClassContext),
    (0x13, Opcode::MetaCast),
    (0x14, Opcode::LetBool),
    (0x15, Opcode::Skip),
    (0x16, Opcode::EndFunctionParms),
    (0x17, Opcode::SelfObject),
    (0x19, Opcode::Context),
    (0x1A, Opcode::ArrayElement),
    (0x1B, Opcode::VirtualFunction),
    (0x1C, Opcode::FinalFunction),
    (0x1D, Opcode::IntConst),
    (0x1E, Opcode::FloatConst),
    (0x1F, Opcode::StringConst),
    (0x20, Opcode::ObjectConst),
    (0x21, Opcode::NameConst),
    (0x22, Opcode::RotatorConst),
    (0x23, Opcode::VectorConst),
    (0x24, Opcode::ByteConst),
    (0x25, Opcode::IntZero),
    (0x26, Opcode::IntOne),
    (0x27, Opcode::True),
    (0x28, Opcode::False),
    (0x29, Opcode::NativeParm),
    (0x2A, Opcode::NoObject),
    (0x2C, Opcode::IntConstByte),
    (0x2D, Opcode::BoolVariable),
    (0x2E, Opcode::DynamicCast),
    (0x2F, Opcode::Iterator),
    (0x30, Opcode::IteratorPop),
    (0x31, Opcode::IteratorNext),
    (0x32, Opcode::StructCmpEq),
    (0x33, Opcode::StructCmpNe),
    (0x34, Opcode::UnicodeStringConst),
    (0x35, Opcode::StructMember),
    (0x36, Opcode::DynArrayLength),
    (0x37, Opcode::GlobalFunction),
    (0x38, Opcode::PrimitiveCast),
    (0x39, Opcode::DynArrayInsert),
    (0x3A, Opcode::ReturnNothing),
    (0x3B, Opcode::DynArrayRemove),
    (0x3C, Opcode::DelegateFunction),
    (0x3D, Opcode::DelegateProperty),
    (0x3E, Opcode::LetDelegate),
    (0x41, Opcode::Conditional),
    (0x42, Opcode::DebugInfo),
    (0x43, Opcode::FilterScope),
    (0x44, Opcode::InterfaceCast),
    (0x47, Opcode::EndOfScript),
    (0x48, Opcode::ArrayIterator),
];

/// Legacy packages predate the ternary instruction; 0x41 is their debug
/// marker and 0x42 is unassigned.
static LEGACY_PATCHES: &[(u8, Option<Opcode>)] = &[
    (0x41, Some(Opcode::DebugInfo)),
    (0x42, None),
];

/// The Stormfall fork shipped with Switch and Case swapped.
static STORMFALL_PATCHES: &[(u8, Option<Opcode>)] = &[
    (0x05, Some(Opcode::Case)),
    (0x0A, Some(Opcode::Switch)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    Function,
    Operator { symbol: &'static str, precedence: u8 },
    PreOperator { symbol: &'static str },
    PostOperator { symbol: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeDesc {
    pub index: u16,
    pub name: &'static str,
    pub kind: NativeKind,
}

const fn op(index: u16, name: &'static str, symbol: &'static str, precedence: u8) -> NativeDesc {
    NativeDesc {
        index,
        name,
        kind: NativeKind::Operator { symbol, precedence },
    }
}

const fn func(index: u16, name: &'static str) -> NativeDesc {
    NativeDesc {
        index,
        name,
        kind: NativeKind::Function,
    }
}

static MAINLINE_NATIVES: &[NativeDesc] = &[
    op(0x70, "Concat_StrStr", "$", 40),
    func(0x71, "GotoState"),
    op(0x72, "EqEq_ObjObj", "==", 24),
    op(0x73, "NotEq_ObjObj", "!=", 26),
    op(0x74, "EqEq_IntInt", "==", 24),
    op(0x75, "Less_IntInt", "<", 24),
    op(0x76, "Greater_IntInt", ">", 24),
    op(0x77, "LessEq_IntInt", "<=", 24),
    op(0x78, "GreaterEq_IntInt", ">=", 24),
    op(0x79, "Add_IntInt", "+", 20),
    op(0x7A, "Subtract_IntInt", "-", 20),
    op(0x7B, "Multiply_IntInt", "*", 16),
    op(0x7C, "Divide_IntInt", "/", 16),
    op(0x7D, "Percent_IntInt", "%", 18),
    op(0x7E, "AndAnd_BoolBool", "&&", 30),
    op(0x7F, "OrOr_BoolBool", "||", 32),
    NativeDesc { index: 0x80, name: "Not_PreBool", kind: NativeKind::PreOperator { symbol: "!" } },
    NativeDesc { index: 0x81, name: "Subtract_PreInt", kind: NativeKind::PreOperator { symbol: "-" } },
    NativeDesc { index: 0x82, name: "AddAdd_Int", kind: NativeKind::PostOperator { symbol: "++" } },
    NativeDesc { index: 0x83, name: "SubtractSubtract_Int", kind: NativeKind::PostOperator { symbol: "--" } },
    NativeDesc { index: 0x84, name: "AddAdd_PreInt", kind: NativeKind::PreOperator { symbol: "++" } },
    NativeDesc { index: 0x85, name: "SubtractSubtract_PreInt", kind: NativeKind::PreOperator { symbol: "--" } },
    func(0x86, "Abs"),
    func(0x87, "Sqrt"),
    func(0x88, "Rand"),
    func(0x89, "Min"),
    func(0x8A, "Max"),
    func(0x8B, "Clamp"),
    func(0x8C, "Log"),
    func(0x8D, "Len"),
    func(0x8E, "Mid"),
    func(0x8F, "InStr"),
    // Extended range, reached through the 0x60..0x6F prefix encoding.
    func(0x100, "VSize"),
    func(0x101, "Normal"),
    op(0x102, "Dot_VectorVector", "dot", 16),
    func(0x12C, "PlaySound"),
];

/// Stormfall moved integer addition; 0x79 is unassigned there.
static STORMFALL_NATIVES: &[NativeDesc] = &[op(0x90, "Add_IntInt", "+", 20)];
static STORMFALL_NATIVE_REMOVALS: &[u16] = &[0x79];

/// Per-build dispatch table. Assembled once per container load from the
/// static declarations above and read-only afterwards.
pub struct OpcodeTable {
    primary: [Option<Opcode>; PRIMARY_OPCODE_COUNT],
    natives: HashMap<u16, &'static NativeDesc>,
}

impl OpcodeTable {
    pub fn for_build(build: &BuildDescriptor) -> Self {
        let mut primary = [None; PRIMARY_OPCODE_COUNT];
        for &(code, kind) in MAINLINE_OPCODES {
            primary[code as usize] = Some(kind);
        }
        let patches: &[(u8, Option<Opcode>)] = match build.family {
            BuildFamily::Mainline => &[],
            BuildFamily::Legacy => LEGACY_PATCHES,
            BuildFamily::Stormfall => STORMFALL_PATCHES,
        };
        for &(code, kind) in patches {
            primary[code as usize] = kind;
        }

        let mut natives: HashMap<u16, &'static NativeDesc> = MAINLINE_NATIVES
            .iter()
            .map(|d| (d.index, d))
            .collect();
        if build.family == BuildFamily::Stormfall {
            for index in STORMFALL_NATIVE_REMOVALS {
                natives.remove(index);
            }
            for d in STORMFALL_NATIVES {
                natives.insert(d.index, d);
            }
        }

        Self { primary, natives }
    }

    /// Selector for a primary-space opcode; `None` for unassigned bytes.
    pub fn opcode(&self, code: u8) -> Option<Opcode> {
        self.primary.get(code as usize).copied().flatten()
    }

    pub fn native(&self, index: u16) -> Option<&'static NativeDesc> {
        self.natives.get(&index).copied()
    }
}

/// Primitive-cast destination types. An unknown code is a loud diagnostic,
/// never silently rendered as something else.
pub fn cast_type_name(code: u8) -> Option<&'static str> {
    Some(match code {
        0x01 | 0x05 | 0x07 | 0x09 | 0x15 => "int",
        0x02 | 0x04 | 0x08 | 0x16 => "float",
        0x03 | 0x06 => "byte",
        0x0A | 0x0B | 0x0C | 0x17 | 0x18 | 0x19 => "bool",
        0x0E | 0x0F | 0x10 | 0x11 | 0x12 | 0x13 | 0x14 | 0x1A => "string",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(family: BuildFamily) -> BuildDescriptor {
        BuildDescriptor {
            package_version: 512,
            licensee_version: 0,
            family,
        }
    }

    #[test]
    fn mainline_assignments() {
        let t = OpcodeTable::for_build(&descriptor(BuildFamily::Mainline));
        assert_eq!(t.opcode(0x05), Some(Opcode::Switch));
        assert_eq!(t.opcode(0x0A), Some(Opcode::Case));
        assert_eq!(t.opcode(0x41), Some(Opcode::Conditional));
        assert_eq!(t.opcode(0x5F), None);
    }

    #[test]
    fn legacy_reassigns_debug_marker() {
        let t = OpcodeTable::for_build(&descriptor(BuildFamily::Legacy));
        assert_eq!(t.opcode(0x41), Some(Opcode::DebugInfo));
        assert_eq!(t.opcode(0x42), None);
    }

    #[test]
    fn stormfall_swaps_switch_and_case() {
        let t = OpcodeTable::for_build(&descriptor(BuildFamily::Stormfall));
        assert_eq!(t.opcode(0x05), Some(Opcode::Case));
        assert_eq!(t.opcode(0x0A), Some(Opcode::Switch));
    }

    #[test]
    fn stormfall_remaps_integer_addition() {
        let t = OpcodeTable::for_build(&descriptor(BuildFamily::Stormfall));
        assert!(t.native(0x79).is_none());
        let d = t.native(0x90).expect("remapped native");
        assert_eq!(d.name, "Add_IntInt");

        let mainline = OpcodeTable::for_build(&descriptor(BuildFamily::Mainline));
        assert!(mainline.native(0x79).is_some());
        assert!(mainline.native(0x90).is_none());
    }

    #[test]
    fn extended_natives_resolve() {
        let t = OpcodeTable::for_build(&descriptor(BuildFamily::Mainline));
        assert_eq!(t.native(0x100).unwrap().name, "VSize");
        assert_eq!(t.native(0x12C).unwrap().name, "PlaySound");
        assert!(t.native(0xF0).is_none());
    }

    #[test]
    fn cast_table_covers_known_codes() {
        assert_eq!(cast_type_name(0x04), Some("float"));
        assert_eq!(cast_type_name(0x0E), Some("string"));
        assert_eq!(cast_type_name(0x7F), None);
    }
}
