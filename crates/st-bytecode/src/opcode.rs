//! The closed instruction set executed by the interpreter.
//!
//! Opcode numbering is fixed at the values used by the reference engine's
//! `Bytecode.Instruction` table (`INSTR_LOAD_STR = 1` through
//! `INSTR_WRITE_LOCAL = 48`), not because anything here needs binary
//! compatibility with that engine, but because the numbering is the de
//! facto documentation of the instruction set and a disassembler that used
//! different numbers than every textbook description of StringTemplate
//! bytecode would just be confusing to read. Slot 23 (`PASSTHRU_IND`) is
//! reserved and intentionally unimplemented.

use std::fmt;

/// The shape of an instruction's operands, used by the disassembler to
/// decide how many 16-bit words follow the opcode byte and how to render
/// them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandType {
    None,
    /// Index into the template's `StringTable`.
    String,
    /// Absolute bytecode address (branch target).
    Addr,
    /// A raw integer (argument count, option count).
    Int,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Opcode {
    LoadStr = 1,
    LoadAttr = 2,
    LoadLocal = 3,
    LoadProp = 4,
    LoadPropInd = 5,
    StoreOption = 6,
    StoreArg = 7,
    New = 8,
    NewInd = 9,
    NewBoxArgs = 10,
    SuperNew = 11,
    SuperNewBoxArgs = 12,
    Write = 13,
    WriteOpt = 14,
    Map = 15,
    RotMap = 16,
    ZipMap = 17,
    Br = 18,
    Brf = 19,
    Options = 20,
    Args = 21,
    Passthru = 22,
    // 23 reserved: PassthruInd, never implemented.
    List = 24,
    Add = 25,
    ToStr = 26,
    First = 27,
    Last = 28,
    Rest = 29,
    Trunc = 30,
    Strip = 31,
    Trim = 32,
    Length = 33,
    StrLen = 34,
    Reverse = 35,
    Not = 36,
    Or = 37,
    And = 38,
    Indent = 39,
    Dedent = 40,
    Newline = 41,
    Noop = 42,
    Pop = 43,
    Null = 44,
    True = 45,
    False = 46,
    WriteStr = 47,
    WriteLocal = 48,
}

/// Metadata for one opcode: its mnemonic and the operand shapes that follow
/// it in the bytecode stream.
#[derive(Clone, Copy, Debug)]
pub struct InstructionMeta {
    pub name: &'static str,
    pub operands: &'static [OperandType],
}

impl Opcode {
    pub const MAX_OPERANDS: usize = 2;

    /// Decode a raw opcode byte, returning `None` for 0, 23, or any value
    /// above 48 (the closed set documented at the top of this module).
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            1 => LoadStr,
            2 => LoadAttr,
            3 => LoadLocal,
            4 => LoadProp,
            5 => LoadPropInd,
            6 => StoreOption,
            7 => StoreArg,
            8 => New,
            9 => NewInd,
            10 => NewBoxArgs,
            11 => SuperNew,
            12 => SuperNewBoxArgs,
            13 => Write,
            14 => WriteOpt,
            15 => Map,
            16 => RotMap,
            17 => ZipMap,
            18 => Br,
            19 => Brf,
            20 => Options,
            21 => Args,
            22 => Passthru,
            24 => List,
            25 => Add,
            26 => ToStr,
            27 => First,
            28 => Last,
            29 => Rest,
            30 => Trunc,
            31 => Strip,
            32 => Trim,
            33 => Length,
            34 => StrLen,
            35 => Reverse,
            36 => Not,
            37 => Or,
            38 => And,
            39 => Indent,
            40 => Dedent,
            41 => Newline,
            42 => Noop,
            43 => Pop,
            44 => Null,
            45 => True,
            46 => False,
            47 => WriteStr,
            48 => WriteLocal,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn meta(self) -> InstructionMeta {
        use OperandType::*;
        use Opcode::*;
        let (name, operands): (&str, &[OperandType]) = match self {
            LoadStr => ("load_str", &[String]),
            LoadAttr => ("load_attr", &[String]),
            LoadLocal => ("load_local", &[Int]),
            LoadProp => ("load_prop", &[String]),
            LoadPropInd => ("load_prop_ind", &[]),
            StoreOption => ("store_option", &[Int]),
            StoreArg => ("store_arg", &[String]),
            New => ("new", &[String, Int]),
            NewInd => ("new_ind", &[Int]),
            NewBoxArgs => ("new_box_args", &[String]),
            SuperNew => ("super_new", &[String, Int]),
            SuperNewBoxArgs => ("super_new_box_args", &[String]),
            Write => ("write", &[]),
            WriteOpt => ("write_opt", &[]),
            Map => ("map", &[]),
            RotMap => ("rot_map", &[Int]),
            ZipMap => ("zip_map", &[Int]),
            Br => ("br", &[Addr]),
            Brf => ("brf", &[Addr]),
            Options => ("options", &[]),
            Args => ("args", &[]),
            Passthru => ("passthru", &[String]),
            List => ("list", &[]),
            Add => ("add", &[]),
            ToStr => ("tostr", &[]),
            First => ("first", &[]),
            Last => ("last", &[]),
            Rest => ("rest", &[]),
            Trunc => ("trunc", &[]),
            Strip => ("strip", &[]),
            Trim => ("trim", &[]),
            Length => ("length", &[]),
            StrLen => ("strlen", &[]),
            Reverse => ("reverse", &[]),
            Not => ("not", &[]),
            Or => ("or", &[]),
            And => ("and", &[]),
            Indent => ("indent", &[String]),
            Dedent => ("dedent", &[]),
            Newline => ("newline", &[]),
            Noop => ("noop", &[]),
            Pop => ("pop", &[]),
            Null => ("null", &[]),
            True => ("true", &[]),
            False => ("false", &[]),
            WriteStr => ("write_str", &[String]),
            WriteLocal => ("write_local", &[Int]),
        };
        InstructionMeta { name, operands }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.meta().name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_valid_byte() {
        for b in 1u8..=48 {
            if b == 23 {
                assert!(Opcode::from_u8(b).is_none());
                continue;
            }
            let op = Opcode::from_u8(b).unwrap_or_else(|| panic!("missing opcode for {b}"));
            assert_eq!(op.as_u8(), b);
        }
    }

    #[test]
    fn rejects_reserved_and_out_of_range() {
        assert!(Opcode::from_u8(0).is_none());
        assert!(Opcode::from_u8(23).is_none());
        assert!(Opcode::from_u8(49).is_none());
        assert!(Opcode::from_u8(255).is_none());
    }

    #[test]
    fn new_has_two_operands() {
        let meta = Opcode::New.meta();
        assert_eq!(meta.name, "new");
        assert_eq!(meta.operands.len(), 2);
    }
}
