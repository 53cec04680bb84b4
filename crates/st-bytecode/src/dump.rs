//! Disassembler: renders a code buffer as a column-aligned, optionally
//! colorized listing, one instruction per line.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use st_core::{Colors, StringTable};

use crate::module::{iter_instructions, DecodedInstruction};
use crate::opcode::OperandType;

/// Precomputed layout shared across every line of a dump: every address
/// that is some branch's target gets a label, and the address column width
/// is fixed to the widest address up front so instructions line up.
struct DumpContext<'a> {
    strings: &'a StringTable,
    labels: BTreeMap<u16, String>,
    addr_width: usize,
}

impl<'a> DumpContext<'a> {
    fn build(code: &[u8], strings: &'a StringTable) -> Self {
        let mut labels = BTreeMap::new();
        let mut next = 0usize;
        for instr in iter_instructions(code) {
            for (operand, kind) in instr.operands.iter().zip(instr.opcode.meta().operands) {
                if *kind == OperandType::Addr {
                    let label = format!("L{next}");
                    labels.entry(*operand).or_insert_with(|| {
                        next += 1;
                        label
                    });
                }
            }
        }
        let addr_width = format!("{}", code.len()).len();
        Self { strings, labels, addr_width }
    }
}

/// Render `code` as human-readable bytecode listing text.
pub fn disassemble(code: &[u8], strings: &StringTable, colors: Colors) -> String {
    let ctx = DumpContext::build(code, strings);
    let mut out = String::new();
    for instr in iter_instructions(code) {
        write_line(&mut out, &instr, &ctx, colors);
    }
    out
}

fn write_line(out: &mut String, instr: &DecodedInstruction, ctx: &DumpContext<'_>, c: Colors) {
    let meta = instr.opcode.meta();
    if let Some(label) = ctx.labels.get(&instr.addr) {
        let _ = writeln!(out, "{}:", label);
    }
    let _ = write!(
        out,
        "{dim}{addr:>width$}{reset}  {blue}{name}{reset}",
        dim = c.dim,
        addr = instr.addr,
        width = ctx.addr_width,
        reset = c.reset,
        blue = c.blue,
        name = meta.name,
    );
    for (operand, kind) in instr.operands.iter().zip(meta.operands) {
        match kind {
            OperandType::String => {
                let text = ctx
                    .strings
                    .try_resolve(st_core::StringSym::from_raw(*operand))
                    .unwrap_or("<?>");
                let _ = write!(out, "  {green}{text:?}{reset}", green = c.green, reset = c.reset);
            }
            OperandType::Addr => {
                let label = ctx.labels.get(operand).map(String::as_str).unwrap_or("?");
                let _ = write!(out, "  {label}");
            }
            OperandType::Int => {
                let _ = write!(out, "  {operand}");
            }
            OperandType::None => unreachable!("meta() never lists None among operands"),
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Assembler;
    use crate::opcode::Opcode;

    #[test]
    fn renders_a_load_str_write_sequence() {
        let mut strings = StringTable::new();
        let sym = strings.intern("hi");
        let mut asm = Assembler::new();
        asm.emit1(Opcode::LoadStr, sym.as_u16());
        asm.emit0(Opcode::Write);
        let out = disassemble(&asm.into_bytes(), &strings, Colors::OFF);
        assert!(out.contains("load_str"));
        assert!(out.contains("\"hi\""));
        assert!(out.contains("write"));
    }

    #[test]
    fn labels_branch_targets() {
        let mut strings = StringTable::new();
        let mut asm = Assembler::new();
        let br = asm.emit1(Opcode::Br, 0);
        asm.emit0(Opcode::Noop);
        let target = asm.here();
        asm.patch_addr(br, target);
        let out = disassemble(&asm.into_bytes(), &strings, Colors::OFF);
        assert!(out.contains("L0:"));
        assert!(out.contains("br  L0"));
        let _ = &mut strings;
    }
}
