//! Human-readable chunk dumps, used by tests and debug logging.

use std::fmt::Write;

use crate::op::{Op, Operand};
use crate::{Chunk, Constant};

impl Chunk {
    /// Render the whole instruction stream, one instruction per line.
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!("== {} ==\n", name);
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_at(&mut out, offset);
        }
        out
    }

    fn disassemble_at(&self, out: &mut String, offset: usize) -> usize {
        let _ = write!(out, "{:04} ", offset);
        let byte = self.code[offset];
        let op = match Op::decode(byte) {
            Some(op) => op,
            None => {
                let _ = writeln!(out, "??? ({:#04x})", byte);
                return offset + 1;
            }
        };
        match op.operand() {
            Operand::None => {
                let _ = writeln!(out, "{}", op);
                offset + 1
            }
            Operand::Byte => {
                let operand = self.code[offset + 1];
                let _ = write!(out, "{} {}", op, operand);
                if op == Op::Constant || op == Op::Closure {
                    let _ = write!(out, " ({})", self.render_constant(operand));
                }
                let _ = writeln!(out);
                offset + 2
            }
            Operand::TwoBytes => {
                let a = self.code[offset + 1];
                let b = self.code[offset + 2];
                let _ = writeln!(out, "{} {} {}", op, a, b);
                offset + 3
            }
            Operand::Short => {
                let distance =
                    u16::from_be_bytes([self.code[offset + 1], self.code[offset + 2]]) as usize;
                let target = if op == Op::Loop {
                    offset + 3 - distance
                } else {
                    offset + 3 + distance
                };
                let _ = writeln!(out, "{} {} -> {:04}", op, distance, target);
                offset + 3
            }
        }
    }

    fn render_constant(&self, idx: u8) -> String {
        match self.constants.get(idx as usize) {
            Some(Constant::Int(v)) => v.to_string(),
            Some(Constant::Real(bits)) => f64::from_bits(*bits).to_string(),
            Some(Constant::Str(s)) => format!("{:?}", s.as_str()),
            Some(Constant::Function(f)) => {
                format!("<fn {}>", f.name.as_deref().unwrap_or("anonymous"))
            }
            None => "<out of range>".to_string(),
        }
    }
}
