//! Bytecode decoding. Instructions are decoded one at a time from the raw
//! code array; shortcut forms (`iload_0`, `goto_w`, `wide`-prefixed) are
//! normalized into their generic operands during decode so every opcode
//! family has a single handler.

use crate::descriptor::AllocationType;
use crate::error::VmError;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

pub mod opcodes;

use opcodes::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    /// Local variable slot or constant pool index.
    Index(u16),
    /// Constant pool index plus a count (invokeinterface, multianewarray).
    IndexCount(u16, u8),
    /// Immediate int pushed on the stack (iconst/bipush/sipush).
    Immediate(i32),
    WideImmediate(i64),
    FloatImmediate(f32),
    DoubleImmediate(f64),
    /// Branch offset relative to the opcode address.
    Branch(i32),
    /// Local slot plus increment (iinc).
    IndexImmediate(u16, i32),
    /// Element kind for newarray.
    ArrayKind(AllocationType),
    Table(TableSwitchData),
    Lookup(LookupSwitchData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSwitchData {
    pub default_offset: i32,
    pub low: i32,
    pub high: i32,
    pub offsets: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupSwitchData {
    pub default_offset: i32,
    pub pairs: Vec<(i32, i32)>,
}

/// One decoded instruction: the dispatch opcode, its encoded byte size and
/// its normalized operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: u8,
    pub size: usize,
    pub operand: Operand,
}

impl Instruction {
    pub fn index(&self) -> Result<u16, VmError> {
        match self.operand {
            Operand::Index(idx) => Ok(idx),
            _ => Err(self.operand_panic("index")),
        }
    }

    pub fn index_count(&self) -> Result<(u16, u8), VmError> {
        match self.operand {
            Operand::IndexCount(idx, count) => Ok((idx, count)),
            _ => Err(self.operand_panic("index+count")),
        }
    }

    pub fn immediate(&self) -> Result<i32, VmError> {
        match self.operand {
            Operand::Immediate(value) => Ok(value),
            _ => Err(self.operand_panic("immediate")),
        }
    }

    pub fn branch(&self) -> Result<i32, VmError> {
        match self.operand {
            Operand::Branch(offset) => Ok(offset),
            _ => Err(self.operand_panic("branch")),
        }
    }

    pub fn index_immediate(&self) -> Result<(u16, i32), VmError> {
        match self.operand {
            Operand::IndexImmediate(idx, value) => Ok((idx, value)),
            _ => Err(self.operand_panic("index+immediate")),
        }
    }

    pub fn array_kind(&self) -> Result<AllocationType, VmError> {
        match self.operand {
            Operand::ArrayKind(kind) => Ok(kind),
            _ => Err(self.operand_panic("array kind")),
        }
    }

    fn operand_panic(&self, expected: &str) -> VmError {
        VmError::Panic(format!(
            "opcode {:#04x} decoded without {expected} operand",
            self.opcode
        ))
    }

    /// Decodes the instruction starting at `pc`. `pc` must point at an opcode
    /// byte; anything else is a malformed method and surfaces as a panic
    /// error, not a VM exception.
    pub fn read_at(code: &[u8], pc: usize) -> Result<Instruction, VmError> {
        let malformed = || VmError::Panic(format!("truncated bytecode at pc {pc}"));
        let opcode = *code.get(pc).ok_or_else(malformed)?;
        let mut cursor = Cursor::new(&code[pc + 1..]);

        macro_rules! read {
            ($method:ident) => {
                cursor.$method::<BigEndian>().map_err(|_| malformed())?
            };
        }

        let insn = match opcode {
            NOP | ACONST_NULL | IALOAD..=SALOAD | IASTORE..=SASTORE | POP..=SWAP
            | IADD..=LXOR | I2L..=DCMPG | IRETURN..=RETURN | ARRAYLENGTH | ATHROW
            | MONITORENTER | MONITOREXIT => Instruction {
                opcode,
                size: 1,
                operand: Operand::None,
            },
            ICONST_M1..=ICONST_5 => Instruction {
                opcode,
                size: 1,
                operand: Operand::Immediate(opcode as i32 - ICONST_0 as i32),
            },
            LCONST_0 | LCONST_1 => Instruction {
                opcode,
                size: 1,
                operand: Operand::WideImmediate((opcode - LCONST_0) as i64),
            },
            FCONST_0..=FCONST_2 => Instruction {
                opcode,
                size: 1,
                operand: Operand::FloatImmediate((opcode - FCONST_0) as f32),
            },
            DCONST_0 | DCONST_1 => Instruction {
                opcode,
                size: 1,
                operand: Operand::DoubleImmediate((opcode - DCONST_0) as f64),
            },
            BIPUSH => Instruction {
                opcode,
                size: 2,
                operand: Operand::Immediate(cursor.read_i8().map_err(|_| malformed())? as i32),
            },
            SIPUSH => Instruction {
                opcode,
                size: 3,
                operand: Operand::Immediate(read!(read_i16) as i32),
            },
            LDC => Instruction {
                opcode,
                size: 2,
                operand: Operand::Index(cursor.read_u8().map_err(|_| malformed())? as u16),
            },
            LDC_W | LDC2_W => Instruction {
                opcode,
                size: 3,
                operand: Operand::Index(read!(read_u16)),
            },
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Instruction {
                opcode,
                size: 2,
                operand: Operand::Index(cursor.read_u8().map_err(|_| malformed())? as u16),
            },
            ILOAD_0..=ALOAD_3 => {
                let base = opcode - ILOAD_0;
                Instruction {
                    opcode,
                    size: 1,
                    operand: Operand::Index((base % 4) as u16),
                }
            }
            ISTORE_0..=ASTORE_3 => {
                let base = opcode - ISTORE_0;
                Instruction {
                    opcode,
                    size: 1,
                    operand: Operand::Index((base % 4) as u16),
                }
            }
            IINC => {
                let idx = cursor.read_u8().map_err(|_| malformed())? as u16;
                let value = cursor.read_i8().map_err(|_| malformed())? as i32;
                Instruction {
                    opcode,
                    size: 3,
                    operand: Operand::IndexImmediate(idx, value),
                }
            }
            IFEQ..=IF_ACMPNE | GOTO | JSR | IFNULL | IFNONNULL => Instruction {
                opcode,
                size: 3,
                operand: Operand::Branch(read!(read_i16) as i32),
            },
            GOTO_W | JSR_W => Instruction {
                opcode,
                size: 5,
                operand: Operand::Branch(read!(read_i32)),
            },
            TABLESWITCH => {
                let padding = (4 - (pc + 1) % 4) % 4;
                for _ in 0..padding {
                    cursor.read_u8().map_err(|_| malformed())?;
                }
                let default_offset = read!(read_i32);
                let low = read!(read_i32);
                let high = read!(read_i32);
                if high < low {
                    return Err(VmError::Panic(format!(
                        "tableswitch with high {high} < low {low} at pc {pc}"
                    )));
                }
                let count = (high - low + 1) as usize;
                let mut offsets = Vec::with_capacity(count);
                for _ in 0..count {
                    offsets.push(read!(read_i32));
                }
                Instruction {
                    opcode,
                    size: 1 + padding + 12 + count * 4,
                    operand: Operand::Table(TableSwitchData {
                        default_offset,
                        low,
                        high,
                        offsets,
                    }),
                }
            }
            LOOKUPSWITCH => {
                let padding = (4 - (pc + 1) % 4) % 4;
                for _ in 0..padding {
                    cursor.read_u8().map_err(|_| malformed())?;
                }
                let default_offset = read!(read_i32);
                let count = read!(read_i32);
                if count < 0 {
                    return Err(VmError::Panic(format!(
                        "lookupswitch with negative pair count at pc {pc}"
                    )));
                }
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = read!(read_i32);
                    let offset = read!(read_i32);
                    pairs.push((key, offset));
                }
                Instruction {
                    opcode,
                    size: 1 + padding + 8 + count as usize * 8,
                    operand: Operand::Lookup(LookupSwitchData {
                        default_offset,
                        pairs,
                    }),
                }
            }
            GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Instruction {
                opcode,
                size: 3,
                operand: Operand::Index(read!(read_u16)),
            },
            INVOKEDYNAMIC => {
                let idx = read!(read_u16);
                // Two reserved zero bytes follow the index.
                Instruction {
                    opcode,
                    size: 5,
                    operand: Operand::Index(idx),
                }
            }
            INVOKEINTERFACE => {
                let idx = read!(read_u16);
                let count = cursor.read_u8().map_err(|_| malformed())?;
                Instruction {
                    opcode,
                    size: 5,
                    operand: Operand::IndexCount(idx, count),
                }
            }
            NEWARRAY => {
                let tag = cursor.read_u8().map_err(|_| malformed())?;
                let kind = AllocationType::try_from(tag).map_err(|_| {
                    VmError::Panic(format!("newarray with bad element tag {tag} at pc {pc}"))
                })?;
                Instruction {
                    opcode,
                    size: 2,
                    operand: Operand::ArrayKind(kind),
                }
            }
            MULTIANEWARRAY => {
                let idx = read!(read_u16);
                let dims = cursor.read_u8().map_err(|_| malformed())?;
                Instruction {
                    opcode,
                    size: 4,
                    operand: Operand::IndexCount(idx, dims),
                }
            }
            WIDE => {
                let widened = cursor.read_u8().map_err(|_| malformed())?;
                let idx = read!(read_u16);
                match widened {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Instruction {
                        opcode: widened,
                        size: 4,
                        operand: Operand::Index(idx),
                    },
                    IINC => {
                        let value = read!(read_i16) as i32;
                        Instruction {
                            opcode: IINC,
                            size: 6,
                            operand: Operand::IndexImmediate(idx, value),
                        }
                    }
                    other => {
                        return Err(VmError::Panic(format!(
                            "wide prefix on opcode {other:#04x} at pc {pc}"
                        )));
                    }
                }
            }
            other => {
                return Err(VmError::Panic(format!(
                    "unknown opcode {other:#04x} at pc {pc}"
                )));
            }
        };
        Ok(insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_shortcut_loads_and_stores() {
        let code = [ILOAD_2, ALOAD_0, DSTORE_3, ISTORE, 0x11];
        let insn = Instruction::read_at(&code, 0).unwrap();
        assert_eq!(insn.opcode, ILOAD_2);
        assert_eq!(insn.operand, Operand::Index(2));
        assert_eq!(insn.size, 1);

        let insn = Instruction::read_at(&code, 1).unwrap();
        assert_eq!(insn.operand, Operand::Index(0));

        let insn = Instruction::read_at(&code, 2).unwrap();
        assert_eq!(insn.operand, Operand::Index(3));

        let insn = Instruction::read_at(&code, 3).unwrap();
        assert_eq!(insn.operand, Operand::Index(0x11));
        assert_eq!(insn.size, 2);
    }

    #[test]
    fn decodes_wide_forms() {
        let code = [WIDE, ILOAD, 0x01, 0x00, WIDE, IINC, 0x01, 0x02, 0xff, 0x38];
        let insn = Instruction::read_at(&code, 0).unwrap();
        assert_eq!(insn.opcode, ILOAD);
        assert_eq!(insn.operand, Operand::Index(0x0100));
        assert_eq!(insn.size, 4);

        let insn = Instruction::read_at(&code, 4).unwrap();
        assert_eq!(insn.opcode, IINC);
        assert_eq!(insn.operand, Operand::IndexImmediate(0x0102, -200));
        assert_eq!(insn.size, 6);
    }

    #[test]
    fn decodes_tableswitch_with_padding() {
        // tableswitch at pc 0: three padding bytes, default 28, low 1, high 2.
        let mut code = vec![TABLESWITCH, 0x00, 0x00, 0x00];
        code.extend_from_slice(&28i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&2i32.to_be_bytes());
        code.extend_from_slice(&16i32.to_be_bytes());
        code.extend_from_slice(&20i32.to_be_bytes());

        let insn = Instruction::read_at(&code, 0).unwrap();
        let Operand::Table(table) = &insn.operand else {
            panic!("expected table operand");
        };
        assert_eq!(table.default_offset, 28);
        assert_eq!(table.offsets, vec![16, 20]);
        assert_eq!(insn.size, code.len());
    }

    #[test]
    fn decodes_lookupswitch_pairs() {
        // lookupswitch at pc 3: no padding needed.
        let mut code = vec![NOP, NOP, NOP, LOOKUPSWITCH];
        code.extend_from_slice(&12i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&7i32.to_be_bytes());
        code.extend_from_slice(&24i32.to_be_bytes());

        let insn = Instruction::read_at(&code, 3).unwrap();
        let Operand::Lookup(lookup) = &insn.operand else {
            panic!("expected lookup operand");
        };
        assert_eq!(lookup.default_offset, 12);
        assert_eq!(lookup.pairs, vec![(7, 24)]);
        assert_eq!(insn.size, 17);
    }

    #[test]
    fn rejects_unknown_opcodes() {
        assert!(Instruction::read_at(&[0xfe], 0).is_err());
        assert!(Instruction::read_at(&[GOTO, 0x00], 0).is_err());
    }
}
