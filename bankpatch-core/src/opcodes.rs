use serde::{Deserialize, Serialize};

/// 65816 instruction mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Bra,
    Brk,
    Brl,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cop,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jml,
    Jmp,
    Jsl,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Mvn,
    Mvp,
    Nop,
    Ora,
    Pea,
    Pei,
    Per,
    Pha,
    Phb,
    Phd,
    Phk,
    Php,
    Phx,
    Phy,
    Pla,
    Plb,
    Pld,
    Plp,
    Plx,
    Ply,
    Rep,
    Rol,
    Ror,
    Rti,
    Rtl,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sep,
    Sta,
    Stp,
    Stx,
    Sty,
    Stz,
    Tax,
    Tay,
    Tcd,
    Tcs,
    Tdc,
    Trb,
    Tsb,
    Tsc,
    Tsx,
    Txa,
    Txs,
    Txy,
    Tya,
    Tyx,
    Wai,
    Wdm,
    Xba,
    Xce,
}

impl Mnemonic {
    /// Instructions after which execution never falls through.
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(
            self,
            Mnemonic::Jmp
                | Mnemonic::Jml
                | Mnemonic::Bra
                | Mnemonic::Brl
                | Mnemonic::Rts
                | Mnemonic::Rtl
                | Mnemonic::Rti
        )
    }
}

/// Addressing modes. Immediate width is explicit so that an instruction's
/// encoded length never depends on the processor's M/X flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressingMode {
    /// Implied or accumulator.
    NoArg,
    Imm8,
    Imm16,
    /// `$dp`
    Dir,
    /// `$dp,X`
    DirX,
    /// `$dp,Y`
    DirY,
    /// `($dp)`
    DirInd,
    /// `($dp,X)`
    DirIndX,
    /// `($dp),Y`
    DirIndY,
    /// `[$dp]`
    DirIndLng,
    /// `[$dp],Y`
    DirIndLngY,
    /// `$sr,S`
    StackRel,
    /// `($sr,S),Y`
    StackRelIndY,
    /// `$addr`
    Abs,
    /// `$addr,X`
    AbsX,
    /// `$addr,Y`
    AbsY,
    /// `($addr)`
    AbsInd,
    /// `($addr,X)`
    AbsIndX,
    /// `[$addr]`
    AbsIndLng,
    /// `$long`
    Lng,
    /// `$long,X`
    LngX,
    /// 8-bit signed displacement.
    Rel8,
    /// 16-bit signed displacement.
    Rel16,
    /// `MVN`/`MVP`: low byte destination bank, high byte source bank.
    BlockMove,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode.
    pub fn operand_len(self) -> usize {
        use AddressingMode::*;
        match self {
            NoArg => 0,
            Imm8 | Dir | DirX | DirY | DirInd | DirIndX | DirIndY | DirIndLng | DirIndLngY
            | StackRel | StackRelIndY | Rel8 => 1,
            Imm16 | Abs | AbsX | AbsY | AbsInd | AbsIndX | AbsIndLng | Rel16 | BlockMove => 2,
            Lng | LngX => 3,
        }
    }

    /// Opcode byte plus operand bytes.
    pub fn encoded_len(self) -> usize {
        1 + self.operand_len()
    }
}

// Column offsets of the regular ALU group (ORA AND EOR ADC STA LDA CMP SBC).
fn alu_offset(mode: AddressingMode) -> Option<u8> {
    use AddressingMode::*;
    Some(match mode {
        DirIndX => 0x01,
        StackRel => 0x03,
        Dir => 0x05,
        DirIndLng => 0x07,
        Imm8 | Imm16 => 0x09,
        Abs => 0x0D,
        Lng => 0x0F,
        DirIndY => 0x11,
        DirInd => 0x12,
        StackRelIndY => 0x13,
        DirX => 0x15,
        DirIndLngY => 0x17,
        AbsY => 0x19,
        AbsX => 0x1D,
        LngX => 0x1F,
        _ => return None,
    })
}

// Column offsets of the shift/rotate group (ASL ROL LSR ROR).
fn shift_offset(mode: AddressingMode) -> Option<u8> {
    use AddressingMode::*;
    Some(match mode {
        Dir => 0x06,
        NoArg => 0x0A,
        Abs => 0x0E,
        DirX => 0x16,
        AbsX => 0x1E,
        _ => return None,
    })
}

/// Opcode byte for a mnemonic/mode pair, or `None` when the 65816 has no such
/// encoding.
pub fn opcode_for(mnemonic: Mnemonic, mode: AddressingMode) -> Option<u8> {
    use AddressingMode::*;
    use Mnemonic::*;

    let alu_base = match mnemonic {
        Ora => Some(0x00),
        And => Some(0x20),
        Eor => Some(0x40),
        Adc => Some(0x60),
        Sta => Some(0x80),
        Lda => Some(0xA0),
        Cmp => Some(0xC0),
        Sbc => Some(0xE0),
        _ => None,
    };
    if let Some(base) = alu_base {
        // STA #imm does not exist; that slot is BIT #imm.
        if mnemonic == Sta && matches!(mode, Imm8 | Imm16) {
            return None;
        }
        return alu_offset(mode).map(|off| base + off);
    }

    let shift_base = match mnemonic {
        Asl => Some(0x00),
        Rol => Some(0x20),
        Lsr => Some(0x40),
        Ror => Some(0x60),
        _ => None,
    };
    if let Some(base) = shift_base {
        return shift_offset(mode).map(|off| base + off);
    }

    let op = match (mnemonic, mode) {
        (Bcc, Rel8) => 0x90,
        (Bcs, Rel8) => 0xB0,
        (Beq, Rel8) => 0xF0,
        (Bmi, Rel8) => 0x30,
        (Bne, Rel8) => 0xD0,
        (Bpl, Rel8) => 0x10,
        (Bra, Rel8) => 0x80,
        (Bvc, Rel8) => 0x50,
        (Bvs, Rel8) => 0x70,
        (Brl, Rel16) => 0x82,
        (Per, Rel16) => 0x62,

        (Bit, Imm8 | Imm16) => 0x89,
        (Bit, Dir) => 0x24,
        (Bit, Abs) => 0x2C,
        (Bit, DirX) => 0x34,
        (Bit, AbsX) => 0x3C,

        (Dec, NoArg) => 0x3A,
        (Dec, Dir) => 0xC6,
        (Dec, Abs) => 0xCE,
        (Dec, DirX) => 0xD6,
        (Dec, AbsX) => 0xDE,
        (Inc, NoArg) => 0x1A,
        (Inc, Dir) => 0xE6,
        (Inc, Abs) => 0xEE,
        (Inc, DirX) => 0xF6,
        (Inc, AbsX) => 0xFE,

        (Cpx, Imm8 | Imm16) => 0xE0,
        (Cpx, Dir) => 0xE4,
        (Cpx, Abs) => 0xEC,
        (Cpy, Imm8 | Imm16) => 0xC0,
        (Cpy, Dir) => 0xC4,
        (Cpy, Abs) => 0xCC,

        (Ldx, Imm8 | Imm16) => 0xA2,
        (Ldx, Dir) => 0xA6,
        (Ldx, Abs) => 0xAE,
        (Ldx, DirY) => 0xB6,
        (Ldx, AbsY) => 0xBE,
        (Ldy, Imm8 | Imm16) => 0xA0,
        (Ldy, Dir) => 0xA4,
        (Ldy, Abs) => 0xAC,
        (Ldy, DirX) => 0xB4,
        (Ldy, AbsX) => 0xBC,
        (Stx, Dir) => 0x86,
        (Stx, Abs) => 0x8E,
        (Stx, DirY) => 0x96,
        (Sty, Dir) => 0x84,
        (Sty, Abs) => 0x8C,
        (Sty, DirX) => 0x94,
        (Stz, Dir) => 0x64,
        (Stz, DirX) => 0x74,
        (Stz, Abs) => 0x9C,
        (Stz, AbsX) => 0x9E,

        (Trb, Dir) => 0x14,
        (Trb, Abs) => 0x1C,
        (Tsb, Dir) => 0x04,
        (Tsb, Abs) => 0x0C,

        (Jmp, Abs) => 0x4C,
        (Jmp, AbsInd) => 0x6C,
        (Jmp, AbsIndX) => 0x7C,
        (Jmp | Jml, Lng) => 0x5C,
        (Jmp | Jml, AbsIndLng) => 0xDC,
        (Jsr, Abs) => 0x20,
        (Jsr, AbsIndX) => 0xFC,
        (Jsr | Jsl, Lng) => 0x22,

        (Rep, Imm8) => 0xC2,
        (Sep, Imm8) => 0xE2,
        (Brk, Imm8) => 0x00,
        (Cop, Imm8) => 0x02,
        (Wdm, Imm8) => 0x42,
        (Pea, Imm16 | Abs) => 0xF4,
        (Pei, DirInd) => 0xD4,
        (Mvn, BlockMove) => 0x54,
        (Mvp, BlockMove) => 0x44,

        (Rti, NoArg) => 0x40,
        (Rtl, NoArg) => 0x6B,
        (Rts, NoArg) => 0x60,
        (Clc, NoArg) => 0x18,
        (Cld, NoArg) => 0xD8,
        (Cli, NoArg) => 0x58,
        (Clv, NoArg) => 0xB8,
        (Sec, NoArg) => 0x38,
        (Sed, NoArg) => 0xF8,
        (Sei, NoArg) => 0x78,
        (Dex, NoArg) => 0xCA,
        (Dey, NoArg) => 0x88,
        (Inx, NoArg) => 0xE8,
        (Iny, NoArg) => 0xC8,
        (Nop, NoArg) => 0xEA,
        (Pha, NoArg) => 0x48,
        (Phb, NoArg) => 0x8B,
        (Phd, NoArg) => 0x0B,
        (Phk, NoArg) => 0x4B,
        (Php, NoArg) => 0x08,
        (Phx, NoArg) => 0xDA,
        (Phy, NoArg) => 0x5A,
        (Pla, NoArg) => 0x68,
        (Plb, NoArg) => 0xAB,
        (Pld, NoArg) => 0x2B,
        (Plp, NoArg) => 0x28,
        (Plx, NoArg) => 0xFA,
        (Ply, NoArg) => 0x7A,
        (Tax, NoArg) => 0xAA,
        (Tay, NoArg) => 0xA8,
        (Tcd, NoArg) => 0x5B,
        (Tcs, NoArg) => 0x1B,
        (Tdc, NoArg) => 0x7B,
        (Tsc, NoArg) => 0x3B,
        (Tsx, NoArg) => 0xBA,
        (Txa, NoArg) => 0x8A,
        (Txs, NoArg) => 0x9A,
        (Txy, NoArg) => 0x9B,
        (Tya, NoArg) => 0x98,
        (Tyx, NoArg) => 0xBB,
        (Wai, NoArg) => 0xCB,
        (Stp, NoArg) => 0xDB,
        (Xba, NoArg) => 0xEB,
        (Xce, NoArg) => 0xFB,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::AddressingMode as AM;
    use super::Mnemonic as M;
    use super::*;

    #[test]
    fn alu_group_matches_known_encodings() {
        assert_eq!(opcode_for(M::Lda, AM::LngX), Some(0xBF));
        assert_eq!(opcode_for(M::Lda, AM::AbsX), Some(0xBD));
        assert_eq!(opcode_for(M::Ora, AM::LngX), Some(0x1F));
        assert_eq!(opcode_for(M::Sta, AM::Dir), Some(0x85));
        assert_eq!(opcode_for(M::Cmp, AM::Imm8), Some(0xC9));
        assert_eq!(opcode_for(M::Sbc, AM::Imm8), Some(0xE9));
        assert_eq!(opcode_for(M::Sta, AM::Imm8), None);
    }

    #[test]
    fn irregular_encodings() {
        assert_eq!(opcode_for(M::Asl, AM::NoArg), Some(0x0A));
        assert_eq!(opcode_for(M::Dec, AM::NoArg), Some(0x3A));
        assert_eq!(opcode_for(M::Jml, AM::Lng), Some(0x5C));
        assert_eq!(opcode_for(M::Jmp, AM::Lng), Some(0x5C));
        assert_eq!(opcode_for(M::Jsr, AM::AbsIndX), Some(0xFC));
        assert_eq!(opcode_for(M::Jsl, AM::Lng), Some(0x22));
        assert_eq!(opcode_for(M::Tsb, AM::Abs), Some(0x0C));
        assert_eq!(opcode_for(M::Ldx, AM::Imm16), Some(0xA2));
        assert_eq!(opcode_for(M::Bcs, AM::Rel8), Some(0xB0));
        assert_eq!(opcode_for(M::Tax, AM::Abs), None);
    }

    #[test]
    fn lengths_are_static_per_mode() {
        assert_eq!(AM::NoArg.encoded_len(), 1);
        assert_eq!(AM::Imm8.encoded_len(), 2);
        assert_eq!(AM::Imm16.encoded_len(), 3);
        assert_eq!(AM::AbsX.encoded_len(), 3);
        assert_eq!(AM::LngX.encoded_len(), 4);
        assert_eq!(AM::Rel8.encoded_len(), 2);
        assert_eq!(AM::Rel16.encoded_len(), 3);
    }
}
