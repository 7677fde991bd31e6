use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::layout::parse_number;
use crate::opcodes::{opcode_for, AddressingMode, Mnemonic};

/// Errors that can occur while encoding a routine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("{mnemonic:?} has no {mode:?} encoding")]
    InvalidMode {
        mnemonic: Mnemonic,
        mode: AddressingMode,
    },

    #[error("{mnemonic:?} {mode:?} expects {expected} operand bytes")]
    OperandMismatch {
        mnemonic: Mnemonic,
        mode: AddressingMode,
        expected: usize,
    },

    #[error("operand {value:#X} does not fit {mnemonic:?} {mode:?}")]
    OperandOutOfRange {
        mnemonic: Mnemonic,
        mode: AddressingMode,
        value: u32,
    },

    #[error("branch to '{label}' needs displacement {displacement}, outside {min}..={max}")]
    BranchOutOfRange {
        label: String,
        displacement: i64,
        min: i64,
        max: i64,
    },

    #[error("label '{0}' is not defined")]
    UnknownLabel(String),

    #[error("label '{0}' is defined more than once")]
    DuplicateLabel(String),

    #[error("label '{label}' cannot be used as a {mode:?} operand")]
    LabelNotAddressable {
        label: String,
        mode: AddressingMode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Operand {
    Value(u32),
    Label(String),
}

// Strings starting with `$` or `0x` are numbers, anything else names a label.
impl<'de> Deserialize<'de> for Operand {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u32),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Int(v) => Ok(Operand::Value(v)),
            Raw::Text(t) if t.starts_with('$') || t.starts_with("0x") => parse_number(&t)
                .ok()
                .and_then(|v| u32::try_from(v).ok())
                .map(Operand::Value)
                .ok_or_else(|| serde::de::Error::custom(format!("bad operand '{}'", t))),
            Raw::Text(t) => Ok(Operand::Label(t)),
        }
    }
}

impl From<u32> for Operand {
    fn from(value: u32) -> Self {
        Operand::Value(value)
    }
}

impl From<&str> for Operand {
    fn from(label: &str) -> Self {
        Operand::Label(label.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Mnemonic,
    pub mode: AddressingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<Operand>,
}

impl Instruction {
    pub fn new(op: Mnemonic, mode: AddressingMode, arg: Operand) -> Self {
        Instruction {
            op,
            mode,
            arg: Some(arg),
        }
    }

    pub fn value(op: Mnemonic, mode: AddressingMode, value: u32) -> Self {
        Instruction::new(op, mode, Operand::Value(value))
    }

    pub fn with_label(op: Mnemonic, mode: AddressingMode, label: &str) -> Self {
        Instruction::new(op, mode, Operand::Label(label.to_string()))
    }

    pub fn implied(op: Mnemonic) -> Self {
        Instruction {
            op,
            mode: AddressingMode::NoArg,
            arg: None,
        }
    }

    pub fn opcode(&self) -> Result<u8, AsmError> {
        opcode_for(self.op, self.mode).ok_or(AsmError::InvalidMode {
            mnemonic: self.op,
            mode: self.mode,
        })
    }

    pub fn len(&self) -> usize {
        self.mode.encoded_len()
    }
}

/// One entry of a routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Item {
    Instr(Instruction),
    Label(String),
    Bytes(Vec<u8>),
}

impl From<Instruction> for Item {
    fn from(instr: Instruction) -> Self {
        Item::Instr(instr)
    }
}

/// A symbolic routine. It has no address until it is assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Routine {
    items: Vec<Item>,
}

impl From<Vec<Item>> for Routine {
    fn from(items: Vec<Item>) -> Self {
        Routine { items }
    }
}

impl Routine {
    pub fn new() -> Self {
        Routine { items: Vec::new() }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn push(&mut self, item: impl Into<Item>) {
        self.items.push(item.into());
    }

    pub fn extend<I: IntoIterator<Item = Item>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub fn op(mut self, op: Mnemonic, mode: AddressingMode, value: u32) -> Self {
        self.push(Instruction::value(op, mode, value));
        self
    }

    /// Instruction whose operand is the address of `label`.
    pub fn op_label(mut self, op: Mnemonic, mode: AddressingMode, label: &str) -> Self {
        self.push(Instruction::with_label(op, mode, label));
        self
    }

    pub fn implied(mut self, op: Mnemonic) -> Self {
        self.push(Instruction::implied(op));
        self
    }

    /// Short (8-bit displacement) branch to a label.
    pub fn branch(self, op: Mnemonic, label: &str) -> Self {
        self.op_label(op, AddressingMode::Rel8, label)
    }

    pub fn label(mut self, name: &str) -> Self {
        self.items.push(Item::Label(name.to_string()));
        self
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.items.push(Item::Bytes(bytes.to_vec()));
        self
    }

    /// True when the last thing emitted is an instruction that never falls
    /// through. Trailing labels are ignored; trailing raw bytes are not, so a
    /// return must be written as an instruction rather than a byte literal.
    pub fn ends_with_unconditional_transfer(&self) -> bool {
        match self
            .items
            .iter()
            .rev()
            .find(|item| !matches!(item, Item::Label(_)))
        {
            Some(Item::Instr(instr)) => instr.op.is_unconditional_transfer(),
            _ => false,
        }
    }

    /// Pass one: byte offset of every label and the total length. Lengths
    /// come from the addressing mode alone, never from operand values.
    pub fn layout(&self) -> Result<(usize, HashMap<String, usize>), AsmError> {
        let mut offset = 0usize;
        let mut labels = HashMap::new();

        for item in &self.items {
            match item {
                Item::Label(name) => {
                    if labels.insert(name.clone(), offset).is_some() {
                        return Err(AsmError::DuplicateLabel(name.clone()));
                    }
                }
                Item::Instr(instr) => {
                    instr.opcode()?;
                    offset += instr.len();
                }
                Item::Bytes(bytes) => offset += bytes.len(),
            }
        }

        Ok((offset, labels))
    }

    pub fn encoded_len(&self) -> Result<usize, AsmError> {
        Ok(self.layout()?.0)
    }
}

/// Bytes of a routine placed at `origin`, with the absolute address of every
/// label it defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRoutine {
    pub origin: u32,
    pub bytes: Vec<u8>,
    pub labels: HashMap<String, u32>,
}

impl AssembledRoutine {
    pub fn label(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }
}

/// Assemble `routine` to run at CPU address `origin`.
pub fn assemble(routine: &Routine, origin: u32) -> Result<AssembledRoutine, AsmError> {
    assemble_with(routine, origin, &HashMap::new())
}

/// Like [`assemble`], resolving labels the routine does not define against
/// `externals` (absolute CPU addresses).
pub fn assemble_with(
    routine: &Routine,
    origin: u32,
    externals: &HashMap<String, u32>,
) -> Result<AssembledRoutine, AsmError> {
    let (len, offsets) = routine.layout()?;
    let labels: HashMap<String, u32> = offsets
        .iter()
        .map(|(name, off)| (name.clone(), origin + *off as u32))
        .collect();

    let mut out = Vec::with_capacity(len);
    for item in routine.items() {
        match item {
            Item::Label(_) => {}
            Item::Bytes(bytes) => out.extend_from_slice(bytes),
            Item::Instr(instr) => {
                let pc = origin + out.len() as u32;
                encode(instr, pc, &labels, externals, &mut out)?;
            }
        }
    }

    debug_assert_eq!(out.len(), len);
    log::debug!("assembled {} bytes at {:#08X}", out.len(), origin);

    Ok(AssembledRoutine {
        origin,
        bytes: out,
        labels,
    })
}

fn encode(
    instr: &Instruction,
    pc: u32,
    labels: &HashMap<String, u32>,
    externals: &HashMap<String, u32>,
    out: &mut Vec<u8>,
) -> Result<(), AsmError> {
    let opcode = instr.opcode()?;
    let width = instr.mode.operand_len();

    let value = match (&instr.arg, width) {
        (None, 0) => {
            out.push(opcode);
            return Ok(());
        }
        (Some(Operand::Value(v)), w) if w > 0 => *v,
        (Some(Operand::Label(name)), w) if w > 0 => {
            let target = labels
                .get(name)
                .or_else(|| externals.get(name))
                .copied()
                .ok_or_else(|| AsmError::UnknownLabel(name.clone()))?;
            resolve_label(instr, name, target, pc)?
        }
        _ => {
            return Err(AsmError::OperandMismatch {
                mnemonic: instr.op,
                mode: instr.mode,
                expected: width,
            })
        }
    };

    let limit = (1u64 << (8 * width)) - 1;
    if u64::from(value) > limit {
        return Err(AsmError::OperandOutOfRange {
            mnemonic: instr.op,
            mode: instr.mode,
            value,
        });
    }

    out.push(opcode);
    out.extend_from_slice(&value.to_le_bytes()[..width]);
    Ok(())
}

// Turn a label's absolute address into the operand value for this mode.
fn resolve_label(instr: &Instruction, name: &str, target: u32, pc: u32) -> Result<u32, AsmError> {
    let mode = instr.mode;
    match mode {
        AddressingMode::Rel8 | AddressingMode::Rel16 => {
            let (min, max, mask) = if mode == AddressingMode::Rel8 {
                (i64::from(i8::MIN), i64::from(i8::MAX), 0xFF)
            } else {
                (i64::from(i16::MIN), i64::from(i16::MAX), 0xFFFF)
            };
            let next = i64::from(pc) + instr.len() as i64;
            let displacement = i64::from(target) - next;
            if displacement < min || displacement > max {
                return Err(AsmError::BranchOutOfRange {
                    label: name.to_string(),
                    displacement,
                    min,
                    max,
                });
            }
            Ok((displacement as u32) & mask)
        }
        AddressingMode::BlockMove => Err(AsmError::LabelNotAddressable {
            label: name.to_string(),
            mode,
        }),
        // Bank-local modes take the low 16 bits.
        _ if mode.operand_len() == 2 => Ok(target & 0xFFFF),
        _ => Ok(target),
    }
}
