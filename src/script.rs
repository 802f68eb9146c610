//! Bitcoin Script container, parser and builders
//! Reference: https://en.bitcoin.it/wiki/Script
//!
//! A [`Script`] is an opaque byte string. Parsing into [`Instruction`]s is
//! lazy and happens only when the script is disassembled or executed.

use std::fmt;
use std::io::Cursor;

use crate::encoding::{read_bytes, read_len, write_var_bytes};
use crate::error::{LedgerError, Result};
use crate::interpreter::ScriptError;
use crate::opcodes::{
    OP_0, OP_1, OP_1NEGATE, OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160,
    OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4, op_from_name, op_name,
};
use crate::scriptnum::encode_num;

/// One parsed script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Data push, from a direct length byte, `OP_0` or `OP_PUSHDATA1/2/4`
    Push(&'a [u8]),
    /// Any other opcode
    Op(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Script(Vec<u8>);

impl Script {
    #[must_use]
    pub const fn new() -> Self {
        Script(Vec::new())
    }

    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a VarInt-length-prefixed script from the wire
    pub fn decode(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<Self> {
        let len = read_len(cursor, field)?;
        Ok(Script(read_bytes(cursor, len, field)?))
    }

    /// Append the VarInt-length-prefixed script to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        write_var_bytes(out, &self.0)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.0.len() + 3);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Concatenate two scripts
    #[must_use]
    pub fn concat(&self, other: &Script) -> Script {
        let mut bytes = Vec::with_capacity(self.0.len() + other.0.len());
        bytes.extend_from_slice(&self.0);
        bytes.extend_from_slice(&other.0);
        Script(bytes)
    }

    /// Iterate over `(offset, instruction)` pairs. A truncated push yields one
    /// error and ends the iteration.
    #[must_use]
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            bytes: &self.0,
            pos: 0,
            done: false,
        }
    }

    // -------------------------------------------------------------------------
    // Builders

    #[must_use]
    pub fn push_opcode(mut self, op: u8) -> Self {
        self.0.push(op);
        self
    }

    /// Push data with the shortest available push form
    #[must_use]
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        let len = data.len();
        match len {
            0 => self.0.push(OP_0),
            1..=0x4b => self.0.push(len as u8),
            0x4c..=0xff => {
                self.0.push(OP_PUSHDATA1);
                self.0.push(len as u8);
            }
            0x100..=0xffff => {
                self.0.push(OP_PUSHDATA2);
                self.0.extend_from_slice(&(len as u16).to_le_bytes());
            }
            _ => {
                // Anything past u32::MAX could not be length-prefixed by encode() either
                self.0.push(OP_PUSHDATA4);
                self.0.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Push an integer, using `OP_0`, `OP_1NEGATE` and `OP_1..=OP_16` where possible
    #[must_use]
    pub fn push_int(self, n: i64) -> Self {
        match n {
            0 => self.push_opcode(OP_0),
            -1 => self.push_opcode(OP_1NEGATE),
            1..=16 => self.push_opcode(OP_1 + (n as u8) - 1),
            _ => self.push_slice(&encode_num(n)),
        }
    }

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    #[must_use]
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        Script::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
    }

    /// Unlocking script for [`Script::p2pkh`]: `<sig> <pubkey>`
    #[must_use]
    pub fn p2pkh_unlock(signature_der: &[u8], pubkey_sec: &[u8]) -> Self {
        Script::new().push_slice(signature_der).push_slice(pubkey_sec)
    }

    /// `m <pubkey>... n OP_CHECKMULTISIG`
    #[must_use]
    pub fn multisig(required: usize, pubkeys: &[Vec<u8>]) -> Self {
        let script = pubkeys
            .iter()
            .fold(Script::new().push_int(required as i64), |s, pk| s.push_slice(pk));
        script
            .push_int(pubkeys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
    }

    /// Unlocking script for [`Script::multisig`]: the dummy element, then each signature
    #[must_use]
    pub fn multisig_unlock(signatures_der: &[Vec<u8>]) -> Self {
        signatures_der
            .iter()
            .fold(Script::new().push_opcode(OP_0), |s, sig| s.push_slice(sig))
    }

    /// The 20-byte hash of a script built by [`Script::p2pkh`]
    #[must_use]
    pub fn p2pkh_hash(&self) -> Option<[u8; 20]> {
        match self.0.as_slice() {
            [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
                hash.try_into().ok()
            }
            _ => None,
        }
    }

    /// Assemble a script from whitespace-separated opcode names, decimal
    /// integers (`push_int`) and `0x`-prefixed hex data pushes.
    pub fn from_asm(asm: &str) -> Result<Self> {
        asm.split_whitespace().try_fold(Script::new(), |script, token| {
            if let Some(hex_data) = token.strip_prefix("0x") {
                return Ok(script.push_slice(&hex::decode(hex_data)?));
            }
            if let Ok(n) = token.parse::<i64>() {
                return Ok(script.push_int(n));
            }
            op_from_name(token)
                .map(|op| script.push_opcode(op))
                .ok_or_else(|| LedgerError::InvalidFormat(format!("unknown opcode {token}")))
        })
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }
}

impl AsRef<[u8]> for Script {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Iterator returned by [`Script::instructions`]
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Instructions<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len())?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn take_len<const N: usize>(&mut self) -> Option<usize> {
        let raw = self.take(N)?;
        let mut le = [0u8; 4];
        le[..N].copy_from_slice(raw);
        Some(u32::from_le_bytes(le) as usize)
    }

    /// `None` when a push runs past the end of the script
    fn parse_next(&mut self) -> Option<Instruction<'a>> {
        let op = self.bytes[self.pos];
        self.pos += 1;
        let len = match op {
            OP_0 => return Some(Instruction::Push(&[])),
            1..=0x4b => op as usize,
            OP_PUSHDATA1 => self.take_len::<1>()?,
            OP_PUSHDATA2 => self.take_len::<2>()?,
            OP_PUSHDATA4 => self.take_len::<4>()?,
            _ => return Some(Instruction::Op(op)),
        };
        self.take(len).map(Instruction::Push)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = std::result::Result<(usize, Instruction<'a>), ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.bytes.len() {
            return None;
        }
        let offset = self.pos;
        match self.parse_next() {
            Some(ins) => Some(Ok((offset, ins))),
            None => {
                self.done = true;
                Some(Err(ScriptError::BadPush(offset)))
            }
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for item in self.instructions() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match item {
                Ok((_, Instruction::Push([]))) => f.write_str("OP_0")?,
                Ok((_, Instruction::Push(data))) => f.write_str(&hex::encode(data))?,
                Ok((_, Instruction::Op(op))) => match op_name(op) {
                    Some(name) => f.write_str(name)?,
                    None => write!(f, "OP_UNKNOWN[0x{op:02x}]")?,
                },
                Err(_) => f.write_str("[error]")?,
            }
        }
        Ok(())
    }
}

impl std::ops::Add for Script {
    type Output = Script;

    fn add(self, other: Script) -> Script {
        self.concat(&other)
    }
}

impl std::ops::Add for &Script {
    type Output = Script;

    fn add(self, other: &Script) -> Script {
        self.concat(other)
    }
}
