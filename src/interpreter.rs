//! Script virtual machine.
//!
//! Execution is two-pass. [`compile`] parses the byte code once, rejects
//! disabled opcodes and oversized pushes, and resolves every `IF`/`NOTIF`/`ELSE`
//! to the instruction index execution continues at when that arm is skipped.
//! The run loop then follows those jumps, so a branch that is not taken is
//! never looked at again.
//!
//! `IF` and `NOTIF` test the top stack element without consuming it.

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::ScriptLimits;
use crate::ecdsa::Signature;
use crate::hash::{hash160, hash256, ripemd160, sha1, sha256};
use crate::keys::PublicKey;
use crate::opcodes::*;
use crate::script::{Instruction, Script};
use crate::scriptnum::{MAX_NUM_SIZE, decode_num, encode_bool, encode_result, is_true};

/// Why a script halted with failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("script of {0} bytes exceeds the size limit")]
    ScriptSize(usize),

    #[error("push of {0} bytes exceeds the element size limit")]
    PushSize(usize),

    #[error("stack size limit exceeded")]
    StackSize,

    #[error("operation count limit exceeded")]
    OpCount,

    #[error("push at offset {0} runs past the end of the script")]
    BadPush(usize),

    #[error("stack underflow")]
    InvalidStackOperation,

    #[error("alt stack underflow")]
    InvalidAltStackOperation,

    #[error("unbalanced conditional")]
    UnbalancedConditional,

    #[error("disabled opcode 0x{0:02x}")]
    DisabledOpcode(u8),

    #[error("bad opcode 0x{0:02x}")]
    BadOpcode(u8),

    #[error("OP_RETURN executed")]
    OpReturn,

    #[error("OP_VERIFY failed")]
    Verify,

    #[error("OP_EQUALVERIFY failed")]
    EqualVerify,

    #[error("OP_NUMEQUALVERIFY failed")]
    NumEqualVerify,

    #[error("OP_CHECKSIGVERIFY failed")]
    CheckSigVerify,

    #[error("OP_CHECKMULTISIGVERIFY failed")]
    CheckMultisigVerify,

    #[error("numeric value of {0} bytes is out of range")]
    NumOverflow(usize),

    #[error("public key count out of range")]
    PubkeyCount,

    #[error("signature count out of range")]
    SigCount,

    #[error("CHECKMULTISIG dummy element is not zero")]
    NullDummy,

    #[error("script evaluated to false")]
    EvalFalse,

    #[error("stack is empty at end of script")]
    EmptyStack,
}

type ScriptResult<T> = Result<T, ScriptError>;

/// Interpreter lifecycle.
///
/// Choosing an `IF`/`NOTIF` arm is a single jump through the table built by
/// [`compile`], so there is no separate state for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Scanning the byte code
    Running,
    HaltedSuccess,
    HaltedFailure,
}

/// A signature or public key that CHECKSIG could not parse.
/// The opcode still pushes false; these let callers tell bad encodings
/// apart from signatures that parse but do not verify.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingIssue {
    #[error("malformed signature: {0}")]
    Signature(String),

    #[error("malformed public key: {0}")]
    PublicKey(String),
}

/// Parsed byte code with branch targets resolved
#[derive(Debug, Clone)]
pub struct Program<'s> {
    ops: Vec<Instruction<'s>>,
    /// For `IF`/`NOTIF`: where to continue when the condition fails.
    /// For `ELSE`: past the matching `ENDIF`. Otherwise the next index.
    jumps: Vec<usize>,
}

impl Program<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

struct OpenIf {
    at: usize,
    else_at: Option<usize>,
}

/// First pass: parse, check static limits and match up conditionals
pub fn compile<'s>(script: &'s Script, limits: &ScriptLimits) -> ScriptResult<Program<'s>> {
    if script.len() > limits.max_script_size {
        return Err(ScriptError::ScriptSize(script.len()));
    }

    let mut ops = Vec::new();
    let mut jumps = Vec::new();
    let mut open: Vec<OpenIf> = Vec::new();

    for item in script.instructions() {
        let (_, ins) = item?;
        let index = ops.len();
        match ins {
            Instruction::Push(data) if data.len() > limits.max_element_size => {
                return Err(ScriptError::PushSize(data.len()));
            }
            Instruction::Op(op) if is_disabled(op) => return Err(ScriptError::DisabledOpcode(op)),
            Instruction::Op(OP_IF | OP_NOTIF) => open.push(OpenIf { at: index, else_at: None }),
            Instruction::Op(OP_ELSE) => match open.last_mut() {
                Some(frame) if frame.else_at.is_none() => frame.else_at = Some(index),
                _ => return Err(ScriptError::UnbalancedConditional),
            },
            Instruction::Op(OP_ENDIF) => {
                let frame = open.pop().ok_or(ScriptError::UnbalancedConditional)?;
                let after_endif = index + 1;
                match frame.else_at {
                    Some(else_at) => {
                        jumps[frame.at] = else_at + 1;
                        jumps[else_at] = after_endif;
                    }
                    None => jumps[frame.at] = after_endif,
                }
            }
            _ => {}
        }
        ops.push(ins);
        jumps.push(index + 1);
    }

    if !open.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(Program { ops, jumps })
}

/// Stack machine bound to the signature-hash bytes of one transaction input
#[derive(Debug, Clone)]
pub struct Interpreter<'a> {
    sighash: &'a [u8],
    limits: ScriptLimits,
    stack: Vec<Vec<u8>>,
    alt_stack: Vec<Vec<u8>>,
    state: VmState,
    op_count: usize,
    /// Encoding issues with the index of the instruction that recorded them
    issues: Vec<(usize, EncodingIssue)>,
    /// Index of the instruction being executed
    pc: usize,
    /// Last instruction that completed
    last_pc: Option<usize>,
    /// Instruction whose result the failing check consumed
    blamed_pc: Option<usize>,
}

impl<'a> Interpreter<'a> {
    pub fn new(sighash: &'a [u8]) -> Self {
        Self::with_limits(sighash, ScriptLimits::default())
    }

    pub fn with_limits(sighash: &'a [u8], limits: ScriptLimits) -> Self {
        Interpreter {
            sighash,
            limits,
            stack: Vec::new(),
            alt_stack: Vec::new(),
            state: VmState::Running,
            op_count: 0,
            issues: Vec::new(),
            pc: 0,
            last_pc: None,
            blamed_pc: None,
        }
    }

    /// Main stack, bottom first
    #[must_use]
    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    #[must_use]
    pub const fn state(&self) -> VmState {
        self.state
    }

    /// Signatures and keys CHECKSIG could not parse during this run
    pub fn encoding_issues(&self) -> impl Iterator<Item = &EncodingIssue> {
        self.issues.iter().map(|(_, issue)| issue)
    }

    /// The encoding issue behind a failed run, if the check that failed
    /// consumed the result of the signature opcode that recorded it
    #[must_use]
    pub fn failure_issue(&self) -> Option<&EncodingIssue> {
        let blamed = self.blamed_pc?;
        self.issues
            .iter()
            .find(|(pc, _)| *pc == blamed)
            .map(|(_, issue)| issue)
    }

    /// Run a script to completion and apply the final success rule
    pub fn execute(&mut self, script: &Script) -> ScriptResult<()> {
        self.run(script)?;
        self.finish()
    }

    /// Execute every instruction from empty stacks, leaving them in place for
    /// inspection
    pub fn run(&mut self, script: &Script) -> ScriptResult<()> {
        self.reset();
        let result = compile(script, &self.limits).and_then(|program| self.run_program(&program));
        if let Err(e) = &result {
            self.state = VmState::HaltedFailure;
            debug!(error = %e, "script halted");
        }
        result
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.alt_stack.clear();
        self.state = VmState::Running;
        self.op_count = 0;
        self.issues.clear();
        self.pc = 0;
        self.last_pc = None;
        self.blamed_pc = None;
    }

    /// Pop the top element; success iff it is non-empty and not a single zero byte
    pub fn finish(&mut self) -> ScriptResult<()> {
        let outcome = match self.stack.pop() {
            None => Err(ScriptError::EmptyStack),
            Some(top) if top.is_empty() || top == [0x00] => {
                self.blamed_pc = self.last_pc;
                Err(ScriptError::EvalFalse)
            }
            Some(_) => Ok(()),
        };
        self.state = if outcome.is_ok() {
            VmState::HaltedSuccess
        } else {
            VmState::HaltedFailure
        };
        outcome
    }

    fn run_program(&mut self, program: &Program<'_>) -> ScriptResult<()> {
        let mut pc = 0;
        while pc < program.ops.len() {
            self.pc = pc;
            let next = match program.ops[pc] {
                Instruction::Push(data) => {
                    trace!(pc, len = data.len(), depth = self.stack.len(), "push");
                    self.stack.push(data.to_vec());
                    pc + 1
                }
                Instruction::Op(op) => {
                    trace!(
                        pc,
                        op = op_name(op).unwrap_or("OP_UNKNOWN"),
                        depth = self.stack.len(),
                        "step"
                    );
                    if op > OP_16 {
                        self.count_ops(1)?;
                    }
                    self.step(op, pc, program).inspect_err(|e| {
                        self.blamed_pc = match e {
                            ScriptError::CheckSigVerify | ScriptError::CheckMultisigVerify => {
                                Some(pc)
                            }
                            ScriptError::Verify => self.last_pc,
                            _ => None,
                        };
                    })?
                }
            };
            if self.stack.len() + self.alt_stack.len() > self.limits.max_stack_size {
                return Err(ScriptError::StackSize);
            }
            self.last_pc = Some(pc);
            pc = next;
        }
        Ok(())
    }

    fn count_ops(&mut self, n: usize) -> ScriptResult<()> {
        self.op_count += n;
        if self.op_count > self.limits.max_ops {
            return Err(ScriptError::OpCount);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Stack helpers

    fn require(&self, n: usize) -> ScriptResult<()> {
        if self.stack.len() < n {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(())
    }

    fn pop(&mut self) -> ScriptResult<Vec<u8>> {
        self.stack.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    fn top(&self) -> ScriptResult<&Vec<u8>> {
        self.stack.last().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Element `depth` places below the top
    fn peek(&self, depth: usize) -> ScriptResult<&Vec<u8>> {
        self.require(depth + 1)?;
        Ok(&self.stack[self.stack.len() - 1 - depth])
    }

    fn pop_num(&mut self) -> ScriptResult<i64> {
        let top = self.pop()?;
        decode_num(&top, MAX_NUM_SIZE)
    }

    fn push_num(&mut self, n: i64) -> ScriptResult<()> {
        self.stack.push(encode_result(n)?);
        Ok(())
    }

    fn push_bool(&mut self, b: bool) {
        self.stack.push(encode_bool(b));
    }

    /// Stack index of the element `n` places below the top, for PICK and ROLL
    fn depth_index(&mut self) -> ScriptResult<usize> {
        let n = self.pop_num()?;
        let n = usize::try_from(n).map_err(|_| ScriptError::InvalidStackOperation)?;
        if n >= self.stack.len() {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(self.stack.len() - 1 - n)
    }

    // -------------------------------------------------------------------------
    // Signature checks

    fn decode_signature(&mut self, bytes: &[u8]) -> Option<Signature> {
        // An empty signature is a deliberate "false", not an encoding error
        if bytes.is_empty() {
            return None;
        }
        Signature::decode(bytes)
            .map_err(|e| {
                self.issues
                    .push((self.pc, EncodingIssue::Signature(e.to_string())));
            })
            .ok()
    }

    fn decode_pubkey(&mut self, bytes: &[u8]) -> Option<PublicKey> {
        PublicKey::decode(bytes)
            .map_err(|e| {
                self.issues
                    .push((self.pc, EncodingIssue::PublicKey(e.to_string())));
            })
            .ok()
    }

    fn check_sig(&mut self, sig_bytes: &[u8], pubkey_bytes: &[u8]) -> bool {
        let Some(sig) = self.decode_signature(sig_bytes) else {
            return false;
        };
        let Some(pubkey) = self.decode_pubkey(pubkey_bytes) else {
            return false;
        };
        pubkey.verify(self.sighash, &sig)
    }

    /// Stack: `<dummy> <sig>... <m> <pubkey>... <n>`. Every signature must match
    /// a distinct key, in order; keys that match nothing are skipped.
    fn check_multisig(&mut self) -> ScriptResult<bool> {
        let n = self.pop_num()?;
        let n = usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.limits.max_pubkeys_per_multisig)
            .ok_or(ScriptError::PubkeyCount)?;
        self.count_ops(n)?;
        self.require(n)?;
        let keys = self.stack.split_off(self.stack.len() - n);

        let m = self.pop_num()?;
        let m = usize::try_from(m)
            .ok()
            .filter(|&m| m <= n)
            .ok_or(ScriptError::SigCount)?;
        self.require(m)?;
        let sigs = self.stack.split_off(self.stack.len() - m);

        let dummy = self.pop()?;
        if !matches!(decode_num(&dummy, MAX_NUM_SIZE), Ok(0)) {
            return Err(ScriptError::NullDummy);
        }

        let mut remaining_keys = keys.iter();
        for (i, sig_bytes) in sigs.iter().enumerate() {
            let Some(sig) = self.decode_signature(sig_bytes) else {
                return Ok(false);
            };
            let sigs_left = sigs.len() - i;
            let matched = loop {
                if remaining_keys.len() < sigs_left {
                    break false;
                }
                let Some(key_bytes) = remaining_keys.next() else {
                    break false;
                };
                if let Some(key) = self.decode_pubkey(key_bytes) {
                    if key.verify(self.sighash, &sig) {
                        break true;
                    }
                }
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Dispatch

    /// Execute one opcode, returning the index of the next instruction
    fn step(&mut self, op: u8, pc: usize, program: &Program<'_>) -> ScriptResult<usize> {
        let next = pc + 1;
        match op {
            OP_1NEGATE | OP_1..=OP_16 => {
                let n = small_int(op).ok_or(ScriptError::BadOpcode(op))?;
                self.push_num(n)?;
            }

            // control
            OP_NOP | OP_NOP1 | OP_CHECKLOCKTIMEVERIFY | OP_CHECKSEQUENCEVERIFY | OP_NOP4
            | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8 | OP_NOP9 | OP_NOP10 | OP_CODESEPARATOR => {}
            OP_IF | OP_NOTIF => {
                let mut taken = is_true(self.top()?);
                if op == OP_NOTIF {
                    taken = !taken;
                }
                trace!(pc, taken, "branch");
                return Ok(if taken { next } else { program.jumps[pc] });
            }
            OP_ELSE => return Ok(program.jumps[pc]),
            OP_ENDIF => {}
            OP_VERIFY => {
                if !is_true(&self.pop()?) {
                    return Err(ScriptError::Verify);
                }
            }
            OP_RETURN => return Err(ScriptError::OpReturn),

            // stack ops
            OP_TOALTSTACK => {
                let top = self.pop()?;
                self.alt_stack.push(top);
            }
            OP_FROMALTSTACK => {
                let top = self
                    .alt_stack
                    .pop()
                    .ok_or(ScriptError::InvalidAltStackOperation)?;
                self.stack.push(top);
            }
            OP_2DROP => {
                self.require(2)?;
                self.stack.truncate(self.stack.len() - 2);
            }
            OP_2DUP => {
                let (a, b) = (self.peek(1)?.clone(), self.peek(0)?.clone());
                self.stack.extend([a, b]);
            }
            OP_3DUP => {
                let (a, b, c) = (self.peek(2)?.clone(), self.peek(1)?.clone(), self.peek(0)?.clone());
                self.stack.extend([a, b, c]);
            }
            OP_2OVER => {
                let (a, b) = (self.peek(3)?.clone(), self.peek(2)?.clone());
                self.stack.extend([a, b]);
            }
            OP_2ROT => {
                self.require(6)?;
                let at = self.stack.len() - 6;
                let pair: Vec<_> = self.stack.drain(at..at + 2).collect();
                self.stack.extend(pair);
            }
            OP_2SWAP => {
                self.require(4)?;
                let len = self.stack.len();
                self.stack.swap(len - 4, len - 2);
                self.stack.swap(len - 3, len - 1);
            }
            OP_IFDUP => {
                let top = self.top()?;
                if is_true(top) {
                    let copy = top.clone();
                    self.stack.push(copy);
                }
            }
            OP_DEPTH => self.push_num(self.stack.len() as i64)?,
            OP_DROP => {
                self.pop()?;
            }
            OP_DUP => {
                let top = self.top()?.clone();
                self.stack.push(top);
            }
            OP_NIP => {
                self.require(2)?;
                self.stack.remove(self.stack.len() - 2);
            }
            OP_OVER => {
                let second = self.peek(1)?.clone();
                self.stack.push(second);
            }
            OP_PICK => {
                let index = self.depth_index()?;
                let item = self.stack[index].clone();
                self.stack.push(item);
            }
            OP_ROLL => {
                let index = self.depth_index()?;
                let item = self.stack.remove(index);
                self.stack.push(item);
            }
            OP_ROT => {
                self.require(3)?;
                let third = self.stack.remove(self.stack.len() - 3);
                self.stack.push(third);
            }
            OP_SWAP => {
                self.require(2)?;
                let len = self.stack.len();
                self.stack.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                self.require(2)?;
                let top = self.top()?.clone();
                self.stack.insert(self.stack.len() - 2, top);
            }

            // splice
            OP_SIZE => {
                let len = self.top()?.len();
                self.push_num(len as i64)?;
            }

            // bit logic
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = self.pop()?;
                let a = self.pop()?;
                let equal = a == b;
                if op == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EqualVerify);
                    }
                } else {
                    self.push_bool(equal);
                }
            }

            // numeric, one operand
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let a = self.pop_num()?;
                let result = match op {
                    OP_1ADD => a + 1,
                    OP_1SUB => a - 1,
                    OP_NEGATE => -a,
                    OP_ABS => a.abs(),
                    OP_NOT => i64::from(a == 0),
                    _ => i64::from(a != 0),
                };
                self.push_num(result)?;
            }

            // numeric, two operands
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => i64::from(a != 0 && b != 0),
                    OP_BOOLOR => i64::from(a != 0 || b != 0),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                    OP_NUMNOTEQUAL => i64::from(a != b),
                    OP_LESSTHAN => i64::from(a < b),
                    OP_GREATERTHAN => i64::from(a > b),
                    OP_LESSTHANOREQUAL => i64::from(a <= b),
                    OP_GREATERTHANOREQUAL => i64::from(a >= b),
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                if op == OP_NUMEQUALVERIFY {
                    if result == 0 {
                        return Err(ScriptError::NumEqualVerify);
                    }
                } else {
                    self.push_num(result)?;
                }
            }
            OP_WITHIN => {
                let max = self.pop_num()?;
                let min = self.pop_num()?;
                let x = self.pop_num()?;
                self.push_bool(min <= x && x < max);
            }

            // crypto
            OP_RIPEMD160 => {
                let data = self.pop()?;
                self.stack.push(ripemd160(&data).to_vec());
            }
            OP_SHA1 => {
                let data = self.pop()?;
                self.stack.push(sha1(&data).to_vec());
            }
            OP_SHA256 => {
                let data = self.pop()?;
                self.stack.push(sha256(&data).to_vec());
            }
            OP_HASH160 => {
                let data = self.pop()?;
                self.stack.push(hash160(&data).to_vec());
            }
            OP_HASH256 => {
                let data = self.pop()?;
                self.stack.push(hash256(&data).to_vec());
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = self.pop()?;
                let sig = self.pop()?;
                let ok = self.check_sig(&sig, &pubkey);
                if op == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::CheckSigVerify);
                    }
                } else {
                    self.push_bool(ok);
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let ok = self.check_multisig()?;
                if op == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::CheckMultisigVerify);
                    }
                } else {
                    self.push_bool(ok);
                }
            }

            op if is_disabled(op) => return Err(ScriptError::DisabledOpcode(op)),
            // OP_RESERVED, OP_VER, OP_RESERVED1/2 and unassigned bytes
            op => return Err(ScriptError::BadOpcode(op)),
        }
        Ok(next)
    }
}

/// Execute `script` against `sighash` with default limits
#[must_use]
pub fn evaluate(script: &Script, sighash: &[u8]) -> bool {
    Interpreter::new(sighash).execute(script).is_ok()
}
