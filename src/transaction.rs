//! Transactions and their two encodings: the canonical one that defines the
//! transaction id, and the signature-hash one that gets signed and verified.
//! Reference: https://en.bitcoin.it/wiki/Transaction

use std::io::Cursor;

use rand::{CryptoRng, RngCore};
use tracing::debug;

use crate::encoding::{
    display_hex, expect_end, read_array, read_len, read_u32_le, read_u64_le, read_u8, remaining,
    write_varint,
};
use crate::error::{LedgerError, Result};
use crate::hash::hash256;
use crate::keys::KeyPair;
use crate::script::{Instruction, Script};

/// Sequence number written for every input this crate builds
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

/// Reference to one output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Transaction id in internal (wire) byte order
    pub txid: [u8; 32],
    pub index: u32,
}

/// Transaction input
///
/// `prev_script_pubkey` and `prev_amount` describe the output being spent. They are
/// never serialized and do not take part in equality; the verifier and the
/// signature-hash encoding read them.
#[derive(Debug, Clone, Eq)]
pub struct TxIn {
    pub prev_tx: [u8; 32],
    pub prev_index: u32,
    pub script_sig: Script,
    pub sequence: u32,
    pub prev_script_pubkey: Option<Script>,
    pub prev_amount: Option<u64>,
}

impl PartialEq for TxIn {
    fn eq(&self, other: &Self) -> bool {
        self.prev_tx == other.prev_tx
            && self.prev_index == other.prev_index
            && self.script_sig == other.script_sig
            && self.sequence == other.sequence
    }
}

impl TxIn {
    /// Unsigned input spending `prev_tx:prev_index`
    pub const fn new(prev_tx: [u8; 32], prev_index: u32) -> Self {
        TxIn {
            prev_tx,
            prev_index,
            script_sig: Script::new(),
            sequence: DEFAULT_SEQUENCE,
            prev_script_pubkey: None,
            prev_amount: None,
        }
    }

    /// Attach the locking script of the output being spent
    #[must_use]
    pub fn with_prev_script(mut self, script_pubkey: Script) -> Self {
        self.prev_script_pubkey = Some(script_pubkey);
        self
    }

    /// Attach the amount of the output being spent
    #[must_use]
    pub fn with_prev_amount(mut self, amount: u64) -> Self {
        self.prev_amount = Some(amount);
        self
    }

    #[must_use]
    pub const fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.prev_tx,
            index: self.prev_index,
        }
    }

    pub fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let prev_tx = read_array(cursor, "tx.input.prev_tx")?;
        let prev_index = read_u32_le(cursor, "tx.input.prev_index")?;
        let script_sig = Script::decode(cursor, "tx.input.script_sig")?;
        let sequence = read_u32_le(cursor, "tx.input.sequence")?;
        Ok(TxIn {
            prev_tx,
            prev_index,
            script_sig,
            sequence,
            prev_script_pubkey: None,
            prev_amount: None,
        })
    }

    /// Write the input with `script` in the unlocking-script slot
    fn encode_into(&self, out: &mut Vec<u8>, script: &Script) -> Result<()> {
        out.extend_from_slice(&self.prev_tx);
        out.extend_from_slice(&self.prev_index.to_le_bytes());
        script.encode_into(out)?;
        out.extend_from_slice(&self.sequence.to_le_bytes());
        Ok(())
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub amount: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub const fn new(amount: u64, script_pubkey: Script) -> Self {
        TxOut {
            amount,
            script_pubkey,
        }
    }

    pub fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let amount = read_u64_le(cursor, "tx.output.amount")?;
        let script_pubkey = Script::decode(cursor, "tx.output.script_pubkey")?;
        Ok(TxOut {
            amount,
            script_pubkey,
        })
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.amount.to_le_bytes());
        self.script_pubkey.encode_into(out)
    }
}

/// Legacy-serialized transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
}

impl Tx {
    /// Version 1 transaction with a zero locktime
    pub const fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Tx {
            version: 1,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    /// Decode a complete transaction, rejecting trailing bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let tx = Self::decode_from(&mut cursor)?;
        expect_end(&cursor, "tx")?;
        Ok(tx)
    }

    /// Decode one transaction from a stream, leaving the cursor after it
    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let version = read_u32_le(cursor, "tx.version")?;

        let num_inputs = read_len(cursor, "tx.input_count")?;
        if num_inputs == 0 && remaining(cursor) > 0 {
            // A zero count followed by a non-zero flag byte is the SegWit marker
            let position = cursor.position();
            let flag = read_u8(cursor, "tx.segwit_flag")?;
            if flag != 0 {
                return Err(LedgerError::Unsupported(format!(
                    "segwit serialization (flag 0x{flag:02x})"
                )));
            }
            cursor.set_position(position);
        }

        let inputs = (0..num_inputs)
            .map(|_| TxIn::decode(cursor))
            .collect::<Result<Vec<_>>>()?;

        let num_outputs = read_len(cursor, "tx.output_count")?;
        let outputs = (0..num_outputs)
            .map(|_| TxOut::decode(cursor))
            .collect::<Result<Vec<_>>>()?;

        let locktime = read_u32_le(cursor, "tx.locktime")?;

        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    /// Encode the transaction.
    ///
    /// With `signing_index = None` this is the canonical encoding. With
    /// `Some(i)`, input `i` carries its previous output's locking script and
    /// every other input an empty script: the bytes that are signed for input `i`.
    ///
    /// A transaction with no inputs but some outputs is `Unsupported`: its
    /// output count would sit where the SegWit flag goes and the bytes would
    /// not decode back.
    pub fn encode(&self, signing_index: Option<usize>) -> Result<Vec<u8>> {
        if self.inputs.is_empty() && !self.outputs.is_empty() {
            return Err(LedgerError::Unsupported(
                "transaction with outputs but no inputs".to_string(),
            ));
        }
        if let Some(index) = signing_index {
            if index >= self.inputs.len() {
                return Err(LedgerError::Validation(format!(
                    "signing index {index} out of range for {} inputs",
                    self.inputs.len()
                )));
            }
        }

        let empty = Script::new();
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());

        write_varint(&mut out, self.inputs.len() as u64)?;
        for (i, input) in self.inputs.iter().enumerate() {
            let script = match signing_index {
                None => &input.script_sig,
                Some(index) if index == i => input.prev_script_pubkey.as_ref().ok_or_else(|| {
                    LedgerError::Validation(format!("input {i} has no previous locking script"))
                })?,
                Some(_) => &empty,
            };
            input.encode_into(&mut out, script)?;
        }

        write_varint(&mut out, self.outputs.len() as u64)?;
        for output in &self.outputs {
            output.encode_into(&mut out)?;
        }

        out.extend_from_slice(&self.locktime.to_le_bytes());
        Ok(out)
    }

    /// Bytes signed and verified for input `index`
    pub fn signature_hash(&self, index: usize) -> Result<Vec<u8>> {
        self.encode(Some(index))
    }

    /// Double SHA-256 of the canonical encoding, in internal byte order
    pub fn id(&self) -> Result<[u8; 32]> {
        Ok(hash256(&self.encode(None)?))
    }

    /// Transaction id as displayed by explorers (byte-reversed hex)
    pub fn id_hex(&self) -> Result<String> {
        Ok(display_hex(&self.id()?))
    }

    /// Sum of output amounts, `None` on overflow
    #[must_use]
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// Sign input `index` as a P2PKH spend, filling its unlocking script with
    /// `<DER signature> <compressed public key>`.
    pub fn sign_input<R>(&mut self, index: usize, key: &KeyPair, rng: &mut R) -> Result<()>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let message = self.signature_hash(index)?;
        let signature = key.sign(&message, rng)?;
        let script_sig = Script::p2pkh_unlock(&signature.encode(), &key.public.encode(true));
        debug!(index, script_len = script_sig.len(), "signed input");
        self.inputs[index].script_sig = script_sig;
        Ok(())
    }

    /// A single input spending the null outpoint
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        matches!(
            self.inputs.as_slice(),
            [input] if input.prev_tx == [0u8; 32] && input.prev_index == 0xffff_ffff
        )
    }

    /// Block height committed to by the first push of a coinbase unlocking script
    #[must_use]
    pub fn coinbase_height(&self) -> Option<u32> {
        if !self.is_coinbase() {
            return None;
        }
        match self.inputs[0].script_sig.instructions().next()? {
            Ok((_, Instruction::Push(data))) if !data.is_empty() && data.len() <= 4 => {
                let mut le = [0u8; 4];
                le[..data.len()].copy_from_slice(data);
                Some(u32::from_le_bytes(le))
            }
            _ => None,
        }
    }
}
