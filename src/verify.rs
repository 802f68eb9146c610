//! Transaction verification
//!
//! Each input's unlocking script is concatenated with the locking script of
//! the output it spends and executed against that input's signature-hash
//! bytes. Verification stops at the first failing input and reports its index.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, ScriptLimits, VerifyPolicy};
use crate::interpreter::{EncodingIssue, Interpreter, ScriptError};
use crate::script::Script;
use crate::transaction::{OutPoint, Tx, TxOut};

/// Why a single input failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputFailure {
    #[error("previous output's locking script is not known")]
    MissingPrevScript,

    #[error("previous output's amount is not known")]
    MissingPrevAmount,

    #[error("{0}")]
    MalformedEncoding(EncodingIssue),

    #[error("script failed: {0}")]
    ScriptFailed(ScriptError),

    #[error("cannot build signature hash: {0}")]
    SignatureHash(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("input {index}: {reason}")]
    Input { index: usize, reason: InputFailure },

    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u32),

    #[error("outputs spend {outputs} but inputs provide only {inputs}")]
    ValueNotConserved { inputs: u64, outputs: u64 },

    #[error("amount sum overflows")]
    AmountOverflow,
}

impl VerifyError {
    /// Index of the failing input, for per-input failures
    #[must_use]
    pub const fn input_index(&self) -> Option<usize> {
        match self {
            VerifyError::Input { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// True when the rejection comes from a feature outside the supported set
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, VerifyError::UnsupportedVersion(_))
    }
}

/// Source of previous outputs, typically a UTXO set
pub trait UtxoView {
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut>;
}

impl UtxoView for HashMap<OutPoint, TxOut> {
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.get(outpoint).cloned()
    }
}

/// Verifies transactions under a fixed set of script limits and policy
#[derive(Debug, Clone, Default)]
pub struct TxVerifier {
    limits: ScriptLimits,
    policy: VerifyPolicy,
}

impl TxVerifier {
    pub const fn new(limits: ScriptLimits, policy: VerifyPolicy) -> Self {
        TxVerifier { limits, policy }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.script.clone(), config.verify.clone())
    }

    /// Verify a transaction whose inputs already carry their previous outputs
    pub fn verify(&self, tx: &Tx) -> Result<(), VerifyError> {
        let result = self.verify_inner(tx);
        if let Err(e) = &result {
            warn!(error = %e, "transaction rejected");
        }
        result
    }

    /// Look up every input's previous output in `view`, then verify.
    /// Inputs the view does not know are left as they are.
    pub fn verify_with_view<V>(&self, tx: &Tx, view: &V) -> Result<(), VerifyError>
    where
        V: UtxoView + ?Sized,
    {
        let mut tx = tx.clone();
        for input in &mut tx.inputs {
            if let Some(prev) = view.prev_output(&input.outpoint()) {
                input.prev_script_pubkey = Some(prev.script_pubkey);
                input.prev_amount = Some(prev.amount);
            }
        }
        self.verify(&tx)
    }

    /// Run the combined script of input `index`
    pub fn verify_input(&self, tx: &Tx, index: usize) -> Result<(), InputFailure> {
        let input = tx
            .inputs
            .get(index)
            .ok_or_else(|| InputFailure::SignatureHash(format!("no input at index {index}")))?;
        let prev_script = input
            .prev_script_pubkey
            .as_ref()
            .ok_or(InputFailure::MissingPrevScript)?;
        let sighash = tx
            .signature_hash(index)
            .map_err(|e| InputFailure::SignatureHash(e.to_string()))?;

        let combined = input.script_sig.concat(prev_script);
        let mut vm = Interpreter::with_limits(&sighash, self.limits.clone());
        vm.execute(&combined).map_err(|e| {
            // Failures that consumed the false of a CHECKSIG that choked on its
            // input are reported as a bad encoding
            match vm.failure_issue() {
                Some(issue) => InputFailure::MalformedEncoding(issue.clone()),
                None => InputFailure::ScriptFailed(e),
            }
        })
    }

    fn verify_inner(&self, tx: &Tx) -> Result<(), VerifyError> {
        if !self.policy.accepted_versions.contains(&tx.version) {
            return Err(VerifyError::UnsupportedVersion(tx.version));
        }

        for index in 0..tx.inputs.len() {
            self.verify_input(tx, index)
                .map_err(|reason| VerifyError::Input { index, reason })?;
            debug!(index, "input verified");
        }

        if self.policy.check_value_conservation {
            self.check_value(tx)?;
        }
        Ok(())
    }

    fn check_value(&self, tx: &Tx) -> Result<(), VerifyError> {
        let mut inputs: u64 = 0;
        for (index, input) in tx.inputs.iter().enumerate() {
            match input.prev_amount {
                Some(amount) => {
                    inputs = inputs
                        .checked_add(amount)
                        .ok_or(VerifyError::AmountOverflow)?;
                }
                None if self.policy.require_prev_amounts => {
                    return Err(VerifyError::Input {
                        index,
                        reason: InputFailure::MissingPrevAmount,
                    });
                }
                None => {
                    debug!(index, "previous amount unknown, skipping value check");
                    return Ok(());
                }
            }
        }

        let outputs = tx.total_output().ok_or(VerifyError::AmountOverflow)?;
        if outputs > inputs {
            return Err(VerifyError::ValueNotConserved { inputs, outputs });
        }
        debug!(fee = inputs - outputs, "value conserved");
        Ok(())
    }
}

impl Tx {
    /// Verify with the default limits and policy. Each input must already
    /// carry its previous output's locking script.
    pub fn verify(&self) -> Result<(), VerifyError> {
        TxVerifier::default().verify(self)
    }

    /// Verify with the previous outputs' locking scripts supplied in input order
    pub fn verify_with_scripts(&self, prev_scripts: &[Script]) -> Result<(), VerifyError> {
        let mut tx = self.clone();
        for (input, script) in tx.inputs.iter_mut().zip(prev_scripts) {
            input.prev_script_pubkey = Some(script.clone());
        }
        tx.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::keys::KeyPair;
    use crate::transaction::TxIn;

    fn key(secret: u64) -> KeyPair {
        KeyPair::from_secret(BigInt::from(secret)).unwrap()
    }

    /// One-input spend of a P2PKH output locked to `owner`, signed by `signer`
    fn p2pkh_spend(owner: &KeyPair, signer: &KeyPair, prev_amount: u64, out_amount: u64) -> Tx {
        let mut rng = StdRng::seed_from_u64(42);
        let lock = Script::p2pkh(&owner.public.hash160(true));
        let mut tx = Tx::new(
            vec![
                TxIn::new([0xab; 32], 1)
                    .with_prev_script(lock)
                    .with_prev_amount(prev_amount),
            ],
            vec![TxOut::new(out_amount, Script::p2pkh(&[0x11; 20]))],
        );
        tx.sign_input(0, signer, &mut rng).unwrap();
        tx
    }

    #[test]
    fn test_valid_p2pkh_spend() {
        let owner = key(12345);
        let tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        assert_eq!(tx.verify(), Ok(()));
    }

    #[test]
    fn test_wrong_key_fails() {
        let tx = p2pkh_spend(&key(12345), &key(54321), 10_000, 9_000);
        let err = tx.verify().unwrap_err();
        assert_eq!(
            err,
            VerifyError::Input {
                index: 0,
                reason: InputFailure::ScriptFailed(ScriptError::EqualVerify)
            }
        );
    }

    #[test]
    fn test_tampered_output_fails() {
        let owner = key(12345);
        let mut tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        tx.outputs[0].amount = 8_000;
        assert_eq!(
            tx.verify(),
            Err(VerifyError::Input {
                index: 0,
                reason: InputFailure::ScriptFailed(ScriptError::EvalFalse)
            })
        );
    }

    #[test]
    fn test_missing_prev_script_reports_index() {
        let owner = key(12345);
        let mut tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        tx.inputs.push(TxIn::new([0xcd; 32], 0));
        let err = tx.verify().unwrap_err();
        assert_eq!(err.input_index(), Some(1));
        assert!(matches!(
            err,
            VerifyError::Input { reason: InputFailure::MissingPrevScript, .. }
        ));
    }

    #[test]
    fn test_malformed_signature_is_distinguished() {
        let owner = key(12345);
        let mut tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        tx.inputs[0].script_sig = Script::p2pkh_unlock(&[0x30, 0x01], &owner.public.encode(true));
        match tx.verify() {
            Err(VerifyError::Input {
                index: 0,
                reason: InputFailure::MalformedEncoding(EncodingIssue::Signature(_)),
            }) => {}
            other => panic!("expected malformed signature, got {other:?}"),
        }
    }

    #[test]
    fn test_value_conservation() {
        let owner = key(12345);
        let tx = p2pkh_spend(&owner, &owner, 1_000, 1_500);
        assert_eq!(
            tx.verify(),
            Err(VerifyError::ValueNotConserved {
                inputs: 1_000,
                outputs: 1_500
            })
        );

        // Disabled by policy
        let lenient = TxVerifier::new(
            ScriptLimits::default(),
            VerifyPolicy {
                check_value_conservation: false,
                ..VerifyPolicy::default()
            },
        );
        assert_eq!(lenient.verify(&tx), Ok(()));
    }

    #[test]
    fn test_unknown_amounts() {
        let owner = key(12345);
        let mut tx = p2pkh_spend(&owner, &owner, 1_000, 1_500);
        tx.inputs[0].prev_amount = None;

        // Skipped by default
        assert_eq!(tx.verify(), Ok(()));

        let strict = TxVerifier::new(
            ScriptLimits::default(),
            VerifyPolicy {
                require_prev_amounts: true,
                ..VerifyPolicy::default()
            },
        );
        assert_eq!(
            strict.verify(&tx),
            Err(VerifyError::Input {
                index: 0,
                reason: InputFailure::MissingPrevAmount
            })
        );
    }

    #[test]
    fn test_unsupported_version() {
        let owner = key(12345);
        let mut tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        tx.version = 3;
        let err = tx.verify().unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_verify_with_scripts() {
        let owner = key(777);
        let tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        let lock = tx.inputs[0].prev_script_pubkey.clone().unwrap();

        let mut bare = tx.clone();
        bare.inputs[0].prev_script_pubkey = None;
        bare.inputs[0].prev_amount = None;
        assert!(bare.verify().is_err());
        assert_eq!(bare.verify_with_scripts(&[lock]), Ok(()));
        assert!(bare.verify_with_scripts(&[Script::p2pkh(&[0; 20])]).is_err());
    }

    #[test]
    fn test_verify_with_view() {
        let owner = key(777);
        let tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        let prev = TxOut::new(10_000, tx.inputs[0].prev_script_pubkey.clone().unwrap());

        let mut bare = tx.clone();
        bare.inputs[0].prev_script_pubkey = None;

        let mut utxos: HashMap<OutPoint, TxOut> = HashMap::new();
        let verifier = TxVerifier::default();
        assert!(verifier.verify_with_view(&bare, &utxos).is_err());

        utxos.insert(bare.inputs[0].outpoint(), prev);
        assert_eq!(verifier.verify_with_view(&bare, &utxos), Ok(()));
    }

    #[test]
    fn test_multisig_spend() {
        let mut rng = StdRng::seed_from_u64(3);
        let keys = [key(101), key(202), key(303)];
        let pubkeys: Vec<Vec<u8>> = keys.iter().map(|k| k.public.encode(true)).collect();
        let lock = Script::multisig(2, &pubkeys);

        let tx = Tx::new(
            vec![TxIn::new([0x77; 32], 0).with_prev_script(lock)],
            vec![TxOut::new(1, Script::new().push_opcode(crate::opcodes::OP_1))],
        );
        let sighash = tx.signature_hash(0).unwrap();
        let sign = |k: &KeyPair, rng: &mut StdRng| k.sign(&sighash, rng).unwrap().encode();

        // Signatures in key order succeed
        let mut signed = tx.clone();
        signed.inputs[0].script_sig =
            Script::multisig_unlock(&[sign(&keys[0], &mut rng), sign(&keys[2], &mut rng)]);
        assert_eq!(signed.verify(), Ok(()));

        // Out of order fails
        let mut swapped = tx.clone();
        swapped.inputs[0].script_sig =
            Script::multisig_unlock(&[sign(&keys[2], &mut rng), sign(&keys[0], &mut rng)]);
        assert!(swapped.verify().is_err());

        // A signature from an outside key fails
        let mut foreign = tx.clone();
        foreign.inputs[0].script_sig =
            Script::multisig_unlock(&[sign(&keys[0], &mut rng), sign(&key(404), &mut rng)]);
        assert!(foreign.verify().is_err());
    }

    #[test]
    fn test_skipped_malformed_key_does_not_mask_failure() {
        let mut rng = StdRng::seed_from_u64(5);
        let signer = key(101);
        let pubkeys = vec![vec![0x05; 33], signer.public.encode(true)];
        let spend = |lock: Script, rng: &mut StdRng| {
            let mut tx = Tx::new(
                vec![TxIn::new([0x66; 32], 0).with_prev_script(lock)],
                vec![TxOut::new(1, Script::new().push_opcode(crate::opcodes::OP_1))],
            );
            let sig = signer.sign(&tx.signature_hash(0).unwrap(), rng).unwrap();
            tx.inputs[0].script_sig = Script::multisig_unlock(&[sig.encode()]);
            tx
        };

        // CHECKMULTISIG steps over the unparsable key and matches the next one
        let tx = spend(Script::multisig(1, &pubkeys), &mut rng);
        assert_eq!(tx.verify(), Ok(()));

        let lock = Script::multisig(1, &pubkeys).push_opcode(crate::opcodes::OP_RETURN);
        let tx = spend(lock, &mut rng);
        assert_eq!(
            tx.verify(),
            Err(VerifyError::Input {
                index: 0,
                reason: InputFailure::ScriptFailed(ScriptError::OpReturn)
            })
        );
    }

    #[test]
    fn test_from_config() {
        let config = Config::from_json_str(r#"{ "script": { "max_ops": 1 } }"#).unwrap();
        let verifier = TxVerifier::from_config(&config);
        let owner = key(12345);
        let tx = p2pkh_spend(&owner, &owner, 10_000, 9_000);
        assert_eq!(
            verifier.verify(&tx),
            Err(VerifyError::Input {
                index: 0,
                reason: InputFailure::ScriptFailed(ScriptError::OpCount)
            })
        );
    }
}
