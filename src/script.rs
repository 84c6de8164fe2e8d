//! Spend authorization
//!
//! An output's `script_pubkey` is a lock condition whose first byte selects the
//! scheme; the input's `script_sig` is the unlock data. Every scheme is a
//! deterministic function of (unlock data, lock condition, signing context).
//!
//! | tag    | scheme          | lock body                | unlock data              |
//! |--------|-----------------|--------------------------|--------------------------|
//! | `0x00` | anyone-can-spend| ignored                  | ignored                  |
//! | `0x01` | pay-to-pubkey   | 33-byte compressed key   | DER ECDSA signature      |
//! | `0x02` | stack script    | script                   | script (run first)       |
//!
//! Unknown tags never authorize, which makes such outputs unspendable.

use crate::constants::*;
use crate::encoding::{write_varint, Encodable};
use crate::hashing::sha256d;
use crate::types::*;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, VerifyOnly};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

/// Domain separator of the signature hash.
const SIGHASH_TAG: &[u8] = b"UTXO-SIGHASH";

pub const TAG_ANYONE_CAN_SPEND: u8 = 0x00;
pub const TAG_PAY_TO_PUBKEY: u8 = 0x01;
pub const TAG_SCRIPT: u8 = 0x02;

/// Lock scheme selected by the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScheme {
    AnyoneCanSpend,
    PayToPubkey,
    Script,
}

impl LockScheme {
    /// Split a lock condition into its scheme and body.
    pub fn parse(lock: &[u8]) -> Option<(LockScheme, &[u8])> {
        let (tag, body) = lock.split_first()?;
        let scheme = match *tag {
            TAG_ANYONE_CAN_SPEND => LockScheme::AnyoneCanSpend,
            TAG_PAY_TO_PUBKEY => LockScheme::PayToPubkey,
            TAG_SCRIPT => LockScheme::Script,
            _ => return None,
        };
        Some((scheme, body))
    }
}

/// Lock condition anyone can satisfy.
pub fn anyone_can_spend() -> ByteString {
    vec![TAG_ANYONE_CAN_SPEND]
}

/// Lock condition requiring a signature by `pubkey`.
pub fn pay_to_pubkey(pubkey: &PublicKey) -> ByteString {
    let mut lock = Vec::with_capacity(34);
    lock.push(TAG_PAY_TO_PUBKEY);
    lock.extend_from_slice(&pubkey.serialize());
    lock
}

/// Lock condition evaluated by the stack machine.
pub fn script_lock(script: &[u8]) -> ByteString {
    let mut lock = Vec::with_capacity(script.len() + 1);
    lock.push(TAG_SCRIPT);
    lock.extend_from_slice(script);
    lock
}

/// What a signature commits to for one input.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub spent_output: &'a TransactionOutput,
}

impl<'a> SigningContext<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize, spent_output: &'a TransactionOutput) -> Self {
        Self {
            tx,
            input_index,
            spent_output,
        }
    }

    /// SignatureHash: 𝒯𝒳 × ℕ × 𝒯 → ℍ
    ///
    /// sha256d over: tag, version, every input's (outpoint, sequence), the
    /// input index, the spent output (value and lock), all outputs and the
    /// lock time. Unlock data is never committed, so signatures do not sign
    /// themselves.
    pub fn signature_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(256);
        data.extend_from_slice(SIGHASH_TAG);
        data.extend_from_slice(&self.tx.version.to_le_bytes());
        write_varint(&mut data, self.tx.inputs.len() as u64);
        for input in &self.tx.inputs {
            input.prevout.consensus_encode(&mut data);
            data.extend_from_slice(&input.sequence.to_le_bytes());
        }
        data.extend_from_slice(&(self.input_index as u32).to_le_bytes());
        self.spent_output.consensus_encode(&mut data);
        self.tx.outputs[..].consensus_encode(&mut data);
        data.extend_from_slice(&self.tx.lock_time.to_le_bytes());
        sha256d(&data)
    }
}

/// Capability deciding whether unlock data satisfies a lock condition.
pub trait Authorization: Send + Sync {
    fn evaluate(&self, unlock: &[u8], lock: &[u8], ctx: &SigningContext<'_>) -> bool;
}

/// Default authorization: dispatch on the lock's tag byte.
pub struct TagDispatch {
    secp: Secp256k1<VerifyOnly>,
}

impl TagDispatch {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for TagDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Authorization for TagDispatch {
    fn evaluate(&self, unlock: &[u8], lock: &[u8], ctx: &SigningContext<'_>) -> bool {
        match LockScheme::parse(lock) {
            Some((LockScheme::AnyoneCanSpend, _)) => true,
            Some((LockScheme::PayToPubkey, pubkey)) => {
                verify_signature(&self.secp, pubkey, unlock, &ctx.signature_hash())
            }
            Some((LockScheme::Script, script)) => {
                let mut checker = SignatureChecker::new(&self.secp, ctx);
                match verify_script(unlock, script, &mut checker) {
                    Ok(result) => result,
                    Err(e) => {
                        trace!(input = ctx.input_index, error = %e, "Script evaluation failed");
                        false
                    }
                }
            }
            None => false,
        }
    }
}

/// Verify ECDSA signature using secp256k1
fn verify_signature(
    secp: &Secp256k1<VerifyOnly>,
    pubkey_bytes: &[u8],
    signature_bytes: &[u8],
    sighash: &Hash,
) -> bool {
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(signature_bytes) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let message = Message::from_digest(*sighash);
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}

/// DER signature over the signature hash of `ctx`.
pub fn sign_input(secret: &SecretKey, ctx: &SigningContext<'_>) -> ByteString {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(ctx.signature_hash());
    secp.sign_ecdsa(&message, secret).serialize_der().to_vec()
}

// ============================================================================
// STACK MACHINE
// ============================================================================

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_SIZE: u8 = 0x82;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script exceeds {MAX_SCRIPT_SIZE} bytes")]
    ScriptSize,
    #[error("operation limit exceeded")]
    OpCount,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow at opcode {0:#04x}")]
    StackUnderflow(u8),
    #[error("push exceeds element size or script end")]
    BadPush,
    #[error("verify failed")]
    VerifyFailed,
    #[error("OP_RETURN encountered")]
    OpReturn,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
}

/// Signature checks available to `OP_CHECKSIG`.
pub struct SignatureChecker<'a> {
    secp: &'a Secp256k1<VerifyOnly>,
    ctx: &'a SigningContext<'a>,
    sighash: Option<Hash>,
}

impl<'a> SignatureChecker<'a> {
    pub fn new(secp: &'a Secp256k1<VerifyOnly>, ctx: &'a SigningContext<'a>) -> Self {
        Self {
            secp,
            ctx,
            sighash: None,
        }
    }

    fn check(&mut self, signature: &[u8], pubkey: &[u8]) -> bool {
        let ctx = self.ctx;
        let sighash = *self.sighash.get_or_insert_with(|| ctx.signature_hash());
        verify_signature(self.secp, pubkey, signature, &sighash)
    }
}

fn is_true(item: &[u8]) -> bool {
    item.iter().any(|b| *b != 0)
}

/// Minimal little-endian encoding of a non-negative stack number.
fn encode_num(n: u32) -> ByteString {
    let mut out: ByteString = n.to_le_bytes().to_vec();
    while out.last() == Some(&0) {
        out.pop();
    }
    if out.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        out.push(0);
    }
    out
}

fn pop(stack: &mut Vec<ByteString>, opcode: u8) -> Result<ByteString, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow(opcode))
}

/// EvalScript: 𝒮𝒞 × 𝒮𝒯 → 𝒮𝒯
///
/// Runs `script` against `stack`. A failed `OP_CHECKSIG` or `OP_EQUAL` pushes
/// false and carries on; errors abort evaluation.
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<ByteString>,
    checker: &mut SignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let mut pc = 0usize;
    let mut op_count = 0usize;
    while pc < script.len() {
        let opcode = script[pc];
        pc += 1;

        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_SCRIPT_OPS {
                return Err(ScriptError::OpCount);
            }
        }

        match opcode {
            OP_0 => stack.push(vec![]),

            // direct pushes and OP_PUSHDATA1/2
            0x01..=0x4b | OP_PUSHDATA1 | OP_PUSHDATA2 => {
                let len = match opcode {
                    OP_PUSHDATA1 => {
                        let len = *script.get(pc).ok_or(ScriptError::BadPush)? as usize;
                        pc += 1;
                        len
                    }
                    OP_PUSHDATA2 => {
                        let bytes = script.get(pc..pc + 2).ok_or(ScriptError::BadPush)?;
                        pc += 2;
                        u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                    }
                    n => n as usize,
                };
                if len > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::BadPush);
                }
                let data = script.get(pc..pc + len).ok_or(ScriptError::BadPush)?;
                pc += len;
                stack.push(data.to_vec());
            }

            // OP_1 to OP_16 - push numbers 1-16
            OP_1..=OP_16 => stack.push(vec![opcode - 0x50]),

            OP_NOP => {}

            OP_VERIFY => {
                let item = pop(stack, opcode)?;
                if !is_true(&item) {
                    return Err(ScriptError::VerifyFailed);
                }
            }

            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_DROP => {
                pop(stack, opcode)?;
            }

            OP_DUP => {
                let item = stack.last().cloned().ok_or(ScriptError::StackUnderflow(opcode))?;
                stack.push(item);
            }

            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow(opcode));
                }
                let len = stack.len();
                stack.swap(len - 1, len - 2);
            }

            OP_SIZE => {
                let size = stack.last().map(|i| i.len()).ok_or(ScriptError::StackUnderflow(opcode))?;
                stack.push(encode_num(size as u32));
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                let a = pop(stack, opcode)?;
                let b = pop(stack, opcode)?;
                if opcode == OP_EQUALVERIFY {
                    if a != b {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(if a == b { vec![1] } else { vec![] });
                }
            }

            OP_SHA256 => {
                let item = pop(stack, opcode)?;
                stack.push(Sha256::digest(&item).to_vec());
            }

            // OP_HASH160 - RIPEMD160(SHA256(x))
            OP_HASH160 => {
                let item = pop(stack, opcode)?;
                let sha256_hash = Sha256::digest(&item);
                stack.push(Ripemd160::digest(sha256_hash).to_vec());
            }

            // OP_HASH256 - SHA256(SHA256(x))
            OP_HASH256 => {
                let item = pop(stack, opcode)?;
                stack.push(sha256d(&item).to_vec());
            }

            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = pop(stack, opcode)?;
                let signature = pop(stack, opcode)?;
                let valid = checker.check(&signature, &pubkey);
                if opcode == OP_CHECKSIGVERIFY {
                    if !valid {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(if valid { vec![1] } else { vec![] });
                }
            }

            other => return Err(ScriptError::UnknownOpcode(other)),
        }

        if stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
    }
    Ok(())
}

/// VerifyScript: 𝒮𝒞 × 𝒮𝒞 → {true, false}
///
/// Runs the unlock script on an empty stack, then the lock script on the
/// result. Success is a non-empty final stack whose top item is true.
pub fn verify_script(
    unlock: &[u8],
    lock: &[u8],
    checker: &mut SignatureChecker<'_>,
) -> Result<bool, ScriptError> {
    let mut stack = Vec::new();
    eval_script(unlock, &mut stack, checker)?;
    eval_script(lock, &mut stack, checker)?;
    Ok(stack.last().map(|top| is_true(top)).unwrap_or(false))
}
