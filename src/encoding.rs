//! Canonical byte encoding
//!
//! Every hashed or signed object has exactly one byte representation:
//! fixed-width integers are little-endian and counts/byte strings carry a
//! VarInt prefix. Decoding is the exact inverse of encoding; anything else
//! (short input, non-minimal VarInt, trailing bytes) is a [`DecodeError`].

use crate::error::DecodeError;
use crate::types::*;

/// Encode into a caller-provided buffer.
pub trait Encodable {
    fn consensus_encode(&self, out: &mut Vec<u8>);
}

/// Decode from a cursor, consuming exactly the object's bytes.
pub trait Decodable: Sized {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

/// Serialize an object to its canonical bytes.
pub fn serialize<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.consensus_encode(&mut out);
    out
}

/// Deserialize an object, requiring the whole input to be consumed.
pub fn deserialize<T: Decodable>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut reader = Reader::new(bytes);
    let value = T::consensus_decode(&mut reader)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }
    Ok(value)
}

/// Length of the canonical encoding.
pub fn serialized_size<T: Encodable + ?Sized>(value: &T) -> usize {
    serialize(value).len()
}

/// Forward-only cursor over an input buffer.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                needed: len - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash, DecodeError> {
        self.read_array()
    }

    /// Read a VarInt, rejecting encodings that are not the shortest form.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let value = match self.read_u8()? {
            0xfd => {
                let v = self.read_u16()? as u64;
                if v < 0xfd {
                    return Err(DecodeError::NonCanonicalVarInt);
                }
                v
            }
            0xfe => {
                let v = self.read_u32()? as u64;
                if v <= u16::MAX as u64 {
                    return Err(DecodeError::NonCanonicalVarInt);
                }
                v
            }
            0xff => {
                let v = self.read_u64()?;
                if v <= u32::MAX as u64 {
                    return Err(DecodeError::NonCanonicalVarInt);
                }
                v
            }
            n => n as u64,
        };
        Ok(value)
    }

    /// Read a VarInt count of items, each at least `min_item_size` bytes long.
    /// Rejects counts the remaining input cannot possibly hold before anything
    /// is allocated.
    pub fn read_count(&mut self, min_item_size: usize) -> Result<usize, DecodeError> {
        let count = self.read_varint()?;
        let max = (self.remaining() / min_item_size.max(1)) as u64;
        if count > max {
            return Err(DecodeError::OversizedLength(count));
        }
        Ok(count as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_count(1)?;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

/// Append a VarInt in its shortest form.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn write_list<T: Encodable>(out: &mut Vec<u8>, items: &[T]) {
    write_varint(out, items.len() as u64);
    for item in items {
        item.consensus_encode(out);
    }
}

fn read_list<T: Decodable>(
    reader: &mut Reader<'_>,
    min_item_size: usize,
) -> Result<Vec<T>, DecodeError> {
    let count = reader.read_count(min_item_size)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::consensus_decode(reader)?);
    }
    Ok(items)
}

// Smallest possible encodings, used to bound declared counts.
const OUTPOINT_SIZE: usize = 36;
const MIN_INPUT_SIZE: usize = OUTPOINT_SIZE + 1 + 4;
const MIN_OUTPUT_SIZE: usize = 8 + 1;
const MIN_TX_SIZE: usize = 4 + 1 + 1 + 4;
pub const HEADER_SIZE: usize = 80;

impl Encodable for OutPoint {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.index.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(OutPoint {
            hash: reader.read_hash()?,
            index: reader.read_u32()?,
        })
    }
}

impl Encodable for TransactionInput {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        self.prevout.consensus_encode(out);
        write_var_bytes(out, &self.script_sig);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }
}

impl Decodable for TransactionInput {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(TransactionInput {
            prevout: OutPoint::consensus_decode(reader)?,
            script_sig: reader.read_var_bytes()?,
            sequence: reader.read_u32()?,
        })
    }
}

impl Encodable for TransactionOutput {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, &self.script_pubkey);
    }
}

impl Decodable for TransactionOutput {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(TransactionOutput {
            value: reader.read_u64()?,
            script_pubkey: reader.read_var_bytes()?,
        })
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_list(out, &self.inputs);
        write_list(out, &self.outputs);
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

impl Decodable for Transaction {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Transaction {
            version: reader.read_i32()?,
            inputs: read_list(reader, MIN_INPUT_SIZE)?,
            outputs: read_list(reader, MIN_OUTPUT_SIZE)?,
            lock_time: reader.read_u32()?,
        })
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.prev_block_hash);
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(BlockHeader {
            version: reader.read_i32()?,
            prev_block_hash: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            timestamp: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        self.header.consensus_encode(out);
        write_list(out, &self.transactions);
    }
}

impl Decodable for Block {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Block {
            header: BlockHeader::consensus_decode(reader)?,
            transactions: read_list(reader, MIN_TX_SIZE)?,
        })
    }
}

impl<T: Encodable> Encodable for [T] {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        write_list(out, self);
    }
}
