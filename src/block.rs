//! Block headers and blocks
//! Reference: https://en.bitcoin.it/wiki/Block

use std::io::Cursor;

use tracing::debug;

use crate::config::RetargetParams;
use crate::difficulty::{Difficulty, POW_LIMIT_BITS};
use crate::encoding::{
    display_hex, expect_end, read_array, read_len, read_u32_le, remaining, reversed, write_varint,
};
use crate::error::{LedgerError, Result};
use crate::hash::hash256;
use crate::keys::Network;
use crate::merkle::merkle_root;
use crate::transaction::Tx;

/// Serialized header length
pub const HEADER_SIZE: usize = 80;

/// Merkle root of the genesis coinbase, internal byte order
const GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

/// Block header. Hashes are kept in internal (wire) byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub difficulty: Difficulty,
    pub nonce: u32,
}

impl BlockHeader {
    /// Decode an 80-byte header
    pub fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let version = read_u32_le(cursor, "header.version")?;
        let prev_block = read_array(cursor, "header.prev_block")?;
        let merkle_root = read_array(cursor, "header.merkle_root")?;
        let timestamp = read_u32_le(cursor, "header.timestamp")?;
        let difficulty = Difficulty::from_compact(read_u32_le(cursor, "header.difficulty")?)?;
        let nonce = read_u32_le(cursor, "header.nonce")?;

        Ok(BlockHeader {
            version,
            prev_block,
            merkle_root,
            timestamp,
            difficulty,
            nonce,
        })
    }

    /// Fixed 80-byte encoding in Bitcoin's header layout.
    ///
    /// Every integer is little-endian. The difficulty field is the compact
    /// value as a little-endian u32, so the exponent byte comes last; these are
    /// not the exponent-first bytes of `Difficulty::encode`.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.difficulty.to_compact().to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Double SHA-256 of the header, internal byte order
    #[must_use]
    pub fn hash(&self) -> [u8; 32] {
        hash256(&self.encode())
    }

    /// Block id as displayed by explorers (byte-reversed hex)
    #[must_use]
    pub fn id_hex(&self) -> String {
        display_hex(&self.hash())
    }

    /// Proof of work: the header hash, read as a number, is below the target
    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.difficulty.is_solution(&reversed(&self.hash()))
    }

    /// Advance the nonce for the next mining attempt. Returns false once the
    /// nonce space is exhausted and wraps to zero; the caller should then
    /// change the timestamp or the block contents.
    pub fn increment_nonce(&mut self) -> bool {
        match self.nonce.checked_add(1) {
            Some(nonce) => {
                self.nonce = nonce;
                true
            }
            None => {
                self.nonce = 0;
                false
            }
        }
    }
}

/// Genesis block header of `network`
pub fn genesis_header(network: Network) -> Result<BlockHeader> {
    let (timestamp, nonce) = match network {
        Network::Main => (1_231_006_505, 2_083_236_893),
        Network::Test => (1_296_688_602, 414_098_458),
    };
    Ok(BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: GENESIS_MERKLE_ROOT,
        timestamp,
        difficulty: Difficulty::from_compact(POW_LIMIT_BITS)?,
        nonce,
    })
}

/// Difficulty required of the block at `height`.
///
/// Off a retarget boundary the difficulty of `last` carries over. On a
/// boundary it is retargeted by the time between `first` and `last`, the
/// headers that opened and closed the finished interval.
pub fn next_difficulty(
    height: u64,
    first: &BlockHeader,
    last: &BlockHeader,
    params: &RetargetParams,
) -> Result<Difficulty> {
    if params.interval == 0 {
        return Err(LedgerError::Config("retarget interval must be positive".into()));
    }
    if height == 0 || height % params.interval != 0 {
        return Ok(last.difficulty);
    }
    let timespan = u64::from(last.timestamp.saturating_sub(first.timestamp));
    let next = last.difficulty.retarget(timespan, params)?;
    debug!(height, timespan, from = %last.difficulty, to = %next, "retargeted difficulty");
    Ok(next)
}

/// A header together with its transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    pub const fn new(header: BlockHeader, txs: Vec<Tx>) -> Self {
        Block { header, txs }
    }

    /// Encode as `magic || size || header || tx count || txs`, where `size`
    /// counts every byte after itself.
    pub fn encode(&self, network: Network) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + HEADER_SIZE);
        out.extend_from_slice(&network.magic());
        // Patched below once the length is known
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&self.header.encode());
        write_varint(&mut out, self.txs.len() as u64)?;
        for tx in &self.txs {
            out.extend(tx.encode(None)?);
        }

        let size = u32::try_from(out.len() - 8)
            .map_err(|_| LedgerError::Validation("block larger than 4 GiB".into()))?;
        out[4..8].copy_from_slice(&size.to_le_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8], network: Network) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let magic: [u8; 4] = read_array(&mut cursor, "block.magic")?;
        if magic != network.magic() {
            return Err(LedgerError::decode(
                "block.magic",
                format!(
                    "{} does not match the {} network",
                    hex::encode(magic),
                    network.name()
                ),
            ));
        }

        let size = read_u32_le(&mut cursor, "block.size")? as usize;
        if size != remaining(&cursor) {
            return Err(LedgerError::decode(
                "block.size",
                format!("declared {size} bytes, found {}", remaining(&cursor)),
            ));
        }

        let header = BlockHeader::decode(&mut cursor)?;
        let count = read_len(&mut cursor, "block.tx_count")?;
        let txs = (0..count)
            .map(|_| Tx::decode_from(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        expect_end(&cursor, "block")?;

        debug!(id = %header.id_hex(), txs = txs.len(), "decoded block");
        Ok(Block { header, txs })
    }

    /// Merkle root recomputed from the transaction list
    pub fn merkle_root(&self) -> Result<[u8; 32]> {
        merkle_root(&self.txs)
    }

    /// Whether the header commits to this transaction list
    pub fn has_valid_merkle_root(&self) -> Result<bool> {
        Ok(self.merkle_root()? == self.header.merkle_root)
    }
}
