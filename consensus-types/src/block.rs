// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! A baked block (spec.md §3): `(round, epoch, timestamp, baker_id,
//! baker_key, parent_qc, option<timeout_cert>, option<finalization_entry>,
//! vrf_nonce, transactions, transaction_outcomes_hash, state_hash,
//! signature)`. Its hash is `H(H(header) || H(quasi))`, the header being
//! `(round, epoch, parent_hash)` and the quasi-hash a balanced Merkle
//! combination of every other field but the signature.

use crate::finalization::FinalizationEntry;
use crate::quorum_cert::QuorumCertificate;
use crate::timeout_cert::TimeoutCertificate;
use crate::transaction::{outcomes_hash, Transaction};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use primitives::crypto::{PublicKey, Signature};
use primitives::{Epoch, HashValue, Round, Timestamp};
use std::io::{Cursor, Read, Write};

const FLAG_TIMEOUT_CERT: u8 = 1 << 0;
const FLAG_FINALIZATION_ENTRY: u8 = 1 << 1;

/// `baker_id`/`baker_key`, absent on the genesis block (spec.md §3:
/// "a genesis block has round/epoch 0 and no baker data").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BakerData {
    pub baker_id: u64,
    pub baker_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub round: Round,
    pub epoch: Epoch,
    pub timestamp: Timestamp,
    /// `None` only for the genesis block.
    pub baker: Option<BakerData>,
    /// `None` only for the genesis block; the block's own parent hash is
    /// always `parent_qc.block_hash` for every other block.
    pub parent_qc: Option<QuorumCertificate>,
    pub timeout_cert: Option<TimeoutCertificate>,
    pub finalization_entry: Option<FinalizationEntry>,
    pub vrf_nonce: HashValue,
    pub transactions: Vec<Transaction>,
    pub transaction_outcomes_hash: HashValue,
    pub state_hash: HashValue,
    /// `None` only for the genesis block, which is not baked by anyone.
    pub signature: Option<Signature>,
}

impl Block {
    pub fn genesis(state_hash: HashValue) -> Self {
        Block {
            round: 0,
            epoch: 0,
            timestamp: 0,
            baker: None,
            parent_qc: None,
            timeout_cert: None,
            finalization_entry: None,
            vrf_nonce: HashValue::zero(),
            transactions: Vec::new(),
            transaction_outcomes_hash: outcomes_hash(&[]),
            state_hash,
            signature: None,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.parent_qc.is_none()
    }

    /// The hash of this block's parent: `parent_qc.block_hash`, or the
    /// block's own hash for genesis (there is no predecessor to point
    /// to).
    pub fn parent_hash(&self) -> HashValue {
        match &self.parent_qc {
            Some(qc) => qc.block_hash,
            None => self.hash(),
        }
    }

    pub fn header_hash(&self) -> HashValue {
        let parent = match &self.parent_qc {
            Some(qc) => qc.block_hash,
            None => HashValue::zero(),
        };
        header_hash(self.round, self.epoch, parent)
    }

    /// The half of [`Block::hash`] covering everything but `(round,
    /// epoch, parent_hash)`. Exposed so [`crate::finalization`] can
    /// reconstruct the `successor_proof` a finalization entry commits
    /// to without duplicating this combination elsewhere.
    pub fn quasi_hash(&self) -> HashValue {
        let baker_hash = match &self.baker {
            Some(b) => HashValue::combine_tagged(
                b"BLOCK::BAKER",
                &[&b.baker_id.to_be_bytes(), &b.baker_key.0],
            ),
            None => HashValue::sha3(b"BLOCK::BAKER::ABSENT"),
        };
        let parent_qc_hash = match &self.parent_qc {
            Some(qc) => HashValue::sha3(&bcs::to_bytes(qc).expect("QC always serializes")),
            None => HashValue::sha3(b"BLOCK::PARENT_QC::ABSENT"),
        };
        let timeout_cert_hash = match &self.timeout_cert {
            Some(tc) => HashValue::sha3(&bcs::to_bytes(tc).expect("TC always serializes")),
            None => HashValue::sha3(b"BLOCK::TIMEOUT_CERT::ABSENT"),
        };
        let finalization_entry_hash = match &self.finalization_entry {
            Some(fe) => HashValue::sha3(&bcs::to_bytes(fe).expect("entry always serializes")),
            None => HashValue::sha3(b"BLOCK::FINALIZATION_ENTRY::ABSENT"),
        };
        let transactions_hash = {
            let mut acc = HashValue::sha3(b"BLOCK::TRANSACTIONS::EMPTY");
            for tx in &self.transactions {
                acc = HashValue::combine(&acc, &tx.hash());
            }
            acc
        };
        let timestamp_hash = HashValue::sha3(&self.timestamp.to_be_bytes());
        let leaves = [
            timestamp_hash,
            baker_hash,
            parent_qc_hash,
            timeout_cert_hash,
            finalization_entry_hash,
            self.vrf_nonce,
            transactions_hash,
            self.transaction_outcomes_hash,
            self.state_hash,
        ];
        HashValue::balanced_combine(&leaves)
    }

    pub fn hash(&self) -> HashValue {
        HashValue::combine(&self.header_hash(), &self.quasi_hash())
    }

    /// `(qc_round(parent_qc), required timeout-cert round)` invariant
    /// check (spec.md §3): either the block directly succeeds its
    /// parent's QC round, or it carries a timeout certificate bridging
    /// the gap.
    pub fn round_succession_is_valid(&self) -> bool {
        let Some(parent_qc) = &self.parent_qc else {
            return true;
        };
        if parent_qc.round >= self.round {
            return false;
        }
        if parent_qc.round + 1 == self.round {
            return true;
        }
        match &self.timeout_cert {
            Some(tc) => tc.round + 1 == self.round,
            None => false,
        }
    }

    /// Encode the block wire format v1 (spec.md §6).
    pub fn to_wire_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u64::<BigEndian>(self.round)?;
        out.write_u64::<BigEndian>(self.epoch)?;
        out.write_u64::<BigEndian>(self.timestamp)?;
        let baker = self
            .baker
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("only the genesis block may omit baker data"))?;
        out.write_u64::<BigEndian>(baker.baker_id)?;
        write_len_prefixed(&mut out, &baker.baker_key.0)?;
        let parent_qc = self
            .parent_qc
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("only the genesis block may omit a parent QC"))?;
        write_len_prefixed(&mut out, &bcs::to_bytes(parent_qc)?)?;

        let mut flags = 0u8;
        if self.timeout_cert.is_some() {
            flags |= FLAG_TIMEOUT_CERT;
        }
        if self.finalization_entry.is_some() {
            flags |= FLAG_FINALIZATION_ENTRY;
        }
        out.write_u8(flags)?;
        if let Some(tc) = &self.timeout_cert {
            write_len_prefixed(&mut out, &bcs::to_bytes(tc)?)?;
        }
        if let Some(fe) = &self.finalization_entry {
            write_len_prefixed(&mut out, &bcs::to_bytes(fe)?)?;
        }
        out.write_all(self.vrf_nonce.as_bytes())?;
        out.write_all(self.state_hash.as_bytes())?;
        out.write_all(self.transaction_outcomes_hash.as_bytes())?;
        out.write_u64::<BigEndian>(self.transactions.len() as u64)?;
        for tx in &self.transactions {
            write_len_prefixed(&mut out, &bcs::to_bytes(tx)?)?;
        }
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("only the genesis block may omit a signature"))?;
        write_len_prefixed(&mut out, &signature.0)?;
        Ok(out)
    }

    /// Decode the block wire format v1 (spec.md §6). Rejects any
    /// undefined flag bit set.
    pub fn from_wire_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let round = cursor.read_u64::<BigEndian>()?;
        let epoch = cursor.read_u64::<BigEndian>()?;
        let timestamp = cursor.read_u64::<BigEndian>()?;
        let baker_id = cursor.read_u64::<BigEndian>()?;
        let baker_key = PublicKey(read_len_prefixed(&mut cursor)?);
        let parent_qc: QuorumCertificate = bcs::from_bytes(&read_len_prefixed(&mut cursor)?)?;

        let flags = cursor.read_u8()?;
        anyhow::ensure!(
            flags & !(FLAG_TIMEOUT_CERT | FLAG_FINALIZATION_ENTRY) == 0,
            "block wire format: undefined flag bit set"
        );
        let timeout_cert = if flags & FLAG_TIMEOUT_CERT != 0 {
            Some(bcs::from_bytes(&read_len_prefixed(&mut cursor)?)?)
        } else {
            None
        };
        let finalization_entry = if flags & FLAG_FINALIZATION_ENTRY != 0 {
            Some(bcs::from_bytes(&read_len_prefixed(&mut cursor)?)?)
        } else {
            None
        };
        let vrf_nonce = read_hash(&mut cursor)?;
        let state_hash = read_hash(&mut cursor)?;
        let transaction_outcomes_hash = read_hash(&mut cursor)?;
        let tx_count = cursor.read_u64::<BigEndian>()?;
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(bcs::from_bytes(&read_len_prefixed(&mut cursor)?)?);
        }
        let signature = Signature(read_len_prefixed(&mut cursor)?);

        Ok(Block {
            round,
            epoch,
            timestamp,
            baker: Some(BakerData { baker_id, baker_key }),
            parent_qc: Some(parent_qc),
            timeout_cert,
            finalization_entry,
            vrf_nonce,
            transactions,
            transaction_outcomes_hash,
            state_hash,
            signature: Some(signature),
        })
    }
}

/// `H("BLOCK::HEADER" || round || epoch || parent_hash)`, shared by
/// [`Block::header_hash`] and the successor-block-hash formula used by
/// [`crate::finalization::FinalizationEntry`].
pub fn header_hash(round: Round, epoch: Epoch, parent_hash: HashValue) -> HashValue {
    HashValue::combine_tagged(
        b"BLOCK::HEADER",
        &[&round.to_be_bytes(), &epoch.to_be_bytes(), parent_hash.as_bytes()],
    )
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> anyhow::Result<()> {
    out.write_u64::<BigEndian>(bytes.len() as u64)?;
    out.write_all(bytes)?;
    Ok(())
}

fn read_len_prefixed(cursor: &mut Cursor<&[u8]>) -> anyhow::Result<Vec<u8>> {
    let len = cursor.read_u64::<BigEndian>()?;
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_hash(cursor: &mut Cursor<&[u8]>) -> anyhow::Result<HashValue> {
    let mut buf = [0u8; HashValue::LENGTH];
    cursor.read_exact(&mut buf)?;
    Ok(HashValue::new(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer_set::FinalizerSet;
    use primitives::crypto::AggregateSignature;

    fn sample_block() -> Block {
        let genesis = Block::genesis(HashValue::sha3(b"genesis-state"));
        let parent_qc = QuorumCertificate {
            block_hash: genesis.hash(),
            round: 0,
            epoch: 0,
            aggregate_signature: AggregateSignature(vec![1, 2, 3]),
            finalizer_set: FinalizerSet::empty(4),
        };
        Block {
            round: 1,
            epoch: 0,
            timestamp: 1_700_000_000,
            baker: Some(BakerData {
                baker_id: 2,
                baker_key: PublicKey(vec![9, 9, 9]),
            }),
            parent_qc: Some(parent_qc),
            timeout_cert: None,
            finalization_entry: None,
            vrf_nonce: HashValue::sha3(b"vrf"),
            transactions: vec![Transaction {
                sender: primitives::AccountAddress::new([3u8; 32]),
                nonce: 0,
                payload: serde_bytes::ByteBuf::from(vec![7, 7]),
            }],
            transaction_outcomes_hash: HashValue::sha3(b"outcomes"),
            state_hash: HashValue::sha3(b"state"),
            signature: Some(Signature(vec![5, 5, 5])),
        }
    }

    #[test]
    fn wire_round_trip_preserves_hash() {
        let block = sample_block();
        let bytes = block.to_wire_bytes().unwrap();
        let decoded = Block::from_wire_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn genesis_has_no_baker_and_is_its_own_parent() {
        let genesis = Block::genesis(HashValue::sha3(b"state"));
        assert!(genesis.is_genesis());
        assert!(genesis.baker.is_none());
        assert_eq!(genesis.parent_hash(), genesis.hash());
    }

    #[test]
    fn round_succession_requires_timeout_cert_on_gap() {
        let mut block = sample_block();
        block.round = 5;
        assert!(!block.round_succession_is_valid());
        block.timeout_cert = Some(TimeoutCertificate {
            round: 4,
            by_qc_round: Default::default(),
            aggregate_signature: AggregateSignature(vec![]),
        });
        assert!(block.round_succession_is_valid());
    }

    #[test]
    fn undefined_flag_bit_is_rejected() {
        let block = sample_block();
        let mut bytes = block.to_wire_bytes().unwrap();
        // Flags byte sits right after round/epoch/timestamp/baker_id/
        // baker_key/parent_qc; corrupting it to set an undefined bit
        // must be rejected rather than silently ignored.
        let mut offset = 8 * 3; // round, epoch, timestamp
        offset += 8; // baker_id
        offset += 8 + block.baker.as_ref().unwrap().baker_key.0.len(); // baker_key
        offset += 8 + bcs::to_bytes(block.parent_qc.as_ref().unwrap()).unwrap().len(); // parent_qc
        bytes[offset] |= 0b1000_0000;
        assert!(Block::from_wire_bytes(&bytes).is_err());
    }
}
