// Transaction and block validation

use crate::config::ChainParams;
use crate::consensus::pow::{check_proof_of_work, next_bits, reward_for_height};
use crate::core::script::authorize;
use crate::core::{Amount, Block, BlockHeader, Hash256, OutPoint, Transaction};
use crate::storage::UtxoSet;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// How far ahead of local time a block timestamp may be
pub const MAX_FUTURE_BLOCK_TIME: u64 = 2 * 60 * 60;

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Structurally invalid transaction or block
    #[error("malformed: {0}")]
    Malformed(String),

    #[error("input spends unknown or already spent output {0}")]
    UnknownUtxo(OutPoint),

    #[error("transaction spends {0} more than once")]
    DuplicateInput(OutPoint),

    #[error("input {input} failed authorization")]
    AuthorizationFailed { input: usize },

    #[error("outputs ({output_total}) exceed inputs ({input_total})")]
    InsufficientFunds {
        input_total: Amount,
        output_total: Amount,
    },

    #[error("output {outpoint} is locked until height {lock_height}, spent at {spend_height}")]
    LockedOutput {
        outpoint: OutPoint,
        lock_height: u32,
        spend_height: u32,
    },

    /// Block hash doesn't meet PoW target
    #[error("invalid proof of work")]
    InvalidProofOfWork,

    #[error("previous hash {found} does not match tip {expected}")]
    ChainMismatch { expected: Hash256, found: Hash256 },

    #[error("difficulty bits {found:08x}, expected {expected:08x}")]
    DifficultyMismatch { expected: u32, found: u32 },

    /// Merkle root doesn't match calculated value
    #[error("merkle root mismatch")]
    MerkleMismatch,

    #[error("coinbase pays {found}, expected {expected}")]
    RewardMismatch { expected: Amount, found: Amount },

    #[error("output {0} spent twice in one block")]
    DoubleSpendInBlock(OutPoint),

    /// First transaction is not coinbase
    #[error("missing coinbase transaction")]
    MissingCoinbase,

    /// Coinbase transaction outside the first position
    #[error("multiple coinbase transactions")]
    MultipleCoinbase,

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(Hash256),

    /// Block timestamp is too far in the future
    #[error("block timestamp too far in the future")]
    InvalidTimestamp,

    /// Block version not supported
    #[error("invalid block version")]
    InvalidVersion,

    /// Block has no transactions
    #[error("block has no transactions")]
    NoTransactions,

    #[error("block has {count} transactions, limit is {limit}")]
    TooManyTransactions { count: usize, limit: usize },
}

/// Failure replaying a chain from genesis
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("chain is empty")]
    Empty,

    #[error("genesis block {found} does not match the configured genesis {expected}")]
    GenesisMismatch { expected: Hash256, found: Hash256 },

    #[error("block at height {height} is invalid: {source}")]
    InvalidBlock {
        height: u32,
        #[source]
        source: ValidationError,
    },
}

/// What a block at a given position must commit to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u32,
    pub prev_hash: Hash256,
    pub expected_bits: u32,
}

impl BlockContext {
    /// Context for the block extending `chain` (genesis first, non-empty)
    pub fn next(chain: &[Block], params: &ChainParams) -> Self {
        let height = chain.len() as u32;
        let window_start = chain.len().saturating_sub(params.retarget_interval as usize);
        let recent: Vec<BlockHeader> = chain[window_start..]
            .iter()
            .map(|block| block.header.clone())
            .collect();

        Self {
            height,
            prev_hash: chain.last().map_or_else(Hash256::zero, Block::hash),
            expected_bits: next_bits(height, &recent, params),
        }
    }
}

/// Transaction validator
pub struct TransactionValidator;

impl TransactionValidator {
    /// Context-free checks: inputs and outputs present, values don't overflow.
    /// A transaction without inputs is only valid as a block's coinbase.
    pub fn check_structure(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.is_coinbase() {
            return Err(ValidationError::Malformed(
                "transaction has no inputs".to_string(),
            ));
        }
        if tx.outputs.is_empty() {
            return Err(ValidationError::Malformed(
                "transaction has no outputs".to_string(),
            ));
        }
        if tx.total_output_value().is_none() {
            return Err(ValidationError::Malformed(
                "output total overflows".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if !seen.insert(input.previous_output) {
                return Err(ValidationError::DuplicateInput(input.previous_output));
            }
        }

        Ok(())
    }

    /// Full validation against `utxo_set` for inclusion at `spend_height`.
    /// Returns the fee.
    pub fn validate(
        tx: &Transaction,
        utxo_set: &UtxoSet,
        spend_height: u32,
    ) -> Result<Amount, ValidationError> {
        Self::check_structure(tx)?;

        let sighash = tx.signature_hash();
        let mut input_total: Amount = 0;

        for (index, input) in tx.inputs.iter().enumerate() {
            let outpoint = input.previous_output;
            let utxo = utxo_set
                .get_utxo(&outpoint)
                .ok_or(ValidationError::UnknownUtxo(outpoint))?;

            if !utxo.output.is_spendable_at(spend_height) {
                return Err(ValidationError::LockedOutput {
                    outpoint,
                    lock_height: utxo.output.lock_height,
                    spend_height,
                });
            }

            if !authorize(&utxo.output, &input.witness, &sighash) {
                return Err(ValidationError::AuthorizationFailed { input: index });
            }

            input_total = input_total
                .checked_add(utxo.output.value)
                .ok_or_else(|| ValidationError::Malformed("input total overflows".to_string()))?;
        }

        let output_total = tx
            .total_output_value()
            .ok_or_else(|| ValidationError::Malformed("output total overflows".to_string()))?;

        input_total
            .checked_sub(output_total)
            .ok_or(ValidationError::InsufficientFunds {
                input_total,
                output_total,
            })
    }
}

/// Validate `tx` against `utxo_set`; returns the fee
pub fn validate_transaction(
    tx: &Transaction,
    utxo_set: &UtxoSet,
    spend_height: u32,
) -> Result<Amount, ValidationError> {
    TransactionValidator::validate(tx, utxo_set, spend_height)
}

/// Block validator
pub struct BlockValidator<'a> {
    params: &'a ChainParams,
}

impl<'a> BlockValidator<'a> {
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    /// Validate a block header against its position in the chain
    pub fn validate_header(
        &self,
        header: &BlockHeader,
        ctx: &BlockContext,
    ) -> Result<(), ValidationError> {
        if header.prev_block_hash != ctx.prev_hash {
            return Err(ValidationError::ChainMismatch {
                expected: ctx.prev_hash,
                found: header.prev_block_hash,
            });
        }

        if header.bits != ctx.expected_bits {
            return Err(ValidationError::DifficultyMismatch {
                expected: ctx.expected_bits,
                found: header.bits,
            });
        }

        if !check_proof_of_work(header) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        // Check version (must be >= 1)
        if header.version < 1 {
            return Err(ValidationError::InvalidVersion);
        }

        // Check timestamp (not too far in the future - within 2 hours)
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);

        if header.timestamp as u64 > now + MAX_FUTURE_BLOCK_TIME {
            return Err(ValidationError::InvalidTimestamp);
        }

        Ok(())
    }

    /// Validate a complete block against the UTXO set as of its parent.
    /// Returns the fees it collects.
    pub fn validate_block(
        &self,
        block: &Block,
        ctx: &BlockContext,
        utxo_set: &UtxoSet,
    ) -> Result<Amount, ValidationError> {
        self.validate_header(&block.header, ctx)?;

        // Must have at least one transaction
        let Some((coinbase, rest)) = block.transactions.split_first() else {
            return Err(ValidationError::NoTransactions);
        };

        if block.transactions.len() > self.params.max_block_transactions {
            return Err(ValidationError::TooManyTransactions {
                count: block.transactions.len(),
                limit: self.params.max_block_transactions,
            });
        }

        // First transaction must be coinbase, and only the first
        if !coinbase.is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }
        if rest.iter().any(Transaction::is_coinbase) {
            return Err(ValidationError::MultipleCoinbase);
        }
        if coinbase.lock_time != ctx.height {
            return Err(ValidationError::Malformed(format!(
                "coinbase commits to height {}, block is at {}",
                coinbase.lock_time, ctx.height
            )));
        }

        // Validate merkle root
        if Block::calculate_merkle_root(&block.transactions) != block.header.merkle_root {
            return Err(ValidationError::MerkleMismatch);
        }

        let mut txids = HashSet::with_capacity(block.transactions.len());
        for txid in block.txids() {
            if !txids.insert(txid) {
                return Err(ValidationError::DuplicateTransaction(txid));
            }
        }

        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut fees: Amount = 0;
        for tx in rest {
            for input in &tx.inputs {
                if !spent.insert(input.previous_output) {
                    return Err(ValidationError::DoubleSpendInBlock(input.previous_output));
                }
            }

            let fee = TransactionValidator::validate(tx, utxo_set, ctx.height)?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| ValidationError::Malformed("fee total overflows".to_string()))?;
        }

        let expected = reward_for_height(ctx.height, self.params)
            .checked_add(fees)
            .ok_or_else(|| ValidationError::Malformed("reward overflows".to_string()))?;
        let found = coinbase.total_output_value().ok_or_else(|| {
            ValidationError::Malformed("coinbase output total overflows".to_string())
        })?;
        if found != expected {
            return Err(ValidationError::RewardMismatch { expected, found });
        }

        Ok(fees)
    }
}

/// Replay `chain` from genesis, checking every block. Returns the UTXO set
/// at the tip.
pub fn validate_chain(chain: &[Block], params: &ChainParams) -> Result<UtxoSet, ChainError> {
    let genesis = chain.first().ok_or(ChainError::Empty)?;
    let expected_genesis = params.genesis_block();
    if *genesis != expected_genesis {
        return Err(ChainError::GenesisMismatch {
            expected: expected_genesis.hash(),
            found: genesis.hash(),
        });
    }

    let mut utxo_set = UtxoSet::new();
    utxo_set.apply_block(genesis, 0);

    let validator = BlockValidator::new(params);
    for (index, block) in chain.iter().enumerate().skip(1) {
        let ctx = BlockContext::next(&chain[..index], params);
        validator
            .validate_block(block, &ctx, &utxo_set)
            .map_err(|source| ChainError::InvalidBlock {
                height: ctx.height,
                source,
            })?;
        utxo_set.apply_block(block, ctx.height);
    }

    Ok(utxo_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::{Miner, MiningOutcome};
    use crate::core::{KeyPair, Script, TxInput, TxOutput, Witness};
    use std::sync::atomic::AtomicBool;

    fn pay_to(kp: &KeyPair, value: Amount) -> TxOutput {
        TxOutput::new(value, Script::lock(&kp.address).unwrap())
    }

    fn sign_all(tx: &mut Transaction, kp: &KeyPair) {
        let sighash = tx.signature_hash();
        for input in &mut tx.inputs {
            input.witness = Witness::new(kp.sign(&sighash), kp.pubkey_bytes());
        }
    }

    /// Assemble and mine the next block over `chain`
    fn mine_next(
        chain: &[Block],
        params: &ChainParams,
        miner_kp: &KeyPair,
        txs: Vec<Transaction>,
        fees: Amount,
    ) -> Block {
        let ctx = BlockContext::next(chain, params);
        let reward = reward_for_height(ctx.height, params) + fees;
        let coinbase = Transaction::coinbase(vec![pay_to(miner_kp, reward)], ctx.height);

        let mut transactions = vec![coinbase];
        transactions.extend(txs);

        let timestamp = chain.last().unwrap().header.timestamp + params.target_block_time;
        let mut header = BlockHeader::new(
            1,
            ctx.prev_hash,
            Block::calculate_merkle_root(&transactions),
            timestamp,
            ctx.expected_bits,
            0,
        );
        let stop = AtomicBool::new(false);
        assert!(matches!(
            Miner::new(ctx.expected_bits).mine(&mut header, &stop),
            MiningOutcome::Found(_)
        ));
        Block::new(header, transactions)
    }

    /// Genesis plus one block paying `kp`
    fn funded_chain(params: &ChainParams, kp: &KeyPair) -> Vec<Block> {
        let mut chain = vec![params.genesis_block()];
        let block = mine_next(&chain, params, kp, vec![], 0);
        chain.push(block);
        chain
    }

    fn spend(chain: &[Block], from: &KeyPair, to: &KeyPair, amount: Amount, fee: Amount) -> Transaction {
        let funding = &chain[1].transactions[0];
        let total = funding.outputs[0].value;
        let mut tx = Transaction::new(
            vec![TxInput::new(OutPoint::new(funding.txid(), 0))],
            vec![pay_to(to, amount), pay_to(from, total - amount - fee)],
        );
        sign_all(&mut tx, from);
        tx
    }

    #[test]
    fn test_validate_transaction_fee() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let chain = funded_chain(&params, &alice);
        let utxo = validate_chain(&chain, &params).unwrap();

        let tx = spend(&chain, &alice, &bob, 1_000, 250);
        assert_eq!(validate_transaction(&tx, &utxo, 2), Ok(250));
    }

    #[test]
    fn test_transaction_structure_errors() {
        let alice = KeyPair::generate();
        let utxo = UtxoSet::new();

        let coinbase = Transaction::coinbase(vec![pay_to(&alice, 1)], 0);
        assert!(matches!(
            validate_transaction(&coinbase, &utxo, 1),
            Err(ValidationError::Malformed(_))
        ));

        let outpoint = OutPoint::new(Hash256::new([7; 32]), 0);
        let no_outputs = Transaction::new(vec![TxInput::new(outpoint)], vec![]);
        assert!(matches!(
            validate_transaction(&no_outputs, &utxo, 1),
            Err(ValidationError::Malformed(_))
        ));

        let dup = Transaction::new(
            vec![TxInput::new(outpoint), TxInput::new(outpoint)],
            vec![pay_to(&alice, 1)],
        );
        assert_eq!(
            validate_transaction(&dup, &utxo, 1),
            Err(ValidationError::DuplicateInput(outpoint))
        );

        let unknown = Transaction::new(vec![TxInput::new(outpoint)], vec![pay_to(&alice, 1)]);
        assert_eq!(
            validate_transaction(&unknown, &utxo, 1),
            Err(ValidationError::UnknownUtxo(outpoint))
        );
    }

    #[test]
    fn test_transaction_authorization_and_funds() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let chain = funded_chain(&params, &alice);
        let utxo = validate_chain(&chain, &params).unwrap();
        let funding = OutPoint::new(chain[1].transactions[0].txid(), 0);

        let mut stolen = Transaction::new(vec![TxInput::new(funding)], vec![pay_to(&mallory, 10)]);
        sign_all(&mut stolen, &mallory);
        assert_eq!(
            validate_transaction(&stolen, &utxo, 2),
            Err(ValidationError::AuthorizationFailed { input: 0 })
        );

        let mut overspend = Transaction::new(
            vec![TxInput::new(funding)],
            vec![pay_to(&mallory, params.initial_reward + 1)],
        );
        sign_all(&mut overspend, &alice);
        assert_eq!(
            validate_transaction(&overspend, &utxo, 2),
            Err(ValidationError::InsufficientFunds {
                input_total: params.initial_reward,
                output_total: params.initial_reward + 1,
            })
        );

        // Tampering after signing breaks the signature hash
        let mut tampered = spend(&chain, &alice, &mallory, 10, 0);
        tampered.outputs[0].value = 20;
        assert_eq!(
            validate_transaction(&tampered, &utxo, 2),
            Err(ValidationError::AuthorizationFailed { input: 0 })
        );
    }

    #[test]
    fn test_locked_output() {
        let alice = KeyPair::generate();
        let mut utxo = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::new([9; 32]), 0);
        utxo.add_utxo(
            outpoint,
            crate::storage::Utxo::new(
                TxOutput::locked_until(1000, Script::lock(&alice.address).unwrap(), 10),
                1,
                false,
            ),
        );

        let mut tx = Transaction::new(vec![TxInput::new(outpoint)], vec![pay_to(&alice, 900)]);
        sign_all(&mut tx, &alice);

        assert_eq!(
            validate_transaction(&tx, &utxo, 9),
            Err(ValidationError::LockedOutput {
                outpoint,
                lock_height: 10,
                spend_height: 9,
            })
        );
        assert_eq!(validate_transaction(&tx, &utxo, 10), Ok(100));
    }

    #[test]
    fn test_validate_chain_accepts_mined_blocks() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut chain = funded_chain(&params, &alice);

        let tx = spend(&chain, &alice, &bob, 1_000, 500);
        let block = mine_next(&chain, &params, &bob, vec![tx], 500);
        chain.push(block);

        let utxo = validate_chain(&chain, &params).unwrap();
        assert_eq!(
            utxo.get_balance(&bob.address),
            1_000 + params.initial_reward + 500
        );
        assert_eq!(
            utxo.get_balance(&alice.address),
            params.initial_reward - 1_000 - 500
        );
    }

    #[test]
    fn test_validate_chain_rejects_foreign_genesis() {
        let params = ChainParams::regtest();
        let chain = vec![ChainParams::default().genesis_block()];
        assert!(matches!(
            validate_chain(&chain, &params),
            Err(ChainError::GenesisMismatch { .. })
        ));
        assert_eq!(validate_chain(&[], &params), Err(ChainError::Empty));
    }

    #[test]
    fn test_validate_chain_reports_height() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let mut chain = funded_chain(&params, &alice);
        let block = mine_next(&chain, &params, &alice, vec![], 0);
        chain.push(block);

        // Break the link at height 2
        chain[2].header.prev_block_hash = Hash256::new([1; 32]);

        match validate_chain(&chain, &params) {
            Err(ChainError::InvalidBlock { height, source }) => {
                assert_eq!(height, 2);
                assert!(matches!(source, ValidationError::ChainMismatch { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_block_reward_mismatch() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let chain = vec![params.genesis_block()];

        // Claims a fee that was never collected
        let block = mine_next(&chain, &params, &alice, vec![], 1);
        let ctx = BlockContext::next(&chain, &params);
        let utxo = validate_chain(&chain, &params).unwrap();

        assert_eq!(
            BlockValidator::new(&params).validate_block(&block, &ctx, &utxo),
            Err(ValidationError::RewardMismatch {
                expected: params.initial_reward,
                found: params.initial_reward + 1,
            })
        );
    }

    #[test]
    fn test_block_double_spend() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let chain = funded_chain(&params, &alice);
        let utxo = validate_chain(&chain, &params).unwrap();

        let first = spend(&chain, &alice, &bob, 1_000, 0);
        let second = spend(&chain, &alice, &bob, 2_000, 0);
        let block = mine_next(&chain, &params, &bob, vec![first.clone(), second], 0);
        let ctx = BlockContext::next(&chain, &params);

        assert_eq!(
            BlockValidator::new(&params).validate_block(&block, &ctx, &utxo),
            Err(ValidationError::DoubleSpendInBlock(first.inputs[0].previous_output))
        );
    }

    #[test]
    fn test_repeated_transaction_rejected_despite_matching_root() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let chain = funded_chain(&params, &alice);
        let utxo = validate_chain(&chain, &params).unwrap();

        let first = spend(&chain, &alice, &bob, 1_000, 0);
        let second = spend(&chain, &alice, &bob, 2_000, 0);
        let block = mine_next(&chain, &params, &bob, vec![first, second.clone(), second.clone()], 0);

        // [cb, a, b, b] commits to the same root as [cb, a, b]
        let unique = &block.transactions[..3];
        assert_eq!(Block::calculate_merkle_root(unique), block.header.merkle_root);

        let ctx = BlockContext::next(&chain, &params);
        assert_eq!(
            BlockValidator::new(&params).validate_block(&block, &ctx, &utxo),
            Err(ValidationError::DuplicateTransaction(second.txid()))
        );
    }

    #[test]
    fn test_block_structure_errors() {
        let params = ChainParams::regtest();
        let alice = KeyPair::generate();
        let chain = vec![params.genesis_block()];
        let ctx = BlockContext::next(&chain, &params);
        let utxo = validate_chain(&chain, &params).unwrap();
        let validator = BlockValidator::new(&params);

        let good = mine_next(&chain, &params, &alice, vec![], 0);
        assert_eq!(validator.validate_block(&good, &ctx, &utxo), Ok(0));

        let mut bad_merkle = good.clone();
        bad_merkle.header.merkle_root = Hash256::zero();
        // Re-mine so proof-of-work is not the first failure
        let stop = AtomicBool::new(false);
        Miner::new(bad_merkle.header.bits).mine(&mut bad_merkle.header, &stop);
        assert_eq!(
            validator.validate_block(&bad_merkle, &ctx, &utxo),
            Err(ValidationError::MerkleMismatch)
        );

        let mut wrong_bits = good.clone();
        wrong_bits.header.bits = 0x1d00ffff;
        assert_eq!(
            validator.validate_block(&wrong_bits, &ctx, &utxo),
            Err(ValidationError::DifficultyMismatch {
                expected: ctx.expected_bits,
                found: 0x1d00ffff,
            })
        );

        let mut empty = good.clone();
        empty.transactions.clear();
        empty.header.merkle_root = Block::calculate_merkle_root(&[]);
        Miner::new(empty.header.bits).mine(&mut empty.header, &stop);
        assert_eq!(
            validator.validate_block(&empty, &ctx, &utxo),
            Err(ValidationError::NoTransactions)
        );
    }

    #[test]
    fn test_validate_header_pow() {
        let params = ChainParams::default();
        let validator = BlockValidator::new(&params);
        let ctx = BlockContext {
            height: 1,
            prev_hash: Hash256::new([1; 32]),
            expected_bits: 0x03000001,
        };

        // A target of 1 is never met by an unmined header
        let header = BlockHeader::new(1, ctx.prev_hash, Hash256::zero(), 1234567890, 0x03000001, 0);
        assert_eq!(
            validator.validate_header(&header, &ctx),
            Err(ValidationError::InvalidProofOfWork)
        );
    }
}
