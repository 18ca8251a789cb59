// Consensus and validation logic

pub mod pow;
pub mod validation;

pub use pow::{
    Miner, MiningOutcome, MiningResult, Target, U256, check_proof_of_work, next_bits, retarget,
    reward_for_height,
};
pub use validation::{
    BlockContext, BlockValidator, ChainError, TransactionValidator, ValidationError,
    validate_chain, validate_transaction,
};
