// Transaction builder

use super::{Keystore, WalletError};
use crate::core::{Address, Amount, OutPoint, Script, Transaction, TxInput, TxOutput, Witness};
use crate::ledger::Ledger;
use crate::storage::Utxo;

/// Builds signed payments from keystore addresses against a ledger's
/// currently spendable outputs
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    ledger: &'a Ledger,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(keystore: &'a Keystore, ledger: &'a Ledger) -> Self {
        Self { keystore, ledger }
    }

    /// Pay `amount` to `to`, returning change to `from`
    pub fn build(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
        fee: Amount,
    ) -> Result<Transaction, WalletError> {
        self.build_locked(from, to, amount, fee, 0)
    }

    /// Like [`build`](Self::build), but the payment output cannot be spent
    /// before `lock_height`
    pub fn build_locked(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
        fee: Amount,
        lock_height: u32,
    ) -> Result<Transaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        let keypair = self
            .keystore
            .get_keypair(from)
            .ok_or_else(|| WalletError::UnknownAddress(from.clone()))?;

        let target = amount
            .checked_add(fee)
            .ok_or(WalletError::InsufficientFunds {
                available: 0,
                needed: Amount::MAX,
            })?;
        let utxos = self.ledger.spendable_utxos(from);
        let (selected, total_input) = select_utxos(&utxos, target)?;

        let inputs: Vec<TxInput> = selected.into_iter().map(TxInput::new).collect();

        let mut outputs = vec![TxOutput::locked_until(
            amount,
            Script::lock(to)?,
            lock_height,
        )];
        let change = total_input - target;
        if change > 0 {
            outputs.push(TxOutput::new(change, Script::lock(from)?));
        }

        let mut tx = Transaction::new(inputs, outputs);

        // Every input spends from the same key, so one signature covers all
        let sighash = tx.signature_hash();
        let witness = Witness::new(keypair.sign(&sighash), keypair.pubkey_bytes());
        for input in &mut tx.inputs {
            input.witness = witness.clone();
        }

        log::debug!(
            "Built {} paying {} to {} ({} inputs, change {})",
            tx.txid(),
            amount,
            to,
            tx.inputs.len(),
            change
        );
        Ok(tx)
    }

    pub fn get_balance(&self, address: &Address) -> Amount {
        self.ledger.get_balance(address)
    }

    /// Balance over every keystore address
    pub fn total_balance(&self) -> Amount {
        self.keystore
            .list_addresses()
            .iter()
            .map(|address| self.ledger.get_balance(address))
            .sum()
    }
}

/// Oldest-first selection until `target` is covered
fn select_utxos(
    utxos: &[(OutPoint, Utxo)],
    target: Amount,
) -> Result<(Vec<OutPoint>, Amount), WalletError> {
    let mut ordered: Vec<&(OutPoint, Utxo)> = utxos.iter().collect();
    ordered.sort_by_key(|(outpoint, utxo)| (utxo.height, *outpoint));

    let mut selected = Vec::new();
    let mut total: Amount = 0;

    for (outpoint, utxo) in ordered {
        selected.push(*outpoint);
        total = total.saturating_add(utxo.output.value);

        if total >= target {
            return Ok((selected, total));
        }
    }

    Err(WalletError::InsufficientFunds {
        available: total,
        needed: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::core::COIN;
    use crate::ledger::MineOutcome;
    use std::sync::atomic::AtomicBool;

    fn funded(keystore: &mut Keystore) -> (Ledger, Address) {
        let ledger = Ledger::new(ChainParams::regtest()).unwrap();
        let address = keystore.new_address();
        let stop = AtomicBool::new(false);
        assert!(matches!(
            ledger.mine_block(&address, &stop).unwrap(),
            MineOutcome::Mined { height: 1, .. }
        ));
        (ledger, address)
    }

    #[test]
    fn test_transaction_builder() {
        let mut keystore = Keystore::new();
        let (ledger, from) = funded(&mut keystore);
        let to = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &ledger);
        let tx = builder.build(&from, &to, 5 * COIN, COIN / 10).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 5 * COIN);
        assert_eq!(tx.outputs[1].value, 50 * COIN - 5 * COIN - COIN / 10);
        assert!(tx.outputs[1].script_pubkey.pays_to(&from));

        ledger.submit_transaction(tx).unwrap();
        assert_eq!(ledger.mempool_len(), 1);
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let mut keystore = Keystore::new();
        let (ledger, from) = funded(&mut keystore);
        let to = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &ledger);
        let tx = builder.build(&from, &to, 49 * COIN, COIN).unwrap();
        assert_eq!(tx.outputs.len(), 1);
        ledger.submit_transaction(tx).unwrap();
    }

    #[test]
    fn test_locked_payment() {
        let mut keystore = Keystore::new();
        let (ledger, from) = funded(&mut keystore);
        let to = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &ledger);
        let tx = builder.build_locked(&from, &to, COIN, 0, 10).unwrap();
        assert_eq!(tx.outputs[0].lock_height, 10);
        assert_eq!(tx.outputs[1].lock_height, 0);
    }

    #[test]
    fn test_insufficient_funds() {
        let mut keystore = Keystore::new();
        let (ledger, from) = funded(&mut keystore);
        let to = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &ledger);
        let result = builder.build(&from, &to, 50 * COIN, 1);
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { available, .. }) if available == 50 * COIN
        ));

        assert!(matches!(
            builder.build(&from, &to, 0, 0),
            Err(WalletError::ZeroAmount)
        ));
    }

    #[test]
    fn test_claimed_outputs_not_reused() {
        let mut keystore = Keystore::new();
        let (ledger, from) = funded(&mut keystore);
        let to = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &ledger);
        let first = builder.build(&from, &to, COIN, 0).unwrap();
        ledger.submit_transaction(first).unwrap();

        // The only coin is now claimed by the pending payment
        assert!(matches!(
            builder.build(&from, &to, COIN, 0),
            Err(WalletError::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_sender() {
        let keystore = Keystore::new();
        let ledger = Ledger::new(ChainParams::regtest()).unwrap();
        let stranger = crate::core::KeyPair::generate().address;

        let builder = TransactionBuilder::new(&keystore, &ledger);
        assert!(matches!(
            builder.build(&stranger, &stranger, 1, 0),
            Err(WalletError::UnknownAddress(_))
        ));
        assert_eq!(builder.total_balance(), 0);
    }
}
