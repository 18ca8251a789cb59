//! Multi-node simulation over in-process channels.
//!
//! Every node owns its own [`Ledger`]; nothing is shared between nodes.
//! Transactions and blocks travel as encoded frames, and each receiver
//! revalidates them against its own state before applying.

mod message;
mod node;

pub use message::Message;
pub use node::{Delivery, Node};

use crate::config::ChainParams;
use crate::core::{Address, DecodeError, Hash256, Transaction};
use crate::ledger::{Ledger, LedgerError, MineOutcome};
use node::Envelope;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

/// Inbox depth per node
const INBOX_CAPACITY: usize = 64;

/// Network errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("malformed payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("no node {0}")]
    UnknownNode(usize),

    #[error("node {0} is not running")]
    NodeUnavailable(usize),

    #[error("mining task failed: {0}")]
    Join(#[from] JoinError),
}

struct Peer {
    node: Node,
    inbox: mpsc::Sender<Envelope>,
}

/// A fully connected set of simulated nodes
pub struct Network {
    peers: Vec<Peer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Network {
    /// Start `count` nodes on the current tokio runtime, each with its own
    /// in-memory ledger at genesis
    pub fn new(count: usize, params: ChainParams) -> Result<Self, NetworkError> {
        let mut peers = Vec::with_capacity(count);
        let mut tasks = Vec::with_capacity(count);

        for id in 0..count {
            let node = Node::new(id, Ledger::new(params.clone())?);
            let (inbox, receiver) = mpsc::channel(INBOX_CAPACITY);
            tasks.push(tokio::spawn(node.clone().run(receiver)));
            peers.push(Peer { node, inbox });
        }

        log::info!("Started {} simulated nodes", count);
        Ok(Self { peers, tasks })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn node(&self, id: usize) -> Result<&Node, NetworkError> {
        self.peers
            .get(id)
            .map(|peer| &peer.node)
            .ok_or(NetworkError::UnknownNode(id))
    }

    pub fn ledger(&self, id: usize) -> Result<&Ledger, NetworkError> {
        Ok(self.node(id)?.ledger())
    }

    /// Send `message` from `origin` to every other node and collect their
    /// verdicts, in node order
    pub async fn broadcast(
        &self,
        origin: usize,
        message: &Message,
    ) -> Result<Vec<(usize, Delivery)>, NetworkError> {
        let frame = message.encode();
        let mut pending = Vec::with_capacity(self.peers.len());

        for peer in self.peers.iter().filter(|peer| peer.node.id() != origin) {
            let id = peer.node.id();
            let (reply, verdict) = oneshot::channel();
            let envelope = Envelope {
                from: origin,
                frame: frame.clone(),
                reply,
            };
            peer.inbox
                .send(envelope)
                .await
                .map_err(|_| NetworkError::NodeUnavailable(id))?;
            pending.push((id, verdict));
        }

        let mut deliveries = Vec::with_capacity(pending.len());
        for (id, verdict) in pending {
            let delivery = verdict
                .await
                .map_err(|_| NetworkError::NodeUnavailable(id))?;
            deliveries.push((id, delivery));
        }
        Ok(deliveries)
    }

    /// Admit `tx` at `origin`, then relay it to every other node
    pub async fn submit_transaction(
        &self,
        origin: usize,
        tx: Transaction,
    ) -> Result<Hash256, NetworkError> {
        let txid = self.ledger(origin)?.submit_transaction(tx.clone())?;

        for (id, delivery) in self.broadcast(origin, &Message::Transaction(tx)).await? {
            if let Delivery::Rejected(reason) = delivery {
                log::warn!("Node {} rejected transaction {}: {}", id, txid, reason);
            }
        }
        Ok(txid)
    }

    /// Mine on `origin` off the async runtime and announce a found block
    pub async fn mine(&self, origin: usize, miner: &Address) -> Result<MineOutcome, NetworkError> {
        let node = self.node(origin)?.clone();
        node.stop_flag().store(false, Ordering::SeqCst);

        let miner = miner.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            node.ledger().mine_block(&miner, node.stop_flag())
        })
        .await??;

        if let MineOutcome::Mined { height, block, .. } = &outcome {
            let deliveries = self.broadcast(origin, &Message::Block(block.clone())).await?;
            let accepted = deliveries
                .iter()
                .filter(|(_, delivery)| *delivery == Delivery::Accepted)
                .count();
            log::info!(
                "Node {} mined height {}, accepted by {}/{} peers",
                origin,
                height,
                accepted,
                deliveries.len()
            );
        }
        Ok(outcome)
    }

    /// Cancel any nonce search running on `id`
    pub fn stop_mining(&self, id: usize) -> Result<(), NetworkError> {
        self.node(id)?.stop_flag().store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Tip hash of every node, in node order
    pub fn tips(&self) -> Vec<Hash256> {
        self.peers
            .iter()
            .map(|peer| peer.node.ledger().tip_hash())
            .collect()
    }

    /// Whether every node agrees on the tip
    pub fn is_converged(&self) -> bool {
        self.tips().windows(2).all(|pair| pair[0] == pair[1])
    }

    /// Close every inbox and wait for the node tasks to finish
    pub async fn shutdown(self) {
        let Network { peers, tasks } = self;
        drop(peers);
        for task in tasks {
            if let Err(err) = task.await {
                log::warn!("Node task ended abnormally: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, COIN, KeyPair, Script, TxInput, TxOutput, Witness};

    fn mined_height(outcome: MineOutcome) -> u32 {
        match outcome {
            MineOutcome::Mined { height, .. } => height,
            MineOutcome::Cancelled => panic!("mining was not cancelled"),
        }
    }

    fn payment(ledger: &Ledger, from: &KeyPair, to: &Address, amount: Amount, fee: Amount) -> Transaction {
        let (outpoint, utxo) = ledger
            .spendable_utxos(&from.address)
            .into_iter()
            .next()
            .expect("funded");
        let mut tx = Transaction::new(
            vec![TxInput::new(outpoint)],
            vec![
                TxOutput::new(amount, Script::lock(to).unwrap()),
                TxOutput::new(
                    utxo.output.value - amount - fee,
                    Script::lock(&from.address).unwrap(),
                ),
            ],
        );
        let sighash = tx.signature_hash();
        tx.inputs[0].witness = Witness::new(from.sign(&sighash), from.pubkey_bytes());
        tx
    }

    #[tokio::test]
    async fn test_blocks_and_transactions_propagate() {
        let network = Network::new(3, ChainParams::regtest()).unwrap();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = KeyPair::generate();

        assert_eq!(mined_height(network.mine(0, &alice.address).await.unwrap()), 1);
        assert!(network.is_converged());
        for id in 0..network.len() {
            assert_eq!(network.ledger(id).unwrap().get_balance(&alice.address), 50 * COIN);
        }

        let tx = payment(network.ledger(0).unwrap(), &alice, &bob.address, 5 * COIN, COIN / 10);
        let txid = network.submit_transaction(0, tx).await.unwrap();
        for id in 0..network.len() {
            assert!(network.ledger(id).unwrap().get_transaction(&txid).is_some());
        }

        assert_eq!(mined_height(network.mine(2, &carol.address).await.unwrap()), 2);
        assert!(network.is_converged());
        for id in 0..network.len() {
            let ledger = network.ledger(id).unwrap();
            assert_eq!(ledger.mempool_len(), 0);
            assert_eq!(ledger.get_balance(&bob.address), 5 * COIN);
            assert_eq!(ledger.get_balance(&carol.address), 50 * COIN + COIN / 10);
            assert_eq!(ledger.validate_chain().unwrap(), 2);
        }

        // Node 2's own search was not disturbed by its own block
        assert!(!network.node(2).unwrap().stop_requested());
        assert!(network.node(1).unwrap().stop_requested());

        network.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_transaction_is_known() {
        let network = Network::new(2, ChainParams::regtest()).unwrap();
        let alice = KeyPair::generate();
        network.mine(0, &alice.address).await.unwrap();

        let tx = payment(network.ledger(0).unwrap(), &alice, &alice.address, COIN, 0);
        network.submit_transaction(0, tx.clone()).await.unwrap();

        let deliveries = network
            .broadcast(0, &Message::Transaction(tx))
            .await
            .unwrap();
        assert_eq!(deliveries, vec![(1, Delivery::Known)]);

        network.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_at_origin_is_not_relayed() {
        let network = Network::new(2, ChainParams::regtest()).unwrap();
        let alice = KeyPair::generate();
        network.mine(0, &alice.address).await.unwrap();

        let mut tx = payment(network.ledger(0).unwrap(), &alice, &alice.address, COIN, 0);
        tx.inputs[0].witness = Witness::empty();

        assert!(matches!(
            network.submit_transaction(0, tx).await,
            Err(NetworkError::Ledger(LedgerError::Validation(_)))
        ));
        assert_eq!(network.ledger(1).unwrap().mempool_len(), 0);
        assert!(matches!(network.node(5), Err(NetworkError::UnknownNode(5))));

        network.shutdown().await;
    }
}
