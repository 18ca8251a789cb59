// Simulated node: one independent ledger driven by its inbox

use super::Message;
use crate::consensus::ValidationError;
use crate::ledger::{Ledger, LedgerError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};

/// How a node disposed of a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// Already in the mempool or chain
    Known,
    Rejected(String),
}

/// A framed message plus the channel its verdict goes back on
pub(crate) struct Envelope {
    pub from: usize,
    pub frame: Vec<u8>,
    pub reply: oneshot::Sender<Delivery>,
}

/// Network node
#[derive(Clone)]
pub struct Node {
    id: usize,
    ledger: Arc<Ledger>,
    stop: Arc<AtomicBool>,
}

impl Node {
    pub fn new(id: usize, ledger: Ledger) -> Self {
        Self {
            id,
            ledger: Arc::new(ledger),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Flag polled by this node's nonce search
    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stop
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Revalidate and apply a message against this node's own ledger
    pub fn handle(&self, message: Message) -> Delivery {
        match message {
            Message::Transaction(tx) => match self.ledger.submit_transaction(tx) {
                Ok(_) => Delivery::Accepted,
                Err(LedgerError::Validation(ValidationError::DuplicateTransaction(_))) => {
                    Delivery::Known
                }
                Err(err) => Delivery::Rejected(err.to_string()),
            },
            Message::Block(block) => {
                // A competing block makes any local template stale
                self.stop.store(true, Ordering::SeqCst);

                let hash = block.hash();
                match self.ledger.submit_block(block) {
                    Ok(_) => Delivery::Accepted,
                    Err(LedgerError::KnownBlock(_)) => Delivery::Known,
                    Err(err) => {
                        log::warn!("Node {} rejected block {}: {}", self.id, hash, err);
                        Delivery::Rejected(err.to_string())
                    }
                }
            }
        }
    }

    /// Serve the inbox until every sender is dropped
    pub(crate) async fn run(self, mut inbox: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            let delivery = match Message::decode(&envelope.frame) {
                Ok(message) => {
                    log::debug!(
                        "Node {} received {} {} from node {}",
                        self.id,
                        message.command(),
                        message.inventory_hash(),
                        envelope.from
                    );
                    self.handle(message)
                }
                Err(err) => Delivery::Rejected(err.to_string()),
            };

            // The sender may have stopped waiting
            let _ = envelope.reply.send(delivery);
        }

        log::debug!("Node {} inbox closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::core::{KeyPair, Transaction};
    use crate::ledger::MineOutcome;

    fn node(id: usize) -> Node {
        Node::new(id, Ledger::new(ChainParams::regtest()).unwrap())
    }

    #[test]
    fn test_block_raises_stop_flag() {
        let (origin, peer) = (node(0), node(1));
        let miner = KeyPair::generate();

        let block = match origin
            .ledger()
            .mine_block(&miner.address, &AtomicBool::new(false))
            .unwrap()
        {
            MineOutcome::Mined { block, .. } => block,
            MineOutcome::Cancelled => panic!("not cancelled"),
        };

        assert!(!peer.stop_requested());
        assert_eq!(peer.handle(Message::Block(block.clone())), Delivery::Accepted);
        assert!(peer.stop_requested());
        assert_eq!(peer.handle(Message::Block(block)), Delivery::Known);
        assert_eq!(peer.ledger().height(), 1);
    }

    #[test]
    fn test_invalid_transaction_rejected() {
        let peer = node(1);
        let tx = Transaction::coinbase(Vec::new(), 7);
        assert!(matches!(
            peer.handle(Message::Transaction(tx)),
            Delivery::Rejected(_)
        ));
        assert_eq!(peer.ledger().mempool_len(), 0);
    }
}
