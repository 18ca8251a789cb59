// Core blockchain data structures

mod block;
mod hash;
pub mod keys;
pub mod merkle;
pub mod script;
mod serialize;
mod transaction;
mod types;

pub use block::*;
pub use hash::*;
pub use keys::{Address, KeyError, KeyPair};
pub use script::{Script, Witness};
pub use serialize::{DecodeError, Serializable};
pub use transaction::*;
pub use types::*;
