//! Domain value types shared by the AMO state machine and its CLI: currency
//! arithmetic, addresses and keys, result codes, the application config, the
//! records stored in the Merkle tree, the signed transaction envelope, and the
//! genesis app state.

pub const AMO_APP_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));
pub const AMO_PROTOCOL_VERSION: u64 = 0x2;

pub const ADDRESS_SIZE: usize = 20;
pub const PUB_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

mod bytes;
mod code;
mod config;
mod currency;
mod genesis;
mod record;
mod tx;

pub use bytes::{Address, HexBytes, PubKey};
pub use code::{QueryCode, TxCode};
pub use config::AppConfig;
pub use currency::Currency;
pub use genesis::{GenesisAppState, GenesisBalance, GenesisDelegate, GenesisStake};
pub use record::{
    Delegate, DelegateEx, Draft, Extra, Parcel, ParcelEx, Request, RequestEx, Stake, Usage,
    UsageEx, Vote, VoteInfo,
};
pub use tx::{Signature, Tx, TxParseError};
