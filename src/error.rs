//! Error taxonomy for synchronous, caller-observable failures.
//!
//! Asynchronous (in-simulation) failures — an ambiguous next hop, an
//! unreadable packet, an answer timeout — are not represented here: they are
//! logged and absorbed by the protocol loops, never returned as a `Result`.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("master is busy with a pending answer")]
    Busy,

    #[error("address space exhausted")]
    AddressExhausted,

    #[error("a node with static address {static_address} already exists")]
    DuplicateStaticAddress { static_address: u16 },

    #[error("could not parse config: {message}")]
    ConfigParse { message: String },
}
