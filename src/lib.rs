//! A discrete-event simulator of the ReThunder master/slave bus network
//! protocol: hybrid static/logic addressing, topology-aware request
//! routing, and noise-weighted re-addressing over a simulated shared
//! medium.
//!
//! The simulation kernel ([`kernel`]) is deliberately generic and carries
//! no protocol knowledge; everything protocol-specific builds on top of it
//! one layer at a time: [`message`]/[`bus`]/[`node`] model the physical
//! medium, [`packet`]/[`hamming`] model the wire format and its error
//! model, [`addressing`] models the master's view of the network, and
//! [`protocol`]/[`master`]/[`slave`] implement the ReThunder protocol
//! itself. [`network`] is the one place that wires a static-address graph
//! into a runnable set of buses and nodes.

pub mod addressing;
pub mod bus;
pub mod config;
pub mod error;
pub mod hamming;
pub mod kernel;
pub mod master;
pub mod message;
pub mod network;
pub mod node;
pub mod packet;
pub mod protocol;
pub mod slave;

pub use config::SimConfig;
pub use error::SimError;
pub use kernel::Environment;
pub use master::MasterNode;
pub use network::{Edge, Network, SlaveSpec};
pub use node::NodeId;
pub use slave::SlaveNode;
