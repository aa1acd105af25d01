//! Automated test network: runs several nodes locally from one configuration.
//!
//! A [`ClusterConfig`] lists the nodes. [`TestNetwork::start`] spawns each one
//! with `<root_cmd> start ...` and forwards its output to `tracing`;
//! [`TestNetwork::stop`] runs `<root_cmd> stop --datadir ...` per node and
//! reports a [`CommandOutcome`] for each.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod config;
pub mod error;
pub mod network;
pub mod node;

pub use command::{CommandOutcome, run_command};
pub use config::{ClusterConfig, DEFAULT_ROOT_CMD, TestNodeConfig};
pub use error::{Error, Result};
pub use network::{StopReport, TestNetwork};
pub use node::TestNode;
