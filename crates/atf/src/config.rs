//! Cluster configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Command used to start and stop nodes when none is configured.
pub const DEFAULT_ROOT_CMD: &str = "ironfish";

fn default_root_cmd() -> String {
    DEFAULT_ROOT_CMD.to_string()
}

/// One node of the test network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNodeConfig {
    /// Node name, also used to tag its output.
    pub name: String,
    /// Graffiti the node mines with.
    pub graffiti: String,
    /// Peer port.
    pub port: u16,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Network the node joins.
    pub network_id: u32,
}

impl TestNodeConfig {
    /// Arguments that start this node.
    #[must_use]
    pub fn start_args(&self) -> Vec<String> {
        vec![
            "start".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--graffiti".to_string(),
            self.graffiti.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--datadir".to_string(),
            self.data_dir.display().to_string(),
            "--networkId".to_string(),
            self.network_id.to_string(),
        ]
    }

    /// Arguments that stop this node.
    #[must_use]
    pub fn stop_args(&self) -> Vec<String> {
        vec![
            "stop".to_string(),
            "--datadir".to_string(),
            self.data_dir.display().to_string(),
        ]
    }
}

/// The whole test network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Node executable.
    #[serde(default = "default_root_cmd")]
    pub root_cmd: String,
    /// Nodes to run.
    #[serde(default)]
    pub nodes: Vec<TestNodeConfig>,
}

impl ClusterConfig {
    /// Three nodes on ports 8001 to 8003 joined to network 2.
    #[must_use]
    pub fn example() -> Self {
        let nodes = (1..=3)
            .map(|i| TestNodeConfig {
                name: format!("node{i}"),
                graffiti: i.to_string(),
                port: 8000 + i,
                data_dir: PathBuf::from(format!("~/.ironfish_atf/node{i}")),
                network_id: 2,
            })
            .collect();

        Self {
            root_cmd: default_root_cmd(),
            nodes,
        }
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is malformed, or fails
    /// validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Io("failed to read cluster config", e))?;
        Self::from_toml_str(&contents)
    }

    /// Check that nodes do not collide.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if there are no nodes, the command is empty,
    /// or two nodes share a name, port or data directory.
    pub fn validate(&self) -> Result<()> {
        if self.root_cmd.trim().is_empty() {
            return Err(Error::Config("root_cmd must not be empty".to_string()));
        }
        if self.nodes.is_empty() {
            return Err(Error::Config("at least one node is required".to_string()));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        let mut data_dirs = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(Error::Config(format!("duplicate node name {}", node.name)));
            }
            if !ports.insert(node.port) {
                return Err(Error::Config(format!("duplicate port {}", node.port)));
            }
            if !data_dirs.insert(node.data_dir.as_path()) {
                return Err(Error::Config(format!(
                    "duplicate data directory {}",
                    node.data_dir.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config() {
        let config = ClusterConfig::example();

        assert_eq!(config.root_cmd, "ironfish");
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(
            config.nodes.iter().map(|n| n.port).collect::<Vec<_>>(),
            vec![8001, 8002, 8003]
        );
        assert!(config.nodes.iter().all(|n| n.network_id == 2));
        config.validate().unwrap();
    }

    #[test]
    fn test_start_args() {
        let node = &ClusterConfig::example().nodes[0];

        assert_eq!(
            node.start_args().join(" "),
            "start --name node1 --graffiti 1 --port 8001 --datadir ~/.ironfish_atf/node1 --networkId 2"
        );
        assert_eq!(node.stop_args().join(" "), "stop --datadir ~/.ironfish_atf/node1");
    }

    #[test]
    fn test_from_toml() {
        let config = ClusterConfig::from_toml_str(
            r#"
            [[nodes]]
            name = "alpha"
            graffiti = "a"
            port = 9001
            data_dir = "/tmp/atf/alpha"
            network_id = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.root_cmd, DEFAULT_ROOT_CMD);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].data_dir, PathBuf::from("/tmp/atf/alpha"));
    }

    #[test]
    fn test_example_survives_toml() {
        let config = ClusterConfig::example();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ClusterConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        let mut config = ClusterConfig::example();
        config.nodes[1].port = config.nodes[0].port;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("port")));

        let mut config = ClusterConfig::example();
        config.nodes[2].name = "node1".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("name")));

        let mut config = ClusterConfig::example();
        config.nodes[2].data_dir = config.nodes[0].data_dir.clone();
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("data directory")));

        assert!(ClusterConfig::from_toml_str("root_cmd = \"ironfish\"").is_err());
    }
}
