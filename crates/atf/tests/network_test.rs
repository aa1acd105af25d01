//! Spawning and stopping nodes, using a shell script standing in for the node binary.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use ironfish_atf::{ClusterConfig, CommandOutcome, Error, TestNetwork, TestNode, TestNodeConfig};
use tempfile::TempDir;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `start` records its pid in the data dir and sleeps; `stop` kills that pid.
const FAKE_NODE: &str = r#"#!/bin/sh
case "$1" in
  start)
    mkdir -p "$9"
    echo "$$" > "$9/pid"
    echo "node $3 listening on $7"
    exec sleep 60
    ;;
  stop)
    if [ ! -f "$3/pid" ]; then
      echo "no node running in $3" >&2
      exit 1
    fi
    kill "$(cat "$3/pid")"
    echo "stopped"
    ;;
esac
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fake_node(dir: &Path) -> String {
    let path = dir.join("fake-node");
    std::fs::write(&path, FAKE_NODE).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn cluster(dir: &TempDir, nodes: u16) -> ClusterConfig {
    ClusterConfig {
        root_cmd: fake_node(dir.path()),
        nodes: (1..=nodes)
            .map(|i| TestNodeConfig {
                name: format!("node{i}"),
                graffiti: i.to_string(),
                port: 18000 + i,
                data_dir: dir.path().join(format!("node{i}")),
                network_id: 2,
            })
            .collect(),
    }
}

async fn wait_for_pid_file(data_dir: &Path) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !data_dir.join("pid").exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_network_start_stop() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = cluster(&dir, 3);

    let mut network = TestNetwork::start(&config).await.unwrap();
    assert_eq!(network.nodes().len(), 3);
    for node in &config.nodes {
        wait_for_pid_file(&node.data_dir).await;
    }
    assert_eq!(network.alive_count(), 3);

    let reports = network.stop().await;
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(ironfish_atf::StopReport::is_success), "{reports:?}");
    assert_eq!(
        reports.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        vec!["node1", "node2", "node3"]
    );

    tokio::time::timeout(
        TEST_TIMEOUT,
        network.wait_for_shutdown(Duration::from_millis(20)),
    )
    .await
    .unwrap();
    assert_eq!(network.alive_count(), 0);
}

#[tokio::test]
async fn test_stop_reports_failure() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = cluster(&dir, 1);

    let mut node = TestNode::start(config.nodes[0].clone(), &config.root_cmd).unwrap();
    // A data dir no node was started in
    std::fs::create_dir_all(dir.path().join("elsewhere")).unwrap();
    let mut stray = config.nodes[0].clone();
    stray.data_dir = dir.path().join("elsewhere");
    let outcome = ironfish_atf::run_command(&config.root_cmd, stray.stop_args())
        .await
        .unwrap();

    assert!(
        matches!(&outcome, CommandOutcome::Failure { stderr } if stderr.contains("no node running")),
        "{outcome}"
    );

    node.kill().await.unwrap();
    let status = tokio::time::timeout(TEST_TIMEOUT, node.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(!status.success());
    assert!(!node.is_alive());
}

#[tokio::test]
async fn test_kill_all() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut network = TestNetwork::start(&cluster(&dir, 2)).await.unwrap();

    network.kill_all().await.unwrap();
    tokio::time::timeout(
        TEST_TIMEOUT,
        network.wait_for_shutdown(Duration::from_millis(20)),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_missing_binary() {
    let dir = TempDir::new().unwrap();
    let mut config = cluster(&dir, 2);
    config.root_cmd = dir.path().join("missing").display().to_string();

    let err = TestNetwork::start(&config).await.unwrap_err();
    assert!(matches!(err, Error::SpawnProcess { .. }));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = cluster(&dir, 2);
    config.nodes[1].port = config.nodes[0].port;

    let err = TestNetwork::start(&config).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("atf.toml");
    std::fs::write(
        &path,
        r#"
        root_cmd = "/usr/local/bin/ironfish"

        [[nodes]]
        name = "miner"
        graffiti = "m"
        port = 9100
        data_dir = "/tmp/atf/miner"
        network_id = 2

        [[nodes]]
        name = "peer"
        graffiti = "p"
        port = 9101
        data_dir = "/tmp/atf/peer"
        network_id = 2
        "#,
    )
    .unwrap();

    let config = ClusterConfig::from_file(&path).unwrap();
    assert_eq!(config.root_cmd, "/usr/local/bin/ironfish");
    assert_eq!(config.nodes[1].name, "peer");

    assert!(matches!(
        ClusterConfig::from_file(dir.path().join("absent.toml")),
        Err(Error::Io(..))
    ));
}
