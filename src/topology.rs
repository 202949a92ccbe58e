use crate::graph::{ChannelGraph, Node};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// On-disk network description.
///
/// ```toml
/// [[nodes]]
/// id = "node_0"
///
/// [[channels]]
/// id = "ch_0"
/// a = "node_0"
/// b = "node_1"
/// capacity = 1000.0
/// balance_a = 500.0
/// fee_rate = 0.001
/// ```
#[derive(Debug, Deserialize)]
pub struct TopologyFile {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
}

#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default = "default_true")]
    pub can_lead: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChannelSpec {
    pub id: String,
    pub a: String,
    pub b: String,
    pub capacity: f64,
    /// Balance on `a`'s side; `b` holds the remainder.
    pub balance_a: f64,
    #[serde(default)]
    pub fee_rate: f64,
}

fn default_true() -> bool {
    true
}

/// Load and validate a topology file into a channel graph.
pub fn load(path: &Path) -> anyhow::Result<ChannelGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology at {}", path.display()))?;
    let file: TopologyFile =
        toml::from_str(&content).with_context(|| "Failed to parse topology file")?;
    build(file)
}

/// Build a graph from a parsed topology; endpoint and balance validation
/// happens in the graph's own checked constructors.
pub fn build(file: TopologyFile) -> anyhow::Result<ChannelGraph> {
    let mut graph = ChannelGraph::new();
    for spec in file.nodes {
        let mut node = Node::new(spec.id);
        node.can_lead = spec.can_lead;
        graph.add_node(node);
    }
    for spec in file.channels {
        graph
            .add_channel(
                &spec.id,
                &spec.a,
                &spec.b,
                spec.capacity,
                spec.balance_a,
                spec.fee_rate,
            )
            .with_context(|| format!("Invalid channel {}", spec.id))?;
    }
    graph.check_invariants()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
[[nodes]]
id = "node_a"

[[nodes]]
id = "node_b"

[[nodes]]
id = "node_c"
can_lead = false

[[channels]]
id = "ab"
a = "node_a"
b = "node_b"
capacity = 1000.0
balance_a = 600.0
fee_rate = 0.001

[[channels]]
id = "bc"
a = "node_b"
b = "node_c"
capacity = 500.0
balance_a = 250.0
"#;

    #[test]
    fn test_build_from_toml() {
        let file: TopologyFile = toml::from_str(TRIANGLE).unwrap();
        let graph = build(file).unwrap();

        assert_eq!(graph.node_ids().count(), 3);
        assert_eq!(graph.channel_count(), 2);
        assert_eq!(graph.channel("ab").unwrap().local("node_a"), 600.0);
        assert_eq!(graph.channel("ab").unwrap().local("node_b"), 400.0);
        assert!(!graph.node("node_c").unwrap().can_lead);
        // Unset fee_rate defaults to zero.
        assert_eq!(graph.channel("bc").unwrap().fee_rate, 0.0);
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let bad = r#"
[[nodes]]
id = "node_a"

[[channels]]
id = "ax"
a = "node_a"
b = "node_x"
capacity = 1000.0
balance_a = 500.0
"#;
        let file: TopologyFile = toml::from_str(bad).unwrap();
        let err = build(file).unwrap_err();
        assert!(format!("{:#}", err).contains("ax"));
    }

    #[test]
    fn test_balance_exceeding_capacity_rejected() {
        let bad = r#"
[[nodes]]
id = "node_a"

[[nodes]]
id = "node_b"

[[channels]]
id = "ab"
a = "node_a"
b = "node_b"
capacity = 1000.0
balance_a = 1200.0
"#;
        let file: TopologyFile = toml::from_str(bad).unwrap();
        assert!(build(file).is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = load(Path::new("/nonexistent/topology.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read topology"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.toml");
        std::fs::write(&path, TRIANGLE).unwrap();
        let graph = load(&path).unwrap();
        assert_eq!(graph.channel_count(), 2);
    }
}
