use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

/// The daemon configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of the control socket.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Static nodes constructed at startup.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Static links between the nodes above, by name.
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

/// A statically configured node.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Name the node is referred to by in links.
    pub name: String,
    /// The built-in factory: `silence-source` or `null-sink`.
    pub factory: String,
    /// Properties handed to the scheduler, such as `node.driver` or
    /// `node.latency`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A statically configured link.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Name of the producing node.
    pub output: String,
    /// Name of the consuming node.
    pub input: String,
}

fn default_socket() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    dir.join("skein-0")
}

impl Config {
    /// Load the configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Reading config {}", path.display()))?;

        toml::from_str(&text).with_context(|| format!("Parsing config {}", path.display()))
    }

    /// The built-in default: a silence source feeding a null sink driver.
    pub fn default_graph() -> Self {
        Self {
            socket: default_socket(),
            nodes: vec![
                NodeConfig {
                    name: "source".into(),
                    factory: "silence-source".into(),
                    properties: BTreeMap::new(),
                },
                NodeConfig {
                    name: "sink".into(),
                    factory: "null-sink".into(),
                    properties: [
                        ("node.driver".to_string(), "true".to_string()),
                        ("node.latency".to_string(), "1024/48000".to_string()),
                    ]
                    .into_iter()
                    .collect(),
                },
            ],
            links: vec![LinkConfig {
                output: "source".into(),
                input: "sink".into(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn parse_minimal() {
        let config: Config = toml::from_str(
            r#"
            socket = "/tmp/skein-test"

            [[nodes]]
            name = "src"
            factory = "silence-source"

            [[nodes]]
            name = "out"
            factory = "null-sink"
            properties = { "node.driver" = "true" }

            [[links]]
            output = "src"
            input = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.links.len(), 1);
        assert_eq!(config.nodes[1].properties.get("node.driver").unwrap(), "true");
    }
}
