//! Topology Merger
//!
//! Runs the topojson command-line tools as typed external processes: every
//! step reads GeoJSON/TopoJSON on stdin or from declared files and writes its
//! result on stdout; a non-zero exit status is a failure.

use crate::config::ToolsConfig;
use crate::targets::write_artifact;
use crate::{CaravaneError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Name of the boundary object inside the topology
pub const BOUNDARY_OBJECT: &str = "departements";
/// Name of the merged shared-border object
pub const MERGED_OBJECT: &str = "frontieres";

/// One GeoJSON file added to the topology under `tag`
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyLayer {
    pub tag: String,
    pub path: PathBuf,
}

impl TopologyLayer {
    #[must_use]
    pub fn new(tag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            path: path.into(),
        }
    }

    fn as_arg(&self) -> Result<String> {
        if self.tag.is_empty() || self.tag.contains('=') {
            return Err(CaravaneError::malformed(format!(
                "'{}' cannot be used as a topology object name",
                self.tag
            )));
        }
        Ok(format!("{}={}", self.tag, self.path.display()))
    }
}

/// Merges boundaries and itinerary layers into one topology file
#[async_trait]
pub trait TopologyMerger: Send + Sync {
    async fn merge(&self, boundaries: &Path, layers: &[TopologyLayer], target: &Path)
    -> Result<()>;
}

/// A command-line program resolved against an extra tool directory
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: String,
    bin_dir: Option<PathBuf>,
}

impl ExternalTool {
    #[must_use]
    pub fn new(program: impl Into<String>, bin_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            bin_dir,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// `PATH` with the tool directory in front
    fn search_path(&self) -> Result<Option<OsString>> {
        let Some(bin_dir) = &self.bin_dir else {
            return Ok(None);
        };
        let mut dirs = vec![bin_dir.clone()];
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        std::env::join_paths(dirs)
            .map(Some)
            .map_err(|e| CaravaneError::external_tool(&self.program, e.to_string()))
    }

    /// Run the tool, feeding `stdin` and returning its stdout
    pub async fn run(&self, args: &[String], stdin: Option<Vec<u8>>) -> Result<Vec<u8>> {
        debug!("Running {} {:?}", self.program, args);

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = self.search_path()? {
            command.env("PATH", path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| CaravaneError::external_tool(&self.program, format!("cannot start: {e}")))?;

        // stdin is written while stdout is drained
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
                let written = pipe.write_all(&input).await;
                drop(pipe);
                written
            })),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CaravaneError::external_tool(&self.program, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaravaneError::external_tool(
                &self.program,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| CaravaneError::external_tool(&self.program, e.to_string()))?
                .map_err(|e| {
                    CaravaneError::external_tool(&self.program, format!("cannot write stdin: {e}"))
                })?;
        }

        Ok(output.stdout)
    }
}

/// `geo2topo | topomerge | topomerge --mesh` from the topojson-client/server packages
pub struct TopojsonCli {
    geo2topo: ExternalTool,
    topomerge: ExternalTool,
}

impl TopojsonCli {
    #[must_use]
    pub fn new(config: &ToolsConfig) -> Self {
        let bin_dir = (!config.bin_dir.as_os_str().is_empty()).then(|| config.bin_dir.clone());
        Self {
            geo2topo: ExternalTool::new(&config.geo2topo, bin_dir.clone()),
            topomerge: ExternalTool::new(&config.topomerge, bin_dir),
        }
    }
}

#[async_trait]
impl TopologyMerger for TopojsonCli {
    async fn merge(
        &self,
        boundaries: &Path,
        layers: &[TopologyLayer],
        target: &Path,
    ) -> Result<()> {
        info!(
            "Merging {} with {} itinerary layers into {}",
            boundaries.display(),
            layers.len(),
            target.display()
        );

        let mut geo2topo_args = vec![TopologyLayer::new(BOUNDARY_OBJECT, boundaries).as_arg()?];
        for layer in layers {
            geo2topo_args.push(layer.as_arg()?);
        }
        let topology = self.geo2topo.run(&geo2topo_args, None).await?;

        let merged = self
            .topomerge
            .run(&[format!("{MERGED_OBJECT}={BOUNDARY_OBJECT}")], Some(topology))
            .await?;

        let meshed = self
            .topomerge
            .run(
                &[
                    "--mesh".to_string(),
                    "-f".to_string(),
                    "a != b".to_string(),
                    format!("{BOUNDARY_OBJECT}={BOUNDARY_OBJECT}"),
                ],
                Some(merged),
            )
            .await?;

        let document: serde_json::Value = serde_json::from_slice(&meshed).map_err(|e| {
            CaravaneError::external_tool(self.topomerge.program(), format!("invalid output: {e}"))
        })?;
        if document.get("type").and_then(|t| t.as_str()) != Some("Topology") {
            return Err(CaravaneError::external_tool(
                self.topomerge.program(),
                "output is not a TopoJSON Topology",
            ));
        }

        write_artifact(target, &meshed).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_run_pipes_stdin_to_stdout() {
        let tool = ExternalTool::new("cat", None);
        let output = tool.run(&[], Some(b"{\"type\":\"Topology\"}".to_vec())).await.unwrap();
        assert_eq!(output, b"{\"type\":\"Topology\"}");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_external_tool_error() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "broken", "echo 'boom' >&2\nexit 3");
        let tool = ExternalTool::new("broken", Some(dir.path().to_path_buf()));

        let err = tool.run(&[], None).await.unwrap_err();
        match err {
            CaravaneError::ExternalTool { tool, message } => {
                assert_eq!(tool, "broken");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_tool_error() {
        let tool = ExternalTool::new("definitely-not-a-topojson-tool", None);
        let err = tool.run(&[], None).await.unwrap_err();
        assert!(matches!(err, CaravaneError::ExternalTool { .. }));
    }

    #[test]
    fn test_layer_tag_cannot_contain_equals() {
        assert!(TopologyLayer::new("a=b", "x.geojson").as_arg().is_err());
        assert_eq!(
            TopologyLayer::new("Tour2024", "build/caravane_Tour2024.geojson")
                .as_arg()
                .unwrap(),
            "Tour2024=build/caravane_Tour2024.geojson"
        );
    }

    #[tokio::test]
    async fn test_topojson_cli_chains_tools_from_bin_dir() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        // geo2topo echoes its object names; topomerge appends its first argument
        write_script(
            &bin,
            "geo2topo",
            r#"printf '{"type":"Topology","args":"%s"' "$*""#,
        );
        write_script(&bin, "topomerge", r#"cat; [ "$1" = "--mesh" ] && printf '}'; true"#);

        let config = ToolsConfig {
            bin_dir: bin,
            ..ToolsConfig::default()
        };
        let merger = TopojsonCli::new(&config);
        let target = dir.path().join("dist").join("topology.json");

        merger
            .merge(
                Path::new("build/hexagone.geojson"),
                &[TopologyLayer::new("Tour2024", "build/caravane_Tour2024.geojson")],
                &target,
            )
            .await
            .unwrap();

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(document["type"], "Topology");
        assert_eq!(
            document["args"],
            "departements=build/hexagone.geojson Tour2024=build/caravane_Tour2024.geojson"
        );
        assert!(!dir.path().join("dist").join("topology.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_previous_topology() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "geo2topo", r#"printf '{"type":"Topology"}'"#);
        write_script(dir.path(), "topomerge", "cat; [ \"$1\" = \"--mesh\" ] && exit 1; true");

        let target = dir.path().join("topology.json");
        std::fs::write(&target, b"{\"type\":\"Topology\",\"previous\":true}").unwrap();

        let config = ToolsConfig {
            bin_dir: dir.path().to_path_buf(),
            ..ToolsConfig::default()
        };
        assert!(
            TopojsonCli::new(&config)
                .merge(Path::new("h.geojson"), &[], &target)
                .await
                .is_err()
        );
        assert_eq!(
            std::fs::read(&target).unwrap(),
            b"{\"type\":\"Topology\",\"previous\":true}"
        );
    }

    #[tokio::test]
    async fn test_non_topology_output_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "geo2topo", r#"printf '{"type":"FeatureCollection"}'"#);
        write_script(dir.path(), "topomerge", "cat");

        let config = ToolsConfig {
            bin_dir: dir.path().to_path_buf(),
            ..ToolsConfig::default()
        };
        let err = TopojsonCli::new(&config)
            .merge(Path::new("h.geojson"), &[], &dir.path().join("t.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a TopoJSON Topology"));
    }
}
