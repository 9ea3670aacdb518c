use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use harvest_core::error::HarvestError;
use harvest_core::models::ScanReport;

const PATH_PLACEHOLDER: &str = "{path}";
const EXCLUDE_PLACEHOLDER: &str = "{exclude_ext}";

/// Counts code, comment and blank lines in a working tree.
#[async_trait]
pub trait CodeScanner: Send + Sync {
    async fn scan(&self, tree: &Path) -> Result<ScanReport, HarvestError>;
}

/// Runs an external line counter that prints a scan report as JSON.
///
/// `{path}` in any argument is replaced by the tree path (appended when no
/// argument mentions it) and `{exclude_ext}` by the comma-separated list of
/// excluded extensions.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    command: Vec<String>,
    excluded_extensions: Vec<String>,
}

impl CommandScanner {
    pub fn new(command: Vec<String>) -> Result<Self, HarvestError> {
        if command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(HarvestError::config("scanner.command must name a program"));
        }
        Ok(Self {
            command,
            excluded_extensions: Vec::new(),
        })
    }

    pub fn excluding(mut self, extensions: &[String]) -> Self {
        self.excluded_extensions = extensions.to_vec();
        self
    }

    fn args(&self, tree: &Path) -> Vec<String> {
        let path = tree.to_string_lossy();
        let excluded = self.excluded_extensions.join(",");
        let mut args: Vec<String> = self.command[1..]
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &path).replace(EXCLUDE_PLACEHOLDER, &excluded))
            .collect();
        if !self.command.iter().any(|a| a.contains(PATH_PLACEHOLDER)) {
            args.push(path.into_owned());
        }
        args
    }
}

#[async_trait]
impl CodeScanner for CommandScanner {
    async fn scan(&self, tree: &Path) -> Result<ScanReport, HarvestError> {
        let program = &self.command[0];
        let args = self.args(tree);
        debug!(program = %program, ?args, "scanning");

        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|e| HarvestError::Scanner {
                message: format!("failed to run {program}: {e}"),
            })?;
        if !output.status.success() {
            return Err(HarvestError::Scanner {
                message: format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        serde_json::from_slice(&output.stdout).map_err(|e| HarvestError::Scanner {
            message: format!("unreadable report from {program}: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_placeholder_substitution() {
        let scanner = CommandScanner::new(strings(&["gcloc", "--json", "--skip={exclude_ext}", "{path}"]))
            .unwrap()
            .excluding(&strings(&["md", "txt"]));
        assert_eq!(
            scanner.args(Path::new("/tmp/tree")),
            strings(&["--json", "--skip=md,txt", "/tmp/tree"])
        );

        let scanner = CommandScanner::new(strings(&["tokei"])).unwrap();
        assert_eq!(scanner.args(Path::new("/tmp/tree")), strings(&["/tmp/tree"]));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandScanner::new(Vec::new()).is_err());
        assert!(CommandScanner::new(strings(&[" "])).is_err());
    }

    #[tokio::test]
    async fn test_scan_parses_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("report.json"),
            r#"{"TotalFiles":2,"TotalLines":30,"TotalBlankLines":5,"TotalComments":5,"TotalCodeLines":20,
                "Results":[{"Language":"Rust","Files":2,"Lines":30,"BlankLines":5,"Comments":5,"CodeLines":20}]}"#,
        )
        .unwrap();
        let scanner = CommandScanner::new(strings(&["sh", "-c", "cat {path}/report.json"])).unwrap();
        let report = scanner.scan(dir.path()).await.unwrap();
        assert_eq!(report.total_code_lines, 20);
        assert_eq!(report.results[0].language, "Rust");
    }

    #[tokio::test]
    async fn test_garbage_output_is_scanner_error() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = CommandScanner::new(strings(&["echo", "not json"])).unwrap();
        let err = scanner.scan(dir.path()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Scanner { .. }));
    }
}
