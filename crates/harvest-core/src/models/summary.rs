use serde::{Deserialize, Serialize};

/// Organization-level summary written at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunSummary {
    pub organization: String,
    pub total_lines_of_code: String,
    pub largest_repository: String,
    pub lines_of_code_largest_repo: String,
    #[serde(rename = "DevOpsPlatform")]
    pub dev_ops_platform: String,
    pub number_repos: u64,
}

/// Human form of a line count: `950`, `1.50K`, `2.00M`.
pub fn format_code_lines(lines: u64) -> String {
    let n = lines as f64;
    if lines >= 1_000_000 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if lines >= 1_000 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        lines.to_string()
    }
}

/// Human form of a byte count using binary units.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * KB;
    const GB: f64 = 1024.0 * MB;

    let n = bytes as f64;
    if n < KB {
        format!("{bytes} B")
    } else if n < MB {
        format!("{:.2} KB", n / KB)
    } else if n < GB {
        format!("{:.2} MB", n / MB)
    } else {
        format!("{:.2} GB", n / GB)
    }
}
