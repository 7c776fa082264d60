//! Manifest merging
//!
//! [`CommandLineMerger`] runs the SDK manifest merger through java and turns
//! its log into a [`MergeReport`]. [`PlaceholderMerger`] is used when no
//! merger is configured: it only substitutes `${name}` placeholders in the
//! main manifest.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use andworx_core::{BuildError, Result};

use super::{ManifestMerger, MergeRecord, MergeReport, MergeRequest, Severity};
use crate::command::{classpath, ToolCommand};

const MERGER_MAIN: &str = "com.android.manifmerger.Merger";

/// `java com.android.manifmerger.Merger`
pub struct CommandLineMerger {
    java: PathBuf,
    classpath: PathBuf,
}

impl CommandLineMerger {
    pub fn new(java: PathBuf, classpath: PathBuf) -> Self {
        Self { java, classpath }
    }
}

impl ManifestMerger for CommandLineMerger {
    fn merge(&self, request: &MergeRequest) -> Result<MergeReport> {
        let mut command = ToolCommand::new("manifest merger", &self.java)
            .arg("-cp")
            .arg(&self.classpath)
            .arg(MERGER_MAIN)
            .arg("--main")
            .arg(&request.main_manifest)
            .arg("--out")
            .arg(&request.output)
            .arg("--log")
            .arg("INFO");

        if !request.libraries.is_empty() {
            command = command.arg("--libs").arg(classpath(&request.libraries));
        }
        if !request.overlays.is_empty() {
            command = command.arg("--overlays").arg(classpath(&request.overlays));
        }
        for (key, value) in &request.placeholders {
            command = command.arg("--placeholder").arg(format!("{}={}", key, value));
        }
        if request.remove_tools_declarations {
            command = command.arg("--remove-tools-declarations");
        }

        // The merger reports its errors in the log and exits non-zero;
        // both end up in the report.
        let log = match command.run() {
            Ok(output) => format!("{}\n{}", output.stdout, output.stderr),
            Err(BuildError::Tool { message, .. }) => message,
            Err(e) => return Err(e),
        };

        let mut report = parse_log(&log);
        if !report.is_error() && !request.output.exists() {
            report.records.push(MergeRecord {
                severity: Severity::Error,
                message: format!("merger produced no manifest at {}", request.output.display()),
            });
            report = MergeReport::from_records(report.records);
        }
        Ok(report)
    }
}

/// `[location] SEVERITY: message`
static RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<location>\S+)\s+)?(?P<severity>ERROR|Error|WARNING|Warning|INFO|Info):?\s*(?P<message>.*)$")
        .expect("merger record regex is valid")
});

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("placeholder regex is valid"));

/// Parse the merger log into records. Indented lines continue the
/// previous record.
pub(crate) fn parse_log(log: &str) -> MergeReport {
    let mut records: Vec<MergeRecord> = Vec::new();
    for line in log.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = RECORD.captures(line.trim_end()) {
            let severity = match &caps["severity"].to_ascii_lowercase()[..] {
                "error" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            let message = match caps.name("location") {
                Some(location) => format!("{} {}", location.as_str(), &caps["message"])
                    .trim_end()
                    .to_string(),
                None => caps["message"].to_string(),
            };
            records.push(MergeRecord { severity, message });
        } else if line.starts_with(char::is_whitespace) {
            if let Some(last) = records.last_mut() {
                last.message.push(' ');
                last.message.push_str(line.trim());
            }
        } else {
            debug!("merger: {}", line);
        }
    }
    MergeReport::from_records(records)
}

/// Copies the main manifest, substituting placeholders
pub struct PlaceholderMerger;

impl ManifestMerger for PlaceholderMerger {
    fn merge(&self, request: &MergeRequest) -> Result<MergeReport> {
        let source = std::fs::read_to_string(&request.main_manifest)
            .map_err(|e| BuildError::io(&request.main_manifest, e))?;

        let mut records = Vec::new();
        if !request.libraries.is_empty() {
            records.push(MergeRecord {
                severity: Severity::Warning,
                message: format!(
                    "no manifest merger configured, {} library manifests not merged",
                    request.libraries.len()
                ),
            });
        }

        let merged = substitute(&source, request, &mut records);
        write(&request.output, &merged)?;
        Ok(MergeReport::from_records(records))
    }
}

fn substitute(source: &str, request: &MergeRequest, records: &mut Vec<MergeRecord>) -> String {
    PLACEHOLDER
        .replace_all(source, |caps: &regex::Captures| {
            let key = &caps[1];
            match request.placeholders.get(key) {
                Some(value) => value.clone(),
                None => {
                    records.push(MergeRecord {
                        severity: Severity::Error,
                        message: format!(
                            "{}: placeholder ${{{}}} has no value",
                            request.main_manifest.display(),
                            key
                        ),
                    });
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| BuildError::io(path, e))
}
