use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::models::{Artifact, OutputKind, OutputRecord, Status};

/// Manifest schema version, bumped on breaking layout changes.
const MANIFEST_VERSION: &str = "1.0";

/// Asks the researcher to justify releasing a non-pass output.
///
/// An empty answer leaves the output blocked.
pub trait ExceptionPrompt {
    fn prompt(&self, uid: &str, status: Status, summary: &str) -> String;
}

/// Interactive prompt on the controlling terminal
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl ExceptionPrompt for TerminalPrompt {
    fn prompt(&self, uid: &str, status: Status, summary: &str) -> String {
        print!(
            "{} is {} ({}); reason for exception request (empty to withhold): ",
            uid,
            status.as_str(),
            summary
        );
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return String::new();
        }
        line.trim().to_string()
    }
}

/// Prompt that never grants an exception; for non-interactive runs.
#[derive(Debug, Default)]
pub struct DenyAll;

impl ExceptionPrompt for DenyAll {
    fn prompt(&self, _uid: &str, _status: Status, _summary: &str) -> String {
        String::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    fn file_name(&self) -> &'static str {
        match self {
            ManifestFormat::Json => "results.json",
            ManifestFormat::Yaml => "results.yaml",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: String,
    records: Vec<ManifestRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestRecord {
    uid: String,
    status: Status,
    kind: OutputKind,
    command: String,
    summary: String,
    /// Per-cell rule verdicts rendered as text, absent for non-tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Vec<Vec<String>>>,
    files: Vec<String>,
    timestamp: DateTime<Utc>,
    comments: Vec<String>,
    exception: String,
}

/// What the export run produced
#[derive(Debug, Default)]
pub struct FinaliseReport {
    /// File names written under the target directory.
    pub written: Vec<String>,
    /// Records skipped with an IO error, uid + message.
    pub failed: Vec<(String, String)>,
    /// Records withheld for lack of an exception.
    pub blocked: Vec<String>,
}

/// Export every releasable record to `target`: artifact files, a
/// `checksums/` directory with one SHA-256 per artifact, and the
/// manifest.
///
/// Non-pass records without a stored exception are prompted for one;
/// the answer goes into the manifest only, never back into the ledger.
/// A still-empty answer withholds the record.
pub fn finalise(
    ledger: &Ledger,
    target: &Path,
    format: ManifestFormat,
    prompt: &dyn ExceptionPrompt,
) -> Result<FinaliseReport> {
    let checksums = target.join("checksums");
    fs::create_dir_all(&checksums)
        .with_context(|| format!("creating output directory {}", checksums.display()))?;

    let mut report = FinaliseReport::default();
    let mut manifest = Manifest {
        version: MANIFEST_VERSION.to_string(),
        records: Vec::new(),
    };

    for record in ledger.records() {
        let exception = if record.needs_exception() {
            let answer = prompt.prompt(&record.uid, record.status, &record.summary);
            if answer.is_empty() {
                warn!(uid = %record.uid, "withheld: no exception supplied");
                report.blocked.push(record.uid.clone());
                continue;
            }
            answer
        } else {
            record.exception.clone()
        };

        let (files, failure) = export_artifacts(record, target, &checksums);
        report.written.extend(files.iter().cloned());
        match failure {
            None => manifest.records.push(ManifestRecord {
                uid: record.uid.clone(),
                status: record.status,
                kind: record.kind,
                command: record.command.clone(),
                summary: record.summary.clone(),
                outcome: record.outcome.as_ref().map(|o| o.render()),
                files,
                timestamp: record.timestamp,
                comments: record.comments.clone(),
                exception,
            }),
            Some(err) => {
                warn!(uid = %record.uid, error = %err, "export failed");
                report.failed.push((record.uid.clone(), format!("{err:#}")));
            }
        }
    }

    let manifest_path = target.join(format.file_name());
    let rendered = match format {
        ManifestFormat::Json => serde_json::to_string_pretty(&manifest)?,
        ManifestFormat::Yaml => serde_yaml::to_string(&manifest)?,
    };
    fs::write(&manifest_path, rendered)
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    report.written.push(format.file_name().to_string());

    info!(
        written = report.written.len(),
        blocked = report.blocked.len(),
        failed = report.failed.len(),
        "finalise complete"
    );
    Ok(report)
}

/// Write one record's artifacts, checksumming each as it lands.
///
/// Returns every file that made it to disk, so a mid-record failure
/// still leaves the survivors reported and checksummed.
fn export_artifacts(
    record: &OutputRecord,
    target: &Path,
    checksums: &Path,
) -> (Vec<String>, Option<anyhow::Error>) {
    let mut files = Vec::new();
    for (i, artifact) in record.artifacts.iter().enumerate() {
        let written: Result<String> = match artifact {
            Artifact::Table(table) => {
                let name = format!("{}_{}.csv", record.uid, i);
                fs::write(target.join(&name), table.to_csv())
                    .with_context(|| format!("writing {name}"))
                    .map(|()| name)
            }
            Artifact::Text(sections) => {
                let name = format!("{}.txt", record.uid);
                fs::write(target.join(&name), sections.join("\n\n"))
                    .with_context(|| format!("writing {name}"))
                    .map(|()| name)
            }
            Artifact::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("bad artifact path {}", path.display()))
                .and_then(|name| {
                    fs::copy(path, target.join(&name))
                        .with_context(|| format!("copying {}", path.display()))?;
                    Ok(name)
                }),
        };
        match written.and_then(|name| {
            write_checksum(target, checksums, &name)?;
            Ok(name)
        }) {
            Ok(name) => files.push(name),
            Err(err) => return (files, Some(err)),
        }
    }
    (files, None)
}

fn write_checksum(target: &Path, checksums: &Path, name: &str) -> Result<()> {
    let bytes = fs::read(target.join(name)).with_context(|| format!("reading back {name}"))?;
    let digest = Sha256::digest(&bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    fs::write(checksums.join(format!("{name}.txt")), hex)
        .with_context(|| format!("writing checksum for {name}"))?;
    Ok(())
}
