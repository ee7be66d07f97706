use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use maidx_batch::{BatchReport, JobReport};

pub const BATCH_FILE: &str = "_batch.json";

/// Writes batch results into an output directory.
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Write `<stem>.json` per successful job, `<stem>.log.json` per kept
    /// transcript, and the `_batch.json` summary. Returns the files written.
    pub fn write_report(&self, report: &BatchReport, config: serde_json::Value) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        let mut stems = HashSet::new();

        for job in &report.jobs {
            let stem = unique_stem(job, &mut stems);
            if let Ok(result) = &job.outcome {
                written.push(self.write_json(&format!("{stem}.json"), &result.to_json())?);
            }
            if let Some(transcript) = &job.transcript {
                written.push(self.write_json(&format!("{stem}.log.json"), transcript)?);
            }
        }

        let mut summary = report.summary();
        summary["config"] = config;
        written.push(self.write_json(BATCH_FILE, &summary)?);
        Ok(written)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let body = serde_json::to_string_pretty(value).context("failed to serialize output")?;
        std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Wrote output file");
        Ok(path)
    }
}

/// File stem of the document name, suffixed with the job index when two
/// inputs share a stem.
fn unique_stem(job: &JobReport, seen: &mut HashSet<String>) -> String {
    let stem = Path::new(&job.document_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty() && !s.starts_with('_'))
        .unwrap_or_else(|| format!("document-{}", job.index));
    if seen.insert(stem.clone()) {
        stem
    } else {
        let fallback = format!("{stem}-{}", job.index);
        seen.insert(fallback.clone());
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use maidx_batch::JobState;
    use maidx_core::{ExtractionResult, Provenance, Record};
    use maidx_tool_runtime::{FailureKind, JobFailure, Message};
    use serde_json::json;

    fn success(index: usize, name: &str, transcript: bool) -> JobReport {
        let mut record = Record::new();
        record.insert("title".to_string(), json!(format!("Doc {index}")));
        JobReport {
            index,
            document_id: format!("in/{name}"),
            document_name: name.to_string(),
            state: JobState::Succeeded,
            attempts: 1,
            outcome: Ok(ExtractionResult::new(
                record,
                Provenance {
                    run_id: Default::default(),
                    document_id: format!("in/{name}"),
                    turns: 1,
                    tool_calls: 0,
                    corrections: 0,
                    model: "m".to_string(),
                    completed_at: Utc::now(),
                },
            )),
            transcript: transcript.then(|| {
                vec![Message::System {
                    text: "extract".to_string(),
                }]
            }),
        }
    }

    #[test]
    fn test_writes_records_transcripts_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let writer = OutputWriter::create(&out).unwrap();

        let mut failed = success(2, "broken.pdf", false);
        failed.state = JobState::Failed;
        failed.outcome = Err(JobFailure::new(FailureKind::DocumentParse, "unsupported"));

        let report = BatchReport {
            jobs: vec![
                success(0, "a.txt", true),
                success(1, "a.md", false),
                failed,
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled: false,
        };

        let written = writer.write_report(&report, json!({"profile": "default"})).unwrap();
        assert_eq!(written.len(), 4);

        let a: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("a.json")).unwrap()).unwrap();
        assert_eq!(a, json!({"title": "Doc 0"}));
        assert!(out.join("a-1.json").exists());
        assert!(out.join("a.log.json").exists());
        assert!(!out.join("broken.json").exists());

        let batch: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(BATCH_FILE)).unwrap()).unwrap();
        assert_eq!(batch["succeeded"], 2);
        assert_eq!(batch["failures"][0]["kind"], "document_parse");
        assert_eq!(batch["config"]["profile"], "default");
    }
}
