use std::path::PathBuf;

use clap::Parser;

use maidx_core::ExtractionConfig;

/// Extract structured records from documents with a tool-using LLM.
///
/// Every file becomes one conversation; results land in the output
/// directory as `<stem>.json` plus a `_batch.json` summary.
#[derive(Parser, Debug)]
#[command(name = "maidx", about = "LLM-driven structured data extraction")]
pub struct CliArgs {
    /// Extraction schema (native field list or JSON Schema)
    #[arg(long, short = 's')]
    pub schema: PathBuf,

    /// Directory for result files (created if missing)
    #[arg(long, short = 'o', default_value = "out")]
    pub output: PathBuf,

    /// Concurrent conversations (overrides BATCH_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Turn budget per document (overrides MAX_TURNS)
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Model identifier (overrides LLM_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Config profile; keys are looked up as PROFILE_KEY first
    #[arg(long, env = "MAIDX_PROFILE", default_value = "")]
    pub profile: String,

    /// Write each conversation transcript as <stem>.log.json
    #[arg(long)]
    pub log_raw: bool,

    /// Documents to process
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl CliArgs {
    /// Layer flag values over the environment-derived config.
    pub fn apply_overrides(&self, config: &mut ExtractionConfig) {
        if let Some(workers) = self.workers {
            config.batch.workers = workers;
        }
        if let Some(max_turns) = self.max_turns {
            config.engine.max_turns = max_turns;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if self.log_raw {
            config.engine.keep_transcripts = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_override() {
        let args = CliArgs::try_parse_from([
            "maidx",
            "--schema",
            "invoice.json",
            "--workers",
            "8",
            "--max-turns",
            "20",
            "--log-raw",
            "a.txt",
            "b.png",
        ])
        .unwrap();
        assert_eq!(args.output, PathBuf::from("out"));
        assert_eq!(args.files.len(), 2);

        let mut config = ExtractionConfig::default();
        let model = config.llm.model.clone();
        args.apply_overrides(&mut config);
        assert_eq!(config.batch.workers, 8);
        assert_eq!(config.engine.max_turns, 20);
        assert!(config.engine.keep_transcripts);
        assert_eq!(config.llm.model, model);
    }

    #[test]
    fn test_files_are_required() {
        assert!(CliArgs::try_parse_from(["maidx", "--schema", "s.json"]).is_err());
    }
}
