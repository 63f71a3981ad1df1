//! Configuration types for a scan-to-EPUB run.
//!
//! Everything a run needs lives in one [`PipelineConfig`] value that is passed
//! by reference into every stage. The configuration file is a flat `KEY=value`
//! env file (the same format the OCR scripts read); it is parsed with
//! `dotenvy` into a builder without ever touching the process environment.
//! Child processes receive the values they need explicitly through
//! [`PipelineConfig::stage_env`].

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Date format of every partition segment in the output prefix.
pub const PARTITION_FORMAT: &str = "%Y-%m-%d";

/// Language hints used by the enhanced OCR script when none are configured.
pub const DEFAULT_LANGUAGE_HINTS: &str = "en,fr,it,la";

// ── Keys recognised in the env file ──────────────────────────────────────

pub const KEY_PROJECT_ID: &str = "GOOGLE_CLOUD_PROJECT_ID";
pub const KEY_INPUT_PREFIX: &str = "INPUT_PREFIX";
pub const KEY_OUTPUT_PREFIX: &str = "OUTPUT_PREFIX";
pub const KEY_DATE_PREFIX: &str = "DATE_PREFIX";
pub const KEY_LANGUAGE_HINTS: &str = "LANGUAGE_HINTS";
pub const KEY_LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
pub const KEY_PROCESSOR_VERSION: &str = "GOOGLE_CLOUD_PROCESSOR_VERSION";
pub const KEY_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const KEY_OCR_COMMAND: &str = "OCR_COMMAND";
pub const KEY_OCR_ENHANCED_COMMAND: &str = "OCR_ENHANCED_COMMAND";
pub const KEY_MERGE_COMMAND: &str = "MERGE_COMMAND";
pub const KEY_CLEANUP_COMMAND: &str = "CLEANUP_COMMAND";
pub const KEY_FORMAT_COMMAND: &str = "FORMAT_COMMAND";
pub const KEY_STRUCTURE_COMMAND: &str = "STRUCTURE_COMMAND";
pub const KEY_PACKAGE_COMMAND: &str = "PACKAGE_COMMAND";

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or loaded from an env file with
/// [`PipelineConfig::from_env_file`].
///
/// # Example
/// ```rust
/// use scan2epub::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .project_id("my-project")
///     .input_prefix("gs://books/input")
///     .output_prefix("gs://books/docai-output")
///     .enhanced(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.input_prefix, "gs://books/input");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Cloud project that owns the OCR processor. Required.
    pub project_id: String,

    /// Object-store prefix where input PDFs are uploaded. Required.
    pub input_prefix: String,

    /// Object-store prefix under which OCR output is partitioned by date. Required.
    pub output_prefix: String,

    /// Fixed date partition for fresh runs. Default: today's local date.
    pub date_prefix: Option<NaiveDate>,

    /// OCR language hints, forwarded to the OCR scripts. Default: `en,fr,it,la`.
    pub language_hints: Vec<String>,

    /// OCR processor location. Default: `eu`.
    pub location: String,

    /// Fully-qualified OCR processor version, forwarded to the OCR scripts.
    pub processor_version: Option<String>,

    /// Local directory the final EPUB is written to. Default: `output`.
    pub output_dir: PathBuf,

    /// Parent directory for the per-run scratch directory. Default: system temp dir.
    pub work_root: Option<PathBuf>,

    /// Use the enhanced OCR script (page breaks + language hints). Default: false.
    pub enhanced: bool,

    /// Explicit stem, overriding both the file name and any resume marker.
    pub stem: Option<String>,

    /// External commands for each process-backed stage.
    pub commands: StageCommands,

    /// Stage-level progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            input_prefix: String::new(),
            output_prefix: String::new(),
            date_prefix: None,
            language_hints: split_language_hints(DEFAULT_LANGUAGE_HINTS),
            location: "eu".to_string(),
            processor_version: None,
            output_dir: PathBuf::from("output"),
            work_root: None,
            enhanced: false,
            stem: None,
            commands: StageCommands::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("project_id", &self.project_id)
            .field("input_prefix", &self.input_prefix)
            .field("output_prefix", &self.output_prefix)
            .field("date_prefix", &self.date_prefix)
            .field("language_hints", &self.language_hints)
            .field("location", &self.location)
            .field("output_dir", &self.output_dir)
            .field("enhanced", &self.enhanced)
            .field("stem", &self.stem)
            .field("commands", &self.commands)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
            source_name: "builder".to_string(),
        }
    }

    /// Parse an env file into a builder.
    ///
    /// The returned builder still needs [`PipelineConfigBuilder::build`], so
    /// callers can layer CLI overrides on top of file values first.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<PipelineConfigBuilder, PipelineError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PipelineError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut pairs = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                PipelineError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
            })?;
            pairs.push((key, value));
        }

        PipelineConfigBuilder::from_pairs(pairs, path.display().to_string())
    }

    /// The partition a fresh run writes to: `DATE_PREFIX` or today.
    pub fn default_partition(&self) -> NaiveDate {
        self.date_prefix
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Environment handed to every external stage process.
    ///
    /// Mirrors the variables the OCR and merge scripts read from their own
    /// `.env`, resolved for this particular work item.
    pub fn stage_env(&self, stem: &str, partition: NaiveDate) -> Vec<(String, String)> {
        let mut env = vec![
            (KEY_PROJECT_ID.to_string(), self.project_id.clone()),
            (KEY_INPUT_PREFIX.to_string(), self.input_prefix.clone()),
            (KEY_OUTPUT_PREFIX.to_string(), self.output_prefix.clone()),
            (
                KEY_DATE_PREFIX.to_string(),
                partition.format(PARTITION_FORMAT).to_string(),
            ),
            ("STEM".to_string(), stem.to_string()),
            (KEY_LANGUAGE_HINTS.to_string(), self.language_hints.join(",")),
            (KEY_LOCATION.to_string(), self.location.clone()),
        ];
        if let Some(ref v) = self.processor_version {
            env.push((KEY_PROCESSOR_VERSION.to_string(), v.clone()));
        }
        env
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    /// Where the values came from, for error messages.
    source_name: String,
}

impl PipelineConfigBuilder {
    /// Populate a builder from raw `KEY=value` pairs.
    ///
    /// Unknown keys are ignored: the same file usually also carries keys
    /// that only the external scripts care about.
    pub fn from_pairs<I, K, V>(pairs: I, source_name: impl Into<String>) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into().trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        let mut builder = PipelineConfig::builder();
        builder.source_name = source_name.into();

        if let Some(v) = map.get(KEY_PROJECT_ID) {
            builder = builder.project_id(v);
        }
        if let Some(v) = map.get(KEY_INPUT_PREFIX) {
            builder = builder.input_prefix(v);
        }
        if let Some(v) = map.get(KEY_OUTPUT_PREFIX) {
            builder = builder.output_prefix(v);
        }
        if let Some(v) = map.get(KEY_DATE_PREFIX) {
            let date = NaiveDate::parse_from_str(v, PARTITION_FORMAT).map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "{KEY_DATE_PREFIX} must be YYYY-MM-DD, got '{v}'"
                ))
            })?;
            builder = builder.date_prefix(date);
        }
        if let Some(v) = map.get(KEY_LANGUAGE_HINTS) {
            builder = builder.language_hints(split_language_hints(v));
        }
        if let Some(v) = map.get(KEY_LOCATION) {
            builder = builder.location(v);
        }
        if let Some(v) = map.get(KEY_PROCESSOR_VERSION) {
            builder = builder.processor_version(v);
        }
        if let Some(v) = map.get(KEY_OUTPUT_DIR) {
            builder = builder.output_dir(v);
        }

        let commands = &mut builder.config.commands;
        if let Some(v) = map.get(KEY_OCR_COMMAND) {
            commands.ocr = CommandTemplate::parse(v)?;
        }
        if let Some(v) = map.get(KEY_OCR_ENHANCED_COMMAND) {
            commands.ocr_enhanced = CommandTemplate::parse(v)?;
        }
        if let Some(v) = map.get(KEY_MERGE_COMMAND) {
            commands.merge = MergeStrategy::parse(v)?;
        }
        if let Some(v) = map.get(KEY_CLEANUP_COMMAND) {
            commands.cleanup = CommandTemplate::parse(v)?;
        }
        if let Some(v) = map.get(KEY_FORMAT_COMMAND) {
            commands.format = CommandTemplate::parse(v)?;
        }
        if let Some(v) = map.get(KEY_STRUCTURE_COMMAND) {
            commands.structure = CommandTemplate::parse(v)?;
        }
        if let Some(v) = map.get(KEY_PACKAGE_COMMAND) {
            commands.package = CommandTemplate::parse(v)?;
        }

        Ok(builder)
    }

    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = id.into();
        self
    }

    pub fn input_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.input_prefix = normalise_prefix(&prefix.into());
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = normalise_prefix(&prefix.into());
        self
    }

    pub fn date_prefix(mut self, date: NaiveDate) -> Self {
        self.config.date_prefix = Some(date);
        self
    }

    pub fn language_hints(mut self, hints: Vec<String>) -> Self {
        self.config.language_hints = hints;
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.location = location.into();
        self
    }

    pub fn processor_version(mut self, version: impl Into<String>) -> Self {
        self.config.processor_version = Some(version.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = Some(dir.into());
        self
    }

    pub fn enhanced(mut self, v: bool) -> Self {
        self.config.enhanced = v;
        self
    }

    pub fn stem(mut self, stem: impl Into<String>) -> Self {
        self.config.stem = Some(stem.into());
        self
    }

    pub fn commands(mut self, commands: StageCommands) -> Self {
        self.config.commands = commands;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating required keys.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        let required = [
            (KEY_PROJECT_ID, &c.project_id),
            (KEY_INPUT_PREFIX, &c.input_prefix),
            (KEY_OUTPUT_PREFIX, &c.output_prefix),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::MissingConfigKey {
                    key: key.to_string(),
                    source_name: self.source_name,
                });
            }
        }
        if c.input_prefix == c.output_prefix {
            return Err(PipelineError::InvalidConfig(format!(
                "{KEY_INPUT_PREFIX} and {KEY_OUTPUT_PREFIX} must differ (both '{}')",
                c.input_prefix
            )));
        }
        if c.language_hints.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "LANGUAGE_HINTS must list at least one language".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Stage commands ───────────────────────────────────────────────────────

/// A whitespace-separated command line with `{placeholder}` arguments.
///
/// Recognised placeholders: `{input}`, `{output}`, `{stem}`, `{date}`,
/// `{work_dir}`, `{pdf}`, `{hash}`, `{languages}`. Unknown placeholders are
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(line: &str) -> Result<Self, PipelineError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| PipelineError::InvalidConfig("empty stage command".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Substitute placeholders in every argument.
    pub fn render(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// How the OCR shards of a volume are merged into one text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// In-process merge through the object store (see [`crate::merge`]).
    Builtin,
    /// Delegate to an external script.
    External(CommandTemplate),
}

impl MergeStrategy {
    pub fn parse(line: &str) -> Result<Self, PipelineError> {
        if line.trim().eq_ignore_ascii_case("builtin") {
            Ok(MergeStrategy::Builtin)
        } else {
            CommandTemplate::parse(line).map(MergeStrategy::External)
        }
    }
}

/// External commands for every process-backed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommands {
    pub ocr: CommandTemplate,
    pub ocr_enhanced: CommandTemplate,
    pub merge: MergeStrategy,
    pub cleanup: CommandTemplate,
    pub format: CommandTemplate,
    pub structure: CommandTemplate,
    pub package: CommandTemplate,
}

impl Default for StageCommands {
    fn default() -> Self {
        let cmd = |program: &str, args: &[&str]| CommandTemplate {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        };
        Self {
            ocr: cmd("python3", &["ocr-processing/batch_ocr_process.py"]),
            ocr_enhanced: cmd("python3", &["scripts/batch_ocr_with_page_breaks.py"]),
            merge: MergeStrategy::Builtin,
            cleanup: cmd(
                "python3",
                &["text-processing/Step1_ocr_cleanup_v11.py", "{input}", "{output}"],
            ),
            format: cmd(
                "python3",
                &["text-processing/Step2_formatting_v14.py", "{input}", "{output}"],
            ),
            structure: cmd(
                "python3",
                &["text-processing/Step3_structuring_v1.py", "{input}", "{output}"],
            ),
            package: cmd(
                "python3",
                &["text-processing/Step4_epub_v10.py", "{input}", "{output}"],
            ),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn normalise_prefix(prefix: &str) -> String {
    prefix.trim().trim_end_matches('/').to_string()
}

fn split_language_hints(s: &str) -> Vec<String> {
    s.split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            (KEY_PROJECT_ID, "proj"),
            (KEY_INPUT_PREFIX, "gs://books/input/"),
            (KEY_OUTPUT_PREFIX, "gs://books/docai-output"),
        ]
    }

    #[test]
    fn from_pairs_applies_defaults() {
        let cfg = PipelineConfigBuilder::from_pairs(minimal_pairs(), "test")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cfg.input_prefix, "gs://books/input");
        assert_eq!(cfg.language_hints, vec!["en", "fr", "it", "la"]);
        assert_eq!(cfg.location, "eu");
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert_eq!(cfg.commands.merge, MergeStrategy::Builtin);
        assert!(cfg.date_prefix.is_none());
    }

    #[test]
    fn missing_output_prefix_is_reported_by_key() {
        let pairs = vec![(KEY_PROJECT_ID, "p"), (KEY_INPUT_PREFIX, "gs://a")];
        let err = PipelineConfigBuilder::from_pairs(pairs, ".env")
            .unwrap()
            .build()
            .unwrap_err();
        match err {
            PipelineError::MissingConfigKey { key, source_name } => {
                assert_eq!(key, KEY_OUTPUT_PREFIX);
                assert_eq!(source_name, ".env");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut pairs = minimal_pairs();
        pairs[0] = (KEY_PROJECT_ID, "   ");
        let err = PipelineConfigBuilder::from_pairs(pairs, "t")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingConfigKey { .. }));
    }

    #[test]
    fn bad_date_prefix_rejected() {
        let mut pairs = minimal_pairs();
        pairs.push((KEY_DATE_PREFIX, "01/02/2024"));
        let err = PipelineConfigBuilder::from_pairs(pairs, "t").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn date_prefix_overrides_today() {
        let mut pairs = minimal_pairs();
        pairs.push((KEY_DATE_PREFIX, "2024-03-05"));
        let cfg = PipelineConfigBuilder::from_pairs(pairs, "t")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            cfg.default_partition(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn command_overrides_parsed() {
        let mut pairs = minimal_pairs();
        pairs.push((KEY_MERGE_COMMAND, "python3 merge.py {stem}"));
        pairs.push((KEY_PACKAGE_COMMAND, "pandoc {input} -o {output}"));
        let cfg = PipelineConfigBuilder::from_pairs(pairs, "t")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            cfg.commands.merge,
            MergeStrategy::External(CommandTemplate::parse("python3 merge.py {stem}").unwrap())
        );
        assert_eq!(cfg.commands.package.program, "pandoc");
    }

    #[test]
    fn template_render_substitutes_known_placeholders() {
        let t = CommandTemplate::parse("tool {input} --out={output} {unknown}").unwrap();
        let args = t.render(&[("input", "a.txt".into()), ("output", "b.txt".into())]);
        assert_eq!(args, vec!["a.txt", "--out=b.txt", "{unknown}"]);
    }

    #[test]
    fn empty_command_rejected() {
        assert!(CommandTemplate::parse("   ").is_err());
    }

    #[test]
    fn stage_env_carries_partition_and_stem() {
        let cfg = PipelineConfigBuilder::from_pairs(minimal_pairs(), "t")
            .unwrap()
            .build()
            .unwrap();
        let env = cfg.stage_env("book", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(env.contains(&("DATE_PREFIX".to_string(), "2024-01-01".to_string())));
        assert!(env.contains(&("STEM".to_string(), "book".to_string())));
        assert!(env.contains(&("LANGUAGE_HINTS".to_string(), "en,fr,it,la".to_string())));
    }

    #[test]
    fn from_env_file_missing_is_config_not_found() {
        let err = PipelineConfig::from_env_file("/definitely/not/here/.env").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigNotFound { .. }));
    }

    #[test]
    fn from_env_file_reads_quoted_values_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# cloud settings\nGOOGLE_CLOUD_PROJECT_ID=\"proj\"\nINPUT_PREFIX=gs://b/in\n\nOUTPUT_PREFIX='gs://b/out/'\n",
        )
        .unwrap();
        let cfg = PipelineConfig::from_env_file(&path).unwrap().build().unwrap();
        assert_eq!(cfg.project_id, "proj");
        assert_eq!(cfg.output_prefix, "gs://b/out");
    }
}
