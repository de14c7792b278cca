use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{GraphlateError, Result};
use crate::graph::Graph;
use crate::host::{ComfyUiSubmitter, SubmissionPipeline};
use crate::install::{AutoTranslateHook, FeatureFlag, InstallState, InstallationManager};
use crate::intercept::{InterceptReport, WorkflowAutoTranslateInterceptor};
use crate::translate::{ClientFactory, TranslationCache, TranslationClient, TranslationService};

const TRANSLATED_SUFFIX: &str = ".translated.json";

/// Totals of a directory run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub files: usize,
    pub failed_files: usize,
    pub report: InterceptReport,
}

/// Workflow files on disk, translated with one shared service and cache.
pub struct Workflow {
    config: Config,
    interceptor: Arc<WorkflowAutoTranslateInterceptor>,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        let client = ClientFactory::create_client(&config.translate)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: Config, client: Arc<dyn TranslationClient>) -> Self {
        let service = Arc::new(TranslationService::from_config(
            &config.translate,
            client,
            Arc::new(TranslationCache::new()),
        ));
        let interceptor = Arc::new(WorkflowAutoTranslateInterceptor::from_config(
            &config.interceptor,
            service,
        ));
        Self { config, interceptor }
    }

    pub fn interceptor(&self) -> &Arc<WorkflowAutoTranslateInterceptor> {
        &self.interceptor
    }

    /// Translate one workflow file and write the result to `output`.
    pub async fn translate_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> Result<InterceptReport> {
        let input = input.as_ref();
        let mut graph = read_graph(input).await?;

        let report = self.interceptor.intercept_graph(&mut graph).await;
        write_atomically(output.as_ref(), &graph.to_json_pretty()?)?;

        info!(
            input = %input.display(),
            output = %output.as_ref().display(),
            translated = report.translated,
            "workflow written"
        );
        Ok(report)
    }

    /// Translate every `.json` workflow below `input_dir`.
    ///
    /// Without `output_dir` results land next to their input as
    /// `<name>.translated.json`; earlier results are never re-read.
    pub async fn translate_directory<P: AsRef<Path>>(
        &self,
        input_dir: P,
        output_dir: Option<&Path>,
    ) -> Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        if !input_dir.is_dir() {
            return Err(GraphlateError::Config(format!(
                "{} is not a directory",
                input_dir.display()
            )));
        }

        let files: Vec<PathBuf> = WalkDir::new(input_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_workflow_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        info!("Found {} workflow files in {}", files.len(), input_dir.display());

        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut summary = BatchSummary::default();
        for path in files {
            pb.set_message(
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
            let output = match output_dir {
                Some(dir) => dir.join(path.strip_prefix(input_dir).unwrap_or(&path)),
                None => default_output_path(&path),
            };

            summary.files += 1;
            match self.translate_file(&path, &output).await {
                Ok(report) => {
                    summary.report.translated += report.translated;
                    summary.report.cache_hits += report.cache_hits;
                    summary.report.failed += report.failed;
                    summary.report.skipped += report.skipped;
                }
                Err(e) => {
                    summary.failed_files += 1;
                    warn!("Failed to translate {}: {}", path.display(), e);
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("done");

        Ok(summary)
    }

    /// Submit a workflow file to the configured server through the
    /// auto-translate hook.
    pub async fn submit_file<P: AsRef<Path>>(&self, input: P) -> Result<Value> {
        let graph = read_graph(input.as_ref()).await?;

        let submitter = Arc::new(ComfyUiSubmitter::new(&self.config.host)?);
        let pipeline = Arc::new(SubmissionPipeline::new(submitter));
        let hook = Arc::new(AutoTranslateHook::new(
            Arc::clone(&self.interceptor),
            FeatureFlag::new(self.config.interceptor.auto_translate),
        ));
        let manager =
            InstallationManager::from_config(&self.config.install, pipeline.clone(), hook);

        if manager.install().await != InstallState::Installed {
            warn!("auto-translate hook unavailable, submitting workflow as is");
        }
        pipeline.submit(graph).await
    }
}

async fn read_graph(path: &Path) -> Result<Graph> {
    if !path.exists() {
        return Err(GraphlateError::FileNotFound(path.display().to_string()));
    }
    let text = fs::read_to_string(path).await?;
    Graph::from_json(&text)
}

fn is_workflow_file(path: &Path) -> bool {
    let name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    name.ends_with(".json") && !name.ends_with(TRANSLATED_SUFFIX)
}

/// `prompt.json` → `prompt.translated.json`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "workflow".to_string());
    input.with_file_name(format!("{}{}", stem, TRANSLATED_SUFFIX))
}

/// Write through a temp file in the target directory so readers never see
/// a half-written workflow.
pub fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    file.persist(path).map_err(|e| GraphlateError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::MockTranslationClient;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn workflow(times: usize) -> Workflow {
        let mut client = MockTranslationClient::new();
        client
            .expect_translate()
            .times(times)
            .returning(|text, _, _, _| Ok(format!("EN({})", text.chars().count())));
        client.expect_name().return_const("mock");
        Workflow::with_client(Config::default(), Arc::new(client))
    }

    const PROMPT: &str = r#"{"6":{"class_type":"CLIPTextEncode","inputs":{"text":"一只黑猫","clip":["4",1]}}}"#;

    #[tokio::test]
    async fn test_translate_file() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("prompt.json");
        input.write_str(PROMPT).unwrap();
        let output = temp.child("out/prompt.json");

        let report = workflow(1).translate_file(input.path(), output.path()).await.unwrap();
        assert_eq!(report.translated, 1);

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(output.path()).unwrap()).unwrap();
        assert_eq!(written["6"]["inputs"]["text"], "EN(4)");
        assert_eq!(written["6"]["inputs"]["clip"], serde_json::json!(["4", 1]));
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let temp = TempDir::new().unwrap();
        let result = workflow(0)
            .translate_file(temp.path().join("nope.json"), temp.path().join("out.json"))
            .await;
        assert!(matches!(result, Err(GraphlateError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_translate_directory_next_to_inputs() {
        let temp = TempDir::new().unwrap();
        temp.child("a.json").write_str(PROMPT).unwrap();
        temp.child("nested/b.json").write_str(PROMPT).unwrap();
        temp.child("nested/old.translated.json").write_str(PROMPT).unwrap();
        temp.child("broken.json").write_str("[1, 2]").unwrap();
        temp.child("notes.txt").write_str("一只黑猫").unwrap();

        // Both prompts share one cached translation.
        let summary = workflow(1).translate_directory(temp.path(), None).await.unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.failed_files, 1);
        assert_eq!(summary.report.translated, 2);
        assert_eq!(summary.report.cache_hits, 1);
        assert!(temp.child("a.translated.json").path().exists());
        assert!(temp.child("nested/b.translated.json").path().exists());
    }

    #[tokio::test]
    async fn test_translate_directory_into_output_dir() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("in");
        input.child("x/a.json").write_str(PROMPT).unwrap();
        let output = temp.child("out");

        workflow(1).translate_directory(input.path(), Some(output.path())).await.unwrap();
        assert!(output.child("x/a.json").path().exists());
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/flows/portrait.json")),
            PathBuf::from("/tmp/flows/portrait.translated.json")
        );
    }

    #[test]
    fn test_write_atomically_replaces_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.child("graph.json");
        target.write_str("old").unwrap();

        write_atomically(target.path(), "new").unwrap();
        target.assert("new");
    }
}
