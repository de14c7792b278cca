//! Pre-submission pass that translates prompt text inside a graph.
//!
//! Every text field of every known text-encoder node is inspected. Literal
//! text is translated in place; linked text is resolved upstream and
//! translated where it is stored, so links stay intact. Combined text is
//! the exception: it has no single home, so the consumer field receives the
//! translated combination instead of its link.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::InterceptorConfig;
use crate::error::Result;
use crate::graph::{FieldPath, Graph, InputValue, Link, NodeId};
use crate::resolve::{ExtractionKind, GraphTextResolver, TextSource};
use crate::translate::{TranslationOutcome, TranslationService};

/// Text inputs of the encoder nodes shipped with the graph server and the
/// most common node packs.
const TEXT_ENCODER_FIELDS: &[(&str, &[&str])] = &[
    ("CLIPTextEncode", &["text"]),
    ("CLIPTextEncodeSDXL", &["text_g", "text_l"]),
    ("CLIPTextEncodeSDXLRefiner", &["text"]),
    ("CLIPTextEncodeFlux", &["clip_l", "t5xxl"]),
    ("CLIPTextEncodeSD3", &["clip_l", "clip_g", "t5xxl"]),
    ("CLIPTextEncodeHunyuanDiT", &["bert", "mt5xl"]),
    ("CLIPTextEncodePixArtAlpha", &["text"]),
    ("CLIPTextEncodeLumina2", &["user_prompt"]),
    ("TextEncodeHunyuanVideo_ImageToVideo", &["prompt"]),
    ("WanVideoTextEncode", &["positive_prompt", "negative_prompt"]),
    ("LLMPrompt", &["system_prompt", "user_prompt"]),
    ("OllamaGenerate", &["prompt"]),
    ("OllamaGenerateAdvance", &["system", "prompt"]),
];

/// Where a translation is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WriteTarget {
    node: NodeId,
    field: FieldPath,
}

#[derive(Debug, Clone)]
struct TranslationTask {
    text: String,
    target: WriteTarget,
    kind: ExtractionKind,
}

/// Counts of one interception pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptReport {
    pub translated: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl InterceptReport {
    pub fn changed(&self) -> bool {
        self.translated > 0
    }
}

pub struct WorkflowAutoTranslateInterceptor {
    service: Arc<TranslationService>,
    resolver: GraphTextResolver,
    text_fields: HashMap<String, Vec<String>>,
}

impl WorkflowAutoTranslateInterceptor {
    pub fn new(service: Arc<TranslationService>) -> Self {
        let text_fields = TEXT_ENCODER_FIELDS
            .iter()
            .map(|(class_type, fields)| {
                (
                    class_type.to_string(),
                    fields.iter().map(|field| field.to_string()).collect(),
                )
            })
            .collect();

        Self {
            service,
            resolver: GraphTextResolver::new(),
            text_fields,
        }
    }

    /// Built-in encoder table extended (or overridden per class) by
    /// `extra_text_fields`.
    pub fn from_config(config: &InterceptorConfig, service: Arc<TranslationService>) -> Self {
        config
            .extra_text_fields
            .iter()
            .fold(Self::new(service), |interceptor, (class_type, fields)| {
                interceptor.with_text_fields(class_type.clone(), fields.clone())
            })
    }

    pub fn with_text_fields(mut self, class_type: impl Into<String>, fields: Vec<String>) -> Self {
        self.text_fields.insert(class_type.into(), fields);
        self
    }

    pub fn text_fields(&self, class_type: &str) -> Option<&[String]> {
        self.text_fields.get(class_type).map(Vec::as_slice)
    }

    pub fn service(&self) -> &Arc<TranslationService> {
        &self.service
    }

    /// Translate every prompt text in `graph`.
    ///
    /// Never fails: on any unexpected error `graph` is left exactly as it
    /// was submitted.
    pub async fn intercept_graph(&self, graph: &mut Graph) -> InterceptReport {
        match self.try_intercept(graph).await {
            Ok(report) => {
                if report.changed() || report.failed > 0 {
                    info!(
                        translated = report.translated,
                        cache_hits = report.cache_hits,
                        failed = report.failed,
                        skipped = report.skipped,
                        "workflow texts processed"
                    );
                }
                report
            }
            Err(e) => {
                warn!(error = %e, "auto-translation aborted, submitting original workflow");
                InterceptReport::default()
            }
        }
    }

    async fn try_intercept(&self, graph: &mut Graph) -> Result<InterceptReport> {
        let mut report = InterceptReport::default();
        let tasks = self.collect_tasks(graph, &mut report);
        if tasks.is_empty() {
            return Ok(report);
        }

        let results = self.run_tasks(tasks).await;
        let staged = stage(graph, &results, &mut report)?;
        *graph = staged;
        Ok(report)
    }

    fn collect_tasks(&self, graph: &Graph, report: &mut InterceptReport) -> Vec<TranslationTask> {
        let mut tasks = Vec::new();
        let mut seen_links: HashSet<(Link, NodeId, String)> = HashSet::new();
        let mut seen_targets: HashSet<WriteTarget> = HashSet::new();

        for node in graph.nodes() {
            let Some(fields) = self.text_fields(node.class_type()) else {
                continue;
            };

            for field in fields {
                let consumer = WriteTarget {
                    node: node.id().to_string(),
                    field: FieldPath::Input(field.clone()),
                };

                let candidate = match node.input(field) {
                    Some(InputValue::Text(text)) => {
                        Some((text.to_string(), consumer, ExtractionKind::Direct))
                    }
                    Some(InputValue::Link(link)) => {
                        let key = (link.clone(), node.id().to_string(), field.clone());
                        if !seen_links.insert(key) {
                            continue;
                        }
                        self.resolve_link(graph, &link).map(|source| {
                            let kind = source.kind;
                            let target = match kind {
                                ExtractionKind::Combined => consumer,
                                _ => WriteTarget {
                                    node: source.source_node,
                                    field: source.field,
                                },
                            };
                            (source.text, target, kind)
                        })
                    }
                    Some(InputValue::Other(_)) | None => continue,
                };

                let Some((text, target, kind)) = candidate else {
                    debug!(node = node.id(), field = %field, "no text behind link");
                    report.skipped += 1;
                    continue;
                };
                if !self.service.needs_translation(&text) {
                    report.skipped += 1;
                    continue;
                }
                if !seen_targets.insert(target.clone()) {
                    continue;
                }

                debug!(
                    node = %target.node,
                    field = %target.field,
                    kind = ?kind,
                    consumer = node.id(),
                    "scheduling translation"
                );
                tasks.push(TranslationTask { text, target, kind });
            }
        }
        tasks
    }

    /// Combining sources are resolved as a whole before the general chain.
    fn resolve_link(&self, graph: &Graph, link: &Link) -> Option<TextSource> {
        self.resolver
            .resolve_combined(graph, link)
            .or_else(|| self.resolver.resolve(graph, link))
    }

    /// Translate all tasks concurrently; a task that dies keeps its text.
    async fn run_tasks(
        &self,
        tasks: Vec<TranslationTask>,
    ) -> Vec<(TranslationTask, TranslationOutcome)> {
        let mut set = JoinSet::new();
        for (index, task) in tasks.iter().enumerate() {
            let service = Arc::clone(&self.service);
            let text = task.text.clone();
            set.spawn(async move { (index, service.translate_with_cache(&text).await) });
        }

        let mut outcomes: Vec<Option<TranslationOutcome>> = vec![None; tasks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!(error = %e, "translation task aborted, keeping original text"),
            }
        }

        tasks
            .into_iter()
            .zip(outcomes)
            .map(|(task, outcome)| {
                let outcome = outcome.unwrap_or_else(|| TranslationOutcome::Failed {
                    original: task.text.clone(),
                    error: "translation task aborted".to_string(),
                });
                (task, outcome)
            })
            .collect()
    }
}

/// Copy of `graph` with every successful translation written back.
fn stage(
    graph: &Graph,
    results: &[(TranslationTask, TranslationOutcome)],
    report: &mut InterceptReport,
) -> Result<Graph> {
    let mut staged = graph.clone();
    for (task, outcome) in results {
        match outcome {
            TranslationOutcome::Translated { text, from_cache } => {
                staged.set_text(&task.target.node, &task.target.field, text)?;
                report.translated += 1;
                if *from_cache {
                    report.cache_hits += 1;
                }
                debug!(
                    node = %task.target.node,
                    field = %task.target.field,
                    kind = ?task.kind,
                    "text replaced"
                );
            }
            TranslationOutcome::Failed { .. } => report.failed += 1,
        }
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{LanguageClassifier, MockLanguageDetector};
    use crate::error::GraphlateError;
    use crate::translate::{MockTranslationClient, TranslationCache, TranslationClient};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn classifier() -> Arc<LanguageClassifier> {
        let mut detector = MockLanguageDetector::new();
        detector.expect_detect().returning(|_| Ok(None));
        Arc::new(LanguageClassifier::new(Arc::new(detector), "en"))
    }

    fn service_with(client: Arc<dyn TranslationClient>) -> Arc<TranslationService> {
        Arc::new(TranslationService::new(client, classifier(), Arc::new(TranslationCache::new())))
    }

    fn interceptor(client: MockTranslationClient) -> WorkflowAutoTranslateInterceptor {
        WorkflowAutoTranslateInterceptor::new(service_with(Arc::new(client)))
    }

    fn translating(
        pairs: &'static [(&'static str, &'static str)],
        times: usize,
    ) -> MockTranslationClient {
        let mut client = MockTranslationClient::new();
        client
            .expect_translate()
            .times(times)
            .returning(move |text, _, _, _| {
                pairs
                    .iter()
                    .find(|(source, _)| *source == text)
                    .map(|(_, translated)| translated.to_string())
                    .ok_or_else(|| GraphlateError::Translation(format!("unexpected text {}", text)))
            });
        client.expect_name().return_const("mock");
        client
    }

    fn graph(value: serde_json::Value) -> Graph {
        Graph::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_literal_prompt_translated_in_place() {
        let interceptor = interceptor(translating(&[("你好世界", "Hello World")], 1));
        let mut graph = graph(json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "你好世界", "clip": ["4", 1]}
            }
        }));

        let report = interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["6"]["inputs"]["text"], "Hello World");
        assert_eq!(value["6"]["inputs"]["clip"], json!(["4", 1]));
        assert_eq!(report.translated, 1);
        assert!(interceptor.service().cache().contains("你好世界"));
    }

    #[tokio::test]
    async fn test_linked_text_translated_at_source() {
        let interceptor =
            interceptor(translating(&[("今天天气很好", "The weather is nice today")], 1));
        let mut graph = graph(json!({
            "3": {"class_type": "Text", "outputs": ["今天天气很好"]},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ["3", 0]}}
        }));

        interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["3"]["outputs"][0], "The weather is nice today");
        assert_eq!(value["6"]["inputs"]["text"], json!(["3", 0]));
    }

    #[tokio::test]
    async fn test_type_names_left_alone() {
        let interceptor = interceptor(translating(&[], 0));
        let original = graph(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "IMAGE"}}
        }));
        let mut graph = original.clone();

        let report = interceptor.intercept_graph(&mut graph).await;
        assert_eq!(graph, original);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_malformed_link_leaves_graph_unchanged() {
        let interceptor = interceptor(translating(&[], 0));
        let original = graph(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": [null]}}
        }));
        let mut graph = original.clone();

        let report = interceptor.intercept_graph(&mut graph).await;
        assert_eq!(graph, original);
        assert_eq!(report, InterceptReport::default());
    }

    #[tokio::test]
    async fn test_combined_text_replaces_consumer_link() {
        let interceptor =
            interceptor(translating(&[("红色的花 蓝天", "red flowers blue sky")], 1));
        let mut graph = graph(json!({
            "1": {"class_type": "Text", "outputs": ["红色的花"]},
            "2": {"class_type": "Text", "outputs": ["蓝天"]},
            "3": {
                "class_type": "TextConcat",
                "inputs": {"text_a": ["1", 0], "text_b": ["2", 0], "delimiter": ", "}
            },
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ["3", 0]}}
        }));

        interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["6"]["inputs"]["text"], "red flowers blue sky");
        assert_eq!(value["1"]["outputs"][0], "红色的花");
        assert_eq!(value["2"]["outputs"][0], "蓝天");
    }

    #[tokio::test]
    async fn test_combined_text_behind_reroute_replaces_consumer_link() {
        let interceptor =
            interceptor(translating(&[("红色的花 蓝天", "red flowers blue sky")], 1));
        let mut graph = graph(json!({
            "3": {
                "class_type": "TextConcat",
                "inputs": {"text_a": "红色的花", "text_b": "蓝天", "delimiter": " "}
            },
            "5": {"class_type": "Reroute", "inputs": {"input": ["3", 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ["5", 0]}}
        }));

        let report = interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["6"]["inputs"]["text"], "red flowers blue sky");
        assert_eq!(value["3"]["inputs"]["text_a"], "红色的花");
        assert_eq!(value["3"]["inputs"]["text_b"], "蓝天");
        assert_eq!(value["5"]["inputs"]["input"], json!(["3", 0]));
        assert_eq!(report.translated, 1);
    }

    #[tokio::test]
    async fn test_shared_source_translated_once() {
        let interceptor = interceptor(translating(&[("一只猫", "a cat")], 1));
        let mut graph = graph(json!({
            "3": {"class_type": "Text", "outputs": ["一只猫"]},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ["3", 0]}},
            "7": {
                "class_type": "CLIPTextEncodeSDXL",
                "inputs": {"text_g": ["3", 0], "text_l": ["3", 0]}
            }
        }));

        let report = interceptor.intercept_graph(&mut graph).await;
        assert_eq!(report.translated, 1);
        assert_eq!(graph.into_value()["3"]["outputs"][0], "a cat");
    }

    #[tokio::test]
    async fn test_failed_task_keeps_its_text() {
        let mut client = MockTranslationClient::new();
        client
            .expect_translate()
            .withf(|text, _, _, _| text == "一只猫")
            .returning(|_, _, _, _| Ok("a cat".to_string()));
        client
            .expect_translate()
            .withf(|text, _, _, _| text == "一只狗")
            .returning(|_, _, _, _| Err(GraphlateError::Translation("rate limited".to_string())));
        client.expect_name().return_const("mock");
        let interceptor = interceptor(client);

        let mut graph = graph(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "一只猫"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "一只狗"}}
        }));
        let report = interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["6"]["inputs"]["text"], "a cat");
        assert_eq!(value["7"]["inputs"]["text"], "一只狗");
        assert_eq!((report.translated, report.failed), (1, 1));
    }

    struct PanickingClient;

    #[async_trait]
    impl TranslationClient for PanickingClient {
        async fn translate(
            &self,
            text: &str,
            _from: &str,
            _to: &str,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            if text == "一只狗" {
                panic!("backend bug");
            }
            Ok("a cat".to_string())
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn test_panicked_task_keeps_its_text() {
        let interceptor =
            WorkflowAutoTranslateInterceptor::new(service_with(Arc::new(PanickingClient)));
        let mut graph = graph(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "一只猫"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "一只狗"}}
        }));

        let report = interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["6"]["inputs"]["text"], "a cat");
        assert_eq!(value["7"]["inputs"]["text"], "一只狗");
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_cache_hits_are_counted() {
        let interceptor = interceptor(translating(&[], 0));
        interceptor.service().cache().store("你好世界", "Hello World");
        let mut graph = graph(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "你好世界"}}
        }));

        let report = interceptor.intercept_graph(&mut graph).await;
        assert_eq!((report.translated, report.cache_hits), (1, 1));
        assert_eq!(graph.into_value()["6"]["inputs"]["text"], "Hello World");
    }

    #[tokio::test]
    async fn test_extra_text_fields_from_config() {
        let mut config = InterceptorConfig::default();
        config
            .extra_text_fields
            .insert("MyPromptNode".to_string(), vec!["words".to_string()]);
        let interceptor = WorkflowAutoTranslateInterceptor::from_config(
            &config,
            service_with(Arc::new(translating(&[("一只猫", "a cat")], 1))),
        );
        assert_eq!(interceptor.text_fields("CLIPTextEncode"), Some(&["text".to_string()][..]));

        let mut graph = graph(json!({
            "9": {
                "class_type": "MyPromptNode",
                "inputs": {"words": "一只猫", "other": "一只狗"}
            }
        }));
        interceptor.intercept_graph(&mut graph).await;

        let value = graph.into_value();
        assert_eq!(value["9"]["inputs"]["words"], "a cat");
        assert_eq!(value["9"]["inputs"]["other"], "一只狗");
    }

    #[test]
    fn test_stage_fails_on_missing_target() {
        let graph = graph(json!({"6": {"class_type": "CLIPTextEncode", "inputs": {}}}));
        let task = TranslationTask {
            text: "一只猫".to_string(),
            target: WriteTarget {
                node: "6".to_string(),
                field: FieldPath::Input("text".to_string()),
            },
            kind: ExtractionKind::Direct,
        };
        let outcome = TranslationOutcome::Translated {
            text: "a cat".to_string(),
            from_cache: false,
        };

        let mut report = InterceptReport::default();
        assert!(stage(&graph, &[(task, outcome)], &mut report).is_err());
    }
}
