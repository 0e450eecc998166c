//! Context tool selection.
//!
//! In static mode every enabled tool runs. In preflight mode a short,
//! low-temperature model call picks the tools relevant to the prompt; any
//! failure of that call (transport error, timeout, unparseable answer) falls
//! back to the static set.

use crate::backends::BackendConfig;
use crate::llm_client::{ChatMessage, ChatRequest, ModelClient, StreamEvent};
use crate::tools::ToolDescriptor;
use regex::Regex;
use serde_json::Value;
use std::fmt::Write;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const SELECTION_TEMPERATURE: f64 = 0.1;

/// Outermost JSON object, then outermost JSON array.
static JSON_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?s)\{.*\}", r"(?s)\[.*\]"]
        .into_iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// How tools are chosen for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Static,
    Preflight,
}

/// Outcome of a selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    pub tools: Vec<ToolDescriptor>,
    /// System prompt and raw answer of the preflight call, when one was made.
    pub preflight: Option<PreflightExchange>,
}

impl Selection {
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PreflightExchange {
    pub system_prompt: String,
    pub response: String,
}

pub struct ToolSelector {
    client: Arc<dyn ModelClient>,
    mode: SelectionMode,
    timeout: Duration,
}

impl ToolSelector {
    pub fn new(client: Arc<dyn ModelClient>, mode: SelectionMode, timeout: Duration) -> Self {
        Self { client, mode, timeout }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Picks the tools to run for `prompt`.
    ///
    /// `on_reasoning` receives reasoning fragments of the preflight call as
    /// they arrive.
    pub async fn select<F>(
        &self,
        prompt: &str,
        tools: &[ToolDescriptor],
        backend: &BackendConfig,
        mut on_reasoning: F,
    ) -> Selection
    where
        F: FnMut(&str) + Send,
    {
        let enabled: Vec<ToolDescriptor> = tools.iter().filter(|t| t.enabled).cloned().collect();
        if self.mode == SelectionMode::Static || enabled.is_empty() {
            return Selection {
                tools: enabled,
                preflight: None,
            };
        }

        let system_prompt = preflight_prompt(&enabled);
        let request = ChatRequest::new(
            vec![ChatMessage::system(system_prompt.clone()), ChatMessage::user(prompt)],
            SELECTION_TEMPERATURE,
        );

        let call = async {
            let mut stream = self.client.stream(backend, request).await?;
            while let Some(event) = stream.next_event().await {
                if let StreamEvent::Reasoning(fragment) = event {
                    on_reasoning(&fragment);
                }
            }
            stream.finish().await
        };

        let answer = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(completion)) => completion.answer,
            Ok(Err(e)) => {
                warn!("Tool selection failed, using all enabled tools: {}", e);
                return Selection {
                    tools: enabled,
                    preflight: None,
                };
            }
            Err(_) => {
                warn!("Tool selection timed out after {:?}, using all enabled tools", self.timeout);
                return Selection {
                    tools: enabled,
                    preflight: None,
                };
            }
        };

        let exchange = Some(PreflightExchange {
            system_prompt,
            response: answer.clone(),
        });
        match parse_selection(&answer, &enabled) {
            Some(chosen) => {
                info!("Selected tools: {:?}", chosen.iter().map(|t| t.name()).collect::<Vec<_>>());
                Selection {
                    tools: chosen,
                    preflight: exchange,
                }
            }
            None => {
                debug!("Unparseable tool selection answer: {}", answer);
                warn!("Could not parse tool selection, using all enabled tools");
                Selection {
                    tools: enabled,
                    preflight: exchange,
                }
            }
        }
    }
}

/// System prompt for the preflight call, listing each tool with its
/// description.
pub fn preflight_prompt(tools: &[ToolDescriptor]) -> String {
    let mut listing = String::new();
    for tool in tools {
        let _ = writeln!(listing, "- {}: {}", tool.name(), tool.tool.description());
    }
    let example = tools
        .iter()
        .enumerate()
        .map(|(i, t)| format!("\"{}\": {}", t.name(), i == 0))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You select context tools for an assistant that turns natural language requests into shell commands.\n\
         Decide which of the following tools would provide information needed to write an accurate command \
         for the user's request.\n\n\
         Available tools:\n{listing}\n\
         Answer with a JSON object mapping every tool name to true or false, for example: {{{example}}}\n\
         Select only tools that are truly needed for this request. Do not write anything except the JSON object."
    )
}

/// Parses a selection answer against the offered tools.
///
/// Accepts a JSON object of booleans or a JSON array of names, possibly
/// wrapped in prose or code fences. Unknown names are ignored. Returns
/// `None` when no JSON can be recovered.
pub fn parse_selection(answer: &str, offered: &[ToolDescriptor]) -> Option<Vec<ToolDescriptor>> {
    let value = extract_json(answer)?;
    let wanted: Vec<String> = match value {
        Value::Object(map) => map
            .into_iter()
            .filter(|(_, v)| v.as_bool() == Some(true))
            .map(|(k, _)| k)
            .collect(),
        Value::Array(items) => items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => return None,
    };
    Some(
        offered
            .iter()
            .filter(|t| wanted.iter().any(|w| w == t.name()))
            .cloned()
            .collect(),
    )
}

fn extract_json(answer: &str) -> Option<Value> {
    for re in JSON_PATTERNS.iter() {
        if let Some(m) = re.find(answer) {
            if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NlshError;
    use crate::llm_client::{Completion, ModelStream};
    use crate::tools::ContextTool;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NamedTool(&'static str);

    #[async_trait]
    impl ContextTool for NamedTool {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "test tool"
        }

        async fn collect(&self) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn tools() -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = ["DirLister", "EnvInspector", "GitRepoInfo"]
            .into_iter()
            .map(|n| ToolDescriptor::new(Arc::new(NamedTool(n)), Duration::from_secs(1)))
            .collect();
        tools.push(ToolDescriptor {
            enabled: false,
            ..ToolDescriptor::new(Arc::new(NamedTool("NetworkInfo")), Duration::from_secs(1))
        });
        tools
    }

    enum Reply {
        Answer { reasoning: Vec<&'static str>, answer: &'static str },
        Fail,
        Hang,
    }

    struct ScriptedClient {
        reply: Reply,
        calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self { reply, calls: Mutex::new(0) })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream(&self, _backend: &BackendConfig, _request: ChatRequest) -> Result<ModelStream, NlshError> {
            *self.calls.lock().unwrap() += 1;
            match &self.reply {
                Reply::Answer { reasoning, answer } => Ok(ModelStream::from_fragments(
                    reasoning.iter().map(|r| r.to_string()).collect(),
                    vec![answer.to_string()],
                    Ok(Completion {
                        reasoning: reasoning.concat(),
                        answer: answer.to_string(),
                    }),
                )),
                Reply::Fail => Err(NlshError::ModelRequestFailed {
                    status: Some(500),
                    message: "down".to_string(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(NlshError::SessionCancelled)
                }
            }
        }
    }

    fn backend() -> BackendConfig {
        BackendConfig {
            name: "local".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            model: "m".to_string(),
            supports_vision: false,
            max_image_size_mb: None,
            is_reasoning_model: false,
        }
    }

    #[tokio::test]
    async fn test_static_mode_selects_all_enabled_without_a_call() {
        let client = ScriptedClient::new(Reply::Fail);
        let selector = ToolSelector::new(client.clone(), SelectionMode::Static, Duration::from_secs(1));
        let selection = selector.select("list files", &tools(), &backend(), |_| {}).await;

        assert_eq!(selection.names(), vec!["DirLister", "EnvInspector", "GitRepoInfo"]);
        assert_eq!(*client.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preflight_selects_subset_and_reports_reasoning() {
        let client = ScriptedClient::new(Reply::Answer {
            reasoning: vec!["files ", "needed"],
            answer: "{\"DirLister\": true, \"EnvInspector\": false, \"GitRepoInfo\": false}",
        });
        let selector = ToolSelector::new(client, SelectionMode::Preflight, Duration::from_secs(1));
        let mut reasoning = String::new();
        let selection = selector
            .select("list files", &tools(), &backend(), |r| reasoning.push_str(r))
            .await;

        assert_eq!(selection.names(), vec!["DirLister"]);
        assert_eq!(reasoning, "files needed");
        assert!(selection.preflight.is_some());
    }

    #[tokio::test]
    async fn test_preflight_failure_falls_back_to_static() {
        let selector = ToolSelector::new(ScriptedClient::new(Reply::Fail), SelectionMode::Preflight, Duration::from_secs(1));
        let selection = selector.select("x", &tools(), &backend(), |_| {}).await;
        assert_eq!(selection.names(), vec!["DirLister", "EnvInspector", "GitRepoInfo"]);
    }

    #[tokio::test]
    async fn test_preflight_timeout_falls_back_to_static() {
        let selector = ToolSelector::new(ScriptedClient::new(Reply::Hang), SelectionMode::Preflight, Duration::from_millis(50));
        let selection = selector.select("x", &tools(), &backend(), |_| {}).await;
        assert_eq!(selection.tools.len(), 3);
        assert!(selection.preflight.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_answer_falls_back_to_static() {
        let client = ScriptedClient::new(Reply::Answer {
            reasoning: vec![],
            answer: "I think you need the directory lister.",
        });
        let selector = ToolSelector::new(client, SelectionMode::Preflight, Duration::from_secs(1));
        let selection = selector.select("x", &tools(), &backend(), |_| {}).await;
        assert_eq!(selection.tools.len(), 3);
    }

    #[test]
    fn test_parse_selection_accepts_arrays_and_fenced_objects() {
        let offered = tools();
        let chosen = parse_selection("[\"GitRepoInfo\", \"Bogus\"]", &offered).unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].name(), "GitRepoInfo");

        let fenced = "```json\n{\"EnvInspector\": true, \"DirLister\": true}\n```";
        let names: Vec<_> = parse_selection(fenced, &offered).unwrap().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["DirLister", "EnvInspector"]);
    }

    #[test]
    fn test_parse_selection_all_false_selects_nothing() {
        let chosen = parse_selection("{\"DirLister\": false}", &tools()).unwrap();
        assert!(chosen.is_empty());
        assert!(parse_selection("no json here", &tools()).is_none());
    }

    #[test]
    fn test_json_patterns_compile_once_and_match() {
        assert_eq!(JSON_PATTERNS.len(), 2);
        assert_eq!(extract_json("sure: {\"a\": true} done"), Some(serde_json::json!({"a": true})));
        assert_eq!(extract_json("[\"DirLister\"]"), Some(serde_json::json!(["DirLister"])));
    }

    #[test]
    fn test_preflight_prompt_lists_tools() {
        let prompt = preflight_prompt(&tools()[..2]);
        assert!(prompt.contains("- DirLister: test tool\n"));
        assert!(prompt.contains("{\"DirLister\": true, \"EnvInspector\": false}"));
    }
}
