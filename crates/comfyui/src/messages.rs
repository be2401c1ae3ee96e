//! Events pushed by ComfyUI over the WebSocket channel.
//!
//! Every text frame is a `{"type": ..., "data": {...}}` envelope. Only
//! `executing` drives control flow (a `null` node ends a prompt); the rest
//! are decoded so they can be logged with structured fields. Event kinds
//! added by custom nodes decode to [`PushEvent::Unrecognized`].

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    QueueStatus { remaining: i64 },
    Started { prompt_id: String },
    Cached { prompt_id: String, nodes: Vec<String> },
    Executing(ExecutingNode),
    Progress(StepProgress),
    NodeOutput { prompt_id: String, node: String },
    Failed(ExecutionFailure),
    Unrecognized(String),
}

/// `executing` payload. `node == None` means the prompt is finished.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingNode {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl ExecutingNode {
    pub fn finishes(&self, prompt_id: &str) -> bool {
        self.node.is_none() && self.prompt_id.as_deref() == Some(prompt_id)
    }
}

/// Sampler step counter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepProgress {
    pub value: i64,
    pub max: i64,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl StepProgress {
    pub fn percent(&self) -> u8 {
        if self.max <= 0 {
            return 0;
        }
        (self.value.clamp(0, self.max) * 100 / self.max) as u8
    }
}

/// `execution_error` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionFailure {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub exception_message: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: StatusBody,
}

#[derive(Deserialize)]
struct StatusBody {
    exec_info: ExecInfo,
}

#[derive(Deserialize)]
struct ExecInfo {
    queue_remaining: i64,
}

#[derive(Deserialize)]
struct PromptRef {
    prompt_id: String,
    #[serde(default)]
    nodes: Vec<String>,
    #[serde(default)]
    node: Option<String>,
}

impl PushEvent {
    /// Decode one text frame.
    ///
    /// Fails on malformed JSON or on a known event kind with an unexpected
    /// payload.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let Envelope { kind, data } = serde_json::from_str(text)?;

        let event = match kind.as_str() {
            "status" => {
                let payload: StatusPayload = serde_json::from_value(data)?;
                PushEvent::QueueStatus {
                    remaining: payload.status.exec_info.queue_remaining,
                }
            }
            "execution_start" => {
                let r: PromptRef = serde_json::from_value(data)?;
                PushEvent::Started {
                    prompt_id: r.prompt_id,
                }
            }
            "execution_cached" => {
                let r: PromptRef = serde_json::from_value(data)?;
                PushEvent::Cached {
                    prompt_id: r.prompt_id,
                    nodes: r.nodes,
                }
            }
            "executed" => {
                let r: PromptRef = serde_json::from_value(data)?;
                PushEvent::NodeOutput {
                    prompt_id: r.prompt_id,
                    node: r.node.unwrap_or_default(),
                }
            }
            "executing" => PushEvent::Executing(serde_json::from_value(data)?),
            "progress" => PushEvent::Progress(serde_json::from_value(data)?),
            "execution_error" => PushEvent::Failed(serde_json::from_value(data)?),
            _ => PushEvent::Unrecognized(kind),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn queue_status() {
        let event = PushEvent::parse(
            r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":2}},"sid":"s1"}}"#,
        )
        .unwrap();
        assert_eq!(event, PushEvent::QueueStatus { remaining: 2 });
    }

    #[test]
    fn executing_a_node_does_not_finish() {
        let event =
            PushEvent::parse(r#"{"type":"executing","data":{"node":"540","display_node":"540","prompt_id":"p"}}"#)
                .unwrap();
        assert_matches!(event, PushEvent::Executing(ref e) if !e.finishes("p"));
    }

    #[test]
    fn null_node_finishes_only_its_prompt() {
        let event = PushEvent::parse(r#"{"type":"executing","data":{"node":null,"prompt_id":"p"}}"#).unwrap();
        let executing = match event {
            PushEvent::Executing(executing) => executing,
            other => panic!("expected executing, got {other:?}"),
        };
        assert!(executing.finishes("p"));
        assert!(!executing.finishes("q"));
    }

    #[test]
    fn null_node_without_prompt_finishes_nothing() {
        let event = PushEvent::parse(r#"{"type":"executing","data":{"node":null}}"#).unwrap();
        assert_matches!(event, PushEvent::Executing(ref e) if !e.finishes("p"));
    }

    #[test]
    fn progress_percent() {
        let event =
            PushEvent::parse(r#"{"type":"progress","data":{"value":3,"max":8,"node":"220","prompt_id":"p"}}"#)
                .unwrap();
        let progress = match event {
            PushEvent::Progress(progress) => progress,
            other => panic!("expected progress, got {other:?}"),
        };
        assert_eq!(progress.percent(), 37);
        assert_eq!(progress.node.as_deref(), Some("220"));

        let idle = StepProgress {
            value: 0,
            max: 0,
            node: None,
            prompt_id: None,
        };
        assert_eq!(idle.percent(), 0);
    }

    #[test]
    fn lifecycle_events() {
        assert_eq!(
            PushEvent::parse(r#"{"type":"execution_start","data":{"prompt_id":"p","timestamp":1}}"#).unwrap(),
            PushEvent::Started { prompt_id: "p".into() }
        );
        assert_eq!(
            PushEvent::parse(r#"{"type":"execution_cached","data":{"prompt_id":"p"}}"#).unwrap(),
            PushEvent::Cached {
                prompt_id: "p".into(),
                nodes: vec![]
            }
        );
        assert_eq!(
            PushEvent::parse(r#"{"type":"executed","data":{"node":"131","output":{"gifs":[]},"prompt_id":"p"}}"#)
                .unwrap(),
            PushEvent::NodeOutput {
                prompt_id: "p".into(),
                node: "131".into()
            }
        );
    }

    #[test]
    fn execution_error_fields() {
        let event = PushEvent::parse(
            r#"{"type":"execution_error","data":{"prompt_id":"p","node_id":"540","node_type":"WanVideoSampler","exception_type":"torch.OutOfMemoryError","exception_message":"CUDA out of memory"}}"#,
        )
        .unwrap();
        assert_matches!(
            event,
            PushEvent::Failed(ExecutionFailure { ref node_id, ref exception_message, .. })
                if node_id.as_deref() == Some("540") && exception_message == "CUDA out of memory"
        );
    }

    #[test]
    fn custom_node_events_are_unrecognized() {
        let event = PushEvent::parse(r#"{"type":"crystools.monitor","data":{"gpus":[]}}"#).unwrap();
        assert_eq!(event, PushEvent::Unrecognized("crystools.monitor".into()));
    }

    #[test]
    fn malformed_frames_fail() {
        assert!(PushEvent::parse("{").is_err());
        assert!(PushEvent::parse(r#"{"data":{}}"#).is_err());
        assert!(PushEvent::parse(r#"{"type":"progress","data":{"value":"three"}}"#).is_err());
    }
}
