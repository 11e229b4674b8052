//! Server-sent-event decoding for streamed assistant runs.
//!
//! The provider streams `event:` / `data:` frames separated by blank lines.
//! [`SseDecoder`] reassembles frames from arbitrarily split byte chunks and
//! [`decode_run_event`] maps one frame onto a [`RunEvent`].

use super::{AgentError, RunEvent, StepKind, ToolCallRequest};
use serde::Deserialize;

/// One complete SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame they complete
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_ref(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        frames
    }

    /// Flush a trailing frame that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            if let Some(frame) = self.push(b"\n").pop() {
                return Some(frame);
            }
        }
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

/// What the stream reader should do with a decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(RunEvent),
    Done,
}

/// Map one frame of the assistants stream onto a [`RunEvent`]
pub fn decode_run_event(frame: &SseFrame) -> Result<Decoded, AgentError> {
    let name = frame.event.as_deref().unwrap_or("message");
    if name == "done" || frame.data.trim() == "[DONE]" {
        return Ok(Decoded::Done);
    }

    let event = match name {
        "thread.run.created" => {
            let run: RunObject = parse(name, &frame.data)?;
            RunEvent::RunCreated { run_id: run.id }
        }
        "thread.message.delta" => {
            let delta: MessageDeltaObject = parse(name, &frame.data)?;
            let text: String = delta
                .delta
                .content
                .into_iter()
                .filter_map(|part| part.text.and_then(|t| t.value))
                .collect();
            RunEvent::MessageDelta { text }
        }
        "thread.run.step.created" => {
            let step: RunStepObject = parse(name, &frame.data)?;
            let kind = match step.kind.as_str() {
                "message_creation" => StepKind::MessageCreation,
                "tool_calls" => StepKind::ToolCalls,
                other => StepKind::Other(other.to_string()),
            };
            RunEvent::RunStepCreated { kind }
        }
        "thread.run.requires_action" => {
            let run: RunObject = parse(name, &frame.data)?;
            let tool_calls = run
                .required_action
                .and_then(|action| action.submit_tool_outputs)
                .map(|outputs| outputs.tool_calls)
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCallRequest {
                    id: call.id,
                    function_name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect();
            RunEvent::RequiresAction {
                run_id: run.id,
                tool_calls,
            }
        }
        "thread.message.completed" => {
            let message: MessageObject = parse(name, &frame.data)?;
            let text: String = message
                .content
                .into_iter()
                .filter_map(|part| part.text.and_then(|t| t.value))
                .collect();
            RunEvent::MessageCompleted {
                text: Some(text).filter(|t| !t.is_empty()),
            }
        }
        "thread.run.failed" => {
            let run: RunObject = parse(name, &frame.data)?;
            RunEvent::RunFailed {
                message: run.last_error.and_then(|e| e.message),
            }
        }
        "error" => {
            let error: StreamErrorObject = serde_json::from_str(&frame.data).unwrap_or_default();
            RunEvent::RunFailed {
                message: error.message.or(error.error.and_then(|e| e.message)),
            }
        }
        other => RunEvent::Other(other.to_string()),
    };

    Ok(Decoded::Event(event))
}

fn parse<'a, T: Deserialize<'a>>(event: &str, data: &'a str) -> Result<T, AgentError> {
    serde_json::from_str(data).map_err(|e| AgentError::Decode(format!("{}: {}", event, e)))
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<LastError>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<ToolCallObject>,
}

#[derive(Debug, Deserialize)]
struct ToolCallObject {
    id: String,
    function: FunctionObject,
}

#[derive(Debug, Deserialize)]
struct FunctionObject {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct LastError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamErrorObject {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<LastError>,
}

#[derive(Debug, Deserialize)]
struct RunStepObject {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaObject {
    delta: MessageDelta,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: Some(event.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_decoder_reassembles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: thread.run.cre").is_empty());
        assert!(decoder.push(b"ated\r\ndata: {\"id\":").is_empty());
        let frames = decoder.push(b"\"run_1\"}\r\n\r\nevent: done\ndata: [DONE]\n\n");

        assert_eq!(
            frames,
            vec![
                frame("thread.run.created", "{\"id\":\"run_1\"}"),
                frame("done", "[DONE]"),
            ]
        );
    }

    #[test]
    fn test_decoder_joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\ndata: a\ndata: b\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: None,
                data: "a\nb".to_string()
            }]
        );
    }

    #[test]
    fn test_decoder_finish_flushes_trailing_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: done\ndata: [DONE]").is_empty());
        assert_eq!(decoder.finish(), Some(frame("done", "[DONE]")));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decode_message_delta() {
        let data = r#"{"id":"msg_1","object":"thread.message.delta","delta":{"content":[{"index":0,"type":"text","text":{"value":"Hel","annotations":[]}}]}}"#;
        assert_eq!(
            decode_run_event(&frame("thread.message.delta", data)).unwrap(),
            Decoded::Event(RunEvent::MessageDelta {
                text: "Hel".to_string()
            })
        );
    }

    #[test]
    fn test_decode_requires_action() {
        let data = r#"{
            "id": "run_1",
            "object": "thread.run",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "web_search", "arguments": "{\"query\":\"weather today\"}" }
                    }]
                }
            }
        }"#;

        match decode_run_event(&frame("thread.run.requires_action", data)).unwrap() {
            Decoded::Event(RunEvent::RequiresAction { run_id, tool_calls }) => {
                assert_eq!(run_id, "run_1");
                assert_eq!(
                    tool_calls,
                    vec![ToolCallRequest {
                        id: "call_1".to_string(),
                        function_name: "web_search".to_string(),
                        arguments: "{\"query\":\"weather today\"}".to_string(),
                    }]
                );
            }
            other => panic!("Expected RequiresAction, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_step_completed_and_failed() {
        let step = decode_run_event(&frame(
            "thread.run.step.created",
            r#"{"id":"step_1","type":"message_creation"}"#,
        ))
        .unwrap();
        assert_eq!(
            step,
            Decoded::Event(RunEvent::RunStepCreated {
                kind: StepKind::MessageCreation
            })
        );

        let completed = decode_run_event(&frame(
            "thread.message.completed",
            r#"{"id":"msg_1","content":[{"type":"text","text":{"value":"Hello world","annotations":[]}}]}"#,
        ))
        .unwrap();
        assert_eq!(
            completed,
            Decoded::Event(RunEvent::MessageCompleted {
                text: Some("Hello world".to_string())
            })
        );

        let failed = decode_run_event(&frame(
            "thread.run.failed",
            r#"{"id":"run_1","last_error":{"code":"rate_limit_exceeded","message":"rate limited"}}"#,
        ))
        .unwrap();
        assert_eq!(
            failed,
            Decoded::Event(RunEvent::RunFailed {
                message: Some("rate limited".to_string())
            })
        );
    }

    #[test]
    fn test_decode_done_and_unhandled() {
        assert_eq!(decode_run_event(&frame("done", "[DONE]")).unwrap(), Decoded::Done);
        assert_eq!(
            decode_run_event(&frame("thread.run.in_progress", "{}")).unwrap(),
            Decoded::Event(RunEvent::Other("thread.run.in_progress".to_string()))
        );
        assert!(matches!(
            decode_run_event(&frame("thread.run.created", "not json")),
            Err(AgentError::Decode(_))
        ));
    }
}
