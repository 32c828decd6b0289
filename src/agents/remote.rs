//! 远端 Agent 对端
//!
//! 通过 agent-card 地址以 A2A JSON-RPC 2.0（method = "message/send"）调用：
//! 消息体为 kind/role/parts 结构，contextId 携带会话线程标识；
//! 响应取 result.parts 中的全部 text 拼接。

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::context::ConversationThread;

use super::Agent;

/// 远端对端：POST JSON-RPC 信封到 agent url
pub struct RemoteAgent {
    id: String,
    url: String,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl RemoteAgent {
    pub fn new(id: impl Into<String>, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// 复用外部构造的 HTTP 客户端（连接池共享）
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn build_envelope(&self, message: &str, thread: &ConversationThread) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "method": "message/send",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "parts": [
                        {
                            "kind": "text",
                            "text": message,
                            "metadata": null
                        }
                    ],
                    "messageId": uuid::Uuid::new_v4().to_string(),
                    "contextId": thread.conversation_id,
                    "taskId": null,
                    "metadata": null,
                    "referenceTaskIds": [],
                    "extensions": []
                }
            },
            "id": 1
        })
    }

    async fn send(&self, message: &str, thread: &ConversationThread) -> Result<String, String> {
        let envelope = self.build_envelope(message, thread);

        let mut request = self.client.post(&self.url).json(&envelope);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Agent endpoint unreachable: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Agent endpoint returned status {}", status));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("Agent response is not JSON: {}", e))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Err(format!("Agent error: {}", message));
        }

        let mut text = String::new();
        if let Some(parts) = body
            .get("result")
            .and_then(|r| r.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if part.get("kind").and_then(|k| k.as_str()) == Some("text") {
                    if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                    }
                }
            }
        }

        if text.is_empty() {
            text = "I received your message but didn't generate a response.".to_string();
        }
        Ok(text)
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        message: &str,
        thread: &ConversationThread,
        cancel: CancellationToken,
    ) -> Result<String, String> {
        tokio::select! {
            _ = cancel.cancelled() => Err("Invocation canceled".to_string()),
            result = self.send(message, thread) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_carries_context_id() {
        let agent = RemoteAgent::new("light-agent", "https://agents.local/a2a", None);
        let thread = ConversationThread::new("conv_42", "light-agent");
        let envelope = agent.build_envelope("turn on the lights", &thread);

        assert_eq!(envelope["method"], "message/send");
        let message = &envelope["params"]["message"];
        assert_eq!(message["contextId"], "conv_42");
        assert_eq!(message["parts"][0]["text"], "turn on the lights");
        assert!(message["taskId"].is_null());
    }
}
