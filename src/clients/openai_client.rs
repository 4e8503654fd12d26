//! OpenAI 兼容网关
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 读图 / 文本 / 模拟学生可以分别指向不同的端点和模型

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::clients::{LlmGateway, LlmRequest, ModelRole};
use crate::config::Config;
use crate::error::GatewayError;

/// 一个端点 + 模型
struct Endpoint {
    client: Client<OpenAIConfig>,
    model: String,
}

impl Endpoint {
    fn new(api_key: &str, api_base: &str, model: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self {
            client: Client::with_config(openai_config),
            model: model.to_string(),
        }
    }
}

/// OpenAI 兼容网关
pub struct OpenAiGateway {
    vision: Endpoint,
    text: Endpoint,
    student: Endpoint,
    max_tokens: u32,
}

impl OpenAiGateway {
    /// 创建网关，没有 API Key 时返回 `NotConfigured`
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let llm = &config.llm;
        if llm.api_key.trim().is_empty() {
            return Err(GatewayError::NotConfigured(
                "缺少 OPENAI_API_KEY（或使用 --no-llm 离线运行）".to_string(),
            ));
        }

        let student = &config.student;
        Ok(Self {
            vision: Endpoint::new(&llm.api_key, &llm.api_base_url, &llm.vision_model),
            text: Endpoint::new(&llm.api_key, &llm.api_base_url, &llm.text_model),
            student: Endpoint::new(
                student.api_key.as_deref().unwrap_or(&llm.api_key),
                student.api_base_url.as_deref().unwrap_or(&llm.api_base_url),
                config.student_model(),
            ),
            max_tokens: llm.max_tokens,
        })
    }

    fn endpoint(&self, role: ModelRole) -> &Endpoint {
        match role {
            ModelRole::Vision => &self.vision,
            ModelRole::Text => &self.text,
            ModelRole::Student => &self.student,
        }
    }

    fn build_messages(
        request: &LlmRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, GatewayError> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = &request.system {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()
                .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = if request.images.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.as_str())
                .build()
        } else {
            // 文本在前，页面图片在后
            let mut content_parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: request.user.clone(),
                },
            )];
            for url in &request.images {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::High),
                        },
                    },
                ));
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()
        }
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

        messages.push(ChatCompletionRequestMessage::User(user_msg));
        Ok(messages)
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn complete(&self, request: &LlmRequest) -> Result<String, GatewayError> {
        let endpoint = self.endpoint(request.role);
        debug!(
            "[{}] 调用 LLM API，模型: {}，消息长度: {} 字符，图片: {} 张",
            request.stage.as_str(),
            endpoint.model,
            request.user.len(),
            request.images.len()
        );

        let messages = Self::build_messages(request)?;
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&endpoint.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

        let response = endpoint
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(GatewayError::EmptyResponse)?;

        if content.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        Ok(content.trim().to_string())
    }
}

/// 按错误信息归类：鉴权 / 请求不合法为致命，其余视为临时错误
pub fn classify_error(message: &str) -> GatewayError {
    let lower = message.to_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("invalid_api_key")
        || lower.contains("incorrect api key")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("permission")
    {
        GatewayError::Auth(message.to_string())
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        GatewayError::RateLimited {
            retry_after_secs: None,
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GatewayError::Timeout(0)
    } else if lower.contains("400")
        || lower.contains("invalid_request")
        || lower.contains("context_length")
        || lower.contains("model_not_found")
    {
        GatewayError::BadRequest(message.to_string())
    } else {
        GatewayError::Transport(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("invalid_request_error: Incorrect API key provided"),
            GatewayError::Auth(_)
        ));
        assert!(matches!(
            classify_error("Rate limit reached for gpt-4o"),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_error("invalid_request_error: messages too long"),
            GatewayError::BadRequest(_)
        ));
        assert!(matches!(
            classify_error("error sending request: connection reset"),
            GatewayError::Transport(_)
        ));
    }

    #[test]
    fn test_requires_api_key() {
        let config = Config::default();
        assert!(matches!(
            OpenAiGateway::new(&config),
            Err(GatewayError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_builds_vision_message() {
        let request = LlmRequest::new(crate::clients::Stage::Extract, ModelRole::Vision, "read")
            .with_system("sys")
            .with_images(vec!["data:image/png;base64,AAAA".to_string()]);
        let messages = OpenAiGateway::build_messages(&request).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    #[ignore] // 需要真实 API Key：cargo test -- --ignored
    async fn test_live_completion() {
        let config = Config::from_env();
        let gateway = OpenAiGateway::new(&config).unwrap();
        let request = LlmRequest::new(crate::clients::Stage::Solve, ModelRole::Text, "Reply with OK");
        let text = gateway.complete(&request).await.unwrap();
        assert!(!text.is_empty());
    }
}
