//! 结构校验服务 - 业务能力层
//!
//! 把 LLM 的原始文本解析成带类型的记录。每个阶段声明自己的结构（`Schema`），
//! 不合格时带着错误信息重新提问，最多 `repair_retries` 次，之后返回 `SchemaValidation` 错误。

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::clients::{LlmGateway, LlmRequest};
use crate::config::ValidatorConfig;
use crate::error::{PipelineError, SchemaKind};
use crate::utils::logging::truncate_text;

/// 阶段输出结构
pub trait Schema {
    type Output;

    fn kind(&self) -> SchemaKind;

    /// 给模型看的结构说明（修复提示里使用）
    fn describe(&self) -> String;

    /// 从 JSON 构造类型化结果，不合格时返回原因
    fn parse(&self, value: JsonValue) -> Result<Self::Output, String>;
}

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("fenced block regex"));

/// 从模型回复中找出 JSON
///
/// 依次尝试：整段解析、```json 代码块、括号配对截取。
pub fn extract_json(text: &str) -> Option<JsonValue> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        return Some(value);
    }

    for caps in FENCED_RE.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<JsonValue>(body.as_str().trim()) {
                return Some(value);
            }
        }
    }

    let bytes = trimmed.as_bytes();
    let mut start = 0;
    while let Some(offset) = trimmed[start..].find(['{', '[']) {
        let open = start + offset;
        if let Some(close) = matching_close(bytes, open) {
            if let Ok(value) = serde_json::from_str::<JsonValue>(&trimmed[open..=close]) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

/// 找到与 `open` 处括号配对的位置（跳过字符串内容）
fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 结构校验器
pub struct Validator {
    gateway: Arc<dyn LlmGateway>,
    repair_retries: u32,
}

impl Validator {
    pub fn new(gateway: Arc<dyn LlmGateway>, config: &ValidatorConfig) -> Self {
        Self {
            gateway,
            repair_retries: config.repair_retries,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.gateway.is_offline()
    }

    /// 只做解析，不发请求
    pub fn validate<S: Schema>(schema: &S, raw: &str) -> Result<S::Output, String> {
        let value = extract_json(raw).ok_or_else(|| "reply does not contain valid JSON".to_string())?;
        schema.parse(value)
    }

    /// 纯文本请求（OCR 之类不需要结构的阶段）
    pub async fn complete_text(&self, request: &LlmRequest) -> Result<String, PipelineError> {
        self.gateway
            .complete(request)
            .await
            .map_err(PipelineError::from_gateway)
    }

    /// 请求并按结构解析，不合格时带错误信息修复重试
    pub async fn request<S>(&self, request: LlmRequest, schema: &S) -> Result<S::Output, PipelineError>
    where
        S: Schema + Sync,
        S::Output: Send,
    {
        let mut raw = self.complete_text(&request).await?;
        let mut attempts = 1;

        loop {
            let reason = match Self::validate(schema, &raw) {
                Ok(output) => {
                    if attempts > 1 {
                        debug!("[{}] 修复后校验通过", schema.kind());
                    }
                    return Ok(output);
                }
                Err(reason) => reason,
            };

            if attempts > self.repair_retries {
                warn!(
                    "[{}] ❌ 输出校验失败 (已尝试 {} 次): {}",
                    schema.kind(),
                    attempts,
                    reason
                );
                return Err(PipelineError::SchemaValidation {
                    schema: schema.kind(),
                    reason,
                    attempts,
                });
            }

            warn!(
                "[{}] ⚠️ 输出不符合结构，发起修复: {}",
                schema.kind(),
                reason
            );
            let repair = repair_request(&request, &raw, &reason, &schema.describe());
            raw = self.complete_text(&repair).await?;
            attempts += 1;
        }
    }
}

fn repair_request(original: &LlmRequest, raw: &str, reason: &str, describe: &str) -> LlmRequest {
    let mut repair = original.clone();
    repair.user = format!(
        "{}\n\n---\nYour previous reply could not be used: {}\nPrevious reply (truncated):\n{}\n\n\
         Please output strict JSON format, no other text. Required structure:\n{}",
        original.user,
        reason,
        truncate_text(raw, 800),
        describe
    );
    repair
}

// ========== 解析辅助函数 ==========

/// 按多个候选键取字符串字段（兼容 snake_case / camelCase）
pub(crate) fn str_field(value: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| match v {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// 必填字符串字段
pub(crate) fn required_str(value: &JsonValue, keys: &[&str]) -> Result<String, String> {
    str_field(value, keys).ok_or_else(|| format!("missing required field `{}`", keys[0]))
}

/// 字符串数组字段（单个字符串视为一项）
pub(crate) fn str_list(value: &JsonValue, keys: &[&str]) -> Vec<String> {
    match keys.iter().find_map(|k| value.get(*k)) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(JsonValue::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockGateway, ModelRole, Stage};
    use serde_json::json;

    /// 只要求有非空 `answer` 字段
    struct AnswerSchema;

    impl Schema for AnswerSchema {
        type Output = String;

        fn kind(&self) -> SchemaKind {
            SchemaKind::Solve
        }

        fn describe(&self) -> String {
            "{\"answer\": string}".to_string()
        }

        fn parse(&self, value: JsonValue) -> Result<String, String> {
            required_str(&value, &["answer"])
        }
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("{\"a\": 1}").unwrap(), json!({"a": 1}));
        assert_eq!(
            extract_json("Sure!\n```json\n{\"a\": 2}\n```\nDone").unwrap(),
            json!({"a": 2})
        );
        assert_eq!(
            extract_json("Result: [1, {\"b\": \"}\"}] trailing").unwrap(),
            json!([1, {"b": "}"}])
        );
        assert_eq!(
            extract_json("noise {broken {\"c\": 3}").unwrap(),
            json!({"c": 3})
        );
        assert!(extract_json("no json here").is_none());
    }

    #[tokio::test]
    async fn test_repairs_once_then_succeeds() {
        let mock = Arc::new(MockGateway::new());
        mock.push_reply(Stage::Solve, "I think the answer is C");
        mock.push_json(Stage::Solve, json!({"answer": "C"}));

        let validator = Validator::new(mock.clone(), &ValidatorConfig { repair_retries: 1 });
        let request = LlmRequest::new(Stage::Solve, ModelRole::Text, "solve it");
        let answer = validator.request(request, &AnswerSchema).await.unwrap();

        assert_eq!(answer, "C");
        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].user.contains("could not be used"));
        assert!(calls[1].user.starts_with("solve it"));
    }

    #[tokio::test]
    async fn test_repair_budget_is_bounded() {
        let mock = Arc::new(MockGateway::new());
        for _ in 0..4 {
            mock.push_json(Stage::Solve, json!({"wrong": true}));
        }
        let validator = Validator::new(mock.clone(), &ValidatorConfig { repair_retries: 1 });
        let request = LlmRequest::new(Stage::Solve, ModelRole::Text, "solve it");
        let err = validator.request(request, &AnswerSchema).await.unwrap_err();

        match err {
            PipelineError::SchemaValidation { schema, attempts, .. } => {
                assert_eq!(schema, SchemaKind::Solve);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(mock.call_count(Stage::Solve), 2);
    }

    #[tokio::test]
    async fn test_gateway_error_maps_to_pipeline_error() {
        let mock = Arc::new(MockGateway::new());
        mock.push_error(Stage::Solve, crate::error::GatewayError::Auth("401".into()));
        let validator = Validator::new(mock, &ValidatorConfig::default());
        let request = LlmRequest::new(Stage::Solve, ModelRole::Text, "solve it");
        let err = validator.request(request, &AnswerSchema).await.unwrap_err();
        assert!(matches!(err, PipelineError::GatewayAuth(_)));
    }
}
