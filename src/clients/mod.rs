//! LLM 网关（Gateway）
//!
//! 对外只有一个能力：提交结构化提示词，拿回原始文本。
//! 调用可能超时、限流或返回格式错误的内容，这些都由上层处理：
//! - `retry::RetryingGateway` 负责超时和退避重试
//! - `services::validator` 负责结构校验和修复
//!
//! 实现：
//! - `OpenAiGateway`：兼容 OpenAI API 的服务（`async-openai`）
//! - `MockGateway`：离线模式，按阶段返回预置 JSON，也可在测试里编排响应

pub mod mock_client;
pub mod openai_client;
pub mod retry;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GatewayError;

pub use mock_client::MockGateway;
pub use openai_client::OpenAiGateway;
pub use retry::{RetryPolicy, RetryingGateway};

/// 请求所属阶段（mock 网关按它路由，日志里也用它标注）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 页面转文本
    Ocr,
    /// 抽题
    Extract,
    /// 解题
    Solve,
    /// 对比诊断
    Diagnose,
    /// 分步提示
    Hint,
    /// 综合讲解
    Explain,
    /// 模拟学生
    Simulate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ocr => "ocr",
            Stage::Extract => "extract",
            Stage::Solve => "solve",
            Stage::Diagnose => "diagnose",
            Stage::Hint => "hint",
            Stage::Explain => "explain",
            Stage::Simulate => "simulate",
        }
    }
}

/// 使用哪一类模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelRole {
    /// 读图
    Vision,
    /// 文本推理
    Text,
    /// 模拟学生
    Student,
}

/// 一次 LLM 请求
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub stage: Stage,
    pub role: ModelRole,
    pub system: Option<String>,
    pub user: String,
    /// 图片 URL（可以是 data URL）
    pub images: Vec<String>,
    pub temperature: f32,
}

impl LlmRequest {
    pub fn new(stage: Stage, role: ModelRole, user: impl Into<String>) -> Self {
        Self {
            stage,
            role,
            system: None,
            user: user.into(),
            images: Vec::new(),
            temperature: 0.0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// LLM 网关
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// 提交请求，返回原始文本
    async fn complete(&self, request: &LlmRequest) -> Result<String, GatewayError>;

    /// 是否离线（离线时鉴权错误不中止整次运行）
    fn is_offline(&self) -> bool {
        false
    }
}
