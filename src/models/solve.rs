//! 解题结果

use serde::{Deserialize, Serialize};

use crate::models::loaders::PresetAnswer;

/// 标准答案来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveSource {
    /// 模型解出
    #[default]
    Solved,
    /// 外部预置答案（覆盖模型结果）
    Preset,
}

/// 一道题的标准解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResult {
    pub question_id: String,
    pub canonical_answer: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source: SolveSource,
}

impl SolveResult {
    pub fn new(question_id: impl Into<String>, canonical_answer: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            canonical_answer: canonical_answer.into(),
            steps: Vec::new(),
            topic: None,
            final_reason: None,
            confidence: None,
            source: SolveSource::Solved,
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// 由预置答案构造
    pub fn from_preset(question_id: &str, preset: &PresetAnswer) -> Self {
        Self {
            question_id: question_id.to_string(),
            canonical_answer: preset.answer.clone(),
            steps: preset.steps.clone(),
            topic: preset.topic.clone(),
            final_reason: preset.reason.clone(),
            confidence: Some(1.0),
            source: SolveSource::Preset,
        }
    }
}
