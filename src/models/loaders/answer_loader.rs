//! 答案文件加载
//!
//! 同一套格式用于学生作答文件（`--answers`）和预置标准答案（`--correct-answers`）：
//!
//! - 简单格式：`{"p1_q1": "A", "p1_q2": 14}`
//! - 详细格式：`{"p1_q1": {"answer": "A", "topic": "algebra", "steps": [...], "reason": "..."}}`
//!
//! 详细格式里的 `second_attempt` 是模式 C 的第二次作答。
//! 以 `_` 开头的键视为注释。按扩展名支持 `.json` 和 `.toml`。

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::warn;

/// 文件中一道题的答案
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetAnswer {
    pub answer: String,
    pub topic: Option<String>,
    pub steps: Vec<String>,
    pub reason: Option<String>,
    pub second_attempt: Option<String>,
}

impl PresetAnswer {
    pub fn simple(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetailedEntry {
    answer: JsonValue,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    second_attempt: Option<JsonValue>,
}

/// 从文件加载答案表
pub async fn load_answer_file(path: &Path) -> Result<BTreeMap<String, PresetAnswer>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取答案文件: {}", path.display()))?;

    let is_toml = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let value: JsonValue = if is_toml {
        let table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("无法解析TOML答案文件: {}", path.display()))?;
        serde_json::to_value(table)?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("无法解析JSON答案文件: {}", path.display()))?
    };

    parse_answer_map(&value).with_context(|| format!("答案文件格式错误: {}", path.display()))
}

/// 解析答案表（简单 / 详细格式可混用）
pub fn parse_answer_map(value: &JsonValue) -> Result<BTreeMap<String, PresetAnswer>> {
    let object = value
        .as_object()
        .context("答案文件应为 {题目编号: 答案} 形式的对象")?;

    let mut answers = BTreeMap::new();
    for (id, entry) in object {
        if id.starts_with('_') {
            continue;
        }
        match parse_entry(entry) {
            Some(answer) if !answer.answer.is_empty() => {
                answers.insert(id.clone(), answer);
            }
            Some(_) => {}
            None => warn!("⚠️ 忽略无法识别的答案条目: {} = {}", id, entry),
        }
    }
    Ok(answers)
}

fn parse_entry(entry: &JsonValue) -> Option<PresetAnswer> {
    if entry.is_object() {
        let detailed: DetailedEntry = serde_json::from_value(entry.clone()).ok()?;
        return Some(PresetAnswer {
            answer: scalar_to_string(&detailed.answer)?,
            topic: detailed.topic,
            steps: detailed.steps,
            reason: detailed.reason,
            second_attempt: detailed.second_attempt.as_ref().and_then(scalar_to_string),
        });
    }
    if entry.is_null() {
        return Some(PresetAnswer::default());
    }
    scalar_to_string(entry).map(PresetAnswer::simple)
}

/// 字符串 / 数字统一转为字符串
pub fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
