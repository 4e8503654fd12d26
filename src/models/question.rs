//! 题目数据模型
//!
//! 题目在抽取阶段生成，之后只读。编号格式 `p{页码}_q{页内序号}`，
//! 由抽取阶段一次性分配，后续各阶段都以它为键。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 科目
///
/// 数学按页面图片直接抽题；英语先 OCR 成文本再从文本中抽题。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    #[default]
    Math,
    English,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Math => "math",
            Subject::English => "english",
        }
    }

    /// 是否走“先 OCR 再抽题”的路径
    pub fn uses_ocr_text(self) -> bool {
        matches!(self, Subject::English)
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "math" | "quant" => Ok(Subject::Math),
            "english" | "verbal" => Ok(Subject::English),
            other => Err(format!("未知科目: {}", other)),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 题型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    MultipleChoice,
    NumericEntry,
    #[default]
    #[serde(other)]
    Unknown,
}

/// 题目来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSource {
    pub pdf: String,
    pub page: u32,
}

/// 识别不确定的片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertainSpan {
    pub span: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// 题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub source: QuestionSource,
    #[serde(default)]
    pub subject: Subject,
    #[serde(default)]
    pub problem_type: ProblemType,
    pub stem: String,
    /// 选项标签 -> 选项内容（内容可能没识别出来）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<BTreeMap<String, Option<String>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub latex_equations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncertain_spans: Vec<UncertainSpan>,
    pub confidence: f64,
    /// 阅读类题目的文章
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passage_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_category: Option<String>,
}

impl Question {
    /// 最小构造，其余字段取空
    pub fn new(id: impl Into<String>, pdf: impl Into<String>, page: u32, stem: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: QuestionSource {
                pdf: pdf.into(),
                page,
            },
            subject: Subject::Math,
            problem_type: ProblemType::Unknown,
            stem: stem.into(),
            choices: None,
            latex_equations: Vec::new(),
            diagram_description: None,
            constraints: Vec::new(),
            uncertain_spans: Vec::new(),
            confidence: 1.0,
            passage_context: None,
            question_category: None,
        }
    }

    /// 设置选项并标记为选择题
    pub fn with_choices<I, L, T>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = (L, T)>,
        L: Into<String>,
        T: Into<String>,
    {
        self.choices = Some(
            choices
                .into_iter()
                .map(|(label, text)| (label.into(), Some(text.into())))
                .collect(),
        );
        self.problem_type = ProblemType::MultipleChoice;
        self
    }

    pub fn with_problem_type(mut self, problem_type: ProblemType) -> Self {
        self.problem_type = problem_type;
        self
    }

    /// 是否按选择题判分
    pub fn is_multiple_choice(&self) -> bool {
        self.problem_type == ProblemType::MultipleChoice
            || (self.problem_type == ProblemType::Unknown
                && self.choices.as_ref().is_some_and(|c| !c.is_empty()))
    }

    /// 选项标签（有序）
    pub fn choice_labels(&self) -> Vec<&str> {
        self.choices
            .as_ref()
            .map(|c| c.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// 某个选项的内容
    pub fn choice_text(&self, label: &str) -> Option<&str> {
        self.choices
            .as_ref()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(label.trim()))
            .and_then(|(_, v)| v.as_deref())
    }

    /// 排序键：(页码, 页内序号, 编号)
    pub fn order_key(&self) -> (u32, u32, String) {
        order_key(&self.id)
    }
}

/// 生成题目编号
pub fn question_id(page: u32, index: u32) -> String {
    format!("p{}_q{}", page, index)
}

/// 解析题目编号中的页码和序号（允许 `_2` 之类的去重后缀）
pub fn parse_question_id(id: &str) -> Option<(u32, u32)> {
    let rest = id.strip_prefix('p')?;
    let (page, rest) = rest.split_once("_q")?;
    let index = rest.split('_').next()?;
    Some((page.parse().ok()?, index.parse().ok()?))
}

/// 按编号排序用的键，无法解析的编号排在最后
pub fn order_key(id: &str) -> (u32, u32, String) {
    match parse_question_id(id) {
        Some((page, index)) => (page, index, id.to_string()),
        None => (u32::MAX, u32::MAX, id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_id_roundtrip() {
        assert_eq!(question_id(2, 4), "p2_q4");
        assert_eq!(parse_question_id("p2_q4"), Some((2, 4)));
        assert_eq!(parse_question_id("p10_q3_2"), Some((10, 3)));
        assert_eq!(parse_question_id("q3"), None);
    }

    #[test]
    fn test_order_key_is_numeric() {
        let mut ids = vec!["p10_q1", "p2_q10", "p2_q2", "x"];
        ids.sort_by_key(|id| order_key(id));
        assert_eq!(ids, vec!["p2_q2", "p2_q10", "p10_q1", "x"]);
    }

    #[test]
    fn test_choices() {
        let q = Question::new("p1_q1", "exam.pdf", 1, "x + 5 = 12")
            .with_choices([("A", "5"), ("B", "6"), ("C", "7")]);
        assert!(q.is_multiple_choice());
        assert_eq!(q.choice_labels(), vec!["A", "B", "C"]);
        assert_eq!(q.choice_text("c"), Some("7"));
    }

    #[test]
    fn test_json_shape() {
        let q = Question::new("p1_q1", "exam.pdf", 1, "stem")
            .with_problem_type(ProblemType::NumericEntry);
        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(value["problemType"], "numeric_entry");
        assert_eq!(value["source"]["page"], 1);

        let parsed: Question = serde_json::from_value(serde_json::json!({
            "id": "p1_q2",
            "source": {"pdf": "exam.pdf", "page": 1},
            "problemType": "essay",
            "stem": "Explain",
            "confidence": 0.4
        }))
        .unwrap();
        assert_eq!(parsed.problem_type, ProblemType::Unknown);
    }
}
