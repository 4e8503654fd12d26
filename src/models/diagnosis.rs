//! 诊断结果
//!
//! 三种辅导模式是封闭的变体集合，每个变体持有自己的载荷结构：
//! - A：直接给答案和步骤
//! - B：对比诊断（默认）
//! - C：分步引导，两阶段，带 `firstAttemptWrong` 一次性标记

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 辅导模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TutorMode {
    /// 直接讲解
    A,
    /// 对比诊断
    #[default]
    B,
    /// 分步引导
    C,
}

impl FromStr for TutorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a" | "direct" => Ok(TutorMode::A),
            "b" | "contrastive" => Ok(TutorMode::B),
            "c" | "scaffolded" => Ok(TutorMode::C),
            other => Err(format!("未知辅导模式: {}", other)),
        }
    }
}

impl fmt::Display for TutorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TutorMode::A => "A (direct)",
            TutorMode::B => "B (contrastive)",
            TutorMode::C => "C (scaffolded)",
        };
        f.write_str(name)
    }
}

/// 判分结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    /// 作答不在可解析范围内（例如选项标签不存在）
    Unparseable,
}

/// 诊断的最终结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisVerdict {
    Correct,
    Incorrect,
    Unparseable,
    /// 模式 C 已给出提示，等待第二次作答
    Pending,
    /// 模式 C 到报告时仍未收到第二次作答
    Incomplete,
}

impl From<Verdict> for DiagnosisVerdict {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Correct => DiagnosisVerdict::Correct,
            Verdict::Incorrect => DiagnosisVerdict::Incorrect,
            Verdict::Unparseable => DiagnosisVerdict::Unparseable,
        }
    }
}

/// 只能由 false 变 true 的标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StickyFlag(bool);

impl StickyFlag {
    pub fn raise(&mut self) {
        self.0 = true;
    }

    pub fn get(self) -> bool {
        self.0
    }
}

/// 每次作答的判分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptVerdict {
    pub attempt_number: u8,
    pub submitted_answer: String,
    pub verdict: Verdict,
}

/// 误区（按可能性排序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Misconception {
    /// 归类代码，不在目录中的保留为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 单个选项的点评
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionNote {
    pub option: String,
    #[serde(default)]
    pub content: String,
    pub analysis: String,
    pub is_correct: bool,
    pub is_user_choice: bool,
}

/// 模式 A 载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPayload {
    pub canonical_answer: String,
    pub steps: Vec<String>,
    pub one_line_summary: String,
}

/// 模式 B 答错时模型给出的对比分析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContrastiveAnalysis {
    pub why_tempting: String,
    pub misconceptions: Vec<Misconception>,
    pub comparative_explanation: String,
    #[serde(default)]
    pub option_notes: Vec<OptionNote>,
}

/// 模式 B 载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContrastivePayload {
    pub canonical_answer: String,
    pub steps: Vec<String>,
    /// 答对时的确认语
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    /// 答错时的对比分析
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ContrastiveAnalysis>,
}

/// 模式 C 的单步提示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintStep {
    /// 需要重读或重推的内容
    pub action: String,
    /// 去哪里找依据
    pub evidence_location: String,
    pub guiding_question: String,
    /// 认知锚点：学生应得出的理解，不能是答案本身
    pub expected_conclusion: String,
}

/// 模式 C 第二阶段的综合讲解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedExplanation {
    pub combined_explanation: String,
    pub first_mistake: String,
    /// 只有第二次仍然答错时才有
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_mistake: Option<String>,
    #[serde(default)]
    pub option_notes: Vec<OptionNote>,
}

/// 模式 C 单题状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaffoldState {
    #[default]
    Unanswered,
    /// 第一次就答对（终态）
    FirstAttemptCorrect,
    /// 已下发提示，等待第二次作答
    HintsIssued,
    /// 已收到第二次作答（终态）
    SecondAttemptRecorded,
    /// 报告时仍未收到第二次作答
    Incomplete,
}

/// 模式 C 载荷
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldedPayload {
    pub state: ScaffoldState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_analysis: Option<String>,
    #[serde(default)]
    pub hints: Vec<HintStep>,
    /// 第一阶段输出中被遮盖的答案片段数
    #[serde(default)]
    pub redactions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<CombinedExplanation>,
}

/// 各模式载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosisPayload {
    Direct(DirectPayload),
    Contrastive(ContrastivePayload),
    Scaffolded(ScaffoldedPayload),
}

/// 一道题的诊断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisResult {
    pub question_id: String,
    pub mode: TutorMode,
    pub attempts: Vec<AttemptVerdict>,
    pub verdict: DiagnosisVerdict,
    pub payload: DiagnosisPayload,
    #[serde(default)]
    first_attempt_wrong: StickyFlag,
}

impl DiagnosisResult {
    pub fn new(
        question_id: impl Into<String>,
        mode: TutorMode,
        attempts: Vec<AttemptVerdict>,
        verdict: DiagnosisVerdict,
        payload: DiagnosisPayload,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            mode,
            attempts,
            verdict,
            payload,
            first_attempt_wrong: StickyFlag::default(),
        }
    }

    pub fn first_attempt_wrong(&self) -> bool {
        self.first_attempt_wrong.get()
    }

    /// 标记第一次答错，之后不可撤销
    pub fn mark_first_attempt_wrong(&mut self) {
        self.first_attempt_wrong.raise();
    }

    /// 模式 C 载荷
    pub fn scaffold(&self) -> Option<&ScaffoldedPayload> {
        match &self.payload {
            DiagnosisPayload::Scaffolded(p) => Some(p),
            _ => None,
        }
    }

    /// 第一次答错后又在第二次答对
    pub fn recovered(&self) -> bool {
        self.first_attempt_wrong() && self.verdict == DiagnosisVerdict::Correct
    }

    /// 报告定稿：等待中的模式 C 题目转为未完成
    pub fn finalize(&mut self) {
        if self.verdict == DiagnosisVerdict::Pending {
            self.verdict = DiagnosisVerdict::Incomplete;
        }
        if let DiagnosisPayload::Scaffolded(p) = &mut self.payload {
            if p.state == ScaffoldState::HintsIssued {
                p.state = ScaffoldState::Incomplete;
            }
        }
    }
}
