//! 会话结果
//!
//! `SessionHeader` 在会话开始时创建；`SessionResult` 在报告阶段由存储定稿生成，之后不再修改。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::diagnosis::TutorMode;
use crate::models::question::Subject;
use crate::models::store::{QuestionEntry, QuestionStatus, QuestionStore};

/// 运行模式（决定流水线在哪里提前结束）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// 抽题后结束
    TranscribeOnly,
    /// 解题后结束
    Solve,
    /// 完整流程
    #[default]
    Diagnose,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transcribe_only" | "transcribe" => Ok(RunMode::TranscribeOnly),
            "solve" => Ok(RunMode::Solve),
            "diagnose" => Ok(RunMode::Diagnose),
            other => Err(format!("未知运行模式: {}", other)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::TranscribeOnly => "transcribe_only",
            RunMode::Solve => "solve",
            RunMode::Diagnose => "diagnose",
        };
        f.write_str(name)
    }
}

/// 会话元信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    pub session_id: String,
    pub pdf_path: String,
    pub subject: Subject,
    pub run_mode: RunMode,
    pub tutor_mode: TutorMode,
    pub created_at: DateTime<Utc>,
}

/// 抽题阶段的页面统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionInfo {
    pub total_pages: u32,
    #[serde(default)]
    pub processed_pages: Vec<u32>,
    #[serde(default)]
    pub failed_pages: Vec<u32>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// 模式 C 统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldSummary {
    pub first_attempt_wrong_count: usize,
    pub first_attempt_wrong_ids: Vec<String>,
    pub recovered_count: usize,
    pub recovered_ids: Vec<String>,
    pub incomplete_ids: Vec<String>,
}

/// 会话汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total: usize,
    /// 有标准答案且有第一次作答的题目数
    pub answered: usize,
    pub correct: usize,
    /// correct / answered，无作答时为 0
    pub accuracy: f64,
    /// 答错的题目
    pub missed: Vec<String>,
    pub skipped: Vec<String>,
    pub unsolved: Vec<String>,
    pub unparseable: Vec<String>,
    pub incomplete: Vec<String>,
    pub failed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold: Option<ScaffoldSummary>,
}

impl SessionSummary {
    /// 从单题记录统计
    pub fn from_entries(entries: &[QuestionEntry], tutor_mode: TutorMode) -> Self {
        let mut summary = SessionSummary {
            total: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            let id = entry.id().to_string();
            if entry.solve.is_some() && entry.attempt(1).is_some() {
                summary.answered += 1;
            }
            match entry.status() {
                QuestionStatus::Correct => summary.correct += 1,
                QuestionStatus::Incorrect => summary.missed.push(id),
                QuestionStatus::Skipped => summary.skipped.push(id),
                QuestionStatus::Unsolved => summary.unsolved.push(id),
                QuestionStatus::Unparseable => summary.unparseable.push(id),
                QuestionStatus::Incomplete => summary.incomplete.push(id),
                QuestionStatus::Failed => summary.failed.push(id),
                QuestionStatus::Extracted | QuestionStatus::Solved | QuestionStatus::Answered => {}
            }
        }

        if summary.answered > 0 {
            summary.accuracy = summary.correct as f64 / summary.answered as f64;
        }

        if tutor_mode == TutorMode::C {
            let mut scaffold = ScaffoldSummary::default();
            for diagnosis in entries.iter().filter_map(|e| e.diagnosis.as_ref()) {
                if diagnosis.first_attempt_wrong() {
                    scaffold
                        .first_attempt_wrong_ids
                        .push(diagnosis.question_id.clone());
                }
                if diagnosis.recovered() {
                    scaffold.recovered_ids.push(diagnosis.question_id.clone());
                }
            }
            scaffold.first_attempt_wrong_count = scaffold.first_attempt_wrong_ids.len();
            scaffold.recovered_count = scaffold.recovered_ids.len();
            scaffold.incomplete_ids = summary.incomplete.clone();
            summary.scaffold = Some(scaffold);
        }

        summary
    }
}

/// 一次会话的最终结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    #[serde(flatten)]
    pub header: SessionHeader,
    pub finalized_at: DateTime<Utc>,
    pub transcription: TranscriptionInfo,
    pub questions: Vec<QuestionEntry>,
    pub summary: SessionSummary,
}

impl SessionResult {
    /// 定稿：等待中的模式 C 题目转为未完成，并计算汇总
    pub fn finalize(header: SessionHeader, transcription: TranscriptionInfo, mut store: QuestionStore) -> Self {
        store.finalize();
        let questions = store.into_entries();
        let summary = SessionSummary::from_entries(&questions, header.tutor_mode);
        Self {
            header,
            finalized_at: Utc::now(),
            transcription,
            questions,
            summary,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.header.session_id
    }

    pub fn question_ids(&self) -> Vec<&str> {
        self.questions.iter().map(|e| e.id()).collect()
    }

    pub fn entry(&self, id: &str) -> Option<&QuestionEntry> {
        self.questions.iter().find(|e| e.id() == id)
    }
}
