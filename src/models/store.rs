//! 题目 / 结果存储
//!
//! 按题目编号索引的内存集合，记录每道题在各阶段的状态。
//! 只由编排层持有和修改；并发任务拿到的是只读副本，结果以增量形式交回。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::answer::AnswerRecord;
use crate::models::diagnosis::{DiagnosisResult, DiagnosisVerdict};
use crate::models::question::{order_key, Question};
use crate::models::solve::SolveResult;

/// 单题状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Extracted,
    Solved,
    /// 解题失败，不参与诊断
    Unsolved,
    Answered,
    /// 未作答，不参与诊断
    Skipped,
    Correct,
    Incorrect,
    Unparseable,
    /// 模式 C 缺少第二次作答
    Incomplete,
    /// 诊断失败
    Failed,
}

impl QuestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionStatus::Extracted => "extracted",
            QuestionStatus::Solved => "solved",
            QuestionStatus::Unsolved => "unsolved",
            QuestionStatus::Answered => "answered",
            QuestionStatus::Skipped => "skipped",
            QuestionStatus::Correct => "correct",
            QuestionStatus::Incorrect => "incorrect",
            QuestionStatus::Unparseable => "unparseable",
            QuestionStatus::Incomplete => "incomplete",
            QuestionStatus::Failed => "failed",
        }
    }
}

/// 一道题的全部阶段产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEntry {
    pub question: Question,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solve: Option<SolveResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solve_error: Option<String>,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis_error: Option<String>,
}

impl QuestionEntry {
    fn new(question: Question) -> Self {
        Self {
            question,
            solve: None,
            solve_error: None,
            answers: Vec::new(),
            skipped: false,
            diagnosis: None,
            diagnosis_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.question.id
    }

    /// 指定次数的作答
    pub fn attempt(&self, attempt_number: u8) -> Option<&AnswerRecord> {
        self.answers
            .iter()
            .find(|a| a.attempt_number == attempt_number)
    }

    pub fn status(&self) -> QuestionStatus {
        if let Some(diagnosis) = &self.diagnosis {
            return match diagnosis.verdict {
                DiagnosisVerdict::Correct => QuestionStatus::Correct,
                DiagnosisVerdict::Incorrect => QuestionStatus::Incorrect,
                DiagnosisVerdict::Unparseable => QuestionStatus::Unparseable,
                DiagnosisVerdict::Pending | DiagnosisVerdict::Incomplete => {
                    QuestionStatus::Incomplete
                }
            };
        }
        if self.diagnosis_error.is_some() {
            return QuestionStatus::Failed;
        }
        if self.solve.is_none() {
            return if self.solve_error.is_some() {
                QuestionStatus::Unsolved
            } else {
                QuestionStatus::Extracted
            };
        }
        if self.skipped {
            QuestionStatus::Skipped
        } else if self.attempt(1).is_some() {
            QuestionStatus::Answered
        } else {
            QuestionStatus::Solved
        }
    }
}

/// 题目 / 结果存储
#[derive(Debug, Clone, Default)]
pub struct QuestionStore {
    entries: Vec<QuestionEntry>,
    index: HashMap<String, usize>,
}

impl QuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量建库，重复编号只保留第一个
    pub fn from_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let mut store = Self::new();
        for question in questions {
            let id = question.id.clone();
            if !store.insert(question) {
                warn!("⚠️ 题目编号重复，已忽略: {}", id);
            }
        }
        store
    }

    /// 由已有的单题记录恢复
    pub fn from_entries(entries: impl IntoIterator<Item = QuestionEntry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            if store.index.contains_key(entry.id()) {
                continue;
            }
            store.entries.push(entry);
        }
        store.reindex();
        store
    }

    /// 插入题目，编号已存在时返回 false
    pub fn insert(&mut self, question: Question) -> bool {
        if self.index.contains_key(&question.id) {
            return false;
        }
        self.entries.push(QuestionEntry::new(question));
        self.reindex();
        true
    }

    fn reindex(&mut self) {
        self.entries.sort_by_key(|e| order_key(e.id()));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id().to_string(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按编号顺序的全部记录
    pub fn entries(&self) -> &[QuestionEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<QuestionEntry> {
        self.entries
    }

    pub fn get(&self, id: &str) -> Option<&QuestionEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut QuestionEntry> {
        match self.index.get(id) {
            Some(&i) => self.entries.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.entries.iter().map(|e| &e.question)
    }

    /// 写入解题结果（整体替换，不合并）
    pub fn set_solve(&mut self, result: SolveResult) -> bool {
        match self.get_mut(&result.question_id) {
            Some(entry) => {
                entry.solve_error = None;
                entry.solve = Some(result);
                true
            }
            None => false,
        }
    }

    pub fn mark_unsolved(&mut self, id: &str, reason: impl Into<String>) {
        if let Some(entry) = self.get_mut(id) {
            entry.solve = None;
            entry.solve_error = Some(reason.into());
        }
    }

    /// 写入作答，同一次数的旧记录被替换
    pub fn record_answer(&mut self, record: AnswerRecord) -> bool {
        match self.get_mut(&record.question_id) {
            Some(entry) => {
                entry
                    .answers
                    .retain(|a| a.attempt_number != record.attempt_number);
                entry.answers.push(record);
                entry.answers.sort_by_key(|a| a.attempt_number);
                entry.skipped = false;
                true
            }
            None => false,
        }
    }

    pub fn mark_skipped(&mut self, id: &str) {
        if let Some(entry) = self.get_mut(id) {
            if entry.attempt(1).is_none() {
                entry.skipped = true;
            }
        }
    }

    pub fn set_diagnosis(&mut self, result: DiagnosisResult) -> bool {
        match self.get_mut(&result.question_id) {
            Some(entry) => {
                entry.diagnosis_error = None;
                entry.diagnosis = Some(result);
                true
            }
            None => false,
        }
    }

    pub fn mark_diagnosis_failed(&mut self, id: &str, reason: impl Into<String>) {
        if let Some(entry) = self.get_mut(id) {
            entry.diagnosis_error = Some(reason.into());
        }
    }

    /// 全部作答（按编号、次数排序）
    pub fn all_answers(&self) -> Vec<AnswerRecord> {
        self.entries
            .iter()
            .flat_map(|e| e.answers.iter().cloned())
            .collect()
    }

    pub fn solve_results(&self) -> Vec<SolveResult> {
        self.entries.iter().filter_map(|e| e.solve.clone()).collect()
    }

    pub fn diagnoses(&self) -> Vec<DiagnosisResult> {
        self.entries
            .iter()
            .filter_map(|e| e.diagnosis.clone())
            .collect()
    }

    /// 定稿所有诊断（等待中 -> 未完成）
    pub fn finalize(&mut self) {
        for entry in &mut self.entries {
            if let Some(diagnosis) = &mut entry.diagnosis {
                diagnosis.finalize();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question::new(id, "exam.pdf", 1, "stem")
    }

    #[test]
    fn test_entries_sorted_and_unique() {
        let store = QuestionStore::from_questions(vec![
            question("p2_q1"),
            question("p1_q10"),
            question("p1_q2"),
            question("p1_q2"),
        ]);
        let ids: Vec<_> = store.entries().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["p1_q2", "p1_q10", "p2_q1"]);
    }

    #[test]
    fn test_status_progression() {
        let mut store = QuestionStore::from_questions(vec![question("p1_q1"), question("p1_q2")]);
        assert_eq!(store.get("p1_q1").unwrap().status(), QuestionStatus::Extracted);

        store.set_solve(SolveResult::new("p1_q1", "C"));
        store.mark_unsolved("p1_q2", "timeout");
        assert_eq!(store.get("p1_q1").unwrap().status(), QuestionStatus::Solved);
        assert_eq!(store.get("p1_q2").unwrap().status(), QuestionStatus::Unsolved);

        store.mark_skipped("p1_q1");
        assert_eq!(store.get("p1_q1").unwrap().status(), QuestionStatus::Skipped);
        store.record_answer(AnswerRecord::first("p1_q1", "C"));
        assert_eq!(store.get("p1_q1").unwrap().status(), QuestionStatus::Answered);

        assert!(!store.record_answer(AnswerRecord::first("p9_q9", "A")));
    }

    #[test]
    fn test_answer_replaced_per_attempt() {
        let mut store = QuestionStore::from_questions(vec![question("p1_q1")]);
        store.record_answer(AnswerRecord::first("p1_q1", "A"));
        store.record_answer(AnswerRecord::second("p1_q1", "C"));
        store.record_answer(AnswerRecord::first("p1_q1", "B"));
        let entry = store.get("p1_q1").unwrap();
        assert_eq!(entry.answers.len(), 2);
        assert_eq!(entry.attempt(1).unwrap().submitted_answer, "B");
        assert_eq!(entry.attempt(2).unwrap().submitted_answer, "C");
    }
}
