//! 答案文件作答
//!
//! 简单形式 `{题目编号: 答案}` 或详细形式 `{题目编号: {answer, second_attempt?, ...}}`。
//! 第二次作答取 `second_attempt` 字段，也可以单独给一个文件。

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::answer::AnswerRecord;
use crate::models::loaders::{load_answer_file, PresetAnswer};
use crate::services::answer_source::{AnswerBatch, AnswerRequest, AnswerSource};

/// 文件作答
pub struct FileSource {
    answers: BTreeMap<String, PresetAnswer>,
    second: Option<BTreeMap<String, PresetAnswer>>,
}

impl FileSource {
    /// 读取答案文件
    pub async fn load(path: &Path) -> Result<Self> {
        let answers = load_answer_file(path).await?;
        info!("✓ 从 {} 读取 {} 条作答", path.display(), answers.len());
        Ok(Self::from_map(answers))
    }

    pub fn from_map(answers: BTreeMap<String, PresetAnswer>) -> Self {
        Self {
            answers,
            second: None,
        }
    }

    /// 第二次作答单独一个文件
    pub async fn with_second_attempts(mut self, path: &Path) -> Result<Self> {
        self.second = Some(load_answer_file(path).await?);
        Ok(self)
    }

    fn answer_for(&self, attempt: u8, id: &str) -> Option<&str> {
        let answer = if attempt <= 1 {
            self.answers.get(id).map(|p| p.answer.as_str())
        } else {
            self.second
                .as_ref()
                .and_then(|s| s.get(id))
                .map(|p| p.answer.as_str())
                .or_else(|| self.answers.get(id).and_then(|p| p.second_attempt.as_deref()))
        };
        answer.filter(|a| !a.trim().is_empty())
    }
}

#[async_trait]
impl AnswerSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn collect(&mut self, attempt: u8, requests: &[AnswerRequest<'_>]) -> Result<AnswerBatch, AppError> {
        if attempt == 1 {
            let unknown: Vec<&str> = self
                .answers
                .keys()
                .filter(|id| !requests.iter().any(|r| &r.question.id == *id))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                warn!("⚠️ 答案文件中有 {} 个编号不在本次试卷中: {}", unknown.len(), unknown.join(", "));
            }
        }

        let mut batch = AnswerBatch::default();
        for request in requests {
            if let Some(answer) = self.answer_for(attempt, &request.question.id) {
                batch.insert(AnswerRecord::new(&request.question.id, answer, attempt));
            }
        }
        info!(
            "✓ 第 {} 次作答: 文件提供 {}/{} 道",
            attempt,
            batch.records.len(),
            requests.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::Question;

    #[tokio::test]
    async fn test_first_and_second_attempts() {
        let mut answers = BTreeMap::new();
        answers.insert("p1_q1".to_string(), PresetAnswer::simple("A"));
        answers.insert(
            "p1_q2".to_string(),
            PresetAnswer {
                second_attempt: Some("C".to_string()),
                ..PresetAnswer::simple("B")
            },
        );
        let mut source = FileSource::from_map(answers);

        let qs = [
            Question::new("p1_q1", "exam.pdf", 1, "a"),
            Question::new("p1_q2", "exam.pdf", 1, "b"),
            Question::new("p1_q3", "exam.pdf", 1, "c"),
        ];
        let first: Vec<_> = qs.iter().map(AnswerRequest::first).collect();
        let batch = source.collect(1, &first).await.unwrap();
        assert_eq!(batch.records.len(), 2);
        assert!(!batch.records.contains_key("p1_q3"));

        let second = [AnswerRequest::retry(&qs[0], &[], "A"), AnswerRequest::retry(&qs[1], &[], "B")];
        let batch = source.collect(2, &second).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records["p1_q2"].submitted_answer, "C");
        assert_eq!(batch.records["p1_q2"].attempt_number, 2);
    }
}
