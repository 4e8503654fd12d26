//! 作答记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次作答
///
/// 只有模式 C 会出现第二次作答，其余模式每题最多一条。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,
    pub submitted_answer: String,
    pub attempt_number: u8,
    pub timestamp: DateTime<Utc>,
}

impl AnswerRecord {
    pub fn new(question_id: impl Into<String>, submitted_answer: impl Into<String>, attempt_number: u8) -> Self {
        Self {
            question_id: question_id.into(),
            submitted_answer: submitted_answer.into().trim().to_string(),
            attempt_number,
            timestamp: Utc::now(),
        }
    }

    pub fn first(question_id: impl Into<String>, submitted_answer: impl Into<String>) -> Self {
        Self::new(question_id, submitted_answer, 1)
    }

    pub fn second(question_id: impl Into<String>, submitted_answer: impl Into<String>) -> Self {
        Self::new(question_id, submitted_answer, 2)
    }
}
