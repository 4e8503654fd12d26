//! 解题服务 - 业务能力层
//!
//! 一道题一次请求，输出经过结构校验的标准答案。
//! 外部提供的预置答案优先于模型结果。

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::models::loaders::PresetAnswer;
use crate::models::question::Question;
use crate::models::solve::SolveResult;
use crate::services::evaluator::normalize_label;
use crate::services::prompts;
use crate::services::schemas::{choice_label_in, SolveSchema};
use crate::services::validator::Validator;

/// 解题服务
pub struct Solver {
    validator: Arc<Validator>,
    temperature: f32,
}

impl Solver {
    pub fn new(validator: Arc<Validator>, temperature: f32) -> Self {
        Self {
            validator,
            temperature,
        }
    }

    /// 解一道题
    pub async fn solve(&self, question: &Question) -> Result<SolveResult, PipelineError> {
        let request = prompts::solve(question, self.temperature);
        let schema = SolveSchema { question };
        let result = self
            .validator
            .request(request, &schema)
            .await
            .map_err(|e| match e {
                PipelineError::SchemaValidation { reason, attempts, .. } => PipelineError::SolveFailed {
                    question_id: question.id.clone(),
                    reason: format!("{} (after {} attempts)", reason, attempts),
                },
                other => other,
            })?;

        info!(
            "[{}] ✓ 解题完成: 答案 {}，{} 步",
            question.id,
            result.canonical_answer,
            result.steps.len()
        );
        Ok(result)
    }
}

/// 用预置答案覆盖解题结果
///
/// 选择题的预置答案必须是题目中存在的标签，否则忽略并告警。
/// 返回实际生效的解题结果。
pub fn apply_presets<'a>(
    questions: impl IntoIterator<Item = &'a Question>,
    presets: &BTreeMap<String, PresetAnswer>,
) -> Vec<SolveResult> {
    let mut applied = Vec::new();
    for question in questions {
        let Some(preset) = presets.get(&question.id) else {
            continue;
        };
        if preset.answer.trim().is_empty() {
            continue;
        }
        let mut result = SolveResult::from_preset(&question.id, preset);
        if question.is_multiple_choice() {
            match choice_label_in(&preset.answer, &question.choice_labels()) {
                Some(label) => result.canonical_answer = label,
                None => {
                    warn!(
                        "[{}] ⚠️ 预置答案 {:?} 不是有效选项 {:?}，已忽略",
                        question.id,
                        normalize_label(&preset.answer),
                        question.choice_labels()
                    );
                    continue;
                }
            }
        }
        applied.push(result);
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockGateway, Stage};
    use crate::config::ValidatorConfig;
    use crate::models::solve::SolveSource;
    use serde_json::json;

    fn solver(mock: Arc<MockGateway>) -> Solver {
        let validator = Arc::new(Validator::new(mock, &ValidatorConfig::default()));
        Solver::new(validator, 0.0)
    }

    fn mc() -> Question {
        Question::new("p1_q1", "exam.pdf", 1, "If x + 5 = 12, what is x?")
            .with_choices([("A", "5"), ("B", "6"), ("C", "7"), ("D", "8"), ("E", "17")])
    }

    #[tokio::test]
    async fn test_solve_with_canned_reply() {
        let mock = Arc::new(MockGateway::new());
        let result = solver(mock.clone()).solve(&mc()).await.unwrap();
        assert_eq!(result.question_id, "p1_q1");
        assert_eq!(result.canonical_answer, "C");
        assert_eq!(result.source, SolveSource::Solved);
        assert_eq!(mock.call_count(Stage::Solve), 1);
    }

    #[tokio::test]
    async fn test_invalid_label_becomes_solve_failure() {
        let mock = Arc::new(MockGateway::new());
        mock.push_json(Stage::Solve, json!({"correct_answer": "Z", "key_steps": ["?"]}));
        mock.push_json(Stage::Solve, json!({"correct_answer": "Q", "key_steps": ["?"]}));
        let err = solver(mock).solve(&mc()).await.unwrap_err();
        match err {
            PipelineError::SolveFailed { question_id, .. } => assert_eq!(question_id, "p1_q1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_presets_validate_labels() {
        let q = mc();
        let mut presets = BTreeMap::new();
        presets.insert("p1_q1".to_string(), PresetAnswer::simple("(c)"));
        let applied = apply_presets([&q], &presets);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].canonical_answer, "C");
        assert_eq!(applied[0].source, SolveSource::Preset);

        presets.insert("p1_q1".to_string(), PresetAnswer::simple("Z"));
        assert!(apply_presets([&q], &presets).is_empty());
    }
}
