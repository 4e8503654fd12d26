//! 模拟学生作答
//!
//! 用单独配置的模型扮演学生。按目标正确率随机挑出要"答错"的题目，
//! 错题数 = 总数 - round(总数 × 正确率 / 100)。
//! 模型返回 `{题目编号: {thought_process, made_mistake, answer}}`，思考过程留作记录。

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::answer::AnswerRecord;
use crate::models::question::Question;
use crate::services::answer_source::{AnswerBatch, AnswerRequest, AnswerSource};
use crate::services::evaluator::{normalize_label, parse_numeric};
use crate::services::prompts;
use crate::services::schemas::SimulationSchema;
use crate::services::validator::Validator;

/// 每次请求最多包含的题目数
const CHUNK_SIZE: usize = 10;

/// 模拟学生
pub struct SimulatedStudent {
    validator: Arc<Validator>,
    correct_rate: u8,
    temperature: f32,
    rng: StdRng,
    transcript: Vec<JsonValue>,
}

impl SimulatedStudent {
    pub fn new(validator: Arc<Validator>, correct_rate: u8, temperature: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            validator,
            correct_rate: correct_rate.min(100),
            temperature,
            rng,
            transcript: Vec::new(),
        }
    }

    /// 随机挑出要答错的题目
    fn pick_mistakes<'a>(&mut self, ids: &[&'a str]) -> Vec<&'a str> {
        let count = mistake_count(ids.len(), self.correct_rate);
        let mut shuffled = ids.to_vec();
        shuffled.shuffle(&mut self.rng);
        shuffled.truncate(count);
        shuffled
    }
}

/// 错题数
pub fn mistake_count(total: usize, correct_rate: u8) -> usize {
    let correct = (total as f64 * f64::from(correct_rate.min(100)) / 100.0).round() as usize;
    total.saturating_sub(correct)
}

/// 修正模型的作答格式：选择题给了选项内容时换成标签
fn fix_answer(question: &Question, answer: &str) -> String {
    let answer = answer.trim();
    if !question.is_multiple_choice() {
        return answer.to_string();
    }
    let labels = question.choice_labels();
    let normalized = normalize_label(answer);
    if labels.iter().any(|l| l.eq_ignore_ascii_case(&normalized)) {
        return normalized;
    }
    let value = parse_numeric(answer);
    labels
        .iter()
        .find(|label| {
            question.choice_text(label).is_some_and(|text| {
                text.trim().eq_ignore_ascii_case(answer)
                    || matches!((value, parse_numeric(text)), (Some(a), Some(b)) if a == b)
            })
        })
        .map(|label| label.to_string())
        .unwrap_or_else(|| answer.to_string())
}

#[async_trait]
impl AnswerSource for SimulatedStudent {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn collect(&mut self, attempt: u8, requests: &[AnswerRequest<'_>]) -> Result<AnswerBatch, AppError> {
        let ids: Vec<&str> = requests.iter().map(|r| r.question.id.as_str()).collect();
        let mistakes = self.pick_mistakes(&ids);
        info!(
            "🎭 模拟学生第 {} 次作答: {} 道题，目标正确率 {}%，计划答错 {} 道",
            attempt,
            requests.len(),
            self.correct_rate,
            mistakes.len()
        );

        let mut batch = AnswerBatch::default();
        for chunk in requests.chunks(CHUNK_SIZE) {
            let questions: Vec<&Question> = chunk.iter().map(|r| r.question).collect();
            let chunk_ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
            let request = prompts::simulate(chunk, &mistakes, self.temperature);

            let answers = match self
                .validator
                .request(request, &SimulationSchema { ids: &chunk_ids })
                .await
            {
                Ok(answers) => answers,
                Err(e) if e.is_run_fatal(self.validator.is_offline()) => return Err(e.into()),
                Err(e) => {
                    warn!("⚠️ 模拟学生作答失败，本组 {} 道题跳过: {}", chunk.len(), e);
                    continue;
                }
            };

            for question in &questions {
                let Some(simulated) = answers.get(&question.id) else {
                    continue;
                };
                let answer = fix_answer(question, &simulated.answer);
                self.transcript.push(json!({
                    "questionId": question.id,
                    "attempt": attempt,
                    "plannedMistake": mistakes.contains(&question.id.as_str()),
                    "madeMistake": simulated.made_mistake,
                    "thoughtProcess": simulated.thought_process,
                    "answer": answer,
                }));
                batch.insert(AnswerRecord::new(&question.id, answer, attempt));
            }
        }
        Ok(batch)
    }

    fn transcript(&self) -> Option<JsonValue> {
        (!self.transcript.is_empty()).then(|| JsonValue::Array(self.transcript.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockGateway, Stage};
    use crate::config::ValidatorConfig;
    use crate::models::diagnosis::HintStep;
    use crate::models::question::ProblemType;

    #[test]
    fn test_mistake_count() {
        assert_eq!(mistake_count(10, 70), 3);
        assert_eq!(mistake_count(3, 70), 1);
        assert_eq!(mistake_count(4, 100), 0);
        assert_eq!(mistake_count(4, 0), 4);
        assert_eq!(mistake_count(0, 50), 0);
    }

    #[test]
    fn test_fix_answer_maps_content_to_label() {
        let q = Question::new("p1_q1", "exam.pdf", 1, "x?").with_choices([("A", "5"), ("B", "7.0")]);
        assert_eq!(fix_answer(&q, "b"), "B");
        assert_eq!(fix_answer(&q, "7"), "B");
        assert_eq!(fix_answer(&q, "9"), "9");
    }

    #[tokio::test]
    async fn test_collects_from_mock_student() {
        let mock = Arc::new(MockGateway::new());
        let validator = Arc::new(Validator::new(mock.clone(), &ValidatorConfig::default()));
        let mut student = SimulatedStudent::new(validator, 70, 0.7, Some(7));

        let qs = [
            Question::new("p1_q1", "exam.pdf", 1, "x + 5 = 12").with_choices([("A", "5"), ("C", "7")]),
            Question::new("p1_q2", "exam.pdf", 1, "x = ?").with_problem_type(ProblemType::NumericEntry),
        ];
        let requests: Vec<_> = qs.iter().map(AnswerRequest::first).collect();
        let batch = student.collect(1, &requests).await.unwrap();

        assert_eq!(batch.records["p1_q1"].submitted_answer, "C");
        assert_eq!(batch.records["p1_q2"].submitted_answer, "7");
        assert_eq!(mock.call_count(Stage::Simulate), 1);
        assert_eq!(student.transcript().unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_attempt_sees_hints_and_previous_answer() {
        let mock = Arc::new(MockGateway::new());
        let validator = Arc::new(Validator::new(mock.clone(), &ValidatorConfig::default()));
        let mut student = SimulatedStudent::new(validator, 100, 0.7, Some(1));

        let q = Question::new("p1_q1", "exam.pdf", 1, "x + 5 = 12").with_choices([("A", "5"), ("C", "7")]);
        let hints = vec![HintStep {
            action: "Re-read what is added to x".to_string(),
            evidence_location: "left-hand side".to_string(),
            guiding_question: "Which operation undoes adding 5?".to_string(),
            expected_conclusion: "Use the inverse operation".to_string(),
        }];
        let batch = student
            .collect(2, &[AnswerRequest::retry(&q, &hints, "A")])
            .await
            .unwrap();

        let calls = mock.calls();
        let prompt = &calls[0].user;
        assert!(prompt.contains("Re-read what is added to x"));
        assert!(prompt.contains("left-hand side"));
        assert!(prompt.contains("Which operation undoes adding 5?"));
        assert!(prompt.contains("Your previous answer: A"));
        assert_eq!(batch.records["p1_q1"].attempt_number, 2);
    }
}
