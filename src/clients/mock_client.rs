//! 离线 mock 网关
//!
//! 不联网，按请求阶段返回符合结构的预置 JSON，用于 `--no-llm` 演示和测试。
//! 测试中可以按阶段排队预设响应或错误，队列为空时回落到预置内容。

use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::clients::{LlmGateway, LlmRequest, Stage};
use crate::error::GatewayError;

static QUESTION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Question ID:\s*(\S+)").expect("question id regex"));

static STUDENT_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ID:\s*(\S+)\s*\((\w+)\)").expect("student item regex"));

static CHOICE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\(([A-Z])\) (.*)$").expect("choice line regex"));

type Reply = Result<String, GatewayError>;

/// mock 网关
#[derive(Default)]
pub struct MockGateway {
    scripted: Mutex<HashMap<Stage, VecDeque<Reply>>>,
    calls: Mutex<Vec<LlmRequest>>,
    latency: Option<Duration>,
    /// 按在线网关对待（鉴权失败会中止运行）
    online: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 表现为在线网关：`is_offline()` 返回 false
    pub fn online() -> Self {
        Self {
            online: true,
            ..Self::default()
        }
    }

    /// 每次调用前等待一段时间（测试超时用）
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 排队一个文本响应
    pub fn push_reply(&self, stage: Stage, text: impl Into<String>) {
        lock(&self.scripted)
            .entry(stage)
            .or_default()
            .push_back(Ok(text.into()));
    }

    /// 排队一个 JSON 响应
    pub fn push_json(&self, stage: Stage, value: JsonValue) {
        self.push_reply(stage, value.to_string());
    }

    /// 排队一个错误
    pub fn push_error(&self, stage: Stage, error: GatewayError) {
        lock(&self.scripted)
            .entry(stage)
            .or_default()
            .push_back(Err(error));
    }

    /// 某阶段被调用的次数
    pub fn call_count(&self, stage: Stage) -> usize {
        lock(&self.calls).iter().filter(|r| r.stage == stage).count()
    }

    /// 全部请求记录
    pub fn calls(&self) -> Vec<LlmRequest> {
        lock(&self.calls).clone()
    }

    fn canned(request: &LlmRequest) -> String {
        match request.stage {
            Stage::Ocr => concat!(
                "1. If x + 5 = 12, what is the value of x?\n",
                "(A) 5  (B) 6  (C) 7  (D) 8  (E) 17\n"
            )
            .to_string(),
            Stage::Extract => json!({
                "questions": [{
                    "problem_type": "multiple_choice",
                    "stem": "If x + 5 = 12, what is the value of x?",
                    "choices": {"A": "5", "B": "6", "C": "7", "D": "8", "E": "17"},
                    "latex_equations": ["x + 5 = 12"],
                    "confidence": 0.95
                }]
            })
            .to_string(),
            Stage::Solve => {
                let id = QUESTION_ID_RE
                    .captures(&request.user)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "p1_q1".to_string());
                let answer = if request.user.contains("Choices:") { "C" } else { "7" };
                json!({
                    "question_id": id,
                    "correct_answer": answer,
                    "topic": "algebra",
                    "key_steps": [
                        "Subtract 5 from both sides: x = 12 - 5",
                        "Compute: x = 7"
                    ],
                    "final_reason": "x equals 7",
                    "confidence": 0.99
                })
                .to_string()
            }
            Stage::Diagnose => json!({
                "why_tempting": "The chosen value comes from adding 5 instead of subtracting it.",
                "misconceptions": [
                    {"code": "CALC_SIGN", "name": "Sign error", "description": "Moved +5 across the equals sign without changing its sign."},
                    {"code": "METHOD_WRONG", "name": "Guess and check abandoned", "description": "Did not substitute the option back into the equation."}
                ],
                "comparative_explanation": "Undo the +5 by subtracting 5 from both sides, then check the result in the original equation.",
                "option_notes": option_notes(&request.user)
            })
            .to_string(),
            Stage::Hint => json!({
                "error_analysis": "The operation used to isolate x does not undo the +5.",
                "hints": [{
                    "action": "Re-read the equation and identify what is added to x.",
                    "evidence_location": "The left-hand side of the equation",
                    "guiding_question": "Which operation undoes adding 5?",
                    "expected_conclusion": "Both sides must be changed by the inverse operation."
                }]
            })
            .to_string(),
            Stage::Explain => json!({
                "combined_explanation": "The first attempt added instead of subtracting; isolating x with the inverse operation fixes it.",
                "first_mistake": "Added 5 to both sides instead of subtracting 5.",
                "second_mistake": "Arithmetic slip while subtracting."
            })
            .to_string(),
            Stage::Simulate => {
                let mut answers = Map::new();
                for caps in STUDENT_ITEM_RE.captures_iter(&request.user) {
                    let (Some(id), Some(kind)) = (caps.get(1), caps.get(2)) else {
                        continue;
                    };
                    let answer = if kind.as_str() == "multiple_choice" { "C" } else { "7" };
                    answers.insert(
                        id.as_str().to_string(),
                        json!({
                            "thought_process": "Subtract 5 from 12.",
                            "made_mistake": false,
                            "answer": answer
                        }),
                    );
                }
                JsonValue::Object(answers).to_string()
            }
        }
    }
}

/// 题面里列出的每个选项各一条点评
fn option_notes(prompt: &str) -> Vec<JsonValue> {
    CHOICE_LINE_RE
        .captures_iter(prompt)
        .map(|caps| {
            json!({
                "option": &caps[1],
                "content": caps[2].trim(),
                "analysis": "Substitute this value back into the equation to check it."
            })
        })
        .collect()
}

#[async_trait]
impl LlmGateway for MockGateway {
    async fn complete(&self, request: &LlmRequest) -> Result<String, GatewayError> {
        lock(&self.calls).push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = lock(&self.scripted)
            .get_mut(&request.stage)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(reply) => {
                debug!("[mock] {} 使用预设响应", request.stage.as_str());
                reply
            }
            None => Ok(Self::canned(request)),
        }
    }

    fn is_offline(&self) -> bool {
        !self.online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ModelRole;

    #[tokio::test]
    async fn test_canned_solve_echoes_question_id() {
        let mock = MockGateway::new();
        let req = LlmRequest::new(Stage::Solve, ModelRole::Text, "Question ID: p3_q2\nStem: ...");
        let text = mock.complete(&req).await.unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value["question_id"], "p3_q2");
        assert_eq!(value["correct_answer"], "7");
    }

    #[tokio::test]
    async fn test_canned_diagnosis_notes_every_option() {
        let mock = MockGateway::new();
        let prompt = "Question ID: p1_q1\nStem: x?\nChoices:\n(A) 5\n(B) 6\n(C) 7\nStudent answer: A (5)";
        let req = LlmRequest::new(Stage::Diagnose, ModelRole::Text, prompt);
        let value: JsonValue = serde_json::from_str(&mock.complete(&req).await.unwrap()).unwrap();
        let notes = value["option_notes"].as_array().unwrap();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[1]["option"], "B");
        assert_eq!(notes[1]["content"], "6");
    }

    #[test]
    fn test_online_flag() {
        assert!(MockGateway::new().is_offline());
        assert!(!MockGateway::online().is_offline());
    }

    #[tokio::test]
    async fn test_scripted_replies_take_priority() {
        let mock = MockGateway::new();
        mock.push_reply(Stage::Extract, "{\"questions\": []}");
        let req = LlmRequest::new(Stage::Extract, ModelRole::Vision, "page 1");
        assert_eq!(mock.complete(&req).await.unwrap(), "{\"questions\": []}");
        assert!(mock.complete(&req).await.unwrap().contains("x + 5 = 12"));
        assert_eq!(mock.call_count(Stage::Extract), 2);
    }
}
