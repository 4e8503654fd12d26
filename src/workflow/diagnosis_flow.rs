//! 单题诊断流程 - 流程层
//!
//! ## 职责
//!
//! 给定 (题目, 标准解, 作答)，按模式产出一条诊断记录：
//!
//! - **模式 A（直接讲解）**：判分 + 标准答案 + 步骤 + 一句话总结，不调用模型
//! - **模式 B（对比诊断，默认）**：答对只给确认；答错调用一次模型，
//!   分析错误选项为什么有迷惑性、可能的误区（最多 3 个）、正确思路对比、各选项点评
//! - **模式 C（分步引导）**：两阶段
//!   1. 第一次作答：答对直接结束；答错打上"首次答错"标记（不可撤销），
//!      生成错误分析 + 分步提示，提示中不出现答案
//!   2. 第二次作答：判分并生成覆盖两次作答的综合讲解，仍然答错时额外解释第二个错误
//!
//!   没有收到第二次作答的题目停留在"已提示"状态，报告时记为未完成。
//!
//! 判分只看判分器（纯函数），所以同样的输入总是得到同样的判定；
//! 模型生成的文字可以不同。作答无法解析时任何模式都不调用模型。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::models::answer::AnswerRecord;
use crate::models::diagnosis::{
    AttemptVerdict, ContrastivePayload, DiagnosisPayload, DiagnosisResult, DiagnosisVerdict, DirectPayload,
    ScaffoldState, ScaffoldedPayload, TutorMode, Verdict,
};
use crate::models::question::Question;
use crate::models::solve::SolveResult;
use crate::services::evaluator::AnswerEvaluator;
use crate::services::prompts;
use crate::services::schemas::{ContrastiveSchema, ExplanationSchema, HintSchema};
use crate::services::validator::Validator;
use crate::workflow::question_ctx::QuestionCtx;
use crate::workflow::redaction::Redactor;

/// 一次诊断的输入
#[derive(Debug, Clone)]
pub struct DiagnosisRequest<'a> {
    pub question: &'a Question,
    pub solve: Option<&'a SolveResult>,
    /// 该题全部作答（第 1 / 2 次）
    pub answers: &'a [AnswerRecord],
    /// 之前的诊断（模式 C 第二阶段从这里继续）
    pub prior: Option<DiagnosisResult>,
}

impl<'a> DiagnosisRequest<'a> {
    fn attempt(&self, n: u8) -> Option<&'a AnswerRecord> {
        self.answers.iter().find(|a| a.attempt_number == n)
    }
}

/// 诊断引擎
pub struct DiagnosisEngine {
    evaluator: AnswerEvaluator,
    validator: Arc<Validator>,
    temperature: f32,
}

impl DiagnosisEngine {
    pub fn new(evaluator: AnswerEvaluator, validator: Arc<Validator>, temperature: f32) -> Self {
        Self {
            evaluator,
            validator,
            temperature,
        }
    }

    /// 诊断入口
    pub async fn diagnose(
        &self,
        ctx: &QuestionCtx,
        mode: TutorMode,
        request: DiagnosisRequest<'_>,
    ) -> Result<DiagnosisResult, PipelineError> {
        let question = request.question;
        let solve = request.solve.ok_or_else(|| PipelineError::MissingCanonicalAnswer {
            question_id: question.id.clone(),
        })?;
        let first = request.attempt(1).ok_or_else(|| PipelineError::AnswerUnparseable {
            question_id: question.id.clone(),
            answer: String::new(),
        })?;

        let result = match mode {
            TutorMode::A => self.direct(question, solve, first),
            TutorMode::B => self.contrastive(ctx, question, solve, first).await?,
            TutorMode::C => self.scaffolded(ctx, &request, solve, first).await?,
        };
        debug!("{} 诊断完成: 模式 {}，判定 {:?}", ctx, mode, result.verdict);
        Ok(result)
    }

    fn judge(&self, question: &Question, solve: &SolveResult, record: &AnswerRecord) -> AttemptVerdict {
        AttemptVerdict {
            attempt_number: record.attempt_number,
            submitted_answer: record.submitted_answer.clone(),
            verdict: self
                .evaluator
                .evaluate_for(question, &record.submitted_answer, &solve.canonical_answer),
        }
    }

    // ========== 模式 A ==========

    fn direct(&self, question: &Question, solve: &SolveResult, first: &AnswerRecord) -> DiagnosisResult {
        let attempt = self.judge(question, solve, first);
        let verdict = attempt.verdict.into();
        let one_line_summary = match &solve.final_reason {
            Some(reason) => format!("Correct Answer: {}. {}", solve.canonical_answer, reason),
            None => format!("Correct Answer: {}", solve.canonical_answer),
        };
        DiagnosisResult::new(
            &question.id,
            TutorMode::A,
            vec![attempt],
            verdict,
            DiagnosisPayload::Direct(DirectPayload {
                canonical_answer: solve.canonical_answer.clone(),
                steps: solve.steps.clone(),
                one_line_summary,
            }),
        )
    }

    // ========== 模式 B ==========

    async fn contrastive(
        &self,
        ctx: &QuestionCtx,
        question: &Question,
        solve: &SolveResult,
        first: &AnswerRecord,
    ) -> Result<DiagnosisResult, PipelineError> {
        let attempt = self.judge(question, solve, first);
        let mut payload = ContrastivePayload {
            canonical_answer: solve.canonical_answer.clone(),
            steps: solve.steps.clone(),
            confirmation: None,
            analysis: None,
        };

        match attempt.verdict {
            Verdict::Correct => {
                payload.confirmation = Some(format!(
                    "Correct! {} is the right answer.",
                    solve.canonical_answer
                ));
            }
            Verdict::Unparseable => {
                warn!("{} ⚠️ 作答无法解析: {:?}", ctx, attempt.submitted_answer);
            }
            Verdict::Incorrect => {
                info!("{} ✗ 答错 ({} vs {})，生成对比诊断", ctx, attempt.submitted_answer, solve.canonical_answer);
                let request = prompts::contrastive(question, solve, &attempt.submitted_answer, self.temperature);
                let schema = ContrastiveSchema {
                    question,
                    canonical: &solve.canonical_answer,
                    submitted: &attempt.submitted_answer,
                };
                payload.analysis = Some(self.validator.request(request, &schema).await?);
            }
        }

        let verdict = attempt.verdict.into();
        Ok(DiagnosisResult::new(
            &question.id,
            TutorMode::B,
            vec![attempt],
            verdict,
            DiagnosisPayload::Contrastive(payload),
        ))
    }

    // ========== 模式 C ==========

    async fn scaffolded(
        &self,
        ctx: &QuestionCtx,
        request: &DiagnosisRequest<'_>,
        solve: &SolveResult,
        first: &AnswerRecord,
    ) -> Result<DiagnosisResult, PipelineError> {
        let question = request.question;
        let mut result = match request.prior.clone() {
            Some(prior)
                if prior.mode == TutorMode::C
                    && prior.question_id == question.id
                    && prior.attempts.first().map(|a| a.submitted_answer.as_str())
                        == Some(first.submitted_answer.as_str()) =>
            {
                prior
            }
            _ => self.hint_stage(ctx, question, solve, first).await?,
        };

        let waiting = result.scaffold().map(|p| p.state) == Some(ScaffoldState::HintsIssued);
        if let (true, Some(second)) = (waiting, request.attempt(2)) {
            self.explanation_stage(ctx, question, solve, second, &mut result).await?;
        }
        Ok(result)
    }

    /// 第一阶段：判分，答错时生成提示
    async fn hint_stage(
        &self,
        ctx: &QuestionCtx,
        question: &Question,
        solve: &SolveResult,
        first: &AnswerRecord,
    ) -> Result<DiagnosisResult, PipelineError> {
        let attempt = self.judge(question, solve, first);
        let verdict = attempt.verdict;

        let (state, diagnosis_verdict) = match verdict {
            Verdict::Correct => (ScaffoldState::FirstAttemptCorrect, DiagnosisVerdict::Correct),
            Verdict::Unparseable => (ScaffoldState::Unanswered, DiagnosisVerdict::Unparseable),
            Verdict::Incorrect => (ScaffoldState::HintsIssued, DiagnosisVerdict::Pending),
        };
        let mut result = DiagnosisResult::new(
            &question.id,
            TutorMode::C,
            vec![attempt],
            diagnosis_verdict,
            DiagnosisPayload::Scaffolded(ScaffoldedPayload {
                state,
                ..Default::default()
            }),
        );
        if verdict != Verdict::Incorrect {
            return Ok(result);
        }

        result.mark_first_attempt_wrong();
        info!("{} ✗ 第一次答错，生成分步提示", ctx);

        let request = prompts::hints(question, solve, &first.submitted_answer, self.temperature);
        let mut plan = self.validator.request(request, &HintSchema).await?;
        let redactor = Redactor::for_answer(question, &solve.canonical_answer);
        let redactions = redactor.redact_hints(&mut plan.error_analysis, &mut plan.hints);
        if redactions > 0 {
            warn!("{} ⚠️ 提示中出现答案，已遮盖 {} 处", ctx, redactions);
        }

        if let DiagnosisPayload::Scaffolded(payload) = &mut result.payload {
            payload.error_analysis = Some(plan.error_analysis);
            payload.hints = plan.hints;
            payload.redactions = redactions;
        }
        Ok(result)
    }

    /// 第二阶段：判第二次作答并生成综合讲解
    async fn explanation_stage(
        &self,
        ctx: &QuestionCtx,
        question: &Question,
        solve: &SolveResult,
        second: &AnswerRecord,
        result: &mut DiagnosisResult,
    ) -> Result<(), PipelineError> {
        let attempt = self.judge(question, solve, second);
        let verdict = attempt.verdict;
        let first_answer = result
            .attempts
            .first()
            .map(|a| a.submitted_answer.clone())
            .unwrap_or_default();
        let hints = result.scaffold().map(|p| p.hints.clone()).unwrap_or_default();

        let explanation = if verdict == Verdict::Unparseable {
            warn!("{} ⚠️ 第二次作答无法解析: {:?}", ctx, attempt.submitted_answer);
            None
        } else {
            let second_wrong = verdict == Verdict::Incorrect;
            info!(
                "{} 第二次作答{}，生成综合讲解",
                ctx,
                if second_wrong { "仍然错误" } else { "正确" }
            );
            let request = prompts::explanation(
                question,
                solve,
                &first_answer,
                &attempt.submitted_answer,
                second_wrong,
                &hints,
                self.temperature,
            );
            let schema = ExplanationSchema {
                question,
                canonical: &solve.canonical_answer,
                second_answer: &attempt.submitted_answer,
                second_wrong,
            };
            Some(self.validator.request(request, &schema).await?)
        };

        result.attempts.retain(|a| a.attempt_number != 2);
        result.attempts.push(attempt);
        result.verdict = verdict.into();
        if let DiagnosisPayload::Scaffolded(payload) = &mut result.payload {
            payload.state = ScaffoldState::SecondAttemptRecorded;
            payload.explanation = explanation;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockGateway, Stage};
    use crate::config::ValidatorConfig;
    use crate::models::question::ProblemType;
    use crate::workflow::redaction::HIDDEN;
    use serde_json::json;

    fn engine(mock: Arc<MockGateway>) -> DiagnosisEngine {
        let validator = Arc::new(Validator::new(mock, &ValidatorConfig::default()));
        DiagnosisEngine::new(AnswerEvaluator::default(), validator, 0.3)
    }

    fn mc(id: &str) -> Question {
        Question::new(id, "exam.pdf", 1, "If x + 5 = 12, what is x?")
            .with_choices([("A", "5"), ("B", "6"), ("C", "7"), ("D", "8"), ("E", "17")])
    }

    fn solve(id: &str, answer: &str) -> SolveResult {
        SolveResult::new(id, answer).with_steps(["x = 12 - 5", "x = 7"])
    }

    async fn run(
        engine: &DiagnosisEngine,
        mode: TutorMode,
        question: &Question,
        solve: Option<&SolveResult>,
        answers: &[AnswerRecord],
        prior: Option<DiagnosisResult>,
    ) -> Result<DiagnosisResult, PipelineError> {
        let request = DiagnosisRequest {
            question,
            solve,
            answers,
            prior,
        };
        engine
            .diagnose(&QuestionCtx::single(&question.id), mode, request)
            .await
    }

    #[tokio::test]
    async fn test_mode_a_correct_answer_summary() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock.clone());
        let q = mc("p1_q1");
        let s = solve("p1_q1", "C");
        let result = run(&engine, TutorMode::A, &q, Some(&s), &[AnswerRecord::first("p1_q1", "C")], None)
            .await
            .unwrap();

        assert_eq!(result.verdict, DiagnosisVerdict::Correct);
        match &result.payload {
            DiagnosisPayload::Direct(p) => assert!(p.one_line_summary.contains("Correct Answer: C")),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_solve_is_an_error() {
        let engine = engine(Arc::new(MockGateway::new()));
        let q = mc("p1_q1");
        let err = run(&engine, TutorMode::B, &q, None, &[AnswerRecord::first("p1_q1", "C")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingCanonicalAnswer { .. }));
    }

    #[tokio::test]
    async fn test_mode_b_only_calls_model_when_wrong() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock.clone());
        let q = mc("p1_q2");
        let s = solve("p1_q2", "B");

        let right = run(&engine, TutorMode::B, &q, Some(&s), &[AnswerRecord::first("p1_q2", "b")], None)
            .await
            .unwrap();
        assert_eq!(right.verdict, DiagnosisVerdict::Correct);
        assert_eq!(mock.call_count(Stage::Diagnose), 0);

        let wrong = run(&engine, TutorMode::B, &q, Some(&s), &[AnswerRecord::first("p1_q2", "A")], None)
            .await
            .unwrap();
        assert_eq!(wrong.verdict, DiagnosisVerdict::Incorrect);
        assert_eq!(mock.call_count(Stage::Diagnose), 1);
        match &wrong.payload {
            DiagnosisPayload::Contrastive(p) => {
                let analysis = p.analysis.as_ref().unwrap();
                assert!(!analysis.why_tempting.is_empty());
                assert!(!analysis.misconceptions.is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_never_calls_model() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock.clone());
        let q = mc("p1_q1");
        let s = solve("p1_q1", "C");
        for mode in [TutorMode::A, TutorMode::B, TutorMode::C] {
            let result = run(&engine, mode, &q, Some(&s), &[AnswerRecord::first("p1_q1", "F")], None)
                .await
                .unwrap();
            assert_eq!(result.verdict, DiagnosisVerdict::Unparseable);
            assert!(!result.first_attempt_wrong());
        }
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mode_c_first_attempt_correct_has_no_hints() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock.clone());
        let q = mc("p2_q1");
        let s = solve("p2_q1", "C");
        let result = run(&engine, TutorMode::C, &q, Some(&s), &[AnswerRecord::first("p2_q1", "C")], None)
            .await
            .unwrap();

        let payload = result.scaffold().unwrap();
        assert_eq!(payload.state, ScaffoldState::FirstAttemptCorrect);
        assert!(payload.hints.is_empty());
        assert!(!result.first_attempt_wrong());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mode_c_hints_hide_answer_and_recover() {
        let mock = Arc::new(MockGateway::new());
        mock.push_json(
            Stage::Hint,
            json!({
                "error_analysis": "You picked A but the answer is C.",
                "hints": [{
                    "action": "Subtract 5 from both sides",
                    "evidence_location": "the equation",
                    "guiding_question": "What is 12 - 5?",
                    "expected_conclusion": "x = 7, option C"
                }]
            }),
        );
        let engine = engine(mock.clone());
        let q = mc("p2_q4");
        let s = solve("p2_q4", "C");

        let first = [AnswerRecord::first("p2_q4", "A")];
        let stage1 = run(&engine, TutorMode::C, &q, Some(&s), &first, None).await.unwrap();
        assert_eq!(stage1.verdict, DiagnosisVerdict::Pending);
        assert!(stage1.first_attempt_wrong());
        let payload = stage1.scaffold().unwrap();
        assert_eq!(payload.state, ScaffoldState::HintsIssued);
        assert_eq!(payload.redactions, 3);
        let hint_text = serde_json::to_string(&payload.hints).unwrap() + payload.error_analysis.as_deref().unwrap();
        assert!(hint_text.contains(HIDDEN));
        assert!(!hint_text.contains(" C") && !hint_text.contains("= 7"));

        let both = [AnswerRecord::first("p2_q4", "A"), AnswerRecord::second("p2_q4", "C")];
        let stage2 = run(&engine, TutorMode::C, &q, Some(&s), &both, Some(stage1)).await.unwrap();
        assert_eq!(stage2.verdict, DiagnosisVerdict::Correct);
        assert!(stage2.first_attempt_wrong());
        assert!(stage2.recovered());
        let payload = stage2.scaffold().unwrap();
        assert_eq!(payload.state, ScaffoldState::SecondAttemptRecorded);
        assert!(payload.explanation.as_ref().unwrap().second_mistake.is_none());
        assert_eq!(mock.call_count(Stage::Hint), 1);
        assert_eq!(mock.call_count(Stage::Explain), 1);
    }

    #[tokio::test]
    async fn test_mode_c_second_wrong_keeps_flag() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock.clone());
        let q = Question::new("p3_q1", "exam.pdf", 3, "2 * 7 = ?").with_problem_type(ProblemType::NumericEntry);
        let s = solve("p3_q1", "14");

        let both = [AnswerRecord::first("p3_q1", "12"), AnswerRecord::second("p3_q1", "15")];
        let result = run(&engine, TutorMode::C, &q, Some(&s), &both, None).await.unwrap();
        assert_eq!(result.verdict, DiagnosisVerdict::Incorrect);
        assert!(result.first_attempt_wrong());
        assert!(!result.recovered());
        let explanation = result.scaffold().unwrap().explanation.as_ref().unwrap();
        assert!(explanation.second_mistake.is_some());
    }

    #[tokio::test]
    async fn test_verdict_is_stable_across_runs() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock);
        let q = mc("p1_q2");
        let s = solve("p1_q2", "B");
        let answers = [AnswerRecord::first("p1_q2", "A")];
        let a = run(&engine, TutorMode::B, &q, Some(&s), &answers, None).await.unwrap();
        let b = run(&engine, TutorMode::B, &q, Some(&s), &answers, None).await.unwrap();
        assert_eq!(a.verdict, b.verdict);
    }
}
