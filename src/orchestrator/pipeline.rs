//! 会话流水线 - 编排层
//!
//! ## 职责
//!
//! 一次会话按阶段顺序推进：
//!
//! ```text
//! Extracting → Solving → AwaitingAnswers → Diagnosing → Reporting → Done
//!                                  ↑              │
//!                                  └── 模式 C ────┘（第二次作答）
//! ```
//!
//! - `transcribe_only` 抽题后直接结束，`solve` 解题后结束
//! - 阶段内每道题一个任务（Semaphore 限流），结果按题目编号顺序写回
//! - 单题失败只记录；只有整次运行级别的错误（没有抽到题、非离线模式下鉴权失败）才中止
//! - 每个阶段完成后立即落盘；续跑时已有产物的阶段直接复用
//! - 报告阶段不会让会话失败，渲染错误只记日志
//!
//! 流水线独占 `QuestionStore`，并发任务只拿到单题副本，结果由这里统一写回。

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::clients::LlmGateway;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::infrastructure::session_store::{
    apply_answers, apply_diagnosis, apply_solve, AnswersArtifact, DiagnosisArtifact, SolveArtifact,
    TranscribedArtifact, ANSWERS_FILE, DIAGNOSIS_FILE, OCR_TEXT_FILE, REPORT_FILE, RESULTS_FILE, SIMULATION_FILE,
    SOLVE_FILE, TRANSCRIBED_FILE,
};
use crate::infrastructure::{PageRasterizer, SessionStore};
use crate::models::answer::AnswerRecord;
use crate::models::diagnosis::{DiagnosisResult, HintStep, ScaffoldState, TutorMode};
use crate::models::loaders::load_answer_file;
use crate::models::question::{order_key, Question, Subject};
use crate::models::session::{RunMode, SessionHeader, SessionResult, TranscriptionInfo};
use crate::models::solve::SolveResult;
use crate::models::store::{QuestionEntry, QuestionStore};
use crate::services::answer_source::{AnswerRequest, AnswerSource, AnswerSourceKind};
use crate::services::evaluator::AnswerEvaluator;
use crate::services::extractor::QuestionExtractor;
use crate::services::report_writer::{MarkdownReport, ReportRenderer};
use crate::services::solver::{apply_presets, Solver};
use crate::services::validator::Validator;
use crate::utils::logging::{log_stage_complete, log_stage_start};
use crate::utils::page_range::parse_page_range;
use crate::utils::tasks::map_bounded;
use crate::workflow::{DiagnosisEngine, DiagnosisRequest, QuestionCtx};

/// 一次运行的选项（来自命令行）
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub pdf_path: PathBuf,
    pub subject: Subject,
    pub run_mode: RunMode,
    pub tutor_mode: TutorMode,
    /// 页码范围表达式，如 `1-3,5`
    pub pages: Option<String>,
    /// 已渲染好的页面图片目录（不调用 pdftoppm）
    pub pages_dir: Option<PathBuf>,
    pub answer_source: AnswerSourceKind,
    pub answers_file: Option<PathBuf>,
    /// 模式 C 第二次作答单独的答案文件
    pub second_answers_file: Option<PathBuf>,
    /// 预置标准答案
    pub correct_answers: Option<PathBuf>,
    /// 续跑的会话目录
    pub resume: Option<PathBuf>,
}

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Extracting,
    Solving,
    AwaitingAnswers,
    Diagnosing,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Extracting => "抽题",
            PipelineState::Solving => "解题",
            PipelineState::AwaitingAnswers => "作答",
            PipelineState::Diagnosing => "诊断",
            PipelineState::Reporting => "报告",
            PipelineState::Done => "完成",
            PipelineState::Failed => "失败",
        };
        f.write_str(name)
    }
}

/// 单题诊断任务（并发任务持有的副本）
struct DiagnosisJob {
    ctx: QuestionCtx,
    question: Question,
    solve: SolveResult,
    answers: Vec<AnswerRecord>,
    prior: Option<DiagnosisResult>,
}

/// 会话流水线
pub struct Pipeline {
    config: Arc<Config>,
    options: RunOptions,
    validator: Arc<Validator>,
    rasterizer: Arc<dyn PageRasterizer>,
    session: SessionStore,
    answer_source: Option<Box<dyn AnswerSource>>,
    renderer: Box<dyn ReportRenderer>,
    history: Vec<PipelineState>,
    answers_cancelled: bool,
    report_path: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        options: RunOptions,
        gateway: Arc<dyn LlmGateway>,
        rasterizer: Arc<dyn PageRasterizer>,
        session: SessionStore,
    ) -> Self {
        let validator = Arc::new(Validator::new(gateway, &config.validator));
        Self {
            config,
            options,
            validator,
            rasterizer,
            session,
            answer_source: None,
            renderer: Box::new(MarkdownReport),
            history: Vec::new(),
            answers_cancelled: false,
            report_path: None,
        }
    }

    pub fn with_answer_source(mut self, source: Box<dyn AnswerSource>) -> Self {
        self.answer_source = Some(source);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// 当前状态（尚未开始时为 None）
    pub fn state(&self) -> Option<PipelineState> {
        self.history.last().copied()
    }

    /// 经历过的全部状态
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// 报告路径（没有生成报告时为 None）
    pub fn report_path(&self) -> Option<&Path> {
        self.report_path.as_deref()
    }

    fn enter(&mut self, state: PipelineState) {
        match self.state() {
            Some(prev) => debug!("流水线状态: {} → {}", prev, state),
            None => debug!("流水线状态: {}", state),
        }
        self.history.push(state);
    }

    fn offline(&self) -> bool {
        self.validator.is_offline()
    }

    /// 运行整条流水线
    pub async fn run(&mut self) -> Result<SessionResult> {
        match self.run_stages().await {
            Ok(result) => {
                self.enter(PipelineState::Done);
                Ok(result)
            }
            Err(e) => {
                error!("❌ 会话中止（{} 阶段）: {}", self.state().unwrap_or(PipelineState::Extracting), e);
                self.enter(PipelineState::Failed);
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<SessionResult> {
        self.enter(PipelineState::Extracting);
        let (header, info, mut store) = self.extract_stage().await?;

        if header.run_mode != RunMode::TranscribeOnly {
            self.enter(PipelineState::Solving);
            self.solve_stage(&mut store).await?;
        }

        if header.run_mode == RunMode::Diagnose {
            self.enter(PipelineState::AwaitingAnswers);
            self.answer_stage(&mut store).await?;

            self.enter(PipelineState::Diagnosing);
            self.diagnose_stage(&mut store).await?;

            if header.tutor_mode == TutorMode::C {
                self.scaffold_round(&mut store).await?;
            }
        }

        Ok(self.finish(header, info, store))
    }

    // ========== 抽题 ==========

    async fn extract_stage(&mut self) -> Result<(SessionHeader, TranscriptionInfo, QuestionStore)> {
        if let Some(artifact) = self.session.load_transcription()? {
            info!("♻️ 复用已有抽题结果: {} 道题", artifact.questions.len());
            let mut header = artifact.session;
            header.run_mode = self.options.run_mode;
            header.tutor_mode = self.options.tutor_mode;
            return Ok((header, artifact.info, QuestionStore::from_questions(artifact.questions)));
        }

        let total = self.rasterizer.page_count().await?;
        let pages = match &self.options.pages {
            Some(expr) => parse_page_range(expr, total).map_err(|e| AppError::Config(e.to_string()))?,
            None => (1..=total).collect(),
        };
        log_stage_start("抽题", pages.len());

        let images = self.rasterizer.render(&pages, &self.session.pages_dir()).await?;
        let extractor = QuestionExtractor::new(
            self.validator.clone(),
            self.options.subject,
            self.pdf_name(),
            self.config.llm.extract_temperature,
            self.config.max_concurrent_questions,
        );
        let output = extractor.extract(&images, total).await?;
        if let Some(text) = &output.ocr_text {
            self.session.write_text(OCR_TEXT_FILE, text)?;
        }

        let header = SessionHeader {
            session_id: self.session.session_id(),
            pdf_path: self.options.pdf_path.display().to_string(),
            subject: self.options.subject,
            run_mode: self.options.run_mode,
            tutor_mode: self.options.tutor_mode,
            created_at: Utc::now(),
        };
        let artifact = TranscribedArtifact {
            session: header.clone(),
            info: output.info,
            questions: output.questions,
        };
        self.session.save_json(TRANSCRIBED_FILE, &artifact)?;
        log_stage_complete("抽题", artifact.info.processed_pages.len(), pages.len());

        Ok((header, artifact.info, QuestionStore::from_questions(artifact.questions)))
    }

    fn pdf_name(&self) -> String {
        self.options
            .pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "exam.pdf".to_string())
    }

    // ========== 解题 ==========

    async fn solve_stage(&mut self, store: &mut QuestionStore) -> Result<()> {
        if let Some(artifact) = self.session.load_solve()? {
            info!(
                "♻️ 复用已有解题结果: 成功 {}，失败 {}",
                artifact.results.len(),
                artifact.failures.len()
            );
            apply_solve(store, artifact);
            return Ok(());
        }
        log_stage_start("解题", store.len());

        let mut artifact = SolveArtifact::default();
        if let Some(path) = &self.options.correct_answers {
            let presets = load_answer_file(path)
                .await
                .map_err(|e| AppError::Config(format!("{:#}", e)))?;
            let unknown: Vec<&str> = presets
                .keys()
                .filter(|id| !store.contains(id.as_str()))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                warn!("⚠️ 预置答案中有 {} 个编号不在本次试卷中: {}", unknown.len(), unknown.join(", "));
            }
            artifact.results = apply_presets(store.questions(), &presets);
            info!("✓ 采用预置答案 {} 道", artifact.results.len());
        }

        let preset_ids: HashSet<String> = artifact.results.iter().map(|r| r.question_id.clone()).collect();
        let pending: Vec<Question> = store
            .questions()
            .filter(|q| !preset_ids.contains(&q.id))
            .cloned()
            .collect();
        let ids: Vec<String> = pending.iter().map(|q| q.id.clone()).collect();

        let solver = Arc::new(Solver::new(self.validator.clone(), self.config.llm.solve_temperature));
        let outcomes = map_bounded(pending, self.config.max_concurrent_questions, |question| {
            let solver = solver.clone();
            async move { solver.solve(&question).await }
        })
        .await;

        let offline = self.offline();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(mut result)) => {
                    result.question_id = id;
                    artifact.results.push(result);
                }
                Ok(Err(e)) if e.is_run_fatal(offline) => return Err(e.into()),
                Ok(Err(e)) => {
                    warn!("[{}] ⚠️ 解题失败，不参与诊断: {}", id, e);
                    artifact.failures.insert(id, e.to_string());
                }
                Err(e) => {
                    error!("[{}] ❌ 解题任务执行失败: {}", id, e);
                    artifact.failures.insert(id, e.to_string());
                }
            }
        }
        artifact.results.sort_by_key(|r| order_key(&r.question_id));

        let solved = artifact.results.len();
        self.session.save_json(SOLVE_FILE, &artifact)?;
        apply_solve(store, artifact);
        log_stage_complete("解题", solved, store.len());
        Ok(())
    }

    // ========== 作答 ==========

    async fn answer_stage(&mut self, store: &mut QuestionStore) -> Result<()> {
        if let Some(artifact) = self.session.load_answers()? {
            info!("♻️ 复用已有作答: {} 条", artifact.records.len());
            self.answers_cancelled = artifact.cancelled;
            apply_answers(store, artifact);
            return Ok(());
        }

        let questions: Vec<Question> = store
            .entries()
            .iter()
            .filter(|e| e.solve.is_some())
            .map(|e| e.question.clone())
            .collect();
        log_stage_start("作答", questions.len());

        let Some(source) = self.answer_source.as_mut() else {
            return Err(AppError::Config("没有配置作答来源".to_string()));
        };
        info!("📝 作答来源: {}", source.name());
        let requests: Vec<AnswerRequest<'_>> = questions.iter().map(AnswerRequest::first).collect();
        let batch = source.collect(1, &requests).await?;

        let mut answered = 0;
        for question in &questions {
            match batch.records.get(&question.id) {
                Some(record) => {
                    store.record_answer(record.clone());
                    answered += 1;
                }
                None => store.mark_skipped(&question.id),
            }
        }
        if batch.cancelled {
            warn!("⚠️ 作答被中断，已收集的 {} 条作答保留，其余题目视为跳过", answered);
        }
        self.answers_cancelled = batch.cancelled;

        self.save_answers(store)?;
        self.save_transcript()?;
        log_stage_complete("作答", answered, questions.len());
        Ok(())
    }

    fn save_answers(&self, store: &QuestionStore) -> Result<()> {
        let artifact = AnswersArtifact {
            records: store.all_answers(),
            skipped: store
                .entries()
                .iter()
                .filter(|e| e.skipped)
                .map(|e| e.id().to_string())
                .collect(),
            cancelled: self.answers_cancelled,
        };
        self.session.save_json(ANSWERS_FILE, &artifact)?;
        Ok(())
    }

    /// 模拟学生的思考过程
    fn save_transcript(&self) -> Result<()> {
        if let Some(transcript) = self.answer_source.as_ref().and_then(|s| s.transcript()) {
            self.session.save_json(SIMULATION_FILE, &transcript)?;
        }
        Ok(())
    }

    // ========== 诊断 ==========

    async fn diagnose_stage(&mut self, store: &mut QuestionStore) -> Result<()> {
        let mode = self.options.tutor_mode;
        if let Some(artifact) = self.session.load_diagnosis()? {
            if artifact.results.iter().all(|r| r.mode == mode) {
                info!("♻️ 复用已有诊断结果: {} 道", artifact.results.len());
                apply_diagnosis(store, artifact);
                return Ok(());
            }
            warn!("⚠️ 已有诊断结果的模式与本次 ({}) 不同，重新诊断", mode);
        }

        let targets: Vec<&QuestionEntry> = store
            .entries()
            .iter()
            .filter(|e| e.solve.is_some() && e.attempt(1).is_some())
            .collect();
        let jobs = self.jobs_for(&targets, false);
        let total = jobs.len();
        log_stage_start("诊断", total);

        let success = self.run_diagnosis(store, jobs).await?;
        self.save_diagnosis(store)?;
        log_stage_complete("诊断", success, total);
        Ok(())
    }

    /// 模式 C：为已下发提示的题目收集第二次作答，再生成综合讲解
    async fn scaffold_round(&mut self, store: &mut QuestionStore) -> Result<()> {
        let waiting: Vec<(Question, Vec<HintStep>, String)> = store
            .entries()
            .iter()
            .filter(|e| hints_issued(e) && e.attempt(2).is_none())
            .filter_map(|e| {
                let hints = e.diagnosis.as_ref()?.scaffold()?.hints.clone();
                let previous = e.attempt(1)?.submitted_answer.clone();
                Some((e.question.clone(), hints, previous))
            })
            .collect();

        if !waiting.is_empty() {
            if self.answers_cancelled {
                info!("⏹ 作答已中断，{} 道题不再收集第二次作答", waiting.len());
            } else if self.answer_source.is_some() {
                self.enter(PipelineState::AwaitingAnswers);
                log_stage_start("第二次作答", waiting.len());
                self.collect_second_attempts(store, &waiting).await?;
            } else {
                warn!("⚠️ 没有作答来源，{} 道题无法进行第二次作答", waiting.len());
            }
        }

        let targets: Vec<&QuestionEntry> = store
            .entries()
            .iter()
            .filter(|e| hints_issued(e) && e.attempt(2).is_some())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        let jobs = self.jobs_for(&targets, true);
        let total = jobs.len();
        self.enter(PipelineState::Diagnosing);
        log_stage_start("综合讲解", total);

        let success = self.run_diagnosis(store, jobs).await?;
        self.save_diagnosis(store)?;
        log_stage_complete("综合讲解", success, total);
        Ok(())
    }

    async fn collect_second_attempts(
        &mut self,
        store: &mut QuestionStore,
        waiting: &[(Question, Vec<HintStep>, String)],
    ) -> Result<()> {
        let Some(source) = self.answer_source.as_mut() else {
            return Ok(());
        };
        let requests: Vec<AnswerRequest<'_>> = waiting
            .iter()
            .map(|(question, hints, previous)| AnswerRequest::retry(question, hints, previous))
            .collect();
        let batch = source.collect(2, &requests).await?;

        let received = batch.records.len();
        for record in batch.records.into_values() {
            store.record_answer(AnswerRecord::second(record.question_id, record.submitted_answer));
        }
        if batch.cancelled {
            warn!("⚠️ 第二次作答被中断，未作答的题目将记为未完成");
        }
        self.answers_cancelled = batch.cancelled;

        self.save_answers(store)?;
        self.save_transcript()?;
        log_stage_complete("第二次作答", received, waiting.len());
        Ok(())
    }

    fn jobs_for(&self, entries: &[&QuestionEntry], with_prior: bool) -> Vec<DiagnosisJob> {
        let session_id = self.session.session_id();
        let total = entries.len();
        entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                Some(DiagnosisJob {
                    ctx: QuestionCtx::new(&session_id, entry.id(), i + 1, total),
                    question: entry.question.clone(),
                    solve: entry.solve.clone()?,
                    answers: entry.answers.clone(),
                    prior: if with_prior { entry.diagnosis.clone() } else { None },
                })
            })
            .collect()
    }

    /// 并发诊断，结果写回存储，返回成功数
    async fn run_diagnosis(&self, store: &mut QuestionStore, jobs: Vec<DiagnosisJob>) -> Result<usize> {
        let mode = self.options.tutor_mode;
        let ids: Vec<String> = jobs.iter().map(|j| j.question.id.clone()).collect();
        let engine = Arc::new(DiagnosisEngine::new(
            AnswerEvaluator::new(&self.config.evaluation),
            self.validator.clone(),
            self.config.llm.diagnose_temperature,
        ));

        let outcomes = map_bounded(jobs, self.config.max_concurrent_questions, |job| {
            let engine = engine.clone();
            async move {
                let DiagnosisJob {
                    ctx,
                    question,
                    solve,
                    answers,
                    prior,
                } = job;
                let request = DiagnosisRequest {
                    question: &question,
                    solve: Some(&solve),
                    answers: &answers,
                    prior,
                };
                engine.diagnose(&ctx, mode, request).await
            }
        })
        .await;

        let offline = self.offline();
        let mut success = 0;
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(result)) => {
                    store.set_diagnosis(result);
                    success += 1;
                }
                Ok(Err(e)) if e.is_run_fatal(offline) => return Err(e.into()),
                Ok(Err(e)) => {
                    warn!("[{}] ⚠️ 诊断失败: {}", id, e);
                    store.mark_diagnosis_failed(&id, e.to_string());
                }
                Err(e) => {
                    error!("[{}] ❌ 诊断任务执行失败: {}", id, e);
                    store.mark_diagnosis_failed(&id, e.to_string());
                }
            }
        }
        Ok(success)
    }

    fn save_diagnosis(&self, store: &QuestionStore) -> Result<()> {
        let failures: BTreeMap<String, String> = store
            .entries()
            .iter()
            .filter_map(|e| e.diagnosis_error.clone().map(|reason| (e.id().to_string(), reason)))
            .collect();
        let artifact = DiagnosisArtifact {
            results: store.diagnoses(),
            failures,
        };
        self.session.save_json(DIAGNOSIS_FILE, &artifact)?;
        Ok(())
    }

    // ========== 报告 ==========

    /// 定稿并输出报告，这里的错误只记日志
    fn finish(&mut self, header: SessionHeader, info: TranscriptionInfo, store: QuestionStore) -> SessionResult {
        let result = SessionResult::finalize(header, info, store);
        if let Err(e) = self.session.save_json(RESULTS_FILE, &result) {
            error!("❌ 保存会话结果失败: {}", e);
        }

        if result.header.run_mode == RunMode::Diagnose {
            self.enter(PipelineState::Reporting);
            match self.renderer.render(&result) {
                Ok(text) => match self.session.write_text(REPORT_FILE, &text) {
                    Ok(path) => self.report_path = Some(path),
                    Err(e) => error!("❌ 写入报告失败: {}", e),
                },
                Err(e) => error!("❌ 报告渲染失败: {:#}", e),
            }
        }
        result
    }
}

fn hints_issued(entry: &QuestionEntry) -> bool {
    entry
        .diagnosis
        .as_ref()
        .and_then(|d| d.scaffold())
        .is_some_and(|p| p.state == ScaffoldState::HintsIssued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockGateway, Stage};
    use crate::error::{GatewayError, PipelineError};
    use crate::infrastructure::ImageDirRasterizer;
    use crate::models::loaders::PresetAnswer;
    use crate::models::store::QuestionStatus;
    use crate::services::answer_source::FileSource;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        pages: PathBuf,
        output: PathBuf,
    }

    fn fixture(pages: u32) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let pages_dir = tmp.path().join("rendered");
        std::fs::create_dir_all(&pages_dir).unwrap();
        for page in 1..=pages {
            std::fs::write(pages_dir.join(format!("page_{}.png", page)), b"\x89PNG fake").unwrap();
        }
        let output = tmp.path().join("outputs");
        Fixture {
            pages: pages_dir,
            output,
            _tmp: tmp,
        }
    }

    fn options(run_mode: RunMode, tutor_mode: TutorMode) -> RunOptions {
        RunOptions {
            pdf_path: PathBuf::from("exam.pdf"),
            run_mode,
            tutor_mode,
            ..Default::default()
        }
    }

    fn pipeline(fx: &Fixture, mock: Arc<MockGateway>, options: RunOptions) -> Pipeline {
        // 单并发，保证预设响应按题目顺序消费
        let config = Arc::new(Config {
            output_dir: fx.output.clone(),
            offline: true,
            max_concurrent_questions: 1,
            ..Default::default()
        });
        let session = SessionStore::create(&fx.output, "session_test").unwrap();
        Pipeline::new(
            config,
            options,
            mock,
            Arc::new(ImageDirRasterizer::new(fx.pages.clone())),
            session,
        )
    }

    fn answers(pairs: &[(&str, &str)]) -> Box<dyn AnswerSource> {
        let map = pairs
            .iter()
            .map(|(id, answer)| (id.to_string(), PresetAnswer::simple(*answer)))
            .collect();
        Box::new(FileSource::from_map(map))
    }

    #[tokio::test]
    async fn test_transcribe_only_stops_after_extraction() {
        let fx = fixture(2);
        let mock = Arc::new(MockGateway::new());
        let mut p = pipeline(&fx, mock.clone(), options(RunMode::TranscribeOnly, TutorMode::B));

        let result = p.run().await.unwrap();
        assert_eq!(result.question_ids(), vec!["p1_q1", "p2_q1"]);
        assert_eq!(p.history(), &[PipelineState::Extracting, PipelineState::Done]);
        assert_eq!(mock.call_count(Stage::Solve), 0);
        assert!(p.session().has(TRANSCRIBED_FILE));
        assert!(!p.session().has(REPORT_FILE));
    }

    #[tokio::test]
    async fn test_empty_extraction_aborts_without_report() {
        let fx = fixture(1);
        let mock = Arc::new(MockGateway::new());
        mock.push_reply(Stage::Extract, "{\"questions\": []}");
        let mut p = pipeline(&fx, mock, options(RunMode::Diagnose, TutorMode::B));

        let err = p.run().await.unwrap_err();
        assert!(matches!(
            err.as_pipeline(),
            Some(PipelineError::ExtractionEmpty { .. })
        ));
        assert_eq!(p.state(), Some(PipelineState::Failed));
        assert!(!p.session().has(REPORT_FILE));
        assert!(!p.session().has(TRANSCRIBED_FILE));
    }

    #[tokio::test]
    async fn test_solve_failure_is_isolated() {
        let fx = fixture(2);
        let mock = Arc::new(MockGateway::new());
        // 第一道题两次都给出无效标签（含一次修复）
        mock.push_json(Stage::Solve, serde_json::json!({"correct_answer": "Z", "key_steps": ["?"]}));
        mock.push_json(Stage::Solve, serde_json::json!({"correct_answer": "Z", "key_steps": ["?"]}));
        let mut p = pipeline(&fx, mock, options(RunMode::Diagnose, TutorMode::A))
            .with_answer_source(answers(&[("p1_q1", "C"), ("p2_q1", "C")]));

        let result = p.run().await.unwrap();
        let unsolved = result.entry("p1_q1").unwrap();
        assert_eq!(unsolved.status(), QuestionStatus::Unsolved);
        assert!(unsolved.diagnosis.is_none());
        assert_eq!(result.entry("p2_q1").unwrap().status(), QuestionStatus::Correct);
        assert_eq!(result.summary.unsolved, vec!["p1_q1"]);
        assert!(p.report_path().is_some());
    }

    #[tokio::test]
    async fn test_mode_c_runs_second_round() {
        let fx = fixture(1);
        let mock = Arc::new(MockGateway::new());
        let mut second = BTreeMap::new();
        second.insert(
            "p1_q1".to_string(),
            PresetAnswer {
                second_attempt: Some("C".to_string()),
                ..PresetAnswer::simple("A")
            },
        );
        let mut p = pipeline(&fx, mock.clone(), options(RunMode::Diagnose, TutorMode::C))
            .with_answer_source(Box::new(FileSource::from_map(second)));

        let result = p.run().await.unwrap();
        let diagnosis = result.entry("p1_q1").unwrap().diagnosis.as_ref().unwrap();
        assert!(diagnosis.first_attempt_wrong());
        assert!(diagnosis.recovered());
        assert_eq!(result.summary.scaffold.as_ref().unwrap().recovered_count, 1);
        assert_eq!(mock.call_count(Stage::Hint), 1);
        assert_eq!(mock.call_count(Stage::Explain), 1);
        assert_eq!(
            p.history(),
            &[
                PipelineState::Extracting,
                PipelineState::Solving,
                PipelineState::AwaitingAnswers,
                PipelineState::Diagnosing,
                PipelineState::AwaitingAnswers,
                PipelineState::Diagnosing,
                PipelineState::Reporting,
                PipelineState::Done,
            ]
        );
    }
    #[tokio::test]
    async fn test_auth_failure_aborts_online_run() {
        let fx = fixture(2);
        let mock = Arc::new(MockGateway::online());
        mock.push_error(Stage::Solve, GatewayError::Auth("401".to_string()));
        let mut p = pipeline(&fx, mock.clone(), options(RunMode::Solve, TutorMode::B));

        let err = p.run().await.unwrap_err();
        assert!(matches!(err.as_pipeline(), Some(PipelineError::GatewayAuth(_))));
        assert_eq!(p.state(), Some(PipelineState::Failed));
        assert!(!p.session().has(RESULTS_FILE));
    }

    #[tokio::test]
    async fn test_auth_failure_is_per_question_offline() {
        let fx = fixture(2);
        let mock = Arc::new(MockGateway::new());
        mock.push_error(Stage::Solve, GatewayError::Auth("401".to_string()));
        let mut p = pipeline(&fx, mock.clone(), options(RunMode::Solve, TutorMode::B));

        let result = p.run().await.unwrap();
        assert_eq!(result.summary.unsolved, vec!["p1_q1"]);
        assert!(result.entry("p2_q1").unwrap().solve.is_some());
        assert_eq!(p.state(), Some(PipelineState::Done));
    }
}
