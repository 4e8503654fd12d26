//! 会话目录
//!
//! 每次运行一个目录 `session_{YYYYMMDD_HHMMSS}/`，各阶段完成后立即落盘：
//!
//! ```text
//! pages/                 页面图片
//! ocr_text.txt           OCR 文本（英语）
//! transcribed.json       题目 + 页面统计 + 会话元信息
//! solve_results.json     标准答案 + 解题失败
//! answers.json           作答 + 跳过 + 是否中断
//! diagnosis.json         诊断 + 诊断失败
//! results.json           完整 SessionResult
//! report.md              报告
//! run.log                运行日志
//! ```
//!
//! 只凭这些文件就能重建 `SessionResult`（续跑 / 审计）。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::answer::AnswerRecord;
use crate::models::diagnosis::DiagnosisResult;
use crate::models::question::Question;
use crate::models::session::{SessionHeader, SessionResult, TranscriptionInfo};
use crate::models::solve::SolveResult;
use crate::models::store::QuestionStore;

pub const TRANSCRIBED_FILE: &str = "transcribed.json";
pub const SOLVE_FILE: &str = "solve_results.json";
pub const ANSWERS_FILE: &str = "answers.json";
pub const DIAGNOSIS_FILE: &str = "diagnosis.json";
pub const RESULTS_FILE: &str = "results.json";
pub const OCR_TEXT_FILE: &str = "ocr_text.txt";
pub const SIMULATION_FILE: &str = "student_simulation.json";
pub const REPORT_FILE: &str = "report.md";
pub const LOG_FILE: &str = "run.log";
pub const PAGES_DIR: &str = "pages";

/// 抽题阶段产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribedArtifact {
    pub session: SessionHeader,
    #[serde(flatten)]
    pub info: TranscriptionInfo,
    pub questions: Vec<Question>,
}

/// 解题阶段产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveArtifact {
    pub results: Vec<SolveResult>,
    /// 题目编号 -> 失败原因
    #[serde(default)]
    pub failures: BTreeMap<String, String>,
}

/// 作答阶段产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswersArtifact {
    pub records: Vec<AnswerRecord>,
    #[serde(default)]
    pub skipped: Vec<String>,
    /// 作答收集是否被中途中断
    #[serde(default)]
    pub cancelled: bool,
}

/// 诊断阶段产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisArtifact {
    pub results: Vec<DiagnosisResult>,
    #[serde(default)]
    pub failures: BTreeMap<String, String>,
}

/// 会话目录
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// 生成会话编号
    pub fn new_session_id() -> String {
        format!("session_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
    }

    /// 在 `output_dir` 下创建新会话目录
    pub fn create(output_dir: &Path, session_id: &str) -> Result<Self> {
        let dir = output_dir.join(session_id);
        let pages = dir.join(PAGES_DIR);
        std::fs::create_dir_all(&pages).map_err(|e| AppError::file(&pages, e))?;
        debug!("会话目录: {}", dir.display());
        Ok(Self { dir })
    }

    /// 打开已有会话目录（续跑）
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(AppError::file(
                &dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "会话目录不存在"),
            ));
        }
        let pages = dir.join(PAGES_DIR);
        std::fs::create_dir_all(&pages).map_err(|e| AppError::file(&pages, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 目录名即会话编号
    pub fn session_id(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.path(PAGES_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.path(LOG_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.path(REPORT_FILE)
    }

    pub fn has(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// 写 JSON（先写临时文件再改名，避免中断留下半个文件）
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let text = serde_json::to_string_pretty(value)?;
        self.write_text(name, &text)
    }

    /// 读 JSON，文件不存在时返回 None
    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| AppError::file(&path, e))?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn write_text(&self, name: &str, text: &str) -> Result<PathBuf> {
        let path = self.path(name);
        let tmp = self.path(&format!(".{}.tmp", name));
        std::fs::write(&tmp, text).map_err(|e| AppError::file(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| AppError::file(&path, e))?;
        debug!("已写入 {}", path.display());
        Ok(path)
    }

    pub fn read_text(&self, name: &str) -> Result<Option<String>> {
        let path = self.path(name);
        if !path.is_file() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AppError::file(&path, e))
    }

    pub fn load_transcription(&self) -> Result<Option<TranscribedArtifact>> {
        self.load_json(TRANSCRIBED_FILE)
    }

    pub fn load_solve(&self) -> Result<Option<SolveArtifact>> {
        self.load_json(SOLVE_FILE)
    }

    pub fn load_answers(&self) -> Result<Option<AnswersArtifact>> {
        self.load_json(ANSWERS_FILE)
    }

    pub fn load_diagnosis(&self) -> Result<Option<DiagnosisArtifact>> {
        self.load_json(DIAGNOSIS_FILE)
    }

    /// 重建会话结果
    ///
    /// 优先读 `results.json`；没有时用各阶段产物拼装。连抽题产物都没有时返回 None。
    pub fn load_session_result(&self) -> Result<Option<SessionResult>> {
        if let Some(result) = self.load_json::<SessionResult>(RESULTS_FILE)? {
            return Ok(Some(result));
        }
        let Some(transcribed) = self.load_transcription()? else {
            return Ok(None);
        };
        let header = transcribed.session.clone();
        let info = transcribed.info.clone();
        let store = self.rebuild_store(transcribed)?;
        Ok(Some(SessionResult::finalize(header, info, store)))
    }

    /// 用各阶段产物恢复题目存储
    pub fn rebuild_store(&self, transcribed: TranscribedArtifact) -> Result<QuestionStore> {
        let mut store = QuestionStore::from_questions(transcribed.questions);
        if let Some(solve) = self.load_solve()? {
            apply_solve(&mut store, solve);
        }
        if let Some(answers) = self.load_answers()? {
            apply_answers(&mut store, answers);
        }
        if let Some(diagnosis) = self.load_diagnosis()? {
            apply_diagnosis(&mut store, diagnosis);
        }
        Ok(store)
    }
}

pub fn apply_solve(store: &mut QuestionStore, artifact: SolveArtifact) {
    for result in artifact.results {
        store.set_solve(result);
    }
    for (id, reason) in artifact.failures {
        store.mark_unsolved(&id, reason);
    }
}

pub fn apply_answers(store: &mut QuestionStore, artifact: AnswersArtifact) {
    for record in artifact.records {
        store.record_answer(record);
    }
    for id in &artifact.skipped {
        store.mark_skipped(id);
    }
}

pub fn apply_diagnosis(store: &mut QuestionStore, artifact: DiagnosisArtifact) {
    for result in artifact.results {
        store.set_diagnosis(result);
    }
    for (id, reason) in artifact.failures {
        store.mark_diagnosis_failed(&id, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::diagnosis::TutorMode;
    use crate::models::question::Subject;
    use crate::models::session::RunMode;
    use crate::models::store::QuestionStatus;

    fn header(id: &str) -> SessionHeader {
        SessionHeader {
            session_id: id.to_string(),
            pdf_path: "exam.pdf".to_string(),
            subject: Subject::Math,
            run_mode: RunMode::Diagnose,
            tutor_mode: TutorMode::B,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_missing_artifacts_load_as_none() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::create(root.path(), "session_x").unwrap();
        assert!(store.pages_dir().is_dir());
        assert!(store.load_solve().unwrap().is_none());
        assert!(store.load_session_result().unwrap().is_none());
        assert_eq!(store.session_id(), "session_x");
    }

    #[test]
    fn test_reconstructs_from_stage_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::create(root.path(), "session_y").unwrap();

        store
            .save_json(
                TRANSCRIBED_FILE,
                &TranscribedArtifact {
                    session: header("session_y"),
                    info: TranscriptionInfo {
                        total_pages: 1,
                        processed_pages: vec![1],
                        ..Default::default()
                    },
                    questions: vec![
                        Question::new("p1_q1", "exam.pdf", 1, "a"),
                        Question::new("p1_q2", "exam.pdf", 1, "b"),
                    ],
                },
            )
            .unwrap();
        let mut failures = BTreeMap::new();
        failures.insert("p1_q2".to_string(), "timeout".to_string());
        store
            .save_json(
                SOLVE_FILE,
                &SolveArtifact {
                    results: vec![SolveResult::new("p1_q1", "7")],
                    failures,
                },
            )
            .unwrap();
        store
            .save_json(
                ANSWERS_FILE,
                &AnswersArtifact {
                    records: vec![AnswerRecord::first("p1_q1", "7")],
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.load_session_result().unwrap().unwrap();
        assert_eq!(result.session_id(), "session_y");
        assert_eq!(result.question_ids(), vec!["p1_q1", "p1_q2"]);
        assert_eq!(result.entry("p1_q2").unwrap().status(), QuestionStatus::Unsolved);
        assert_eq!(result.entry("p1_q1").unwrap().status(), QuestionStatus::Answered);
        assert_eq!(result.summary.unsolved, vec!["p1_q2".to_string()]);
    }

    #[test]
    fn test_open_requires_existing_dir() {
        let root = tempfile::tempdir().unwrap();
        assert!(SessionStore::open(root.path().join("missing")).is_err());
    }
}
