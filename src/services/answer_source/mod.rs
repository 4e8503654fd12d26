//! 作答来源
//!
//! 编排层只依赖一个能力："给每道题一条作答记录"。三种实现可以互换：
//! - `InteractiveSource`：终端逐题输入
//! - `FileSource`：答案文件（JSON / TOML）
//! - `SimulatedStudent`：用另一个模型扮演学生
//!
//! 没有给出作答的题目视为跳过，不参与诊断。

pub mod file;
pub mod interactive;
pub mod simulated;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::models::answer::AnswerRecord;
use crate::models::diagnosis::HintStep;
use crate::models::question::Question;

pub use file::FileSource;
pub use interactive::InteractiveSource;
pub use simulated::SimulatedStudent;

/// 一道待作答的题目
#[derive(Debug, Clone, Copy)]
pub struct AnswerRequest<'a> {
    pub question: &'a Question,
    /// 第二次作答时附带的提示
    pub hints: Option<&'a [HintStep]>,
    /// 第二次作答时的上一次答案
    pub previous: Option<&'a str>,
}

impl<'a> AnswerRequest<'a> {
    pub fn first(question: &'a Question) -> Self {
        Self {
            question,
            hints: None,
            previous: None,
        }
    }

    pub fn retry(question: &'a Question, hints: &'a [HintStep], previous: &'a str) -> Self {
        Self {
            question,
            hints: Some(hints),
            previous: Some(previous),
        }
    }
}

/// 一轮作答结果
#[derive(Debug, Clone, Default)]
pub struct AnswerBatch {
    /// 题目编号 -> 作答
    pub records: BTreeMap<String, AnswerRecord>,
    /// 输入被中断（EOF / 退出），已收集的作答仍然有效
    pub cancelled: bool,
}

impl AnswerBatch {
    pub fn insert(&mut self, record: AnswerRecord) {
        self.records.insert(record.question_id.clone(), record);
    }
}

/// 作答来源能力
#[async_trait]
pub trait AnswerSource: Send {
    fn name(&self) -> &'static str;

    /// 收集第 `attempt` 次作答（1 或 2）
    async fn collect(&mut self, attempt: u8, requests: &[AnswerRequest<'_>]) -> Result<AnswerBatch, AppError>;

    /// 需要额外保存的过程记录（模拟学生的思考过程）
    fn transcript(&self) -> Option<JsonValue> {
        None
    }
}

/// 命令行选择的作答来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnswerSourceKind {
    #[default]
    Interactive,
    File,
    Simulated,
}

impl FromStr for AnswerSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interactive" | "stdin" => Ok(AnswerSourceKind::Interactive),
            "file" => Ok(AnswerSourceKind::File),
            "simulated" | "simulate" | "student" => Ok(AnswerSourceKind::Simulated),
            other => Err(format!("未知作答来源: {}", other)),
        }
    }
}

impl fmt::Display for AnswerSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnswerSourceKind::Interactive => "interactive",
            AnswerSourceKind::File => "file",
            AnswerSourceKind::Simulated => "simulated",
        })
    }
}
