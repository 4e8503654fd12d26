//! 流程层（Workflow）
//!
//! 定义"一道题"的诊断流程：判分 → 按模式生成讲解 / 对比分析 / 分步提示。
//! 只处理单题，不关心并发和落盘。

pub mod diagnosis_flow;
pub mod question_ctx;
pub mod redaction;

pub use diagnosis_flow::{DiagnosisEngine, DiagnosisRequest};
pub use question_ctx::QuestionCtx;
pub use redaction::Redactor;
