//! # Exam Tutor
//!
//! 从试卷 PDF 中抽题、解题、收集作答并诊断错因的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `PageRasterizer` - PDF 页面渲染（pdftoppm 或现成图片目录）
//! - `SessionStore` - 会话目录，各阶段产物的读写
//! - `clients/` - `LlmGateway`（OpenAI 兼容 / 离线 mock），超时与退避重试
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单页或单题
//! - `QuestionExtractor` - 抽题能力
//! - `Solver` - 解题能力
//! - `AnswerEvaluator` - 判分能力
//! - `Validator` - 结构校验与修复
//! - `AnswerSource` - 作答来源（终端 / 文件 / 模拟学生）
//! - `ReportRenderer` - 报告渲染
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题"的诊断流程
//! - `QuestionCtx` - 上下文封装（session + question_id）
//! - `DiagnosisEngine` - 判分 → 模式 A / B / C 的讲解、对比或分步提示
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/app` - 应用入口，装配资源
//! - `orchestrator/pipeline` - 会话状态机，阶段调度与落盘
//!
//! ## 模块结构

pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{LlmGateway, MockGateway};
pub use config::Config;
pub use error::{AppError, PipelineError, Result};
pub use infrastructure::SessionStore;
pub use models::question::Question;
pub use models::session::SessionResult;
pub use orchestrator::{App, Pipeline, PipelineState, RunOptions};
pub use workflow::{DiagnosisEngine, QuestionCtx};
