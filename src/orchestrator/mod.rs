//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话生命周期和阶段调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 创建 / 打开会话目录，启动日志
//! - 装配网关、页面渲染和作答来源
//! - 输出最终统计
//!
//! ### `pipeline` - 会话流水线
//! - 状态机：抽题 → 解题 → 作答 → 诊断 → 报告
//! - 控制阶段内并发（Semaphore）
//! - 每个阶段落盘，续跑时复用
//!
//! ## 层次关系
//!
//! ```text
//! app (装配资源)
//!     ↓
//! pipeline (处理整张试卷)
//!     ↓
//! workflow::DiagnosisEngine (处理单道题)
//!     ↓
//! services (能力层：extract / solve / evaluate / validate / answer_source)
//!     ↓
//! clients + infrastructure (LLM 网关、页面渲染、会话目录)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：app 管装配，pipeline 管阶段
//! 2. **资源隔离**：只有编排层持有网关和会话目录
//! 3. **向下依赖**：编排层 → workflow → services → clients / infrastructure

pub mod app;
pub mod pipeline;

// 重新导出主要类型
pub use app::App;
pub use pipeline::{Pipeline, PipelineState, RunOptions};
