/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::models::diagnosis::TutorMode;
use crate::models::session::SessionSummary;

/// 初始化 tracing
///
/// # 参数
/// - `verbose`: 是否输出 debug 级别
/// - `log_file`: 同时写入的日志文件（会话目录下的 `run.log`）
///
/// 重复初始化时静默忽略（测试里会多次调用）
pub fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法打开日志文件: {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    // 已经初始化过就沿用原来的 subscriber
    let _ = result;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `session_id`: 会话编号
/// - `pdf`: 试卷路径
/// - `max_concurrent`: 最大并发数
pub fn log_startup(session_id: &str, pdf: &str, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 试卷诊断模式");
    info!("📄 试卷: {}", pdf);
    info!("🗂  会话: {}", session_id);
    info!("📊 最大并发数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
pub fn log_stage_start(stage: &str, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 进入阶段: {} (共 {} 项)", stage, total);
    info!("{}", "=".repeat(60));
}

/// 记录阶段完成
pub fn log_stage_complete(stage: &str, success: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 阶段 {} 完成: 成功 {}/{}", stage, success, total);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 会话汇总
/// - `mode`: 诊断模式
/// - `report_path`: 报告路径（渲染失败时为 None）
pub fn print_final_stats(summary: &SessionSummary, mode: TutorMode, report_path: Option<&Path>) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📝 题目总数: {}", summary.total);
    info!("✍️  已作答: {}", summary.answered);
    info!(
        "✅ 答对: {}/{} ({:.1}%)",
        summary.correct,
        summary.answered,
        summary.accuracy * 100.0
    );
    if !summary.missed.is_empty() {
        info!("❌ 答错: {}", summary.missed.join(", "));
    }
    if !summary.skipped.is_empty() {
        info!("⏭  跳过: {}", summary.skipped.join(", "));
    }
    if !summary.unsolved.is_empty() {
        info!("⚠️ 未解出: {}", summary.unsolved.join(", "));
    }
    if mode == TutorMode::C {
        if let Some(scaffold) = &summary.scaffold {
            info!(
                "🔁 首次答错 {} 题，提示后答对 {} 题",
                scaffold.first_attempt_wrong_count, scaffold.recovered_count
            );
        }
    }
    info!("{}", "=".repeat(60));
    if let Some(path) = report_path {
        info!("\n报告已保存至: {}", path.display());
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
