//! 错误类型
//!
//! 分三层：
//! - `GatewayError`：单次 LLM 调用失败，区分可重试与致命
//! - `PipelineError`：流水线错误分类，决定是单题失败还是整次运行中止
//! - `AppError`：应用顶层错误，包装文件、配置等外围错误

use std::path::PathBuf;

use thiserror::Error;

/// 声明了结构的流水线阶段（用于标注校验失败发生在哪一步）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// 题目抽取
    Extraction,
    /// 解题
    Solve,
    /// 对比诊断（模式 B）
    Contrastive,
    /// 分步提示（模式 C 第一阶段）
    Hint,
    /// 综合讲解（模式 C 第二阶段）
    Explanation,
    /// 模拟学生作答
    Simulation,
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemaKind::Extraction => "extraction",
            SchemaKind::Solve => "solve",
            SchemaKind::Contrastive => "contrastive",
            SchemaKind::Hint => "hint",
            SchemaKind::Explanation => "explanation",
            SchemaKind::Simulation => "simulation",
        };
        f.write_str(name)
    }
}

/// LLM 网关错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// 调用超时
    #[error("LLM 调用超时 ({0} 秒)")]
    Timeout(u64),

    /// 频率限制
    #[error("LLM 请求频率受限")]
    RateLimited { retry_after_secs: Option<u64> },

    /// 网络或服务端临时错误
    #[error("LLM 请求失败: {0}")]
    Transport(String),

    /// 返回内容为空
    #[error("LLM 返回内容为空")]
    EmptyResponse,

    /// 鉴权失败
    #[error("LLM 鉴权失败: {0}")]
    Auth(String),

    /// 请求本身不合法（重试无意义）
    #[error("LLM 拒绝请求: {0}")]
    BadRequest(String),

    /// 未配置客户端
    #[error("LLM 未配置: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::RateLimited { .. }
                | GatewayError::Transport(_)
                | GatewayError::EmptyResponse
        )
    }
}

/// 流水线错误分类
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// 没有抽取到任何题目（整次运行中止）
    #[error("未抽取到任何题目 (共处理 {pages} 页)")]
    ExtractionEmpty { pages: usize },

    /// 页面渲染失败（整次运行中止）
    #[error("页面渲染失败: {0}")]
    Rasterize(String),

    /// 单题解题失败
    #[error("题目 {question_id} 解题失败: {reason}")]
    SolveFailed { question_id: String, reason: String },

    /// 修复重试后仍不符合结构
    #[error("{schema} 输出校验失败 (共尝试 {attempts} 次): {reason}")]
    SchemaValidation {
        schema: SchemaKind,
        reason: String,
        attempts: u32,
    },

    /// 网关临时错误，重试预算已用完
    #[error("LLM 调用失败 (重试已用尽): {0}")]
    GatewayTransient(GatewayError),

    /// 网关拒绝请求
    #[error("LLM 调用被拒绝: {0}")]
    GatewayRejected(GatewayError),

    /// 鉴权失败（离线模式以外整次运行中止）
    #[error("LLM 鉴权失败: {0}")]
    GatewayAuth(String),

    /// 作答无法解析
    #[error("题目 {question_id} 的作答无法解析: {answer:?}")]
    AnswerUnparseable { question_id: String, answer: String },

    /// 缺少标准答案就尝试诊断
    #[error("题目 {question_id} 没有标准答案，无法诊断")]
    MissingCanonicalAnswer { question_id: String },

    /// 作答收集被中断
    #[error("作答收集被中断")]
    Cancelled,
}

impl PipelineError {
    /// 将网关错误归入流水线错误
    pub fn from_gateway(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(msg) => PipelineError::GatewayAuth(msg),
            GatewayError::NotConfigured(msg) => PipelineError::GatewayAuth(msg),
            GatewayError::BadRequest(_) => PipelineError::GatewayRejected(err),
            other => PipelineError::GatewayTransient(other),
        }
    }

    /// 是否需要中止整次运行
    ///
    /// `offline` 为 true 时（mock 网关）鉴权错误只影响单题。
    pub fn is_run_fatal(&self, offline: bool) -> bool {
        match self {
            PipelineError::ExtractionEmpty { .. } | PipelineError::Rasterize(_) => true,
            PipelineError::GatewayAuth(_) => !offline,
            _ => false,
        }
    }
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 流水线错误
    #[error("流水线错误: {0}")]
    Pipeline(#[from] PipelineError),

    /// 文件操作错误
    #[error("文件错误 ({}): {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON 解析错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl AppError {
    /// 便捷构造：文件错误
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }

    /// 取出流水线错误（如果是）
    pub fn as_pipeline(&self) -> Option<&PipelineError> {
        match self {
            AppError::Pipeline(e) => Some(e),
            _ => None,
        }
    }
}

/// 应用程序结果类型
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Timeout(60).is_retryable());
        assert!(GatewayError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!GatewayError::Auth("bad key".into()).is_retryable());
        assert!(!GatewayError::BadRequest("bad json".into()).is_retryable());
    }

    #[test]
    fn test_auth_fatal_unless_offline() {
        let err = PipelineError::from_gateway(GatewayError::Auth("401".into()));
        assert!(err.is_run_fatal(false));
        assert!(!err.is_run_fatal(true));

        let err = PipelineError::from_gateway(GatewayError::Timeout(5));
        assert!(matches!(err, PipelineError::GatewayTransient(_)));
        assert!(!err.is_run_fatal(false));
    }

    #[test]
    fn test_extraction_empty_always_fatal() {
        assert!(PipelineError::ExtractionEmpty { pages: 3 }.is_run_fatal(true));
    }
}
