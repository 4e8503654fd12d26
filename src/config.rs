//! 程序配置
//!
//! 进程启动时构造一次，之后以引用（或 `Arc<Config>`）传入编排层、网关和判分器。
//! 核心逻辑内部不再读取环境变量。
//!
//! 优先级：默认值 < TOML 配置文件 < 环境变量 < 命令行参数

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 程序配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 会话输出根目录
    pub output_dir: PathBuf,
    /// PDF 渲染分辨率
    pub dpi: u32,
    /// 同一阶段内同时处理的题目数量
    pub max_concurrent_questions: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 使用离线 mock 网关
    pub offline: bool,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub evaluation: EvalConfig,
    pub validator: ValidatorConfig,
    pub student: StudentConfig,
}

/// LLM 配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base_url: String,
    /// 读图模型（抽题 / OCR）
    pub vision_model: String,
    /// 文本模型（解题 / 诊断）
    pub text_model: String,
    pub max_tokens: u32,
    pub solve_temperature: f32,
    pub diagnose_temperature: f32,
    pub extract_temperature: f32,
}

/// 网关超时与重试
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最多尝试次数（含第一次）
    pub max_attempts: u32,
    /// 首次退避时长
    pub base_delay_ms: u64,
    /// 退避上限
    pub max_delay_ms: u64,
    /// 单次调用超时
    pub timeout_secs: u64,
}

/// 判分容差，默认归一化后精确相等
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
}

/// 结构校验
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// 校验失败后的修复往返次数
    pub repair_retries: u32,
}

/// 模拟学生
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentConfig {
    /// 为空时沿用主 LLM 配置
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub model: Option<String>,
    /// 目标正确率（0-100）
    pub correct_rate: u8,
    pub temperature: f32,
    /// 固定随机种子，便于复现
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            dpi: 300,
            max_concurrent_questions: 4,
            verbose_logging: false,
            offline: false,
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            evaluation: EvalConfig::default(),
            validator: ValidatorConfig::default(),
            student: StudentConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            vision_model: "gpt-4o".to_string(),
            text_model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            solve_temperature: 0.0,
            diagnose_temperature: 0.3,
            extract_temperature: 0.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            timeout_secs: 60,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { repair_retries: 1 }
    }
}

impl Default for StudentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: None,
            model: None,
            correct_rate: 70,
            temperature: 0.7,
            seed: None,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载（缺省字段取默认值），再叠加环境变量
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    /// 用环境变量覆盖已有值
    pub fn with_env_overrides(mut self) -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            var(name).and_then(|v| v.parse().ok())
        }

        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("OPENAI_API_BASE") {
            self.llm.api_base_url = v;
        }
        if let Some(v) = var("OPENAI_MODEL_VISION") {
            self.llm.vision_model = v;
        }
        if let Some(v) = var("OPENAI_MODEL_TEXT") {
            self.llm.text_model = v;
        }
        if let Some(v) = parsed("OPENAI_MAX_TOKENS") {
            self.llm.max_tokens = v;
        }
        if let Some(v) = var("STUDENT_API_KEY") {
            self.student.api_key = Some(v);
        }
        if let Some(v) = var("STUDENT_API_BASE") {
            self.student.api_base_url = Some(v);
        }
        if let Some(v) = var("STUDENT_MODEL") {
            self.student.model = Some(v);
        }
        if let Some(v) = parsed("STUDENT_CORRECT_RATE") {
            self.student.correct_rate = v;
        }
        if let Some(v) = parsed("EXAM_TUTOR_MAX_CONCURRENT") {
            self.max_concurrent_questions = v;
        }
        if let Some(v) = parsed("EXAM_TUTOR_TIMEOUT_SECS") {
            self.retry.timeout_secs = v;
        }
        if let Some(v) = parsed("EXAM_TUTOR_RETRY_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parsed("EXAM_TUTOR_REPAIR_RETRIES") {
            self.validator.repair_retries = v;
        }
        if let Some(v) = parsed("EXAM_TUTOR_ABS_TOLERANCE") {
            self.evaluation.absolute_tolerance = v;
        }
        if let Some(v) = parsed("EXAM_TUTOR_REL_TOLERANCE") {
            self.evaluation.relative_tolerance = v;
        }
        if let Some(v) = parsed("VERBOSE_LOGGING") {
            self.verbose_logging = v;
        }
        self
    }

    /// 模拟学生使用的模型名
    pub fn student_model(&self) -> &str {
        self.student.model.as_deref().unwrap_or(&self.llm.text_model)
    }
}
