//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：创建（或打开）会话目录、启动日志
//! 2. **资源装配**：按配置选择 LLM 网关、页面渲染方式和作答来源
//! 3. **运行**：把装配好的 `Pipeline` 跑完，输出最终统计
//!
//! 不处理任何单题细节，全部委托给 `Pipeline`。

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::clients::{LlmGateway, MockGateway, OpenAiGateway, RetryPolicy, RetryingGateway};
use crate::config::Config;
use crate::infrastructure::session_store::TRANSCRIBED_FILE;
use crate::infrastructure::{ImageDirRasterizer, PageRasterizer, PdftoppmRasterizer, SessionStore};
use crate::models::session::{RunMode, SessionResult};
use crate::orchestrator::pipeline::{Pipeline, RunOptions};
use crate::services::answer_source::{
    AnswerSource, AnswerSourceKind, FileSource, InteractiveSource, SimulatedStudent,
};
use crate::services::validator::Validator;
use crate::utils::logging::{init_tracing, log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Arc<Config>,
    pipeline: Pipeline,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config, mut options: RunOptions) -> Result<Self> {
        let session = match &options.resume {
            Some(dir) => SessionStore::open(dir.clone())?,
            None => SessionStore::create(&config.output_dir, &SessionStore::new_session_id())?,
        };

        // 日志同时写入会话目录
        init_tracing(config.verbose_logging, Some(&session.log_path()))?;

        if options.resume.is_some() {
            if let Some(artifact) = session.load_transcription()? {
                info!("♻️ 续跑会话 {}", session.session_id());
                if options.pdf_path.as_os_str().is_empty() {
                    options.pdf_path = artifact.session.pdf_path.clone().into();
                }
                options.subject = artifact.session.subject;
            }
        }
        if options.pdf_path.as_os_str().is_empty()
            && options.pages_dir.is_none()
            && !session.has(TRANSCRIBED_FILE)
        {
            bail!("需要提供试卷 PDF（--pdf）或页面图片目录（--pages-dir）");
        }

        log_startup(
            &session.session_id(),
            &options.pdf_path.display().to_string(),
            config.max_concurrent_questions,
        );

        let config = Arc::new(config);
        let gateway = build_gateway(&config)?;
        let rasterizer = build_rasterizer(&config, &options);
        let answer_source = build_answer_source(&config, &options, gateway.clone()).await?;

        let mut pipeline = Pipeline::new(config.clone(), options, gateway, rasterizer, session);
        if let Some(source) = answer_source {
            pipeline = pipeline.with_answer_source(source);
        }

        Ok(Self { config, pipeline })
    }

    /// 运行应用主逻辑
    pub async fn run(mut self) -> Result<SessionResult> {
        let result = self.pipeline.run().await?;

        print_final_stats(&result.summary, result.header.tutor_mode, self.pipeline.report_path());
        info!("🗂  会话目录: {}", self.pipeline.session().dir().display());
        if self.config.offline {
            info!("（离线模式：结果来自 mock 网关）");
        }
        Ok(result)
    }
}

/// 选择 LLM 网关：离线用 mock，否则 OpenAI 兼容端点外包一层超时重试
fn build_gateway(config: &Config) -> Result<Arc<dyn LlmGateway>> {
    if config.offline {
        info!("🔌 离线模式：使用 mock 网关");
        return Ok(Arc::new(MockGateway::new()));
    }
    let inner = OpenAiGateway::new(config).context("无法创建 LLM 网关")?;
    Ok(Arc::new(RetryingGateway::new(
        Arc::new(inner),
        RetryPolicy::from_config(&config.retry),
    )))
}

/// 选择页面渲染方式：给了图片目录就直接读图，否则调用 pdftoppm
fn build_rasterizer(config: &Config, options: &RunOptions) -> Arc<dyn PageRasterizer> {
    match &options.pages_dir {
        Some(dir) => Arc::new(ImageDirRasterizer::new(dir.clone())),
        None => Arc::new(PdftoppmRasterizer::new(options.pdf_path.clone(), config.dpi)),
    }
}

/// 选择作答来源（只有诊断模式需要）
async fn build_answer_source(
    config: &Config,
    options: &RunOptions,
    gateway: Arc<dyn LlmGateway>,
) -> Result<Option<Box<dyn AnswerSource>>> {
    if options.run_mode != RunMode::Diagnose {
        return Ok(None);
    }

    let source: Box<dyn AnswerSource> = match options.answer_source {
        AnswerSourceKind::Interactive => Box::new(InteractiveSource::stdio()),
        AnswerSourceKind::File => {
            let Some(path) = &options.answers_file else {
                bail!("文件作答需要提供 --answers");
            };
            let mut source = FileSource::load(path).await?;
            if let Some(second) = &options.second_answers_file {
                source = source.with_second_attempts(second).await?;
            }
            Box::new(source)
        }
        AnswerSourceKind::Simulated => {
            let validator = Arc::new(Validator::new(gateway, &config.validator));
            let student = &config.student;
            info!("🎓 模拟学生作答，目标正确率 {}%", student.correct_rate);
            Box::new(SimulatedStudent::new(
                validator,
                student.correct_rate,
                student.temperature,
                student.seed,
            ))
        }
    };
    Ok(Some(source))
}
