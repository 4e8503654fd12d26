//! 命令行参数

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::config::Config;
use crate::models::diagnosis::TutorMode;
use crate::models::question::Subject;
use crate::models::session::RunMode;
use crate::orchestrator::RunOptions;
use crate::services::answer_source::AnswerSourceKind;

/// exam-tutor - 试卷抽题、解题与错因诊断
#[derive(Parser, Debug)]
#[command(name = "exam-tutor")]
#[command(about = "Extract questions from an exam PDF, solve them, collect answers and diagnose mistakes.")]
#[command(version)]
pub struct Args {
    /// 试卷 PDF
    #[arg(long)]
    pub pdf: Option<PathBuf>,

    /// 科目 (math, english)
    #[arg(long, default_value = "math")]
    pub subject: Subject,

    /// 运行模式 (transcribe_only, solve, diagnose)
    #[arg(long, default_value = "diagnose")]
    pub mode: RunMode,

    /// 辅导模式 (a 直接讲解, b 对比诊断, c 分步引导)
    #[arg(long, default_value = "b")]
    pub tutor: TutorMode,

    /// 页码范围，如 `1-3,5`
    #[arg(long)]
    pub pages: Option<String>,

    /// 已渲染好的页面图片目录（page_N.png），不再调用 pdftoppm
    #[arg(long)]
    pub pages_dir: Option<PathBuf>,

    /// PDF 渲染分辨率
    #[arg(long)]
    pub dpi: Option<u32>,

    /// 会话输出根目录
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// 作答文件（JSON / TOML），给出时默认使用文件作答
    #[arg(long)]
    pub answers: Option<PathBuf>,

    /// 模式 C 第二次作答文件
    #[arg(long)]
    pub second_answers: Option<PathBuf>,

    /// 作答来源 (interactive, file, simulated)
    #[arg(long)]
    pub answer_source: Option<AnswerSourceKind>,

    /// 预置标准答案文件，命中的题目不再调用模型解题
    #[arg(long)]
    pub correct_answers: Option<PathBuf>,

    /// 模拟学生的目标正确率（0-100）
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub correct_rate: Option<u8>,

    /// 模拟学生的随机种子
    #[arg(long)]
    pub seed: Option<u64>,

    /// 离线运行（mock 网关）
    #[arg(long)]
    pub no_llm: bool,

    /// 续跑已有会话目录
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 同时处理的题目数量
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// 拆成程序配置和本次运行选项
    pub fn into_parts(self) -> Result<(Config, RunOptions)> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::from_env(),
        };

        if let Some(dpi) = self.dpi {
            config.dpi = dpi;
        }
        if let Some(outdir) = self.outdir {
            config.output_dir = outdir;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_questions = concurrency.max(1);
        }
        if let Some(rate) = self.correct_rate {
            config.student.correct_rate = rate;
        }
        if self.seed.is_some() {
            config.student.seed = self.seed;
        }
        if self.no_llm {
            config.offline = true;
        }
        if self.verbose {
            config.verbose_logging = true;
        }

        let answer_source = match (self.answer_source, &self.answers) {
            (Some(kind), _) => kind,
            (None, Some(_)) => AnswerSourceKind::File,
            (None, None) => AnswerSourceKind::Interactive,
        };

        let options = RunOptions {
            pdf_path: self.pdf.unwrap_or_default(),
            subject: self.subject,
            run_mode: self.mode,
            tutor_mode: self.tutor,
            pages: self.pages,
            pages_dir: self.pages_dir,
            answer_source,
            answers_file: self.answers,
            second_answers_file: self.second_answers,
            correct_answers: self.correct_answers,
            resume: self.resume,
        };
        Ok((config, options))
    }
}
