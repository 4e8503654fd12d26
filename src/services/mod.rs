//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，处理单个单元（一页、一道题、一次作答），不关心流程顺序。

pub mod answer_source;
pub mod evaluator;
pub mod extractor;
pub mod prompts;
pub mod report_writer;
pub mod schemas;
pub mod solver;
pub mod validator;

pub use answer_source::{AnswerBatch, AnswerRequest, AnswerSource, AnswerSourceKind};
pub use evaluator::AnswerEvaluator;
pub use extractor::{ExtractionOutput, QuestionExtractor};
pub use report_writer::{MarkdownReport, ReportRenderer};
pub use solver::Solver;
pub use validator::{Schema, Validator};
