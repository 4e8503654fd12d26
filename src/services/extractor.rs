//! 抽题服务 - 业务能力层
//!
//! - 数学：逐页把图片交给视觉模型直接抽题（页间并发）
//! - 英语：逐页 OCR 成文本，合并后用文本模型一次抽题
//!
//! 题目编号在这里一次性分配，格式 `p{页码}_q{页内序号}`，之后各阶段只读。
//! 单页失败只记录，不中止；一道题都没有抽到时返回 `ExtractionEmpty`。

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::infrastructure::PageImage;
use crate::models::question::{question_id, Question, Subject};
use crate::models::session::TranscriptionInfo;
use crate::services::prompts;
use crate::services::schemas::{ExtractionSchema, RawQuestion};
use crate::services::validator::Validator;
use crate::utils::tasks::map_bounded;

/// 抽题结果
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub questions: Vec<Question>,
    pub info: TranscriptionInfo,
    /// 英语卷的 OCR 全文
    pub ocr_text: Option<String>,
}

/// 抽题服务
pub struct QuestionExtractor {
    validator: Arc<Validator>,
    subject: Subject,
    pdf_name: String,
    temperature: f32,
    max_concurrent: usize,
}

impl QuestionExtractor {
    pub fn new(
        validator: Arc<Validator>,
        subject: Subject,
        pdf_name: impl Into<String>,
        temperature: f32,
        max_concurrent: usize,
    ) -> Self {
        Self {
            validator,
            subject,
            pdf_name: pdf_name.into(),
            temperature,
            max_concurrent,
        }
    }

    /// 抽取全部页面
    pub async fn extract(&self, images: &[PageImage], total_pages: u32) -> Result<ExtractionOutput, PipelineError> {
        let mut info = TranscriptionInfo {
            total_pages,
            ..Default::default()
        };

        let (raw, ocr_text) = if self.subject.uses_ocr_text() {
            self.extract_via_ocr(images, &mut info).await?
        } else {
            (self.extract_via_vision(images, &mut info).await?, None)
        };

        let mut questions = assign_ids(&self.pdf_name, self.subject, raw);
        questions.sort_by_key(|q| q.order_key());
        if questions.is_empty() {
            error!("❌ 共 {} 页，未抽取到任何题目", images.len());
            return Err(PipelineError::ExtractionEmpty { pages: images.len() });
        }

        let uncertain = questions.iter().filter(|q| !q.uncertain_spans.is_empty()).count();
        info!(
            "✓ 抽题完成: {} 道题，成功页 {}，失败页 {}，含不确定片段 {} 道",
            questions.len(),
            info.processed_pages.len(),
            info.failed_pages.len(),
            uncertain
        );
        Ok(ExtractionOutput {
            questions,
            info,
            ocr_text,
        })
    }

    async fn extract_via_vision(
        &self,
        images: &[PageImage],
        info: &mut TranscriptionInfo,
    ) -> Result<Vec<(u32, RawQuestion)>, PipelineError> {
        let subject = self.subject;
        let temperature = self.temperature;
        let results = map_bounded(images.to_vec(), self.max_concurrent, |image| {
            let validator = self.validator.clone();
            async move {
                let url = image.to_data_url().await?;
                let request = prompts::extract_page(subject, image.page, url, temperature);
                validator.request(request, &ExtractionSchema).await
            }
        })
        .await;

        let mut raw = Vec::new();
        for (image, result) in images.iter().zip(results) {
            match flatten(result) {
                Ok(questions) => {
                    info!("[第 {} 页] ✓ 抽取到 {} 道题", image.page, questions.len());
                    info.processed_pages.push(image.page);
                    raw.extend(questions.into_iter().map(|q| (image.page, q)));
                }
                Err(e) => {
                    if e.is_run_fatal(self.validator.is_offline()) {
                        return Err(e);
                    }
                    warn!("[第 {} 页] ⚠️ 抽题失败: {}", image.page, e);
                    info.failed_pages.push(image.page);
                    info.errors.push(format!("page {}: {}", image.page, e));
                }
            }
        }
        Ok(raw)
    }

    async fn extract_via_ocr(
        &self,
        images: &[PageImage],
        info: &mut TranscriptionInfo,
    ) -> Result<(Vec<(u32, RawQuestion)>, Option<String>), PipelineError> {
        let results = map_bounded(images.to_vec(), self.max_concurrent, |image| {
            let validator = self.validator.clone();
            async move {
                let url = image.to_data_url().await?;
                validator.complete_text(&prompts::ocr_page(image.page, url)).await
            }
        })
        .await;

        let mut pages_text = Vec::new();
        for (image, result) in images.iter().zip(results) {
            match flatten(result) {
                Ok(text) => {
                    info.processed_pages.push(image.page);
                    pages_text.push(format!("=== Page {} ===\n{}", image.page, text.trim()));
                }
                Err(e) => {
                    if e.is_run_fatal(self.validator.is_offline()) {
                        return Err(e);
                    }
                    warn!("[第 {} 页] ⚠️ OCR 失败: {}", image.page, e);
                    info.failed_pages.push(image.page);
                    info.errors.push(format!("page {}: {}", image.page, e));
                }
            }
        }
        if pages_text.is_empty() {
            return Ok((Vec::new(), None));
        }

        let text = pages_text.join("\n\n");
        let first_page = info.processed_pages.iter().copied().min().unwrap_or(1);
        let request = prompts::extract_text(self.subject, &text, self.temperature);
        let raw = match self.validator.request(request, &ExtractionSchema).await {
            Ok(questions) => questions
                .into_iter()
                .map(|q| {
                    let page = q
                        .page
                        .filter(|p| info.processed_pages.contains(p))
                        .unwrap_or(first_page);
                    (page, q)
                })
                .collect(),
            Err(e) if e.is_run_fatal(self.validator.is_offline()) => return Err(e),
            Err(e) => {
                warn!("⚠️ 从 OCR 文本抽题失败: {}", e);
                info.errors.push(format!("text extraction: {}", e));
                Vec::new()
            }
        };
        Ok((raw, Some(text)))
    }
}

fn flatten<T>(result: Result<Result<T, PipelineError>, tokio::task::JoinError>) -> Result<T, PipelineError> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(PipelineError::GatewayTransient(crate::error::GatewayError::Transport(
            format!("任务执行失败: {}", e),
        ))),
    }
}

/// 分配题目编号：同页按出现顺序编号，页码 + 页内序号保证唯一
pub fn assign_ids(pdf: &str, subject: Subject, raw: Vec<(u32, RawQuestion)>) -> Vec<Question> {
    let mut per_page: BTreeMap<u32, u32> = BTreeMap::new();
    let mut questions = Vec::with_capacity(raw.len());

    for (page, q) in raw {
        let counter = per_page.entry(page).or_insert(0);
        *counter += 1;
        let id = question_id(page, *counter);

        let mut question = Question::new(id, pdf, page, q.stem);
        question.subject = subject;
        question.problem_type = q.problem_type;
        question.choices = q.choices;
        question.latex_equations = q.latex_equations;
        question.diagram_description = q.diagram_description;
        question.constraints = q.constraints;
        question.uncertain_spans = q.uncertain_spans;
        question.confidence = q.confidence;
        question.passage_context = q.passage_context;
        question.question_category = q.question_category;
        questions.push(question);
    }
    questions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockGateway, Stage};
    use crate::config::ValidatorConfig;
    use crate::error::GatewayError;
    use serde_json::json;

    fn pages(dir: &std::path::Path, n: u32) -> Vec<PageImage> {
        (1..=n)
            .map(|page| {
                let path = dir.join(format!("page_{}.png", page));
                std::fs::write(&path, b"png").unwrap();
                PageImage { page, path }
            })
            .collect()
    }

    fn extractor(mock: Arc<MockGateway>, subject: Subject) -> QuestionExtractor {
        let validator = Arc::new(Validator::new(mock, &ValidatorConfig::default()));
        QuestionExtractor::new(validator, subject, "exam.pdf", 0.0, 2)
    }

    #[tokio::test]
    async fn test_vision_extraction_assigns_ids_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockGateway::new());
        let output = extractor(mock.clone(), Subject::Math)
            .extract(&pages(dir.path(), 2), 2)
            .await
            .unwrap();

        let ids: Vec<_> = output.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["p1_q1", "p2_q1"]);
        assert_eq!(output.info.processed_pages, vec![1, 2]);
        assert_eq!(mock.call_count(Stage::Extract), 2);
        assert!(mock.calls()[0].images[0].starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_ids_count_per_page_when_pages_interleave() {
        use crate::services::validator::Schema;
        let raw = |stem: &str| ExtractionSchema.parse(json!({"stem": stem})).unwrap().remove(0);
        let questions = assign_ids(
            "exam.pdf",
            Subject::English,
            vec![(1, raw("a")), (2, raw("b")), (1, raw("c")), (2, raw("d"))],
        );
        let ids: Vec<_> = questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["p1_q1", "p2_q1", "p1_q2", "p2_q2"]);
        assert_eq!(questions[2].stem, "c");
        assert_eq!(questions[2].source.page, 1);
    }

    #[tokio::test]
    async fn test_failed_page_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockGateway::new());
        mock.push_error(Stage::Extract, GatewayError::Transport("reset".into()));
        let output = extractor(mock, Subject::Math)
            .extract(&pages(dir.path(), 2), 2)
            .await
            .unwrap();
        assert_eq!(output.questions.len(), 1);
        assert_eq!(output.info.failed_pages.len(), 1);
        assert_eq!(output.info.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_no_questions_is_extraction_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockGateway::new());
        mock.push_json(Stage::Extract, json!({"questions": []}));
        let err = extractor(mock, Subject::Math)
            .extract(&pages(dir.path(), 1), 1)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::ExtractionEmpty { pages: 1 });
    }

    #[tokio::test]
    async fn test_english_goes_through_ocr_text() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockGateway::new());
        mock.push_json(
            Stage::Extract,
            json!({"questions": [
                {"page": 2, "stem": "Choose the best word.", "choices": {"A": "x", "B": "y"}},
                {"page": 2, "stem": "Second one.", "choices": {"A": "x", "B": "y"}}
            ]}),
        );
        let output = extractor(mock.clone(), Subject::English)
            .extract(&pages(dir.path(), 2), 2)
            .await
            .unwrap();

        assert_eq!(mock.call_count(Stage::Ocr), 2);
        assert_eq!(mock.call_count(Stage::Extract), 1);
        let text = output.ocr_text.unwrap();
        assert!(text.contains("=== Page 1 ===") && text.contains("=== Page 2 ==="));
        let ids: Vec<_> = output.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["p2_q1", "p2_q2"]);
        assert_eq!(output.questions[0].subject, Subject::English);
    }
}
