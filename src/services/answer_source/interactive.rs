//! 终端交互作答
//!
//! 逐题显示题干和选项，读一行作答：回车跳过，`q` 退出（已收集的作答保留），
//! 选择题输入不在选项里时重新输入，输入流结束视为中断。

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tracing::info;

use crate::error::AppError;
use crate::models::answer::AnswerRecord;
use crate::services::answer_source::{AnswerBatch, AnswerRequest, AnswerSource};
use crate::services::evaluator::normalize_label;

/// 终端作答
pub struct InteractiveSource<R, W> {
    reader: R,
    writer: W,
}

impl InteractiveSource<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

enum Input {
    Answer(String),
    Skip,
    Quit,
    Eof,
}

impl<R, W> InteractiveSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    async fn write(&mut self, text: &str) -> Result<(), AppError> {
        self.writer
            .write_all(text.as_bytes())
            .await
            .map_err(|e| AppError::file("<stdout>", e))?;
        self.writer.flush().await.map_err(|e| AppError::file("<stdout>", e))
    }

    async fn read_input(&mut self, labels: &[&str]) -> Result<Input, AppError> {
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| AppError::file("<stdin>", e))?;
            if n == 0 {
                return Ok(Input::Eof);
            }
            let answer = line.trim();
            if answer.is_empty() {
                return Ok(Input::Skip);
            }
            if answer.eq_ignore_ascii_case("q") || answer.eq_ignore_ascii_case("quit") {
                return Ok(Input::Quit);
            }
            if !labels.is_empty() && !labels.iter().any(|l| l.eq_ignore_ascii_case(&normalize_label(answer))) {
                self.write(&format!("无效选项，请输入 {}: ", labels.join("/"))).await?;
                continue;
            }
            return Ok(Input::Answer(answer.to_string()));
        }
    }

    fn render(index: usize, total: usize, request: &AnswerRequest<'_>) -> String {
        let question = request.question;
        let mut out = format!("\n{}\n题目 {}/{} [{}]\n", "-".repeat(60), index, total, question.id);
        if let Some(passage) = &question.passage_context {
            out.push_str(&format!("{}\n\n", passage));
        }
        out.push_str(&format!("{}\n", question.stem));
        for label in question.choice_labels() {
            out.push_str(&format!("  ({}) {}\n", label, question.choice_text(label).unwrap_or("")));
        }
        if let Some(previous) = request.previous {
            out.push_str(&format!("\n上次作答: {}\n", previous));
        }
        if let Some(hints) = request.hints {
            out.push_str("提示:\n");
            for (i, hint) in hints.iter().enumerate() {
                out.push_str(&format!(
                    "  {}. {}\n     去看: {}\n     想一想: {}\n",
                    i + 1,
                    hint.action,
                    hint.evidence_location,
                    hint.guiding_question
                ));
            }
        }
        out.push_str("你的答案 (回车跳过, q 退出): ");
        out
    }
}

#[async_trait]
impl<R, W> AnswerSource for InteractiveSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "interactive"
    }

    async fn collect(&mut self, attempt: u8, requests: &[AnswerRequest<'_>]) -> Result<AnswerBatch, AppError> {
        let mut batch = AnswerBatch::default();
        let total = requests.len();
        if attempt > 1 && total > 0 {
            self.write(&format!("\n第 {} 次作答：以下 {} 道题请参考提示再试一次\n", attempt, total))
                .await?;
        }

        for (i, request) in requests.iter().enumerate() {
            self.write(&Self::render(i + 1, total, request)).await?;
            let labels: Vec<&str> = if request.question.is_multiple_choice() {
                request.question.choice_labels()
            } else {
                Vec::new()
            };
            match self.read_input(&labels).await? {
                Input::Answer(answer) => {
                    batch.insert(AnswerRecord::new(&request.question.id, answer, attempt));
                }
                Input::Skip => {}
                Input::Quit => {
                    info!("⏹ 已退出作答，剩余 {} 道题跳过", total - i - 1);
                    batch.cancelled = true;
                    break;
                }
                Input::Eof => {
                    info!("⏹ 输入结束，剩余 {} 道题跳过", total - i);
                    batch.cancelled = true;
                    break;
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{ProblemType, Question};

    fn questions() -> Vec<Question> {
        vec![
            Question::new("p1_q1", "exam.pdf", 1, "x + 5 = 12").with_choices([("A", "5"), ("B", "7")]),
            Question::new("p1_q2", "exam.pdf", 1, "2 * 7").with_problem_type(ProblemType::NumericEntry),
            Question::new("p1_q3", "exam.pdf", 1, "3 * 3").with_problem_type(ProblemType::NumericEntry),
        ]
    }

    #[tokio::test]
    async fn test_reprompts_invalid_label_and_skips_blank() {
        let input = tokio_test::io::Builder::new()
            .read(b"Z\n")
            .read(b"b\n")
            .read(b"\n")
            .read(b"9\n")
            .build();
        let mut source = InteractiveSource::new(BufReader::new(input), tokio::io::sink());
        let qs = questions();
        let requests: Vec<_> = qs.iter().map(AnswerRequest::first).collect();

        let batch = source.collect(1, &requests).await.unwrap();
        assert!(!batch.cancelled);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records["p1_q1"].submitted_answer, "b");
        assert_eq!(batch.records["p1_q3"].submitted_answer, "9");
        assert!(!batch.records.contains_key("p1_q2"));
    }

    #[tokio::test]
    async fn test_quit_keeps_collected_answers() {
        let input = tokio_test::io::Builder::new().read(b"A\nq\n").build();
        let mut source = InteractiveSource::new(BufReader::new(input), tokio::io::sink());
        let qs = questions();
        let requests: Vec<_> = qs.iter().map(AnswerRequest::first).collect();

        let batch = source.collect(1, &requests).await.unwrap();
        assert!(batch.cancelled);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records["p1_q1"].attempt_number, 1);
    }

    #[tokio::test]
    async fn test_eof_cancels() {
        let input = tokio_test::io::Builder::new().build();
        let mut source = InteractiveSource::new(BufReader::new(input), tokio::io::sink());
        let qs = questions();
        let requests: Vec<_> = qs.iter().map(AnswerRequest::first).collect();

        let batch = source.collect(1, &requests).await.unwrap();
        assert!(batch.cancelled);
        assert!(batch.records.is_empty());
    }
}
