//! 报告渲染服务 - 业务能力层
//!
//! 只负责"把定稿的会话结果渲染成文本"，不关心流程，也不负责落盘。
//! 失败项和跳过项都要在报告里明确列出，不能静默省略。

use std::fmt::Write as _;

use anyhow::Result;

use crate::models::diagnosis::{
    CombinedExplanation, ContrastiveAnalysis, DiagnosisPayload, DiagnosisResult, OptionNote, ScaffoldState,
    ScaffoldedPayload, TutorMode, Verdict,
};
use crate::models::question::Question;
use crate::models::session::{SessionResult, SessionSummary};
use crate::models::store::{QuestionEntry, QuestionStatus};
use crate::services::evaluator::normalize_label;

/// 报告渲染器
pub trait ReportRenderer: Send + Sync {
    fn render(&self, result: &SessionResult) -> Result<String>;
}

/// Markdown 报告
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownReport;

impl ReportRenderer for MarkdownReport {
    fn render(&self, result: &SessionResult) -> Result<String> {
        let mut out = String::new();
        let header = &result.header;

        writeln!(out, "# 试卷诊断报告")?;
        writeln!(out)?;
        writeln!(out, "- 会话: `{}`", header.session_id)?;
        writeln!(out, "- 试卷: `{}`", header.pdf_path)?;
        writeln!(out, "- 科目: {} | 诊断模式: {}", header.subject, header.tutor_mode)?;
        writeln!(
            out,
            "- 完成时间: {}",
            result.finalized_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        let info = &result.transcription;
        if !info.failed_pages.is_empty() {
            writeln!(
                out,
                "- ⚠️ 抽题失败的页: {}",
                join_pages(&info.failed_pages)
            )?;
        }
        writeln!(out)?;

        render_summary(&mut out, &result.summary)?;
        if header.tutor_mode == TutorMode::C {
            render_scaffold_summary(&mut out, &result.summary)?;
        }

        writeln!(out, "## 逐题详情")?;
        writeln!(out)?;
        for entry in &result.questions {
            render_entry(&mut out, entry)?;
        }
        Ok(out)
    }
}

fn join_pages(pages: &[u32]) -> String {
    pages.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
}

fn id_list(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(", ")
    }
}

fn render_summary(out: &mut String, summary: &SessionSummary) -> Result<()> {
    writeln!(out, "## 汇总")?;
    writeln!(out)?;
    writeln!(out, "| 项目 | 数值 |")?;
    writeln!(out, "|---|---|")?;
    writeln!(out, "| 题目总数 | {} |", summary.total)?;
    writeln!(out, "| 已作答 | {} |", summary.answered)?;
    writeln!(out, "| 答对 | {} |", summary.correct)?;
    writeln!(out, "| 正确率 | {:.1}% |", summary.accuracy * 100.0)?;
    writeln!(out, "| 答错 | {} |", id_list(&summary.missed))?;
    writeln!(out, "| 跳过 | {} |", id_list(&summary.skipped))?;
    writeln!(out, "| 未解出 | {} |", id_list(&summary.unsolved))?;
    writeln!(out, "| 无法解析 | {} |", id_list(&summary.unparseable))?;
    if !summary.incomplete.is_empty() {
        writeln!(out, "| 未完成 | {} |", id_list(&summary.incomplete))?;
    }
    if !summary.failed.is_empty() {
        writeln!(out, "| 诊断失败 | {} |", id_list(&summary.failed))?;
    }
    writeln!(out)?;
    Ok(())
}

fn render_scaffold_summary(out: &mut String, summary: &SessionSummary) -> Result<()> {
    let Some(scaffold) = &summary.scaffold else {
        return Ok(());
    };
    writeln!(out, "## 分步引导")?;
    writeln!(out)?;
    writeln!(
        out,
        "- 首次答错: {} 题 ({})",
        scaffold.first_attempt_wrong_count,
        id_list(&scaffold.first_attempt_wrong_ids)
    )?;
    writeln!(
        out,
        "- 提示后答对: {} 题 ({})",
        scaffold.recovered_count,
        id_list(&scaffold.recovered_ids)
    )?;
    writeln!(out, "- 未完成第二次作答: {}", id_list(&scaffold.incomplete_ids))?;
    writeln!(out)?;
    Ok(())
}

fn status_label(status: QuestionStatus) -> &'static str {
    match status {
        QuestionStatus::Correct => "✅ 正确",
        QuestionStatus::Incorrect => "❌ 错误",
        QuestionStatus::Unparseable => "⚠️ 作答无法解析",
        QuestionStatus::Incomplete => "⏳ 未完成",
        QuestionStatus::Skipped => "⏭ 跳过",
        QuestionStatus::Unsolved => "⚠️ 未解出",
        QuestionStatus::Failed => "⚠️ 诊断失败",
        QuestionStatus::Answered => "已作答",
        QuestionStatus::Solved => "已解出",
        QuestionStatus::Extracted => "已抽取",
    }
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Correct => "正确",
        Verdict::Incorrect => "错误",
        Verdict::Unparseable => "无法解析",
    }
}

fn render_entry(out: &mut String, entry: &QuestionEntry) -> Result<()> {
    let question = &entry.question;
    writeln!(
        out,
        "### {} (第 {} 页) {}",
        question.id,
        question.source.page,
        status_label(entry.status())
    )?;
    writeln!(out)?;
    writeln!(out, "{}", question.stem)?;
    writeln!(out)?;

    let canonical = entry.solve.as_ref().map(|s| s.canonical_answer.as_str());
    let submitted = entry.attempt(1).map(|a| a.submitted_answer.as_str());
    render_choices(out, question, canonical, submitted)?;

    if let Some(solve) = &entry.solve {
        writeln!(out, "- 标准答案: **{}**", solve.canonical_answer)?;
        if let Some(topic) = &solve.topic {
            writeln!(out, "- 知识点: {}", topic)?;
        }
    }
    if let Some(error) = &entry.solve_error {
        writeln!(out, "- ⚠️ 解题失败: {}", error)?;
    }
    if entry.skipped {
        writeln!(out, "- 未作答")?;
    }
    if let Some(diagnosis) = &entry.diagnosis {
        for attempt in &diagnosis.attempts {
            writeln!(
                out,
                "- 第 {} 次作答: `{}` ({})",
                attempt.attempt_number,
                attempt.submitted_answer,
                verdict_label(attempt.verdict)
            )?;
        }
    } else {
        for answer in &entry.answers {
            writeln!(out, "- 第 {} 次作答: `{}`", answer.attempt_number, answer.submitted_answer)?;
        }
    }
    if let Some(error) = &entry.diagnosis_error {
        writeln!(out, "- ⚠️ 诊断失败: {}", error)?;
    }

    if let Some(solve) = &entry.solve {
        if !solve.steps.is_empty() {
            writeln!(out)?;
            writeln!(out, "**解题步骤**")?;
            writeln!(out)?;
            for (i, step) in solve.steps.iter().enumerate() {
                writeln!(out, "{}. {}", i + 1, step)?;
            }
        }
    }

    if let Some(diagnosis) = &entry.diagnosis {
        render_payload(out, diagnosis)?;
    }
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out)?;
    Ok(())
}

/// 选项列表：✓ 标正确答案，← 标学生选择
fn render_choices(out: &mut String, question: &Question, canonical: Option<&str>, submitted: Option<&str>) -> Result<()> {
    let Some(choices) = &question.choices else {
        return Ok(());
    };
    let canonical = canonical.map(normalize_label);
    let submitted = submitted.map(normalize_label);
    for (label, text) in choices {
        let mut line = format!("- ({}) {}", label, text.as_deref().unwrap_or("?"));
        if canonical.as_deref() == Some(label.as_str()) {
            line.push_str(" ✓");
        }
        if submitted.as_deref() == Some(label.as_str()) {
            line.push_str(" ← 你的选择");
        }
        writeln!(out, "{}", line)?;
    }
    writeln!(out)?;
    Ok(())
}

fn render_payload(out: &mut String, diagnosis: &DiagnosisResult) -> Result<()> {
    match &diagnosis.payload {
        DiagnosisPayload::Direct(payload) => {
            writeln!(out)?;
            writeln!(out, "> {}", payload.one_line_summary)?;
        }
        DiagnosisPayload::Contrastive(payload) => {
            if let Some(confirmation) = &payload.confirmation {
                writeln!(out)?;
                writeln!(out, "> {}", confirmation)?;
            }
            if let Some(analysis) = &payload.analysis {
                render_contrastive(out, analysis)?;
            }
        }
        DiagnosisPayload::Scaffolded(payload) => render_scaffolded(out, payload)?,
    }
    Ok(())
}

fn render_contrastive(out: &mut String, analysis: &ContrastiveAnalysis) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "**为什么会选错**: {}", analysis.why_tempting)?;
    if !analysis.misconceptions.is_empty() {
        writeln!(out)?;
        writeln!(out, "**可能的误区**")?;
        writeln!(out)?;
        for m in &analysis.misconceptions {
            match &m.code {
                Some(code) => writeln!(out, "- `{}` {}: {}", code, m.name, m.description)?,
                None => writeln!(out, "- {}: {}", m.name, m.description)?,
            }
        }
    }
    writeln!(out)?;
    writeln!(out, "**正确思路**: {}", analysis.comparative_explanation)?;
    render_option_notes(out, &analysis.option_notes)
}

fn render_scaffolded(out: &mut String, payload: &ScaffoldedPayload) -> Result<()> {
    if payload.state == ScaffoldState::FirstAttemptCorrect {
        writeln!(out)?;
        writeln!(out, "> 第一次就答对了")?;
        return Ok(());
    }
    if let Some(analysis) = &payload.error_analysis {
        writeln!(out)?;
        writeln!(out, "**错误分析**: {}", analysis)?;
    }
    if !payload.hints.is_empty() {
        writeln!(out)?;
        writeln!(out, "**分步提示**")?;
        writeln!(out)?;
        for (i, hint) in payload.hints.iter().enumerate() {
            writeln!(out, "{}. {}（依据: {}）", i + 1, hint.action, hint.evidence_location)?;
            writeln!(out, "   - 想一想: {}", hint.guiding_question)?;
            writeln!(out, "   - 应得出: {}", hint.expected_conclusion)?;
        }
    }
    match (&payload.explanation, payload.state) {
        (Some(explanation), _) => render_explanation(out, explanation)?,
        (None, ScaffoldState::Incomplete) => {
            writeln!(out)?;
            writeln!(out, "> 没有收到第二次作答")?;
        }
        _ => {}
    }
    Ok(())
}

fn render_explanation(out: &mut String, explanation: &CombinedExplanation) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "**综合讲解**: {}", explanation.combined_explanation)?;
    writeln!(out, "- 第一次的错误: {}", explanation.first_mistake)?;
    if let Some(second) = &explanation.second_mistake {
        writeln!(out, "- 第二次的错误: {}", second)?;
    }
    render_option_notes(out, &explanation.option_notes)
}

fn render_option_notes(out: &mut String, notes: &[OptionNote]) -> Result<()> {
    if notes.is_empty() {
        return Ok(());
    }
    writeln!(out)?;
    writeln!(out, "| 选项 | 内容 | 点评 |")?;
    writeln!(out, "|---|---|---|")?;
    for note in notes {
        let mut option = note.option.clone();
        if note.is_correct {
            option.push_str(" ✓");
        }
        if note.is_user_choice {
            option.push_str(" ←");
        }
        writeln!(
            out,
            "| {} | {} | {} |",
            option,
            note.content.replace('|', "\\|"),
            note.analysis.replace('|', "\\|")
        )?;
    }
    Ok(())
}
