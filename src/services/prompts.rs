//! 提示词构造
//!
//! 每个阶段一个函数，返回可以直接交给网关的 `LlmRequest`。

use crate::clients::{LlmRequest, ModelRole, Stage};
use crate::models::diagnosis::HintStep;
use crate::models::question::{ProblemType, Question, Subject};
use crate::models::solve::SolveResult;
use crate::models::taxonomy::catalogue_prompt;
use crate::services::answer_source::AnswerRequest;

const JSON_ONLY: &str = "Output strict JSON format, no other text.";

/// 题目的文本表示（解题、诊断共用）
pub fn render_question(question: &Question) -> String {
    let mut out = format!("Question ID: {}\n", question.id);
    if let Some(passage) = &question.passage_context {
        out.push_str(&format!("Passage:\n{}\n\n", passage));
    }
    out.push_str(&format!("Stem: {}\n", question.stem));
    if !question.latex_equations.is_empty() {
        out.push_str(&format!("Equations: {}\n", question.latex_equations.join("; ")));
    }
    if let Some(diagram) = &question.diagram_description {
        out.push_str(&format!("Diagram: {}\n", diagram));
    }
    if !question.constraints.is_empty() {
        out.push_str(&format!("Constraints: {}\n", question.constraints.join("; ")));
    }
    if question.is_multiple_choice() {
        out.push_str("Choices:\n");
        for label in question.choice_labels() {
            let text = question.choice_text(label).unwrap_or("(unreadable)");
            out.push_str(&format!("({}) {}\n", label, text));
        }
    } else {
        out.push_str("Answer format: numeric entry\n");
    }
    out
}

fn problem_type_name(question: &Question) -> &'static str {
    if question.is_multiple_choice() {
        "multiple_choice"
    } else {
        match question.problem_type {
            ProblemType::NumericEntry => "numeric_entry",
            _ => "unknown",
        }
    }
}

// ========== 抽题 ==========

/// 页面图片转文本（英语卷）
pub fn ocr_page(page: u32, image_url: String) -> LlmRequest {
    LlmRequest::new(
        Stage::Ocr,
        ModelRole::Vision,
        format!(
            "Transcribe page {} of an exam paper. Keep the reading order, question numbers, \
             passages and option labels exactly as printed. Output plain text only.",
            page
        ),
    )
    .with_images(vec![image_url])
    .with_temperature(0.0)
}

fn extraction_system(subject: Subject) -> String {
    let subject_rules = match subject {
        Subject::Math => {
            "Transcribe every formula in LaTeX into `latex_equations`. Describe figures, tables \
             and graphs in `diagram_description` with all labelled values."
        }
        Subject::English => {
            "Reading questions share a passage: copy the full passage into `passage_context` \
             for every question that depends on it. Fill `question_category` with the question \
             kind (reading, sentence equivalence, text completion, ...)."
        }
    };
    format!(
        "You transcribe exam questions into structured data. Never solve the questions. \
         Record every unclear word or symbol in `uncertain_spans` instead of guessing silently, \
         and lower `confidence` accordingly. {} {}",
        subject_rules, JSON_ONLY
    )
}

const EXTRACTION_SHAPE: &str = concat!(
    "Return {\"questions\": [...]} where each item has: problem_type (multiple_choice | numeric_entry | unknown), ",
    "stem, choices (object label -> text, omit for numeric entry), latex_equations, diagram_description, ",
    "constraints, uncertain_spans [{span, reason, location}], confidence (0-1), passage_context, question_category. ",
    "Return {\"questions\": []} if the page contains no questions."
);

/// 直接从页面图片抽题
pub fn extract_page(subject: Subject, page: u32, image_url: String, temperature: f32) -> LlmRequest {
    LlmRequest::new(
        Stage::Extract,
        ModelRole::Vision,
        format!(
            "Extract every question on page {} in printed order.\n{}",
            page, EXTRACTION_SHAPE
        ),
    )
    .with_system(extraction_system(subject))
    .with_images(vec![image_url])
    .with_temperature(temperature)
}

/// 从 OCR 文本抽题
pub fn extract_text(subject: Subject, pages_text: &str, temperature: f32) -> LlmRequest {
    LlmRequest::new(
        Stage::Extract,
        ModelRole::Text,
        format!(
            "Extract every question from the exam text below in printed order. Each page starts \
             with a line `=== Page N ===`; set `page` to that N for every question.\n{}\n\n{}",
            EXTRACTION_SHAPE, pages_text
        ),
    )
    .with_system(extraction_system(subject))
    .with_temperature(temperature)
}

// ========== 解题 ==========

/// 解题
pub fn solve(question: &Question, temperature: f32) -> LlmRequest {
    let answer_rule = if question.is_multiple_choice() {
        "`correct_answer` must be exactly one of the option labels."
    } else {
        "`correct_answer` must be the final value only, without units or explanation."
    };
    LlmRequest::new(
        Stage::Solve,
        ModelRole::Text,
        format!(
            "{}\nSolve the question. {}\nReturn {{\"question_id\", \"correct_answer\", \"topic\", \
             \"key_steps\" (1-10 short steps), \"final_reason\", \"confidence\"}}.",
            render_question(question),
            answer_rule
        ),
    )
    .with_system(format!(
        "You are a careful exam solver. Work step by step and double-check the arithmetic. {}",
        JSON_ONLY
    ))
    .with_temperature(temperature)
}

// ========== 诊断 ==========

fn solution_block(solve: &SolveResult) -> String {
    let steps = solve
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Correct answer: {}\nReference solution:\n{}\n", solve.canonical_answer, steps)
}

fn describe_answer(question: &Question, answer: &str) -> String {
    match question.choice_text(answer) {
        Some(text) => format!("{} ({})", answer, text),
        None => answer.to_string(),
    }
}

/// 模式 B：对比诊断
pub fn contrastive(question: &Question, solve: &SolveResult, submitted: &str, temperature: f32) -> LlmRequest {
    LlmRequest::new(
        Stage::Diagnose,
        ModelRole::Text,
        format!(
            "{}\n{}\nStudent answer: {}\n\n{}\n\n\
             Explain why the student's answer is tempting, list 1-3 likely misconceptions (most likely first), \
             and compare the student's path with the correct one. For multiple choice, add one note per option.\n\
             Return {{\"why_tempting\", \"misconceptions\": [{{\"code\", \"name\", \"description\"}}], \
             \"comparative_explanation\", \"option_notes\": [{{\"option\", \"content\", \"analysis\"}}]}}.",
            render_question(question),
            solution_block(solve),
            describe_answer(question, submitted),
            catalogue_prompt(solve.topic.as_deref())
        ),
    )
    .with_system(format!(
        "You are a patient tutor who diagnoses wrong answers by contrasting them with the correct path. {}",
        JSON_ONLY
    ))
    .with_temperature(temperature)
}

/// 模式 C 第一阶段：分步提示（不能透露答案）
pub fn hints(question: &Question, solve: &SolveResult, submitted: &str, temperature: f32) -> LlmRequest {
    LlmRequest::new(
        Stage::Hint,
        ModelRole::Text,
        format!(
            "{}\n{}\nStudent's first answer (wrong): {}\n\n\
             Analyse the error, then write 1-6 hint steps that lead the student back to the question. \
             Each step needs: action (what to re-read or re-derive), evidence_location (where to look), \
             guiding_question, expected_conclusion (the understanding to reach, never the answer itself).\n\
             Do NOT mention the correct option label, its text or the final value anywhere.\n\
             Return {{\"error_analysis\", \"hints\": [{{\"action\", \"evidence_location\", \"guiding_question\", \"expected_conclusion\"}}]}}.",
            render_question(question),
            solution_block(solve),
            describe_answer(question, submitted)
        ),
    )
    .with_system(format!(
        "You are a Socratic tutor. The student must find the answer on their own. {}",
        JSON_ONLY
    ))
    .with_temperature(temperature)
}

/// 模式 C 第二阶段：综合讲解两次作答
pub fn explanation(
    question: &Question,
    solve: &SolveResult,
    first: &str,
    second: &str,
    second_wrong: bool,
    hints: &[HintStep],
    temperature: f32,
) -> LlmRequest {
    let hint_lines = hints
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {} ({})", i + 1, h.action, h.guiding_question))
        .collect::<Vec<_>>()
        .join("\n");
    let second_rule = if second_wrong {
        "The second answer is still wrong: also explain it in `second_mistake`."
    } else {
        "The second answer is correct: do not include `second_mistake`."
    };
    LlmRequest::new(
        Stage::Explain,
        ModelRole::Text,
        format!(
            "{}\n{}\nFirst answer: {}\nHints given:\n{}\nSecond answer: {}\n\n\
             Write one explanation covering both attempts. {}\n\
             Return {{\"combined_explanation\", \"first_mistake\", \"second_mistake\", \
             \"option_notes\": [{{\"option\", \"analysis\"}}]}}.",
            render_question(question),
            solution_block(solve),
            describe_answer(question, first),
            hint_lines,
            describe_answer(question, second),
            second_rule
        ),
    )
    .with_system(format!("You are a patient tutor wrapping up a guided attempt. {}", JSON_ONLY))
    .with_temperature(temperature)
}

// ========== 模拟学生 ==========

/// 模拟学生作答：`mistakes` 中的题目要求答错
pub fn simulate(requests: &[AnswerRequest<'_>], mistakes: &[&str], temperature: f32) -> LlmRequest {
    let mut items = String::new();
    for request in requests {
        let q = request.question;
        items.push_str(&format!("ID: {} ({})\n", q.id, problem_type_name(q)));
        items.push_str(&format!("Stem: {}\n", q.stem));
        if q.is_multiple_choice() {
            for label in q.choice_labels() {
                items.push_str(&format!("({}) {}\n", label, q.choice_text(label).unwrap_or("")));
            }
        }
        if let Some(previous) = request.previous {
            items.push_str(&format!("Your previous answer: {}\n", previous));
        }
        for (i, hint) in request.hints.unwrap_or_default().iter().enumerate() {
            items.push_str(&format!(
                "Hint {}: {} (look at: {}) {}\n",
                i + 1,
                hint.action,
                hint.evidence_location,
                hint.guiding_question
            ));
        }
        if mistakes.contains(&q.id.as_str()) {
            items.push_str("Instruction: make a realistic mistake on this one.\n");
        }
        items.push('\n');
    }
    let hinted = requests.iter().any(|r| r.hints.is_some());
    let context = if hinted {
        "You already answered these once, got them wrong and received hints. Use the hints and try again."
    } else {
        "Answer each question as a student would."
    };
    LlmRequest::new(
        Stage::Simulate,
        ModelRole::Student,
        format!(
            "{}\n\n{}Return an object keyed by question ID: \
             {{\"<id>\": {{\"thought_process\", \"made_mistake\", \"answer\"}}}}. \
             For multiple choice answer with the option label only.",
            context, items
        ),
    )
    .with_system(format!("You are a student taking an exam. {}", JSON_ONLY))
    .with_temperature(temperature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc() -> Question {
        Question::new("p2_q1", "exam.pdf", 2, "If x + 5 = 12, what is x?")
            .with_choices([("A", "5"), ("B", "6"), ("C", "7")])
    }

    #[test]
    fn test_render_question_lists_choices() {
        let text = render_question(&mc());
        assert!(text.starts_with("Question ID: p2_q1"));
        assert!(text.contains("Choices:\n(A) 5\n(B) 6\n(C) 7\n"));

        let numeric = Question::new("p1_q1", "exam.pdf", 1, "2*7?").with_problem_type(ProblemType::NumericEntry);
        assert!(!render_question(&numeric).contains("Choices:"));
    }

    #[test]
    fn test_simulate_marks_mistakes() {
        let q = mc();
        let request = simulate(&[AnswerRequest::first(&q)], &["p2_q1"], 0.7);
        assert_eq!(request.role, ModelRole::Student);
        assert!(request.user.contains("ID: p2_q1 (multiple_choice)"));
        assert!(request.user.contains("make a realistic mistake"));
    }

    #[test]
    fn test_hint_prompt_forbids_answer() {
        let q = mc();
        let solve = SolveResult::new("p2_q1", "C").with_steps(["x = 12 - 5"]);
        let request = hints(&q, &solve, "A", 0.3);
        assert_eq!(request.stage, Stage::Hint);
        assert!(request.user.contains("Do NOT mention"));
        assert!(request.user.contains("A (5)"));
    }
}
