//! 各阶段的输出结构
//!
//! 抽题 / 解题 / 对比诊断 / 分步提示 / 综合讲解 / 模拟学生，
//! 每个结构只认自己的字段，校验通过才变成带类型的记录。

use std::collections::{BTreeMap, HashSet};

use serde_json::Value as JsonValue;

use crate::error::SchemaKind;
use crate::models::diagnosis::{CombinedExplanation, ContrastiveAnalysis, HintStep, Misconception, OptionNote};
use crate::models::loaders::scalar_to_string;
use crate::models::question::{ProblemType, Question, UncertainSpan};
use crate::models::solve::SolveResult;
use crate::models::taxonomy::{normalize_misconception, normalize_topic};
use crate::services::evaluator::normalize_label;
use crate::services::validator::{required_str, str_field, str_list, Schema};

/// 一道题最多保留的步骤数
pub const MAX_STEPS: usize = 10;
/// 对比诊断最多保留的误区数
pub const MAX_MISCONCEPTIONS: usize = 3;
/// 分步提示最多保留的步数
pub const MAX_HINTS: usize = 6;

// ========== 抽题 ==========

/// 抽题得到的原始题目（编号由抽取服务统一分配）
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuestion {
    /// 模型给出的页码（文本抽题时使用）
    pub page: Option<u32>,
    pub problem_type: ProblemType,
    pub stem: String,
    pub choices: Option<BTreeMap<String, Option<String>>>,
    pub latex_equations: Vec<String>,
    pub diagram_description: Option<String>,
    pub constraints: Vec<String>,
    pub uncertain_spans: Vec<UncertainSpan>,
    pub confidence: f64,
    pub passage_context: Option<String>,
    pub question_category: Option<String>,
}

/// 抽题结构：接受 `{"questions": [...]}`、数组或单个题目对象
pub struct ExtractionSchema;

impl Schema for ExtractionSchema {
    type Output = Vec<RawQuestion>;

    fn kind(&self) -> SchemaKind {
        SchemaKind::Extraction
    }

    fn describe(&self) -> String {
        concat!(
            "{\"questions\": [{\"page\": number?, \"problem_type\": \"multiple_choice\"|\"numeric_entry\"|\"unknown\", ",
            "\"stem\": string, \"choices\": {\"A\": string|null, ...}?, \"latex_equations\": [string], ",
            "\"diagram_description\": string?, \"constraints\": [string], ",
            "\"uncertain_spans\": [{\"span\": string, \"reason\": string, \"location\": string?}], ",
            "\"confidence\": number between 0 and 1, \"passage_context\": string?, \"question_category\": string?}]}"
        )
        .to_string()
    }

    fn parse(&self, value: JsonValue) -> Result<Self::Output, String> {
        let items = match value {
            JsonValue::Array(items) => items,
            JsonValue::Object(mut obj) => match obj.remove("questions") {
                Some(JsonValue::Array(items)) => items,
                Some(JsonValue::Null) => Vec::new(),
                Some(_) => return Err("`questions` must be an array".to_string()),
                None if obj.contains_key("stem") => vec![JsonValue::Object(obj)],
                None => return Err("expected an object with a `questions` array".to_string()),
            },
            _ => return Err("expected a JSON object or array".to_string()),
        };

        let mut questions = Vec::with_capacity(items.len());
        let mut problems = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match parse_raw_question(item) {
                Ok(q) => questions.push(q),
                Err(reason) => problems.push(format!("question #{}: {}", i + 1, reason)),
            }
        }
        if questions.is_empty() && !problems.is_empty() {
            return Err(problems.join("; "));
        }
        Ok(questions)
    }
}

fn parse_raw_question(item: &JsonValue) -> Result<RawQuestion, String> {
    if !item.is_object() {
        return Err("question must be an object".to_string());
    }
    let stem = required_str(item, &["stem", "question", "text"])?;
    let choices = parse_choices(item.get("choices").or_else(|| item.get("options")));

    let declared = str_field(item, &["problem_type", "problemType", "type"]).map(|t| parse_problem_type(&t));
    let problem_type = match declared {
        Some(ProblemType::Unknown) | None if choices.is_some() => ProblemType::MultipleChoice,
        Some(t) => t,
        None => ProblemType::Unknown,
    };

    let confidence = item
        .get("confidence")
        .and_then(JsonValue::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.5);

    let uncertain_spans = match item.get("uncertain_spans").or_else(|| item.get("uncertainSpans")) {
        Some(JsonValue::Array(spans)) => spans
            .iter()
            .filter_map(|span| match span {
                JsonValue::String(s) => Some(UncertainSpan {
                    span: s.clone(),
                    reason: "unclear".to_string(),
                    location: None,
                }),
                JsonValue::Object(_) => Some(UncertainSpan {
                    span: str_field(span, &["span", "text"])?,
                    reason: str_field(span, &["reason"]).unwrap_or_else(|| "unclear".to_string()),
                    location: str_field(span, &["location"]),
                }),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(RawQuestion {
        page: item
            .get("page")
            .and_then(JsonValue::as_u64)
            .and_then(|p| u32::try_from(p).ok()),
        problem_type,
        stem,
        choices,
        latex_equations: str_list(item, &["latex_equations", "latexEquations"]),
        diagram_description: str_field(item, &["diagram_description", "diagramDescription"]),
        constraints: str_list(item, &["constraints"]),
        uncertain_spans,
        confidence,
        passage_context: str_field(item, &["passage_context", "passageContext"]),
        question_category: str_field(item, &["question_category", "questionCategory"]),
    })
}

fn parse_problem_type(raw: &str) -> ProblemType {
    match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
        "multiple_choice" | "mc" | "choice" | "single_choice" => ProblemType::MultipleChoice,
        "numeric_entry" | "numeric" | "fill_in" | "free_response" => ProblemType::NumericEntry,
        _ => ProblemType::Unknown,
    }
}

/// 选项：对象 `{"A": "5"}` 或数组 `[{"label": "A", "text": "5"}]`
fn parse_choices(value: Option<&JsonValue>) -> Option<BTreeMap<String, Option<String>>> {
    let mut choices = BTreeMap::new();
    match value? {
        JsonValue::Object(map) => {
            for (label, text) in map {
                let label = normalize_label(label);
                if !label.is_empty() {
                    choices.insert(label, scalar_to_string(text).filter(|t| !t.is_empty()));
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                if let Some(label) = str_field(item, &["label", "option"]) {
                    choices.insert(normalize_label(&label), str_field(item, &["text", "content", "value"]));
                }
            }
        }
        _ => return None,
    }
    (!choices.is_empty()).then_some(choices)
}

// ========== 解题 ==========

/// 解题结构
pub struct SolveSchema<'a> {
    pub question: &'a Question,
}

impl Schema for SolveSchema<'_> {
    type Output = SolveResult;

    fn kind(&self) -> SchemaKind {
        SchemaKind::Solve
    }

    fn describe(&self) -> String {
        format!(
            "{{\"question_id\": \"{}\", \"correct_answer\": {}, \"topic\": string, \
             \"key_steps\": [string, 1 to {} items], \"final_reason\": string, \"confidence\": number}}",
            self.question.id,
            if self.question.is_multiple_choice() {
                format!("one of {:?}", self.question.choice_labels())
            } else {
                "string (the numeric value or expression)".to_string()
            },
            MAX_STEPS
        )
    }

    fn parse(&self, value: JsonValue) -> Result<Self::Output, String> {
        let raw_answer = ["correct_answer", "correctAnswer", "answer"]
            .iter()
            .find_map(|k| value.get(*k))
            .and_then(scalar_to_string)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| "missing required field `correct_answer`".to_string())?;

        let canonical = if self.question.is_multiple_choice() {
            let labels = self.question.choice_labels();
            choice_label_in(&raw_answer, &labels).ok_or_else(|| {
                format!(
                    "`correct_answer` {:?} is not one of the option labels {:?}",
                    raw_answer, labels
                )
            })?
        } else {
            raw_answer
        };

        let mut steps = str_list(&value, &["key_steps", "keySteps", "steps"]);
        if steps.is_empty() {
            return Err("`key_steps` must contain at least one step".to_string());
        }
        steps.truncate(MAX_STEPS);

        Ok(SolveResult {
            question_id: self.question.id.clone(),
            canonical_answer: canonical,
            steps,
            topic: str_field(&value, &["topic"]).map(|t| normalize_topic(&t)),
            final_reason: str_field(&value, &["final_reason", "finalReason", "reason"]),
            confidence: value
                .get("confidence")
                .and_then(JsonValue::as_f64)
                .map(|c| c.clamp(0.0, 1.0)),
            source: Default::default(),
        })
    }
}

/// 把 `C`、`(C)`、`C) 7`、`C. 7` 之类的写法映射回选项标签
pub fn choice_label_in(raw: &str, labels: &[&str]) -> Option<String> {
    let normalized = normalize_label(raw);
    if let Some(label) = labels.iter().find(|l| l.eq_ignore_ascii_case(&normalized)) {
        return Some(label.to_string());
    }
    let head: String = normalized
        .trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    let rest = normalized.trim_start_matches('(')[head.len()..].chars().next();
    if matches!(rest, Some(')') | Some('.') | Some(':') | Some(' ')) {
        return labels
            .iter()
            .find(|l| l.eq_ignore_ascii_case(&head))
            .map(|l| l.to_string());
    }
    None
}

// ========== 对比诊断（模式 B） ==========

/// 对比诊断结构
pub struct ContrastiveSchema<'a> {
    pub question: &'a Question,
    pub canonical: &'a str,
    pub submitted: &'a str,
}

impl Schema for ContrastiveSchema<'_> {
    type Output = ContrastiveAnalysis;

    fn kind(&self) -> SchemaKind {
        SchemaKind::Contrastive
    }

    fn describe(&self) -> String {
        format!(
            "{{\"why_tempting\": string, \"misconceptions\": [{{\"code\": string?, \"name\": string, \"description\": string}}, 1 to {} items, most likely first], \
             \"comparative_explanation\": string, \"option_notes\": [{{\"option\": string, \"content\": string, \"analysis\": string}}]}}",
            MAX_MISCONCEPTIONS
        )
    }

    fn parse(&self, value: JsonValue) -> Result<Self::Output, String> {
        let why_tempting = required_str(&value, &["why_tempting", "whyTempting", "why_user_choice_is_tempting"])?;
        let comparative_explanation = required_str(
            &value,
            &["comparative_explanation", "comparativeExplanation", "how_to_get_correct"],
        )?;

        let mut misconceptions = parse_misconceptions(
            value
                .get("misconceptions")
                .or_else(|| value.get("likely_misconceptions")),
        );
        if misconceptions.is_empty() {
            return Err("`misconceptions` must contain at least one item".to_string());
        }
        misconceptions.truncate(MAX_MISCONCEPTIONS);

        let option_notes = parse_option_notes(
            value.get("option_notes").or_else(|| value.get("option_analysis")),
            self.question,
            self.canonical,
            self.submitted,
        );
        // 选择题：除正确答案外每个选项都要有点评
        if self.question.is_multiple_choice() {
            let canonical = normalize_label(self.canonical);
            let missing: Vec<&str> = self
                .question
                .choice_labels()
                .into_iter()
                .filter(|label| *label != canonical && !option_notes.iter().any(|n| n.option == *label))
                .collect();
            if !missing.is_empty() {
                return Err(format!("`option_notes` missing options: {}", missing.join(", ")));
            }
        }

        Ok(ContrastiveAnalysis {
            why_tempting,
            misconceptions,
            comparative_explanation,
            option_notes,
        })
    }
}

fn parse_misconceptions(value: Option<&JsonValue>) -> Vec<Misconception> {
    let Some(JsonValue::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::String(s) if !s.trim().is_empty() => {
                Some(normalize_misconception(None, s, ""))
            }
            JsonValue::Object(_) => {
                let code = str_field(item, &["code"]);
                let name = str_field(item, &["name", "title"]).unwrap_or_default();
                let description = str_field(item, &["description", "detail"]).unwrap_or_default();
                if code.is_none() && name.is_empty() && description.is_empty() {
                    return None;
                }
                let m = normalize_misconception(code.as_deref(), &name, &description);
                (!m.name.is_empty() || !m.description.is_empty()).then_some(m)
            }
            _ => None,
        })
        .collect()
}

/// 选项点评：只保留题目中存在的选项，正确 / 所选标记在本地重新计算
pub fn parse_option_notes(
    value: Option<&JsonValue>,
    question: &Question,
    canonical: &str,
    submitted: &str,
) -> Vec<OptionNote> {
    let Some(JsonValue::Array(items)) = value else {
        return Vec::new();
    };
    let labels = question.choice_labels();
    let canonical = normalize_label(canonical);
    let submitted = normalize_label(submitted);

    let mut seen = HashSet::new();
    let mut notes: Vec<OptionNote> = items
        .iter()
        .filter_map(|item| {
            let option = choice_label_in(&str_field(item, &["option", "label"])?, &labels)?;
            let analysis = str_field(item, &["analysis", "note", "comment"])?;
            if !seen.insert(option.clone()) {
                return None;
            }
            Some(OptionNote {
                content: question
                    .choice_text(&option)
                    .map(str::to_string)
                    .or_else(|| str_field(item, &["content", "text"]))
                    .unwrap_or_default(),
                is_correct: option == canonical,
                is_user_choice: option == submitted,
                option,
                analysis,
            })
        })
        .collect();
    notes.sort_by(|a, b| a.option.cmp(&b.option));
    notes
}

// ========== 分步提示（模式 C 第一阶段） ==========

/// 第一阶段输出
#[derive(Debug, Clone, PartialEq)]
pub struct HintPlan {
    pub error_analysis: String,
    pub hints: Vec<HintStep>,
}

/// 分步提示结构：每一步四个字段都必须非空
pub struct HintSchema;

impl Schema for HintSchema {
    type Output = HintPlan;

    fn kind(&self) -> SchemaKind {
        SchemaKind::Hint
    }

    fn describe(&self) -> String {
        format!(
            "{{\"error_analysis\": string, \"hints\": [{{\"action\": string, \"evidence_location\": string, \
             \"guiding_question\": string, \"expected_conclusion\": string}}, 1 to {} items]}} \
             (never state the correct option or value)",
            MAX_HINTS
        )
    }

    fn parse(&self, value: JsonValue) -> Result<Self::Output, String> {
        let error_analysis = required_str(&value, &["error_analysis", "errorAnalysis"])?;
        let Some(JsonValue::Array(items)) = value.get("hints").or_else(|| value.get("hint_steps")) else {
            return Err("missing required array `hints`".to_string());
        };
        if items.is_empty() {
            return Err("`hints` must contain at least one step".to_string());
        }

        let mut hints = Vec::with_capacity(items.len());
        for (i, item) in items.iter().take(MAX_HINTS).enumerate() {
            let step = |keys: &[&str]| {
                required_str(item, keys).map_err(|e| format!("hint #{}: {}", i + 1, e))
            };
            hints.push(HintStep {
                action: step(&["action"])?,
                evidence_location: step(&["evidence_location", "evidenceLocation"])?,
                guiding_question: step(&["guiding_question", "guidingQuestion"])?,
                expected_conclusion: step(&["expected_conclusion", "expectedConclusion"])?,
            });
        }
        Ok(HintPlan { error_analysis, hints })
    }
}

// ========== 综合讲解（模式 C 第二阶段） ==========

/// 综合讲解结构
pub struct ExplanationSchema<'a> {
    pub question: &'a Question,
    pub canonical: &'a str,
    pub second_answer: &'a str,
    /// 第二次仍然答错时要求解释第二个错误
    pub second_wrong: bool,
}

impl Schema for ExplanationSchema<'_> {
    type Output = CombinedExplanation;

    fn kind(&self) -> SchemaKind {
        SchemaKind::Explanation
    }

    fn describe(&self) -> String {
        let second = if self.second_wrong {
            ", \"second_mistake\": string"
        } else {
            ""
        };
        format!(
            "{{\"combined_explanation\": string, \"first_mistake\": string{}, \
             \"option_notes\": [{{\"option\": string, \"analysis\": string}}]}}",
            second
        )
    }

    fn parse(&self, value: JsonValue) -> Result<Self::Output, String> {
        let combined_explanation = required_str(&value, &["combined_explanation", "combinedExplanation"])?;
        let first_mistake = required_str(&value, &["first_mistake", "firstMistake"])?;
        let second_mistake = if self.second_wrong {
            Some(required_str(&value, &["second_mistake", "secondMistake"])?)
        } else {
            None
        };
        Ok(CombinedExplanation {
            combined_explanation,
            first_mistake,
            second_mistake,
            option_notes: parse_option_notes(
                value.get("option_notes"),
                self.question,
                self.canonical,
                self.second_answer,
            ),
        })
    }
}

// ========== 模拟学生 ==========

/// 模拟学生对一道题的作答
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulatedAnswer {
    pub answer: String,
    #[serde(default)]
    pub thought_process: String,
    #[serde(default)]
    pub made_mistake: bool,
}

/// 模拟学生结构：`{题目编号: {thought_process, made_mistake, answer}}`
pub struct SimulationSchema<'a> {
    pub ids: &'a [String],
}

impl Schema for SimulationSchema<'_> {
    type Output = BTreeMap<String, SimulatedAnswer>;

    fn kind(&self) -> SchemaKind {
        SchemaKind::Simulation
    }

    fn describe(&self) -> String {
        "{\"<question id>\": {\"thought_process\": string, \"made_mistake\": boolean, \"answer\": string}}".to_string()
    }

    fn parse(&self, value: JsonValue) -> Result<Self::Output, String> {
        let obj = match value {
            JsonValue::Object(mut obj) => match obj.remove("answers") {
                Some(JsonValue::Object(inner)) => inner,
                Some(other) => {
                    obj.insert("answers".to_string(), other);
                    obj
                }
                None => obj,
            },
            _ => return Err("expected an object keyed by question id".to_string()),
        };

        let mut answers = BTreeMap::new();
        for id in self.ids {
            let Some(entry) = obj.get(id) else { continue };
            let parsed = match entry {
                JsonValue::Object(_) => ["answer", "final_answer"]
                    .iter()
                    .find_map(|k| entry.get(*k))
                    .and_then(scalar_to_string)
                    .map(|answer| SimulatedAnswer {
                        answer,
                        thought_process: str_field(entry, &["thought_process", "thoughtProcess"]).unwrap_or_default(),
                        made_mistake: entry
                            .get("made_mistake")
                            .and_then(JsonValue::as_bool)
                            .unwrap_or(false),
                    }),
                other => scalar_to_string(other).map(|answer| SimulatedAnswer {
                    answer,
                    thought_process: String::new(),
                    made_mistake: false,
                }),
            };
            if let Some(answer) = parsed.filter(|a| !a.answer.is_empty()) {
                answers.insert(id.clone(), answer);
            }
        }

        if answers.is_empty() && !self.ids.is_empty() {
            return Err("no answers for any of the requested question ids".to_string());
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mc_question() -> Question {
        Question::new("p1_q2", "exam.pdf", 1, "Which is prime?")
            .with_choices([("A", "4"), ("B", "7"), ("C", "9"), ("D", "12"), ("E", "15")])
    }

    #[test]
    fn test_extraction_accepts_three_shapes() {
        let one = json!({"stem": "What is 2+2?", "confidence": 1.4});
        let parsed = ExtractionSchema.parse(one.clone()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].confidence, 1.0);

        assert_eq!(ExtractionSchema.parse(json!([one.clone(), one.clone()])).unwrap().len(), 2);
        assert_eq!(ExtractionSchema.parse(json!({"questions": [one]})).unwrap().len(), 1);
        assert!(ExtractionSchema.parse(json!({"questions": []})).unwrap().is_empty());
        assert!(ExtractionSchema.parse(json!({"items": []})).is_err());
    }

    #[test]
    fn test_extraction_infers_multiple_choice() {
        let parsed = ExtractionSchema
            .parse(json!({"questions": [{
                "stem": "x?",
                "choices": {"a": "1", "B": 2, "C": null},
                "uncertain_spans": ["x"]
            }]}))
            .unwrap();
        let q = &parsed[0];
        assert_eq!(q.problem_type, ProblemType::MultipleChoice);
        let choices = q.choices.as_ref().unwrap();
        assert_eq!(choices["A"].as_deref(), Some("1"));
        assert_eq!(choices["B"].as_deref(), Some("2"));
        assert_eq!(choices["C"], None);
        assert_eq!(q.uncertain_spans[0].reason, "unclear");
    }

    #[test]
    fn test_solve_requires_declared_label() {
        let q = mc_question();
        let schema = SolveSchema { question: &q };
        let ok = schema
            .parse(json!({"correct_answer": "B) 7", "key_steps": ["7 has no divisors"], "topic": "Number Theory"}))
            .unwrap();
        assert_eq!(ok.canonical_answer, "B");
        assert_eq!(ok.topic.as_deref(), Some("number_theory"));

        assert!(schema.parse(json!({"correct_answer": "F", "key_steps": ["x"]})).is_err());
        assert!(schema.parse(json!({"correct_answer": "B", "key_steps": []})).is_err());
    }

    #[test]
    fn test_solve_numeric_answer_is_coerced() {
        let q = Question::new("p1_q3", "exam.pdf", 1, "2*7?").with_problem_type(ProblemType::NumericEntry);
        let schema = SolveSchema { question: &q };
        let steps: Vec<String> = (0..15).map(|i| format!("step {i}")).collect();
        let result = schema.parse(json!({"correct_answer": 14.0, "key_steps": steps})).unwrap();
        assert_eq!(result.canonical_answer, "14.0");
        assert_eq!(result.steps.len(), MAX_STEPS);
    }

    #[test]
    fn test_contrastive_bounds_and_flags() {
        let q = mc_question();
        let schema = ContrastiveSchema {
            question: &q,
            canonical: "B",
            submitted: "C",
        };
        let analysis = schema
            .parse(json!({
                "why_tempting": "9 is odd",
                "misconceptions": [
                    {"code": "CONCEPT_DEFINITION"}, "odd means prime", {"name": "x"}, {"name": "y"}
                ],
                "comparative_explanation": "check divisors",
                "option_notes": [
                    {"option": "C", "analysis": "9 = 3x3", "is_correct": true},
                    {"option": "A", "analysis": "even"},
                    {"option": "D", "analysis": "even"},
                    {"option": "E", "analysis": "divisible by 5"},
                    {"option": "B", "analysis": "prime"},
                    {"option": "Z", "analysis": "bogus"}
                ]
            }))
            .unwrap();
        assert_eq!(analysis.misconceptions.len(), MAX_MISCONCEPTIONS);
        assert_eq!(analysis.misconceptions[0].code.as_deref(), Some("CONCEPT_DEFINITION"));
        assert_eq!(analysis.option_notes.len(), 5);
        assert_eq!(analysis.option_notes[1].option, "B");
        assert!(analysis.option_notes[1].is_correct);
        assert!(!analysis.option_notes[2].is_correct);
        assert!(analysis.option_notes[2].is_user_choice);
        assert_eq!(analysis.option_notes[2].content, "9");

        assert!(schema
            .parse(json!({"why_tempting": "x", "misconceptions": [], "comparative_explanation": "y"}))
            .is_err());
    }

    #[test]
    fn test_hint_steps_need_all_fields() {
        let ok = HintSchema
            .parse(json!({
                "error_analysis": "e",
                "hints": [{"action": "a", "evidenceLocation": "b", "guiding_question": "c", "expected_conclusion": "d"}]
            }))
            .unwrap();
        assert_eq!(ok.hints[0].evidence_location, "b");

        let err = HintSchema
            .parse(json!({
                "error_analysis": "e",
                "hints": [{"action": "a", "evidence_location": "b", "guiding_question": "c"}]
            }))
            .unwrap_err();
        assert!(err.contains("expected_conclusion"));
    }

    #[test]
    fn test_explanation_second_mistake_only_when_wrong() {
        let q = mc_question();
        let value = json!({"combined_explanation": "c", "first_mistake": "f", "second_mistake": "s"});
        let right = ExplanationSchema { question: &q, canonical: "B", second_answer: "B", second_wrong: false };
        assert_eq!(right.parse(value.clone()).unwrap().second_mistake, None);

        let wrong = ExplanationSchema { question: &q, canonical: "B", second_answer: "A", second_wrong: true };
        assert_eq!(wrong.parse(value).unwrap().second_mistake.as_deref(), Some("s"));
        assert!(wrong.parse(json!({"combined_explanation": "c", "first_mistake": "f"})).is_err());
    }

    #[test]
    fn test_simulation_keeps_requested_ids() {
        let ids = vec!["p1_q1".to_string(), "p1_q2".to_string()];
        let schema = SimulationSchema { ids: &ids };
        let parsed = schema
            .parse(json!({
                "p1_q1": {"thought_process": "t", "made_mistake": true, "answer": "A"},
                "p1_q2": 14,
                "p9_q9": "B"
            }))
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed["p1_q1"].made_mistake);
        assert_eq!(parsed["p1_q2"].answer, "14");
        assert!(schema.parse(json!({"p9_q9": "B"})).is_err());
    }
    #[test]
    fn test_contrastive_requires_note_per_wrong_option() {
        let q = mc_question();
        let schema = ContrastiveSchema {
            question: &q,
            canonical: "B",
            submitted: "C",
        };
        let err = schema
            .parse(json!({
                "why_tempting": "9 is odd",
                "misconceptions": ["odd means prime"],
                "comparative_explanation": "check divisors",
                "option_notes": [{"option": "C", "analysis": "9 = 3x3"}]
            }))
            .unwrap_err();
        assert!(err.contains("A, D, E"));

        // 数值题不需要选项点评
        let numeric = Question::new("p1_q3", "exam.pdf", 1, "2*7?").with_problem_type(ProblemType::NumericEntry);
        let schema = ContrastiveSchema {
            question: &numeric,
            canonical: "14",
            submitted: "12",
        };
        assert!(schema
            .parse(json!({"why_tempting": "x", "misconceptions": ["m"], "comparative_explanation": "y"}))
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_option_notes_trigger_repair() {
        use crate::clients::{LlmRequest, MockGateway, ModelRole, Stage};
        use crate::config::ValidatorConfig;
        use crate::services::validator::Validator;
        use std::sync::Arc;

        let mock = Arc::new(MockGateway::new());
        mock.push_json(
            Stage::Diagnose,
            json!({"why_tempting": "t", "misconceptions": ["m"], "comparative_explanation": "c"}),
        );
        mock.push_json(
            Stage::Diagnose,
            json!({
                "why_tempting": "t",
                "misconceptions": ["m"],
                "comparative_explanation": "c",
                "option_notes": [
                    {"option": "A", "analysis": "even"},
                    {"option": "C", "analysis": "9 = 3x3"},
                    {"option": "D", "analysis": "even"},
                    {"option": "E", "analysis": "divisible by 5"}
                ]
            }),
        );
        let validator = Validator::new(mock.clone(), &ValidatorConfig::default());
        let q = mc_question();
        let schema = ContrastiveSchema {
            question: &q,
            canonical: "B",
            submitted: "C",
        };
        let analysis = validator
            .request(LlmRequest::new(Stage::Diagnose, ModelRole::Text, "diagnose"), &schema)
            .await
            .unwrap();

        assert_eq!(mock.call_count(Stage::Diagnose), 2);
        assert_eq!(analysis.option_notes.len(), 4);
    }
}
