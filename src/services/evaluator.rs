//! 判分服务 - 业务能力层
//!
//! 只负责"这个作答对不对"，纯函数：不调用 LLM、不读写任何状态。
//!
//! - 选择题：去空白、忽略大小写，和选项标签集合比对；不在标签集合里的作答判为 `Unparseable`
//! - 数值 / 填空：去掉单位和空白后尝试按数值比较（支持分数、千分位），
//!   容差取绝对 / 相对容差中较大者，默认精确相等；非数值退化为忽略大小写的文本比较

use std::sync::LazyLock;

use regex::Regex;

use crate::config::EvalConfig;
use crate::models::diagnosis::Verdict;
use crate::models::question::Question;

/// 判分所需的题型信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerFormat {
    /// 选择题及其标签集合
    Choice { labels: Vec<String> },
    /// 数值或自由填写
    FreeResponse,
}

impl AnswerFormat {
    pub fn of(question: &Question) -> Self {
        if question.is_multiple_choice() {
            AnswerFormat::Choice {
                labels: question
                    .choice_labels()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            }
        } else {
            AnswerFormat::FreeResponse
        }
    }
}

/// 判分器
#[derive(Debug, Clone, Default)]
pub struct AnswerEvaluator {
    absolute_tolerance: f64,
    relative_tolerance: f64,
}

impl AnswerEvaluator {
    pub fn new(config: &EvalConfig) -> Self {
        Self {
            absolute_tolerance: config.absolute_tolerance.max(0.0),
            relative_tolerance: config.relative_tolerance.max(0.0),
        }
    }

    /// 判分
    pub fn evaluate(&self, submitted: &str, canonical: &str, format: &AnswerFormat) -> Verdict {
        match format {
            AnswerFormat::Choice { labels } => evaluate_choice(submitted, canonical, labels),
            AnswerFormat::FreeResponse => self.evaluate_free(submitted, canonical),
        }
    }

    /// 直接对题目判分
    pub fn evaluate_for(&self, question: &Question, submitted: &str, canonical: &str) -> Verdict {
        self.evaluate(submitted, canonical, &AnswerFormat::of(question))
    }

    fn evaluate_free(&self, submitted: &str, canonical: &str) -> Verdict {
        let submitted_text = collapse_whitespace(submitted);
        if submitted_text.is_empty() {
            return Verdict::Unparseable;
        }

        match (parse_numeric(submitted), parse_numeric(canonical)) {
            (Some(a), Some(b)) => {
                if self.numbers_match(a, b) {
                    Verdict::Correct
                } else {
                    Verdict::Incorrect
                }
            }
            _ => {
                if submitted_text.to_lowercase() == collapse_whitespace(canonical).to_lowercase() {
                    Verdict::Correct
                } else {
                    Verdict::Incorrect
                }
            }
        }
    }

    fn numbers_match(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        let tolerance = self
            .absolute_tolerance
            .max(self.relative_tolerance * a.abs().max(b.abs()));
        (a - b).abs() <= tolerance
    }
}

fn evaluate_choice(submitted: &str, canonical: &str, labels: &[String]) -> Verdict {
    let submitted = normalize_label(submitted);
    if submitted.is_empty() || !labels.iter().any(|l| l.eq_ignore_ascii_case(&submitted)) {
        return Verdict::Unparseable;
    }
    if submitted.eq_ignore_ascii_case(&normalize_label(canonical)) {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

/// 选项标签归一：去空白、去外层括号、转大写
pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);
    inner.trim().to_uppercase()
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?$").expect("numeric regex")
});

static FRACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([-+]?\d+)/([-+]?\d+)$").expect("fraction regex"));

/// 数值归一：去空白、千分位、货币符号和尾部单位，支持 `a/b` 分数
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let stripped = compact.trim_start_matches(['$', '€', '£']);
    let stripped = stripped.trim_end_matches(|c: char| c.is_alphabetic() || matches!(c, '%' | '°' | '.'));
    if stripped.is_empty() {
        return None;
    }

    if NUMERIC_RE.is_match(stripped) {
        return stripped.parse::<f64>().ok().filter(|v| v.is_finite());
    }

    let caps = FRACTION_RE.captures(stripped)?;
    let numerator: f64 = caps.get(1)?.as_str().parse().ok()?;
    let denominator: f64 = caps.get(2)?.as_str().parse().ok()?;
    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc() -> AnswerFormat {
        AnswerFormat::Choice {
            labels: ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_choice_reflexive_for_every_label() {
        let eval = AnswerEvaluator::default();
        for label in ["A", "B", "C", "D", "E"] {
            assert_eq!(eval.evaluate(label, label, &mc()), Verdict::Correct);
        }
    }

    #[test]
    fn test_choice_case_and_whitespace() {
        let eval = AnswerEvaluator::default();
        assert_eq!(eval.evaluate("  c ", "C", &mc()), Verdict::Correct);
        assert_eq!(eval.evaluate("(C)", "C", &mc()), Verdict::Correct);
        assert_eq!(eval.evaluate("A", "C", &mc()), Verdict::Incorrect);
    }

    #[test]
    fn test_choice_outside_label_set_is_unparseable() {
        let eval = AnswerEvaluator::default();
        assert_eq!(eval.evaluate("F", "C", &mc()), Verdict::Unparseable);
        assert_eq!(eval.evaluate("7", "C", &mc()), Verdict::Unparseable);
        assert_eq!(eval.evaluate("", "C", &mc()), Verdict::Unparseable);
    }

    #[test]
    fn test_numeric_exact_by_default() {
        let eval = AnswerEvaluator::default();
        let free = AnswerFormat::FreeResponse;
        assert_eq!(eval.evaluate("14", "14.0", &free), Verdict::Correct);
        assert_eq!(eval.evaluate("1/2", "0.5", &free), Verdict::Correct);
        assert_eq!(eval.evaluate("$1,200", "1200", &free), Verdict::Correct);
        assert_eq!(eval.evaluate("15 cm", "15", &free), Verdict::Correct);
        assert_eq!(eval.evaluate("14.001", "14", &free), Verdict::Incorrect);
    }

    #[test]
    fn test_numeric_tolerance() {
        let eval = AnswerEvaluator::new(&EvalConfig {
            absolute_tolerance: 0.01,
            relative_tolerance: 0.0,
        });
        let free = AnswerFormat::FreeResponse;
        assert_eq!(eval.evaluate("3.333", "10/3", &free), Verdict::Correct);
        assert_eq!(eval.evaluate("3.3", "10/3", &free), Verdict::Incorrect);

        let relative = AnswerEvaluator::new(&EvalConfig {
            absolute_tolerance: 0.0,
            relative_tolerance: 0.001,
        });
        assert_eq!(relative.evaluate("1000.5", "1000", &free), Verdict::Correct);
    }

    #[test]
    fn test_text_fallback() {
        let eval = AnswerEvaluator::default();
        let free = AnswerFormat::FreeResponse;
        assert_eq!(eval.evaluate("  Paris ", "paris", &free), Verdict::Correct);
        assert_eq!(eval.evaluate("fourteen", "14", &free), Verdict::Incorrect);
        assert_eq!(eval.evaluate("   ", "14", &free), Verdict::Unparseable);
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("-3/4"), Some(-0.75));
        assert_eq!(parse_numeric("12%"), Some(12.0));
        assert_eq!(parse_numeric("1/0"), None);
        assert_eq!(parse_numeric("abc"), None);
    }
}
