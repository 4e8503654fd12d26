//! 提示内容中的答案遮盖
//!
//! 分步提示阶段的输出里不能出现正确选项标签、选项内容或数值答案。
//! 模型被要求不写答案，这里再做一次兜底：命中的片段替换为 `[hidden]`。

use regex::{Captures, Regex};
use tracing::warn;

use crate::models::diagnosis::HintStep;
use crate::models::question::Question;
use crate::services::evaluator::{normalize_label, parse_numeric};

pub const HIDDEN: &str = "[hidden]";

/// 同一段文本最多重复替换的轮数
const MAX_PASSES: usize = 8;

/// 答案遮盖器
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// 按题目和标准答案构造
    pub fn for_answer(question: &Question, canonical: &str) -> Self {
        let mut patterns = Vec::new();

        if question.is_multiple_choice() {
            let label = normalize_label(canonical);
            if !label.is_empty() {
                patterns.extend(word_pattern(&label, false));
            }
            if let Some(content) = question.choice_text(&label) {
                patterns.extend(value_patterns(content));
            }
        } else {
            patterns.extend(value_patterns(canonical));
        }

        Self { patterns }
    }

    /// 遮盖一段文本，返回 (结果, 替换次数)
    pub fn redact(&self, text: &str) -> (String, usize) {
        let mut current = text.to_string();
        let mut total = 0;
        for pattern in &self.patterns {
            for _ in 0..MAX_PASSES {
                let mut hits = 0;
                let replaced = pattern.replace_all(&current, |caps: &Captures| {
                    hits += 1;
                    format!("{}{}{}", &caps["pre"], HIDDEN, &caps["post"])
                });
                if hits == 0 {
                    break;
                }
                current = replaced.into_owned();
                total += hits;
            }
        }
        (current, total)
    }

    /// 遮盖全部提示字段
    pub fn redact_hints(&self, error_analysis: &mut String, hints: &mut [HintStep]) -> usize {
        let mut count = self.redact_in_place(error_analysis);
        for hint in hints.iter_mut() {
            count += self.redact_in_place(&mut hint.action);
            count += self.redact_in_place(&mut hint.evidence_location);
            count += self.redact_in_place(&mut hint.guiding_question);
            count += self.redact_in_place(&mut hint.expected_conclusion);
        }
        count
    }

    fn redact_in_place(&self, field: &mut String) -> usize {
        let (redacted, count) = self.redact(field);
        if count > 0 {
            *field = redacted;
        }
        count
    }
}

/// 独立出现的词（前后不是字母数字）
fn word_pattern(word: &str, case_insensitive: bool) -> Option<Regex> {
    let flags = if case_insensitive { "(?i)" } else { "" };
    compile(&format!(
        r"{}(?P<pre>^|[^A-Za-z0-9])(?P<hit>{})(?P<post>[^A-Za-z0-9]|$)",
        flags,
        regex::escape(word.trim())
    ))
}

/// 答案值：原文 + 数值的常见写法（`14`、`14.0`、`1,400`）
fn value_patterns(raw: &str) -> Vec<Regex> {
    let raw = raw.trim();
    let mut patterns = Vec::new();
    if raw.is_empty() {
        return patterns;
    }
    if let Some(value) = parse_numeric(raw) {
        patterns.extend(numeric_pattern(value));
    }
    patterns.extend(word_pattern(raw, true));
    patterns
}

fn numeric_pattern(value: f64) -> Option<Regex> {
    if !value.is_finite() {
        return None;
    }
    let mut forms = Vec::new();
    if value.fract() == 0.0 && value.abs() < 1e15 {
        let int = value as i64;
        forms.push(format!(r"{}(?:\.0+)?", int));
        if int.abs() >= 1000 {
            forms.push(regex::escape(&with_thousands(int)));
        }
    } else {
        forms.push(format!("{}0*", regex::escape(&value.to_string())));
    }
    compile(&format!(
        r"(?P<pre>^|[^\d.,])(?P<hit>{})(?P<post>[^\d.,]|[.,][^\d]|[.,]$|$)",
        forms.join("|")
    ))
}

fn with_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("遮盖规则编译失败 {:?}: {}", pattern, e);
            None
        }
    }
}
