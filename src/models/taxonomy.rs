//! 误区分类目录与题目主题目录
//!
//! 误区目录是编译期常量表（phf）。模型返回的误区代码在这里做归一，
//! 不在目录中的代码保留为自由文本。

use phf::phf_map;

use crate::models::diagnosis::Misconception;

/// 误区条目
#[derive(Debug, Clone, Copy)]
pub struct MisconceptionKind {
    pub name: &'static str,
    pub description: &'static str,
}

pub static MISCONCEPTIONS: phf::Map<&'static str, MisconceptionKind> = phf_map! {
    "CALC_SIGN" => MisconceptionKind {
        name: "Sign error",
        description: "Mishandled a positive/negative sign, e.g. turning a subtraction into an addition",
    },
    "CALC_ORDER" => MisconceptionKind {
        name: "Order of operations",
        description: "Evaluated operations in the wrong precedence",
    },
    "CALC_DECIMAL" => MisconceptionKind {
        name: "Decimal/fraction arithmetic",
        description: "Misplaced a decimal point or mishandled fraction arithmetic",
    },
    "CALC_POWER" => MisconceptionKind {
        name: "Exponent rules",
        description: "Applied a power rule incorrectly",
    },
    "CONCEPT_FORMULA" => MisconceptionKind {
        name: "Wrong formula",
        description: "Misremembered or confused a related formula",
    },
    "CONCEPT_DEFINITION" => MisconceptionKind {
        name: "Definition misunderstood",
        description: "Used an inaccurate definition of a concept",
    },
    "CONCEPT_PROPERTY" => MisconceptionKind {
        name: "Property misapplied",
        description: "Misunderstood or misapplied a mathematical property",
    },
    "READ_CONDITION" => MisconceptionKind {
        name: "Missed condition",
        description: "Ignored an important condition or restriction in the question",
    },
    "READ_QUESTION" => MisconceptionKind {
        name: "Misread question",
        description: "Answered a different question than the one asked",
    },
    "READ_UNITS" => MisconceptionKind {
        name: "Unit conversion",
        description: "Ignored or mishandled a unit conversion",
    },
    "TRAP_INTERMEDIATE" => MisconceptionKind {
        name: "Intermediate-result trap",
        description: "Stopped at an intermediate value instead of the requested quantity",
    },
    "TRAP_SIMILAR" => MisconceptionKind {
        name: "Look-alike distractor",
        description: "Picked a distractor numerically similar to the correct answer",
    },
    "TRAP_COMMON" => MisconceptionKind {
        name: "Common-error distractor",
        description: "Picked the option built from a typical mistake",
    },
    "METHOD_WRONG" => MisconceptionKind {
        name: "Wrong method",
        description: "Used a method that does not apply to this problem",
    },
    "METHOD_INCOMPLETE" => MisconceptionKind {
        name: "Incomplete solution",
        description: "Skipped or left out solution steps",
    },
    "LOGIC_REVERSE" => MisconceptionKind {
        name: "Reversed logic",
        description: "Swapped condition and conclusion",
    },
    "LOGIC_SCOPE" => MisconceptionKind {
        name: "Scope/range error",
        description: "Misjudged a value range or set relationship",
    },
};

/// 主题 -> 常见误区代码
pub fn topic_misconceptions(topic: &str) -> Option<&'static [&'static str]> {
    let codes: &'static [&'static str] = match topic {
        "algebra" => &["CALC_SIGN", "CALC_ORDER", "CONCEPT_FORMULA", "METHOD_WRONG", "READ_CONDITION"],
        "geometry" => &["CONCEPT_FORMULA", "CONCEPT_PROPERTY", "READ_UNITS", "CALC_DECIMAL"],
        "arithmetic" => &["CALC_ORDER", "CALC_DECIMAL", "CALC_POWER", "READ_UNITS"],
        "data_analysis" => &["CONCEPT_DEFINITION", "READ_QUESTION", "CALC_DECIMAL"],
        "number_theory" => &["CONCEPT_DEFINITION", "CONCEPT_PROPERTY", "READ_CONDITION"],
        "word_problems" => &["READ_CONDITION", "READ_QUESTION", "READ_UNITS", "METHOD_WRONG"],
        _ => return None,
    };
    Some(codes)
}

/// 主题归一：`Data Analysis` -> `data_analysis`，未知主题原样保留
pub fn normalize_topic(raw: &str) -> String {
    let key = raw.trim().to_lowercase().replace([' ', '-'], "_");
    if topic_misconceptions(&key).is_some() {
        key
    } else {
        raw.trim().to_string()
    }
}

/// 某主题下优先提示给模型的误区（未知主题取目录前五项）
pub fn misconceptions_for_topic(topic: Option<&str>) -> Vec<(&'static str, MisconceptionKind)> {
    let codes: Vec<&'static str> = topic
        .and_then(|t| topic_misconceptions(&normalize_topic(t)))
        .map(|codes| codes.to_vec())
        .unwrap_or_else(|| {
            let mut all: Vec<&'static str> = MISCONCEPTIONS.keys().copied().collect();
            all.sort_unstable();
            all.truncate(5);
            all
        });
    codes
        .into_iter()
        .filter_map(|code| MISCONCEPTIONS.get(code).map(|kind| (code, *kind)))
        .collect()
}

/// 给提示词用的误区目录
pub fn catalogue_prompt(topic: Option<&str>) -> String {
    let mut lines = vec!["Misconception catalogue (use the code when one fits):".to_string()];
    let mut codes: Vec<&&str> = MISCONCEPTIONS.keys().collect();
    codes.sort_unstable();
    let preferred: Vec<&str> = misconceptions_for_topic(topic)
        .into_iter()
        .map(|(code, _)| code)
        .collect();
    for code in codes {
        if let Some(kind) = MISCONCEPTIONS.get(*code) {
            let mark = if preferred.contains(code) { " (common for this topic)" } else { "" };
            lines.push(format!("- {}: {} - {}{}", code, kind.name, kind.description, mark));
        }
    }
    lines.join("\n")
}

/// 归一模型给出的误区：代码在目录中时补全名称和描述
pub fn normalize_misconception(code: Option<&str>, name: &str, description: &str) -> Misconception {
    let code = code
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty());

    match code.as_deref().and_then(|c| MISCONCEPTIONS.get(c).map(|k| (c, k))) {
        Some((c, kind)) => Misconception {
            code: Some(c.to_string()),
            name: if name.trim().is_empty() {
                kind.name.to_string()
            } else {
                name.trim().to_string()
            },
            description: if description.trim().is_empty() {
                kind.description.to_string()
            } else {
                description.trim().to_string()
            },
        },
        None => Misconception {
            code: None,
            name: name.trim().to_string(),
            description: description.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_code_is_completed() {
        let m = normalize_misconception(Some("calc_sign"), "", "");
        assert_eq!(m.code.as_deref(), Some("CALC_SIGN"));
        assert_eq!(m.name, "Sign error");
    }

    #[test]
    fn test_unknown_code_kept_as_text() {
        let m = normalize_misconception(Some("GUESSING"), "Guessed", "No work shown");
        assert_eq!(m.code, None);
        assert_eq!(m.name, "Guessed");
    }

    #[test]
    fn test_topics() {
        assert_eq!(normalize_topic("Data Analysis"), "data_analysis");
        assert_eq!(normalize_topic("Probability"), "Probability");
        let algebra = misconceptions_for_topic(Some("algebra"));
        assert_eq!(algebra[0].0, "CALC_SIGN");
        assert_eq!(misconceptions_for_topic(None).len(), 5);
        assert!(catalogue_prompt(Some("geometry")).contains("CONCEPT_PROPERTY"));
    }
}
