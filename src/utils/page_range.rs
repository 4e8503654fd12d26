//! 页码范围表达式
//!
//! `"all"`、`"1-3,5,7-10"`。解析结果限制在 `[1, total]`，去重并排序。

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageRangeError {
    #[error("页码范围为空")]
    Empty,
    #[error("无法解析页码: {0:?}")]
    Invalid(String),
    #[error("页码范围倒置: {0}-{1}")]
    Reversed(u32, u32),
    #[error("页码范围内没有有效页 (共 {total} 页): {expr}")]
    OutOfBounds { expr: String, total: u32 },
}

/// 解析页码范围
pub fn parse_page_range(expr: &str, total: u32) -> Result<Vec<u32>, PageRangeError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(PageRangeError::Empty);
    }
    if expr.eq_ignore_ascii_case("all") {
        return Ok((1..=total).collect());
    }

    let mut pages = Vec::new();
    for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (start, end) = match token.split_once('-') {
            Some((a, b)) => (parse_page(a)?, parse_page(b)?),
            None => {
                let p = parse_page(token)?;
                (p, p)
            }
        };
        if start > end {
            return Err(PageRangeError::Reversed(start, end));
        }
        pages.extend((start.max(1)..=end.min(total)).filter(|p| *p >= 1));
    }

    pages.sort_unstable();
    pages.dedup();
    if pages.is_empty() {
        return Err(PageRangeError::OutOfBounds {
            expr: expr.to_string(),
            total,
        });
    }
    Ok(pages)
}

fn parse_page(raw: &str) -> Result<u32, PageRangeError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| PageRangeError::Invalid(raw.trim().to_string()))
}

/// 把页码列表压缩成范围表达式：`[1,2,3,5]` -> `"1-3, 5"`
pub fn format_page_range(pages: &[u32]) -> String {
    let mut sorted = pages.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_and_ranges() {
        assert_eq!(parse_page_range("all", 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(
            parse_page_range("7-10, 1-3,5,2", 12).unwrap(),
            vec![1, 2, 3, 5, 7, 8, 9, 10]
        );
    }

    #[test]
    fn test_parse_clamps_to_total() {
        assert_eq!(parse_page_range("0-4", 3).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            parse_page_range("9", 3),
            Err(PageRangeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_page_range("", 3), Err(PageRangeError::Empty));
        assert!(matches!(parse_page_range("1-x", 3), Err(PageRangeError::Invalid(_))));
        assert_eq!(parse_page_range("5-2", 9), Err(PageRangeError::Reversed(5, 2)));
    }

    #[test]
    fn test_format_page_range() {
        assert_eq!(format_page_range(&[5, 1, 2, 3]), "1-3, 5");
        assert_eq!(format_page_range(&[]), "");
    }
}
