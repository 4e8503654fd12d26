//! 题目处理上下文
//!
//! 封装"我正在处理哪个会话的第几题"这一信息

use std::fmt::Display;

/// 题目处理上下文
///
/// 只用于日志定位，不参与任何判断
#[derive(Debug, Clone)]
pub struct QuestionCtx {
    /// 会话编号
    pub session_id: String,

    /// 题目编号（`p1_q3`）
    pub question_id: String,

    /// 本阶段中的序号（从1开始）
    pub position: usize,

    /// 本阶段题目总数
    pub total: usize,
}

impl QuestionCtx {
    /// 创建新的题目上下文
    pub fn new(session_id: impl Into<String>, question_id: impl Into<String>, position: usize, total: usize) -> Self {
        Self {
            session_id: session_id.into(),
            question_id: question_id.into(),
            position,
            total,
        }
    }

    /// 脱离会话单独处理一道题（测试、单题诊断）
    pub fn single(question_id: impl Into<String>) -> Self {
        Self::new("-", question_id, 1, 1)
    }
}

impl Display for QuestionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[会话 {} 题目 {} ({}/{})]",
            self.session_id, self.question_id, self.position, self.total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let ctx = QuestionCtx::new("session_20240101_120000", "p1_q3", 3, 10);
        assert_eq!(ctx.to_string(), "[会话 session_20240101_120000 题目 p1_q3 (3/10)]");
    }
}
