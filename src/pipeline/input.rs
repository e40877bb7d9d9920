//! 输入分类结果
//!
//! 分类阶段只允许模型回答四个标签之一；其它任何回答都被视为「无效输入」，
//! 回答原文就是返回给用户的说明。

use std::fmt;

/// 用户输入的类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// 指向 GitHub 上某个文件
    GithubDetails,
    /// 直接贴出的源代码
    PythonCode,
    /// 要求修改上一轮生成的代码
    CodeModification,
    /// 根据描述生成新代码
    CodeGeneration,
    /// 无法处理；附带给用户的说明
    Invalid(String),
}

impl InputKind {
    pub const GITHUB_DETAILS: &'static str = "github_details";
    pub const PYTHON_CODE: &'static str = "python_code";
    pub const CODE_MODIFICATION: &'static str = "code_modification";
    pub const CODE_GENERATION: &'static str = "code_generation";

    /// 解析分类阶段的回答；回答为空时返回 None（分类失败）
    ///
    /// 匹配标签前去掉换行、首尾空白与包裹的反引号/引号/句点；
    /// 无效输入保留原文的换行，便于前端按 Markdown 展示。
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let label = trimmed
            .replace(['\n', '\r'], "")
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
            .trim()
            .to_lowercase();

        Some(match label.as_str() {
            Self::GITHUB_DETAILS => Self::GithubDetails,
            Self::PYTHON_CODE => Self::PythonCode,
            Self::CODE_MODIFICATION => Self::CodeModification,
            Self::CODE_GENERATION => Self::CodeGeneration,
            _ => Self::Invalid(trimmed.to_string()),
        })
    }

    pub fn label(&self) -> &str {
        match self {
            Self::GithubDetails => Self::GITHUB_DETAILS,
            Self::PythonCode => Self::PYTHON_CODE,
            Self::CodeModification => Self::CODE_MODIFICATION,
            Self::CodeGeneration => Self::CODE_GENERATION,
            Self::Invalid(_) => "invalid_information",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
