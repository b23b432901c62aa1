//! 领域模型错误定义
//!
//! 标识符、字段校验与业务规则三类错误。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 标识符不合法（不能作为存储路径片段）
    #[error("标识符无效: {field}: {message}")]
    InvalidIdentifier { field: String, message: String },

    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 业务规则违反错误
    #[error("业务规则违反: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl DomainError {
    /// 创建标识符错误
    pub fn invalid_identifier(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建业务规则违反错误
    pub fn business_rule_violation(rule: impl Into<String>) -> Self {
        Self::BusinessRuleViolation { rule: rule.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_field_context() {
        let err = DomainError::validation_error("room_name", "too long");
        assert_eq!(err.to_string(), "验证失败: room_name: too long");
        assert!(matches!(
            DomainError::invalid_identifier("user_id", "contains '/'"),
            DomainError::InvalidIdentifier { .. }
        ));
    }
}
