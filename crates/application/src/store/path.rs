//! 路径工具：`/` 分隔，忽略首尾斜杠，空路径表示根节点

use super::StoreError;

const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// 拆分并校验路径
pub fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    for part in &parts {
        if part.is_empty() || part.contains(FORBIDDEN) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(parts)
}

pub fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

pub fn join(parts: &[&str]) -> String {
    parts.join("/")
}

/// `ancestor` 是否为 `path` 本身或其祖先
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    let ancestor = ancestor.trim_matches('/');
    let path = path.trim_matches('/');
    if ancestor.is_empty() || ancestor == path {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// 两条路径是否在同一条祖先链上
pub fn is_related(a: &str, b: &str) -> bool {
    is_ancestor_or_self(a, b) || is_ancestor_or_self(b, a)
}
