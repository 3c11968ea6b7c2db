/// Content identity shared by sanctions, cases, and case logs
use crate::error::{CaseError, CaseResult};
use serde::{Deserialize, Serialize};

/// Kind of content a sanction or case points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    User,
    Post,
    Thread,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::User => "user",
            ContentKind::Post => "post",
            ContentKind::Thread => "thread",
        }
    }

    pub fn from_str(s: &str) -> CaseResult<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(ContentKind::User),
            "post" => Ok(ContentKind::Post),
            "thread" => Ok(ContentKind::Thread),
            _ => Err(CaseError::Internal(format!("Invalid content kind: {}", s))),
        }
    }
}

/// Reference to a live piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: i64,
    pub title: String,
}

impl ContentRef {
    pub fn new(kind: ContentKind, id: i64, title: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            title: title.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [ContentKind::User, ContentKind::Post, ContentKind::Thread] {
            assert_eq!(ContentKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(ContentKind::from_str("page").is_err());
    }
}
