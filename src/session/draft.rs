//! Outbound draft: the local user's in-progress chat line.

pub const DEFAULT_DRAFT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("draft is {len} characters, limit is {limit}")]
    TooLong { limit: usize, len: usize },
}

/// Bounded draft text. Edits past the limit are rejected whole; the previous
/// text is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    text: String,
    limit: usize,
}

impl Draft {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { text: String::new(), limit }
    }

    /// Replace the draft text.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::TooLong`] when `text` has more characters than the limit.
    pub fn edit(&mut self, text: impl Into<String>) -> Result<(), DraftError> {
        let text = text.into();
        let len = text.chars().count();
        if len > self.limit {
            return Err(DraftError::TooLong { limit: self.limit, len });
        }
        self.text = text;
        Ok(())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

impl Default for Draft {
    fn default() -> Self {
        Self::new(DEFAULT_DRAFT_LIMIT)
    }
}

#[cfg(test)]
#[path = "draft_test.rs"]
mod tests;
