use std::collections::HashSet;

/// Pool of opaque bearer credentials for one scan run. The pool only hands
/// out the current credential and advances on rotation; the tried set lets
/// the rate-limit coordinator detect when a full rotation round has been
/// attempted for one logical request.
#[derive(Debug, Default)]
pub struct CredentialPool {
    tokens: Vec<String>,
    current: usize,
    tried: HashSet<usize>,
}

impl CredentialPool {
    pub fn new(tokens: Vec<String>) -> Self {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens, current: 0, tried: HashSet::new() }
    }

    pub fn current(&self) -> Option<&str> {
        self.tokens.get(self.current).map(String::as_str)
    }

    /// Advance to the next credential. No-op with one or zero credentials.
    pub fn rotate(&mut self) {
        if self.tokens.len() > 1 {
            self.current = (self.current + 1) % self.tokens.len();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn mark_current_tried(&mut self) {
        if !self.tokens.is_empty() {
            self.tried.insert(self.current);
        }
    }

    /// True once every credential has been attempted for the current
    /// logical request (trivially true for an empty pool).
    pub fn all_tried(&self) -> bool {
        self.tried.len() >= self.tokens.len()
    }

    /// A fresh logical request starts with a clean rotation history.
    pub fn clear_tried(&mut self) {
        self.tried.clear();
    }

    /// Snapshot of the raw tokens, for credential introspection.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}
