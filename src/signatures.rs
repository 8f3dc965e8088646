//! Case-insensitive User-Agent signature matching.

/// A list of User-Agent substrings.
#[derive(Debug, Clone)]
pub struct SignatureList {
    signatures: Vec<String>,
    lowered: Vec<String>,
}

impl SignatureList {
    /// Build a list. Blank entries are ignored.
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let signatures: Vec<String> = signatures
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let lowered = signatures.iter().map(|s| s.to_lowercase()).collect();

        Self {
            signatures,
            lowered,
        }
    }

    /// Return the first signature contained in `user_agent`, ignoring case.
    pub fn find(&self, user_agent: &str) -> Option<&str> {
        if user_agent.is_empty() {
            return None;
        }

        let ua = user_agent.to_lowercase();
        self.lowered
            .iter()
            .position(|needle| ua.contains(needle.as_str()))
            .map(|i| self.signatures[i].as_str())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
