use std::collections::HashMap;

/// Which index layer a term lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TermVisibility {
    /// Indexed in clear; anyone can match it.
    #[default]
    Public,
    /// Sealed into the encrypted private layer; matching requires the
    /// block password.
    Private,
}

/// A default visibility plus per-term overrides. Terms are matched after
/// normalization, so overrides are case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct TermVisibilityMap {
    default: TermVisibility,
    overrides: HashMap<String, TermVisibility>,
}

impl TermVisibilityMap {
    pub fn new(default: TermVisibility) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// All terms private unless overridden.
    pub fn all_private() -> Self {
        Self::new(TermVisibility::Private)
    }

    pub fn set(mut self, term: &str, visibility: TermVisibility) -> Self {
        self.overrides
            .insert(crate::extract::normalize_term(term), visibility);
        self
    }

    pub fn visibility_of(&self, term: &str) -> TermVisibility {
        self.overrides
            .get(&crate::extract::normalize_term(term))
            .copied()
            .unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_applies_without_override() {
        let map = TermVisibilityMap::default();
        assert_eq!(map.visibility_of("anything"), TermVisibility::Public);
    }

    #[test]
    fn overrides_win_and_ignore_case() {
        let map = TermVisibilityMap::new(TermVisibility::Public)
            .set("John", TermVisibility::Private);
        assert_eq!(map.visibility_of("john"), TermVisibility::Private);
        assert_eq!(map.visibility_of("JOHN"), TermVisibility::Private);
        assert_eq!(map.visibility_of("jane"), TermVisibility::Public);
    }
}
