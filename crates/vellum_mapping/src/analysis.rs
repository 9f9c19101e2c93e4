//! Analyzer handles and the registry they resolve against.
//!
//! Analyzers here are names bound to the indexing engine elsewhere; the
//! mapping layer only routes a field to the right handle. The registry is
//! injected at `MappingService` construction so there is no global state.

use std::collections::HashMap;

/// Which analysis chain a caller is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalyzerKind {
    Index,
    Search,
    SearchQuote,
}

/// Named handle to an analysis chain owned by the indexing engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Analyzer {
    name: String,
}

impl Analyzer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of known analyzers plus the per-kind defaults.
#[derive(Clone, Debug)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Analyzer>,
    default_index: Analyzer,
    default_search: Analyzer,
    default_search_quote: Analyzer,
}

impl AnalyzerRegistry {
    /// Build a registry with the given per-kind default analyzers. The
    /// defaults are registered under their own names as well.
    pub fn new(default_index: Analyzer, default_search: Analyzer, default_search_quote: Analyzer) -> Self {
        let mut analyzers = HashMap::new();
        for analyzer in [&default_index, &default_search, &default_search_quote] {
            analyzers.insert(analyzer.name().to_string(), analyzer.clone());
        }
        Self {
            analyzers,
            default_index,
            default_search,
            default_search_quote,
        }
    }

    /// Registry where all three defaults are the single `standard` analyzer.
    pub fn standard() -> Self {
        let standard = Analyzer::new("standard");
        Self::new(standard.clone(), standard.clone(), standard)
    }

    pub fn register(&mut self, analyzer: Analyzer) {
        self.analyzers.insert(analyzer.name().to_string(), analyzer);
    }

    pub fn get(&self, name: &str) -> Option<&Analyzer> {
        self.analyzers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.analyzers.contains_key(name)
    }

    /// The fallback analyzer used when a field carries no override.
    pub fn default_for(&self, kind: AnalyzerKind) -> &Analyzer {
        match kind {
            AnalyzerKind::Index => &self.default_index,
            AnalyzerKind::Search => &self.default_search,
            AnalyzerKind::SearchQuote => &self.default_search_quote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered_and_resolvable() {
        let registry = AnalyzerRegistry::standard();
        assert!(registry.contains("standard"));
        assert_eq!(registry.default_for(AnalyzerKind::Index).name(), "standard");
        assert_eq!(registry.default_for(AnalyzerKind::SearchQuote).name(), "standard");
    }

    #[test]
    fn registered_analyzers_resolve_by_name() {
        let mut registry = AnalyzerRegistry::standard();
        registry.register(Analyzer::new("german"));
        assert_eq!(registry.get("german").map(Analyzer::name), Some("german"));
        assert!(registry.get("missing").is_none());
    }
}
