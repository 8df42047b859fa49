//! Kind tag → constructor table.
//!
//! Rule kinds are resolved by name only here, when a rubric is built from its
//! structured form. Adding a kind means registering a constructor; nothing
//! downstream changes.

use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{
    ArgumentStructureRule, CitationQualityRule, CoherenceRule, DomainExpertiseRule, ParamBag,
    PhraseRule, ReadabilityRule, RegexRule, Rule, RuleConfigurationError, SentimentRule,
    WordCountRule, WordOverlapRule,
};

/// Builds a rule of one kind from its generic parameters.
pub type RuleConstructor =
    Arc<dyn Fn(&ParamBag) -> Result<Arc<dyn Rule>, RuleConfigurationError> + Send + Sync>;

lazy_static! {
    static ref BUILTIN: RuleRegistry = RuleRegistry::with_builtins();
}

/// The shared registry of built-in kinds.
pub fn builtin() -> &'static RuleRegistry {
    &BUILTIN
}

/// Table of rule constructors keyed by kind tag.
///
/// BTreeMap keeps `kinds()` in a stable order.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    constructors: BTreeMap<String, RuleConstructor>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PhraseRule::KIND, |p| Ok(Arc::new(PhraseRule::from_params(p)?)));
        registry.register(WordCountRule::KIND, |p| {
            Ok(Arc::new(WordCountRule::from_params(p)?))
        });
        registry.register(RegexRule::KIND, |p| Ok(Arc::new(RegexRule::from_params(p)?)));
        registry.register(WordOverlapRule::KIND, |p| {
            Ok(Arc::new(WordOverlapRule::from_params(p)?))
        });
        registry.register(SentimentRule::KIND, |p| {
            Ok(Arc::new(SentimentRule::from_params(p)?))
        });
        registry.register(ArgumentStructureRule::KIND, |p| {
            Ok(Arc::new(ArgumentStructureRule::from_params(p)?))
        });
        registry.register(DomainExpertiseRule::KIND, |p| {
            Ok(Arc::new(DomainExpertiseRule::from_params(p)?))
        });
        registry.register(CitationQualityRule::KIND, |p| {
            Ok(Arc::new(CitationQualityRule::from_params(p)?))
        });
        registry.register(ReadabilityRule::KIND, |p| {
            Ok(Arc::new(ReadabilityRule::from_params(p)?))
        });
        registry.register(CoherenceRule::KIND, |p| Ok(Arc::new(CoherenceRule::from_params(p)?)));
        registry
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&ParamBag) -> Result<Arc<dyn Rule>, RuleConfigurationError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Build a rule of `kind`, validating its parameters.
    pub fn build(&self, kind: &str, params: &ParamBag) -> Result<Arc<dyn Rule>, RuleConfigurationError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| RuleConfigurationError::UnknownKind(kind.to_string()))?;
        constructor(params)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kind tags in sorted order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
