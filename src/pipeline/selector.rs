//! Build and test selectors over build identifiers.
//!
//! Selectors are whitespace-separated shell patterns. `{a,b}` groups expand
//! before matching, so `cp3{8,9}-*` selects both cp38 and cp39.

use crate::error::ConfigurationError;
use glob::Pattern;

/// Patterns matched against build identifiers
#[derive(Debug, Clone, Default)]
struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    fn parse(option: &str, value: &str) -> Result<Self, ConfigurationError> {
        let mut patterns = Vec::new();
        for word in value.split_whitespace() {
            for expanded in expand_braces(word) {
                let pattern =
                    Pattern::new(&expanded).map_err(|e| ConfigurationError::InvalidOption {
                        option: option.to_string(),
                        reason: format!("bad pattern '{expanded}': {e}"),
                    })?;
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    fn matches(&self, identifier: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(identifier))
    }
}

/// Which identifiers get built
#[derive(Debug, Clone)]
pub struct BuildSelector {
    build: PatternSet,
    skip: PatternSet,
}

impl BuildSelector {
    /// Build everything matching `build` and not matching `skip`
    pub fn new(build: &str, skip: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            build: PatternSet::parse("build", build)?,
            skip: PatternSet::parse("skip", skip)?,
        })
    }

    /// Whether `identifier` should be built
    pub fn matches(&self, identifier: &str) -> bool {
        self.build.matches(identifier) && !self.skip.matches(identifier)
    }
}

/// Which built identifiers get tested
#[derive(Debug, Clone)]
pub struct TestSelector {
    skip: PatternSet,
}

impl TestSelector {
    /// Test everything not matching `skip`
    pub fn new(skip: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            skip: PatternSet::parse("test-skip", skip)?,
        })
    }

    /// Whether `identifier` should be tested
    pub fn matches(&self, identifier: &str) -> bool {
        !self.skip.matches(identifier)
    }
}

/// Expand `{a,b}` alternatives, innermost-first, left to right
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    // find the matching close brace and the top-level commas inside
    let mut depth = 0;
    let mut close = None;
    let mut commas = Vec::new();
    for (idx, ch) in pattern[open..].char_indices() {
        let idx = open + idx;
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => commas.push(idx),
            _ => {}
        }
    }

    let Some(close) = close else {
        return vec![pattern.to_string()];
    };
    if commas.is_empty() {
        // `{x}` is literal; keep expanding after it
        let head = &pattern[..=close];
        return expand_braces(&pattern[close + 1..])
            .into_iter()
            .map(|tail| format!("{head}{tail}"))
            .collect();
    }

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(&commas);
    bounds.push(close);

    let mut result = Vec::new();
    for window in bounds.windows(2) {
        let alternative = &pattern[window[0] + 1..window[1]];
        for expanded in expand_braces(&format!("{prefix}{alternative}{suffix}")) {
            if !result.contains(&expanded) {
                result.push(expanded);
            }
        }
    }
    result
}
