//! URL rewriting for transformed code and response headers.
//!
//! # Algorithm
//! ```text
//! 1. every occurrence of the upstream origin (case-insensitive)
//!        → public origin + base path
//! 2. inside System.register / *.import call sites only:
//!        '/abs/path'  → '/<base>/abs/path'
//!        'https://…'  → untouched
//! ```
//!
//! Step 1 runs first: literals that became full URLs are no longer
//! absolute paths when step 2 looks at them. Headers get step 1 only.

use std::sync::{Arc, LazyLock};

use regex::{Captures, NoExpand, Regex, RegexBuilder};

/// A module-loader call whose leading arguments are string literals.
static CALL_SITE: LazyLock<Regex> = LazyLock::new(|| {
    const LIT: &str = r#"(?:'[^'\n]*'|"[^"\n]*")"#;
    let pattern = format!(
        r"(?:System\.register|[\w$]+\.import)\s*\(\s*\[?\s*{LIT}(?:\s*,\s*\[?\s*{LIT})*"
    );
    Regex::new(&pattern).expect("call site pattern is valid")
});

/// A quoted literal starting with `/`.
static ABSOLUTE_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(/[^'\n]*)'|"(/[^"\n]*)""#).expect("literal pattern is valid")
});

/// Compile the case-insensitive matcher for an upstream origin.
pub fn origin_pattern(upstream_origin: &str) -> Arc<Regex> {
    let pattern = RegexBuilder::new(&regex::escape(upstream_origin))
        .case_insensitive(true)
        .build()
        .expect("escaped literal is a valid pattern");
    Arc::new(pattern)
}

/// Rewriter bound to one request's upstream origin, public origin and base path.
#[derive(Debug, Clone)]
pub struct Rewriter {
    origin: Arc<Regex>,
    replacement: String,
    base_path: Arc<str>,
}

impl Rewriter {
    /// Build a rewriter. `base_path` must already be normalized.
    pub fn new(origin: Arc<Regex>, public_origin: &str, base_path: Arc<str>) -> Self {
        let replacement = if &*base_path == "/" {
            public_origin.to_string()
        } else {
            format!("{public_origin}{base_path}")
        };
        Self {
            origin,
            replacement,
            base_path,
        }
    }

    /// What upstream origin references are replaced with.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Rewrite code: origin replacement, then absolute paths in loader calls.
    pub fn rewrite(&self, code: &str) -> String {
        let replaced = self.origin.replace_all(code, NoExpand(&self.replacement));
        if &*self.base_path == "/" {
            return replaced.into_owned();
        }

        CALL_SITE
            .replace_all(&replaced, |call: &Captures| {
                ABSOLUTE_LITERAL
                    .replace_all(&call[0], |lit: &Captures| self.prefix_literal(lit))
                    .into_owned()
            })
            .into_owned()
    }

    /// Rewrite a header value (origin replacement only).
    pub fn rewrite_header(&self, value: &str) -> String {
        self.origin
            .replace_all(value, NoExpand(&self.replacement))
            .into_owned()
    }

    fn prefix_literal(&self, lit: &Captures) -> String {
        let (quote, path) = match (lit.get(1), lit.get(2)) {
            (Some(path), _) => ('\'', path.as_str()),
            (None, Some(path)) => ('"', path.as_str()),
            (None, None) => return lit[0].to_string(),
        };
        // protocol-relative
        if path.starts_with("//") {
            return lit[0].to_string();
        }
        format!("{quote}{}{path}{quote}", self.base_path)
    }
}
