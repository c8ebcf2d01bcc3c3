//! Seam for running typed-dialect scripts.
//!
//! Scripts may be written in a statically-typed superset of the execution
//! dialect. The sandbox does not strip types itself; it detects the dialect
//! with a cheap syntactic check and hands the source to a caller-supplied
//! [`Transpiler`].

use regex_lite::Regex;
use std::sync::LazyLock;

/// Turns typed-dialect source into plain executable source.
pub trait Transpiler: Send + Sync {
    fn transpile(&self, code: &str, filename: &str) -> Result<String, String>;
}

static TYPED_DIALECT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // interface Foo { / interface Foo extends Bar {
        r"\binterface\s+[A-Za-z_$][\w$]*\s*(?:extends\s+[^{]+)?\{",
        // type Alias = ... / type Alias<T> = ...
        r"\btype\s+[A-Z][\w$]*\s*(?:<[^>]*>)?\s*=",
        // let x: number / const y: Foo[]
        r"\b(?:let|const|var)\s+[A-Za-z_$][\w$]*\s*:\s*[A-Za-z_$]",
        // function f(a: string, ...) / (a: Foo) =>
        r"\(\s*[A-Za-z_$][\w$]*\??\s*:\s*[A-Za-z_$][\w$.]*(?:<[^>]*>)?(?:\[\])*\s*[,)=]",
        // ): void { / ): Foo[] =>
        r"\)\s*:\s*[A-Za-z_$][\w$]*(?:<[^>]*>)?(?:\[\])*\s*(?:\{|=>)",
        // new Map<string, number>( / f<Foo>(
        r"[A-Za-z_$][\w$]*<\s*[A-Za-z_$][\w$]*(?:\[\])*(?:\s*,\s*[A-Za-z_$][\w$]*(?:\[\])*)*\s*>\s*\(",
        // x as string
        r"\bas\s+(?:string|number|boolean|any|unknown|const)\b",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Light heuristic: true when the source shows type-annotation punctuation,
/// `interface` declarations or generic angle brackets.
pub fn looks_like_typed_dialect(code: &str) -> bool {
    TYPED_DIALECT_PATTERNS.iter().any(|re| re.is_match(code))
}
