//! Static import scanning for sandboxed code.
//!
//! Runs before any process is spawned: every module specifier the code
//! references through `require("m")` or `import ... from "m"` must be
//! on the configured allow-list. Relative and absolute specifiers are
//! local files inside the sandbox working tree and are always allowed.
//! The scan is textual — it cannot see through dynamic specifier
//! construction, which is why the allow-list is enforced again by the
//! subprocess having no network and a bounded lifetime.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ExecError;

fn require_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#).expect("require pattern")
    })
}

fn import_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // matches both `import x from "m"` and bare `import "m"`
        Regex::new(r#"\bimport\b[^;"']*?["']([^"']+)["']"#).expect("import pattern")
    })
}

/// Module specifiers referenced by the code, in encounter order,
/// deduplicated.
pub fn scan_modules(code: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for captures in require_pattern()
        .captures_iter(code)
        .chain(import_pattern().captures_iter(code))
    {
        let specifier = captures[1].to_string();
        if !seen.contains(&specifier) {
            seen.push(specifier);
        }
    }
    seen
}

fn is_local(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Rejects the code if any non-local specifier is missing from the
/// allow-list, naming every violation at once.
pub fn check_modules(code: &str, allowed: &HashSet<String>) -> Result<(), ExecError> {
    let violations: Vec<String> = scan_modules(code)
        .into_iter()
        .filter(|specifier| !is_local(specifier) && !allowed.contains(specifier))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ExecError::ModuleViolation {
            modules: violations,
        })
    }
}
