//! `.photoignore` rules
//!
//! Each directory may carry an ignore file with gitignore-style patterns.
//! Rules apply to the directory that holds the file and everything below it.
//! `#` starts a comment, `!` re-includes, a trailing `/` restricts a pattern
//! to directories, and a pattern containing `/` is anchored to the directory
//! of the ignore file. Within and across files the last matching rule wins.

use std::path::{Path, PathBuf};

use regex::Regex;

/// Ignore file looked up in every directory.
pub const IGNORE_FILE_NAME: &str = ".photoignore";

#[derive(Debug, Clone)]
struct IgnoreRule {
    regex: Regex,
    negated: bool,
    dir_only: bool,
    anchored: bool,
}

/// Rules parsed from one ignore file, relative to `base`.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    base: PathBuf,
    rules: Vec<IgnoreRule>,
}

/// Translate a glob into an anchored regex. `**` crosses separators,
/// `*` and `?` do not.
pub fn glob_to_regex(glob: &str) -> Option<Regex> {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // "**/" also matches zero directories
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).ok()
}

impl IgnoreRules {
    pub fn parse(base: &Path, content: &str) -> Self {
        let rules = content
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let (negated, line) = match line.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, line),
                };
                let (dir_only, line) = match line.strip_suffix('/') {
                    Some(rest) => (true, rest),
                    None => (false, line),
                };
                let anchored = line.contains('/');
                let pattern = line.trim_start_matches('/');
                if pattern.is_empty() {
                    return None;
                }
                match glob_to_regex(pattern) {
                    Some(regex) => Some(IgnoreRule {
                        regex,
                        negated,
                        dir_only,
                        anchored,
                    }),
                    None => {
                        tracing::warn!("Ignoring invalid pattern {:?} in {}", line, base.display());
                        None
                    }
                }
            })
            .collect();

        Self {
            base: base.to_path_buf(),
            rules,
        }
    }

    /// Read `dir/.photoignore`, if present and readable.
    pub fn load(dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(dir.join(IGNORE_FILE_NAME)).ok()?;
        let rules = Self::parse(dir, &content);
        if rules.rules.is_empty() {
            None
        } else {
            Some(rules)
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `Some(true)` ignored, `Some(false)` explicitly re-included, `None` when
    /// no rule mentions the path.
    pub fn matches(&self, path: &Path, is_dir: bool) -> Option<bool> {
        let rel = path.strip_prefix(&self.base).ok()?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel.is_empty() {
            return None;
        }
        let name = rel.rsplit('/').next().unwrap_or(&rel);

        let mut verdict = None;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            let subject = if rule.anchored { rel.as_str() } else { name };
            if rule.regex.is_match(subject) {
                verdict = Some(!rule.negated);
            }
        }
        verdict
    }
}

/// Stack of rule sets for the ancestors of the entry being visited.
#[derive(Debug, Default)]
pub struct IgnoreStack {
    frames: Vec<(usize, IgnoreRules)>,
}

impl IgnoreStack {
    /// Drop frames that are not ancestors of an entry at `depth`.
    pub fn truncate_to(&mut self, depth: usize) {
        while matches!(self.frames.last(), Some((d, _)) if *d >= depth) {
            self.frames.pop();
        }
    }

    pub fn push(&mut self, depth: usize, rules: IgnoreRules) {
        self.frames.push((depth, rules));
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let mut ignored = false;
        for (_, rules) in &self.frames {
            if let Some(verdict) = rules.matches(path, is_dir) {
                ignored = verdict;
            }
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("*.tmp").unwrap();
        assert!(re.is_match("a.tmp"));
        assert!(!re.is_match("dir/a.tmp"));

        let re = glob_to_regex("raw/**/*.jpg").unwrap();
        assert!(re.is_match("raw/a.jpg"));
        assert!(re.is_match("raw/x/y/a.jpg"));
        assert!(!re.is_match("other/a.jpg"));
    }

    #[test]
    fn test_rules_with_negation_and_dir_only() {
        let base = Path::new("/photos");
        let rules = IgnoreRules::parse(
            base,
            "# comment\n*.jpg\n!keep.jpg\ncache/\n/exports/*.png\n",
        );

        assert_eq!(rules.matches(Path::new("/photos/a.jpg"), false), Some(true));
        assert_eq!(rules.matches(Path::new("/photos/sub/b.jpg"), false), Some(true));
        assert_eq!(rules.matches(Path::new("/photos/keep.jpg"), false), Some(false));
        assert_eq!(rules.matches(Path::new("/photos/cache"), true), Some(true));
        assert_eq!(rules.matches(Path::new("/photos/cache"), false), None);
        assert_eq!(
            rules.matches(Path::new("/photos/exports/x.png"), false),
            Some(true)
        );
        assert_eq!(rules.matches(Path::new("/photos/sub/exports/x.png"), false), None);
        assert_eq!(rules.matches(Path::new("/elsewhere/a.jpg"), false), None);
    }

    #[test]
    fn test_deeper_file_overrides_parent() {
        let mut stack = IgnoreStack::default();
        stack.push(0, IgnoreRules::parse(Path::new("/p"), "*.png"));
        stack.push(1, IgnoreRules::parse(Path::new("/p/keep"), "!*.png"));

        assert!(stack.is_ignored(Path::new("/p/a.png"), false));
        assert!(!stack.is_ignored(Path::new("/p/keep/a.png"), false));

        stack.truncate_to(1);
        assert!(stack.is_ignored(Path::new("/p/other/a.png"), false));
    }
}
