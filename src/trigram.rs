// Trigram extraction and pattern reduction
// Trigrams are 24-bit integers over ASCII-lowercased bytes; they drive both
// the durable posting lists and the in-memory fuzzy-name candidate sets.

use std::collections::HashSet;

/// A trigram packed as `(c1 << 16) | (c2 << 8) | c3`.
pub type Trigram = u32;

/// Bytes that a trigram may never contain. Dropping these forbids trigrams
/// that span lines and keeps the posting lists free of low-signal entries.
const FORBIDDEN: [u8; 3] = [b'\n', b'\r', 0];

#[inline]
fn lower(b: u8) -> u8 {
    b.to_ascii_lowercase()
}

#[inline]
fn pack(a: u8, b: u8, c: u8) -> Trigram {
    ((a as u32) << 16) | ((b as u32) << 8) | (c as u32)
}

/// Extract the set of trigrams from UTF-8 text after ASCII lower-casing.
///
/// Trigrams containing newline, carriage return, or NUL in any position
/// are dropped.
pub fn extract_trigrams(text: &str) -> HashSet<Trigram> {
    let bytes = text.as_bytes();
    if bytes.len() < 3 {
        return HashSet::new();
    }
    let mut set = HashSet::with_capacity((bytes.len() - 2).min(4096));
    for w in bytes.windows(3) {
        if w.iter().any(|b| FORBIDDEN.contains(b)) {
            continue;
        }
        set.insert(pack(lower(w[0]), lower(w[1]), lower(w[2])));
    }
    set
}

/// Stable 64-bit content hash: the first 8 bytes of the md5 digest,
/// little-endian, as a signed integer.
///
/// 64 bits of a 128-bit digest are plenty for change detection; callers
/// that need byte-exactness must compare content, not hashes.
pub fn content_hash(content: &[u8]) -> i64 {
    let digest = md5::compute(content);
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest.0[..8]);
    i64::from_le_bytes(first)
}

/// Split a regex pattern on top-level un-escaped `|`, tracking group depth
/// and character-class brackets. A pattern with no top-level alternation
/// comes back as a single branch.
pub fn split_alternation(pattern: &str) -> Vec<String> {
    let mut branches = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '[' if !in_class => {
                in_class = true;
                current.push(c);
            }
            ']' if in_class => {
                in_class = false;
                current.push(c);
            }
            '(' if !in_class => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_class && depth > 0 => {
                depth -= 1;
                current.push(c);
            }
            '|' if !in_class && depth == 0 => {
                branches.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    branches.push(current);
    branches
}

/// Compute the set of trigrams every string matching `pattern` must contain.
///
/// AND semantics: a candidate file must contain all returned trigrams. An
/// empty set means the pattern is unindexable and the caller must fall back
/// to a full scan.
///
/// For alternations, each branch's set is computed independently; if any
/// branch is unindexable the whole pattern is, otherwise the branch sets
/// are intersected (a matching string satisfies some branch, so only
/// trigrams required by every branch are required overall).
pub fn pattern_to_trigrams(pattern: &str, is_regex: bool) -> HashSet<Trigram> {
    if !is_regex {
        return extract_trigrams(pattern);
    }
    let branches = split_alternation(pattern);
    if branches.len() > 1 {
        let mut sets = Vec::with_capacity(branches.len());
        for branch in &branches {
            let set = branch_trigrams(branch);
            if set.is_empty() {
                return HashSet::new();
            }
            sets.push(set);
        }
        let mut iter = sets.into_iter();
        let mut acc = iter.next().unwrap_or_default();
        for set in iter {
            acc.retain(|t| set.contains(t));
        }
        acc
    } else {
        branch_trigrams(pattern)
    }
}

/// Trigrams required by a single alternation-free branch: the union of the
/// trigrams of every contiguous literal run of length >= 3.
fn branch_trigrams(branch: &str) -> HashSet<Trigram> {
    let mut set = HashSet::new();
    for run in literal_runs(branch) {
        for t in extract_trigrams(&run) {
            set.insert(t);
        }
    }
    set
}

/// Extract contiguous literal runs from a regex branch.
///
/// Runs break on the metacharacters `. + * ? { ^ $`, on character classes,
/// and on groups (group bodies may alternate or repeat, so nothing inside
/// one is required); the escaped forms `\. \( \) \[ \] \{ \} \* \+ \? \|
/// \^ \$` count as literals. A `*`, `+`, `?` or `{` quantifier also
/// invalidates the character it applies to, so the preceding literal is
/// trimmed by one.
fn literal_runs(branch: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut chars = branch.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(e @ ('.' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '+' | '?' | '|'
                | '^' | '$' | '\\')) => current.push(e),
                // \d, \w, \s and friends are not literals
                _ => flush(&mut runs, &mut current),
            },
            '*' | '+' | '?' | '{' => {
                // the quantified character may repeat zero or more times,
                // so it cannot be required
                current.pop();
                flush(&mut runs, &mut current);
                if c == '{' {
                    for n in chars.by_ref() {
                        if n == '}' {
                            break;
                        }
                    }
                }
            }
            '.' | '^' | '$' => flush(&mut runs, &mut current),
            '[' => {
                flush(&mut runs, &mut current);
                let mut escaped = false;
                for n in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if n == '\\' {
                        escaped = true;
                    } else if n == ']' {
                        break;
                    }
                }
            }
            '(' => {
                flush(&mut runs, &mut current);
                skip_group(&mut chars);
            }
            ')' => flush(&mut runs, &mut current),
            // an un-escaped pipe here means unbalanced nesting; nothing in
            // this branch can be required
            '|' => return Vec::new(),
            _ => current.push(c),
        }
    }
    flush(&mut runs, &mut current);
    runs.retain(|r| r.len() >= 3);
    runs
}

/// Skip to the matching close paren, honoring escapes, classes, and nesting.
fn skip_group(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    let mut depth = 1usize;
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            _ => {}
        }
    }
}

fn flush(runs: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        runs.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grams(s: &str) -> HashSet<Trigram> {
        extract_trigrams(s)
    }

    #[test]
    fn test_extract_basic() {
        let set = grams("abc");
        assert_eq!(set.len(), 1);
        assert!(set.contains(&pack(b'a', b'b', b'c')));
    }

    #[test]
    fn test_extract_lowercases() {
        assert_eq!(grams("ABC"), grams("abc"));
        assert_eq!(grams("AActor"), grams("aactor"));
    }

    #[test]
    fn test_extract_drops_line_breaks() {
        // no trigram may span the newline
        let set = grams("ab\ncd");
        assert!(set.is_empty());
        let set = grams("abcd\nefgh");
        assert_eq!(set.len(), 4); // abc bcd efg fgh
    }

    #[test]
    fn test_extract_short_input() {
        assert!(grams("").is_empty());
        assert!(grams("ab").is_empty());
    }

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash(b"class AActor {};");
        let b = content_hash(b"class AActor {};");
        let c = content_hash(b"class APawn {};");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_alternation_top_level() {
        assert_eq!(split_alternation("foo|bar"), vec!["foo", "bar"]);
        assert_eq!(split_alternation("foo"), vec!["foo"]);
        // grouped alternation is not top-level
        assert_eq!(split_alternation("a(b|c)d"), vec!["a(b|c)d"]);
        // class-contained pipe is not an alternation
        assert_eq!(split_alternation("a[|]b"), vec!["a[|]b"]);
        assert_eq!(split_alternation(r"a\|b"), vec![r"a\|b"]);
    }

    #[test]
    fn test_literal_pattern_is_complete() {
        // for a pure literal the required set is exactly its trigram set
        let p = "DestroyActor";
        assert_eq!(pattern_to_trigrams(p, true), grams(p));
        assert_eq!(pattern_to_trigrams(p, false), grams(p));
    }

    #[test]
    fn test_unindexable_patterns() {
        assert!(pattern_to_trigrams(".*", true).is_empty());
        assert!(pattern_to_trigrams("a|b", true).is_empty());
        assert!(pattern_to_trigrams("[abc]+", true).is_empty());
        assert!(pattern_to_trigrams("ab", true).is_empty());
    }

    #[test]
    fn test_alternation_intersects_branches() {
        // shared literal stem survives the intersection
        let set = pattern_to_trigrams("DestroyActor|DestroyPawn", true);
        assert!(set.contains(&pack(b'd', b'e', b's')));
        assert!(set.contains(&pack(b't', b'r', b'o')));
        assert!(!set.contains(&pack(b'a', b'w', b'n')));
        // disjoint branches require nothing in common
        assert!(pattern_to_trigrams("SetTimer|FTimerHandle", true)
            .is_subset(&grams("settimer")));
    }

    #[test]
    fn test_alternation_with_unindexable_branch() {
        assert!(pattern_to_trigrams("DestroyActor|ab", true).is_empty());
        assert!(pattern_to_trigrams("DestroyActor|.*", true).is_empty());
    }

    #[test]
    fn test_quantifier_invalidates_preceding_char() {
        // "abc+" requires "ab" plus at least one c, but only "abc" with the
        // final char un-required: runs are "ab" (too short)
        assert!(pattern_to_trigrams("abc+", true).is_empty());
        let set = pattern_to_trigrams("abcd+", true);
        assert_eq!(set, grams("abc"));
    }

    #[test]
    fn test_escaped_metachars_are_literals() {
        let set = pattern_to_trigrams(r"foo\.bar", true);
        assert_eq!(set, grams("foo.bar"));
        let set = pattern_to_trigrams(r"a\{b\}c", true);
        assert_eq!(set, grams("a{b}c"));
    }

    #[test]
    fn test_groups_are_not_required() {
        // a group body may alternate, so only the flanks are required
        let set = pattern_to_trigrams("foo(bar|baz)qux", true);
        let mut expected = grams("foo");
        expected.extend(grams("qux"));
        assert_eq!(set, expected);
    }

    #[test]
    fn test_class_breaks_runs() {
        let set = pattern_to_trigrams("foo[0-9]bar", true);
        let mut expected = grams("foo");
        expected.extend(grams("bar"));
        assert_eq!(set, expected);
    }

    #[test]
    fn test_soundness_on_sample() {
        // every string matching the pattern contains all required trigrams
        let pattern = r"UCLASS\(Blueprint";
        let required = pattern_to_trigrams(pattern, true);
        let haystack = "UCLASS(BlueprintType)";
        let hay_grams = grams(haystack);
        assert!(required.iter().all(|t| hay_grams.contains(t)));
    }
}
