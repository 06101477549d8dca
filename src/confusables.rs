// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// UTS#39 confusables table and skeletonization.
//
// Parses the upstream `confusables.txt` format into a longest-match
// code-point map. The table is a process-wide immutable singleton loaded
// lazily on first use; an embedded copy ships with the crate so the
// skeleton view never depends on the filesystem.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

use crate::error::AuditError;

/// Embedded copy of the table, used when no path override is given.
const EMBEDDED_TABLE: &str = include_str!("../assets/unicode/confusables.txt");

static TABLE: OnceLock<ConfusablesTable> = OnceLock::new();

/// Longest-match confusable map keyed by hyphen-joined source code points.
#[derive(Debug, Clone)]
pub struct ConfusablesTable {
    map: HashMap<String, String>,
    max_src_len: usize,
    version: Option<String>,
}

impl ConfusablesTable {
    /// Parse the upstream format: `<hex+> ; <hex+> ; <type>` with `#` comments.
    ///
    /// Malformed lines are skipped; the upstream file is well-formed and a
    /// locally trimmed copy only loses coverage, never correctness.
    pub fn parse(content: &str) -> Self {
        let mut map = HashMap::new();
        let mut max_src_len = 1;
        let mut version = None;

        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("# Version:") {
                version = Some(rest.trim().to_string());
                continue;
            }
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.split(';');
            let (Some(src), Some(dst)) = (fields.next(), fields.next()) else {
                continue;
            };
            let (Some(src_cps), Some(dst_cps)) = (parse_hex_seq(src), parse_hex_seq(dst)) else {
                continue;
            };
            if src_cps.is_empty() || dst_cps.is_empty() {
                continue;
            }

            max_src_len = max_src_len.max(src_cps.len());
            map.insert(join_key(&src_cps), dst_cps.into_iter().collect());
        }

        Self {
            map,
            max_src_len,
            version,
        }
    }

    /// Load from an explicit file path (test and operator override).
    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuditError::AssetMissing(format!("{}: {e}", path.display())))?;
        Ok(Self::parse(&content))
    }

    /// The `# Version:` header, when the file carries one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// UTS#39 skeleton: NFKC, then left-to-right longest-match substitution.
    /// Non-matching code points pass through unchanged.
    pub fn skeletonize(&self, text: &str) -> String {
        let nfkc: Vec<char> = text.nfkc().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        while i < nfkc.len() {
            let window = self.max_src_len.min(nfkc.len() - i);
            let mut matched = false;
            for len in (1..=window).rev() {
                let key = join_key(&nfkc[i..i + len]);
                if let Some(replacement) = self.map.get(&key) {
                    out.push_str(replacement);
                    i += len;
                    matched = true;
                    break;
                }
            }
            if !matched {
                out.push(nfkc[i]);
                i += 1;
            }
        }

        out
    }
}

/// The process-wide table, loaded from the embedded copy on first use.
pub fn table() -> &'static ConfusablesTable {
    TABLE.get_or_init(|| ConfusablesTable::parse(EMBEDDED_TABLE))
}

/// Skeletonize with the process-wide table.
pub fn skeletonize(text: &str) -> String {
    table().skeletonize(text)
}

fn parse_hex_seq(field: &str) -> Option<Vec<char>> {
    let mut cps = Vec::new();
    for token in field.split_whitespace() {
        let cp = u32::from_str_radix(token, 16).ok()?;
        cps.push(char::from_u32(cp)?);
    }
    Some(cps)
}

fn join_key(chars: &[char]) -> String {
    let mut key = String::with_capacity(chars.len() * 5);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 {
            key.push('-');
        }
        key.push_str(&format!("{:x}", *c as u32));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_table_loads_with_version() {
        let t = table();
        assert!(!t.is_empty());
        assert_eq!(t.version(), Some("16.0.0"));
    }

    #[test]
    fn cyrillic_word_skeletonizes_to_latin() {
        // "ignоre" with Cyrillic о (U+043E).
        assert_eq!(skeletonize("ign\u{043E}re"), "ignore");
    }

    #[test]
    fn greek_capitals_skeletonize_to_latin() {
        // "ΡΑΤΗ" in Greek capitals.
        let text = "\u{03A1}\u{0391}\u{03A4}\u{0397}";
        assert_eq!(skeletonize(text), "PATH");
    }

    #[test]
    fn nfkc_applies_before_mapping() {
        // Fullwidth "ｉｇｎｏｒｅ" folds to ASCII under NFKC with no table hit needed.
        let text = "\u{FF49}\u{FF47}\u{FF4E}\u{FF4F}\u{FF52}\u{FF45}";
        assert_eq!(skeletonize(text), "ignore");
    }

    #[test]
    fn multi_codepoint_destination_expands() {
        // Synthetic entry with a three-code-point destination.
        let t = ConfusablesTable::parse("2026 ;\t002E 002E 002E ;\tMA\n");
        assert_eq!(t.skeletonize("wait\u{2026}"), "wait...");
    }

    #[test]
    fn unmapped_code_points_pass_through() {
        assert_eq!(skeletonize("한글 text"), "한글 text");
    }

    #[test]
    fn skeleton_is_idempotent() {
        let text = "ign\u{043E}re prev\u{0456}ous \u{2026}";
        let once = skeletonize(text);
        assert_eq!(skeletonize(&once), once);
    }

    #[test]
    fn longest_match_wins_over_prefix() {
        // Synthetic table: "a" → "x" and "a b" (sequence) → "y".
        let t = ConfusablesTable::parse("0061 ;\t0078 ;\tMA\n0061 0062 ;\t0079 ;\tMA\n");
        assert_eq!(t.max_src_len, 2);
        assert_eq!(t.skeletonize("ab"), "y");
        assert_eq!(t.skeletonize("ac"), "xc");
    }

    #[test]
    fn comments_and_malformed_lines_skipped() {
        let t = ConfusablesTable::parse(
            "# header only\nZZZZ ;\t0061 ;\tMA\n0431 ;\t\n0430 ;\t0061 ;\tMA\n",
        );
        assert_eq!(t.len(), 1);
        assert_eq!(t.skeletonize("\u{0430}"), "a");
    }

    #[test]
    fn load_missing_path_is_asset_missing() {
        let err = ConfusablesTable::load(Path::new("/nonexistent/confusables.txt")).unwrap_err();
        assert!(matches!(err, AuditError::AssetMissing(_)));
    }
}
