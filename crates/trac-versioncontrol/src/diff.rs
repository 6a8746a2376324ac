//! Line diff engine: option parsing, hunk grouping and unified output

use std::collections::BTreeMap;

use serde::Serialize;
use similar::{Algorithm, DiffTag, capture_diff_slices};

/// Context lines around each change when nothing else is requested.
pub const DEFAULT_CONTEXT: usize = 3;

/// How two texts are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffOptions {
    /// Lines of context per hunk; `None` shows the whole file.
    pub context: Option<usize>,
    pub ignore_blank_lines: bool,
    pub ignore_case: bool,
    pub ignore_space_changes: bool,
    pub tab_width: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            context: Some(DEFAULT_CONTEXT),
            ignore_blank_lines: false,
            ignore_case: false,
            ignore_space_changes: false,
            tab_width: 8,
        }
    }
}

impl DiffOptions {
    /// Parse `diff(1)`-style option strings: `-U<N>`, `-B`, `-i`, `-b`.
    pub fn from_options(options: &[String]) -> Self {
        let mut parsed = DiffOptions::default();
        for option in options {
            match option.as_str() {
                "-B" => parsed.ignore_blank_lines = true,
                "-i" => parsed.ignore_case = true,
                "-b" => parsed.ignore_space_changes = true,
                other => {
                    if let Some(n) = other.strip_prefix("-U").and_then(|n| n.parse().ok()) {
                        parsed.context = Some(n);
                    }
                }
            }
        }
        parsed
    }

    fn normalize<'a>(&self, line: &'a str) -> std::borrow::Cow<'a, str> {
        if !self.ignore_case && !self.ignore_space_changes {
            return std::borrow::Cow::Borrowed(line);
        }
        let mut line = line.to_string();
        if self.ignore_case {
            line = line.to_lowercase();
        }
        if self.ignore_space_changes {
            line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        std::borrow::Cow::Owned(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStyle {
    Inline,
    SideBySide,
}

/// Diff preferences read from request arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffPreferences {
    pub style: DiffStyle,
    /// Equivalent `diff(1)` option strings.
    pub options: Vec<String>,
    pub diff: DiffOptions,
}

fn flag(args: &BTreeMap<String, String>, name: &str) -> bool {
    args.get(name)
        .is_some_and(|v| !matches!(v.trim(), "" | "0" | "false" | "off" | "no"))
}

/// Read `style`, `contextlines`, `ignoreblanklines`, `ignorecase` and
/// `ignorewhitespace`. A negative `contextlines` shows full files.
pub fn get_diff_options(args: &BTreeMap<String, String>) -> DiffPreferences {
    let style = match args.get("style").map(String::as_str) {
        Some("sidebyside") => DiffStyle::SideBySide,
        _ => DiffStyle::Inline,
    };

    let mut options = Vec::new();
    let mut diff = DiffOptions::default();

    let context = args
        .get("contextlines")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_CONTEXT as i64);
    if context >= 0 {
        options.push(format!("-U{}", context));
        diff.context = Some(context as usize);
    } else {
        diff.context = None;
    }
    if flag(args, "ignoreblanklines") {
        options.push("-B".to_string());
        diff.ignore_blank_lines = true;
    }
    if flag(args, "ignorecase") {
        options.push("-i".to_string());
        diff.ignore_case = true;
    }
    if flag(args, "ignorewhitespace") {
        options.push("-b".to_string());
        diff.ignore_space_changes = true;
    }

    DiffPreferences {
        style,
        options,
        diff,
    }
}

// ── Opcodes ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Opcode {
    tag: Tag,
    i1: usize,
    i2: usize,
    j1: usize,
    j2: usize,
}

impl Opcode {
    fn new(tag: Tag, i1: usize, i2: usize, j1: usize, j2: usize) -> Self {
        Opcode { tag, i1, i2, j1, j2 }
    }
}

fn raw_opcodes(fromlines: &[&str], tolines: &[&str], options: &DiffOptions) -> Vec<Opcode> {
    let from: Vec<_> = fromlines.iter().map(|l| options.normalize(l)).collect();
    let to: Vec<_> = tolines.iter().map(|l| options.normalize(l)).collect();

    let mut opcodes: Vec<Opcode> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, &from, &to) {
        let (tag, old, new) = op.as_tag_tuple();
        let tag = match tag {
            DiffTag::Equal => Tag::Equal,
            DiffTag::Delete => Tag::Delete,
            DiffTag::Insert => Tag::Insert,
            DiffTag::Replace => Tag::Replace,
        };
        // Adjacent deletes and inserts form one replacement.
        match opcodes.last_mut() {
            Some(last) if last.tag != Tag::Equal && tag != Tag::Equal => {
                last.tag = Tag::Replace;
                last.i2 = old.end;
                last.j2 = new.end;
            }
            _ => opcodes.push(Opcode::new(tag, old.start, old.end, new.start, new.end)),
        }
    }
    for op in opcodes.iter_mut() {
        op.tag = match (op.i1 == op.i2, op.j1 == op.j2) {
            (_, _) if op.tag == Tag::Equal => Tag::Equal,
            (true, _) => Tag::Insert,
            (_, true) => Tag::Delete,
            _ => Tag::Replace,
        };
    }
    opcodes
}

fn all_blank(lines: &[&str]) -> bool {
    lines.iter().all(|l| l.trim().is_empty())
}

/// Opcodes with ignorable changes folded into the surrounding equal runs.
fn get_opcodes(fromlines: &[&str], tolines: &[&str], options: &DiffOptions) -> Vec<Opcode> {
    let mut result = Vec::new();
    let mut previous: Option<Opcode> = None;

    for op in raw_opcodes(fromlines, tolines, options) {
        let ignorable = op.tag == Tag::Equal
            || (options.ignore_blank_lines
                && match op.tag {
                    Tag::Delete => all_blank(&fromlines[op.i1..op.i2]),
                    Tag::Insert => all_blank(&tolines[op.j1..op.j2]),
                    _ => false,
                });
        if ignorable {
            previous = Some(match previous {
                Some(prev) => Opcode::new(Tag::Equal, prev.i1, op.i2, prev.j1, op.j2),
                None => Opcode::new(Tag::Equal, op.i1, op.i2, op.j1, op.j2),
            });
            continue;
        }
        if let Some(prev) = previous.take() {
            result.push(prev);
        }
        result.push(op);
    }
    result.extend(previous);
    result
}

/// Split opcodes into hunks with `context` lines of equal text around
/// each change. Identical inputs produce no hunks.
fn group_opcodes(mut codes: Vec<Opcode>, context: Option<usize>) -> Vec<Vec<Opcode>> {
    if codes.iter().all(|op| op.tag == Tag::Equal) {
        return Vec::new();
    }
    let Some(n) = context else {
        return vec![codes];
    };

    if let Some(first) = codes.first_mut().filter(|op| op.tag == Tag::Equal) {
        first.i1 = first.i1.max(first.i2.saturating_sub(n));
        first.j1 = first.j1.max(first.j2.saturating_sub(n));
    }
    if let Some(last) = codes.last_mut().filter(|op| op.tag == Tag::Equal) {
        last.i2 = last.i2.min(last.i1 + n);
        last.j2 = last.j2.min(last.j1 + n);
    }

    let mut groups = Vec::new();
    let mut group = Vec::new();
    for op in codes {
        let mut op = op;
        if op.tag == Tag::Equal && op.i2 - op.i1 > 2 * n {
            group.push(Opcode::new(
                Tag::Equal,
                op.i1,
                op.i2.min(op.i1 + n),
                op.j1,
                op.j2.min(op.j1 + n),
            ));
            groups.push(std::mem::take(&mut group));
            op.i1 = op.i1.max(op.i2.saturating_sub(n));
            op.j1 = op.j1.max(op.j2.saturating_sub(n));
        }
        group.push(op);
    }
    if !(group.is_empty() || group.len() == 1 && group[0].tag == Tag::Equal) {
        groups.push(group);
    }
    groups.retain(|g| g.iter().any(|op| op.tag != Tag::Equal));
    groups
}

// ── Blocks ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Unmod,
    Add,
    Rem,
    Mod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSide {
    pub offset: usize,
    pub lines: Vec<String>,
}

/// A run of lines sharing one classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub base: BlockSide,
    pub changed: BlockSide,
}

pub type Hunk = Vec<Block>;

fn expand_tabs(line: &str, tab_width: usize) -> String {
    if tab_width == 0 || !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut column = 0;
    for ch in line.chars() {
        if ch == '\t' {
            let pad = tab_width - column % tab_width;
            out.push_str(&" ".repeat(pad));
            column += pad;
        } else {
            out.push(ch);
            column += 1;
        }
    }
    out
}

/// Hunks of classified blocks; an empty vector when nothing differs.
pub fn diff_blocks(fromlines: &[&str], tolines: &[&str], options: &DiffOptions) -> Vec<Hunk> {
    let opcodes = get_opcodes(fromlines, tolines, options);
    let lines = |src: &[&str]| -> Vec<String> {
        src.iter().map(|l| expand_tabs(l, options.tab_width)).collect()
    };

    group_opcodes(opcodes, options.context)
        .into_iter()
        .map(|group| {
            let mut blocks: Vec<Block> = Vec::new();
            for op in group {
                let kind = match op.tag {
                    Tag::Equal => BlockKind::Unmod,
                    Tag::Replace => BlockKind::Mod,
                    Tag::Delete => BlockKind::Rem,
                    Tag::Insert => BlockKind::Add,
                };
                match blocks.last_mut() {
                    Some(block) if block.kind == kind => {
                        block.base.lines.extend(lines(&fromlines[op.i1..op.i2]));
                        block.changed.lines.extend(lines(&tolines[op.j1..op.j2]));
                    }
                    _ => blocks.push(Block {
                        kind,
                        base: BlockSide {
                            offset: op.i1,
                            lines: lines(&fromlines[op.i1..op.i2]),
                        },
                        changed: BlockSide {
                            offset: op.j1,
                            lines: lines(&tolines[op.j1..op.j2]),
                        },
                    }),
                }
            }
            blocks
        })
        .collect()
}

/// Unified diff lines (hunk headers and prefixed lines, no terminators).
pub fn unified_diff(fromlines: &[&str], tolines: &[&str], options: &DiffOptions) -> Vec<String> {
    let opcodes = get_opcodes(fromlines, tolines, options);
    let mut out = Vec::new();

    for group in group_opcodes(opcodes, options.context) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let (i1, i2, j1, j2) = (first.i1, last.i2, first.j1, last.j2);
        // An add starts before the first line of an empty file.
        let old_start = if i1 == 0 && i2 == 0 { 0 } else { i1 + 1 };
        out.push(format!(
            "@@ -{},{} +{},{} @@",
            old_start,
            i2 - i1,
            j1 + 1,
            j2 - j1
        ));
        for op in &group {
            if op.tag == Tag::Equal {
                out.extend(fromlines[op.i1..op.i2].iter().map(|l| format!(" {}", l)));
                continue;
            }
            if matches!(op.tag, Tag::Replace | Tag::Delete) {
                out.extend(fromlines[op.i1..op.i2].iter().map(|l| format!("-{}", l)));
            }
            if matches!(op.tag, Tag::Replace | Tag::Insert) {
                out.extend(tolines[op.j1..op.j2].iter().map(|l| format!("+{}", l)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_options_from_args() {
        let prefs = get_diff_options(&args(&[
            ("style", "sidebyside"),
            ("contextlines", "5"),
            ("ignorecase", "1"),
        ]));
        assert_eq!(prefs.style, DiffStyle::SideBySide);
        assert_eq!(prefs.options, vec!["-U5".to_string(), "-i".to_string()]);
        assert_eq!(prefs.diff.context, Some(5));
        assert_eq!(DiffOptions::from_options(&prefs.options).context, Some(5));
    }

    #[test]
    fn test_negative_context_means_full_file() {
        let prefs = get_diff_options(&args(&[("contextlines", "-1")]));
        assert!(prefs.options.is_empty());
        assert_eq!(prefs.diff.context, None);
        assert_eq!(DiffOptions::from_options(&[]).context, Some(3));
    }

    #[test]
    fn test_identical_input_has_no_hunks() {
        let lines = ["a", "b"];
        assert!(diff_blocks(&lines, &lines, &DiffOptions::default()).is_empty());
        assert!(unified_diff(&[], &[], &DiffOptions::default()).is_empty());
    }

    #[test]
    fn test_unified_replace() {
        let diff = unified_diff(&["a", "b", "c"], &["a", "B", "c"], &DiffOptions::default());
        insta::assert_snapshot!(diff.join("\n"), @r"
@@ -1,3 +1,3 @@
 a
-b
+B
 c
");
    }

    #[test]
    fn test_unified_add_to_empty_file() {
        let diff = unified_diff(&[], &["x", "y"], &DiffOptions::default());
        assert_eq!(diff, vec!["@@ -0,0 +1,2 @@", "+x", "+y"]);
    }

    #[test]
    fn test_distant_changes_make_two_hunks() {
        let old: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
        let mut new = old.clone();
        new[1] = "two".to_string();
        new[17] = "eighteen".to_string();
        let old: Vec<&str> = old.iter().map(String::as_str).collect();
        let new: Vec<&str> = new.iter().map(String::as_str).collect();

        let options = DiffOptions {
            context: Some(2),
            ..DiffOptions::default()
        };
        let headers: Vec<_> = unified_diff(&old, &new, &options)
            .into_iter()
            .filter(|l| l.starts_with("@@"))
            .collect();
        assert_eq!(headers, vec!["@@ -1,4 +1,4 @@", "@@ -16,5 +16,5 @@"]);

        let hunks = diff_blocks(&old, &new, &options);
        assert_eq!(hunks.len(), 2);
        let kinds: Vec<_> = hunks[0].iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BlockKind::Unmod, BlockKind::Mod, BlockKind::Unmod]);
        assert_eq!(hunks[0][1].base.offset, 1);
        assert_eq!(hunks[0][1].changed.lines, vec!["two".to_string()]);
    }

    #[test]
    fn test_ignore_options() {
        let old = ["Hello  World", "x"];
        let new = ["hello world", "", "x"];
        let strict = DiffOptions::default();
        assert!(!unified_diff(&old, &new, &strict).is_empty());

        let lenient = DiffOptions {
            ignore_case: true,
            ignore_space_changes: true,
            ignore_blank_lines: true,
            ..DiffOptions::default()
        };
        assert!(unified_diff(&old, &new, &lenient).is_empty());
        assert!(diff_blocks(&old, &new, &lenient).is_empty());
    }

    #[test]
    fn test_tabs_are_expanded_in_blocks() {
        let options = DiffOptions {
            tab_width: 4,
            ..DiffOptions::default()
        };
        let hunks = diff_blocks(&["a\tb"], &["a\tc"], &options);
        assert_eq!(hunks[0][0].base.lines, vec!["a   b".to_string()]);
    }
}
