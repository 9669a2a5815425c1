//! Text form of a lesson store.
//!
//! The store is a readable markdown document. Decoding scans for record
//! blocks and ignores surrounding prose; a block that cannot be read is
//! reported as a [`ParseError`] and skipped. Everything that is not a
//! readable record is kept verbatim in the document layout, so a rewrite
//! only touches the records themselves.
//!
//! Lines end at `\n` only. A `\r` is ordinary content and is written back
//! as it was read.

use crate::{Category, Lesson, LessonId, Tier};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use thiserror::Error;

const RECORD_HEADER: &str = "### [";
const NEXT_ID_MARKER: &str = "<!-- recall:next-id ";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// One region of a decoded document, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Prose, headings and unreadable blocks, written back byte for byte.
    Text(String),
    Record(LessonId),
    NextIdMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDocument {
    pub tier: Tier,
    /// Allocator high-water mark: the next number this tier will hand out.
    pub next_number: u32,
    pub lessons: Vec<Lesson>,
    /// Where records sit among the surrounding text. Empty for a document
    /// that was never on disk.
    pub layout: Vec<Segment>,
}

impl LessonDocument {
    pub fn empty(tier: Tier) -> Self {
        Self {
            tier,
            next_number: 1,
            lessons: Vec::new(),
            layout: Vec::new(),
        }
    }

    /// Builds a document from decoded records. Records that belong to
    /// another tier are reported and kept as text.
    pub fn from_decoded(tier: Tier, decoded: Decoded) -> (Self, Vec<ParseError>) {
        let mut skipped = decoded.skipped;
        let mut foreign = Vec::new();
        let mut lessons = Vec::with_capacity(decoded.lessons.len());
        for lesson in decoded.lessons {
            if lesson.id.tier == tier {
                lessons.push(lesson);
            } else {
                skipped.push(ParseError::new(
                    0,
                    format!("record {} does not belong to the {tier} tier", lesson.id),
                ));
                foreign.push(lesson);
            }
        }

        let layout = decoded
            .layout
            .into_iter()
            .map(|segment| match segment {
                Segment::Record(id) => match foreign.iter().find(|lesson| lesson.id == id) {
                    Some(lesson) => {
                        let mut raw = String::new();
                        encode_lesson(&mut raw, lesson);
                        Segment::Text(raw)
                    }
                    None => Segment::Record(id),
                },
                other => other,
            })
            .collect();

        let held = decoded
            .held_ids
            .iter()
            .filter(|id| id.tier == tier)
            .map(|id| id.number)
            .max()
            .unwrap_or(0);
        let floor = max_number(&lessons).max(held) + 1;
        let document = Self {
            tier,
            next_number: decoded.next_number.unwrap_or(1).max(floor),
            lessons,
            layout,
        };
        (document, skipped)
    }

    /// Hands out the next id for this tier. Numbers are never reused, even
    /// after the highest record is deleted.
    pub fn allocate_id(&mut self) -> LessonId {
        let number = self.next_number.max(max_number(&self.lessons) + 1);
        self.next_number = number + 1;
        LessonId::new(self.tier, number)
    }

    pub fn find(&self, id: LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|lesson| lesson.id == id)
    }

    pub fn find_mut(&mut self, id: LessonId) -> Option<&mut Lesson> {
        self.lessons.iter_mut().find(|lesson| lesson.id == id)
    }

    pub fn remove(&mut self, id: LessonId) -> Option<Lesson> {
        let index = self.lessons.iter().position(|lesson| lesson.id == id)?;
        Some(self.lessons.remove(index))
    }
}

fn max_number(lessons: &[Lesson]) -> u32 {
    lessons
        .iter()
        .map(|lesson| lesson.id.number)
        .max()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub lessons: Vec<Lesson>,
    pub next_number: Option<u32>,
    pub skipped: Vec<ParseError>,
    pub layout: Vec<Segment>,
    /// Ids named by blocks that could not be read. The allocator stays
    /// above them so a repaired block never collides with a newer record.
    pub held_ids: Vec<LessonId>,
}

pub fn encode(document: &LessonDocument) -> String {
    let mut out = String::new();
    if document.layout.is_empty() {
        encode_fresh(&mut out, document);
    } else {
        encode_layout(&mut out, document);
    }
    out
}

fn encode_fresh(out: &mut String, document: &LessonDocument) {
    out.push_str(&format!("# LESSONS.md - {}\n\n", document.tier.title()));
    out.push_str(&format!(
        "> **Lessons System**: cite a lesson as [{}###] when you apply it.\n",
        document.tier.prefix()
    ));
    out.push_str("> Stars grow with each citation and fade slowly when a lesson goes unused.\n\n");
    push_marker(out, document.next_number);
    out.push_str("\n## Active Lessons\n");

    for lesson in &document.lessons {
        out.push('\n');
        encode_lesson(out, lesson);
    }
}

/// Writes records back in place. New records follow the last record slot;
/// a removed record takes the blank lines after it along.
fn encode_layout(out: &mut String, document: &LessonDocument) {
    let placed: BTreeSet<LessonId> = document
        .layout
        .iter()
        .filter_map(|segment| match segment {
            Segment::Record(id) => Some(*id),
            _ => None,
        })
        .collect();
    let fresh: Vec<&Lesson> = document
        .lessons
        .iter()
        .filter(|lesson| !placed.contains(&lesson.id))
        .collect();
    let insert_after = document
        .layout
        .iter()
        .rposition(|segment| matches!(segment, Segment::Record(_)));

    let mut marker_written = false;
    let mut removed = false;
    for (index, segment) in document.layout.iter().enumerate() {
        match segment {
            Segment::Text(raw) => {
                let raw = if removed {
                    raw.trim_start_matches(['\r', '\n'])
                } else {
                    raw.as_str()
                };
                out.push_str(raw);
                removed = false;
            }
            Segment::NextIdMarker => {
                push_marker(out, document.next_number);
                marker_written = true;
                removed = false;
            }
            Segment::Record(id) => match document.find(*id) {
                Some(lesson) => {
                    encode_lesson(out, lesson);
                    removed = false;
                }
                None => removed = true,
            },
        }
        if insert_after == Some(index) {
            for (position, lesson) in fresh.iter().enumerate() {
                if !(removed && position == 0) {
                    out.push('\n');
                }
                encode_lesson(out, lesson);
            }
            removed &= fresh.is_empty();
        }
    }

    if insert_after.is_none() {
        for lesson in &fresh {
            end_line(out);
            out.push('\n');
            encode_lesson(out, lesson);
        }
    }
    if !marker_written {
        end_line(out);
        out.push('\n');
        push_marker(out, document.next_number);
    }
}

fn end_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn push_marker(out: &mut String, next_number: u32) {
    out.push_str(&format!("{NEXT_ID_MARKER}{next_number} -->\n"));
}

fn encode_lesson(out: &mut String, lesson: &Lesson) {
    let title = lesson.title.replace(['\r', '\n'], " ");
    out.push_str(&format!(
        "{RECORD_HEADER}{}] {} {}\n",
        lesson.id,
        lesson.stars(),
        title.trim()
    ));
    out.push_str(&format!(
        "- **Uses**: {} | **Created**: {} | **Last**: {} | **Category**: {}\n",
        lesson.uses,
        lesson.created.format(DATE_FORMAT),
        lesson.last_used.format(DATE_FORMAT),
        lesson.category
    ));
    for line in lesson.content.split('\n') {
        if line.is_empty() {
            out.push_str(">\n");
        } else {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
}

struct Header {
    id: LessonId,
    title: String,
    line: usize,
}

struct Metadata {
    uses: u32,
    created: NaiveDate,
    last_used: NaiveDate,
    category: Category,
}

struct Block {
    header: Header,
    metadata: Option<Metadata>,
    content: Vec<String>,
    raw: String,
}

pub fn decode(text: &str) -> Decoded {
    let mut decoded = Decoded::default();
    let mut seen = BTreeSet::new();
    let mut current: Option<Block> = None;

    for (index, raw) in text.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let line = raw.strip_suffix('\n').unwrap_or(raw);

        if let Some(rest) = line.strip_prefix(NEXT_ID_MARKER) {
            finish_block(current.take(), &mut decoded, &mut seen);
            match rest.trim_end().trim_end_matches("-->").trim().parse::<u32>() {
                Ok(number) => {
                    decoded.next_number = Some(number);
                    decoded.layout.push(Segment::NextIdMarker);
                }
                Err(_) => {
                    decoded
                        .skipped
                        .push(ParseError::new(line_no, "malformed next-id marker"));
                    push_text(&mut decoded.layout, raw);
                }
            }
            continue;
        }

        if line.starts_with(RECORD_HEADER) {
            finish_block(current.take(), &mut decoded, &mut seen);
            match parse_header(line, line_no) {
                Ok(header) => {
                    current = Some(Block {
                        header,
                        metadata: None,
                        content: Vec::new(),
                        raw: raw.to_string(),
                    })
                }
                Err(err) => {
                    decoded.skipped.push(err);
                    push_text(&mut decoded.layout, raw);
                }
            }
            continue;
        }

        let Some(block) = current.as_mut() else {
            push_text(&mut decoded.layout, raw);
            continue;
        };

        if block.metadata.is_none() {
            match parse_metadata(line, line_no) {
                Ok(metadata) => {
                    block.metadata = Some(metadata);
                    block.raw.push_str(raw);
                }
                Err(err) => {
                    decoded.skipped.push(err);
                    decoded.held_ids.push(block.header.id);
                    push_text(&mut decoded.layout, &block.raw);
                    push_text(&mut decoded.layout, raw);
                    current = None;
                }
            }
            continue;
        }

        if let Some(content) = line.strip_prefix('>') {
            let content = content.strip_prefix(' ').unwrap_or(content);
            block.content.push(content.to_string());
            block.raw.push_str(raw);
        } else {
            finish_block(current.take(), &mut decoded, &mut seen);
            push_text(&mut decoded.layout, raw);
        }
    }

    finish_block(current.take(), &mut decoded, &mut seen);
    decoded
}

fn push_text(layout: &mut Vec<Segment>, raw: &str) {
    if let Some(Segment::Text(text)) = layout.last_mut() {
        text.push_str(raw);
    } else {
        layout.push(Segment::Text(raw.to_string()));
    }
}

fn finish_block(block: Option<Block>, decoded: &mut Decoded, seen: &mut BTreeSet<LessonId>) {
    let Some(block) = block else {
        return;
    };
    let Some(metadata) = block.metadata else {
        decoded.skipped.push(ParseError::new(
            block.header.line,
            format!("record {} has no metadata line", block.header.id),
        ));
        decoded.held_ids.push(block.header.id);
        push_text(&mut decoded.layout, &block.raw);
        return;
    };
    if !seen.insert(block.header.id) {
        decoded.skipped.push(ParseError::new(
            block.header.line,
            format!("duplicate record {}", block.header.id),
        ));
        push_text(&mut decoded.layout, &block.raw);
        return;
    }

    decoded.layout.push(Segment::Record(block.header.id));
    decoded.lessons.push(Lesson {
        id: block.header.id,
        category: metadata.category,
        title: block.header.title,
        content: block.content.join("\n"),
        uses: metadata.uses,
        last_used: metadata.last_used,
        created: metadata.created,
    });
}

fn parse_header(line: &str, line_no: usize) -> Result<Header, ParseError> {
    let rest = &line[RECORD_HEADER.len()..];
    let close = rest
        .find(']')
        .ok_or_else(|| ParseError::new(line_no, "unterminated record id"))?;
    let id = rest[..close]
        .parse::<LessonId>()
        .map_err(|err| ParseError::new(line_no, err))?;

    let mut rest = rest[close + 1..].trim_start();
    if let Some(rating) = rest.strip_prefix('[') {
        if let Some(end) = rating.find(']') {
            let glyphs = &rating[..end];
            if !glyphs.is_empty() && glyphs.chars().all(|ch| ch == '*' || ch == '-') {
                rest = &rating[end + 1..];
            }
        }
    }

    let title = rest.trim();
    if title.is_empty() {
        return Err(ParseError::new(line_no, format!("record {id} has no title")));
    }

    Ok(Header {
        id,
        title: title.to_string(),
        line: line_no,
    })
}

fn parse_metadata(line: &str, line_no: usize) -> Result<Metadata, ParseError> {
    let body = line
        .strip_prefix("- ")
        .ok_or_else(|| ParseError::new(line_no, "expected metadata line"))?;

    let mut uses = None;
    let mut created = None;
    let mut last_used = None;
    let mut category = None;

    for field in body.split('|') {
        let field = field.trim();
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches('*').trim().to_lowercase();
        let value = value.trim();
        match key.as_str() {
            "uses" => {
                let parsed = value
                    .parse::<u32>()
                    .map_err(|_| ParseError::new(line_no, format!("invalid uses {value:?}")))?;
                uses = Some(parsed.max(1));
            }
            "created" | "learned" => created = Some(parse_date(value, line_no)?),
            "last" | "last used" => last_used = Some(parse_date(value, line_no)?),
            "category" => {
                category = Some(
                    value
                        .parse::<Category>()
                        .map_err(|err| ParseError::new(line_no, err))?,
                )
            }
            _ => {}
        }
    }

    let uses = uses.ok_or_else(|| ParseError::new(line_no, "missing uses"))?;
    let last_used = last_used.ok_or_else(|| ParseError::new(line_no, "missing last-used date"))?;
    let category = category.ok_or_else(|| ParseError::new(line_no, "missing category"))?;

    Ok(Metadata {
        uses,
        created: created.unwrap_or(last_used),
        last_used,
        category,
    })
}

fn parse_date(value: &str, line_no: usize) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| ParseError::new(line_no, format!("invalid date {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, day).expect("valid date")
    }

    fn lesson(number: u32, title: &str, content: &str, uses: u32) -> Lesson {
        Lesson {
            id: LessonId::new(Tier::Project, number),
            category: Category::Gotcha,
            title: title.to_string(),
            content: content.to_string(),
            uses,
            last_used: date(2, 10),
            created: date(1, 3),
        }
    }

    #[test]
    fn round_trips_markdown_special_characters() {
        let document = LessonDocument {
            tier: Tier::Project,
            next_number: 9,
            lessons: vec![
                lesson(1, "Use `**bold**` | pipes [L002] ### not a header", "plain", 1),
                lesson(
                    2,
                    "Multi-line body",
                    "> quoted\n\n### [L003] fake header\n- **Uses**: 99\n  indented | piped *stars*",
                    14,
                ),
                lesson(8, "Empty body", "", 30),
                lesson(4, "Trailing newline", "line\n", 2),
            ],
            layout: Vec::new(),
        };

        let decoded = decode(&encode(&document));
        assert!(decoded.skipped.is_empty(), "{:?}", decoded.skipped);
        assert_eq!(decoded.lessons, document.lessons);
        assert_eq!(decoded.next_number, Some(9));

        let again = decode(&encode(&LessonDocument {
            tier: Tier::Project,
            next_number: 9,
            lessons: decoded.lessons.clone(),
            layout: Vec::new(),
        }));
        assert_eq!(again.lessons, decoded.lessons);
    }

    #[test]
    fn ignores_prose_and_skips_broken_blocks() {
        let text = "\
# My notes

Some free-form prose with [L001] mentioned.

### Not a record header

### [L001] [**---] Keep going
- **Uses**: 3 | **Learned**: 2026-01-01 | **Last**: 2026-01-04 | **Category**: pattern
> body one

### [L002] [*----] No metadata here
just prose

### [Q003] [*----] Bad prefix
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: 2026-01-01 | **Category**: pattern

### [L004] [*----] Bad date
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: yesterday | **Category**: pattern

### [L001] [*----] Duplicate
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: 2026-01-01 | **Category**: pattern

### [L005] Title without rating
- **Uses**: 0 | **Last**: 2026-01-02 | **Category**: decision
> kept
";
        let decoded = decode(text);
        let ids: Vec<String> = decoded.lessons.iter().map(|l| l.id.to_string()).collect();
        assert_eq!(ids, vec!["L001", "L005"]);
        let held: Vec<String> = decoded.held_ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(held, vec!["L002", "L004"]);
        assert_eq!(decoded.lessons[0].created, date(1, 1));
        assert_eq!(decoded.lessons[0].content, "body one");
        assert_eq!(decoded.lessons[1].uses, 1);
        assert_eq!(decoded.lessons[1].created, date(1, 2));
        assert_eq!(decoded.skipped.len(), 4);
        assert_eq!(decoded.next_number, None);
    }

    #[test]
    fn allocator_never_reuses_numbers_after_delete() {
        let mut document = LessonDocument::empty(Tier::Project);
        let first = document.allocate_id();
        document.lessons.push(lesson(first.number, "a", "", 1));
        let second = document.allocate_id();
        document.lessons.push(lesson(second.number, "b", "", 1));
        assert_eq!((first.number, second.number), (1, 2));

        document.remove(second).expect("remove");
        let (mut reloaded, skipped) =
            LessonDocument::from_decoded(Tier::Project, decode(&encode(&document)));
        assert!(skipped.is_empty());
        assert_eq!(reloaded.allocate_id().to_string(), "L003");
    }

    #[test]
    fn from_decoded_drops_foreign_tier_and_raises_floor() {
        let mut foreign = lesson(4, "system one", "", 1);
        foreign.id = LessonId::new(Tier::System, 4);
        let decoded = Decoded {
            lessons: vec![lesson(6, "local", "", 1), foreign],
            next_number: Some(2),
            skipped: Vec::new(),
            layout: vec![Segment::Record(LessonId::new(Tier::System, 4))],
            held_ids: vec![LessonId::new(Tier::System, 40)],
        };
        let (document, skipped) = LessonDocument::from_decoded(Tier::Project, decoded);
        assert_eq!(document.lessons.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(document.next_number, 7);
        assert!(encode(&document).contains("### [S004] [*----] system one\n"));
    }

    #[test]
    fn empty_document_decodes_to_nothing() {
        let decoded = decode("");
        assert!(decoded.lessons.is_empty());
        assert!(decoded.skipped.is_empty());

        let encoded = encode(&LessonDocument::empty(Tier::System));
        assert!(encoded.starts_with("# LESSONS.md - System Level"));
        let decoded = decode(&encoded);
        assert!(decoded.lessons.is_empty());
        assert_eq!(decoded.next_number, Some(1));
    }

    #[test]
    fn content_survives_carriage_returns_and_lookalike_lines() {
        let pieces = [
            "plain",
            "",
            "\r",
            "ends with cr\r",
            "\tindented with a tab",
            "  two spaces",
            " ",
            ">",
            "> already quoted",
            "### [L002] [*----] looks like a header",
            "<!-- recall:next-id 1 -->",
            "- **Uses**: 9 | **Last**: 2026-01-01",
            "mid\rline",
        ];
        let mut samples = Vec::new();
        for first in pieces {
            for second in pieces {
                for separator in ["\n", "\r\n"] {
                    samples.push(format!("{first}{separator}{second}"));
                    samples.push(format!("{first}{separator}{second}\n\n"));
                }
            }
        }

        let lessons: Vec<Lesson> = samples
            .iter()
            .enumerate()
            .map(|(index, content)| lesson(index as u32 + 1, "sample", content, 1))
            .collect();
        let document = LessonDocument {
            tier: Tier::Project,
            next_number: lessons.len() as u32 + 1,
            lessons,
            layout: Vec::new(),
        };

        let decoded = decode(&encode(&document));
        assert!(decoded.skipped.is_empty(), "{:?}", decoded.skipped);
        assert_eq!(decoded.lessons.len(), document.lessons.len());
        for (before, after) in document.lessons.iter().zip(&decoded.lessons) {
            assert_eq!(after.content, before.content, "record {}", before.id);
        }
    }

    const HAND_EDITED: &str = "\
# My notes

Intro prose.

<!-- recall:next-id 4 -->

### [L001] [*----] First
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: 2026-01-01 | **Category**: pattern
> one

### [L002] [*----] Bad date
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: yesterday | **Category**: pattern
> kept as typed

### [L003] [**---] Third
- **Uses**: 3 | **Created**: 2026-01-01 | **Last**: 2026-01-01 | **Category**: gotcha
> three

Footer prose.
";

    #[test]
    fn untouched_document_is_written_back_byte_for_byte() {
        let (document, skipped) = LessonDocument::from_decoded(Tier::Project, decode(HAND_EDITED));
        assert_eq!(skipped.len(), 1);
        assert_eq!(encode(&document), HAND_EDITED);
    }

    #[test]
    fn rewrite_keeps_prose_and_unreadable_blocks() {
        let (mut document, _) = LessonDocument::from_decoded(Tier::Project, decode(HAND_EDITED));
        let third = LessonId::new(Tier::Project, 3);
        document.find_mut(third).expect("third").uses = 4;
        document.remove(LessonId::new(Tier::Project, 1)).expect("remove first");
        let id = document.allocate_id();
        document.lessons.push(lesson(id.number, "Added", "new body", 1));

        let text = encode(&document);
        let broken = "\
### [L002] [*----] Bad date
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: yesterday | **Category**: pattern
> kept as typed
";
        assert!(text.starts_with("# My notes\n\nIntro prose.\n\n<!-- recall:next-id 5 -->\n\n### [L002]"));
        assert!(text.contains(broken), "{text}");
        assert!(text.contains("- **Uses**: 4 |"));
        assert!(!text.contains("[L001]"));
        assert!(text.ends_with("> new body\n\nFooter prose.\n"), "{text}");

        let order: Vec<usize> = ["[L002]", "[L003]", "[L004]", "Footer prose."]
            .iter()
            .map(|needle| text.find(needle).expect("present"))
            .collect();
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{text}");

        let again = decode(&text);
        let ids: Vec<String> = again.lessons.iter().map(|l| l.id.to_string()).collect();
        assert_eq!(ids, vec!["L003", "L004"]);
        assert_eq!(again.skipped.len(), 1);
    }

    #[test]
    fn document_without_marker_gains_one_at_the_end() {
        let text = "\
Notes first.

### [L007] [*----] Only
- **Uses**: 1 | **Created**: 2026-01-01 | **Last**: 2026-01-01 | **Category**: pattern
> body";
        let (document, _) = LessonDocument::from_decoded(Tier::Project, decode(text));
        let encoded = encode(&document);
        assert!(encoded.starts_with("Notes first.\n\n### [L007]"));
        assert!(encoded.ends_with("> body\n\n<!-- recall:next-id 8 -->\n"), "{encoded}");
    }
}
