use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod citation;
pub mod codec;

pub use citation::{extract_citations, is_listing_echo, CitationToken};
pub use codec::{decode, encode, Decoded, LessonDocument, ParseError, Segment};

pub const STAR_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    System,
    Project,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::System => "system",
            Tier::Project => "project",
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            Tier::System => 'S',
            Tier::Project => 'L',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'S' => Some(Tier::System),
            'L' => Some(Tier::Project),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Tier::System => "System Level",
            Tier::Project => "Project Level",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "system" | "global" => Ok(Tier::System),
            "project" | "local" => Ok(Tier::Project),
            other => Err(format!("Unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pattern,
    Correction,
    Decision,
    Gotcha,
    Preference,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Pattern,
        Category::Correction,
        Category::Decision,
        Category::Gotcha,
        Category::Preference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pattern => "pattern",
            Category::Correction => "correction",
            Category::Decision => "decision",
            Category::Gotcha => "gotcha",
            Category::Preference => "preference",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("Unknown category: {normalized}"))
    }
}

/// Tier-scoped lesson identifier, rendered as `<prefix><number:03>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LessonId {
    pub tier: Tier,
    pub number: u32,
}

impl LessonId {
    pub fn new(tier: Tier, number: u32) -> Self {
        Self { tier, number }
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.tier.prefix(), self.number)
    }
}

impl FromStr for LessonId {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim().trim_start_matches('[').trim_end_matches(']');
        let mut chars = trimmed.chars();
        let prefix = chars
            .next()
            .ok_or_else(|| "Empty lesson id".to_string())?;
        let tier = Tier::from_prefix(prefix.to_ascii_uppercase())
            .ok_or_else(|| format!("Unknown lesson id prefix in {trimmed:?}"))?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(format!("Invalid lesson id: {trimmed:?}"));
        }
        let number = digits
            .parse::<u32>()
            .map_err(|err| format!("Invalid lesson id {trimmed:?}: {err}"))?;
        Ok(LessonId { tier, number })
    }
}

impl Serialize for LessonId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LessonId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub category: Category,
    pub title: String,
    pub content: String,
    pub uses: u32,
    pub last_used: NaiveDate,
    pub created: NaiveDate,
}

impl Lesson {
    pub fn stars(&self) -> String {
        render_stars(self.uses)
    }

    pub fn is_stale(&self, today: NaiveDate, threshold_days: i64) -> bool {
        self.uses <= 1 && (today - self.last_used).num_days() > threshold_days
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

/// Fields for a record that does not have an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDraft {
    pub category: Category,
    pub title: String,
    pub content: String,
}

impl LessonDraft {
    pub fn new(category: Category, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category,
            title: normalize_title(&title.into()),
            content: content.into(),
        }
    }
}

pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn filled_stars(uses: u32) -> usize {
    match uses {
        0..=2 => 1,
        3..=5 => 2,
        6..=11 => 3,
        12..=24 => 4,
        _ => 5,
    }
}

pub fn render_stars(uses: u32) -> String {
    let filled = filled_stars(uses);
    let mut out = String::with_capacity(STAR_SLOTS + 2);
    out.push('[');
    out.extend(std::iter::repeat('*').take(filled));
    out.extend(std::iter::repeat('-').take(STAR_SLOTS - filled));
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lesson_id_renders_zero_padded_and_parses_back() {
        let id = LessonId::new(Tier::Project, 7);
        assert_eq!(id.to_string(), "L007");
        assert_eq!("L007".parse::<LessonId>().expect("parse"), id);
        assert_eq!("[S012]".parse::<LessonId>().expect("parse"), LessonId::new(Tier::System, 12));
        assert_eq!(LessonId::new(Tier::System, 1234).to_string(), "S1234");
    }

    #[test]
    fn lesson_id_rejects_unknown_prefix_and_digits() {
        assert!("X001".parse::<LessonId>().is_err());
        assert!("L".parse::<LessonId>().is_err());
        assert!("L0a1".parse::<LessonId>().is_err());
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Gotcha".parse::<Category>().expect("parse"), Category::Gotcha);
        assert!("opinion".parse::<Category>().is_err());
    }

    #[test]
    fn stars_always_start_with_a_filled_slot() {
        assert_eq!(render_stars(1), "[*----]");
        assert_eq!(render_stars(4), "[**---]");
        assert_eq!(render_stars(10), "[***--]");
        assert_eq!(render_stars(20), "[****-]");
        assert_eq!(render_stars(500), "[*****]");
    }

    #[test]
    fn stale_requires_single_use_and_old_last_used() {
        let day = |d| NaiveDate::from_ymd_opt(2026, 3, d).expect("date");
        let mut lesson = Lesson {
            id: LessonId::new(Tier::Project, 1),
            category: Category::Pattern,
            title: "t".to_string(),
            content: String::new(),
            uses: 1,
            last_used: day(1),
            created: day(1),
        };
        assert!(lesson.is_stale(day(31), 15));
        assert!(!lesson.is_stale(day(10), 15));
        lesson.uses = 2;
        assert!(!lesson.is_stale(day(31), 15));
    }

    #[test]
    fn draft_title_is_single_line() {
        let draft = LessonDraft::new(Category::Decision, "  use\nsqlite   later ", "body");
        assert_eq!(draft.title, "use sqlite later");
    }

    #[test]
    fn lesson_serializes_id_as_string() {
        let lesson = Lesson {
            id: LessonId::new(Tier::System, 3),
            category: Category::Preference,
            title: "tabs".to_string(),
            content: "prefer tabs".to_string(),
            uses: 2,
            last_used: NaiveDate::from_ymd_opt(2026, 1, 2).expect("date"),
            created: NaiveDate::from_ymd_opt(2026, 1, 1).expect("date"),
        };
        let value = serde_json::to_value(&lesson).expect("json");
        assert_eq!(value["id"], "S003");
        assert_eq!(value["category"], "preference");
        assert_eq!(value["last_used"], "2026-01-02");
    }
}
