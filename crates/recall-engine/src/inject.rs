use crate::EngineError;
use recall_core::{Lesson, Tier};
use recall_storage::LessonStore;
use std::cmp::Ordering;

pub const DEFAULT_INJECT_COUNT: usize = 5;

const INJECT_FOOTER: &str =
    "Cite a lesson as [L###] or [S###] when you apply it; citations raise its rank.";

/// Ranking for injection: uses, then recency, then system before project,
/// then id.
pub fn rank(left: &Lesson, right: &Lesson) -> Ordering {
    right
        .uses
        .cmp(&left.uses)
        .then_with(|| right.last_used.cmp(&left.last_used))
        .then_with(|| tier_rank(left.id.tier).cmp(&tier_rank(right.id.tier)))
        .then_with(|| left.id.number.cmp(&right.id.number))
}

fn tier_rank(tier: Tier) -> u8 {
    match tier {
        Tier::System => 0,
        Tier::Project => 1,
    }
}

pub fn select(mut candidates: Vec<Lesson>, count: usize) -> Vec<Lesson> {
    candidates.sort_by(rank);
    candidates.truncate(count);
    candidates
}

pub fn format_line(lesson: &Lesson) -> String {
    format!(
        "[{}] {} {}: {}",
        lesson.id,
        lesson.stars(),
        lesson.category,
        lesson.title
    )
}

/// Renders the injection block. Empty when nothing was selected.
pub fn render(selected: &[Lesson], total: usize) -> String {
    if selected.is_empty() {
        return String::new();
    }
    let mut out = format!(
        "LESSONS ({} of {total}, most used first)\n",
        selected.len()
    );
    for lesson in selected {
        out.push_str(&format_line(lesson));
        out.push('\n');
    }
    out.push_str(INJECT_FOOTER);
    out.push('\n');
    out
}

pub fn inject(
    project: &LessonStore,
    system: &LessonStore,
    count: usize,
) -> Result<String, EngineError> {
    let mut candidates = system.lessons()?;
    candidates.extend(project.lessons()?);
    let total = candidates.len();
    Ok(render(&select(candidates, count), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use recall_core::{Category, LessonId};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, day).expect("valid date")
    }

    fn lesson(tier: Tier, number: u32, uses: u32, last_used: u32) -> Lesson {
        Lesson {
            id: LessonId::new(tier, number),
            category: Category::Pattern,
            title: format!("t{number}"),
            content: "c".to_string(),
            uses,
            last_used: date(last_used),
            created: date(1),
        }
    }

    fn ids(lessons: &[Lesson]) -> Vec<String> {
        lessons.iter().map(|lesson| lesson.id.to_string()).collect()
    }

    #[test]
    fn ranks_by_uses_recency_tier_then_id() {
        let candidates = vec![
            lesson(Tier::Project, 2, 3, 4),
            lesson(Tier::Project, 1, 3, 4),
            lesson(Tier::System, 7, 3, 4),
            lesson(Tier::Project, 3, 3, 9),
            lesson(Tier::System, 1, 10, 1),
            lesson(Tier::Project, 9, 1, 20),
        ];

        let selected = select(candidates, 5);

        assert_eq!(ids(&selected), vec!["S001", "L003", "S007", "L001", "L002"]);
    }

    #[test]
    fn renders_header_lines_and_footer() {
        let selected = vec![lesson(Tier::System, 1, 12, 3)];
        let text = render(&selected, 4);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "LESSONS (1 of 4, most used first)");
        assert_eq!(lines[1], "[S001] [****-] pattern: t1");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn injected_lines_are_not_read_back_as_citations() {
        let line = format_line(&lesson(Tier::Project, 4, 2, 3));
        assert!(recall_core::extract_citations(&line).is_empty());
    }

    #[test]
    fn empty_selection_renders_nothing() {
        assert_eq!(render(&[], 0), "");
        assert_eq!(render(&select(Vec::new(), 5), 0), "");
    }
}
