use crate::config::RecallConfig;
use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Args, Subcommand, ValueEnum};
use recall_core::{Category, Lesson, LessonDraft, LessonId, Tier};
use recall_engine::{inject, maybe_decay, DecayOutcome, Promoter};
use recall_storage::{CleanupReport, LessonFilter, LessonPatch, LessonStore};
use recall_tracker::{CitationTracker, TranscriptIndex};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Add a project lesson
    Add(AddArgs),
    /// Add a system lesson
    AddSystem(AddArgs),
    /// Credit a lesson with one more use
    Cite(IdArgs),
    /// Print the top lessons for context injection
    Inject(InjectArgs),
    List(ListArgs),
    Show(ShowArgs),
    Edit(EditArgs),
    #[command(alias = "rm")]
    Delete(IdArgs),
    /// Move a project lesson into the system tier
    Promote(IdArgs),
    Decay(DecayArgs),
    /// Scan a session transcript for lesson citations
    Track(TrackArgs),
    /// Remove checkpoints whose transcripts are gone
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub category: Category,
    pub title: String,
    pub content: String,
}

#[derive(Args, Debug)]
pub struct IdArgs {
    pub id: LessonId,
}

#[derive(Args, Debug)]
pub struct InjectArgs {
    pub count: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    Project,
    System,
    #[default]
    All,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, value_enum, default_value_t = Scope::All)]
    pub scope: Scope,
    #[arg(long)]
    pub category: Option<Category>,
    #[arg(long, alias = "query")]
    pub search: Option<String>,
    /// Only lessons with one use and no citation for DAYS (default: decay threshold)
    #[arg(long, value_name = "DAYS", num_args = 0..=1)]
    pub stale: Option<Option<i64>>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: LessonId,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub id: LessonId,
    pub content: Option<String>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub category: Option<Category>,
}

#[derive(Args, Debug)]
pub struct DecayArgs {
    /// Days without a citation before a lesson loses a use
    pub threshold_days: Option<i64>,
    /// Ignore the weekly interval
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct TrackArgs {
    #[arg(long)]
    pub session: String,
    #[arg(long)]
    pub transcript: PathBuf,
    /// Directories holding `<session>.jsonl` transcripts, for the orphan sweep
    #[arg(long = "transcripts-dir", value_name = "DIR")]
    pub transcripts_dirs: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    #[arg(long = "transcripts-dir", value_name = "DIR", required = true)]
    pub transcripts_dirs: Vec<PathBuf>,
    #[arg(long)]
    pub max: Option<usize>,
}

pub struct Context<'a> {
    config: &'a RecallConfig,
    today: NaiveDate,
    now: DateTime<Utc>,
}

impl<'a> Context<'a> {
    pub fn new(config: &'a RecallConfig) -> Self {
        Self {
            config,
            today: Local::now().date_naive(),
            now: Utc::now(),
        }
    }

    #[cfg(test)]
    fn at(config: &'a RecallConfig, today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self { config, today, now }
    }
}

pub fn run(command: Command, ctx: &Context<'_>, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Add(args) => add_lesson(ctx, Tier::Project, args, out),
        Command::AddSystem(args) => add_lesson(ctx, Tier::System, args, out),
        Command::Cite(args) => cite_lesson(ctx, args.id, out),
        Command::Inject(args) => inject_lessons(ctx, &args, out),
        Command::List(args) => list_lessons(ctx, &args, out),
        Command::Show(args) => show_lesson(ctx, &args, out),
        Command::Edit(args) => edit_lesson(ctx, args, out),
        Command::Delete(args) => delete_lesson(ctx, args.id, out),
        Command::Promote(args) => promote_lesson(ctx, args.id, out),
        Command::Decay(args) => run_decay(ctx, &args, out),
        Command::Track(args) => track_session(ctx, &args, out),
        Command::Cleanup(args) => cleanup_checkpoints(ctx, &args, out),
    }
}

fn add_lesson(ctx: &Context<'_>, tier: Tier, args: AddArgs, out: &mut dyn Write) -> Result<()> {
    let draft = LessonDraft::new(args.category, args.title, args.content);
    if draft.title.is_empty() {
        bail!("Lesson title cannot be empty");
    }
    let store = ctx.config.store_for(tier);
    let lesson = store
        .add(draft, ctx.today)
        .with_context(|| format!("Failed to add lesson to {}", store.path().display()))?;
    writeln!(out, "{}", lesson.id)?;
    Ok(())
}

fn cite_lesson(ctx: &Context<'_>, id: LessonId, out: &mut dyn Write) -> Result<()> {
    let lesson = ctx
        .config
        .store_for(id.tier)
        .cite(id, ctx.today)
        .with_context(|| format!("Failed to cite {id}"))?;
    writeln!(out, "Cited [{}] (uses: {})", lesson.id, lesson.uses)?;
    Ok(())
}

fn inject_lessons(ctx: &Context<'_>, args: &InjectArgs, out: &mut dyn Write) -> Result<()> {
    let count = args.count.unwrap_or(ctx.config.defaults.inject_count);
    let text = inject(&ctx.config.project_store(), &ctx.config.system_store(), count)
        .context("Failed to read lessons for injection")?;
    write!(out, "{text}")?;
    Ok(())
}

fn list_lessons(ctx: &Context<'_>, args: &ListArgs, out: &mut dyn Write) -> Result<()> {
    let filter = LessonFilter {
        category: args.category,
        search: args.search.clone(),
        stale_days: args
            .stale
            .map(|days| days.unwrap_or(ctx.config.defaults.decay_threshold_days)),
    };

    let mut lessons = Vec::new();
    for store in scoped_stores(ctx.config, args.scope) {
        let found = store
            .list(&filter, ctx.today)
            .with_context(|| format!("Failed to read {}", store.path().display()))?;
        lessons.extend(found);
    }

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&lessons)?)?;
        return Ok(());
    }
    if lessons.is_empty() {
        writeln!(out, "No lessons found.")?;
        return Ok(());
    }
    for lesson in &lessons {
        writeln!(out, "{}", list_line(lesson))?;
    }
    Ok(())
}

fn scoped_stores(config: &RecallConfig, scope: Scope) -> Vec<LessonStore> {
    match scope {
        Scope::Project => vec![config.project_store()],
        Scope::System => vec![config.system_store()],
        Scope::All => vec![config.system_store(), config.project_store()],
    }
}

fn list_line(lesson: &Lesson) -> String {
    format!(
        "[{}] {} {}: {} (uses: {}, last: {})",
        lesson.id,
        lesson.stars(),
        lesson.category,
        lesson.title,
        lesson.uses,
        lesson.last_used
    )
}

fn show_lesson(ctx: &Context<'_>, args: &ShowArgs, out: &mut dyn Write) -> Result<()> {
    let lesson = ctx
        .config
        .store_for(args.id.tier)
        .get(args.id)
        .with_context(|| format!("Failed to show {}", args.id))?;

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&lesson)?)?;
        return Ok(());
    }
    writeln!(out, "[{}] {}", lesson.id, lesson.title)?;
    writeln!(out, "Category: {}", lesson.category)?;
    writeln!(out, "Uses: {} {}", lesson.uses, lesson.stars())?;
    writeln!(out, "Created: {}", lesson.created)?;
    writeln!(out, "Last used: {}", lesson.last_used)?;
    if !lesson.content.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", lesson.content)?;
    }
    Ok(())
}

fn edit_lesson(ctx: &Context<'_>, args: EditArgs, out: &mut dyn Write) -> Result<()> {
    if args.content.is_none() && args.title.is_none() && args.category.is_none() {
        bail!("Nothing to change: pass new content, --title or --category");
    }
    let patch = LessonPatch {
        content: args.content,
        title: args.title,
        category: args.category,
    };
    let lesson = ctx
        .config
        .store_for(args.id.tier)
        .edit(args.id, &patch)
        .with_context(|| format!("Failed to edit {}", args.id))?;
    writeln!(out, "Updated [{}] {}", lesson.id, lesson.title)?;
    Ok(())
}

fn delete_lesson(ctx: &Context<'_>, id: LessonId, out: &mut dyn Write) -> Result<()> {
    let removed = ctx
        .config
        .store_for(id.tier)
        .delete(id)
        .with_context(|| format!("Failed to delete {id}"))?;
    writeln!(out, "Deleted [{}] {}", removed.id, removed.title)?;
    Ok(())
}

fn promote_lesson(ctx: &Context<'_>, id: LessonId, out: &mut dyn Write) -> Result<()> {
    let project = ctx.config.project_store();
    let system = ctx.config.system_store();
    let promotion = Promoter::new(&project, &system)
        .promote(id)
        .with_context(|| format!("Failed to promote {id}"))?;
    writeln!(out, "Promoted [{}] -> [{}]", promotion.from, promotion.lesson.id)?;
    Ok(())
}

fn run_decay(ctx: &Context<'_>, args: &DecayArgs, out: &mut dyn Write) -> Result<()> {
    let system = ctx.config.system_store();
    let project = ctx.config.project_store();
    let outcome = maybe_decay(
        &[&system, &project],
        &ctx.config.decay_state(),
        &ctx.config.checkpoints(),
        &ctx.config.decay_config(args.threshold_days, args.force),
        ctx.today,
        ctx.now,
    )
    .context("Decay pass failed")?;

    match outcome {
        DecayOutcome::NotDue { next_due } => writeln!(
            out,
            "Decay not due until {}.",
            next_due.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        )?,
        DecayOutcome::Idle => writeln!(out, "No activity since the last decay; nothing decayed.")?,
        DecayOutcome::Applied {
            decayed,
            failed_stores,
        } => {
            writeln!(out, "Decayed {decayed} lesson(s).")?;
            if failed_stores > 0 {
                writeln!(out, "{failed_stores} store(s) could not be decayed; see the debug log.")?;
            }
        }
    }
    Ok(())
}

fn track_session(ctx: &Context<'_>, args: &TrackArgs, out: &mut dyn Write) -> Result<()> {
    let project = ctx.config.project_store();
    let system = ctx.config.system_store();
    let checkpoints = ctx.config.checkpoints();
    let report = CitationTracker::new(&project, &system, &checkpoints)
        .track_file(&args.session, &args.transcript, ctx.today, ctx.now)
        .with_context(|| format!("Failed to track session {}", args.session))?;

    info!(
        event = "track_complete",
        session_id = %args.session,
        scanned = report.scanned_messages,
        cited = report.cited.len(),
        unknown = report.unknown.len(),
        failed = report.failed.len(),
        corrupt_lines = report.skipped_corrupt_lines
    );
    for id in &report.cited {
        writeln!(out, "{id}")?;
    }

    if !args.transcripts_dirs.is_empty() {
        match sweep(ctx, &args.transcripts_dirs, None, Some(&args.session)) {
            Ok(report) => info!(event = "checkpoint_sweep", removed = report.removed),
            Err(err) => warn!(event = "checkpoint_sweep_failed", error = %err),
        }
    }
    Ok(())
}

fn cleanup_checkpoints(ctx: &Context<'_>, args: &CleanupArgs, out: &mut dyn Write) -> Result<()> {
    let report = sweep(ctx, &args.transcripts_dirs, args.max, None)
        .context("Checkpoint cleanup failed")?;
    writeln!(out, "Removed {} orphaned checkpoint(s).", report.removed)?;
    Ok(())
}

fn sweep(
    ctx: &Context<'_>,
    transcripts_dirs: &[PathBuf],
    max_per_run: Option<usize>,
    active_session: Option<&str>,
) -> Result<CleanupReport> {
    let index = TranscriptIndex::new(transcripts_dirs.iter().cloned());
    let report = ctx.config.checkpoints().cleanup(
        |session| index.exists(session),
        &ctx.config.cleanup_policy(max_per_run),
        active_session,
        ctx.now,
    )?;
    Ok(report)
}
