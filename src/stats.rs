use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Id, PlayRecord, Story, StoryStatus};

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn ending_label(story: &Story, page_id: Id) -> String {
    story
        .page(page_id)
        .and_then(|p| p.ending_label.clone().or_else(|| p.title.clone()))
        .unwrap_or_else(|| "Untitled ending".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndingTally {
    pub page: Id,
    pub label: String,
    pub count: u64,
}

/// Per-ending counts over the completed runs of a story. Every ending page
/// currently in the graph starts at zero; records whose terminal page no
/// longer resolves are left out of the tally (they still count in
/// `times_finished`, so the two can diverge).
pub fn ending_distribution(story: &Story, records: &[PlayRecord]) -> Vec<EndingTally> {
    let mut tallies: BTreeMap<Id, u64> = story.ending_pages().map(|p| (p.id, 0)).collect();
    for record in records {
        if let Some(count) = tallies.get_mut(&record.ending_page) {
            *count += 1;
        }
    }
    story
        .ending_pages()
        .map(|p| EndingTally {
            page: p.id,
            label: ending_label(story, p.id),
            count: tallies.get(&p.id).copied().unwrap_or(0),
        })
        .collect()
}

/// Distinct endings reached over total current endings, as a percentage with
/// one decimal. Zero when the story has no ending pages.
pub fn completion_rate(endings: &[EndingTally]) -> f64 {
    if endings.is_empty() {
        return 0.0;
    }
    let reached = endings.iter().filter(|e| e.count > 0).count();
    round1(reached as f64 / endings.len() as f64 * 100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PathSimilarity {
    pub percent: f64,
    /// Set when no one has finished the story before this path.
    pub first_to_finish: bool,
}

/// Mean set-overlap between a candidate path and every historical path:
/// |common pages| / max(path lengths) per record, order-insensitive.
pub fn path_similarity(candidate: &[Id], records: &[PlayRecord]) -> PathSimilarity {
    if records.is_empty() {
        return PathSimilarity { percent: 0.0, first_to_finish: true };
    }
    let mine: HashSet<Id> = candidate.iter().copied().collect();
    let sum: f64 = records
        .iter()
        .map(|record| {
            let theirs: HashSet<Id> = record.path.iter().copied().collect();
            let denom = candidate.len().max(record.path.len());
            if denom == 0 {
                return 0.0;
            }
            mine.intersection(&theirs).count() as f64 / denom as f64 * 100.0
        })
        .sum();
    PathSimilarity {
        percent: round1(sum / records.len() as f64),
        first_to_finish: false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnlockedEnding {
    pub page: Id,
    pub title: Option<String>,
    pub label: Option<String>,
    pub first_reached: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnlockedEndings {
    pub endings: Vec<UnlockedEnding>,
    pub unlocked: usize,
    pub total: usize,
}

/// Distinct terminal pages this reader has ever reached in the story, each
/// annotated with the first time it was reached. Terminals deleted from the
/// graph since are skipped.
pub fn unlocked_endings(story: &Story, reader: Id, records: &[PlayRecord]) -> UnlockedEndings {
    let mut seen: BTreeMap<Id, UnlockedEnding> = BTreeMap::new();
    let mut mine: Vec<_> = records.iter().filter(|r| r.reader == reader).collect();
    mine.sort_by(|a, b| a.finished_at.cmp(&b.finished_at));
    for record in mine {
        if seen.contains_key(&record.ending_page) {
            continue;
        }
        if let Some(page) = story.page(record.ending_page) {
            seen.insert(
                record.ending_page,
                UnlockedEnding {
                    page: page.id,
                    title: page.title.clone(),
                    label: page.ending_label.clone(),
                    first_reached: record.finished_at,
                },
            );
        }
    }
    let endings: Vec<_> = seen.into_values().collect();
    UnlockedEndings {
        unlocked: endings.len(),
        total: story.ending_pages().count(),
        endings,
    }
}

/// Public-facing summary: counters, derived rating, ending count.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StorySummary {
    pub times_started: u64,
    pub times_finished: u64,
    pub mean_rating: f64,
    pub rating_count: u64,
    pub total_endings: usize,
}

pub fn story_summary(story: &Story) -> StorySummary {
    StorySummary {
        times_started: story.times_started,
        times_finished: story.times_finished,
        mean_rating: story.mean_rating(),
        rating_count: story.ratings.len() as u64,
        total_endings: story.ending_pages().count(),
    }
}

/// Author-facing analytics over the story's full play history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoryInsights {
    pub times_started: u64,
    pub times_finished: u64,
    /// Live play states: started but not finished, in progress or stalled.
    pub abandoned: u64,
    pub completion_rate: f64,
    pub endings: Vec<EndingTally>,
    pub mean_rating: f64,
    pub rating_count: u64,
    pub report_count: u64,
}

pub fn story_insights(story: &Story, records: &[PlayRecord], abandoned: u64) -> StoryInsights {
    let endings = ending_distribution(story, records);
    StoryInsights {
        times_started: story.times_started,
        times_finished: story.times_finished,
        abandoned,
        completion_rate: completion_rate(&endings),
        endings,
        mean_rating: story.mean_rating(),
        rating_count: story.ratings.len() as u64,
        report_count: story.reports.len() as u64,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusCounts {
    pub total: u64,
    pub draft: u64,
    pub published: u64,
    pub suspended: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopStory {
    pub id: Id,
    pub title: String,
    pub times_started: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminOverview {
    pub stories: StatusCounts,
    pub plays_finished: u64,
    pub top_stories: Vec<TopStory>,
}

const TOP_STORIES: usize = 10;

pub fn admin_overview(stories: &[Story], plays_finished: u64) -> AdminOverview {
    let mut counts = StatusCounts { total: stories.len() as u64, draft: 0, published: 0, suspended: 0 };
    for story in stories {
        match story.status {
            StoryStatus::Draft => counts.draft += 1,
            StoryStatus::Published => counts.published += 1,
            StoryStatus::Suspended => counts.suspended += 1,
        }
    }
    let mut ranked: Vec<_> = stories.iter().collect();
    ranked.sort_by(|a, b| b.times_started.cmp(&a.times_started));
    let top_stories = ranked
        .into_iter()
        .take(TOP_STORIES)
        .map(|s| TopStory { id: s.id, title: s.title.clone(), times_started: s.times_started })
        .collect();
    AdminOverview { stories: counts, plays_finished, top_stories }
}
