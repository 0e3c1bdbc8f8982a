use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::*;
use crate::repo::{Repo, RepoError, RepoResult};
use crate::stats::{self, PathSimilarity};

/// Reading states. A run is `Reading` until it lands on a terminal page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReadState {
    Reading,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepOutcome {
    pub page: Page,
    pub state: ReadState,
}

/// One traversal step: from `current_page`, follow `choice` to its target.
///
/// The choice must belong to the current page. A target that no longer
/// resolves is a broken edge; the caller's last valid state stays intact so
/// the reader can pick another choice. The engine never auto-selects.
pub fn step(story: &Story, current_page: Id, choice: Id) -> RepoResult<StepOutcome> {
    let page = story.page(current_page).ok_or(RepoError::NotFound)?;
    let picked = page.choice(choice).ok_or(RepoError::NotFound)?;
    let target = story
        .page(picked.target)
        .ok_or_else(|| RepoError::InvalidReference("choice leads to a missing page".into()))?;
    let state = if target.is_ending { ReadState::Ended } else { ReadState::Reading };
    Ok(StepOutcome { page: target.clone(), state })
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaySession {
    pub story: Story,
    pub current_page: Page,
    pub path: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FinishOutcome {
    pub record: PlayRecord,
    pub similarity: PathSimilarity,
}

fn resolve_start(story: &Story) -> RepoResult<Page> {
    let start_id = story.start_page.ok_or(RepoError::NoStartPage)?;
    story
        .page(start_id)
        .cloned()
        .ok_or_else(|| RepoError::InvalidReference("start page no longer exists".into()))
}

/// Starts a run on a published story. Counts once per start call, never on
/// resume.
pub async fn start(repo: &dyn Repo, story_id: Id) -> RepoResult<PlaySession> {
    let mut story = repo.get_story(story_id).await?;
    if story.status != StoryStatus::Published {
        return Err(RepoError::NotPublished);
    }
    let current_page = resolve_start(&story)?;
    story.times_started = repo.bump_started(story_id).await?;
    counter!("fabula_plays_started_total", 1);
    let path = vec![current_page.id];
    Ok(PlaySession { story, current_page, path })
}

/// Author-only dry run: same resolution as `start` but without the publish
/// requirement and without touching counters.
pub async fn preview(repo: &dyn Repo, story_id: Id, author: Id) -> RepoResult<PlaySession> {
    let story = repo.get_story(story_id).await?;
    if story.author != author {
        return Err(RepoError::Forbidden);
    }
    let current_page = resolve_start(&story)?;
    let path = vec![current_page.id];
    Ok(PlaySession { story, current_page, path })
}

/// Wholesale overwrite of the reader's progress in this story.
pub async fn save_progress(
    repo: &dyn Repo,
    reader: Id,
    story_id: Id,
    save: SaveProgress,
) -> RepoResult<PlayState> {
    repo.upsert_play_state(PlayState {
        reader,
        story: story_id,
        current_page: save.current_page,
        path: save.path,
        updated_at: Utc::now(),
    })
    .await
}

/// Restores the reader's saved position, re-resolving the current page
/// against the live graph.
pub async fn resume(repo: &dyn Repo, reader: Id, story_id: Id) -> RepoResult<PlaySession> {
    let state = repo.get_play_state(reader, story_id).await?;
    let story = repo.get_story(story_id).await?;
    let current_page = story
        .page(state.current_page)
        .cloned()
        .ok_or_else(|| RepoError::InvalidReference("saved page no longer exists".into()))?;
    Ok(PlaySession { story, current_page, path: state.path })
}

/// Finalizes a run on a terminal page. On success the play state is gone,
/// the record is permanent and the response carries how similar this path
/// was to every prior finisher's.
pub async fn finish(
    repo: &dyn Repo,
    reader: Id,
    story_id: Id,
    finish: FinishPlay,
) -> RepoResult<FinishOutcome> {
    let story = repo.get_story(story_id).await?;
    let ending = story.page(finish.ending_page).ok_or(RepoError::NotFound)?;
    if !ending.is_ending {
        return Err(RepoError::NotAnEnding);
    }
    let prior = repo.list_story_records(story_id).await?;
    let similarity = stats::path_similarity(&finish.path, &prior);
    let record = repo
        .record_finish(PlayRecord {
            id: Uuid::new_v4(),
            reader,
            story: story_id,
            ending_page: finish.ending_page,
            path: finish.path,
            finished_at: Utc::now(),
        })
        .await?;
    counter!("fabula_plays_finished_total", 1);
    Ok(FinishOutcome { record, similarity })
}
