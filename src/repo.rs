use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("conflict")] Conflict,
    #[error("already reported")] AlreadyReported,
    #[error("story is not published")] NotPublished,
    #[error("story has no start page")] NoStartPage,
    #[error("page is not an ending")] NotAnEnding,
    #[error("broken reference: {0}")] InvalidReference(String),
    #[error("{0}")] Validation(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Browse filter for the public catalogue. `search` is a case-insensitive
/// substring match over title, description and tags.
#[derive(Debug, Clone, Default)]
pub struct BrowseFilter {
    pub search: Option<String>,
    pub theme: Option<String>,
}

#[async_trait]
pub trait StoryRepo: Send + Sync {
    async fn create_story(&self, author: Id, new: NewStory) -> RepoResult<Story>;
    async fn get_story(&self, id: Id) -> RepoResult<Story>;
    async fn list_published(&self, filter: BrowseFilter) -> RepoResult<Vec<Story>>;
    async fn list_by_author(&self, author: Id) -> RepoResult<Vec<Story>>;
    async fn list_all(&self) -> RepoResult<Vec<Story>>;
    async fn update_story(&self, id: Id, author: Id, upd: UpdateStory) -> RepoResult<Story>;
    /// Deletes the story and cascades to its play states and play records.
    async fn delete_story(&self, id: Id, author: Id) -> RepoResult<()>;
    async fn publish_story(&self, id: Id, author: Id) -> RepoResult<Story>;
    /// Raw status transition, admin-level (suspend / restore).
    async fn set_story_status(&self, id: Id, status: StoryStatus) -> RepoResult<Story>;

    async fn add_page(&self, story: Id, author: Id, new: NewPage) -> RepoResult<Page>;
    async fn update_page(&self, story: Id, page: Id, author: Id, upd: UpdatePage) -> RepoResult<Page>;
    async fn remove_page(&self, story: Id, page: Id, author: Id) -> RepoResult<()>;
    async fn add_choice(&self, story: Id, page: Id, author: Id, new: NewChoice) -> RepoResult<Choice>;
    async fn remove_choice(&self, story: Id, page: Id, choice: Id, author: Id) -> RepoResult<()>;

    /// Increments `times_started` and returns the new value.
    async fn bump_started(&self, id: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait PlayRepo: Send + Sync {
    /// Look up by (reader, story); insert if absent, overwrite if present.
    /// One logical critical section per key, last write wins.
    async fn upsert_play_state(&self, state: PlayState) -> RepoResult<PlayState>;
    async fn get_play_state(&self, reader: Id, story: Id) -> RepoResult<PlayState>;
    async fn count_play_states(&self, story: Id) -> RepoResult<u64>;
    /// Finalizes a run: appends the record, drops the matching play state
    /// (idempotent if absent) and increments `times_finished`, all within
    /// one store transaction.
    async fn record_finish(&self, record: PlayRecord) -> RepoResult<PlayRecord>;
    async fn list_story_records(&self, story: Id) -> RepoResult<Vec<PlayRecord>>;
    async fn list_reader_records(&self, reader: Id) -> RepoResult<Vec<PlayRecord>>;
    async fn count_records(&self) -> RepoResult<u64>;
}

#[async_trait]
pub trait FeedbackRepo: Send + Sync {
    /// Upsert by (user, story): the score is overwritten, the comment only
    /// when one is provided. Returns the recomputed mean and count.
    async fn rate_story(&self, story: Id, user: Id, rating: RateStory) -> RepoResult<RatingSummary>;
    /// Appends a report; a second report from the same user is rejected.
    /// Returns the report count.
    async fn report_story(&self, story: Id, user: Id, reason: String) -> RepoResult<u64>;
}

pub trait Repo: StoryRepo + PlayRepo + FeedbackRepo {}

impl<T> Repo for T where T: StoryRepo + PlayRepo + FeedbackRepo {}

// ---------------- input validation ----------------

fn non_empty(value: &str, what: &str) -> RepoResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RepoError::Validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn bounded(value: &str, max: usize, what: &str) -> RepoResult<()> {
    if value.chars().count() > max {
        return Err(RepoError::Validation(format!("{what} must not exceed {max} characters")));
    }
    Ok(())
}

fn check_illustration(url: &str) -> RepoResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(RepoError::Validation("illustration must be an http(s) URL".into()))
    }
}

fn validate_new_story(new: &NewStory) -> RepoResult<(String, String)> {
    let title = non_empty(&new.title, "title")?;
    bounded(&title, TITLE_MAX, "title")?;
    let description = non_empty(&new.description, "description")?;
    bounded(&description, DESCRIPTION_MAX, "description")?;
    Ok((title, description))
}

fn validate_new_page(new: &NewPage) -> RepoResult<String> {
    let text = non_empty(&new.text, "page text")?;
    if let Some(title) = &new.title {
        bounded(title, PAGE_TITLE_MAX, "page title")?;
    }
    if let Some(label) = &new.ending_label {
        bounded(label, ENDING_LABEL_MAX, "ending label")?;
    }
    if let Some(url) = &new.illustration {
        check_illustration(url)?;
    }
    Ok(text)
}

// ---------------- snapshot-backed in-memory document store ----------------

pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        stories: HashMap<Id, Story>,
        // keyed "reader:story" so the natural key survives the JSON snapshot
        play_states: HashMap<String, PlayState>,
        play_records: Vec<PlayRecord>,
    }

    fn state_key(reader: Id, story: Id) -> String {
        format!("{reader}:{story}")
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("FABULA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = &*self.snapshot_path;
            match serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path, bytes) {
                        log::error!("failed to write snapshot '{}': {e}", path.display());
                    }
                }
                Err(e) => log::error!("failed to serialize snapshot: {e}"),
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::data_dir().join("state.json");
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        /// Resolves a story the actor must own. `Forbidden` on ownership
        /// mismatch, matching the 403 the HTTP layer maps it to.
        fn owned_mut<'a>(s: &'a mut State, id: Id, author: Id) -> RepoResult<&'a mut Story> {
            let story = s.stories.get_mut(&id).ok_or(RepoError::NotFound)?;
            if story.author != author {
                return Err(RepoError::Forbidden);
            }
            Ok(story)
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl StoryRepo for InMemRepo {
        async fn create_story(&self, author: Id, new: NewStory) -> RepoResult<Story> {
            let (title, description) = validate_new_story(&new)?;
            let now = Utc::now();
            let story = Story {
                id: uuid::Uuid::new_v4(),
                title,
                description,
                tags: new.tags,
                theme: new.theme,
                status: StoryStatus::Draft,
                start_page: None,
                author,
                pages: Vec::new(),
                times_started: 0,
                times_finished: 0,
                ratings: Vec::new(),
                reports: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            let mut s = self.state.write().unwrap();
            s.stories.insert(story.id, story.clone());
            drop(s);
            self.persist();
            Ok(story)
        }

        async fn get_story(&self, id: Id) -> RepoResult<Story> {
            let s = self.state.read().unwrap();
            s.stories.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_published(&self, filter: BrowseFilter) -> RepoResult<Vec<Story>> {
            let s = self.state.read().unwrap();
            let needle = filter.search.as_deref().map(str::to_lowercase);
            let mut v: Vec<_> = s
                .stories
                .values()
                .filter(|st| st.status == StoryStatus::Published)
                .filter(|st| match &needle {
                    None => true,
                    Some(n) => {
                        st.title.to_lowercase().contains(n)
                            || st.description.to_lowercase().contains(n)
                            || st.tags.iter().any(|t| t.to_lowercase().contains(n))
                    }
                })
                .filter(|st| match &filter.theme {
                    None => true,
                    Some(theme) => st.theme.as_deref() == Some(theme.as_str()),
                })
                .cloned()
                .collect();
            // most-played first, newest breaking ties
            v.sort_by(|a, b| {
                b.times_started
                    .cmp(&a.times_started)
                    .then(b.created_at.cmp(&a.created_at))
            });
            Ok(v)
        }

        async fn list_by_author(&self, author: Id) -> RepoResult<Vec<Story>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.stories.values().filter(|st| st.author == author).cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn list_all(&self) -> RepoResult<Vec<Story>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.stories.values().cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn update_story(&self, id: Id, author: Id, upd: UpdateStory) -> RepoResult<Story> {
            let mut s = self.state.write().unwrap();
            let story = Self::owned_mut(&mut s, id, author)?;
            if let Some(title) = upd.title {
                let title = non_empty(&title, "title")?;
                bounded(&title, TITLE_MAX, "title")?;
                story.title = title;
            }
            if let Some(description) = upd.description {
                let description = non_empty(&description, "description")?;
                bounded(&description, DESCRIPTION_MAX, "description")?;
                story.description = description;
            }
            if let Some(tags) = upd.tags {
                story.tags = tags;
            }
            if let Some(theme) = upd.theme {
                story.theme = Some(theme);
            }
            if let Some(page_id) = upd.start_page {
                if !story.set_start_page(page_id) {
                    return Err(RepoError::InvalidReference("start page does not exist".into()));
                }
            }
            story.updated_at = Utc::now();
            let updated = story.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_story(&self, id: Id, author: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            Self::owned_mut(&mut s, id, author)?;
            s.stories.remove(&id);
            s.play_states.retain(|_, st| st.story != id);
            s.play_records.retain(|r| r.story != id);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn publish_story(&self, id: Id, author: Id) -> RepoResult<Story> {
            let mut s = self.state.write().unwrap();
            let story = Self::owned_mut(&mut s, id, author)?;
            story.can_publish().map_err(|why| match why {
                PublishBlocked::NoStartPage => RepoError::NoStartPage,
                PublishBlocked::StartPageMissing => {
                    RepoError::InvalidReference("start page no longer exists".into())
                }
            })?;
            story.status = StoryStatus::Published;
            story.updated_at = Utc::now();
            let published = story.clone();
            drop(s);
            self.persist();
            Ok(published)
        }

        async fn set_story_status(&self, id: Id, status: StoryStatus) -> RepoResult<Story> {
            let mut s = self.state.write().unwrap();
            let story = s.stories.get_mut(&id).ok_or(RepoError::NotFound)?;
            story.status = status;
            story.updated_at = Utc::now();
            let updated = story.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn add_page(&self, story: Id, author: Id, new: NewPage) -> RepoResult<Page> {
            let text = validate_new_page(&new)?;
            let mut s = self.state.write().unwrap();
            let st = Self::owned_mut(&mut s, story, author)?;
            let page = st.add_page(NewPage { text, ..new });
            st.updated_at = Utc::now();
            drop(s);
            self.persist();
            Ok(page)
        }

        async fn update_page(&self, story: Id, page: Id, author: Id, upd: UpdatePage) -> RepoResult<Page> {
            let mut s = self.state.write().unwrap();
            let st = Self::owned_mut(&mut s, story, author)?;
            let p = st.page_mut(page).ok_or(RepoError::NotFound)?;
            if let Some(text) = upd.text {
                p.text = non_empty(&text, "page text")?;
            }
            if let Some(title) = upd.title {
                bounded(&title, PAGE_TITLE_MAX, "page title")?;
                p.title = Some(title);
            }
            if let Some(url) = upd.illustration {
                check_illustration(&url)?;
                p.illustration = Some(url);
            }
            if let Some(is_ending) = upd.is_ending {
                p.is_ending = is_ending;
            }
            if let Some(label) = upd.ending_label {
                bounded(&label, ENDING_LABEL_MAX, "ending label")?;
                p.ending_label = Some(label);
            }
            let updated = p.clone();
            st.updated_at = Utc::now();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn remove_page(&self, story: Id, page: Id, author: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let st = Self::owned_mut(&mut s, story, author)?;
            if !st.remove_page(page) {
                return Err(RepoError::NotFound);
            }
            st.updated_at = Utc::now();
            drop(s);
            self.persist();
            Ok(())
        }

        async fn add_choice(&self, story: Id, page: Id, author: Id, new: NewChoice) -> RepoResult<Choice> {
            let text = non_empty(&new.text, "choice text")?;
            let mut s = self.state.write().unwrap();
            let st = Self::owned_mut(&mut s, story, author)?;
            // the target is deliberately not resolved here; see traversal
            let p = st.page_mut(page).ok_or(RepoError::NotFound)?;
            let choice = p.add_choice(text, new.target);
            st.updated_at = Utc::now();
            drop(s);
            self.persist();
            Ok(choice)
        }

        async fn remove_choice(&self, story: Id, page: Id, choice: Id, author: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let st = Self::owned_mut(&mut s, story, author)?;
            let p = st.page_mut(page).ok_or(RepoError::NotFound)?;
            if !p.remove_choice(choice) {
                return Err(RepoError::NotFound);
            }
            st.updated_at = Utc::now();
            drop(s);
            self.persist();
            Ok(())
        }

        async fn bump_started(&self, id: Id) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let story = s.stories.get_mut(&id).ok_or(RepoError::NotFound)?;
            story.times_started += 1;
            let n = story.times_started;
            drop(s);
            self.persist();
            Ok(n)
        }
    }

    #[async_trait]
    impl PlayRepo for InMemRepo {
        async fn upsert_play_state(&self, state: PlayState) -> RepoResult<PlayState> {
            let mut s = self.state.write().unwrap();
            if !s.stories.contains_key(&state.story) {
                return Err(RepoError::NotFound);
            }
            s.play_states.insert(state_key(state.reader, state.story), state.clone());
            drop(s);
            self.persist();
            Ok(state)
        }

        async fn get_play_state(&self, reader: Id, story: Id) -> RepoResult<PlayState> {
            let s = self.state.read().unwrap();
            s.play_states
                .get(&state_key(reader, story))
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn count_play_states(&self, story: Id) -> RepoResult<u64> {
            let s = self.state.read().unwrap();
            Ok(s.play_states.values().filter(|st| st.story == story).count() as u64)
        }

        async fn record_finish(&self, record: PlayRecord) -> RepoResult<PlayRecord> {
            let mut s = self.state.write().unwrap();
            let story = s.stories.get_mut(&record.story).ok_or(RepoError::NotFound)?;
            story.times_finished += 1;
            s.play_states.remove(&state_key(record.reader, record.story));
            s.play_records.push(record.clone());
            drop(s);
            self.persist();
            Ok(record)
        }

        async fn list_story_records(&self, story: Id) -> RepoResult<Vec<PlayRecord>> {
            let s = self.state.read().unwrap();
            Ok(s.play_records.iter().filter(|r| r.story == story).cloned().collect())
        }

        async fn list_reader_records(&self, reader: Id) -> RepoResult<Vec<PlayRecord>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.play_records.iter().filter(|r| r.reader == reader).cloned().collect();
            v.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
            Ok(v)
        }

        async fn count_records(&self) -> RepoResult<u64> {
            let s = self.state.read().unwrap();
            Ok(s.play_records.len() as u64)
        }
    }

    #[async_trait]
    impl FeedbackRepo for InMemRepo {
        async fn rate_story(&self, story: Id, user: Id, rating: RateStory) -> RepoResult<RatingSummary> {
            if !(1..=5).contains(&rating.score) {
                return Err(RepoError::Validation("score must be between 1 and 5".into()));
            }
            if let Some(comment) = &rating.comment {
                bounded(comment, COMMENT_MAX, "comment")?;
            }
            let mut s = self.state.write().unwrap();
            let st = s.stories.get_mut(&story).ok_or(RepoError::NotFound)?;
            match st.ratings.iter_mut().find(|r| r.user == user) {
                Some(existing) => {
                    existing.score = rating.score;
                    if rating.comment.is_some() {
                        existing.comment = rating.comment;
                    }
                    existing.rated_at = Utc::now();
                }
                None => st.ratings.push(Rating {
                    user,
                    score: rating.score,
                    comment: rating.comment,
                    rated_at: Utc::now(),
                }),
            }
            let summary = RatingSummary { mean: st.mean_rating(), count: st.ratings.len() as u64 };
            drop(s);
            self.persist();
            Ok(summary)
        }

        async fn report_story(&self, story: Id, user: Id, reason: String) -> RepoResult<u64> {
            let reason = non_empty(&reason, "report reason")?;
            let mut s = self.state.write().unwrap();
            let st = s.stories.get_mut(&story).ok_or(RepoError::NotFound)?;
            if st.reports.iter().any(|r| r.user == user) {
                return Err(RepoError::AlreadyReported);
            }
            st.reports.push(Report { user, reason, reported_at: Utc::now() });
            let count = st.reports.len() as u64;
            drop(s);
            self.persist();
            Ok(count)
        }
    }
}
