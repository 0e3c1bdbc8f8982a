use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub type Id = Uuid;

// Field limits carried over from the platform's validation rules.
pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 500;
pub const PAGE_TITLE_MAX: usize = 200;
pub const ENDING_LABEL_MAX: usize = 100;
pub const COMMENT_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Draft,
    Published,
    Suspended,
}

/// A directed edge from its containing page to `target`. The target is not
/// checked against existing pages at write time; broken edges surface when
/// traversed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Choice {
    pub id: Id,
    pub text: String,
    pub target: Id,
}

/// A node in the story graph. Pages are owned by their story and never
/// outlive it. A page with `is_ending = false` and no choices is a legal
/// dead end.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page {
    pub id: Id,
    pub title: Option<String>,
    pub text: String,
    pub illustration: Option<String>,
    pub is_ending: bool,
    pub ending_label: Option<String>,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Rating {
    pub user: Id,
    pub score: u8,
    pub comment: Option<String>,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub user: Id,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Story {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub theme: Option<String>,
    pub status: StoryStatus,
    pub start_page: Option<Id>,
    pub author: Id,
    pub pages: Vec<Page>,
    pub times_started: u64,
    pub times_finished: u64,
    pub ratings: Vec<Rating>,
    pub reports: Vec<Report>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a story cannot be published yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishBlocked {
    NoStartPage,
    StartPageMissing,
}

impl Story {
    pub fn page(&self, page_id: Id) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == page_id)
    }

    pub fn page_mut(&mut self, page_id: Id) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.id == page_id)
    }

    /// Appends a page with a fresh identifier and returns it.
    pub fn add_page(&mut self, new: NewPage) -> Page {
        let page = Page {
            id: Uuid::new_v4(),
            title: new.title,
            text: new.text,
            illustration: new.illustration,
            is_ending: new.is_ending,
            ending_label: new.ending_label,
            choices: Vec::new(),
        };
        self.pages.push(page.clone());
        page
    }

    /// Removes a page. Choices elsewhere that pointed at it are left
    /// dangling; traversal reports them when followed.
    pub fn remove_page(&mut self, page_id: Id) -> bool {
        let before = self.pages.len();
        self.pages.retain(|p| p.id != page_id);
        if self.start_page == Some(page_id) {
            self.start_page = None;
        }
        self.pages.len() != before
    }

    /// Fails when `page_id` does not name an existing page of this story.
    pub fn set_start_page(&mut self, page_id: Id) -> bool {
        if self.page(page_id).is_none() {
            return false;
        }
        self.start_page = Some(page_id);
        true
    }

    pub fn ending_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|p| p.is_ending)
    }

    /// Publication check, in order: start page set, start page resolves.
    /// Reachability and choice targets are deliberately not checked.
    pub fn can_publish(&self) -> Result<(), PublishBlocked> {
        let start = self.start_page.ok_or(PublishBlocked::NoStartPage)?;
        if self.page(start).is_none() {
            return Err(PublishBlocked::StartPageMissing);
        }
        Ok(())
    }

    /// Derived, never persisted. Mean of all scores rounded to one decimal,
    /// 0.0 when nobody rated yet.
    pub fn mean_rating(&self) -> f64 {
        if self.ratings.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.ratings.iter().map(|r| u64::from(r.score)).sum();
        let mean = sum as f64 / self.ratings.len() as f64;
        (mean * 10.0).round() / 10.0
    }
}

impl Page {
    pub fn choice(&self, choice_id: Id) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == choice_id)
    }

    pub fn add_choice(&mut self, text: String, target: Id) -> Choice {
        let choice = Choice { id: Uuid::new_v4(), text, target };
        self.choices.push(choice.clone());
        choice
    }

    pub fn remove_choice(&mut self, choice_id: Id) -> bool {
        let before = self.choices.len();
        self.choices.retain(|c| c.id != choice_id);
        self.choices.len() != before
    }
}

/// Resumable progress of one reader in one story. (reader, story) is the
/// natural key; saves upsert rather than duplicate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlayState {
    pub reader: Id,
    pub story: Id,
    pub current_page: Id,
    pub path: Vec<Id>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of a completed playthrough. Accumulates indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlayRecord {
    pub id: Id,
    pub reader: Id,
    pub story: Id,
    pub ending_page: Id,
    pub path: Vec<Id>,
    pub finished_at: DateTime<Utc>,
}

// ---------------- input payloads ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewStory {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateStory {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub theme: Option<String>,
    pub start_page: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPage {
    pub title: Option<String>,
    pub text: String,
    pub illustration: Option<String>,
    #[serde(default)]
    pub is_ending: bool,
    pub ending_label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePage {
    pub title: Option<String>,
    pub text: Option<String>,
    pub illustration: Option<String>,
    pub is_ending: Option<bool>,
    pub ending_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewChoice {
    pub text: String,
    pub target: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaveProgress {
    pub current_page: Id,
    pub path: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FinishPlay {
    pub ending_page: Id,
    pub path: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateStory {
    pub score: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportStory {
    pub reason: String,
}

/// Mean and count over the live rating set, recomputed on every change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RatingSummary {
    pub mean: f64,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        let now = Utc::now();
        Story {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            tags: Vec::new(),
            theme: None,
            status: StoryStatus::Draft,
            start_page: None,
            author: Uuid::new_v4(),
            pages: Vec::new(),
            times_started: 0,
            times_finished: 0,
            ratings: Vec::new(),
            reports: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn page(text: &str) -> NewPage {
        NewPage {
            title: None,
            text: text.into(),
            illustration: None,
            is_ending: false,
            ending_label: None,
        }
    }

    #[test]
    fn publish_gate_checks_in_order() {
        let mut s = story();
        assert_eq!(s.can_publish(), Err(PublishBlocked::NoStartPage));

        // a reference that stopped resolving is a different failure
        s.start_page = Some(Uuid::new_v4());
        assert_eq!(s.can_publish(), Err(PublishBlocked::StartPageMissing));

        let p = s.add_page(page("begin"));
        assert!(s.set_start_page(p.id));
        assert_eq!(s.can_publish(), Ok(()));
    }

    #[test]
    fn set_start_page_rejects_unknown_pages() {
        let mut s = story();
        assert!(!s.set_start_page(Uuid::new_v4()));
        assert!(s.start_page.is_none());
    }

    #[test]
    fn removing_the_start_page_clears_the_reference() {
        let mut s = story();
        let p = s.add_page(page("begin"));
        s.set_start_page(p.id);
        assert!(s.remove_page(p.id));
        assert!(s.start_page.is_none());
        assert!(!s.remove_page(p.id));
    }

    #[test]
    fn choices_attach_and_detach() {
        let mut s = story();
        let from = s.add_page(page("from"));
        let to = s.add_page(page("to"));
        let c = s.page_mut(from.id).unwrap().add_choice("onward".into(), to.id);
        assert_eq!(s.page(from.id).unwrap().choice(c.id).unwrap().target, to.id);
        assert!(s.page_mut(from.id).unwrap().remove_choice(c.id));
        assert!(!s.page_mut(from.id).unwrap().remove_choice(c.id));
    }

    #[test]
    fn mean_rating_rounds_to_one_decimal() {
        let mut s = story();
        assert_eq!(s.mean_rating(), 0.0);
        for score in [5u8, 4, 4] {
            s.ratings.push(Rating { user: Uuid::new_v4(), score, comment: None, rated_at: Utc::now() });
        }
        assert_eq!(s.mean_rating(), 4.3);
    }
}
