use fabula::models::{NewChoice, NewPage, NewStory, RateStory, StoryStatus, UpdateStory};
use fabula::repo::{inmem::InMemRepo, RepoError};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use fabula::repo::{FeedbackRepo, PlayRepo, StoryRepo};

use chrono::Utc;
use fabula::models::{Id, PlayRecord, PlayState};
use uuid::Uuid;

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    // isolate state: do **not** persist to the default file path
    std::env::set_var("FABULA_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn new_story(title: &str) -> NewStory {
    NewStory {
        title: title.into(),
        description: "a short description".into(),
        tags: vec!["fantasy".into()],
        theme: Some("forest".into()),
    }
}

fn new_page(text: &str, is_ending: bool) -> NewPage {
    NewPage {
        title: None,
        text: text.into(),
        illustration: None,
        is_ending,
        ending_label: None,
    }
}

fn play_state(reader: Id, story: Id, current: Id, path: Vec<Id>) -> PlayState {
    PlayState { reader, story, current_page: current, path, updated_at: Utc::now() }
}

#[tokio::test]
async fn story_crud_and_ownership() {
    let r = repo();
    let author = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    let story = r.create_story(author, new_story("The Cave")).await.unwrap();
    assert_eq!(story.status, StoryStatus::Draft);
    assert_eq!(story.author, author);
    assert!(story.start_page.is_none());

    // visible through lookup
    let fetched = r.get_story(story.id).await.unwrap();
    assert_eq!(fetched.title, "The Cave");

    // only the owning author may mutate
    let err = r
        .update_story(story.id, stranger, UpdateStory { title: Some("Stolen".into()), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));

    let updated = r
        .update_story(story.id, author, UpdateStory { title: Some("The Deep Cave".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(updated.title, "The Deep Cave");

    // stranger cannot delete either
    let err = r.delete_story(story.id, stranger).await.unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));
    r.delete_story(story.id, author).await.unwrap();
    assert!(matches!(r.get_story(story.id).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn publish_requires_resolving_start_page() {
    let r = repo();
    let author = Uuid::new_v4();
    let story = r.create_story(author, new_story("Unfinished")).await.unwrap();
    let page = r.add_page(story.id, author, new_page("You wake up.", false)).await.unwrap();

    // no start page yet: publish refused, status untouched
    let err = r.publish_story(story.id, author).await.unwrap_err();
    assert!(matches!(err, RepoError::NoStartPage));
    assert_eq!(r.get_story(story.id).await.unwrap().status, StoryStatus::Draft);

    // start page referencing a missing page is rejected outright
    let err = r
        .update_story(story.id, author, UpdateStory { start_page: Some(Uuid::new_v4()), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidReference(_)));

    r.update_story(story.id, author, UpdateStory { start_page: Some(page.id), ..Default::default() })
        .await
        .unwrap();
    let published = r.publish_story(story.id, author).await.unwrap();
    assert_eq!(published.status, StoryStatus::Published);
}

#[tokio::test]
async fn removing_start_page_unsets_the_reference() {
    let r = repo();
    let author = Uuid::new_v4();
    let story = r.create_story(author, new_story("Shrinking")).await.unwrap();
    let page = r.add_page(story.id, author, new_page("Only page.", false)).await.unwrap();
    r.update_story(story.id, author, UpdateStory { start_page: Some(page.id), ..Default::default() })
        .await
        .unwrap();

    r.remove_page(story.id, page.id, author).await.unwrap();
    let story = r.get_story(story.id).await.unwrap();
    assert!(story.start_page.is_none());
    assert!(matches!(r.publish_story(story.id, author).await.unwrap_err(), RepoError::NoStartPage));
}

#[tokio::test]
async fn choice_targets_are_not_validated_at_write_time() {
    let r = repo();
    let author = Uuid::new_v4();
    let story = r.create_story(author, new_story("Loose Ends")).await.unwrap();
    let page = r.add_page(story.id, author, new_page("A fork.", false)).await.unwrap();

    // dangling edge is accepted; it only fails when traversed
    let dangling = Uuid::new_v4();
    let choice = r
        .add_choice(story.id, page.id, author, NewChoice { text: "Jump".into(), target: dangling })
        .await
        .unwrap();
    assert_eq!(choice.target, dangling);

    let stored = r.get_story(story.id).await.unwrap();
    assert_eq!(stored.page(page.id).unwrap().choices.len(), 1);

    r.remove_choice(story.id, page.id, choice.id, author).await.unwrap();
    let stored = r.get_story(story.id).await.unwrap();
    assert!(stored.page(page.id).unwrap().choices.is_empty());
}

#[tokio::test]
async fn input_validation() {
    let r = repo();
    let author = Uuid::new_v4();

    let err = r
        .create_story(author, NewStory { title: "  ".into(), description: "d".into(), tags: vec![], theme: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let err = r
        .create_story(author, NewStory { title: "t".repeat(201), description: "d".into(), tags: vec![], theme: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let story = r.create_story(author, new_story("Valid")).await.unwrap();
    let err = r.add_page(story.id, author, new_page("", false)).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let err = r
        .add_page(
            story.id,
            author,
            NewPage { illustration: Some("ftp://nope".into()), ..new_page("ok", false) },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[tokio::test]
async fn save_progress_upserts_by_reader_and_story() {
    let r = repo();
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let story = r.create_story(author, new_story("Saves")).await.unwrap();
    let p1 = r.add_page(story.id, author, new_page("one", false)).await.unwrap();
    let p2 = r.add_page(story.id, author, new_page("two", false)).await.unwrap();

    // identical saves collapse to a single row
    r.upsert_play_state(play_state(reader, story.id, p1.id, vec![p1.id])).await.unwrap();
    r.upsert_play_state(play_state(reader, story.id, p1.id, vec![p1.id])).await.unwrap();
    assert_eq!(r.count_play_states(story.id).await.unwrap(), 1);

    // last write wins
    r.upsert_play_state(play_state(reader, story.id, p2.id, vec![p1.id, p2.id])).await.unwrap();
    let state = r.get_play_state(reader, story.id).await.unwrap();
    assert_eq!(state.current_page, p2.id);
    assert_eq!(state.path, vec![p1.id, p2.id]);
    assert_eq!(r.count_play_states(story.id).await.unwrap(), 1);

    // a second reader keeps their own row
    let other = Uuid::new_v4();
    r.upsert_play_state(play_state(other, story.id, p1.id, vec![p1.id])).await.unwrap();
    assert_eq!(r.count_play_states(story.id).await.unwrap(), 2);
}

#[tokio::test]
async fn record_finish_is_transactional() {
    let r = repo();
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let story = r.create_story(author, new_story("Finishes")).await.unwrap();
    let start = r.add_page(story.id, author, new_page("start", false)).await.unwrap();
    let end = r.add_page(story.id, author, new_page("the end", true)).await.unwrap();

    r.upsert_play_state(play_state(reader, story.id, start.id, vec![start.id])).await.unwrap();

    let record = PlayRecord {
        id: Uuid::new_v4(),
        reader,
        story: story.id,
        ending_page: end.id,
        path: vec![start.id, end.id],
        finished_at: Utc::now(),
    };
    r.record_finish(record.clone()).await.unwrap();

    // play state gone, counter bumped, record appended
    assert!(matches!(r.get_play_state(reader, story.id).await.unwrap_err(), RepoError::NotFound));
    assert_eq!(r.get_story(story.id).await.unwrap().times_finished, 1);
    assert_eq!(r.list_story_records(story.id).await.unwrap().len(), 1);
    assert_eq!(r.count_records().await.unwrap(), 1);
}

#[tokio::test]
async fn delete_story_cascades_play_history() {
    let r = repo();
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let story = r.create_story(author, new_story("Doomed")).await.unwrap();
    let page = r.add_page(story.id, author, new_page("p", true)).await.unwrap();

    r.upsert_play_state(play_state(reader, story.id, page.id, vec![page.id])).await.unwrap();
    r.record_finish(PlayRecord {
        id: Uuid::new_v4(),
        reader: Uuid::new_v4(),
        story: story.id,
        ending_page: page.id,
        path: vec![page.id],
        finished_at: Utc::now(),
    })
    .await
    .unwrap();

    r.delete_story(story.id, author).await.unwrap();
    assert_eq!(r.count_play_states(story.id).await.unwrap(), 0);
    assert!(r.list_story_records(story.id).await.unwrap().is_empty());
    assert_eq!(r.count_records().await.unwrap(), 0);
}

#[tokio::test]
async fn rating_upserts_and_recomputes_mean() {
    let r = repo();
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let story = r.create_story(author, new_story("Rated")).await.unwrap();

    let err = r
        .rate_story(story.id, reader, RateStory { score: 6, comment: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let summary = r
        .rate_story(story.id, reader, RateStory { score: 4, comment: Some("ok".into()) })
        .await
        .unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.mean, 4.0);

    // same reader rates again: overwrite, not a second row
    let summary = r
        .rate_story(story.id, reader, RateStory { score: 5, comment: Some("better".into()) })
        .await
        .unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.mean, 5.0);
    let stored = r.get_story(story.id).await.unwrap();
    assert_eq!(stored.ratings.len(), 1);
    assert_eq!(stored.ratings[0].score, 5);
    assert_eq!(stored.ratings[0].comment.as_deref(), Some("better"));

    // a different reader moves the mean
    let summary = r
        .rate_story(story.id, Uuid::new_v4(), RateStory { score: 4, comment: None })
        .await
        .unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.mean, 4.5);
}

#[tokio::test]
async fn second_report_from_same_reader_is_rejected() {
    let r = repo();
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let story = r.create_story(author, new_story("Spammy")).await.unwrap();

    assert_eq!(r.report_story(story.id, reader, "spam".into()).await.unwrap(), 1);
    let err = r.report_story(story.id, reader, "spam".into()).await.unwrap_err();
    assert!(matches!(err, RepoError::AlreadyReported));
    assert_eq!(r.get_story(story.id).await.unwrap().reports.len(), 1);

    // other readers still can report
    assert_eq!(r.report_story(story.id, Uuid::new_v4(), "also spam".into()).await.unwrap(), 2);
}

#[tokio::test]
async fn browse_filters_published_stories() {
    let r = repo();
    let author = Uuid::new_v4();

    let visible = r.create_story(author, new_story("Dragon Keep")).await.unwrap();
    let page = r.add_page(visible.id, author, new_page("start", false)).await.unwrap();
    r.update_story(visible.id, author, UpdateStory { start_page: Some(page.id), ..Default::default() })
        .await
        .unwrap();
    r.publish_story(visible.id, author).await.unwrap();

    // drafts stay out of the catalogue
    r.create_story(author, new_story("Hidden Draft")).await.unwrap();

    let all = r.list_published(Default::default()).await.unwrap();
    assert_eq!(all.len(), 1);

    let hits = r
        .list_published(fabula::repo::BrowseFilter { search: Some("dragon".into()), theme: None })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let misses = r
        .list_published(fabula::repo::BrowseFilter { search: Some("spaceship".into()), theme: None })
        .await
        .unwrap();
    assert!(misses.is_empty());

    let themed = r
        .list_published(fabula::repo::BrowseFilter { search: None, theme: Some("forest".into()) })
        .await
        .unwrap();
    assert_eq!(themed.len(), 1);
}
