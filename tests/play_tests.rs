use fabula::models::{FinishPlay, NewChoice, NewPage, NewStory, SaveProgress, StoryStatus};
use fabula::play::{self, ReadState};
use fabula::repo::{inmem::InMemRepo, RepoError, StoryRepo};
use fabula::repo::PlayRepo;

use fabula::models::{Choice, Id, Page};
use uuid::Uuid;

fn repo() -> InMemRepo {
    std::env::set_var("FABULA_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

struct Fixture {
    repo: InMemRepo,
    author: Id,
    story: Id,
    start: Page,
    end_a: Page,
    end_b: Page,
    choice_a: Choice,
    choice_b: Choice,
}

/// Start page with two choices, each leading to its own ending.
async fn two_ending_story(publish: bool) -> Fixture {
    let repo = repo();
    let author = Uuid::new_v4();
    let story = repo
        .create_story(
            author,
            NewStory {
                title: "The Fork".into(),
                description: "left or right".into(),
                tags: vec![],
                theme: None,
            },
        )
        .await
        .unwrap();

    let start = repo
        .add_page(story.id, author, page("You stand at a fork.", false))
        .await
        .unwrap();
    let end_a = repo
        .add_page(
            story.id,
            author,
            NewPage { ending_label: Some("The garden".into()), ..page("A quiet garden.", true) },
        )
        .await
        .unwrap();
    let end_b = repo
        .add_page(
            story.id,
            author,
            NewPage { ending_label: Some("The pit".into()), ..page("A deep pit.", true) },
        )
        .await
        .unwrap();

    let choice_a = repo
        .add_choice(story.id, start.id, author, NewChoice { text: "Go left".into(), target: end_a.id })
        .await
        .unwrap();
    let choice_b = repo
        .add_choice(story.id, start.id, author, NewChoice { text: "Go right".into(), target: end_b.id })
        .await
        .unwrap();

    repo.update_story(
        story.id,
        author,
        fabula::models::UpdateStory { start_page: Some(start.id), ..Default::default() },
    )
    .await
    .unwrap();
    if publish {
        repo.publish_story(story.id, author).await.unwrap();
    }

    Fixture { repo, author, story: story.id, start, end_a, end_b, choice_a, choice_b }
}

fn page(text: &str, is_ending: bool) -> NewPage {
    NewPage { title: None, text: text.into(), illustration: None, is_ending, ending_label: None }
}

#[tokio::test]
async fn step_follows_choice_and_detects_ending() {
    let fx = two_ending_story(true).await;
    let story = fx.repo.get_story(fx.story).await.unwrap();

    let outcome = play::step(&story, fx.start.id, fx.choice_a.id).unwrap();
    assert_eq!(outcome.page.id, fx.end_a.id);
    assert_eq!(outcome.state, ReadState::Ended);
}

#[tokio::test]
async fn step_rejects_foreign_and_unknown_choices() {
    let fx = two_ending_story(true).await;
    let story = fx.repo.get_story(fx.story).await.unwrap();

    // unknown page
    assert!(matches!(
        play::step(&story, Uuid::new_v4(), fx.choice_a.id).unwrap_err(),
        RepoError::NotFound
    ));
    // a choice that does not belong to the current page
    assert!(matches!(
        play::step(&story, fx.end_a.id, fx.choice_a.id).unwrap_err(),
        RepoError::NotFound
    ));
}

#[tokio::test]
async fn broken_choice_surfaces_as_invalid_reference() {
    let fx = two_ending_story(true).await;
    // the author deletes an ending; the edge pointing at it stays behind
    fx.repo.remove_page(fx.story, fx.end_a.id, fx.author).await.unwrap();
    let story = fx.repo.get_story(fx.story).await.unwrap();

    let err = play::step(&story, fx.start.id, fx.choice_a.id).unwrap_err();
    assert!(matches!(err, RepoError::InvalidReference(_)));

    // the sibling edge still traverses
    let outcome = play::step(&story, fx.start.id, fx.choice_b.id).unwrap();
    assert_eq!(outcome.page.id, fx.end_b.id);
}

#[tokio::test]
async fn dead_end_pages_stay_in_reading_state() {
    let fx = two_ending_story(true).await;
    let dead_end = fx
        .repo
        .add_page(fx.story, fx.author, page("Nothing here.", false))
        .await
        .unwrap();
    let choice = fx
        .repo
        .add_choice(
            fx.story,
            fx.start.id,
            fx.author,
            NewChoice { text: "Wander off".into(), target: dead_end.id },
        )
        .await
        .unwrap();
    let story = fx.repo.get_story(fx.story).await.unwrap();

    let outcome = play::step(&story, fx.start.id, choice.id).unwrap();
    assert_eq!(outcome.state, ReadState::Reading);
    assert!(outcome.page.choices.is_empty());
}

#[tokio::test]
async fn start_requires_a_published_story() {
    let fx = two_ending_story(false).await;
    let err = play::start(&fx.repo, fx.story).await.unwrap_err();
    assert!(matches!(err, RepoError::NotPublished));
    // refusing to start does not count a play
    assert_eq!(fx.repo.get_story(fx.story).await.unwrap().times_started, 0);

    fx.repo.publish_story(fx.story, fx.author).await.unwrap();
    fx.repo.set_story_status(fx.story, StoryStatus::Suspended).await.unwrap();
    let err = play::start(&fx.repo, fx.story).await.unwrap_err();
    assert!(matches!(err, RepoError::NotPublished));
}

#[tokio::test]
async fn start_counts_once_per_call_resume_never() {
    let fx = two_ending_story(true).await;
    let reader = Uuid::new_v4();

    let session = play::start(&fx.repo, fx.story).await.unwrap();
    assert_eq!(session.current_page.id, fx.start.id);
    assert_eq!(session.path, vec![fx.start.id]);
    assert_eq!(session.story.times_started, 1);

    play::start(&fx.repo, fx.story).await.unwrap();
    assert_eq!(fx.repo.get_story(fx.story).await.unwrap().times_started, 2);

    play::save_progress(
        &fx.repo,
        reader,
        fx.story,
        SaveProgress { current_page: fx.start.id, path: vec![fx.start.id] },
    )
    .await
    .unwrap();
    play::resume(&fx.repo, reader, fx.story).await.unwrap();
    assert_eq!(fx.repo.get_story(fx.story).await.unwrap().times_started, 2);
}

#[tokio::test]
async fn preview_skips_publish_check_and_counters() {
    let fx = two_ending_story(false).await;

    let session = play::preview(&fx.repo, fx.story, fx.author).await.unwrap();
    assert_eq!(session.current_page.id, fx.start.id);
    assert_eq!(fx.repo.get_story(fx.story).await.unwrap().times_started, 0);

    let err = play::preview(&fx.repo, fx.story, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));
}

#[tokio::test]
async fn resume_restores_the_saved_position() {
    let fx = two_ending_story(true).await;
    let reader = Uuid::new_v4();

    play::save_progress(
        &fx.repo,
        reader,
        fx.story,
        SaveProgress { current_page: fx.end_b.id, path: vec![fx.start.id, fx.end_b.id] },
    )
    .await
    .unwrap();

    let session = play::resume(&fx.repo, reader, fx.story).await.unwrap();
    assert_eq!(session.current_page.id, fx.end_b.id);
    assert_eq!(session.path, vec![fx.start.id, fx.end_b.id]);
}

#[tokio::test]
async fn resume_reports_a_deleted_current_page() {
    let fx = two_ending_story(true).await;
    let reader = Uuid::new_v4();

    play::save_progress(
        &fx.repo,
        reader,
        fx.story,
        SaveProgress { current_page: fx.end_a.id, path: vec![fx.start.id, fx.end_a.id] },
    )
    .await
    .unwrap();
    fx.repo.remove_page(fx.story, fx.end_a.id, fx.author).await.unwrap();

    let err = play::resume(&fx.repo, reader, fx.story).await.unwrap_err();
    assert!(matches!(err, RepoError::InvalidReference(_)));
}

#[tokio::test]
async fn resume_without_a_save_is_not_found() {
    let fx = two_ending_story(true).await;
    let err = play::resume(&fx.repo, Uuid::new_v4(), fx.story).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn finish_rejects_non_terminal_pages() {
    let fx = two_ending_story(true).await;
    let reader = Uuid::new_v4();

    play::save_progress(
        &fx.repo,
        reader,
        fx.story,
        SaveProgress { current_page: fx.start.id, path: vec![fx.start.id] },
    )
    .await
    .unwrap();

    let err = play::finish(
        &fx.repo,
        reader,
        fx.story,
        FinishPlay { ending_page: fx.start.id, path: vec![fx.start.id] },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RepoError::NotAnEnding));

    // nothing recorded, save untouched, counter untouched
    assert!(fx.repo.list_story_records(fx.story).await.unwrap().is_empty());
    assert!(fx.repo.get_play_state(reader, fx.story).await.is_ok());
    assert_eq!(fx.repo.get_story(fx.story).await.unwrap().times_finished, 0);
}

#[tokio::test]
async fn finish_records_and_clears_state() {
    let fx = two_ending_story(true).await;
    let reader = Uuid::new_v4();
    let path = vec![fx.start.id, fx.end_a.id];

    play::start(&fx.repo, fx.story).await.unwrap();
    play::save_progress(
        &fx.repo,
        reader,
        fx.story,
        SaveProgress { current_page: fx.end_a.id, path: path.clone() },
    )
    .await
    .unwrap();

    let outcome = play::finish(
        &fx.repo,
        reader,
        fx.story,
        FinishPlay { ending_page: fx.end_a.id, path: path.clone() },
    )
    .await
    .unwrap();

    assert_eq!(outcome.record.ending_page, fx.end_a.id);
    assert_eq!(outcome.record.path, path);
    assert!(outcome.similarity.first_to_finish);
    assert_eq!(outcome.similarity.percent, 0.0);

    assert!(matches!(
        fx.repo.get_play_state(reader, fx.story).await.unwrap_err(),
        RepoError::NotFound
    ));
    assert_eq!(fx.repo.get_story(fx.story).await.unwrap().times_finished, 1);

    // a second finisher on the same path is 100% similar to the first
    play::start(&fx.repo, fx.story).await.unwrap();
    let outcome = play::finish(
        &fx.repo,
        Uuid::new_v4(),
        fx.story,
        FinishPlay { ending_page: fx.end_a.id, path },
    )
    .await
    .unwrap();
    assert!(!outcome.similarity.first_to_finish);
    assert_eq!(outcome.similarity.percent, 100.0);

    // finishing without a prior save is fine (the delete is idempotent)
    play::start(&fx.repo, fx.story).await.unwrap();
    let outcome = play::finish(
        &fx.repo,
        Uuid::new_v4(),
        fx.story,
        FinishPlay { ending_page: fx.end_b.id, path: vec![fx.start.id, fx.end_b.id] },
    )
    .await
    .unwrap();
    assert_eq!(outcome.record.ending_page, fx.end_b.id);

    let story = fx.repo.get_story(fx.story).await.unwrap();
    assert_eq!(story.times_finished, 3);
    assert!(story.times_started >= story.times_finished);
}
