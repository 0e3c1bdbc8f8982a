use utoipa::OpenApi;

use crate::models::{
    Choice, FinishPlay, NewChoice, NewPage, NewStory, Page, PlayRecord, PlayState, RateStory,
    Rating, RatingSummary, Report, ReportStory, SaveProgress, Story, StoryStatus, UpdatePage,
    UpdateStory,
};
use crate::play::{FinishOutcome, PlaySession, ReadState, StepOutcome};
use crate::stats::{
    AdminOverview, EndingTally, PathSimilarity, StatusCounts, StoryInsights, StorySummary,
    TopStory, UnlockedEnding, UnlockedEndings,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_stories,
        crate::routes::get_story,
        crate::routes::create_story,
        crate::routes::update_story,
        crate::routes::delete_story,
        crate::routes::publish_story,
        crate::routes::add_page,
        crate::routes::get_page,
        crate::routes::add_choice,
        crate::routes::start_story,
        crate::routes::step_story,
        crate::routes::save_progress,
        crate::routes::resume_story,
        crate::routes::finish_story,
        crate::routes::unlocked_endings,
        crate::routes::path_similarity,
        crate::routes::story_stats,
        crate::routes::story_insights,
        crate::routes::rate_story,
        crate::routes::report_story,
    ),
    components(schemas(
        Story, StoryStatus, Page, Choice, Rating, Report,
        NewStory, UpdateStory, NewPage, UpdatePage, NewChoice,
        PlayState, PlayRecord, SaveProgress, FinishPlay,
        RateStory, ReportStory, RatingSummary,
        PlaySession, StepOutcome, ReadState, FinishOutcome,
        EndingTally, PathSimilarity, UnlockedEnding, UnlockedEndings,
        StorySummary, StoryInsights, StatusCounts, TopStory, AdminOverview,
        crate::routes::StepRequest, crate::routes::SimilarityRequest
    )),
    tags(
        (name = "stories", description = "Authoring and catalogue operations"),
        (name = "play", description = "Traversal and progress operations"),
        (name = "stats", description = "Aggregated play statistics"),
    )
)]
pub struct ApiDoc;
