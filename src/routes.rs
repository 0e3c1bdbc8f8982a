use std::sync::Arc;

use actix_web::{web, HttpResponse};
use metrics::counter;

use crate::auth::{Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::play::{self, FinishOutcome, PlaySession, StepOutcome};
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{BrowseFilter, Repo};
use crate::stats::{self, PathSimilarity, StoryInsights, StorySummary, UnlockedEndings};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/stories")
                    .route(web::get().to(list_stories))
                    .route(web::post().to(create_story)),
            )
            // registered before /stories/{id} so "mine" never parses as an id
            .service(web::resource("/stories/mine").route(web::get().to(my_stories)))
            .service(
                web::resource("/stories/{id}")
                    .route(web::get().to(get_story))
                    .route(web::patch().to(update_story))
                    .route(web::delete().to(delete_story)),
            )
            .service(web::resource("/stories/{id}/publish").route(web::post().to(publish_story)))
            .service(web::resource("/stories/{id}/preview").route(web::post().to(preview_story)))
            .service(
                web::resource("/stories/{id}/pages")
                    .route(web::get().to(list_pages))
                    .route(web::post().to(add_page)),
            )
            .service(
                web::resource("/stories/{id}/pages/{page_id}")
                    .route(web::get().to(get_page))
                    .route(web::patch().to(update_page))
                    .route(web::delete().to(remove_page)),
            )
            .service(
                web::resource("/stories/{id}/pages/{page_id}/choices")
                    .route(web::post().to(add_choice)),
            )
            .service(
                web::resource("/stories/{id}/pages/{page_id}/choices/{choice_id}")
                    .route(web::delete().to(remove_choice)),
            )
            .service(web::resource("/stories/{id}/start").route(web::post().to(start_story)))
            .service(web::resource("/stories/{id}/step").route(web::post().to(step_story)))
            .service(
                web::resource("/stories/{id}/progress").route(web::put().to(save_progress)),
            )
            .service(web::resource("/stories/{id}/resume").route(web::get().to(resume_story)))
            .service(web::resource("/stories/{id}/finish").route(web::post().to(finish_story)))
            .service(web::resource("/stories/{id}/endings").route(web::get().to(unlocked_endings)))
            .service(
                web::resource("/stories/{id}/path-similarity")
                    .route(web::post().to(path_similarity)),
            )
            .service(web::resource("/stories/{id}/stats").route(web::get().to(story_stats)))
            .service(web::resource("/stories/{id}/insights").route(web::get().to(story_insights)))
            .service(web::resource("/stories/{id}/rating").route(web::post().to(rate_story)))
            .service(web::resource("/stories/{id}/report").route(web::post().to(report_story)))
            .service(web::resource("/plays").route(web::get().to(my_plays)))
            // Admin moderation endpoints
            .service(web::resource("/admin/stories").route(web::get().to(admin_list_stories)))
            .service(
                web::resource("/admin/stories/{id}/suspend")
                    .route(web::post().to(admin_suspend_story)),
            )
            .service(
                web::resource("/admin/stories/{id}/restore")
                    .route(web::post().to(admin_restore_story)),
            )
            .service(web::resource("/admin/overview").route(web::get().to(admin_overview))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub limits: RateLimiterFacade,
}

macro_rules! ensure_role {
    ($auth:expr, $($role:pat_param)|+) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $($role)|+)) {
            return Err(ApiError::Forbidden);
        }
    };
}

fn actor_id(auth: &Auth) -> Result<Id, ApiError> {
    auth.user_id().ok_or(ApiError::Forbidden)
}

/// Non-published stories are visible to their author and admins only.
fn visible_to(story: &Story, auth: Option<&Auth>) -> bool {
    if story.status == StoryStatus::Published {
        return true;
    }
    match auth {
        Some(a) => a.has_role(Role::Admin) || a.user_id() == Some(story.author),
        None => false,
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct BrowseQuery {
    pub search: Option<String>,
    pub theme: Option<String>,
}

// ---------------- catalogue ----------------

#[utoipa::path(
    get,
    path = "/api/v1/stories",
    params(
        ("search" = Option<String>, Query, description = "Substring over title, description and tags"),
        ("theme" = Option<String>, Query, description = "Exact theme filter")
    ),
    responses(
        (status = 200, description = "Published stories, most played first", body = [Story])
    )
)]
pub async fn list_stories(
    data: web::Data<AppState>,
    query: web::Query<BrowseQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let stories = data
        .repo
        .list_published(BrowseFilter { search: q.search, theme: q.theme })
        .await?;
    Ok(HttpResponse::Ok().json(stories))
}

#[utoipa::path(
    get,
    path = "/api/v1/stories/{id}",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Story", body = Story),
        (status = 404, description = "Story not found or not visible")
    )
)]
pub async fn get_story(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let story = data.repo.get_story(path.into_inner()).await?;
    if !visible_to(&story, auth.as_ref()) {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(story))
}

// ---------------- authoring ----------------

#[utoipa::path(
    post,
    path = "/api/v1/stories",
    request_body = NewStory,
    responses(
        (status = 201, description = "Story created as draft", body = Story),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Forbidden – Authors only")
    )
)]
pub async fn create_story(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewStory>,
) -> Result<HttpResponse, ApiError> {
    ensure_role!(auth, Role::Author | Role::Admin);
    let author = actor_id(&auth)?;
    let story = data.repo.create_story(author, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(story))
}

pub async fn my_stories(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_role!(auth, Role::Author | Role::Admin);
    let author = actor_id(&auth)?;
    let stories = data.repo.list_by_author(author).await?;
    Ok(HttpResponse::Ok().json(stories))
}

#[utoipa::path(
    patch,
    path = "/api/v1/stories/{id}",
    request_body = UpdateStory,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Story updated", body = Story),
        (status = 400, description = "Validation failed or start page does not exist"),
        (status = 403, description = "Not the owning author"),
        (status = 404, description = "Story not found")
    )
)]
pub async fn update_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateStory>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let story = data
        .repo
        .update_story(path.into_inner(), author, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(story))
}

#[utoipa::path(
    delete,
    path = "/api/v1/stories/{id}",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 204, description = "Story deleted, play history cascaded"),
        (status = 403, description = "Not the owning author"),
        (status = 404, description = "Story not found")
    )
)]
pub async fn delete_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    data.repo.delete_story(path.into_inner(), author).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/publish",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Story published", body = Story),
        (status = 400, description = "No start page, or start page missing"),
        (status = 403, description = "Not the owning author")
    )
)]
pub async fn publish_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let story = data.repo.publish_story(path.into_inner(), author).await?;
    counter!("fabula_stories_published_total", 1);
    log::info!("story {} published", story.id);
    Ok(HttpResponse::Ok().json(story))
}

/// Author dry run from the start page. Never touches play counters.
pub async fn preview_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let session = play::preview(data.repo.as_ref(), path.into_inner(), author).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn list_pages(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let actor = actor_id(&auth)?;
    let story = data.repo.get_story(path.into_inner()).await?;
    if story.author != actor && !auth.has_role(Role::Admin) {
        return Err(ApiError::Forbidden);
    }
    Ok(HttpResponse::Ok().json(story.pages))
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/pages",
    request_body = NewPage,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 201, description = "Page appended", body = Page),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Not the owning author")
    )
)]
pub async fn add_page(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewPage>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let page = data
        .repo
        .add_page(path.into_inner(), author, payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/stories/{id}/pages/{page_id}",
    params(
        ("id" = Id, Path, description = "Story id"),
        ("page_id" = Id, Path, description = "Page id")
    ),
    responses(
        (status = 200, description = "Page", body = Page),
        (status = 400, description = "Story not readable"),
        (status = 404, description = "Page not found")
    )
)]
pub async fn get_page(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (story_id, page_id) = path.into_inner();
    let story = data.repo.get_story(story_id).await?;
    if !visible_to(&story, Some(&auth)) {
        return Err(ApiError::NotPublished);
    }
    let page = story.page(page_id).cloned().ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn update_page(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<UpdatePage>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let (story_id, page_id) = path.into_inner();
    let page = data
        .repo
        .update_page(story_id, page_id, author, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn remove_page(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let (story_id, page_id) = path.into_inner();
    data.repo.remove_page(story_id, page_id, author).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/pages/{page_id}/choices",
    request_body = NewChoice,
    params(
        ("id" = Id, Path, description = "Story id"),
        ("page_id" = Id, Path, description = "Page id")
    ),
    responses(
        (status = 201, description = "Choice appended; target is not resolved here", body = Choice),
        (status = 403, description = "Not the owning author"),
        (status = 404, description = "Story or page not found")
    )
)]
pub async fn add_choice(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<NewChoice>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let (story_id, page_id) = path.into_inner();
    let choice = data
        .repo
        .add_choice(story_id, page_id, author, payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(choice))
}

pub async fn remove_choice(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let author = actor_id(&auth)?;
    let (story_id, page_id, choice_id) = path.into_inner();
    data.repo.remove_choice(story_id, page_id, choice_id, author).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- reading ----------------

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/start",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Run started at the start page", body = PlaySession),
        (status = 400, description = "Not published or no start page"),
        (status = 404, description = "Story not found")
    )
)]
pub async fn start_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    actor_id(&auth)?;
    let session = play::start(data.repo.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

#[derive(Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct StepRequest {
    pub current_page: Id,
    pub choice: Id,
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/step",
    request_body = StepRequest,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Next page, with ended flag", body = StepOutcome),
        (status = 400, description = "Broken choice target"),
        (status = 404, description = "Page or choice not found")
    )
)]
pub async fn step_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<StepRequest>,
) -> Result<HttpResponse, ApiError> {
    let story = data.repo.get_story(path.into_inner()).await?;
    if !visible_to(&story, Some(&auth)) {
        return Err(ApiError::NotPublished);
    }
    let outcome = play::step(&story, payload.current_page, payload.choice)?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    put,
    path = "/api/v1/stories/{id}/progress",
    request_body = SaveProgress,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Progress saved (upsert by reader and story)", body = PlayState),
        (status = 404, description = "Story not found"),
        (status = 429, description = "Too many saves")
    )
)]
pub async fn save_progress(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SaveProgress>,
) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    if !data.limits.allow_save(&reader.to_string()) {
        return Err(ApiError::RateLimited);
    }
    let state =
        play::save_progress(data.repo.as_ref(), reader, path.into_inner(), payload.into_inner())
            .await?;
    Ok(HttpResponse::Ok().json(state))
}

#[utoipa::path(
    get,
    path = "/api/v1/stories/{id}/resume",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Saved position, re-resolved against the live graph", body = PlaySession),
        (status = 400, description = "Saved page no longer exists"),
        (status = 404, description = "No saved progress")
    )
)]
pub async fn resume_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    let session = play::resume(data.repo.as_ref(), reader, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/finish",
    request_body = FinishPlay,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 201, description = "Run recorded", body = FinishOutcome),
        (status = 400, description = "Page is not an ending"),
        (status = 404, description = "Story or page not found")
    )
)]
pub async fn finish_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<FinishPlay>,
) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    let outcome =
        play::finish(data.repo.as_ref(), reader, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(outcome))
}

pub async fn my_plays(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    let records = data.repo.list_reader_records(reader).await?;
    Ok(HttpResponse::Ok().json(records))
}

#[utoipa::path(
    get,
    path = "/api/v1/stories/{id}/endings",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Endings this reader has reached", body = UnlockedEndings),
        (status = 404, description = "Story not found")
    )
)]
pub async fn unlocked_endings(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    let story_id = path.into_inner();
    let story = data.repo.get_story(story_id).await?;
    let records = data.repo.list_story_records(story_id).await?;
    Ok(HttpResponse::Ok().json(stats::unlocked_endings(&story, reader, &records)))
}

#[derive(Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct SimilarityRequest {
    pub path: Vec<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/path-similarity",
    request_body = SimilarityRequest,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Mean overlap with every prior finisher's path", body = PathSimilarity),
        (status = 404, description = "Story not found")
    )
)]
pub async fn path_similarity(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SimilarityRequest>,
) -> Result<HttpResponse, ApiError> {
    actor_id(&auth)?;
    let story_id = path.into_inner();
    data.repo.get_story(story_id).await?;
    let records = data.repo.list_story_records(story_id).await?;
    Ok(HttpResponse::Ok().json(stats::path_similarity(&payload.path, &records)))
}

// ---------------- statistics ----------------

#[utoipa::path(
    get,
    path = "/api/v1/stories/{id}/stats",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Public summary", body = StorySummary),
        (status = 404, description = "Story not found or not visible")
    )
)]
pub async fn story_stats(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let story = data.repo.get_story(path.into_inner()).await?;
    if !visible_to(&story, auth.as_ref()) {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(stats::story_summary(&story)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stories/{id}/insights",
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Author analytics over the full play history", body = StoryInsights),
        (status = 403, description = "Not the owning author"),
        (status = 404, description = "Story not found")
    )
)]
pub async fn story_insights(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let actor = actor_id(&auth)?;
    let story_id = path.into_inner();
    let story = data.repo.get_story(story_id).await?;
    if story.author != actor && !auth.has_role(Role::Admin) {
        return Err(ApiError::Forbidden);
    }
    let records = data.repo.list_story_records(story_id).await?;
    let abandoned = data.repo.count_play_states(story_id).await?;
    Ok(HttpResponse::Ok().json(stats::story_insights(&story, &records, abandoned)))
}

// ---------------- feedback ----------------

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/rating",
    request_body = RateStory,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 200, description = "Rating upserted; mean recomputed", body = RatingSummary),
        (status = 400, description = "Score outside 1..=5"),
        (status = 404, description = "Story not found"),
        (status = 429, description = "Too many ratings")
    )
)]
pub async fn rate_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<RateStory>,
) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    if !data.limits.allow_rating(&reader.to_string()) {
        return Err(ApiError::RateLimited);
    }
    let summary = data
        .repo
        .rate_story(path.into_inner(), reader, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[utoipa::path(
    post,
    path = "/api/v1/stories/{id}/report",
    request_body = ReportStory,
    params(("id" = Id, Path, description = "Story id")),
    responses(
        (status = 201, description = "Report appended"),
        (status = 404, description = "Story not found"),
        (status = 409, description = "Already reported by this reader"),
        (status = 429, description = "Too many reports")
    )
)]
pub async fn report_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReportStory>,
) -> Result<HttpResponse, ApiError> {
    let reader = actor_id(&auth)?;
    if !data.limits.allow_report(&reader.to_string()) {
        return Err(ApiError::RateLimited);
    }
    let count = data
        .repo
        .report_story(path.into_inner(), reader, payload.into_inner().reason)
        .await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "count": count })))
}

// ---------------- admin moderation ----------------

pub async fn admin_list_stories(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    ensure_role!(auth, Role::Admin);
    let stories = data.repo.list_all().await?;
    Ok(HttpResponse::Ok().json(stories))
}

pub async fn admin_suspend_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    ensure_role!(auth, Role::Admin);
    let story = data
        .repo
        .set_story_status(path.into_inner(), StoryStatus::Suspended)
        .await?;
    log::warn!("story {} suspended by admin", story.id);
    Ok(HttpResponse::Ok().json(story))
}

pub async fn admin_restore_story(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    ensure_role!(auth, Role::Admin);
    let story = data
        .repo
        .set_story_status(path.into_inner(), StoryStatus::Published)
        .await?;
    Ok(HttpResponse::Ok().json(story))
}

pub async fn admin_overview(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    ensure_role!(auth, Role::Admin);
    let stories = data.repo.list_all().await?;
    let plays_finished = data.repo.count_records().await?;
    Ok(HttpResponse::Ok().json(stats::admin_overview(&stories, plays_finished)))
}
