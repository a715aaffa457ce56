use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use caravan_core::payment::PaymentOrder;
use caravan_core::{Actor, DomainError};
use caravan_pooling::{
    DeadlineOutcome, GroupAggregate, GroupFilter, GroupStatus, Member, PackageSelection,
    PaymentSummary, PoolGroup, ReviewDecision,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::require_auth, state::AppState};

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    trip_id: Uuid,
    group_size: u32,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    trip_id: Option<Uuid>,
    status: Option<GroupStatus>,
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    status: ReviewDecision,
}

/// Body of approve-package and pay; both default to the caller's own membership.
#[derive(Debug, Default, Deserialize)]
struct MemberSelection {
    member_id: Option<Uuid>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/pooling", post(create_group).get(list_groups))
        .route("/v1/pooling/my/groups", get(my_groups))
        .route("/v1/pooling/{id}", get(get_group).delete(delete_group))
        .route("/v1/pooling/{id}/join", post(join_group))
        .route("/v1/pooling/{id}/leave", delete(leave_group))
        .route("/v1/pooling/{id}/members/{member_id}", patch(review_member))
        .route("/v1/pooling/{id}/set-package", post(set_package))
        .route("/v1/pooling/{id}/approve-package", post(approve_package))
        .route("/v1/pooling/{id}/pay", post(initiate_payment))
        .route("/v1/pooling/{id}/payment-status", get(payment_status))
        .route("/v1/pooling/{id}/enforce-deadline", post(enforce_deadline))
        .route("/v1/pooling/{id}/lock", post(lock_group))
        .route_layer(from_fn_with_state(state, require_auth))
}

fn member_selection(body: &Bytes) -> Result<MemberSelection, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(MemberSelection::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| DomainError::Validation(format!("invalid request body: {}", e)).into())
}

/// POST /v1/pooling
async fn create_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<PoolGroup>), AppError> {
    let group = state
        .pooling
        .create_group(&actor, req.trip_id, req.group_size)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /v1/pooling?trip_id=&status=
async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PoolGroup>>, AppError> {
    let filter = GroupFilter {
        trip_id: query.trip_id,
        status: query.status,
        involving_user: None,
    };
    Ok(Json(state.pooling.list_groups(filter).await?))
}

/// GET /v1/pooling/my/groups
async fn my_groups(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<PoolGroup>>, AppError> {
    Ok(Json(state.pooling.my_groups(&actor).await?))
}

/// GET /v1/pooling/{id}
async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupAggregate>, AppError> {
    Ok(Json(state.pooling.get_group(group_id).await?))
}

/// DELETE /v1/pooling/{id}
async fn delete_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.pooling.delete_group(&actor, group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/pooling/{id}/join
async fn join_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Member>), AppError> {
    let member = state.pooling.join(&actor, group_id).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// DELETE /v1/pooling/{id}/leave
async fn leave_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Member>, AppError> {
    Ok(Json(state.pooling.leave(&actor, group_id).await?))
}

/// PATCH /v1/pooling/{id}/members/{member_id}
async fn review_member(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<Member>, AppError> {
    let member = state
        .pooling
        .review_member(&actor, group_id, member_id, req.status)
        .await?;
    Ok(Json(member))
}

/// POST /v1/pooling/{id}/set-package
async fn set_package(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
    Json(selection): Json<PackageSelection>,
) -> Result<Json<GroupAggregate>, AppError> {
    Ok(Json(
        state.pooling.set_package(&actor, group_id, selection).await?,
    ))
}

/// POST /v1/pooling/{id}/approve-package
async fn approve_package(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Member>, AppError> {
    let selection = member_selection(&body)?;
    let member = state
        .pooling
        .approve_package(&actor, group_id, selection.member_id)
        .await?;
    Ok(Json(member))
}

/// POST /v1/pooling/{id}/pay
async fn initiate_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<PaymentOrder>, AppError> {
    let selection = member_selection(&body)?;
    let order = state
        .checkout
        .initiate_payment(&actor, group_id, selection.member_id)
        .await?;
    Ok(Json(order))
}

/// GET /v1/pooling/{id}/payment-status
async fn payment_status(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<PaymentSummary>, AppError> {
    Ok(Json(state.pooling.check_payment_status(group_id).await?))
}

/// POST /v1/pooling/{id}/enforce-deadline
async fn enforce_deadline(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<DeadlineOutcome>, AppError> {
    let outcome = state.pooling.enforce_deadline(&actor, group_id).await?;
    state
        .metrics
        .members_cancelled
        .inc_by(outcome.cancelled.len() as u64);
    Ok(Json(outcome))
}

/// POST /v1/pooling/{id}/lock
async fn lock_group(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupAggregate>, AppError> {
    let agg = state.pooling.lock(&actor, group_id).await?;
    state.metrics.groups_locked.inc();
    Ok(Json(agg))
}
