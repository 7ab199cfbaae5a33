//! Administrative actions. Every state change lands in the same savepoint
//! as its audit event.

use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Uri},
    Json,
};

use agora_shared::protocol::{
    AdminCredential, AuditEventDto, AuditResponse, BlockEntryDto, BlockRequest, BlocksResponse,
    ClearMessagesResponse, SuccessResponse, TombstoneDto, UnblockRequest,
};
use agora_shared::types::{AuditAction, MessageId, NetworkIdentity};
use agora_store::StoreError;

use crate::api::{parse_query, ApiJson, AppState};
use crate::error::ApiError;
use crate::identity::require_admin;
use crate::notify::Notification;

const DEFAULT_REASON: &str = "unspecified";
const AUDIT_PAGE: u32 = 100;

/// Block-list keys are canonical IP text, the same form [`block_gate`]
/// derives for callers.
///
/// [`block_gate`]: crate::gate::block_gate
fn parse_identity(raw: &str) -> Result<NetworkIdentity, ApiError> {
    let ip: IpAddr = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_request("ip is not a valid address"))?;
    Ok(NetworkIdentity::from_ip(ip))
}

fn reason_or_default(reason: Option<String>) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REASON.to_string())
}

/// `DELETE /message/:id`
pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(credential): ApiJson<AdminCredential>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let admin = require_admin(&state, &headers, credential.admin_password.as_deref()).await?;
    let id = MessageId::parse(&id).map_err(|_| ApiError::NotFound)?;

    let removed = state
        .with_db(|db| {
            db.atomically(|db| {
                let removed = db.delete_message(id)?;
                db.insert_tombstone(&removed, admin.id)?;
                db.record_audit(
                    AuditAction::DeleteMessage,
                    admin.id,
                    Some(&id.to_string()),
                    &removed.author_display_name,
                )?;
                Ok(removed)
            })
        })
        .await?;

    state.notifier.notify(Notification::MessageDeleted {
        id,
        author: removed.author_display_name,
    });
    Ok(Json(SuccessResponse::ok()))
}

/// `DELETE /clear-messages`
pub async fn clear_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(credential): ApiJson<AdminCredential>,
) -> Result<Json<ClearMessagesResponse>, ApiError> {
    let admin = require_admin(&state, &headers, credential.admin_password.as_deref()).await?;

    let deleted_count = state
        .with_db(|db| {
            db.atomically(|db| {
                for message in db.list_messages()? {
                    db.insert_tombstone(&message, admin.id)?;
                }
                let count = db.delete_all_messages()?;
                db.record_audit(
                    AuditAction::ClearMessages,
                    admin.id,
                    None,
                    &format!("{count} messages"),
                )?;
                Ok(count)
            })
        })
        .await?;

    tracing::warn!(count = deleted_count, admin = %admin.id, "message log cleared");
    state
        .notifier
        .notify(Notification::MessagesCleared { count: deleted_count });
    Ok(Json(ClearMessagesResponse {
        success: true,
        deleted_count,
    }))
}

/// `POST /block-ip`
pub async fn block_ip(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<BlockRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let admin = require_admin(&state, &headers, req.admin_password.as_deref()).await?;
    let identity = parse_identity(req.ip.as_deref().unwrap_or_default())?;
    let reason = reason_or_default(req.reason);

    state
        .with_db(|db| {
            db.atomically(|db| {
                db.block_identity(&identity, &reason, admin.id)?;
                db.record_audit(AuditAction::Block, admin.id, Some(identity.as_str()), &reason)
            })
        })
        .await?;

    state
        .notifier
        .notify(Notification::IdentityBlocked { identity, reason });
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /block-user`: flag the account and bar the identity it last
/// used, when one is known.
pub async fn block_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<BlockRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let admin = require_admin(&state, &headers, req.admin_password.as_deref()).await?;
    let user_id = req
        .user_id
        .ok_or_else(|| ApiError::invalid_request("userId is required"))?;
    let reason = reason_or_default(req.reason);

    let target = state
        .with_db(|db| {
            db.atomically(|db| {
                let target = db.get_user(user_id)?;
                if target.role.is_admin() {
                    return Ok(Err(ApiError::Forbidden));
                }
                db.set_user_blocked(target.id, true)?;
                let known = target.network_identity.as_ref().filter(|i| !i.is_unknown());
                if let Some(identity) = known {
                    db.block_identity(identity, &reason, admin.id)?;
                }
                db.record_audit(
                    AuditAction::BlockUser,
                    admin.id,
                    Some(&target.id.to_string()),
                    &reason,
                )?;
                Ok::<_, StoreError>(Ok(target))
            })
        })
        .await??;

    state.notifier.notify(Notification::UserBlocked {
        user: target.id,
        display_name: target.display_name,
        reason,
    });
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /unblock`: lift an identity block and the account flags of
/// users last seen there.
pub async fn unblock(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<UnblockRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let admin = require_admin(&state, &headers, req.admin_password.as_deref()).await?;
    let identity = parse_identity(&req.ip)?;

    state
        .with_db(|db| {
            db.atomically(|db| {
                if !db.unblock_identity(&identity)? {
                    return Err(StoreError::NotFound);
                }
                let cleared = db.clear_block_flag_for(&identity)?;
                db.record_audit(
                    AuditAction::Unblock,
                    admin.id,
                    Some(identity.as_str()),
                    &format!("{cleared} accounts restored"),
                )
            })
        })
        .await?;

    state
        .notifier
        .notify(Notification::IdentityUnblocked { identity });
    Ok(Json(SuccessResponse::ok()))
}

/// `GET /admin/audit`
pub async fn audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<AuditResponse>, ApiError> {
    let credential: AdminCredential = parse_query(&uri)?;
    require_admin(&state, &headers, credential.admin_password.as_deref()).await?;

    let (events, tombstones) = state
        .with_db(|db| Ok((db.list_audit(AUDIT_PAGE)?, db.list_tombstones(AUDIT_PAGE)?)))
        .await?;

    Ok(Json(AuditResponse {
        success: true,
        events: events
            .into_iter()
            .map(|e| AuditEventDto {
                action: e.action,
                actor_id: e.actor_id,
                subject_id: e.subject_id,
                detail: e.detail,
                at: e.at,
            })
            .collect(),
        tombstones: tombstones
            .into_iter()
            .map(|t| TombstoneDto {
                message_id: t.message_id,
                author_id: t.author_id,
                author_display_name: t.author_display_name,
                body_digest: t.body_digest,
                body_length: t.body_length,
                created_at: t.created_at,
                deleted_at: t.deleted_at,
                deleted_by: t.deleted_by,
            })
            .collect(),
    }))
}

/// `GET /admin/blocks`
pub async fn blocks(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<BlocksResponse>, ApiError> {
    let credential: AdminCredential = parse_query(&uri)?;
    require_admin(&state, &headers, credential.admin_password.as_deref()).await?;

    let entries = state.with_db(|db| db.list_blocks()).await?;
    Ok(Json(BlocksResponse {
        success: true,
        blocks: entries
            .into_iter()
            .map(|b| BlockEntryDto {
                network_identity: b.network_identity.0,
                reason: b.reason,
                blocked_at: b.blocked_at,
                blocked_by: b.blocked_by,
            })
            .collect(),
    }))
}
