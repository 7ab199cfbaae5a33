//! Message log service: append, list, edit and react.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Uri},
    Extension, Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use agora_shared::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use agora_shared::protocol::{
    AttachmentDto, EditMessageRequest, ListMessagesQuery, MessageDto, MessagesResponse,
    Pagination, ReactionRequest, ReactionResponse, SendMessageRequest, SendMessageResponse,
    SuccessResponse,
};
use agora_shared::types::{MessageId, MessageKind};
use agora_shared::validation::{is_reserved_name, normalize_display_name};
use agora_store::{Attachment, Message, NewMessage, User};

use crate::api::{parse_query, ApiJson, AppState};
use crate::engagement::{self, QualifyingEvent};
use crate::error::ApiError;
use crate::gate::ClientIdentity;
use crate::identity::{guest_session_user, optional_session, require_session};
use crate::notify::Notification;

const SYSTEM_AUTHOR: &str = "System";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub(crate) fn message_dto(message: Message, include_identity: bool) -> MessageDto {
    MessageDto {
        id: message.id,
        author_id: message.author_id,
        author_display_name: message.author_display_name,
        body: message.body,
        kind: message.kind,
        created_at: message.created_at,
        reply_to_id: message.reply_to_id,
        attachment: message.attachment.map(|a| AttachmentDto {
            file_name: a.file_name,
            mime_type: a.mime_type,
            data: STANDARD.encode(&a.data),
        }),
        reactions: message.reactions,
        edited: message.edited,
        author_network_identity: if include_identity {
            message.author_network_identity.map(|n| n.0)
        } else {
            None
        },
    }
}

fn parse_message_id(raw: &str) -> Result<MessageId, ApiError> {
    MessageId::parse(raw).map_err(|_| ApiError::NotFound)
}

/// Plain text from an admin is shown as an admin message. Admin and
/// system kinds are never accepted from anyone else.
fn resolve_kind(requested: Option<MessageKind>, author: &User) -> Result<MessageKind, ApiError> {
    let is_admin = author.role.is_admin();
    match requested.unwrap_or(MessageKind::Text) {
        MessageKind::Text if is_admin => Ok(MessageKind::Admin),
        MessageKind::Admin | MessageKind::System if !is_admin => Err(ApiError::Forbidden),
        kind => Ok(kind),
    }
}

fn decode_attachment(dto: AttachmentDto) -> Result<Attachment, ApiError> {
    let file_name = dto.file_name.trim().to_string();
    if file_name.is_empty() {
        return Err(ApiError::invalid_request("attachment file name is empty"));
    }

    // Browsers hand over data URLs; only the payload after the comma counts.
    let encoded = match dto.data.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => dto.data.as_str(),
    };
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::invalid_request(format!("attachment is not base64: {e}")))?;

    let mime_type = match dto.mime_type.trim() {
        "" => DEFAULT_MIME_TYPE.to_string(),
        mime => mime.to_string(),
    };

    Ok(Attachment {
        file_name,
        mime_type,
        data,
    })
}

/// `POST /send-message` and `POST /messages`.
pub async fn send(
    State(state): State<AppState>,
    Extension(ClientIdentity(identity)): Extension<ClientIdentity>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let author = match optional_session(&state, &headers).await? {
        Some(user) => user,
        None => {
            let name = normalize_display_name(req.name.as_deref().unwrap_or_default())?;
            if is_reserved_name(&name) {
                return Err(ApiError::AdminPasswordRequired);
            }
            guest_session_user(&state, &name, &identity).await?
        }
    };

    let kind = resolve_kind(req.kind, &author)?;
    let attachment = req.attachment.map(decode_attachment).transpose()?;

    let new = if kind == MessageKind::System {
        NewMessage {
            author_id: None,
            author_display_name: SYSTEM_AUTHOR.to_string(),
            body: req.message,
            kind,
            reply_to_id: req.reply_to,
            attachment,
            author_network_identity: None,
        }
    } else {
        NewMessage {
            author_id: Some(author.id),
            author_display_name: author.display_name.clone(),
            body: req.message,
            kind,
            reply_to_id: req.reply_to,
            attachment,
            author_network_identity: (!identity.is_unknown()).then(|| identity.clone()),
        }
    };

    let limits = state.config.message_limits();
    let message = state
        .with_db(|db| {
            db.atomically(|db| {
                let message = db.append_message(&new, limits)?;
                if let (Some(author_id), Some(event)) =
                    (message.author_id, QualifyingEvent::for_kind(message.kind))
                {
                    engagement::record_event(db, author_id, event)?;
                }
                Ok(message)
            })
        })
        .await?;

    tracing::info!(
        message = %message.id,
        author = %message.author_display_name,
        kind = message.kind.as_str(),
        "message posted"
    );
    state.notifier.notify(Notification::NewMessage {
        author: message.author_display_name.clone(),
        kind: message.kind,
        body: match &message.attachment {
            Some(attachment) if message.body.trim().is_empty() => attachment.file_name.clone(),
            _ => message.body.clone(),
        },
    });

    Ok(Json(SendMessageResponse {
        success: true,
        message_id: message.id,
    }))
}

/// `GET /messages`: the whole log, or one page of it when `page` is given.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<MessagesResponse>, ApiError> {
    let query: ListMessagesQuery = parse_query(&uri)?;

    // A stale token on a read is treated as anonymous.
    let include_identity = matches!(
        optional_session(&state, &headers).await,
        Ok(Some(user)) if user.role.is_admin()
    );

    let Some(page) = query.page else {
        let messages = state.with_db(|db| db.list_messages()).await?;
        return Ok(Json(MessagesResponse {
            success: true,
            messages: messages
                .into_iter()
                .map(|m| message_dto(m, include_identity))
                .collect(),
            pagination: None,
        }));
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if page == 0 {
        return Err(ApiError::invalid_request("page starts at 1"));
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ApiError::invalid_request(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }

    let result = state
        .with_db(|db| db.list_messages_page(page, limit))
        .await?;
    let total_pages = result.total.div_ceil(u64::from(limit));

    Ok(Json(MessagesResponse {
        success: true,
        messages: result
            .messages
            .into_iter()
            .map(|m| message_dto(m, include_identity))
            .collect(),
        pagination: Some(Pagination {
            page,
            limit,
            total: result.total,
            total_pages,
            has_more: u64::from(page) < total_pages,
        }),
    }))
}

/// `PATCH /message/:id`: the author or an admin may rewrite a body.
pub async fn edit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let editor = require_session(&state, &headers).await?;
    let id = parse_message_id(&id)?;
    let limits = state.config.message_limits();

    state
        .with_db(|db| {
            db.atomically(|db| {
                let existing = db.get_message(id)?;
                if existing.kind == MessageKind::System {
                    return Ok(Err(ApiError::Forbidden));
                }
                if existing.author_id != Some(editor.id) && !editor.role.is_admin() {
                    return Ok(Err(ApiError::Forbidden));
                }
                db.edit_message(id, &req.message, limits)?;
                Ok(Ok(()))
            })
        })
        .await??;

    tracing::info!(message = %id, editor = %editor.id, "message edited");
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /message/:id/reactions`.
pub async fn react(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> Result<Json<ReactionResponse>, ApiError> {
    let user = require_session(&state, &headers).await?;
    let id = parse_message_id(&id)?;
    let emoji = req.emoji.trim().to_string();

    let reactions = state
        .with_db(|db| db.add_reaction(id, user.id, &emoji))
        .await?;

    Ok(Json(ReactionResponse {
        success: true,
        reactions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};

    use agora_shared::types::Achievement;

    use crate::api::tests::{call, harness, Harness, ADMIN_PASSWORD};

    async fn login(h: &Harness, ip: &str, body: Value) -> String {
        let (status, body) = call(&h.router, Method::POST, "/auth", ip, None, Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn post(h: &Harness, ip: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        call(&h.router, Method::POST, "/send-message", ip, token, Some(body)).await
    }

    async fn snapshot(h: &Harness, token: Option<&str>) -> Vec<Value> {
        let (status, body) =
            call(&h.router, Method::GET, "/messages", "10.0.0.1", token, None).await;
        assert_eq!(status, StatusCode::OK);
        body["messages"].as_array().unwrap().clone()
    }

    #[test]
    fn test_resolve_kind() {
        let mut user = User {
            id: agora_shared::types::UserId::new(),
            username: None,
            display_name: "Alice".into(),
            credential_hash: None,
            role: agora_shared::types::Role::Guest,
            reputation_points: 0,
            messages_sent: 0,
            achievements: Default::default(),
            blocked: false,
            email: None,
            phone: None,
            network_identity: None,
            first_seen: chrono::Utc::now(),
            last_seen: chrono::Utc::now(),
        };
        assert_eq!(resolve_kind(None, &user).unwrap(), MessageKind::Text);
        assert_eq!(resolve_kind(Some(MessageKind::Voice), &user).unwrap(), MessageKind::Voice);
        assert!(matches!(
            resolve_kind(Some(MessageKind::System), &user),
            Err(ApiError::Forbidden)
        ));

        user.role = agora_shared::types::Role::Admin;
        assert_eq!(resolve_kind(None, &user).unwrap(), MessageKind::Admin);
        assert_eq!(resolve_kind(Some(MessageKind::System), &user).unwrap(), MessageKind::System);
    }

    #[test]
    fn test_decode_attachment_strips_data_url() {
        let attachment = decode_attachment(AttachmentDto {
            file_name: "note.txt".into(),
            mime_type: "".into(),
            data: "data:text/plain;base64,aGVsbG8=".into(),
        })
        .unwrap();
        assert_eq!(attachment.data, b"hello");
        assert_eq!(attachment.mime_type, DEFAULT_MIME_TYPE);

        let err = decode_attachment(AttachmentDto {
            file_name: "x".into(),
            mime_type: "text/plain".into(),
            data: "!!!".into(),
        })
        .unwrap_err();
        assert_eq!(err.code(), agora_shared::error::ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_guest_post_and_snapshot() {
        let h = harness();
        let (status, body) =
            post(&h, "10.0.0.1", None, json!({"name": "Alice", "message": "hello"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let id = body["messageId"].as_str().unwrap().to_string();

        let messages = snapshot(&h, None).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], id.as_str());
        assert_eq!(messages[0]["authorDisplayName"], "Alice");
        assert_eq!(messages[0]["kind"], "user");
        assert!(messages[0].get("authorNetworkIdentity").is_none());

        let alice = h
            .state
            .with_db(|db| db.find_guest_by_display_name("Alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.reputation_points, 6);
        assert!(alice.achievements.contains(&Achievement::FirstMessage));
    }

    #[tokio::test]
    async fn test_rejected_posts_leave_log_unchanged() {
        let h = harness();
        let (status, body) =
            post(&h, "10.0.0.1", None, json!({"name": "Alice", "message": "x".repeat(501)})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "MESSAGE_TOO_LONG");

        let (_, body) =
            post(&h, "10.0.0.1", None, json!({"name": "Alice", "message": "   "})).await;
        assert_eq!(body["error"], "EMPTY_MESSAGE");

        let (_, body) = post(&h, "10.0.0.1", None, json!({"name": "", "message": "hi"})).await;
        assert_eq!(body["error"], "EMPTY_NAME");

        let (_, body) = post(
            &h,
            "10.0.0.1",
            None,
            json!({"name": "Alice", "message": "re", "replyTo": MessageId::new()}),
        )
        .await;
        assert_eq!(body["error"], "REPLY_TARGET_NOT_FOUND");

        assert!(snapshot(&h, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_reserved_name_needs_admin_session() {
        let h = harness();
        let (status, body) = post(
            &h,
            "10.0.0.1",
            None,
            json!({"name": "ADMIN", "message": "hi", "isAdmin": true}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "ADMIN_PASSWORD_REQUIRED");

        let token =
            login(&h, "10.0.0.1", json!({"name": "admin", "password": ADMIN_PASSWORD})).await;
        let (_, body) = post(&h, "10.0.0.1", Some(&token), json!({"message": "welcome"})).await;
        assert_eq!(body["success"], true);

        let messages = snapshot(&h, Some(&token)).await;
        assert_eq!(messages[0]["kind"], "admin");
        assert_eq!(messages[0]["authorNetworkIdentity"], "10.0.0.1");
    }

    #[tokio::test]
    async fn test_guest_cannot_post_system_message() {
        let h = harness();
        let token = login(&h, "10.0.0.1", json!({"name": "Mallory"})).await;
        let (status, body) =
            post(&h, "10.0.0.1", Some(&token), json!({"message": "fake", "type": "system"})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_file_messages() {
        let h = harness();
        let token = login(&h, "10.0.0.1", json!({"name": "Bob"})).await;

        let (_, body) =
            post(&h, "10.0.0.1", Some(&token), json!({"message": "", "type": "file"})).await;
        assert_eq!(body["error"], "ATTACHMENT_REQUIRED");

        let too_big = STANDARD.encode(vec![0u8; 2048]);
        let (_, body) = post(
            &h,
            "10.0.0.1",
            Some(&token),
            json!({
                "message": "",
                "type": "file",
                "attachment": {"fileName": "big.bin", "mimeType": "", "data": too_big},
            }),
        )
        .await;
        assert_eq!(body["error"], "ATTACHMENT_TOO_LARGE");

        let (_, body) = post(
            &h,
            "10.0.0.1",
            Some(&token),
            json!({
                "message": "",
                "type": "voice",
                "attachment": {"fileName": "memo.ogg", "mimeType": "audio/ogg", "data": "AAEC"},
            }),
        )
        .await;
        assert_eq!(body["success"], true);

        let messages = snapshot(&h, None).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["kind"], "voice");
        assert_eq!(messages[0]["attachment"]["data"], "AAEC");

        let (_, me) = call(&h.router, Method::GET, "/me", "10.0.0.1", Some(&token), None).await;
        assert_eq!(me["user"]["reputationPoints"], 3 + 5 + 5);
    }

    #[tokio::test]
    async fn test_pagination() {
        let h = harness();
        let token = login(&h, "10.0.0.1", json!({"name": "Alice"})).await;
        for i in 1..=5 {
            post(&h, "10.0.0.1", Some(&token), json!({"message": format!("m{i}")})).await;
        }

        let (_, body) =
            call(&h.router, Method::GET, "/messages?page=1&limit=2", "10.0.0.1", None, None).await;
        let bodies: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, vec!["m4", "m5"]);
        assert_eq!(
            body["pagination"],
            json!({"page": 1, "limit": 2, "total": 5, "totalPages": 3, "hasMore": true})
        );

        let (_, body) =
            call(&h.router, Method::GET, "/messages?page=3&limit=2", "10.0.0.1", None, None).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["body"], "m1");
        assert_eq!(body["pagination"]["hasMore"], false);

        let (_, body) =
            call(&h.router, Method::GET, "/messages?page=1", "10.0.0.1", None, None).await;
        assert_eq!(body["pagination"]["limit"], 50);

        for uri in [
            "/messages?page=0",
            "/messages?page=1&limit=0",
            "/messages?page=1&limit=201",
            "/messages?page=x",
        ] {
            let (status, body) = call(&h.router, Method::GET, uri, "10.0.0.1", None, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["error"], "INVALID_REQUEST", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_edit_permissions() {
        let h = harness();
        let alice = login(&h, "10.0.0.1", json!({"name": "Alice"})).await;
        let bob = login(&h, "10.0.0.2", json!({"name": "Bob"})).await;
        let (_, body) = post(&h, "10.0.0.1", Some(&alice), json!({"message": "typo"})).await;
        let uri = format!("/message/{}", body["messageId"].as_str().unwrap());

        let (status, _) = call(
            &h.router,
            Method::PATCH,
            &uri,
            "10.0.0.2",
            Some(&bob),
            Some(json!({"message": "hijack"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &h.router,
            Method::PATCH,
            &uri,
            "10.0.0.1",
            None,
            Some(json!({"message": "fixed"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, body) = call(
            &h.router,
            Method::PATCH,
            &uri,
            "10.0.0.1",
            Some(&alice),
            Some(json!({"message": " "})),
        )
        .await;
        assert_eq!(body["error"], "EMPTY_MESSAGE");

        let (status, body) = call(
            &h.router,
            Method::PATCH,
            &uri,
            "10.0.0.1",
            Some(&alice),
            Some(json!({"message": "fixed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let messages = snapshot(&h, None).await;
        assert_eq!(messages[0]["body"], "fixed");
        assert_eq!(messages[0]["edited"], true);

        let (status, _) = call(
            &h.router,
            Method::PATCH,
            "/message/not-an-id",
            "10.0.0.1",
            Some(&alice),
            Some(json!({"message": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reactions_are_unique_per_user() {
        let h = harness();
        let alice = login(&h, "10.0.0.1", json!({"name": "Alice"})).await;
        let bob = login(&h, "10.0.0.2", json!({"name": "Bob"})).await;
        let (_, body) = post(&h, "10.0.0.1", Some(&alice), json!({"message": "vote"})).await;
        let uri = format!("/message/{}/reactions", body["messageId"].as_str().unwrap());

        for token in [&alice, &alice, &bob] {
            let (status, _) = call(
                &h.router,
                Method::POST,
                &uri,
                "10.0.0.1",
                Some(token),
                Some(json!({"emoji": "👍"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, body) = call(
            &h.router,
            Method::POST,
            &uri,
            "10.0.0.2",
            Some(&bob),
            Some(json!({"emoji": "🎉"})),
        )
        .await;
        assert_eq!(body["reactions"], json!({"👍": 2, "🎉": 1}));

        let (_, body) = call(
            &h.router,
            Method::POST,
            &uri,
            "10.0.0.2",
            Some(&bob),
            Some(json!({"emoji": ""})),
        )
        .await;
        assert_eq!(body["error"], "INVALID_EMOJI");

        let missing = format!("/message/{}/reactions", MessageId::new());
        let (status, _) = call(
            &h.router,
            Method::POST,
            &missing,
            "10.0.0.2",
            Some(&bob),
            Some(json!({"emoji": "👍"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
