use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use domain::{DisplayName, DomainError, Message, RoomName, SequenceId};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};
use application::ApplicationError;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    after: Option<SequenceId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPage {
    room: RoomName,
    messages: Vec<Message>,
    /// 下一页请求应使用的 `after`
    next_after: SequenceId,
}

pub fn router(state: AppState) -> Router {
    let blobs = ServeDir::new(&state.blob_directory);
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .nest_service("/blobs", blobs)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room}/messages", get(get_history))
        .route("/rooms/{room}/photos", post(upload_photo))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn parse_room(room: String) -> Result<RoomName, ApiError> {
    RoomName::parse(room).map_err(|err| ApplicationError::from(err).into())
}

async fn get_history(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    let room = parse_room(room)?;
    let mut cursor = state
        .chat_service
        .replay(room.clone(), query.after.unwrap_or(0));
    let messages = cursor.next_page().await;

    Ok(Json(HistoryPage {
        room,
        messages,
        next_after: cursor.position(),
    }))
}

/// 上传图片并以图片消息发送；携带 Bearer 令牌时以令牌中的名称署名。
async fn upload_photo(
    State(state): State<AppState>,
    Path(room): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let room = parse_room(room)?;
    let author = author_from_headers(&state, &headers)?;

    if body.is_empty() {
        return Err(ApplicationError::from(DomainError::validation_error(
            "photo",
            "must not be empty",
        ))
        .into());
    }
    let extension = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(image_extension)
        .ok_or_else(|| ApiError::bad_request("unsupported image content type"))?;

    let staging = std::env::temp_dir().join(format!("friendlychat-{}.{extension}", Uuid::new_v4()));
    tokio::fs::write(&staging, &body).await.map_err(|err| {
        tracing::error!(error = %err, "暂存上传图片失败");
        ApiError::internal_server_error("failed to stage upload")
    })?;

    let result = state
        .chat_service
        .send_photo(&author, room, &staging)
        .await;
    if let Err(err) = tokio::fs::remove_file(&staging).await {
        tracing::warn!(error = %err, path = %staging.display(), "清理暂存文件失败");
    }

    Ok((StatusCode::CREATED, Json(result?)))
}

fn author_from_headers(state: &AppState, headers: &HeaderMap) -> Result<DisplayName, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(DisplayName::anonymous());
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::bad_request("Invalid authorization header format"))?;
    let event = state.identity_verifier.verify(token)?;
    Ok(event.display_name().unwrap_or_default())
}

fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next()?.trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(&state).run(socket).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extension_ignores_parameters() {
        assert_eq!(image_extension("image/png"), Some("png"));
        assert_eq!(image_extension("image/jpeg; charset=binary"), Some("jpg"));
        assert_eq!(image_extension("text/plain"), None);
    }
}
