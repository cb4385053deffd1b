use std::sync::Arc;

use application::{ChatSession, IdentityOutcome, SessionTransition, Snapshot};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{JwtIdentityProvider, SignInPrompt};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::state::AppState;

/// WebSocket 连接
///
/// 每个连接拥有自己的聊天会话与身份提供方：
/// - 客户端提交的令牌驱动登录状态
/// - 登录后自动订阅默认房间，登出后卸载全部订阅
/// - 所有订阅房间的实时消息合并后按序转发
pub struct WebSocketConnection {
    session: ChatSession,
    provider: Arc<JwtIdentityProvider>,
    prompts: Option<mpsc::UnboundedReceiver<SignInPrompt>>,
}

impl WebSocketConnection {
    pub fn new(state: &AppState) -> Self {
        let (provider, prompts) = JwtIdentityProvider::new(state.identity_verifier.clone());
        let provider = Arc::new(provider);
        let session = ChatSession::new(
            state.chat_service.clone(),
            provider.clone(),
            state.sign_in_providers.clone(),
        );
        tracing::info!(client_id = %session.client(), "WebSocket 连接已建立");
        Self {
            session,
            provider,
            prompts: Some(prompts),
        }
    }

    /// 运行连接主循环，直到客户端断开
    pub async fn run(mut self, socket: WebSocket) {
        let (Some(mut deliveries), Some(mut prompts)) =
            (self.session.take_deliveries(), self.prompts.take())
        else {
            tracing::error!(client_id = %self.session.client(), "连接已运行过");
            return;
        };

        let (mut sender, mut incoming) = socket.split();

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(64);
        let send_task = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let outgoing = match cmd {
                    WsCommand::SendFrame(frame) => match serde_json::to_string(&frame) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize websocket frame");
                            continue;
                        }
                    },
                    WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                };
                if sender.send(outgoing).await.is_err() {
                    tracing::warn!("Failed to send websocket message");
                    break;
                }
            }
            let _ = sender.close().await;
            tracing::debug!("WebSocket发送任务结束");
        });

        // 身份提供方在注册时立即推送当前状态
        self.session.start().await;
        if self.process_identity(&cmd_tx).await.is_err() {
            tracing::warn!(client_id = %self.session.client(), "初始身份状态发送失败");
        }

        loop {
            tokio::select! {
                incoming_message = incoming.next() => {
                    let Some(Ok(message)) = incoming_message else {
                        break;
                    };
                    if self.handle_incoming(message, &cmd_tx).await.is_err() {
                        break;
                    }
                }
                Some(message) = deliveries.recv() => {
                    if !self.session.accept_delivery(&message) {
                        continue;
                    }
                    if cmd_tx.send(WsCommand::SendFrame(ServerFrame::message(message))).await.is_err() {
                        break;
                    }
                }
                Some(prompt) = prompts.recv() => {
                    let frame = ServerFrame::SignInRequired { providers: prompt.providers };
                    if cmd_tx.send(WsCommand::SendFrame(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }

        // 连接断开时卸载订阅并释放身份监听器
        self.session.close().await;
        drop(cmd_tx);
        let _ = send_task.await;

        tracing::info!(client_id = %self.session.client(), "WebSocket连接已断开");
    }

    /// 处理来自客户端的消息；返回 `Err` 表示连接应当结束
    async fn handle_incoming(
        &mut self,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::info!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .map_err(|_| ())?;
            }
            WsMessage::Pong(_) => {}
            WsMessage::Binary(_) => {
                let frame = ServerFrame::error("BAD_REQUEST", "binary frames are not supported");
                send_frame(cmd_tx, frame).await?;
            }
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => self.handle_frame(frame, cmd_tx).await?,
                Err(err) => {
                    tracing::debug!(error = %err, "无法解析客户端帧");
                    send_frame(cmd_tx, ServerFrame::error("BAD_REQUEST", err.to_string())).await?;
                }
            },
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: ClientFrame,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match frame {
            ClientFrame::SignIn { token } => match self.provider.assert_identity(&token).await {
                Ok(_) => self.process_identity(cmd_tx).await?,
                Err(err) => {
                    // 提供方已回到未登录状态，其登出事件由取消结果统一通知
                    self.session.discard_pending_identity();
                    let outcome = self.session.sign_in_cancelled(err).await;
                    self.emit_outcome(outcome, cmd_tx).await?;
                }
            },
            ClientFrame::SignOut => {
                if let Err(err) = self.session.sign_out().await {
                    send_frame(cmd_tx, ServerFrame::Error(ApiError::from(err).into_body())).await?;
                }
                self.process_identity(cmd_tx).await?;
            }
            ClientFrame::Send {
                room,
                text,
                image_url,
            } => {
                let room = room.unwrap_or_else(|| self.session.default_room().clone());
                if let Err(err) = self.session.send(room, text, image_url).await {
                    send_frame(cmd_tx, ServerFrame::Error(ApiError::from(err).into_body())).await?;
                }
            }
            ClientFrame::Subscribe { room, after } => {
                let snapshot = match after {
                    Some(after) => Some(self.session.resume(room, after).await),
                    None => self.session.subscribe(room).await,
                };
                if let Some(snapshot) = snapshot {
                    send_frame(cmd_tx, snapshot_frame(snapshot)).await?;
                }
            }
            ClientFrame::Unsubscribe { room } => {
                self.session.unsubscribe(&room).await;
            }
        }
        Ok(())
    }

    /// 处理身份提供方已推送的事件并通知客户端
    async fn process_identity(&mut self, cmd_tx: &mpsc::Sender<WsCommand>) -> Result<(), ()> {
        for outcome in self.session.process_pending_identity().await {
            self.emit_outcome(outcome, cmd_tx).await?;
        }
        Ok(())
    }

    async fn emit_outcome(
        &self,
        outcome: IdentityOutcome,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match outcome.transition {
            SessionTransition::SignedIn(name) => {
                send_frame(
                    cmd_tx,
                    ServerFrame::SignedIn {
                        display_name: name.as_str().to_string(),
                    },
                )
                .await?;
            }
            SessionTransition::SignedOut => {
                send_frame(cmd_tx, ServerFrame::SignedOut).await?;
            }
            SessionTransition::SignInCancelled(err) => {
                send_frame(cmd_tx, ServerFrame::Error(ApiError::from(err).into_body())).await?;
                send_frame(cmd_tx, ServerFrame::SignedOut).await?;
            }
        }
        if let Some(snapshot) = outcome.snapshot {
            send_frame(cmd_tx, snapshot_frame(snapshot)).await?;
        }
        Ok(())
    }
}

fn snapshot_frame(snapshot: Snapshot) -> ServerFrame {
    ServerFrame::Snapshot {
        room: snapshot.room,
        messages: snapshot.messages,
    }
}

async fn send_frame(cmd_tx: &mpsc::Sender<WsCommand>, frame: ServerFrame) -> Result<(), ()> {
    cmd_tx
        .send(WsCommand::SendFrame(frame))
        .await
        .map_err(|_| tracing::warn!("Failed to send frame to command channel"))
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendFrame(ServerFrame),
    SendPong(Vec<u8>),
}
