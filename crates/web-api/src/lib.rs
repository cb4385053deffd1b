//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的聊天服务。

mod error;
mod protocol;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use protocol::{ClientFrame, ServerFrame};
pub use routes::router;
pub use state::AppState;
