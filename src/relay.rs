use crate::broadcast::{BroadcastControl, BroadcastError};
use crate::config::RelayConfig;
use crate::types::AnalysisResult;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

/// 中継サーバのエラー
///
/// ハンドラ内で発生したエラーはすべてここに集約し、
/// `{"success": false, "error": "..."}` のJSONボディで応答する。
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 指定された名前のシーンアイテムが存在しない (404)
    #[error("シーンアイテムが見つかりません: {0}")]
    NotFound(String),

    /// 配信ソフト側の失敗 (500)
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Broadcast(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// 中継サーバの共有状態
///
/// 採点結果キャッシュは単一スロット・後勝ちで、明示的なクリアはない。
#[derive(Clone)]
pub struct RelayState {
    /// 最新の採点結果キャッシュ（オーバーレイページの描画元）
    cache: Arc<RwLock<Option<AnalysisResult>>>,

    /// 配信ソフト制御の窓口
    control: Arc<Mutex<dyn BroadcastControl>>,

    /// 現在の出力先シーン名（/connectで更新）
    scene: Arc<RwLock<String>>,

    /// ブラウザソースに設定する自分自身のオーバーレイURL
    overlay_url: String,
}

impl RelayState {
    pub fn new(
        control: Arc<Mutex<dyn BroadcastControl>>,
        scene_name: &str,
        overlay_url: &str,
    ) -> Self {
        Self {
            cache: Arc::new(RwLock::new(None)),
            control,
            scene: Arc::new(RwLock::new(scene_name.to_string())),
            overlay_url: overlay_url.to_string(),
        }
    }
}

fn default_scene_name() -> String {
    "Scene".to_string()
}

fn default_width() -> u32 {
    450
}

fn default_height() -> u32 {
    930
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConnectRequest {
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "sceneName", default = "default_scene_name")]
    pub scene_name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpsertRequest {
    #[serde(rename = "sourceName")]
    pub source_name: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    pub result: Option<AnalysisResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpsertResponse {
    pub success: bool,
    pub created: bool,
    pub refreshed: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VisibleRequest {
    #[serde(rename = "sourceName")]
    pub source_name: String,
    pub visible: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VisibleResponse {
    pub success: bool,
    pub visible: bool,
}

/// ルータを構築
///
/// 4エンドポイントすべてループバック前提・認証なし
/// （信頼境界はローカルマシン）。CORSは全開にする。
pub fn create_router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/connect", post(connect_handler))
        .route("/overlay/upsertOrRefresh", post(upsert_handler))
        .route("/overlay/visible", post(visible_handler))
        .route("/overlay", get(overlay_handler))
        .layer(cors)
        .with_state(state)
}

/// 中継サーバを起動
///
/// ループバックにバインドして接続を待ち続ける。
pub async fn serve(config: &RelayConfig, state: RelayState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("バインドアドレスが不正: {}:{}", config.bind, config.port))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("中継サーバのバインドに失敗: {}", addr))?;

    log::info!("中継サーバを起動しました: http://{}/overlay", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("中継サーバの実行に失敗")?;

    Ok(())
}

/// POST /connect
///
/// obs-websocket接続を開き（張り直し）、出力先シーン名を記録する。
async fn connect_handler(
    State(state): State<RelayState>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, RelayError> {
    log::info!("/connect: {}", req.address);

    let mut control = state.control.lock().await;
    control.connect(&req.address, &req.password).await?;

    *state.scene.write().await = req.scene_name;

    Ok(Json(ConnectResponse { success: true }))
}

/// POST /overlay/upsertOrRefresh
///
/// 結果をキャッシュしてから、同名ソースがなければブラウザソースを
/// 作成、あればリフレッシュする。成功時は created / refreshed の
/// どちらか一方だけが true になる。
///
/// キャッシュの書き込みはOBS呼び出しより先に行う。OBS側が失敗しても
/// オーバーレイページは最新の結果を返す。
async fn upsert_handler(
    State(state): State<RelayState>,
    Json(req): Json<UpsertRequest>,
) -> Result<Json<UpsertResponse>, RelayError> {
    log::info!("/overlay/upsertOrRefresh: {}", req.source_name);

    *state.cache.write().await = req.result;

    let scene = state.scene.read().await.clone();
    let control = state.control.lock().await;

    let inputs = control.list_inputs().await?;
    if !inputs.iter().any(|name| name == &req.source_name) {
        control
            .create_browser_source(
                &scene,
                &req.source_name,
                &state.overlay_url,
                req.width,
                req.height,
            )
            .await?;

        return Ok(Json(UpsertResponse {
            success: true,
            created: true,
            refreshed: false,
        }));
    }

    control.refresh_source(&req.source_name).await?;

    Ok(Json(UpsertResponse {
        success: true,
        created: false,
        refreshed: true,
    }))
}

/// POST /overlay/visible
///
/// ソース名からシーンアイテムを引き、表示フラグを設定する。
/// アイテムがなければ404（キャッシュには触れない）。
async fn visible_handler(
    State(state): State<RelayState>,
    Json(req): Json<VisibleRequest>,
) -> Result<Json<VisibleResponse>, RelayError> {
    log::info!("/overlay/visible: {} -> {}", req.source_name, req.visible);

    let scene = state.scene.read().await.clone();
    let control = state.control.lock().await;

    let item_id = control
        .scene_item_id(&scene, &req.source_name)
        .await?
        .ok_or_else(|| RelayError::NotFound(req.source_name.clone()))?;

    control.set_item_enabled(&scene, item_id, req.visible).await?;

    Ok(Json(VisibleResponse {
        success: true,
        visible: req.visible,
    }))
}

/// GET /overlay
///
/// キャッシュ中の結果（なければゼロ埋めプレースホルダ）を
/// HTMLに描画して返す。配信ソフトのブラウザソースが読む。
async fn overlay_handler(State(state): State<RelayState>) -> Html<String> {
    let cache = state.cache.read().await.clone();
    Html(render_overlay(cache.as_ref()))
}

/// HTMLエスケープ
///
/// 講評は自由テキストなので挿入前に必ず通す。
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// オーバーレイページを描画
///
/// pitch / rhythm / emotion / total / content を固定レイアウトの
/// HTMLにする。レイアウトは配信画面に重ねる縦長カード。
fn render_overlay(result: Option<&AnalysisResult>) -> String {
    let placeholder = AnalysisResult::placeholder();
    let result = result.unwrap_or(&placeholder);

    let bar_row = |label: &str, text: &str, percent: u8| {
        format!(
            concat!(
                r#"<div class="row"><span class="label">{}</span>"#,
                r#"<span class="value">{}</span>"#,
                r#"<div class="bar"><div class="fill" style="width:{}%"></div></div></div>"#,
            ),
            label, text, percent
        )
    };

    let rows = [
        bar_row("音程の正確さ", &format!("{}%", result.pitch), result.pitch),
        bar_row("リズムの正確さ", &format!("{}%", result.rhythm), result.rhythm),
        bar_row(
            "感情表現",
            result.emotion_label(),
            result.emotion.saturating_mul(20),
        ),
    ]
    .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html lang="ja">
<head>
<meta charset="utf-8">
<title>AI分析結果</title>
<style>
  body {{ margin: 0; background: transparent; font-family: sans-serif; color: #ffffff; }}
  .card {{ background: rgba(20, 20, 30, 0.85); border-radius: 12px; padding: 20px; }}
  h2 {{ margin: 0 0 16px; font-size: 22px; }}
  .row {{ margin-bottom: 12px; }}
  .label {{ font-weight: bold; margin-right: 8px; }}
  .bar {{ height: 10px; background: #333344; border-radius: 5px; margin-top: 4px; }}
  .fill {{ height: 100%; background: #4f8dff; border-radius: 5px; }}
  .total {{ font-size: 20px; margin: 16px 0 8px; }}
  .stars {{ color: #ffd75f; }}
  .content {{ font-size: 15px; line-height: 1.5; }}
</style>
</head>
<body>
<div class="card">
  <h2>AI 分析結果</h2>
{rows}
  <div class="total">総合評価: <span class="stars">{stars}</span> ({total}点)</div>
  <div class="content">講評: &quot;{content}&quot;</div>
</div>
</body>
</html>
"#,
        rows = rows,
        stars = result.stars(),
        total = result.total,
        content = escape_html(&result.content),
    )
}

/// 中継サーバのクライアント
///
/// コンソール側から3つのPOSTエンドポイントを呼ぶ薄いHTTPクライアント。
/// 非成功応答はボディの `error` フィールドをメッセージとして返す。
pub struct RelayClient {
    base_url: String,
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // ループバック相手なので短めのタイムアウトにする
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("中継クライアントの作成に失敗")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn connect(&self, address: &str, password: &str, scene_name: &str) -> Result<()> {
        self.post_json(
            "/connect",
            &serde_json::json!({
                "address": address,
                "password": password,
                "sceneName": scene_name,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn upsert_or_refresh(
        &self,
        source_name: &str,
        width: u32,
        height: u32,
        result: Option<&AnalysisResult>,
    ) -> Result<UpsertResponse> {
        let value = self
            .post_json(
                "/overlay/upsertOrRefresh",
                &serde_json::json!({
                    "sourceName": source_name,
                    "width": width,
                    "height": height,
                    "result": result,
                }),
            )
            .await?;
        serde_json::from_value(value).context("upsertOrRefresh応答のパースに失敗")
    }

    pub async fn set_visible(&self, source_name: &str, visible: bool) -> Result<()> {
        self.post_json(
            "/overlay/visible",
            &serde_json::json!({
                "sourceName": source_name,
                "visible": visible,
            }),
        )
        .await?;
        Ok(())
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("中継サーバへの接続に失敗: {}", path))?;

        let status = response.status();
        let value: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("中継サーバ応答のパースに失敗: {}", path))?;

        if !status.is_success() {
            let message = value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("不明なエラー");
            anyhow::bail!("{}", message);
        }

        Ok(value)
    }
}
