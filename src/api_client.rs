use crate::types::{AnalysisResult, Session};
use reqwest::multipart;
use std::time::Duration;
use tokio::sync::RwLock;

/// リモートAPI呼び出しのエラー分類
///
/// 呼び出し側はこの分類で表示メッセージを出し分ける。
/// どのエラーもプロセスを止めない（コンソールに通知して継続する）。
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 認証失敗（メールアドレスまたはパスワードが不正）
    #[error("ログインに失敗しました。メールアドレスとパスワードを確認してください")]
    Auth,

    /// セッションなし（ログイン前、またはログアウト後）
    #[error("ログインセッションが有効ではありません")]
    Session,

    /// リモートAPIの非成功応答（サーバ側のdetailメッセージ付き）
    #[error("APIエラー ({status}): {detail}")]
    Remote { status: u16, detail: String },

    /// 通信エラー（接続不可・タイムアウトなど）
    #[error("通信エラーが発生しました。ネットワーク接続を確認してください: {0}")]
    Network(#[from] reqwest::Error),
}

/// リモート分析APIクライアント
///
/// ログイン・録音ファイルの採点・SMS送信の3操作を提供する。
/// セッション（Bearerトークン）はこのクライアントが明示的に保持し、
/// `logout` またはプロセス終了で破棄される。
///
/// # エンドポイント
///
/// | 操作 | パス | 形式 |
/// |------|------|------|
/// | ログイン | `POST /auth/token` | フォームエンコード |
/// | 採点 | `POST /api/analyze` | multipart (Bearer) |
/// | SMS送信 | `POST /api/sendsms` | JSON (Bearer) |
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
}

impl ApiClient {
    /// 新しいApiClientを作成
    ///
    /// # Arguments
    ///
    /// * `base_url` - APIのベースURL（末尾スラッシュなし）
    /// * `timeout_seconds` - リクエスト全体のタイムアウト秒数
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            session: RwLock::new(None),
        })
    }

    /// 現在のセッションを取得
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// セッションを破棄（ログアウト）
    pub async fn logout(&self) {
        *self.session.write().await = None;
        log::info!("セッションを破棄しました");
    }

    /// ログイン
    ///
    /// フォームエンコードした資格情報を送り、成功時はセッションを
    /// クライアント内に保存する。非成功応答は `ApiError::Auth`。
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let response = self
            .http
            .post(format!("{}/auth/token", self.base_url))
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;

        if !response.status().is_success() {
            log::warn!("ログイン失敗: HTTP {}", response.status());
            return Err(ApiError::Auth);
        }

        let session: Session = response.json().await?;
        log::info!("ログインしました: {} ({})", session.user_name, session.email);

        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// 録音データを採点APIにアップロードして分析結果を取得
    ///
    /// セッションがない場合はリクエストを発行せずに
    /// `ApiError::Session` を返す。
    ///
    /// # Arguments
    ///
    /// * `wav_data` - WAV形式の録音データ
    /// * `file_name` - アップロード時のファイル名
    pub async fn analyze(
        &self,
        wav_data: Vec<u8>,
        file_name: &str,
    ) -> Result<AnalysisResult, ApiError> {
        let token = self.bearer_token().await?;

        let part = multipart::Part::bytes(wav_data)
            .file_name(file_name.to_string())
            .mime_str("audio/wav")?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/api/analyze", self.base_url))
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await?;

        let response = Self::check_remote(response).await?;
        let result: AnalysisResult = response.json().await?;
        log::info!(
            "分析結果を受信: 音程 {} / リズム {} / 総合 {}",
            result.pitch,
            result.rhythm,
            result.total
        );
        Ok(result)
    }

    /// 採点結果をSMSとして送信
    ///
    /// 戻り値はサーバの送達応答（形式はサーバ定義のため不透明に扱う）。
    pub async fn send_sms(
        &self,
        to: &str,
        content: &str,
    ) -> Result<serde_json::Value, ApiError> {
        let token = self.bearer_token().await?;

        let response = self
            .http
            .post(format!("{}/api/sendsms", self.base_url))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "to": to, "content": content }))
            .send()
            .await?;

        let response = Self::check_remote(response).await?;
        let ack: serde_json::Value = response.json().await?;
        log::info!("SMSを送信しました: {}", to);
        Ok(ack)
    }

    /// セッションのトークンを取得（なければSessionエラー）
    async fn bearer_token(&self) -> Result<String, ApiError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(ApiError::Session)
    }

    /// 200以外の応答をRemoteエラーに変換
    ///
    /// サーバはエラー詳細を `{"detail": "..."}` で返す。
    /// JSONでない場合は本文をそのまま使う。
    async fn check_remote(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.as_u16() == 200 {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or(body);

        log::warn!("APIエラー: HTTP {} - {}", status, detail);
        Err(ApiError::Remote {
            status: status.as_u16(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Form;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde::Deserialize;

    const TEST_TOKEN: &str = "test-token-123";

    #[derive(Deserialize)]
    struct LoginForm {
        username: String,
        password: String,
    }

    fn bearer_ok(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", TEST_TOKEN))
            .unwrap_or(false)
    }

    /// ループバック上にモックAPIサーバを立ててベースURLを返す
    async fn spawn_mock_server() -> String {
        let router = Router::new()
            .route(
                "/auth/token",
                post(|Form(form): Form<LoginForm>| async move {
                    if form.username == "op@example.com" && form.password == "correct" {
                        (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "token": TEST_TOKEN,
                                "email": "op@example.com",
                                "userName": "オペレータ"
                            })),
                        )
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({ "detail": "bad credentials" })),
                        )
                    }
                }),
            )
            .route(
                "/api/analyze",
                post(|headers: HeaderMap| async move {
                    if !bearer_ok(&headers) {
                        return (
                            StatusCode::FORBIDDEN,
                            Json(serde_json::json!({ "detail": "トークンが無効です" })),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "pitch": 80, "rhythm": 90, "emotion": 4,
                            "total": 85, "content": "良い歌でした"
                        })),
                    )
                }),
            )
            .route(
                "/api/sendsms",
                post(|headers: HeaderMap| async move {
                    if !bearer_ok(&headers) {
                        return (
                            StatusCode::FORBIDDEN,
                            Json(serde_json::json!({ "detail": "トークンが無効です" })),
                        );
                    }
                    (StatusCode::OK, Json(serde_json::json!({ "success": true })))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_analyze_without_session_is_session_error() {
        // リクエストを発行しないことを保証するため、到達不能なURLを使う
        let client = ApiClient::new("http://127.0.0.1:1", 1).unwrap();
        let err = client.analyze(vec![0u8; 4], "take.wav").await.unwrap_err();
        assert!(matches!(err, ApiError::Session));
    }

    #[tokio::test]
    async fn test_send_sms_without_session_is_session_error() {
        let client = ApiClient::new("http://127.0.0.1:1", 1).unwrap();
        let err = client.send_sms("010-0000-0000", "本文").await.unwrap_err();
        assert!(matches!(err, ApiError::Session));
    }

    #[tokio::test]
    async fn test_login_stores_session_and_authenticated_calls_carry_token() {
        let base = spawn_mock_server().await;
        let client = ApiClient::new(&base, 5).unwrap();

        let session = client.login("op@example.com", "correct").await.unwrap();
        assert_eq!(session.token, TEST_TOKEN);
        assert_eq!(session.email, "op@example.com");
        assert_eq!(session.user_name, "オペレータ");
        assert!(client.session().await.is_some());

        // 保存されたトークンがBearerヘッダとして送られる
        let result = client.analyze(vec![0u8; 16], "take.wav").await.unwrap();
        assert_eq!(result.total, 85);

        let ack = client.send_sms("010-1234-5678", "テスト").await.unwrap();
        assert_eq!(ack["success"], true);
    }

    #[tokio::test]
    async fn test_login_failure_is_auth_error() {
        let base = spawn_mock_server().await;
        let client = ApiClient::new(&base, 5).unwrap();

        let err = client.login("op@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::Auth));
        assert!(client.session().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_error_carries_detail() {
        let base = spawn_mock_server().await;
        let client = ApiClient::new(&base, 5).unwrap();

        client.login("op@example.com", "correct").await.unwrap();
        // トークンを壊して403のdetailを拾う
        {
            let mut session = client.session.write().await;
            if let Some(s) = session.as_mut() {
                s.token = "broken".to_string();
            }
        }

        let err = client.analyze(vec![0u8; 4], "take.wav").await.unwrap_err();
        match err {
            ApiError::Remote { status, detail } => {
                assert_eq!(status, 403);
                assert_eq!(detail, "トークンが無効です");
            }
            other => panic!("Remoteエラーを期待: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let base = spawn_mock_server().await;
        let client = ApiClient::new(&base, 5).unwrap();

        client.login("op@example.com", "correct").await.unwrap();
        client.logout().await;
        assert!(client.session().await.is_none());

        let err = client.analyze(vec![0u8; 4], "take.wav").await.unwrap_err();
        assert!(matches!(err, ApiError::Session));
    }
}
