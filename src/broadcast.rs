use async_trait::async_trait;

/// 配信制御APIのエラー
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// 接続失敗（アドレス不正・認証失敗・OBS未起動）
    #[error("OBSへの接続に失敗しました: {0}")]
    Connection(String),

    /// 未接続のまま制御呼び出しをした
    #[error("OBSに接続されていません")]
    NotConnected,

    /// 接続後の制御呼び出しの失敗
    #[error("OBS制御呼び出しに失敗しました: {0}")]
    Api(String),
}

/// 配信ソフト制御の窓口
///
/// obs-websocket制御APIのうち、このアプリが必要とする操作だけを
/// 切り出した狭いインタフェース。中継サーバはこのトレイト経由でのみ
/// 配信ソフトに触れるため、テストではインメモリのフェイクに
/// 差し替えられる。
#[async_trait]
pub trait BroadcastControl: Send + Sync {
    /// 制御用websocket接続を開く（既存の接続は張り直す）
    async fn connect(&mut self, address: &str, password: &str) -> Result<(), BroadcastError>;

    /// 入力ソース名の一覧を取得
    async fn list_inputs(&self) -> Result<Vec<String>, BroadcastError>;

    /// ブラウザソース入力をシーンに作成
    async fn create_browser_source(
        &self,
        scene: &str,
        name: &str,
        url: &str,
        width: u32,
        height: u32,
    ) -> Result<(), BroadcastError>;

    /// ブラウザソースにキャッシュ無効リロードをかける
    async fn refresh_source(&self, name: &str) -> Result<(), BroadcastError>;

    /// シーン内のアイテムIDをソース名で引く（なければNone）
    async fn scene_item_id(&self, scene: &str, name: &str)
        -> Result<Option<i64>, BroadcastError>;

    /// シーンアイテムの表示/非表示を切り替える
    async fn set_item_enabled(
        &self,
        scene: &str,
        item_id: i64,
        enabled: bool,
    ) -> Result<(), BroadcastError>;
}

/// obws (obs-websocket v5) 実装
///
/// 制御プロトコル自体はobwsクレートに任せる薄い消費者。
/// `connect` 前の制御呼び出しは `NotConnected` になる。
pub struct ObsBroadcast {
    client: Option<obws::Client>,
}

impl ObsBroadcast {
    pub fn new() -> Self {
        Self { client: None }
    }

    fn client(&self) -> Result<&obws::Client, BroadcastError> {
        self.client.as_ref().ok_or(BroadcastError::NotConnected)
    }

    /// "host:port" 形式のアドレスを分解（ポート省略時は4455）
    fn parse_address(address: &str) -> (String, u16) {
        match address.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (address.to_string(), 4455),
            },
            None => (address.to_string(), 4455),
        }
    }
}

impl Default for ObsBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastControl for ObsBroadcast {
    async fn connect(&mut self, address: &str, password: &str) -> Result<(), BroadcastError> {
        // 再接続のため既存クライアントは先に破棄する
        self.client = None;

        let (host, port) = Self::parse_address(address);
        let password = if password.is_empty() {
            None
        } else {
            Some(password)
        };

        let client = obws::Client::connect(host.as_str(), port, password)
            .await
            .map_err(|e| BroadcastError::Connection(e.to_string()))?;

        log::info!("OBSに接続しました: {}:{}", host, port);
        self.client = Some(client);
        Ok(())
    }

    async fn list_inputs(&self) -> Result<Vec<String>, BroadcastError> {
        let inputs = self
            .client()?
            .inputs()
            .list(None)
            .await
            .map_err(|e| BroadcastError::Api(e.to_string()))?;
        Ok(inputs.into_iter().map(|input| input.name).collect())
    }

    async fn create_browser_source(
        &self,
        scene: &str,
        name: &str,
        url: &str,
        width: u32,
        height: u32,
    ) -> Result<(), BroadcastError> {
        let settings = serde_json::json!({
            "url": url,
            "width": width,
            "height": height,
        });

        self.client()?
            .inputs()
            .create(obws::requests::inputs::Create {
                scene,
                input: name,
                kind: "browser_source",
                settings: Some(settings),
                enabled: Some(true),
            })
            .await
            .map_err(|e| BroadcastError::Api(e.to_string()))?;

        log::info!("ブラウザソースを作成しました: {} (シーン: {})", name, scene);
        Ok(())
    }

    async fn refresh_source(&self, name: &str) -> Result<(), BroadcastError> {
        // obs-websocketのブラウザソースは明示的にリロードを要求する必要がある
        self.client()?
            .inputs()
            .press_properties_button(name, "refreshnocache")
            .await
            .map_err(|e| BroadcastError::Api(e.to_string()))?;

        log::debug!("ブラウザソースをリフレッシュしました: {}", name);
        Ok(())
    }

    async fn scene_item_id(
        &self,
        scene: &str,
        name: &str,
    ) -> Result<Option<i64>, BroadcastError> {
        let items = self
            .client()?
            .scene_items()
            .list(scene)
            .await
            .map_err(|e| BroadcastError::Api(e.to_string()))?;

        Ok(items
            .into_iter()
            .find(|item| item.source_name == name)
            .map(|item| item.id))
    }

    async fn set_item_enabled(
        &self,
        scene: &str,
        item_id: i64,
        enabled: bool,
    ) -> Result<(), BroadcastError> {
        self.client()?
            .scene_items()
            .set_enabled(obws::requests::scene_items::SetEnabled {
                scene,
                item_id,
                enabled,
            })
            .await
            .map_err(|e| BroadcastError::Api(e.to_string()))?;

        log::debug!("シーンアイテムの表示を変更: id={} enabled={}", item_id, enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        assert_eq!(
            ObsBroadcast::parse_address("127.0.0.1:4455"),
            ("127.0.0.1".to_string(), 4455)
        );
        assert_eq!(
            ObsBroadcast::parse_address("192.168.0.5:4000"),
            ("192.168.0.5".to_string(), 4000)
        );
    }

    #[test]
    fn test_parse_address_without_port_defaults() {
        assert_eq!(
            ObsBroadcast::parse_address("localhost"),
            ("localhost".to_string(), 4455)
        );
    }

    #[tokio::test]
    async fn test_calls_before_connect_are_not_connected() {
        let obs = ObsBroadcast::new();
        let err = obs.list_inputs().await.unwrap_err();
        assert!(matches!(err, BroadcastError::NotConnected));

        let err = obs.refresh_source("AIKaraoke").await.unwrap_err();
        assert!(matches!(err, BroadcastError::NotConnected));
    }
}
