use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub obs: ObsConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// リモート分析API設定
///
/// ログイン・採点・SMS送信を提供する外部サービスへの接続設定。
///
/// # デフォルト値
///
/// - `base_url`: "http://127.0.0.1:8000"
/// - `timeout_seconds`: 30 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// ローカル中継サーバ設定
///
/// OBSブリッジとオーバーレイページを提供するループバック専用
/// HTTPサーバの設定。
///
/// # デフォルト値
///
/// - `bind`: "127.0.0.1" (ループバックのみ)
/// - `port`: 7777
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_bind")]
    pub bind: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

impl RelayConfig {
    /// 中継サーバ自身のベースURL
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// OBS接続設定
///
/// obs-websocket制御APIへの接続情報とブラウザソースの初期値。
/// アドレス・パスワード・シーン名はコンソール上で上書きできる。
///
/// # デフォルト値
///
/// - `address`: "127.0.0.1:4455" (obs-websocketの標準ポート)
/// - `scene_name`: "Scene"
/// - `source_name`: "AIKaraoke"
/// - `width` × `height`: 310 × 520
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObsConfig {
    #[serde(default = "default_obs_address")]
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_scene_name")]
    pub scene_name: String,
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_overlay_width")]
    pub width: u32,
    #[serde(default = "default_overlay_height")]
    pub height: u32,
}

/// 録音設定
///
/// # デフォルト値
///
/// - `device`: 未指定（コンソールで選択）
/// - `max_duration_seconds`: 1200 秒 (20分の上限で自動停止)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    /// 起動時に選択しておく入力デバイス名（省略可）
    pub device: Option<String>,
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
}

/// 出力設定
///
/// # デフォルト値
///
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_api_timeout_seconds() -> u64 {
    30
}

fn default_relay_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    7777
}

fn default_obs_address() -> String {
    "127.0.0.1:4455".to_string()
}

fn default_scene_name() -> String {
    "Scene".to_string()
}

fn default_source_name() -> String {
    "AIKaraoke".to_string()
}

fn default_overlay_width() -> u32 {
    310
}

fn default_overlay_height() -> u32 {
    520
}

fn default_max_duration_seconds() -> u64 {
    1200 // 20分で録音を打ち切る
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            relay: RelayConfig::default(),
            obs: ObsConfig::default(),
            recording: RecordingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_api_timeout_seconds(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_relay_bind(),
            port: default_relay_port(),
        }
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            address: default_obs_address(),
            password: String::new(),
            scene_name: default_scene_name(),
            source_name: default_source_name(),
            width: default_overlay_width(),
            height: default_overlay_height(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            device: None,
            max_duration_seconds: default_max_duration_seconds(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// デフォルト値を持つ設定ファイルを生成する。
    /// 既存のファイルは上書きされる。
    ///
    /// # Errors
    ///
    /// ファイルの書き込みに失敗した場合にエラーを返す。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.relay.port, 7777);
        assert_eq!(config.relay.bind, "127.0.0.1");
        assert_eq!(config.obs.address, "127.0.0.1:4455");
        assert_eq!(config.obs.scene_name, "Scene");
        assert_eq!(config.obs.source_name, "AIKaraoke");
        assert_eq!(config.recording.max_duration_seconds, 1200);
        assert!(config.recording.device.is_none());
        assert_eq!(config.output.log_level, "info");
    }

    #[test]
    fn test_relay_base_url() {
        let relay = RelayConfig {
            bind: "127.0.0.1".to_string(),
            port: 7878,
        };
        assert_eq!(relay.base_url(), "http://127.0.0.1:7878");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        // デフォルト設定を書き込み
        Config::write_default(path).unwrap();

        // 読み込み
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.relay.port, 7777);
        assert_eq!(config.obs.scene_name, "Scene");
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[api]
base_url = "https://api.example.com"
timeout_seconds = 10

[relay]
bind = "127.0.0.1"
port = 8888

[obs]
address = "192.168.0.5:4455"
password = "secret"
scene_name = "Karaoke"
source_name = "ScoreBoard"
width = 450
height = 930

[recording]
device = "USB Audio"
max_duration_seconds = 600

[output]
log_level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.api.timeout_seconds, 10);
        assert_eq!(config.relay.port, 8888);
        assert_eq!(config.obs.address, "192.168.0.5:4455");
        assert_eq!(config.obs.password, "secret");
        assert_eq!(config.obs.scene_name, "Karaoke");
        assert_eq!(config.obs.source_name, "ScoreBoard");
        assert_eq!(config.obs.width, 450);
        assert_eq!(config.obs.height, 930);
        assert_eq!(config.recording.device.as_deref(), Some("USB Audio"));
        assert_eq!(config.recording.max_duration_seconds, 600);
        assert_eq!(config.output.log_level, "debug");
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        // デフォルト設定が返されることを確認
        assert_eq!(config.relay.port, 7777);
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[obs]
scene_name = "Live"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        // 指定した値
        assert_eq!(config.obs.scene_name, "Live");

        // デフォルト値
        assert_eq!(config.obs.address, "127.0.0.1:4455");
        assert_eq!(config.relay.port, 7777);
        assert_eq!(config.recording.max_duration_seconds, 1200);
    }
}
