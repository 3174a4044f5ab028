//! karaoke-station - AI電話カラオケ 採点ステーション
//!
//! このクレートは、カラオケ企画の参加者の歌唱を録音し、分析APIで採点して
//! 配信画面とSMSに結果を届けるオペレータ用コンソールを提供します。
//!
//! # 主な機能
//!
//! - **歌唱の録音**: cpalで入力デバイスからモノラル16bitのWAVを録音（上限20分）
//! - **AI分析**: 録音したWAVを分析APIへ送信し、音程・リズム・感情・総合の採点を取得
//! - **配信オーバーレイ**: ローカル中継サーバ経由でOBSのブラウザソースに結果カードを表示
//! - **SMS送信**: 採点結果を整形して参加者の電話番号へ送信
//!
//! # アーキテクチャ
//!
//! ```text
//! [TUIコンソール] ──→ [Recorder (cpal)] ──→ WAV
//!       │                                    │
//!       │              ┌─────────────────────┘
//!       ↓              ↓
//! [RelayClient]   [ApiClient] ──→ 分析API / SMS API
//!       │
//!       ↓ HTTP (127.0.0.1:7777)
//! [中継サーバ (axum)] ──→ [ObsBroadcast (obws)] ──→ OBS
//!       │
//!       └──→ GET /overlay （ブラウザソースが読むHTML）
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use karaoke_station::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod api_client;
pub mod broadcast;
pub mod config;
pub mod recorder;
pub mod relay;
pub mod tui;
pub mod tui_state;
pub mod types;
