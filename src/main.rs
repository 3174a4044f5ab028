use anyhow::Result;
use env_logger::Env;
use karaoke_station::api_client::ApiClient;
use karaoke_station::broadcast::{BroadcastControl, ObsBroadcast};
use karaoke_station::config::Config;
use karaoke_station::recorder;
use karaoke_station::relay::{self, RelayClient, RelayState};
use karaoke_station::tui::TuiApp;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-devices" {
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .init();
        recorder::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        &args[1]
    } else {
        "config.toml"
    };

    // 設定を読み込み
    let config = Config::load_or_default(config_path)?;

    // ロガーを初期化（TUIと標準エラーが混ざらないようにログはファイルが無難だが、
    // 代替画面の裏に出るだけなのでstderrのままにしておく）
    env_logger::Builder::from_env(Env::default().default_filter_or(&config.output.log_level))
        .format_timestamp(None)
        .init();

    log::info!("karaoke-station を起動します");

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    // 中継サーバを起動（OBS制御はこのプロセス内で閉じる）
    let control: Arc<Mutex<dyn BroadcastControl>> = Arc::new(Mutex::new(ObsBroadcast::new()));
    let overlay_url = format!("{}/overlay", config.relay.base_url());
    let relay_state = RelayState::new(control, &config.obs.scene_name, &overlay_url);

    let relay_config = config.relay.clone();
    tokio::spawn(async move {
        if let Err(e) = relay::serve(&relay_config, relay_state).await {
            log::error!("中継サーバの起動に失敗: {}", e);
        }
    });

    // 分析API・中継サーバのクライアントを作成
    let api = Arc::new(ApiClient::new(
        &config.api.base_url,
        config.api.timeout_seconds,
    )?);
    let relay_client = Arc::new(RelayClient::new(&config.relay.base_url())?);

    // コンソールを起動
    let mut app = TuiApp::new(&config, api, relay_client, running);
    app.run().await?;

    log::info!("karaoke-station を終了しました");

    Ok(())
}
