use crate::api_client::ApiClient;
use crate::config::Config;
use crate::recorder::{self, ActiveRecording};
use crate::relay::RelayClient;
use crate::tui_state::{
    format_elapsed, ConsoleFocus, ConsoleState, InputField, LoginFocus, StatusKind, UiEvent, View,
};
use crate::types::format_sms;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// オペレータコンソール
///
/// ログイン画面とメインコンソールの2画面を持つ。ネットワーク呼び出しは
/// すべてtokioタスクに逃がし、結果は `UiEvent` でUIループに戻す。
/// 画面遷移で進行中のリクエストはキャンセルせず、結果だけ捨てる。
pub struct TuiApp {
    state: ConsoleState,
    recording: Option<ActiveRecording>,
    api: Arc<ApiClient>,
    relay: Arc<RelayClient>,
    source_name: String,
    overlay_width: u32,
    overlay_height: u32,
    max_duration_seconds: u64,
    running: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<UiEvent>,
    events_rx: mpsc::UnboundedReceiver<UiEvent>,
}

impl TuiApp {
    pub fn new(
        config: &Config,
        api: Arc<ApiClient>,
        relay: Arc<RelayClient>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut state = ConsoleState::new();
        state.obs_address.set_value(&config.obs.address);
        state.obs_password.set_value(&config.obs.password);
        state.obs_scene.set_value(&config.obs.scene_name);

        // デバイス一覧は起動時に取得。失敗してもコンソールは使える
        match recorder::input_devices() {
            Ok(devices) => {
                state.devices = devices;
                if let Some(preferred) = &config.recording.device {
                    state.selected_device =
                        state.devices.iter().position(|name| name == preferred);
                }
                if state.selected_device.is_none() && !state.devices.is_empty() {
                    state.selected_device = Some(0);
                }
            }
            Err(e) => {
                log::error!("入力デバイスの列挙に失敗: {}", e);
                state.set_status_error(format!("入力デバイスの列挙に失敗: {}", e));
            }
        }

        Self {
            state,
            recording: None,
            api,
            relay,
            source_name: config.obs.source_name.clone(),
            overlay_width: config.obs.width,
            overlay_height: config.obs.height,
            max_duration_seconds: config.recording.max_duration_seconds,
            running,
            events_tx,
            events_rx,
        }
    }

    /// TUIを起動
    pub async fn run(&mut self) -> Result<()> {
        // ターミナルを初期化
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // メインループ
        loop {
            // 非同期タスクからのイベントを反映
            while let Ok(event) = self.events_rx.try_recv() {
                self.state.apply_event(event);
            }

            // 録音状態を更新（上限到達の自動停止を含む）
            self.tick_recording();

            // 画面を描画
            terminal.draw(|f| self.draw(f))?;

            // イベントをポーリング（200msごと）
            if event::poll(Duration::from_millis(200))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            // Ctrl+C で終了
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        KeyCode::Char('z') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            // Ctrl+Z でプロセスを一時停止
                            // まずターミナルをリストア
                            disable_raw_mode()?;
                            execute!(io::stdout(), LeaveAlternateScreen)?;

                            // プロセスを一時停止
                            #[cfg(unix)]
                            {
                                use nix::sys::signal::{self, Signal};
                                let _ = signal::raise(Signal::SIGTSTP);
                            }

                            // 再開後にターミナルを再初期化
                            enable_raw_mode()?;
                            execute!(io::stdout(), EnterAlternateScreen)?;
                        }
                        KeyCode::Esc => {
                            // 終了シグナルを設定
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        _ => match self.state.view {
                            View::Login => self.handle_login_key(key.code),
                            View::Console => self.handle_console_key(key.code, key.modifiers),
                        },
                    }
                }
            }

            // running フラグをチェック
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        // 録音が残っていれば閉じる（結果は破棄）
        if let Some(recording) = self.recording.take() {
            let _ = recording.stop();
        }

        // ターミナルをリストア
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    /// 録音の経過・レベル表示を更新し、上限到達なら自動停止する
    fn tick_recording(&mut self) {
        let finished = match &self.recording {
            Some(recording) => {
                self.state.level_db = recording.level_db();
                self.state.recording_elapsed = Some(recording.elapsed_secs());
                recording.is_finished()
            }
            None => {
                self.state.recording_elapsed = None;
                return;
            }
        };

        if finished {
            // 20分上限: オペレータ操作なしでidleに戻す
            self.stop_and_analyze();
        }
    }

    // --- キー処理 -------------------------------------------------------

    fn handle_login_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Tab | KeyCode::Down | KeyCode::Up => {
                self.state.login_focus = self.state.login_focus.next();
            }
            KeyCode::Enter => match self.state.login_focus {
                LoginFocus::Email => self.state.login_focus = LoginFocus::Password,
                LoginFocus::Password => self.submit_login(),
            },
            KeyCode::Backspace => match self.state.login_focus {
                LoginFocus::Email => self.state.email.backspace(),
                LoginFocus::Password => self.state.password.backspace(),
            },
            KeyCode::Char(c) => match self.state.login_focus {
                LoginFocus::Email => self.state.email.push_char(c),
                LoginFocus::Password => self.state.password.push_char(c),
            },
            _ => {}
        }
    }

    fn handle_console_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        if modifiers.contains(KeyModifiers::CONTROL) {
            match code {
                KeyCode::Char('r') => self.start_recording(),
                KeyCode::Char('e') => self.stop_and_analyze(),
                KeyCode::Char('x') => self.reset_result(),
                KeyCode::Char('t') => self.send_sms(),
                KeyCode::Char('o') => self.push_overlay(),
                KeyCode::Char('d') => self.hide_overlay(),
                KeyCode::Char('l') => self.logout(),
                _ => {}
            }
            return;
        }

        match code {
            KeyCode::Tab => {
                self.state.console_focus = self.state.console_focus.next();
            }
            KeyCode::Up => self.state.select_prev_device(),
            KeyCode::Down => self.state.select_next_device(),
            KeyCode::Backspace => self.state.focused_field_mut().backspace(),
            KeyCode::Char(c) => self.state.focused_field_mut().push_char(c),
            _ => {}
        }
    }

    // --- 操作 -----------------------------------------------------------

    fn submit_login(&mut self) {
        if self.state.login_pending {
            return;
        }
        if self.state.email.is_empty() || self.state.password.is_empty() {
            self.state.set_status_error("空欄をすべて入力してください");
            return;
        }

        self.state.login_pending = true;
        self.state.set_status_info("ログインしています...");

        let api = self.api.clone();
        let email = self.state.email.value().to_string();
        let password = self.state.password.value().to_string();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let event = match api.login(&email, &password).await {
                Ok(session) => UiEvent::LoginOk(session),
                Err(e) => UiEvent::LoginFailed(e.to_string()),
            };
            let _ = tx.send(event);
        });
    }

    /// 録音開始
    ///
    /// 同時録音は1つだけ。進行中ならエラー表示して何もしない
    /// （録音層ではなくUI状態で多重開始を防ぐ）。
    fn start_recording(&mut self) {
        if self.recording.is_some() {
            self.state.set_status_error("すでに録音中です");
            return;
        }

        // 新しい録音を始めるので前の結果は消す
        self.state.result = None;

        let device = self.state.selected_device_name().map(String::from);
        match recorder::start_recording(device.as_deref(), self.max_duration_seconds) {
            Ok(recording) => {
                self.recording = Some(recording);
                self.state.recording_elapsed = Some(0);
                self.state.set_status_info("録音中です (Ctrl+E で停止)");
            }
            Err(e) => {
                log::error!("録音開始に失敗: {}", e);
                self.state
                    .set_status_error(format!("オーディオ入力設定を確認してください: {}", e));
            }
        }
    }

    /// 録音を停止して分析APIへ送る
    ///
    /// 停止済みなら何もしない（冪等）。
    fn stop_and_analyze(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        self.state.recording_elapsed = None;
        self.state.level_db = -100.0;

        let wav = match recording.stop() {
            Ok(wav) => wav,
            Err(e) => {
                log::error!("録音の確定に失敗: {}", e);
                self.state.set_status_error(format!("録音の確定に失敗: {}", e));
                return;
            }
        };

        self.state.analyzing = true;
        self.state.set_status_info("分析しています...");

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let file_name = format!("{}.wav", chrono::Utc::now().timestamp_millis());

        tokio::spawn(async move {
            let event = match api.analyze(wav, &file_name).await {
                Ok(result) => UiEvent::AnalysisOk(result),
                Err(e) => UiEvent::AnalysisFailed(e.to_string()),
            };
            let _ = tx.send(event);
        });
    }

    fn reset_result(&mut self) {
        if self.recording.is_some() {
            self.state.set_status_error("録音中はリセットできません");
            return;
        }
        self.state.result = None;
        self.state.set_status_info("結果をリセットしました");
    }

    fn send_sms(&mut self) {
        if self.state.sending_sms {
            return;
        }
        if let Err(message) = self.state.validate_sms() {
            self.state.set_status_error(message);
            return;
        }
        // validate_smsで存在確認済み
        let Some(result) = self.state.result.clone() else {
            return;
        };

        self.state.sending_sms = true;
        self.state.set_status_info("SMSを送信しています...");

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let to = self.state.phone.value().to_string();
        let song = self.state.song.value().to_string();

        tokio::spawn(async move {
            let body = format_sms(&song, &result);
            let event = match api.send_sms(&to, &body).await {
                Ok(_) => UiEvent::SmsSent,
                Err(e) => UiEvent::SmsFailed(e.to_string()),
            };
            let _ = tx.send(event);
        });
    }

    /// 採点結果をオーバーレイに出力
    ///
    /// 接続 → 作成/リフレッシュ → 表示、の3段を順に呼ぶ。
    fn push_overlay(&mut self) {
        if self.state.pushing_overlay {
            return;
        }
        if self.state.obs_address.is_empty() {
            self.state.set_status_error("OBSアドレスを入力してください");
            return;
        }

        self.state.pushing_overlay = true;
        self.state.set_status_info("オーバーレイを出力しています...");

        let relay = self.relay.clone();
        let tx = self.events_tx.clone();
        let address = self.state.obs_address.value().to_string();
        let password = self.state.obs_password.value().to_string();
        let scene = self.state.obs_scene.value().to_string();
        let source_name = self.source_name.clone();
        let width = self.overlay_width;
        let height = self.overlay_height;
        let result = self.state.result.clone();

        tokio::spawn(async move {
            let outcome = async {
                relay.connect(&address, &password, &scene).await?;
                let upsert = relay
                    .upsert_or_refresh(&source_name, width, height, result.as_ref())
                    .await?;
                relay.set_visible(&source_name, true).await?;
                Ok::<bool, anyhow::Error>(upsert.created)
            }
            .await;

            let event = match outcome {
                Ok(created) => UiEvent::OverlayPushed { created },
                Err(e) => UiEvent::OverlayFailed(format!(
                    "OBS接続設定を確認してください: {}",
                    e
                )),
            };
            let _ = tx.send(event);
        });
    }

    fn hide_overlay(&mut self) {
        let relay = self.relay.clone();
        let tx = self.events_tx.clone();
        let source_name = self.source_name.clone();

        tokio::spawn(async move {
            let event = match relay.set_visible(&source_name, false).await {
                Ok(()) => UiEvent::OverlayHidden,
                Err(e) => UiEvent::OverlayFailed(format!(
                    "OBS接続設定を確認してください: {}",
                    e
                )),
            };
            let _ = tx.send(event);
        });
    }

    fn logout(&mut self) {
        let api = self.api.clone();
        tokio::spawn(async move {
            api.logout().await;
        });
        self.state.logout();
    }

    // --- 描画 -----------------------------------------------------------

    fn draw(&self, f: &mut Frame) {
        match self.state.view {
            View::Login => self.draw_login(f),
            View::Console => self.draw_console(f),
        }
    }

    fn draw_login(&self, f: &mut Frame) {
        let block = Block::default()
            .title("AI電話カラオケ 採点ステーション")
            .borders(Borders::ALL);
        let inner = block.inner(f.area());
        f.render_widget(block, f.area());

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // 余白
                Constraint::Length(1), // メール
                Constraint::Length(1), // パスワード
                Constraint::Length(1), // 余白
                Constraint::Length(1), // ヘルプ
                Constraint::Min(0),    // ステータス
            ])
            .split(inner);

        self.draw_input_row(
            f,
            sections[1],
            &self.state.email,
            self.state.login_focus == LoginFocus::Email,
        );
        self.draw_input_row(
            f,
            sections[2],
            &self.state.password,
            self.state.login_focus == LoginFocus::Password,
        );

        let help = if self.state.login_pending {
            "ログインしています..."
        } else {
            "Tab: 項目移動  Enter: ログイン  Esc: 終了"
        };
        f.render_widget(
            Paragraph::new(help).style(Style::default().fg(Color::Gray)),
            sections[4],
        );

        self.draw_status(f, sections[5]);
    }

    fn draw_console(&self, f: &mut Frame) {
        let account = match &self.state.session {
            Some(session) => format!(
                "現在のアカウント: {} ({})",
                session.user_name, session.email
            ),
            None => "未ログイン".to_string(),
        };

        let block = Block::default()
            .title(account)
            .borders(Borders::ALL);
        let inner = block.inner(f.area());
        f.render_widget(block, f.area());

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // デバイス選択
                Constraint::Length(1), // 入力レベル
                Constraint::Length(1), // 電話番号
                Constraint::Length(1), // 曲名
                Constraint::Length(1), // OBSアドレス / パスワード
                Constraint::Length(1), // OBSシーン
                Constraint::Length(1), // 録音状態
                Constraint::Min(7),    // 結果パネル
                Constraint::Length(2), // キーヘルプ
                Constraint::Length(1), // ステータス
            ])
            .split(inner);

        self.draw_device_row(f, sections[0]);
        self.draw_level_bar(f, sections[1]);
        self.draw_input_row(
            f,
            sections[2],
            &self.state.phone,
            self.state.console_focus == ConsoleFocus::Phone,
        );
        self.draw_input_row(
            f,
            sections[3],
            &self.state.song,
            self.state.console_focus == ConsoleFocus::Song,
        );

        let obs_row = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(sections[4]);
        self.draw_input_row(
            f,
            obs_row[0],
            &self.state.obs_address,
            self.state.console_focus == ConsoleFocus::ObsAddress,
        );
        self.draw_input_row(
            f,
            obs_row[1],
            &self.state.obs_password,
            self.state.console_focus == ConsoleFocus::ObsPassword,
        );
        self.draw_input_row(
            f,
            sections[5],
            &self.state.obs_scene,
            self.state.console_focus == ConsoleFocus::ObsScene,
        );

        self.draw_recording_row(f, sections[6]);
        self.draw_result_panel(f, sections[7]);

        let help = Paragraph::new(vec![
            Line::from("Ctrl+R: 録音開始  Ctrl+E: 録音停止  Ctrl+X: リセット  Tab: 項目移動  ↑↓: デバイス選択"),
            Line::from("Ctrl+T: SMS送信  Ctrl+O: 放送画面に出力  Ctrl+D: 出力を隠す  Ctrl+L: ログアウト  Esc: 終了"),
        ])
        .style(Style::default().fg(Color::Gray));
        f.render_widget(help, sections[8]);

        self.draw_status(f, sections[9]);
    }

    fn draw_input_row(&self, f: &mut Frame, area: Rect, field: &InputField, focused: bool) {
        let style = if focused {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        let cursor = if focused { "▌" } else { "" };
        let line = Line::from(vec![
            Span::styled(format!("{}: ", field.label), style),
            Span::raw(field.display()),
            Span::styled(cursor, Style::default().fg(Color::Yellow)),
        ]);
        f.render_widget(Paragraph::new(line), area);
    }

    fn draw_device_row(&self, f: &mut Frame, area: Rect) {
        let device = self
            .state
            .selected_device_name()
            .unwrap_or("(デフォルト入力)");
        let line = Line::from(vec![
            Span::styled(
                "オーディオ入力: ",
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(device),
            Span::styled(
                format!("  [{}台]", self.state.devices.len()),
                Style::default().fg(Color::Gray),
            ),
        ]);
        f.render_widget(Paragraph::new(line), area);
    }

    /// 入力レベルバーを描画
    fn draw_level_bar(&self, f: &mut Frame, area: Rect) {
        let ratio = Self::db_to_ratio(self.state.level_db);
        let label = format!("入力レベル: {:.1} dB", self.state.level_db);

        let gauge = Gauge::default()
            .label(label)
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(ratio);
        f.render_widget(gauge, area);
    }

    fn draw_recording_row(&self, f: &mut Frame, area: Rect) {
        let line = match self.state.recording_elapsed {
            Some(secs) => Line::from(vec![
                Span::styled(
                    "● 録音中 ",
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                ),
                Span::raw(format_elapsed(secs)),
            ]),
            None if self.state.analyzing => Line::from(Span::styled(
                "分析中...",
                Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
            )),
            None => Line::from(Span::styled(
                "待機中 (Ctrl+R で録音開始)",
                Style::default().fg(Color::Gray),
            )),
        };
        f.render_widget(Paragraph::new(line), area);
    }

    fn draw_result_panel(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().title("AI 分析結果").borders(Borders::ALL);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let Some(result) = &self.state.result else {
            f.render_widget(
                Paragraph::new("分析結果はまだありません")
                    .style(Style::default().fg(Color::Gray)),
                inner,
            );
            return;
        };

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // 音程
                Constraint::Length(1), // リズム
                Constraint::Length(1), // 感情
                Constraint::Length(1), // 総合
                Constraint::Min(1),    // 講評
            ])
            .split(inner);

        let score_bar = |label: String, percent: u8| {
            Gauge::default()
                .label(label)
                .gauge_style(Style::default().fg(Color::Green))
                .ratio(f64::from(percent.min(100)) / 100.0)
        };

        f.render_widget(
            score_bar(format!("音程の正確さ: {}%", result.pitch), result.pitch),
            sections[0],
        );
        f.render_widget(
            score_bar(format!("リズムの正確さ: {}%", result.rhythm), result.rhythm),
            sections[1],
        );
        f.render_widget(
            score_bar(
                format!("感情表現: {}", result.emotion_label()),
                result.emotion.saturating_mul(20),
            ),
            sections[2],
        );

        let total_line = Line::from(vec![
            Span::styled("総合評価: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(result.stars(), Style::default().fg(Color::Yellow)),
            Span::raw(format!(" ({}点)", result.total)),
        ]);
        f.render_widget(Paragraph::new(total_line), sections[3]);

        f.render_widget(
            Paragraph::new(format!("講評: \"{}\"", result.content)).wrap(Wrap { trim: false }),
            sections[4],
        );
    }

    fn draw_status(&self, f: &mut Frame, area: Rect) {
        let Some(status) = &self.state.status else {
            return;
        };
        let color = match status.kind {
            StatusKind::Info => Color::Green,
            StatusKind::Error => Color::Red,
        };
        f.render_widget(
            Paragraph::new(status.message.as_str())
                .style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
            area,
        );
    }

    /// dBを0.0〜1.0の比率に変換
    /// -60dB〜0dB を 0.0〜1.0 にマッピング
    fn db_to_ratio(db: f32) -> f64 {
        let min_db = -60.0;
        let max_db = 0.0;
        let clamped = db.clamp(min_db, max_db);
        ((clamped - min_db) / (max_db - min_db)) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_ratio_range() {
        assert_eq!(TuiApp::db_to_ratio(-100.0), 0.0);
        assert_eq!(TuiApp::db_to_ratio(-60.0), 0.0);
        assert_eq!(TuiApp::db_to_ratio(0.0), 1.0);
        let mid = TuiApp::db_to_ratio(-30.0);
        assert!((mid - 0.5).abs() < 1e-6);
    }
}
