use crate::types::{AnalysisResult, Session};

/// 画面の種類
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// ログイン画面
    Login,
    /// オペレータコンソール
    Console,
}

/// テキスト入力フィールド
///
/// TUI上の1行入力。パスワード用のマスク表示に対応する。
#[derive(Clone, Debug)]
pub struct InputField {
    pub label: &'static str,
    value: String,
    pub masked: bool,
}

impl InputField {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            value: String::new(),
            masked: false,
        }
    }

    pub fn masked(label: &'static str) -> Self {
        Self {
            label,
            value: String::new(),
            masked: true,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: &str) {
        self.value = value.to_string();
    }

    pub fn push_char(&mut self, c: char) {
        self.value.push(c);
    }

    pub fn backspace(&mut self) {
        self.value.pop();
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// 表示用文字列（マスク時は文字数分の「•」）
    pub fn display(&self) -> String {
        if self.masked {
            "•".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }
}

/// ログイン画面のフォーカス位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginFocus {
    Email,
    Password,
}

impl LoginFocus {
    pub fn next(self) -> Self {
        match self {
            LoginFocus::Email => LoginFocus::Password,
            LoginFocus::Password => LoginFocus::Email,
        }
    }
}

/// コンソール画面のフォーカス位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleFocus {
    Phone,
    Song,
    ObsAddress,
    ObsPassword,
    ObsScene,
}

impl ConsoleFocus {
    pub fn next(self) -> Self {
        match self {
            ConsoleFocus::Phone => ConsoleFocus::Song,
            ConsoleFocus::Song => ConsoleFocus::ObsAddress,
            ConsoleFocus::ObsAddress => ConsoleFocus::ObsPassword,
            ConsoleFocus::ObsPassword => ConsoleFocus::ObsScene,
            ConsoleFocus::ObsScene => ConsoleFocus::Phone,
        }
    }
}

/// ステータス行の種別
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

/// ステータス行
///
/// すべてのエラーはここに表示してコンソールを使い続けられるようにする
/// （どのエラーもプロセスを落とさない）。
#[derive(Clone, Debug)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub message: String,
}

/// 非同期タスクからコンソールへ返すイベント
///
/// ネットワーク呼び出しはtokioタスクで行い、結果だけを
/// mpsc経由でUIスレッドへ戻す。
#[derive(Debug)]
pub enum UiEvent {
    LoginOk(Session),
    LoginFailed(String),
    AnalysisOk(AnalysisResult),
    AnalysisFailed(String),
    SmsSent,
    SmsFailed(String),
    OverlayPushed { created: bool },
    OverlayHidden,
    OverlayFailed(String),
}

/// コンソール全体の状態
///
/// 描画とキー処理が読むデータを1か所に集める。録音ハンドルは
/// cpalストリームを含むためここには置かず、TUI側が別に持つ。
pub struct ConsoleState {
    pub view: View,

    // ログイン画面
    pub email: InputField,
    pub password: InputField,
    pub login_focus: LoginFocus,
    pub login_pending: bool,

    // セッション（表示用）
    pub session: Option<Session>,

    // 入力デバイス
    pub devices: Vec<String>,
    pub selected_device: Option<usize>,

    // 参加者情報
    pub phone: InputField,
    pub song: InputField,

    // OBS接続設定
    pub obs_address: InputField,
    pub obs_password: InputField,
    pub obs_scene: InputField,

    pub console_focus: ConsoleFocus,

    // 採点結果と進行中フラグ
    pub result: Option<AnalysisResult>,
    pub analyzing: bool,
    pub sending_sms: bool,
    pub pushing_overlay: bool,

    pub status: Option<StatusLine>,

    // 録音表示
    pub level_db: f32,
    pub recording_elapsed: Option<u64>,
}

impl ConsoleState {
    pub fn new() -> Self {
        Self {
            view: View::Login,
            email: InputField::new("メールアドレス"),
            password: InputField::masked("パスワード"),
            login_focus: LoginFocus::Email,
            login_pending: false,
            session: None,
            devices: Vec::new(),
            selected_device: None,
            phone: InputField::new("参加者の電話番号"),
            song: InputField::new("歌う曲"),
            obs_address: InputField::new("OBSアドレス"),
            obs_password: InputField::masked("OBSパスワード"),
            obs_scene: InputField::new("出力シーン名"),
            console_focus: ConsoleFocus::Phone,
            result: None,
            analyzing: false,
            sending_sms: false,
            pushing_overlay: false,
            status: None,
            level_db: -100.0,
            recording_elapsed: None,
        }
    }

    /// 録音中かどうか（UI状態としての判定）
    pub fn is_recording(&self) -> bool {
        self.recording_elapsed.is_some()
    }

    pub fn set_status_info(&mut self, message: impl Into<String>) {
        self.status = Some(StatusLine {
            kind: StatusKind::Info,
            message: message.into(),
        });
    }

    pub fn set_status_error(&mut self, message: impl Into<String>) {
        self.status = Some(StatusLine {
            kind: StatusKind::Error,
            message: message.into(),
        });
    }

    /// フォーカス中のコンソール入力フィールドを取得
    pub fn focused_field_mut(&mut self) -> &mut InputField {
        match self.console_focus {
            ConsoleFocus::Phone => &mut self.phone,
            ConsoleFocus::Song => &mut self.song,
            ConsoleFocus::ObsAddress => &mut self.obs_address,
            ConsoleFocus::ObsPassword => &mut self.obs_password,
            ConsoleFocus::ObsScene => &mut self.obs_scene,
        }
    }

    /// デバイス選択を1つ進める（末尾で先頭に戻る）
    pub fn select_next_device(&mut self) {
        if self.devices.is_empty() {
            self.selected_device = None;
            return;
        }
        self.selected_device = Some(match self.selected_device {
            Some(i) => (i + 1) % self.devices.len(),
            None => 0,
        });
    }

    /// デバイス選択を1つ戻す（先頭で末尾に戻る）
    pub fn select_prev_device(&mut self) {
        if self.devices.is_empty() {
            self.selected_device = None;
            return;
        }
        self.selected_device = Some(match self.selected_device {
            Some(0) | None => self.devices.len() - 1,
            Some(i) => i - 1,
        });
    }

    /// 選択中のデバイス名
    pub fn selected_device_name(&self) -> Option<&str> {
        self.selected_device
            .and_then(|i| self.devices.get(i))
            .map(String::as_str)
    }

    /// SMS送信前の入力検証
    ///
    /// 電話番号・曲名・採点結果がそろっていることを確認する。
    pub fn validate_sms(&self) -> Result<(), String> {
        if self.phone.is_empty() || self.song.is_empty() {
            return Err("参加者の電話番号と曲名を入力してください".to_string());
        }
        if self.result.is_none() {
            return Err("送信する分析結果がありません".to_string());
        }
        Ok(())
    }

    /// 非同期タスクからのイベントを状態に反映
    pub fn apply_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::LoginOk(session) => {
                self.login_pending = false;
                self.set_status_info(format!(
                    "ログインしました: {} ({})",
                    session.user_name, session.email
                ));
                self.session = Some(session);
                self.view = View::Console;
                self.password.set_value("");
            }
            UiEvent::LoginFailed(message) => {
                self.login_pending = false;
                self.set_status_error(message);
            }
            UiEvent::AnalysisOk(result) => {
                self.analyzing = false;
                self.set_status_info(format!("分析が完了しました (総合 {}点)", result.total));
                self.result = Some(result);
            }
            UiEvent::AnalysisFailed(message) => {
                self.analyzing = false;
                self.set_status_error(message);
            }
            UiEvent::SmsSent => {
                self.sending_sms = false;
                self.set_status_info("SMSを送信しました");
            }
            UiEvent::SmsFailed(message) => {
                self.sending_sms = false;
                self.set_status_error(message);
            }
            UiEvent::OverlayPushed { created } => {
                self.pushing_overlay = false;
                if created {
                    self.set_status_info("オーバーレイを作成して表示しました");
                } else {
                    self.set_status_info("オーバーレイを更新して表示しました");
                }
            }
            UiEvent::OverlayHidden => {
                self.pushing_overlay = false;
                self.set_status_info("オーバーレイを非表示にしました");
            }
            UiEvent::OverlayFailed(message) => {
                self.pushing_overlay = false;
                self.set_status_error(message);
            }
        }
    }

    /// ログアウトしてログイン画面に戻る
    ///
    /// セッションと採点結果は破棄する。進行中のリクエストは
    /// キャンセルせず、結果が返ってきても捨てるだけにする。
    pub fn logout(&mut self) {
        self.session = None;
        self.result = None;
        self.view = View::Login;
        self.password.set_value("");
        self.set_status_info("ログアウトしました");
    }
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new()
    }
}

/// 経過秒数を「MM:SS」形式にする
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        serde_json::from_str(
            r#"{"token":"t","email":"op@example.com","userName":"オペレータ"}"#,
        )
        .unwrap()
    }

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            pitch: 80,
            rhythm: 90,
            emotion: 4,
            total: 85,
            content: "良い".to_string(),
        }
    }

    #[test]
    fn test_input_field_editing() {
        let mut field = InputField::new("テスト");
        assert!(field.is_empty());

        field.push_char('a');
        field.push_char('b');
        assert_eq!(field.value(), "ab");

        field.backspace();
        assert_eq!(field.value(), "a");

        // 空でのbackspaceは何も起きない
        field.backspace();
        field.backspace();
        assert!(field.is_empty());
    }

    #[test]
    fn test_masked_field_display() {
        let mut field = InputField::masked("パスワード");
        field.set_value("秘密123");
        assert_eq!(field.display(), "•••••");
        assert_eq!(field.value(), "秘密123");
    }

    #[test]
    fn test_login_focus_cycle() {
        assert_eq!(LoginFocus::Email.next(), LoginFocus::Password);
        assert_eq!(LoginFocus::Password.next(), LoginFocus::Email);
    }

    #[test]
    fn test_console_focus_cycle_wraps() {
        let mut focus = ConsoleFocus::Phone;
        for _ in 0..5 {
            focus = focus.next();
        }
        assert_eq!(focus, ConsoleFocus::Phone);
    }

    #[test]
    fn test_device_selection_wraps() {
        let mut state = ConsoleState::new();
        state.devices = vec!["A".into(), "B".into(), "C".into()];

        state.select_next_device();
        assert_eq!(state.selected_device_name(), Some("A"));
        state.select_next_device();
        state.select_next_device();
        assert_eq!(state.selected_device_name(), Some("C"));
        state.select_next_device();
        assert_eq!(state.selected_device_name(), Some("A"));

        state.select_prev_device();
        assert_eq!(state.selected_device_name(), Some("C"));
    }

    #[test]
    fn test_device_selection_empty_list() {
        let mut state = ConsoleState::new();
        state.select_next_device();
        assert!(state.selected_device_name().is_none());
    }

    #[test]
    fn test_login_ok_switches_view_and_clears_password() {
        let mut state = ConsoleState::new();
        state.password.set_value("secret");
        state.login_pending = true;

        state.apply_event(UiEvent::LoginOk(sample_session()));

        assert_eq!(state.view, View::Console);
        assert!(!state.login_pending);
        assert!(state.password.is_empty());
        assert_eq!(state.session.as_ref().unwrap().email, "op@example.com");
        assert_eq!(state.status.as_ref().unwrap().kind, StatusKind::Info);
    }

    #[test]
    fn test_login_failed_stays_on_login_view() {
        let mut state = ConsoleState::new();
        state.login_pending = true;

        state.apply_event(UiEvent::LoginFailed("認証に失敗".to_string()));

        assert_eq!(state.view, View::Login);
        assert!(!state.login_pending);
        assert_eq!(state.status.as_ref().unwrap().kind, StatusKind::Error);
    }

    #[test]
    fn test_analysis_result_applied() {
        let mut state = ConsoleState::new();
        state.analyzing = true;

        state.apply_event(UiEvent::AnalysisOk(sample_result()));

        assert!(!state.analyzing);
        assert_eq!(state.result.as_ref().unwrap().total, 85);
    }

    #[test]
    fn test_analysis_failure_keeps_console_usable() {
        let mut state = ConsoleState::new();
        state.analyzing = true;

        state.apply_event(UiEvent::AnalysisFailed("通信エラー".to_string()));

        assert!(!state.analyzing);
        assert!(state.result.is_none());
        assert_eq!(state.status.as_ref().unwrap().kind, StatusKind::Error);
    }

    #[test]
    fn test_validate_sms() {
        let mut state = ConsoleState::new();
        assert!(state.validate_sms().is_err());

        state.phone.set_value("010-1234-5678");
        state.song.set_value("糸");
        // 結果がまだない
        assert!(state.validate_sms().is_err());

        state.result = Some(sample_result());
        assert!(state.validate_sms().is_ok());
    }

    #[test]
    fn test_logout_clears_session_and_result() {
        let mut state = ConsoleState::new();
        state.apply_event(UiEvent::LoginOk(sample_session()));
        state.result = Some(sample_result());

        state.logout();

        assert_eq!(state.view, View::Login);
        assert!(state.session.is_none());
        assert!(state.result.is_none());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(1200), "20:00");
    }
}
