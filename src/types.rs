use serde::{Deserialize, Serialize};

/// 感情表現の5段階評価ラベル
///
/// `AnalysisResult::emotion` (1〜5) に対応する表示テキスト。
pub const EMOTION_TEXTS: [&str; 5] = [
    "もう一歩",
    "やや物足りない",
    "普通",
    "良い",
    "とても良い",
];

/// AI採点結果
///
/// リモート分析APIが返す採点内訳。クライアント側では受信後は
/// 不変として扱い、次の録音またはリセットで丸ごと置き換える。
///
/// # JSON例
///
/// ```json
/// {
///   "pitch": 87,
///   "rhythm": 92,
///   "emotion": 4,
///   "total": 88,
///   "content": "サビの伸びがとても良いです"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 音程の正確さ (0〜100)
    pub pitch: u8,

    /// リズムの正確さ (0〜100)
    pub rhythm: u8,

    /// 感情表現 (1〜5)
    pub emotion: u8,

    /// 総合点 (0〜100)
    pub total: u8,

    /// 講評（自由テキスト）
    pub content: String,
}

impl AnalysisResult {
    /// 総合点を星の数 (1〜5) に変換
    ///
    /// 20点ごとに星1つ。0〜19点でも星1つは付く。
    ///
    /// # Examples
    ///
    /// ```
    /// # use karaoke_station::types::AnalysisResult;
    /// assert_eq!(AnalysisResult::star_rating(0), 1);
    /// assert_eq!(AnalysisResult::star_rating(59), 3);
    /// assert_eq!(AnalysisResult::star_rating(100), 5);
    /// ```
    pub fn star_rating(total: u8) -> usize {
        ((total as usize) / 20 + 1).min(5)
    }

    /// 総合点を「★★★」形式の文字列にする
    pub fn stars(&self) -> String {
        "★".repeat(Self::star_rating(self.total))
    }

    /// 感情表現のラベルを取得
    ///
    /// 1〜5以外の値（プレースホルダの0など）は空文字を返す。
    pub fn emotion_label(&self) -> &'static str {
        match self.emotion {
            1..=5 => EMOTION_TEXTS[(self.emotion - 1) as usize],
            _ => "",
        }
    }

    /// オーバーレイ用のゼロ埋めプレースホルダ
    ///
    /// 結果キャッシュが空のときにオーバーレイページへ渡す値。
    pub fn placeholder() -> Self {
        Self {
            pitch: 0,
            rhythm: 0,
            emotion: 0,
            total: 0,
            content: String::new(),
        }
    }
}

/// ログイン済みオペレータのセッション
///
/// Bearerトークンと表示用の身元情報。プロセスメモリ上にのみ保持し、
/// ログアウトまたはプロセス終了で破棄する。永続化はしない。
#[derive(Clone, Debug, Deserialize)]
pub struct Session {
    /// Bearerトークン
    pub token: String,

    /// メールアドレス
    pub email: String,

    /// 表示名
    #[serde(rename = "userName")]
    pub user_name: String,
}

/// SMS本文を組み立てる
///
/// 曲名と採点結果から参加者へ送る本文を生成する。
/// 行構成: 曲名 / 音程% / リズム% / 感情ラベル / ★総合 / 講評。
///
/// # Examples
///
/// ```
/// # use karaoke_station::types::{format_sms, AnalysisResult};
/// let result = AnalysisResult {
///     pitch: 80, rhythm: 90, emotion: 5, total: 85,
///     content: "素晴らしい歌声でした".to_string(),
/// };
/// let body = format_sms("糸", &result);
/// assert!(body.contains("歌った曲: 糸"));
/// assert!(body.contains("★★★★★"));
/// ```
pub fn format_sms(song_title: &str, result: &AnalysisResult) -> String {
    format!(
        "歌った曲: {}\n音程の正確さ: {}%\nリズムの正確さ: {}%\n感情表現: {}\n総合評価: {}\n講評: {}",
        song_title,
        result.pitch,
        result.rhythm,
        result.emotion_label(),
        result.stars(),
        result.content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            pitch: 87,
            rhythm: 92,
            emotion: 4,
            total: 88,
            content: "サビの伸びがとても良いです".to_string(),
        }
    }

    #[test]
    fn test_star_rating_boundaries() {
        assert_eq!(AnalysisResult::star_rating(0), 1);
        assert_eq!(AnalysisResult::star_rating(19), 1);
        assert_eq!(AnalysisResult::star_rating(20), 2);
        assert_eq!(AnalysisResult::star_rating(79), 4);
        assert_eq!(AnalysisResult::star_rating(80), 5);
        // 100点でも星5を超えない
        assert_eq!(AnalysisResult::star_rating(100), 5);
    }

    #[test]
    fn test_stars_repeat() {
        let result = sample_result();
        assert_eq!(result.stars(), "★★★★★");
    }

    #[test]
    fn test_emotion_label() {
        let mut result = sample_result();
        assert_eq!(result.emotion_label(), "良い");
        result.emotion = 1;
        assert_eq!(result.emotion_label(), "もう一歩");
        // プレースホルダの0は空文字
        result.emotion = 0;
        assert_eq!(result.emotion_label(), "");
        result.emotion = 6;
        assert_eq!(result.emotion_label(), "");
    }

    #[test]
    fn test_placeholder_is_zeroed() {
        let p = AnalysisResult::placeholder();
        assert_eq!(p.pitch, 0);
        assert_eq!(p.rhythm, 0);
        assert_eq!(p.emotion, 0);
        assert_eq!(p.total, 0);
        assert!(p.content.is_empty());
    }

    #[test]
    fn test_analysis_result_json_round_trip() {
        let result = sample_result();
        let json = serde_json::to_string(&result).unwrap();
        let parsed: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_session_deserializes_user_name() {
        let json = r#"{"token":"abc123","email":"op@example.com","userName":"オペレータ"}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.token, "abc123");
        assert_eq!(session.email, "op@example.com");
        assert_eq!(session.user_name, "オペレータ");
    }

    #[test]
    fn test_format_sms_contains_all_sections() {
        let result = sample_result();
        let body = format_sms("糸", &result);
        assert!(body.contains("歌った曲: 糸"));
        assert!(body.contains("音程の正確さ: 87%"));
        assert!(body.contains("リズムの正確さ: 92%"));
        assert!(body.contains("感情表現: 良い"));
        assert!(body.contains("総合評価: ★★★★★"));
        assert!(body.contains("講評: サビの伸びがとても良いです"));
    }
}
