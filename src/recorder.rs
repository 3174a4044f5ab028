use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use regex_lite::Regex;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// 無音とみなす下限レベル (dB)
const SILENCE_FLOOR_DB: f32 = -100.0;

/// 録音の共有状態
///
/// cpalのコールバックスレッドとコンソール側の両方から触る部分。
/// サンプルの蓄積・上限打ち切り・リアルタイムレベルを保持する。
pub struct RecordingShared {
    /// 蓄積したモノラルPCMサンプル
    samples: Mutex<Vec<i16>>,

    /// 蓄積上限（サンプル数）。到達したら自動停止
    max_samples: usize,

    /// 上限到達フラグ
    finished: AtomicBool,

    /// 直近ブロックのRMSレベル (dB)
    level_db: Mutex<f32>,
}

impl RecordingShared {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            max_samples,
            finished: AtomicBool::new(false),
            level_db: Mutex::new(SILENCE_FLOOR_DB),
        }
    }

    /// モノラルサンプルのブロックを追加
    ///
    /// 上限到達後のブロックは破棄する。上限ちょうどまでは取り込み、
    /// 到達した時点でfinishedを立てる。
    pub fn push_block(&self, block: &[i16]) {
        self.set_level_db(Self::block_level_db(block));

        if self.finished.load(Ordering::SeqCst) {
            return;
        }

        let mut samples = self.samples.lock().unwrap();
        let remaining = self.max_samples.saturating_sub(samples.len());
        let take = remaining.min(block.len());
        samples.extend_from_slice(&block[..take]);

        if samples.len() >= self.max_samples {
            self.finished.store(true, Ordering::SeqCst);
            log::info!("録音が上限に達したため自動停止します");
        }
    }

    /// 上限に到達したか
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// 直近のレベル (dB) を取得
    pub fn level_db(&self) -> f32 {
        *self.level_db.lock().unwrap()
    }

    fn set_level_db(&self, db: f32) {
        *self.level_db.lock().unwrap() = db;
    }

    /// 蓄積済みサンプル数
    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// 蓄積したサンプルを取り出す
    fn take_samples(&self) -> Vec<i16> {
        std::mem::take(&mut *self.samples.lock().unwrap())
    }

    /// ブロックのRMSレベルをdBで計算
    ///
    /// 各サンプルを正規化してRMSを取り、`20 * log10(rms)` に変換する。
    /// 無音は下限の-100dBに丸める。
    fn block_level_db(block: &[i16]) -> f32 {
        if block.is_empty() {
            return SILENCE_FLOOR_DB;
        }
        let sum_sq: f32 = block
            .iter()
            .map(|&s| {
                let f = s as f32 / i16::MAX as f32;
                f * f
            })
            .sum();
        let rms = (sum_sq / block.len() as f32).sqrt();
        if rms <= 0.0 {
            SILENCE_FLOOR_DB
        } else {
            (20.0 * rms.log10()).max(SILENCE_FLOOR_DB)
        }
    }
}

/// 進行中の録音
///
/// `stop` でストリームを閉じてWAVに確定する。上限で自動停止した後に
/// `stop` を呼んでも単に確定処理になるだけで副作用はない（冪等）。
///
/// 状態遷移は `idle -> recording -> idle`。recordingは同時に1つだけで、
/// 多重開始はコンソール側の状態で防ぐ。
pub struct ActiveRecording {
    stream: Option<cpal::Stream>,
    shared: Arc<RecordingShared>,
    sample_rate: u32,
    started_at: Instant,
}

impl ActiveRecording {
    /// 録音開始からの経過秒数
    pub fn elapsed_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// 直近の入力レベル (dB)（振幅ビジュアライザ用）
    pub fn level_db(&self) -> f32 {
        self.shared.level_db()
    }

    /// 上限到達で自動停止したか
    ///
    /// コンソールはこれを監視してidle状態に戻す。
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// 録音を停止してWAVデータに確定
    pub fn stop(mut self) -> Result<Vec<u8>> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        let samples = self.shared.take_samples();
        log::info!(
            "録音を停止しました: {} サンプル ({:.1}秒)",
            samples.len(),
            samples.len() as f64 / self.sample_rate as f64
        );
        encode_wav(&samples, self.sample_rate)
    }
}

/// PCMサンプルをWAVフォーマットに変換
///
/// モノラル16bitとしてメモリ上にエンコードする。
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("WAVライター作成失敗")?;

        for &sample in samples {
            writer.write_sample(sample).context("WAV書き込み失敗")?;
        }

        writer.finalize().context("WAV finalize失敗")?;
    }

    Ok(cursor.into_inner())
}

/// 利用可能な入力デバイス名の一覧を取得
///
/// プラットフォームの "default" 擬似デバイスなど、選択肢として
/// 意味のないデバイスは除外する。
pub fn input_devices() -> Result<Vec<String>> {
    let mut names = Vec::new();
    for device in capture_devices()? {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

/// デバイス一覧を表示（`--show-devices` 用）
pub fn list_devices() -> Result<()> {
    println!("利用可能な入力デバイス:");
    println!();

    for (idx, device) in capture_devices()?.into_iter().enumerate() {
        let name = device.name()?;
        println!("  [{}] {}", idx, name);

        if let Ok(configs) = device.supported_input_configs() {
            configs.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
        }
        println!();
    }

    Ok(())
}

/// 擬似デバイスを除外した入力デバイス一覧
fn capture_devices() -> Result<Vec<cpal::Device>> {
    let host = cpal::default_host();
    let excluded = Regex::new("^default$|^sysdefault|^null$|Monitor of").unwrap();
    let devices = host
        .input_devices()
        .context("入力デバイスの列挙に失敗")?
        .filter(|device| match device.name() {
            Ok(name) => !excluded.is_match(&name),
            Err(_) => true,
        })
        .collect();
    Ok(devices)
}

/// 録音を開始
///
/// 指定デバイス（未指定ならデフォルト入力）でキャプチャを開始し、
/// マルチチャンネル入力はモノラルにダウンミックスして蓄積する。
///
/// # Arguments
///
/// * `device_name` - 入力デバイス名（`input_devices` の返す名前）
/// * `max_duration_seconds` - 自動停止までの上限秒数
pub fn start_recording(
    device_name: Option<&str>,
    max_duration_seconds: u64,
) -> Result<ActiveRecording> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => capture_devices()?
            .into_iter()
            .find(|d| d.name().ok().as_deref() == Some(name))
            .with_context(|| format!("デバイスが見つかりません: {}", name))?,
        None => host
            .default_input_device()
            .context("デフォルト入力デバイスが見つかりません")?,
    };

    log::info!("入力デバイス: {:?}", device.name());

    let default_config = device
        .default_input_config()
        .context("デフォルト入力設定が取得できません")?;
    let sample_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    let stream_config: cpal::StreamConfig = default_config.clone().into();

    log::info!(
        "デバイス設定: {:?}, {}Hz, {}ch",
        default_config.sample_format(),
        sample_rate,
        channels
    );

    let max_samples = (sample_rate as u64 * max_duration_seconds) as usize;
    let shared = Arc::new(RecordingShared::new(max_samples));

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, channels, shared.clone())?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, channels, shared.clone())?
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, channels, shared.clone())?
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(&device, &stream_config, channels, shared.clone())?
        }
        _ => anyhow::bail!("サポートされていないサンプルフォーマット"),
    };

    stream.play().context("ストリームの再生開始に失敗")?;
    log::info!("録音を開始しました");

    Ok(ActiveRecording {
        stream: Some(stream),
        shared,
        sample_rate,
        started_at: Instant::now(),
    })
}

/// 入力ストリームを構築
///
/// インターリーブされたフレームをチャンネル平均でモノラル化し、
/// 共有バッファへ送る。
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    shared: Arc<RecordingShared>,
) -> Result<cpal::Stream>
where
    T: SizedSample + Sample + Send + 'static,
    <T as Sample>::Float: Into<f32>,
{
    let channels = channels.max(1) as usize;

    let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
        let frames = data.len() / channels;
        let mut block = Vec::with_capacity(frames);

        for frame in 0..frames {
            let mut acc = 0.0f32;
            for ch in 0..channels {
                let sample = data[frame * channels + ch];
                let f: f32 = sample.to_float_sample().into();
                acc += f;
            }
            let mono = (acc / channels as f32).clamp(-1.0, 1.0);
            block.push((mono * i16::MAX as f32) as i16);
        }

        shared.push_block(&block);
    };

    let error_callback = move |err| {
        log::error!("ストリームエラー: {}", err);
    };

    let stream = device
        .build_input_stream(config, data_callback, error_callback, None)
        .context("入力ストリームの構築に失敗")?;

    Ok(stream)
}
