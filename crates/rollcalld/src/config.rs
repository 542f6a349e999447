use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a live face matches an enrolled one.
    pub match_threshold: f32,
    /// Minimum detection confidence for a face box.
    pub detect_confidence: f32,
    /// Capture loop cadence in milliseconds.
    pub tick_ms: u64,
    /// Number of warmup frames to discard at session start (camera AGC/AE
    /// stabilization).
    pub warmup_frames: usize,
    /// Display surface dimensions for overlay coordinates.
    pub display_width: u32,
    pub display_height: u32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path,
            match_threshold: env_f32(
                "ROLLCALL_MATCH_THRESHOLD",
                rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD,
            ),
            detect_confidence: env_f32("ROLLCALL_DETECT_CONFIDENCE", 0.5),
            tick_ms: env_u64("ROLLCALL_TICK_MS", 100),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            display_width: env_u64("ROLLCALL_DISPLAY_WIDTH", 1280) as u32,
            display_height: env_u64("ROLLCALL_DISPLAY_HEIGHT", 720) as u32,
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("yolov8n-face.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the descriptor encoder model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
