use facetrack_core::detector::DEFAULT_DETECTION_CONFIDENCE;
use facetrack_core::types::DEFAULT_THRESHOLD;
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the SCRFD model file.
    pub model_dir: PathBuf,
    /// Gallery root: one subfolder of images per identity.
    pub gallery_dir: PathBuf,
    /// Cosine similarity a match must reach.
    pub similarity_threshold: f32,
    /// Minimum detector score for a face box.
    pub detection_confidence: f32,
    /// Attendance ledger (JSON lines).
    pub ledger_path: PathBuf,
}

impl Config {
    /// Load configuration from `FACETRACK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f32 = |key: &str, default: f32| {
            get(key)
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(default)
        };

        Self {
            model_dir: get("FACETRACK_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facetrack_core::default_model_dir),
            gallery_dir: get("FACETRACK_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("known_faces")),
            similarity_threshold: parse_f32("FACETRACK_THRESHOLD", DEFAULT_THRESHOLD),
            detection_confidence: parse_f32("FACETRACK_DETECTION_CONFIDENCE", DEFAULT_DETECTION_CONFIDENCE),
            ledger_path: get("FACETRACK_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("attendance.jsonl")),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facetrack_core::SCRFD_MODEL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.similarity_threshold, 0.6);
        assert_eq!(config.detection_confidence, 0.5);
        assert_eq!(config.gallery_dir, PathBuf::from("known_faces"));
        assert!(config.scrfd_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("FACETRACK_MODEL_DIR", "/opt/models"),
            ("FACETRACK_THRESHOLD", "0.75"),
            ("FACETRACK_LEDGER_PATH", "/tmp/ledger.jsonl"),
        ]);
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(config.similarity_threshold, 0.75);
        assert_eq!(config.ledger_path, PathBuf::from("/tmp/ledger.jsonl"));
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_with(&[
            ("FACETRACK_THRESHOLD", "high"),
            ("FACETRACK_DETECTION_CONFIDENCE", "NaN"),
        ]);
        assert_eq!(config.similarity_threshold, 0.6);
        assert_eq!(config.detection_confidence, 0.5);
    }
}
