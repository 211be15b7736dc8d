//! Tesseract CLI recognizer

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use dropwatch_domain::{Recognition, RecognitionError, TextRecognizer};

use super::{CommandError, run_command};

const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Word rows in TSV output have level 5
const WORD_LEVEL: &str = "5";

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub command: String,
    pub language: String,
    /// Page segmentation mode; 6 treats the image as one uniform block
    pub psm: u8,
    pub whitelist: String,
    pub timeout: Duration,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
            language: "eng".to_string(),
            psm: 6,
            whitelist: ALPHANUMERIC.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Recognizer shelling out to `tesseract ... tsv`
pub struct TesseractRecognizer {
    config: TesseractConfig,
}

impl TesseractRecognizer {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    fn args(&self, image: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![image.into(), "stdout".into()];
        args.extend(
            [
                "--psm".to_string(),
                self.config.psm.to_string(),
                "-l".to_string(),
                self.config.language.clone(),
                "-c".to_string(),
                format!("tessedit_char_whitelist={}", self.config.whitelist),
                "tsv".to_string(),
            ]
            .map(OsString::from),
        );
        args
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &Path) -> Result<Recognition, RecognitionError> {
        let stdout = run_command(&self.config.command, &self.args(image), self.config.timeout)
            .await
            .map_err(|e| match e {
                CommandError::Timeout { .. } => RecognitionError::Timeout,
                other => RecognitionError::Engine(other.to_string()),
            })?;

        let recognition = parse_tsv(&stdout)?;
        tracing::trace!(
            image = %image.display(),
            confidence = recognition.confidence,
            chars = recognition.text.len(),
            "Recognized image"
        );
        Ok(recognition)
    }
}

/// Turn TSV output into line-joined text and the mean word confidence
fn parse_tsv(tsv: &str) -> Result<Recognition, RecognitionError> {
    let mut lines = tsv.lines();
    match lines.next() {
        Some(header) if header.starts_with("level") => {}
        _ => {
            return Err(RecognitionError::InvalidOutput(
                "missing TSV header".to_string(),
            ));
        }
    }

    let mut text = String::new();
    let mut current_line: Option<(&str, &str, &str)> = None;
    let mut confidence_sum = 0.0_f32;
    let mut words = 0_u32;

    for row in lines {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        let Ok(conf) = cols[10].parse::<f32>() else {
            continue;
        };
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        let line_key = (cols[2], cols[3], cols[4]);
        match current_line {
            Some(previous) if previous == line_key => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(line_key);
        text.push_str(word);

        confidence_sum += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        confidence_sum / words as f32
    };
    Ok(Recognition { text, confidence })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn test_parse_tsv_joins_words_and_lines() {
        let output = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t10\t300\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t100\t30\t90.5\tUSE",
            "5\t1\t1\t1\t1\t2\t120\t10\t100\t30\t80.5\tCODE",
            "5\t1\t1\t1\t2\t1\t10\t50\t200\t30\t95\tstakecomabc123",
        ]);

        let recognition = parse_tsv(&output).unwrap();

        assert_eq!(recognition.text, "USE CODE\nstakecomabc123");
        assert!((recognition.confidence - 88.666_67).abs() < 0.01);
    }

    #[test]
    fn test_parse_tsv_without_words_has_zero_confidence() {
        let output = tsv(&["1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t"]);

        let recognition = parse_tsv(&output).unwrap();

        assert_eq!(recognition.text, "");
        assert_eq!(recognition.confidence, 0.0);
    }

    #[test]
    fn test_parse_tsv_rejects_non_tsv_output() {
        assert!(matches!(
            parse_tsv("Error opening data file"),
            Err(RecognitionError::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_args_restrict_charset_and_segmentation() {
        let recognizer = TesseractRecognizer::new(TesseractConfig::default());
        let args: Vec<String> = recognizer
            .args(Path::new("/tmp/frame.png"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..4], ["/tmp/frame.png", "stdout", "--psm", "6"]);
        assert!(args.contains(&format!("tessedit_char_whitelist={}", ALPHANUMERIC)));
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_engine_is_engine_error() {
        let recognizer = TesseractRecognizer::new(TesseractConfig {
            command: "dropwatch-missing-tesseract".to_string(),
            ..Default::default()
        });

        let result = recognizer.recognize(Path::new("/tmp/none.png")).await;

        assert!(matches!(result, Err(RecognitionError::Engine(_))));
    }
}
