//! The declarative feature specification language (§4.4): one line per
//! block, naming a feature kind, a channel binding (or `.` for
//! individual-level), and `key=value` arguments.

use luna_core::error::LunaError;
use std::collections::HashMap;

/// One of the feature kinds a spec line may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    LogPsd,
    RelPsd,
    CvPsd,
    Bands,
    RBands,
    VBands,
    Slope,
    Skew,
    Kurtosis,
    Mean,
    Fd,
    Hjorth,
    Pe,
    Covar,
    Smooth,
    Denoise,
    Norm,
    Svd,
    EpochOutlier,
}

impl FeatureKind {
    fn parse(tok: &str) -> Result<Self, LunaError> {
        Ok(match tok.to_ascii_uppercase().as_str() {
            "LOGPSD" => Self::LogPsd,
            "RELPSD" => Self::RelPsd,
            "CVPSD" => Self::CvPsd,
            "BANDS" => Self::Bands,
            "RBANDS" => Self::RBands,
            "VBANDS" => Self::VBands,
            "SLOPE" => Self::Slope,
            "SKEW" => Self::Skew,
            "KURTOSIS" => Self::Kurtosis,
            "MEAN" => Self::Mean,
            "FD" => Self::Fd,
            "HJORTH" => Self::Hjorth,
            "PE" => Self::Pe,
            "COVAR" => Self::Covar,
            "SMOOTH" => Self::Smooth,
            "DENOISE" => Self::Denoise,
            "NORM" => Self::Norm,
            "SVD" => Self::Svd,
            "EPOCH_OUTLIER" => Self::EpochOutlier,
            other => {
                return Err(LunaError::malformed(
                    "feature kind",
                    format!("unrecognized kind '{other}'"),
                ))
            }
        })
    }

    /// `true` for the level-2 kinds, which run after every level-1 block has
    /// produced its columns.
    #[must_use]
    pub fn is_level2(self) -> bool {
        matches!(
            self,
            Self::Smooth | Self::Denoise | Self::Norm | Self::Svd | Self::EpochOutlier
        )
    }
}

/// One parsed spec line.
#[derive(Clone, Debug)]
pub struct FeatureLine {
    pub block: String,
    pub kind: FeatureKind,
    /// `None` means individual-level (`.` channel binding).
    pub channel: Option<String>,
    pub args: HashMap<String, String>,
}

impl FeatureLine {
    #[must_use]
    pub fn arg_f64(&self, key: &str) -> Option<f64> {
        self.args.get(key).and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn arg_usize(&self, key: &str) -> Option<usize> {
        self.args.get(key).and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn arg_str<'a>(&'a self, key: &str) -> Option<&'a str> {
        self.args.get(key).map(String::as_str)
    }
}

/// Parse the full specification document, one [`FeatureLine`] per non-blank,
/// non-comment line.
///
/// Grammar: `block kind sig=<channel|.> [key=value ...]`.
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] if a line has fewer than two
/// tokens or names an unrecognized kind.
pub fn parse_spec(text: &str) -> Result<Vec<FeatureLine>, LunaError> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let block = tokens
            .next()
            .ok_or_else(|| LunaError::malformed("feature spec line", "missing block name"))?
            .to_string();
        let kind_tok = tokens
            .next()
            .ok_or_else(|| LunaError::malformed("feature spec line", "missing kind"))?;
        let kind = FeatureKind::parse(kind_tok)?;

        let mut args = HashMap::new();
        for tok in tokens {
            if let Some((k, v)) = tok.split_once('=') {
                args.insert(k.to_string(), v.to_string());
            }
        }
        let channel = match args.remove("sig") {
            Some(s) if s == "." => None,
            Some(s) => Some(s),
            None => None,
        };

        out.push(FeatureLine {
            block,
            kind,
            channel,
            args,
        });
    }
    Ok(out)
}

/// Per-block output column name, carrying enough of the generating spec
/// line to map back for level-2 post-processing.
#[derive(Clone, Debug)]
pub struct ColumnMeta {
    pub name: String,
    pub block: String,
}

/// Maps `selected-column-index -> raw-column-index`, built once level-2
/// processing has decided which raw columns survive.
#[derive(Clone, Debug, Default)]
pub struct ColumnLayout {
    pub columns: Vec<ColumnMeta>,
}

impl ColumnLayout {
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn indices_of_block<'a>(&'a self, block: &'a str) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.block == block)
            .map(|(i, _)| i)
            .collect()
    }

    /// Drop every column not in `keep`, compacting `final2orig`-style.
    #[must_use]
    pub fn compact(&self, keep: &[usize]) -> (Self, Vec<usize>) {
        let columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        (Self { columns }, keep.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_logpsd_line() {
        let lines = parse_spec("spectral LOGPSD sig=C3 lwr=0.5 upr=45\n").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, FeatureKind::LogPsd);
        assert_eq!(lines[0].channel.as_deref(), Some("C3"));
        assert_eq!(lines[0].arg_f64("lwr"), Some(0.5));
    }

    #[test]
    fn indiv_level_channel_is_none() {
        let lines = parse_spec("covar COVAR sig=. age bmi\n").unwrap();
        assert_eq!(lines[0].channel, None);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(parse_spec("x NOPE sig=.\n").is_err());
    }
}
