//! Episode scores and their normalization.
use crate::record::{Record, RecordValue};

/// Scores of a random and of a human player in the Atari 100k games.
const ATARI_SCORES: [(&str, f32, f32); 26] = [
    ("alien", 227.8, 7127.7),
    ("amidar", 5.8, 1719.5),
    ("assault", 222.4, 742.0),
    ("asterix", 210.0, 8503.3),
    ("bankheist", 14.2, 753.1),
    ("battlezone", 2360.0, 37187.5),
    ("boxing", 0.1, 12.1),
    ("breakout", 1.7, 30.5),
    ("choppercommand", 811.0, 7387.8),
    ("crazyclimber", 10780.5, 35829.4),
    ("demonattack", 152.1, 1971.0),
    ("freeway", 0.0, 29.6),
    ("frostbite", 65.2, 4334.7),
    ("gopher", 257.6, 2412.5),
    ("hero", 1027.0, 30826.4),
    ("jamesbond", 29.0, 302.8),
    ("kangaroo", 52.0, 3035.0),
    ("krull", 1598.0, 2665.5),
    ("kungfumaster", 258.5, 22736.3),
    ("mspacman", 307.3, 6951.6),
    ("pong", -20.7, 14.6),
    ("privateeye", 24.9, 69571.3),
    ("qbert", 163.9, 13455.0),
    ("roadrunner", 11.5, 7845.0),
    ("seaquest", 68.4, 42054.7),
    ("upndown", 533.4, 11693.2),
];

/// Reduces a game or environment id to a key of the score table.
///
/// `"ALE/MsPacman-v5"`, `"MsPacmanNoFrameskip-v4"` and `"ms_pacman"` all
/// become `"mspacman"`.
pub fn normalize_game_name(game: &str) -> String {
    let name = game.rsplit('/').next().unwrap_or(game);
    let name = name.split('-').next().unwrap_or(name);
    let name = name.strip_suffix("NoFrameskip").unwrap_or(name);
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Human-normalized score `(score - random) / (human - random)`.
///
/// Returns `None` for games outside the Atari 100k benchmark.
pub fn atari_hns(game: &str, score: f32) -> Option<f32> {
    let key = normalize_game_name(game);
    ATARI_SCORES
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, random, human)| (score - random) / (human - random))
}

/// Returns of the episodes of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalScores {
    /// Episode returns.
    pub scores: Vec<f32>,

    /// Number of episodes that ended by truncation.
    pub num_truncated: usize,
}

impl EvalScores {
    /// Number of episodes.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns `true` if there is no episode.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Mean score.
    pub fn mean(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f32>() / self.scores.len() as f32
    }

    /// Population standard deviation.
    pub fn std(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>()
            / self.scores.len() as f32;
        var.sqrt()
    }

    /// Median score. The mean of the two middle scores for even counts.
    pub fn median(&self) -> f32 {
        let mut sorted = self.scores.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        match n {
            0 => 0.0,
            _ if n % 2 == 1 => sorted[n / 2],
            _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
        }
    }

    /// Lowest score.
    pub fn min(&self) -> f32 {
        self.scores.iter().cloned().fold(f32::INFINITY, f32::min)
    }

    /// Highest score.
    pub fn max(&self) -> f32 {
        self.scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Statistics under `eval/`, repeated under `eval/final_` for a final evaluation.
    pub fn to_record(&self, hns: f32, is_final: bool) -> Record {
        let stats = [
            ("score_mean", self.mean()),
            ("score_std", self.std()),
            ("score_median", self.median()),
            ("score_min", self.min()),
            ("score_max", self.max()),
            ("hns", hns),
        ];
        let mut record = Record::empty();
        for (key, value) in stats.iter() {
            record.insert(format!("eval/{}", key), RecordValue::Scalar(*value));
            if is_final {
                record.insert(format!("eval/final_{}", key), RecordValue::Scalar(*value));
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_game_name() {
        assert_eq!(normalize_game_name("ALE/MsPacman-v5"), "mspacman");
        assert_eq!(normalize_game_name("MsPacmanNoFrameskip-v4"), "mspacman");
        assert_eq!(normalize_game_name("ms_pacman"), "mspacman");
        assert_eq!(normalize_game_name("Breakout"), "breakout");
    }

    #[test]
    fn test_atari_hns() {
        assert_eq!(atari_hns("Pong", -20.7), Some(0.0));
        let hns = atari_hns("ALE/Breakout-v5", 30.5).unwrap();
        assert!((hns - 1.0).abs() < 1e-6);
        assert_eq!(atari_hns("hopper", 1.0), None);
    }

    #[test]
    fn test_statistics() {
        let scores = EvalScores {
            scores: vec![4.0, 1.0, 3.0, 2.0],
            num_truncated: 0,
        };
        assert_eq!(scores.mean(), 2.5);
        assert_eq!(scores.median(), 2.5);
        assert_eq!(scores.min(), 1.0);
        assert_eq!(scores.max(), 4.0);
        assert!((scores.std() - 1.25f32.sqrt()).abs() < 1e-6);

        let record = scores.to_record(0.5, true);
        assert_eq!(record.get_scalar("eval/score_mean").unwrap(), 2.5);
        assert_eq!(record.get_scalar("eval/final_hns").unwrap(), 0.5);
        assert_eq!(scores.to_record(0.5, false).len(), 6);
    }
}
