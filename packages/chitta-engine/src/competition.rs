//! Lateral inhibition: near-duplicate results compete, winners suppress
//! losers. Soft mode reduces the loser's relevance; hard mode removes it.

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CompetitionConfig {
    pub enabled: bool,
    /// Pairwise similarity above which two results compete.
    pub similarity_threshold: f32,
    /// Penalty scale (alpha) for soft suppression.
    pub inhibition_strength: f32,
    /// Remove losers entirely instead of penalizing them.
    pub hard_suppression: bool,
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.85,
            inhibition_strength: 0.3,
            hard_suppression: false,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct InhibitionResult {
    pub suppressed_indices: Vec<usize>,
    /// Penalty in [0, 1] per suppressed index (soft mode).
    pub penalties: Vec<f32>,
}

/// Decide which results get inhibited.
///
/// `similarities` is the upper-triangular pairwise matrix, row-major:
/// entry for pair (i, j), i < j, lives at
/// `i * n - i * (i + 1) / 2 + (j - i - 1)`. `relevances` must already be
/// sorted non-increasing, so in any competing pair the earlier index is
/// the winner.
pub fn compute_inhibition(
    similarities: &[f32],
    relevances: &[f32],
    n: usize,
    config: &CompetitionConfig,
) -> InhibitionResult {
    let mut result = InhibitionResult::default();
    if !config.enabled || n < 2 {
        return result;
    }
    debug_assert_eq!(similarities.len(), n * (n - 1) / 2);
    debug_assert_eq!(relevances.len(), n);

    let mut penalty = vec![0.0f32; n];
    let mut suppressed = vec![false; n];

    for i in 0..n {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..n {
            let idx = i * n - i * (i + 1) / 2 + (j - i - 1);
            let sim = similarities[idx];
            if sim < config.similarity_threshold {
                continue;
            }
            suppressed[j] = true;
            let p = (config.inhibition_strength * sim).min(1.0);
            penalty[j] = penalty[j].max(p);
        }
    }

    for (j, &is_suppressed) in suppressed.iter().enumerate() {
        if is_suppressed {
            result.suppressed_indices.push(j);
            result.penalties.push(penalty[j]);
        }
    }
    result
}

/// Index into the upper-triangular pair array for (i, j), i < j.
pub fn pair_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_competition_below_threshold() {
        let config = CompetitionConfig::default();
        let similarities = vec![0.5, 0.3, 0.2];
        let relevances = vec![0.9, 0.8, 0.7];
        let result = compute_inhibition(&similarities, &relevances, 3, &config);
        assert!(result.suppressed_indices.is_empty());
    }

    #[test]
    fn test_winner_suppresses_loser() {
        let config = CompetitionConfig::default();
        // Pair (0,1) nearly identical; (0,2) and (1,2) distinct.
        let similarities = vec![0.95, 0.1, 0.1];
        let relevances = vec![0.9, 0.8, 0.7];
        let result = compute_inhibition(&similarities, &relevances, 3, &config);
        assert_eq!(result.suppressed_indices, vec![1]);
        assert!((result.penalties[0] - 0.3 * 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_suppressed_node_does_not_suppress() {
        let config = CompetitionConfig::default();
        // 0~1 and 1~2 compete, but 0 and 2 are distinct: 2 survives
        // because its only competitor was already suppressed.
        let n = 3;
        let mut similarities = vec![0.0; 3];
        similarities[pair_index(0, 1, n)] = 0.9;
        similarities[pair_index(1, 2, n)] = 0.9;
        similarities[pair_index(0, 2, n)] = 0.1;
        let relevances = vec![0.9, 0.8, 0.7];
        let result = compute_inhibition(&similarities, &relevances, n, &config);
        assert_eq!(result.suppressed_indices, vec![1]);
    }

    #[test]
    fn test_disabled_is_noop() {
        let config = CompetitionConfig {
            enabled: false,
            ..Default::default()
        };
        let similarities = vec![0.99];
        let relevances = vec![0.9, 0.8];
        let result = compute_inhibition(&similarities, &relevances, 2, &config);
        assert!(result.suppressed_indices.is_empty());
    }
}
