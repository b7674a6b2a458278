use std::fmt::Write as _;

use serde::Serialize;

/// Ranks reported by default.
pub const DEFAULT_MAX_K: usize = 10;

/// Top-K hit counters.
///
/// `counters[0]` is the number of evaluated completions; `counters[k]` is
/// the number whose expected member appeared at rank `k` or better.
/// Counters only ever grow during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopK {
    counters: Vec<u64>,
}

impl Default for TopK {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_K)
    }
}

impl TopK {
    pub fn new(max_k: usize) -> Self {
        Self {
            counters: vec![0; max_k.max(1) + 1],
        }
    }

    pub fn max_k(&self) -> usize {
        self.counters.len() - 1
    }

    pub fn counters(&self) -> &[u64] {
        &self.counters
    }

    pub fn evaluated(&self) -> u64 {
        self.counters[0]
    }

    /// Count one evaluated completion whose expected member was found at
    /// 1-based `rank`, or not at all. Ranks beyond `max_k` count as misses.
    pub fn record(&mut self, rank: Option<usize>) {
        self.counters[0] += 1;
        if let Some(r) = rank.filter(|r| *r >= 1) {
            for c in self.counters.iter_mut().skip(r) {
                *c += 1;
            }
        }
    }

    /// Share of evaluated completions hit within the top `k`, in percent.
    /// `None` when nothing was evaluated or `k` is out of range.
    pub fn precision(&self, k: usize) -> Option<f64> {
        if self.counters[0] == 0 || k == 0 || k > self.max_k() {
            return None;
        }
        Some(self.counters[k] as f64 * 100.0 / self.counters[0] as f64)
    }

    /// Add `other`'s counters to these. Both must track the same `max_k`;
    /// extra ranks in `other` are ignored.
    pub fn merge(&mut self, other: &TopK) {
        for (mine, theirs) in self.counters.iter_mut().zip(&other.counters) {
            *mine += theirs;
        }
    }

    pub fn reset(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
    }

    /// Log the precision table.
    pub fn report(&self, label: &str) {
        tracing::info!(
            evaluated = self.evaluated(),
            "top-k precision for {label}"
        );
        for k in 1..=self.max_k() {
            match self.precision(k) {
                Some(p) => tracing::info!("Top{k}: {p:.1}%"),
                None => tracing::info!("Top{k}: undefined"),
            }
        }
    }

    pub fn format_human(&self) -> String {
        let mut out = format!("evaluated: {}\n", self.evaluated());
        for k in 1..=self.max_k() {
            let _ = match self.precision(k) {
                Some(p) => writeln!(out, "Top{k}: {p:.1}%"),
                None => writeln!(out, "Top{k}: undefined"),
            };
        }
        out
    }

    pub fn format_json(&self) -> serde_json::Value {
        let precision: Vec<_> = (1..=self.max_k())
            .map(|k| {
                serde_json::json!({
                    "k": k,
                    "hits": self.counters[k],
                    "precision": self.precision(k),
                })
            })
            .collect();
        serde_json::json!({
            "evaluated": self.evaluated(),
            "precision": precision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_increments_rank_and_above() {
        let mut t = TopK::new(5);
        t.record(Some(3));
        assert_eq!(t.counters(), &[1, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn miss_only_counts_evaluation() {
        let mut t = TopK::new(3);
        t.record(None);
        t.record(Some(7));
        assert_eq!(t.counters(), &[2, 0, 0, 0]);
    }

    #[test]
    fn counters_never_decrease() {
        let mut t = TopK::default();
        let mut previous = t.counters().to_vec();
        for rank in [Some(1), None, Some(10), Some(4), Some(11), Some(2)] {
            t.record(rank);
            for (before, after) in previous.iter().zip(t.counters()) {
                assert!(after >= before);
            }
            previous = t.counters().to_vec();
        }
        assert_eq!(t.evaluated(), 6);
        // Precision is non-decreasing in k.
        let p: Vec<_> = (1..=t.max_k()).map(|k| t.precision(k).unwrap()).collect();
        assert!(p.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn precision_undefined_without_evaluations() {
        let t = TopK::default();
        assert_eq!(t.precision(1), None);
        assert!(t.format_human().contains("Top1: undefined"));
    }

    #[test]
    fn precision_values() {
        let mut t = TopK::new(3);
        t.record(Some(1));
        t.record(Some(2));
        t.record(None);
        t.record(Some(3));
        assert_eq!(t.precision(1), Some(25.0));
        assert_eq!(t.precision(2), Some(50.0));
        assert_eq!(t.precision(3), Some(75.0));
        assert_eq!(t.precision(4), None);
    }

    #[test]
    fn merge_adds_counters() {
        let mut a = TopK::new(2);
        a.record(Some(1));
        let mut b = TopK::new(2);
        b.record(Some(2));
        b.record(None);
        a.merge(&b);
        assert_eq!(a.counters(), &[3, 1, 2]);
    }

    #[test]
    fn json_output_lists_every_rank() {
        let mut t = TopK::new(2);
        t.record(Some(2));
        let v = t.format_json();
        assert_eq!(v["evaluated"], 1);
        assert_eq!(v["precision"].as_array().unwrap().len(), 2);
        assert_eq!(v["precision"][1]["precision"], 100.0);
        assert!(v["precision"][0]["precision"].as_f64() == Some(0.0));
    }
}
