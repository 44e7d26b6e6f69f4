use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::eval::EvalError;

/// Per-class breakdown computed alongside the macro averages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerClassMetrics {
    pub class: String,
    pub support: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Absent when the class never occurs in the targets, or covers all
    /// of them.
    pub roc_auc: Option<f64>,
}

/// Macro-averaged multi-class metrics over one evaluation run.
///
/// Precision, recall, F1 and Jaccard are averaged over the one-hot class
/// columns with ill-defined columns counted as zero. ROC AUC is
/// one-vs-rest with midrank tie handling; average precision is the
/// step-function kind grouping tied scores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub loss: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub hamming: f64,
    pub jaccard: f64,
    pub precision: f64,
    pub recall: f64,
    pub average_precision: f64,
    pub kappa: f64,
    /// `(f1 + roc_auc + kappa) / 3`, the combined benchmark score.
    pub score: f64,
    pub per_class: Vec<PerClassMetrics>,
}

impl ClassificationReport {
    pub fn save(&self, dir: &Path) -> Result<PathBuf, EvalError> {
        let path = dir.join("metrics.json");
        let file = std::fs::File::create(&path).map_err(|source| EvalError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(file, self).map_err(EvalError::Json)?;
        Ok(path)
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "* test loss {:.4}", self.loss)?;
        writeln!(
            f,
            "Accuracy: {:.4}, F1 Score: {:.4}, ROC AUC: {:.4}, Hamming Loss: {:.4},",
            self.accuracy, self.f1, self.roc_auc, self.hamming,
        )?;
        writeln!(
            f,
            " Jaccard Score: {:.4}, Precision: {:.4}, Recall: {:.4},",
            self.jaccard, self.precision, self.recall,
        )?;
        write!(
            f,
            " Average Precision: {:.4}, Kappa: {:.4}, Score: {:.4}",
            self.average_precision, self.kappa, self.score,
        )
    }
}

/// Computes the evaluation report from raw predictions.
///
/// `probabilities` holds one score column per class, or a single sigmoid
/// column for a one-logit head; in the latter case `targets` and
/// `predictions` are 0/1. Shapes and label ranges are the caller's
/// responsibility.
pub fn classification_report(
    class_names: &[String],
    probabilities: &Array2<f32>,
    targets: &[usize],
    predictions: &[usize],
    loss: f64,
) -> ClassificationReport {
    let n = targets.len();
    let columns = probabilities.ncols();
    assert_eq!(probabilities.nrows(), n, "one probability row per target");
    assert_eq!(predictions.len(), n, "one prediction per target");
    assert_eq!(class_names.len(), columns, "one name per score column");
    assert!(n > 0, "metrics need at least one sample");

    let binary = columns == 1;
    let truth = |i: usize, col: usize| {
        if binary {
            targets[i] == 1
        } else {
            targets[i] == col
        }
    };
    let predicted = |i: usize, col: usize| {
        if binary {
            predictions[i] == 1
        } else {
            predictions[i] == col
        }
    };

    let correct = (0..n).filter(|&i| targets[i] == predictions[i]).count();
    let accuracy = correct as f64 / n as f64;

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut f1_sum = 0.0;
    let mut jaccard_sum = 0.0;
    let mut differing = 0usize;
    let mut per_class = Vec::with_capacity(columns);

    let mut auc_values = Vec::new();
    let mut ap_values = Vec::new();
    let mut auc_skipped = Vec::new();
    let mut ap_skipped = Vec::new();

    for col in 0..columns {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        for i in 0..n {
            match (truth(i, col), predicted(i, col)) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }
        differing += fp + fn_;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = ratio(2 * tp, 2 * tp + fp + fn_);
        let jaccard = ratio(tp, tp + fp + fn_);

        precision_sum += precision;
        recall_sum += recall;
        f1_sum += f1;
        jaccard_sum += jaccard;

        let scores: Vec<f64> = (0..n).map(|i| probabilities[[i, col]] as f64).collect();
        let positives: Vec<bool> = (0..n).map(|i| truth(i, col)).collect();

        let auc = column_roc_auc(&scores, &positives);
        match auc {
            Some(value) => auc_values.push(value),
            None => auc_skipped.push(class_names[col].clone()),
        }
        match column_average_precision(&scores, &positives) {
            Some(value) => ap_values.push(value),
            None => ap_skipped.push(class_names[col].clone()),
        }

        per_class.push(PerClassMetrics {
            class: class_names[col].clone(),
            support: tp + fn_,
            precision,
            recall,
            f1,
            roc_auc: auc,
        });
    }

    if !auc_skipped.is_empty() {
        log::warn!(
            "classes without both outcomes excluded from macro ROC AUC: {}",
            auc_skipped.join(", "),
        );
    }
    if !ap_skipped.is_empty() {
        log::warn!(
            "classes without positive samples excluded from macro average precision: {}",
            ap_skipped.join(", "),
        );
    }

    let precision = precision_sum / columns as f64;
    let recall = recall_sum / columns as f64;
    let f1 = f1_sum / columns as f64;
    let jaccard = jaccard_sum / columns as f64;
    let hamming = differing as f64 / (n * columns) as f64;
    let roc_auc = mean(&auc_values);
    let average_precision = mean(&ap_values);
    let kappa = cohen_kappa(targets, predictions, if binary { 2 } else { columns });
    let score = (f1 + roc_auc + kappa) / 3.0;

    ClassificationReport {
        loss,
        accuracy,
        f1,
        roc_auc,
        hamming,
        jaccard,
        precision,
        recall,
        average_precision,
        kappa,
        score,
        per_class,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn cohen_kappa(targets: &[usize], predictions: &[usize], num_labels: usize) -> f64 {
    let n = targets.len() as f64;
    let mut matrix = Array2::<f64>::zeros((num_labels, num_labels));
    for (&t, &p) in targets.iter().zip(predictions) {
        matrix[[t, p]] += 1.0;
    }

    let observed = (0..num_labels).map(|k| matrix[[k, k]]).sum::<f64>() / n;
    let expected = (0..num_labels)
        .map(|k| matrix.row(k).sum() * matrix.column(k).sum())
        .sum::<f64>()
        / (n * n);

    if (1.0 - expected).abs() < f64::EPSILON {
        0.0
    } else {
        (observed - expected) / (1.0 - expected)
    }
}

/// Ranks with ties resolved to the group average, 1-based.
fn average_ranks(scores: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let rank = (i + j + 2) as f64 / 2.0;
        for &index in &order[i..=j] {
            ranks[index] = rank;
        }
        i = j + 1;
    }

    ranks
}

/// One-vs-rest AUC via the rank statistic. `None` when the column has a
/// single outcome, in which case the area is undefined.
fn column_roc_auc(scores: &[f64], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let ranks = average_ranks(scores);
    let rank_sum: f64 = ranks
        .iter()
        .zip(positives)
        .filter(|(_, &p)| p)
        .map(|(r, _)| r)
        .sum();

    let n_pos = n_pos as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Step-function average precision over descending score thresholds,
/// grouping tied scores. `None` without positive samples.
fn column_average_precision(scores: &[f64], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    if n_pos == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut ap = 0.0;

    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        for &index in &order[i..=j] {
            if positives[index] {
                tp += 1;
            } else {
                fp += 1;
            }
        }

        let precision = tp as f64 / (tp + fp) as f64;
        let recall = tp as f64 / n_pos as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;

        i = j + 1;
    }

    Some(ap)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::array;

    use super::*;

    fn names(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn three_class_report() -> ClassificationReport {
        let probabilities = array![
            [0.7, 0.2, 0.1],
            [0.3, 0.5, 0.2],
            [0.2, 0.6, 0.2],
            [0.1, 0.8, 0.1],
            [0.1, 0.2, 0.7],
            [0.5, 0.2, 0.3],
        ];
        classification_report(
            &names(&["a", "b", "c"]),
            &probabilities,
            &[0, 0, 1, 1, 2, 2],
            &[0, 1, 1, 1, 2, 0],
            0.4,
        )
    }

    #[test]
    fn three_class_macro_averages() {
        let report = three_class_report();

        assert_relative_eq!(report.accuracy, 4.0 / 6.0, epsilon = 1e-9);
        assert_relative_eq!(report.precision, 0.722222222, epsilon = 1e-6);
        assert_relative_eq!(report.recall, 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(report.f1, 0.655555555, epsilon = 1e-6);
        assert_relative_eq!(report.jaccard, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.hamming, 4.0 / 18.0, epsilon = 1e-9);
        assert_relative_eq!(report.kappa, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn three_class_ranking_metrics() {
        let report = three_class_report();

        // Column AUCs are 0.875, 1.0 and 1.0; the tie in class b's scores
        // is resolved with midranks.
        assert_relative_eq!(report.roc_auc, 2.875 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(report.average_precision, 2.833333333 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(
            report.score,
            (report.f1 + report.roc_auc + report.kappa) / 3.0,
            epsilon = 1e-12,
        );
    }

    #[test]
    fn three_class_per_class_breakdown() {
        let report = three_class_report();

        assert_eq!(report.per_class.len(), 3);
        let b = &report.per_class[1];
        assert_eq!(b.class, "b");
        assert_eq!(b.support, 2);
        assert_relative_eq!(b.precision, 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(b.recall, 1.0, epsilon = 1e-9);
        assert_relative_eq!(b.roc_auc.unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn perfect_predictions() {
        let probabilities = array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1], [0.1, 0.1, 0.8]];
        let report = classification_report(
            &names(&["a", "b", "c"]),
            &probabilities,
            &[0, 1, 2],
            &[0, 1, 2],
            0.0,
        );

        assert_relative_eq!(report.accuracy, 1.0);
        assert_relative_eq!(report.f1, 1.0);
        assert_relative_eq!(report.roc_auc, 1.0);
        assert_relative_eq!(report.kappa, 1.0);
        assert_relative_eq!(report.hamming, 0.0);
        assert_relative_eq!(report.score, 1.0);
    }

    #[test]
    fn single_logit_branch() {
        let probabilities = array![[0.6], [0.8], [0.3], [0.4]];
        let report = classification_report(
            &names(&["positive"]),
            &probabilities,
            &[0, 1, 1, 0],
            &[1, 1, 0, 0],
            0.7,
        );

        assert_relative_eq!(report.accuracy, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.precision, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.recall, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.f1, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.jaccard, 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(report.hamming, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.kappa, 0.0, epsilon = 1e-9);
        assert_relative_eq!(report.roc_auc, 0.5, epsilon = 1e-9);
        assert_relative_eq!(report.average_precision, 0.75, epsilon = 1e-9);
    }

    #[test]
    fn absent_class_is_excluded_from_ranking_metrics() {
        let probabilities = array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1]];
        let report = classification_report(
            &names(&["a", "b", "c"]),
            &probabilities,
            &[0, 1],
            &[0, 1],
            0.0,
        );

        assert_relative_eq!(report.roc_auc, 1.0, epsilon = 1e-9);
        assert_relative_eq!(report.average_precision, 1.0, epsilon = 1e-9);
        assert!(report.per_class[2].roc_auc.is_none());
        // The empty column still counts as zero in the one-hot averages.
        assert_relative_eq!(report.precision, 2.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn midranks_resolve_tied_scores() {
        let ranks = average_ranks(&[0.2, 0.1, 0.2, 0.3]);
        assert_eq!(ranks, vec![2.5, 1.0, 2.5, 4.0]);
    }

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = three_class_report();

        let path = report.save(dir.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let loaded: ClassificationReport = serde_json::from_str(&text).unwrap();
        assert_relative_eq!(loaded.score, report.score, epsilon = 1e-12);
    }

    #[test]
    fn display_matches_summary_layout() {
        let report = three_class_report();
        let text = format!("{report}");

        assert!(text.starts_with("* test loss 0.4000"));
        assert!(text.contains("Accuracy: 0.6667"));
        assert!(text.contains("Kappa: 0.5000"));
    }
}
