use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::analysis::report::{ActionStats, AnalysisReport, CategoryStats, Trend, WindowPoint};
use crate::core::trial::TrialRecord;
use crate::reinforcement::action::{ActionCatalog, Category};
use crate::reinforcement::reward::ErrorClass;

/// Difference between first and last window that counts as a trend
const TREND_THRESHOLD: f64 = 0.1;

/// Aggregates a trial history into an `AnalysisReport`
#[derive(Debug, Clone)]
pub struct Analyzer {
    window: usize,
    /// Actions below this success rate are flagged
    unreliable_below: f64,
    /// Attempts needed before an action can be flagged
    min_attempts: usize,
}

impl Analyzer {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            unreliable_below: 0.3,
            min_attempts: 3,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Build a report; the catalog, when given, supplies categories and
    /// the list of actions never attempted
    pub fn analyze(&self, records: &[TrialRecord], catalog: Option<&ActionCatalog>) -> AnalysisReport {
        let total_trials = records.len();
        let successes = records.iter().filter(|r| r.success).count();
        let failures = total_trials - successes;
        let total_reward: f64 = records.iter().map(|r| r.reward).sum();
        let explored = records.iter().filter(|r| r.explored()).count();

        let actions = self.action_stats(records, catalog);
        let categories = category_stats(records, catalog);
        let rolling_success = self.rolling_success(records);
        let trend = self.trend(records);

        let mut error_classes: BTreeMap<ErrorClass, usize> = BTreeMap::new();
        for error in records.iter().filter(|r| !r.success).filter_map(|r| r.error.as_deref()) {
            *error_classes.entry(ErrorClass::classify(error)).or_default() += 1;
        }

        let mut report = AnalysisReport {
            generated_at: Utc::now(),
            total_trials,
            successes,
            failures,
            success_rate: ratio(successes, total_trials),
            total_reward,
            average_reward: if total_trials == 0 {
                0.0
            } else {
                total_reward / total_trials as f64
            },
            exploration_share: ratio(explored, total_trials),
            window: self.window,
            rolling_success,
            trend,
            actions,
            categories,
            error_classes,
            recommendations: Vec::new(),
        };
        report.recommendations = self.recommendations(&report, catalog);

        debug!(
            trials = total_trials,
            recommendations = report.recommendations.len(),
            "Analyzed trial history"
        );
        report
    }

    fn action_stats(&self, records: &[TrialRecord], catalog: Option<&ActionCatalog>) -> Vec<ActionStats> {
        let mut order: Vec<&str> = Vec::new();
        let mut grouped: HashMap<&str, Vec<&TrialRecord>> = HashMap::new();
        for record in records {
            let entry = grouped.entry(record.action.as_str()).or_default();
            if entry.is_empty() {
                order.push(record.action.as_str());
            }
            entry.push(record);
        }

        // Catalog order first, then anything the catalog does not know.
        if let Some(catalog) = catalog {
            let position = |name: &str| {
                catalog
                    .names()
                    .position(|n| n == name)
                    .unwrap_or(usize::MAX)
            };
            order.sort_by_key(|name| position(*name));
        }

        order
            .into_iter()
            .map(|name| {
                let runs = &grouped[name];
                let attempts = runs.len();
                let successes = runs.iter().filter(|r| r.success).count();

                let mut errors: BTreeMap<&str, usize> = BTreeMap::new();
                for error in runs.iter().filter_map(|r| r.error.as_deref()) {
                    *errors.entry(error).or_default() += 1;
                }
                let most_common_error = errors
                    .into_iter()
                    .fold(None::<(&str, usize)>, |best, (error, count)| match best {
                        Some((_, best_count)) if best_count >= count => best,
                        _ => Some((error, count)),
                    })
                    .map(|(error, _)| error.to_string());

                ActionStats {
                    action: name.to_string(),
                    category: catalog.and_then(|c| c.get(name)).map(|a| a.category),
                    attempts,
                    successes,
                    success_rate: ratio(successes, attempts),
                    average_reward: runs.iter().map(|r| r.reward).sum::<f64>() / attempts as f64,
                    average_duration_ms: runs.iter().map(|r| r.duration_ms as f64).sum::<f64>()
                        / attempts as f64,
                    most_common_error,
                }
            })
            .collect()
    }

    /// Success rate of each full window; a single point when history is shorter
    fn rolling_success(&self, records: &[TrialRecord]) -> Vec<WindowPoint> {
        if records.is_empty() {
            return Vec::new();
        }
        if records.len() < self.window {
            return vec![WindowPoint {
                end_trial: records[records.len() - 1].trial_number,
                success_rate: success_rate(records),
            }];
        }
        records
            .windows(self.window)
            .map(|window| WindowPoint {
                end_trial: window[window.len() - 1].trial_number,
                success_rate: success_rate(window),
            })
            .collect()
    }

    fn trend(&self, records: &[TrialRecord]) -> Trend {
        if records.len() < self.window * 2 {
            return Trend::InsufficientData;
        }
        let first = success_rate(&records[..self.window]);
        let last = success_rate(&records[records.len() - self.window..]);
        if last - first > TREND_THRESHOLD {
            Trend::Improving
        } else if first - last > TREND_THRESHOLD {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    fn recommendations(&self, report: &AnalysisReport, catalog: Option<&ActionCatalog>) -> Vec<String> {
        let mut recommendations = Vec::new();

        for stats in &report.actions {
            if stats.attempts >= self.min_attempts && stats.success_rate < self.unreliable_below {
                let mut line = format!(
                    "Investigate '{}': {}/{} attempts succeeded",
                    stats.action, stats.successes, stats.attempts
                );
                if let Some(error) = &stats.most_common_error {
                    line.push_str(&format!(" (most common error: {})", error));
                }
                recommendations.push(line);
            }
        }

        if let Some(catalog) = catalog {
            let unexplored: Vec<&str> = catalog
                .names()
                .filter(|name| !report.actions.iter().any(|s| s.action == *name))
                .collect();
            if !unexplored.is_empty() {
                recommendations.push(format!("Never attempted: {}", unexplored.join(", ")));
            }

            for category in catalog.categories() {
                let best = report
                    .actions
                    .iter()
                    .filter(|s| s.category == Some(category) && s.successes > 0)
                    .fold(None::<&ActionStats>, |best, s| match best {
                        Some(b) if b.average_reward >= s.average_reward => Some(b),
                        _ => Some(s),
                    });
                if let Some(best) = best {
                    recommendations.push(format!(
                        "Best {} action so far: '{}' (avg reward {:.2})",
                        category, best.action, best.average_reward
                    ));
                }
            }
        }

        let dominant = report
            .error_classes
            .iter()
            .fold(None::<(ErrorClass, usize)>, |best, (class, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((*class, *count)),
            });
        if let Some((class, count)) = dominant {
            recommendations.push(format!(
                "Most failures are {} errors ({}/{}): {}",
                class,
                count,
                report.failures,
                error_hint(class)
            ));
        }

        if report.trend == Trend::Declining {
            recommendations.push(
                "Success rate is declining; check whether an external service regressed".to_string(),
            );
        }

        recommendations
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(10)
    }
}

fn error_hint(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::NotConfigured => "check credentials and environment variables",
        ErrorClass::Authentication => "rotate or re-issue the rejected credentials",
        ErrorClass::Network => "verify the endpoints are reachable",
        ErrorClass::Deployment => "inspect build and deploy logs",
        ErrorClass::Other => "review handler output",
    }
}

fn category_stats(records: &[TrialRecord], catalog: Option<&ActionCatalog>) -> Vec<CategoryStats> {
    let Some(catalog) = catalog else {
        return Vec::new();
    };
    Category::ALL
        .iter()
        .filter_map(|&category| {
            let runs: Vec<&TrialRecord> = records
                .iter()
                .filter(|r| catalog.get(&r.action).map(|a| a.category) == Some(category))
                .collect();
            if runs.is_empty() {
                return None;
            }
            let successes = runs.iter().filter(|r| r.success).count();
            Some(CategoryStats {
                category,
                attempts: runs.len(),
                successes,
                success_rate: ratio(successes, runs.len()),
                average_reward: runs.iter().map(|r| r.reward).sum::<f64>() / runs.len() as f64,
            })
        })
        .collect()
}

fn success_rate(records: &[TrialRecord]) -> f64 {
    ratio(records.iter().filter(|r| r.success).count(), records.len())
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
