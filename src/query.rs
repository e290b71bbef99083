use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use crate::frecency::{frecency_score, frecency_score_at};
use crate::matcher::CommandMatcher;
use crate::relevance::{scorer_for, RelevanceKind};
use crate::storage::{AggregatedCommand, ExecutedCommand, RankedCommand};
use crate::store_manager::{CommandFilter, StoreManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Group repeated commands and rank by frequency and recency
    #[default]
    Frecency,
    /// Every execution, newest first
    Time,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub pattern: Option<String>,
    pub regex: bool,
    pub cwd: Option<String>,
    pub limit: Option<usize>,
    pub sort: SortMode,
    pub relevance: RelevanceKind,
}

/// Query output. `total` counts every match, before any limit is applied.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum QueryResults {
    Plain {
        total: usize,
        commands: Vec<ExecutedCommand>,
    },
    Ranked {
        total: usize,
        commands: Vec<RankedCommand>,
    },
}

impl QueryResults {
    pub fn total(&self) -> usize {
        match self {
            QueryResults::Plain { total, .. } | QueryResults::Ranked { total, .. } => *total,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResults::Plain { commands, .. } => commands.len(),
            QueryResults::Ranked { commands, .. } => commands.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            QueryResults::Plain { commands, .. } => commands.truncate(len),
            QueryResults::Ranked { commands, .. } => commands.truncate(len),
        }
    }
}

pub struct QueryEngine<'a> {
    store: &'a StoreManager,
    // Scores against the wall clock when unset
    now: Option<DateTime<Utc>>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a StoreManager) -> Self {
        Self { store, now: None }
    }

    /// Engine that scores recency against a fixed instant.
    pub fn with_now(store: &'a StoreManager, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now: Some(now),
        }
    }

    /// Chronological listing; ranked by frecency unless `sort` is `Time`.
    /// Both variants are truncated to `limit`.
    pub fn list(&self, options: &QueryOptions) -> Result<QueryResults> {
        let rows = self.fetch(options)?;
        let total_rows = rows.len();
        match options.sort {
            SortMode::Time => {
                let mut commands = rows;
                truncate(&mut commands, options.limit);
                Ok(QueryResults::Plain {
                    total: total_rows,
                    commands,
                })
            }
            SortMode::Frecency => {
                let mut ranked = self.rank(aggregate(&rows), None);
                let total = ranked.len();
                truncate(&mut ranked, options.limit);
                Ok(QueryResults::Ranked {
                    total,
                    commands: ranked,
                })
            }
        }
    }

    /// Pattern search. The plain variant is capped at `limit`; the ranked
    /// variant returns every match and leaves truncation to the caller.
    pub fn search(&self, options: &QueryOptions) -> Result<QueryResults> {
        let pattern = options.pattern.as_deref().unwrap_or("");
        let matcher = CommandMatcher::new(pattern, options.regex);
        let rows: Vec<ExecutedCommand> = self
            .fetch(options)?
            .into_iter()
            .filter(|row| matcher.is_match(&row.command))
            .collect();

        match options.sort {
            SortMode::Time => {
                let total = rows.len();
                let mut commands = rows;
                truncate(&mut commands, options.limit);
                Ok(QueryResults::Plain { total, commands })
            }
            SortMode::Frecency => {
                let relevance = if pattern.is_empty() {
                    None
                } else {
                    self.relevance(pattern, options.relevance, &rows)
                };
                let ranked = self.rank(aggregate(&rows), relevance.as_ref());
                Ok(QueryResults::Ranked {
                    total: ranked.len(),
                    commands: ranked,
                })
            }
        }
    }

    fn fetch(&self, options: &QueryOptions) -> Result<Vec<ExecutedCommand>> {
        self.store.commands(&CommandFilter {
            cwd: options.cwd.clone(),
            limit: None,
        })
    }

    /// Best relevance per command text. Scorer failures only cost the blend.
    fn relevance(
        &self,
        pattern: &str,
        kind: RelevanceKind,
        rows: &[ExecutedCommand],
    ) -> Option<HashMap<String, f64>> {
        let scorer = scorer_for(kind, self.store);
        let scores = match scorer.score(pattern, rows) {
            Ok(scores) => scores,
            Err(e) => {
                log::warn!("{} relevance unavailable: {:#}", scorer.name(), e);
                return None;
            }
        };

        let mut best: HashMap<String, f64> = HashMap::new();
        for (row, score) in rows.iter().zip(scores) {
            best.entry(row.command.clone())
                .and_modify(|s| *s = s.max(score))
                .or_insert(score);
        }
        Some(best)
    }

    fn rank(
        &self,
        groups: Vec<AggregatedCommand>,
        relevance: Option<&HashMap<String, f64>>,
    ) -> Vec<RankedCommand> {
        let multipliers = relevance.map(|rel| {
            let raw: Vec<f64> = groups
                .iter()
                .map(|g| rel.get(&g.command).copied().unwrap_or(0.0))
                .collect();
            normalize(&raw)
                .into_iter()
                .map(relevance_multiplier)
                .collect::<Vec<f64>>()
        });

        let mut ranked: Vec<RankedCommand> = groups
            .into_iter()
            .enumerate()
            .map(|(i, aggregate)| {
                let frecency = match self.now {
                    Some(now) => frecency_score_at(aggregate.frequency, aggregate.last_run, now),
                    None => frecency_score(aggregate.frequency, aggregate.last_run),
                };
                let score = match &multipliers {
                    Some(m) => frecency * m[i],
                    None => frecency,
                };
                RankedCommand { aggregate, score }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| newest_first(a.aggregate.last_run, b.aggregate.last_run))
                .then_with(|| a.aggregate.command.cmp(&b.aggregate.command))
        });
        ranked
    }
}

/// Collapse rows into one group per exact command text. Rows must arrive
/// newest first, so the first row of each group is its most recent run.
pub fn aggregate(rows: &[ExecutedCommand]) -> Vec<AggregatedCommand> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<AggregatedCommand> = Vec::new();

    for row in rows {
        match index.get(row.command.as_str()) {
            Some(&i) => {
                let group = &mut groups[i];
                group.frequency += 1;
                if newest_first(row.timestamp, group.last_run) == Ordering::Less {
                    group.last_run = row.timestamp;
                    group.latest = row.clone();
                }
            }
            None => {
                index.insert(row.command.as_str(), groups.len());
                groups.push(AggregatedCommand {
                    command: row.command.clone(),
                    frequency: 1,
                    last_run: row.timestamp,
                    latest: row.clone(),
                });
            }
        }
    }
    groups
}

/// Min-max normalize into [0, 1]. Equal values all map to 0.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = if max - min > 0.0 { max - min } else { 1.0 };
    values.iter().map(|v| (v - min) / range).collect()
}

/// Map normalized relevance onto a [0.5, 1.5] frecency multiplier.
pub fn relevance_multiplier(normalized: f64) -> f64 {
    0.5 + normalized.clamp(0.0, 1.0)
}

// Present timestamps before absent ones, later before earlier.
fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn truncate<T>(items: &mut Vec<T>, limit: Option<usize>) {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frecency::frecency_score_at;
    use crate::indexer::{sync, SyncOptions};
    use crate::log_parser::fixtures::pair;
    use chrono::{Duration, SecondsFormat, TimeZone};
    use std::fs;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn row(id: &str, command: &str, cwd: &str, age: Option<Duration>) -> ExecutedCommand {
        ExecutedCommand {
            id: None,
            tool_use_id: id.to_string(),
            command: command.to_string(),
            description: Some(format!("about {}", command)),
            cwd: Some(cwd.to_string()),
            stdout: None,
            stderr: None,
            is_error: false,
            timestamp: age.map(|a| now() - a),
            session_id: None,
        }
    }

    fn store_with(rows: &[ExecutedCommand]) -> Result<StoreManager> {
        let store = StoreManager::open_in_memory()?;
        for r in rows {
            store.insert_command(r)?;
        }
        Ok(store)
    }

    fn ranked(results: QueryResults) -> Vec<RankedCommand> {
        match results {
            QueryResults::Ranked { commands, .. } => commands,
            other => panic!("expected ranked results, got {:?}", other),
        }
    }

    fn plain(results: QueryResults) -> Vec<ExecutedCommand> {
        match results {
            QueryResults::Plain { commands, .. } => commands,
            other => panic!("expected plain results, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_guards_equal_values() {
        assert_eq!(normalize(&[3.0, 3.0, 3.0]), vec![0.0, 0.0, 0.0]);
        assert_eq!(normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
        assert!(normalize(&[]).is_empty());
        assert_eq!(relevance_multiplier(0.0), 0.5);
        assert_eq!(relevance_multiplier(1.0), 1.5);
    }

    #[test]
    fn test_aggregate_keeps_latest_row() {
        let rows = vec![
            row("a", "ls", "/new", Some(Duration::hours(1))),
            row("b", "pwd", "/x", None),
            row("c", "ls", "/old", Some(Duration::days(3))),
        ];
        let groups = aggregate(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].command, "ls");
        assert_eq!(groups[0].frequency, 2);
        assert_eq!(groups[0].latest.cwd.as_deref(), Some("/new"));
        assert_eq!(groups[0].last_run, Some(now() - Duration::hours(1)));
        assert_eq!(groups[1].frequency, 1);
        assert_eq!(groups[1].last_run, None);
    }

    #[test]
    fn test_plain_list_is_newest_first_and_limited() -> Result<()> {
        let store = store_with(&[
            row("a", "old", "/r", Some(Duration::days(2))),
            row("b", "new", "/r", Some(Duration::minutes(1))),
            row("c", "mid", "/r", Some(Duration::hours(2))),
        ])?;
        let engine = QueryEngine::with_now(&store, now());
        let options = QueryOptions {
            sort: SortMode::Time,
            limit: Some(2),
            ..Default::default()
        };
        let results = engine.list(&options)?;
        assert_eq!(results.total(), 3);
        let names: Vec<String> = plain(results).into_iter().map(|c| c.command).collect();
        assert_eq!(names, vec!["new", "mid"]);
        Ok(())
    }

    #[test]
    fn test_frecency_list_groups_and_truncates() -> Result<()> {
        let store = store_with(&[
            row("a", "cargo test", "/r", Some(Duration::days(10))),
            row("b", "cargo test", "/r", Some(Duration::days(12))),
            row("c", "cargo test", "/r", Some(Duration::days(14))),
            row("d", "git status", "/r", Some(Duration::minutes(5))),
            row("e", "make", "/r", None),
        ])?;
        let engine = QueryEngine::with_now(&store, now());
        let results = engine.list(&QueryOptions {
            limit: Some(2),
            ..Default::default()
        })?;
        assert_eq!(results.total(), 3);
        let commands = ranked(results);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].aggregate.command, "git status");
        assert_eq!(commands[1].aggregate.command, "cargo test");
        assert_eq!(commands[1].aggregate.frequency, 3);
        let expected = frecency_score_at(3, Some(now() - Duration::days(10)), now());
        assert!((commands[1].score - expected).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_cwd_filter_limits_scope() -> Result<()> {
        let store = store_with(&[
            row("a", "ls", "/one", Some(Duration::hours(1))),
            row("b", "ls", "/two", Some(Duration::hours(2))),
            row("c", "pwd", "/two", Some(Duration::hours(3))),
        ])?;
        let engine = QueryEngine::with_now(&store, now());
        let results = engine.list(&QueryOptions {
            cwd: Some("/two".to_string()),
            ..Default::default()
        })?;
        let commands = ranked(results);
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.aggregate.latest.cwd.as_deref() == Some("/two")));
        assert!(commands.iter().all(|c| c.aggregate.frequency == 1));
        Ok(())
    }

    #[test]
    fn test_empty_substring_search_matches_everything() -> Result<()> {
        let store = store_with(&[
            row("a", "ls", "/r", Some(Duration::hours(1))),
            row("b", "pwd", "/r", None),
        ])?;
        let engine = QueryEngine::with_now(&store, now());
        let results = engine.search(&QueryOptions {
            pattern: Some(String::new()),
            sort: SortMode::Time,
            ..Default::default()
        })?;
        assert_eq!(results.total(), 2);
        Ok(())
    }

    #[test]
    fn test_search_reports_total_without_truncating() -> Result<()> {
        let rows: Vec<ExecutedCommand> = (0..30)
            .map(|i| row(&format!("t{}", i), &format!("echo {}", i), "/r", Some(Duration::hours(i))))
            .collect();
        let store = store_with(&rows)?;
        let engine = QueryEngine::with_now(&store, now());
        let mut results = engine.search(&QueryOptions {
            pattern: Some("ECHO".to_string()),
            limit: Some(5),
            ..Default::default()
        })?;
        assert_eq!(results.total(), 30);
        assert_eq!(results.len(), 30);
        results.truncate(5);
        assert_eq!(results.len(), 5);
        assert_eq!(results.total(), 30);
        Ok(())
    }

    #[test]
    fn test_regex_search_and_invalid_pattern() -> Result<()> {
        let store = store_with(&[
            row("a", "git push origin", "/r", Some(Duration::hours(1))),
            row("b", "git pull", "/r", Some(Duration::hours(1))),
            row("c", "echo foo(", "/r", Some(Duration::hours(1))),
        ])?;
        let engine = QueryEngine::with_now(&store, now());

        let results = engine.search(&QueryOptions {
            pattern: Some("^git pu(sh|ll)".to_string()),
            regex: true,
            ..Default::default()
        })?;
        assert_eq!(results.total(), 2);

        let results = engine.search(&QueryOptions {
            pattern: Some("foo(".to_string()),
            regex: true,
            ..Default::default()
        })?;
        let commands = ranked(results);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].aggregate.command, "echo foo(");
        Ok(())
    }

    #[test]
    fn test_substring_relevance_keeps_frecency_order() -> Result<()> {
        let store = store_with(&[
            row("a", "npm run build", "/r", Some(Duration::days(40))),
            row("b", "npm test", "/r", Some(Duration::minutes(10))),
        ])?;
        let engine = QueryEngine::with_now(&store, now());
        let commands = ranked(engine.search(&QueryOptions {
            pattern: Some("npm".to_string()),
            relevance: RelevanceKind::Substring,
            ..Default::default()
        })?);
        assert_eq!(commands[0].aggregate.command, "npm test");
        // Binary relevance is equal for all matches, so every score is halved.
        let expected = frecency_score_at(1, Some(now() - Duration::minutes(10)), now()) * 0.5;
        assert!((commands[0].score - expected).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_fts_relevance_scales_frecency() -> Result<()> {
        let store = store_with(&[
            row("a", "git status", "/r", Some(Duration::days(2))),
            row("b", "go install ./tools/stat", "/r", Some(Duration::hours(5))),
        ])?;
        assert!(store.fts_enabled());
        let engine = QueryEngine::with_now(&store, now());
        let commands = ranked(engine.search(&QueryOptions {
            pattern: Some("stat".to_string()),
            relevance: RelevanceKind::Fts,
            ..Default::default()
        })?);
        // Both contain "stat" as a substring, but only one has it as a token.
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].aggregate.command, "go install ./tools/stat");
        assert!((commands[0].score - 105.0).abs() < 1e-9);
        assert_eq!(commands[1].aggregate.command, "git status");
        assert!((commands[1].score - 25.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_fts_relevance_overrides_frecency_order() -> Result<()> {
        let store = store_with(&[
            row("a", "git status", "/r", Some(Duration::hours(1))),
            row("b", "go install ./tools/stat", "/r", Some(Duration::hours(5))),
        ])?;
        let engine = QueryEngine::with_now(&store, now());

        let listed = ranked(engine.list(&QueryOptions::default())?);
        assert_eq!(listed[0].aggregate.command, "git status");

        let commands = ranked(engine.search(&QueryOptions {
            pattern: Some("stat".to_string()),
            relevance: RelevanceKind::Fts,
            ..Default::default()
        })?);
        assert_eq!(commands[0].aggregate.command, "go install ./tools/stat");
        assert!((commands[0].score - 105.0).abs() < 1e-9);
        assert_eq!(commands[1].aggregate.command, "git status");
        assert!((commands[1].score - 50.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_wall_clock_engine_matches_pinned_scores() -> Result<()> {
        let store = store_with(&[
            ExecutedCommand {
                timestamp: Some(Utc::now() - Duration::minutes(30)),
                ..row("a", "ls", "/r", None)
            },
            row("b", "pwd", "/r", None),
        ])?;
        let commands = ranked(QueryEngine::new(&store).list(&QueryOptions::default())?);
        assert_eq!(commands[0].aggregate.command, "ls");
        assert!((commands[0].score - 100.0).abs() < 1e-9);
        assert!((commands[1].score - 10.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_fuzzy_relevance_stays_within_blend_bounds() -> Result<()> {
        let store = store_with(&[
            row("a", "git status", "/r", Some(Duration::days(2))),
            row("b", "go install ./tools/stat", "/r", Some(Duration::days(2))),
        ])?;
        let engine = QueryEngine::with_now(&store, now());
        let commands = ranked(engine.search(&QueryOptions {
            pattern: Some("st".to_string()),
            relevance: RelevanceKind::Fuzzy,
            ..Default::default()
        })?);
        assert_eq!(commands.len(), 2);
        let top = commands[0].score;
        let bottom = commands[1].score;
        assert!(top >= bottom);
        assert!(top <= frecency_score_at(1, Some(now() - Duration::days(2)), now()) * 1.5 + 1e-9);
        assert!(bottom >= frecency_score_at(1, Some(now() - Duration::days(2)), now()) * 0.5 - 1e-9);
        Ok(())
    }

    #[test]
    fn test_end_to_end_ranking_from_logs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let project = dir.path().join("project");
        fs::create_dir_all(&project)?;
        let at = |age: Duration| (now() - age).to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut log = String::new();
        log.push_str(&pair("t-echo", "echo hi", &at(Duration::days(3))));
        log.push_str(&pair("t-ls-old", "ls", &at(Duration::days(40))));
        log.push_str(&pair("t-ls-new", "ls", &at(Duration::hours(1))));
        fs::write(project.join("session.jsonl"), log)?;

        let mut store = StoreManager::open_in_memory()?;
        let report = sync(&mut store, &SyncOptions::new(dir.path()));
        assert_eq!(report.new_records, 3);

        let engine = QueryEngine::with_now(&store, now());
        let commands = ranked(engine.list(&QueryOptions::default())?);

        let echo_score = frecency_score_at(1, Some(now() - Duration::days(3)), now());
        let ls_score = frecency_score_at(2, Some(now() - Duration::hours(1)), now());
        assert!(ls_score > echo_score);

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].aggregate.command, "ls");
        assert_eq!(commands[0].aggregate.frequency, 2);
        assert!((commands[0].score - ls_score).abs() < 1e-9);
        assert_eq!(commands[1].aggregate.command, "echo hi");
        assert!((commands[1].score - echo_score).abs() < 1e-9);
        Ok(())
    }
}
