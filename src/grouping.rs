use log::{debug, info, warn};

use affinity_grouping::*;
use snafu::{prelude::*, Snafu};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;
use crate::grouping::config_reader::*;

pub mod config_reader;
pub mod io_csv;
pub mod io_synthetic;
pub mod openai_namer;

#[derive(Debug, Snafu)]
pub enum ElectionError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON content"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Expected a non-negative integer, found {content}"))]
    ParsingJsonNumber { content: String },
    #[snafu(display("The election file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Error writing the summary to {path}"))]
    WritingSummary {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error parsing line {lineno} of a CSV file"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("The vote source {provider} needs a filePath"))]
    MissingFilePath { provider: String },

    #[snafu(display("Error setting up the HTTP client"))]
    HttpClient { source: reqwest::Error },
    #[snafu(display("Error recording the election data"))]
    Store { source: StoreError },
    #[snafu(display("{source}"))]
    Grouping { source: GroupingErrors },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ElectionResult<T> = Result<T, ElectionError>;

/// Values of the command line that take precedence over the election file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub group_size: Option<usize>,
    pub naming: Option<String>,
    pub input: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
enum NamingMode {
    Initials,
    OpenAi,
}

fn validate_rules(rules: &ElectionRules, overrides: &Overrides) -> ElectionResult<GroupingRules> {
    let defaults = GroupingRules::DEFAULT_RULES;
    let group_size = match overrides.group_size {
        Some(x) => x,
        None => rules.students_per_group()?,
    };
    let restarts = match rules.restarts()? {
        None => defaults.restarts,
        Some(0) => whatever!("At least one clustering restart is needed"),
        Some(x) => match u32::try_from(x) {
            Ok(r) => r,
            Err(_) => whatever!("Too many clustering restarts: {}", x),
        },
    };
    let base_seed = match rules.random_seed.as_deref().map(|s| s.trim().parse::<u64>()) {
        None => defaults.base_seed,
        Some(Ok(x)) => x,
        Some(Err(_)) => whatever!(
            "Cannot use random seed {:?}: it should be a non-negative integer",
            rules.random_seed
        ),
    };
    let mutual_boost = match rules.mutual_vote_boost.as_deref().map(|s| s.trim()) {
        None => defaults.mutual_boost,
        Some("none") => MutualBoost::Disabled,
        Some(s) => match s.parse::<f64>() {
            Ok(f) if f.is_finite() && f > 0.0 => MutualBoost::Factor(f),
            _ => whatever!("Cannot use mutual vote boost {:?}", s),
        },
    };
    let naming_timeout = match rules.naming_timeout_seconds()? {
        None => defaults.naming_timeout,
        Some(x) => Duration::from_secs(x as u64),
    };
    Ok(GroupingRules {
        group_size,
        restarts,
        base_seed,
        mutual_boost,
        naming_timeout,
        ..defaults
    })
}

fn naming_mode(rules: &ElectionRules, overrides: &Overrides) -> ElectionResult<NamingMode> {
    let requested = overrides.naming.as_ref().or(rules.naming.as_ref());
    match requested.map(|s| s.as_str()) {
        None | Some("initials") => Ok(NamingMode::Initials),
        Some("openai") => Ok(NamingMode::OpenAi),
        Some(x) => whatever!("Unknown naming mode {:?}", x),
    }
}

fn make_namer(
    mode: NamingMode,
    rules: &GroupingRules,
) -> ElectionResult<Option<Arc<dyn GroupNamer>>> {
    match mode {
        NamingMode::Initials => Ok(None),
        NamingMode::OpenAi => match openai_namer::OpenAiNamer::from_env(rules.naming_timeout)? {
            Some(n) => {
                let namer: Arc<dyn GroupNamer> = Arc::new(n);
                Ok(Some(namer))
            }
            None => {
                warn!("make_namer: OPENAI_API_KEY is not set, groups are named after their initials");
                Ok(None)
            }
        },
    }
}

fn read_votes(
    root_path: &Path,
    source: &VoteFileSource,
    students: &[StudentId],
) -> ElectionResult<Vec<Vote>> {
    match source.provider.as_str() {
        "csv" => {
            let file_path = source.file_path.as_ref().context(MissingFilePathSnafu {
                provider: source.provider.clone(),
            })?;
            let p: PathBuf = root_path.join(file_path);
            io_csv::read_csv_votes(p.as_path().display().to_string().as_str())
        }
        "synthetic" => {
            let total_points = match source.total_points()? {
                None => io_synthetic::DEFAULT_TOTAL_POINTS,
                Some(x) => match u32::try_from(x) {
                    Ok(t) => t,
                    Err(_) => whatever!("Too many points to distribute: {}", x),
                },
            };
            let seed = match source.random_seed.as_deref().map(|s| s.trim().parse::<u64>()) {
                None => GroupingRules::DEFAULT_RULES.base_seed,
                Some(Ok(x)) => x,
                Some(Err(_)) => whatever!("Cannot use random seed {:?}", source.random_seed),
            };
            Ok(io_synthetic::generate_votes(students, total_points, seed))
        }
        x => whatever!("Vote source provider not implemented {:?}", x),
    }
}

fn build_summary_js(
    config: &ElectionConfig,
    rules: &GroupingRules,
    result: &GroupingResult,
) -> JSValue {
    let first_names: HashMap<u64, &str> = config
        .students
        .iter()
        .map(|s| (s.id, s.first_name.as_str()))
        .collect();

    let groups: Vec<JSValue> = result
        .groups
        .iter()
        .map(|g| {
            let members: Vec<String> = g
                .members
                .iter()
                .map(|sid| match first_names.get(&sid.0) {
                    Some(n) => n.to_string(),
                    None => sid.to_string(),
                })
                .collect();
            let ids: Vec<u64> = g.members.iter().map(|sid| sid.0).collect();
            json!({
                "name": g.name,
                "members": members,
                "studentIds": ids,
                "highlighted": result.highlighted_groups.contains(&g.id),
            })
        })
        .collect();

    let oc = OutputConfig {
        election: config.output_settings.election_name.clone(),
        students_per_group: rules.group_size.to_string(),
        number_of_students: config.students.len().to_string(),
    };

    json!({
        "config": oc,
        "results": {
            "groups": groups,
            "qualityScore": format!("{:.2}", result.quality_score),
            "totalSatisfaction": result.satisfaction.total.to_string(),
            "averageSatisfaction": format!("{:.2}", result.satisfaction.average),
        }
    })
}

/// Reads an election file, groups its students and returns the JSON summary.
pub fn group_election(config_path: &str, overrides: &Overrides) -> ElectionResult<JSValue> {
    let config = read_config(config_path)?;
    info!("config: {:?}", config);

    let rules = validate_rules(&config.rules, overrides)?;
    let mode = naming_mode(&config.rules, overrides)?;
    let election_id = ElectionId(config.output_settings.election_id.unwrap_or(1));
    let student_ids: Vec<StudentId> = config.students.iter().map(|s| StudentId(s.id)).collect();

    let root_p = Path::new(config_path)
        .parent()
        .context(MissingParentDirSnafu {})?;
    let mut votes: Vec<Vote> = config
        .votes
        .iter()
        .map(|v| Vote {
            voter: StudentId(v.voter),
            candidate: StudentId(v.candidate),
            score: v.score,
        })
        .collect();
    for source in config.vote_file_sources.iter() {
        let mut file_votes = read_votes(root_p, source, &student_ids)?;
        votes.append(&mut file_votes);
    }
    if let Some(input) = overrides.input.as_ref().filter(|s| !s.is_empty()) {
        let mut file_votes = io_csv::read_csv_votes(input)?;
        votes.append(&mut file_votes);
    }

    let store = Arc::new(MemoryStore::new());
    for s in config.students.iter() {
        store
            .add_student(StudentId(s.id), &s.first_name)
            .context(StoreSnafu)?;
    }
    let mut replaced = 0;
    for v in votes.iter() {
        if store.cast_vote(election_id, v).context(StoreSnafu)? {
            replaced += 1;
        }
    }
    debug!(
        "group_election: {} votes recorded, {} replaced an earlier vote",
        votes.len(),
        replaced
    );

    let mut engine = GroupingEngine::new(Arc::clone(&store), &rules);
    if let Some(namer) = make_namer(mode, &rules)? {
        engine = engine.with_namer(namer);
    }
    let result = engine
        .run_grouping(election_id, &student_ids, rules.group_size)
        .context(GroupingSnafu)?;
    info!(
        "group_election: {} groups, quality {:.2}, satisfaction {}",
        result.groups.len(),
        result.quality_score,
        result.satisfaction.total
    );

    Ok(build_summary_js(&config, &rules, &result))
}

fn write_summary(
    out: Option<&str>,
    default_path: Option<PathBuf>,
    pretty_js_stats: &str,
) -> ElectionResult<()> {
    match (out, default_path) {
        (Some(""), _) => {}
        (Some("stdout"), _) | (None, None) => println!("{}", pretty_js_stats),
        (Some(path), _) => {
            fs::write(path, pretty_js_stats).context(WritingSummarySnafu { path })?;
        }
        (None, Some(p)) => {
            let path = p.as_path().display().to_string();
            fs::write(&p, pretty_js_stats).context(WritingSummarySnafu { path })?;
        }
    }
    Ok(())
}

fn check_reference(reference_path: &str, pretty_js_stats: &str) -> ElectionResult<()> {
    let summary_ref = read_summary(reference_path)?;
    let pretty_js_summary_ref = serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
    if pretty_js_summary_ref != pretty_js_stats {
        warn!("Found differences with the reference string");
        print_diff(pretty_js_summary_ref.as_str(), pretty_js_stats, "\n");
        whatever!(
            "Difference detected between calculated summary and reference summary in {}",
            reference_path
        )
    }
    Ok(())
}

// The summary lands next to the election file when an output directory is set.
fn default_output_path(config_path: &str, config: &OutputSettings) -> Option<PathBuf> {
    let dir = config.output_directory.as_ref()?;
    let root = Path::new(config_path).parent()?;
    let file_name = format!("{}_summary.json", config.election_name.replace(' ', "_"));
    Some(root.join(dir).join(file_name))
}

pub fn run_election(args: &Args) -> ElectionResult<()> {
    let overrides = Overrides {
        group_size: args.group_size,
        naming: args.naming.clone(),
        input: args.input.clone(),
    };
    let summary = group_election(&args.config, &overrides)?;
    let pretty_js_stats = serde_json::to_string_pretty(&summary).context(ParsingJsonSnafu {})?;

    let default_path = if args.out.is_none() {
        let config = read_config(&args.config)?;
        default_output_path(&args.config, &config.output_settings)
    } else {
        None
    };
    write_summary(args.out.as_deref(), default_path, &pretty_js_stats)?;

    if let Some(reference_path) = args.reference.as_ref() {
        check_reference(reference_path, &pretty_js_stats)?;
    }
    Ok(())
}

fn test_dir() -> String {
    option_env!("AFFGROUP_TEST_DIR")
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}/tests", env!("CARGO_MANIFEST_DIR")))
}

/// Groups the election `tests/<name>/<name>_config.json` and compares it to
/// `tests/<name>/<name>_expected_summary.json`.
pub fn test_wrapper(test_name: &str) -> ElectionResult<()> {
    info!("Running test {}", test_name);
    let dir = test_dir();
    let config_path = format!("{}/{}/{}_config.json", dir, test_name, test_name);
    let summary_path = format!("{}/{}/{}_expected_summary.json", dir, test_name, test_name);
    let summary = group_election(&config_path, &Overrides::default())?;
    let pretty_js_stats = serde_json::to_string_pretty(&summary).context(ParsingJsonSnafu {})?;
    check_reference(&summary_path, &pretty_js_stats)
}
