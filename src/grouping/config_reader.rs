use crate::grouping::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "electionName")]
    pub election_name: String,
    #[serde(rename = "electionId")]
    pub election_id: Option<u64>,
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub election: String,
    #[serde(rename = "studentsPerGroup")]
    pub students_per_group: String,
    #[serde(rename = "numberOfStudents")]
    pub number_of_students: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct StudentEntry {
    pub id: u64,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct VoteEntry {
    pub voter: u64,
    pub candidate: u64,
    pub score: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct VoteFileSource {
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
    #[serde(rename = "totalPoints")]
    _total_points: Option<JSValue>,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<String>,
}

impl VoteFileSource {
    pub fn total_points(&self) -> ElectionResult<Option<usize>> {
        if self._total_points.is_some() {
            read_js_int(&self._total_points).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionRules {
    #[serde(rename = "studentsPerGroup")]
    _students_per_group: Option<JSValue>,
    #[serde(rename = "restarts")]
    _restarts: Option<JSValue>,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<String>,
    #[serde(rename = "mutualVoteBoost")]
    pub mutual_vote_boost: Option<String>,
    #[serde(rename = "namingTimeoutSeconds")]
    _naming_timeout_seconds: Option<JSValue>,
    pub naming: Option<String>,
}

impl ElectionRules {
    pub fn students_per_group(&self) -> ElectionResult<usize> {
        read_js_int(&self._students_per_group)
    }

    pub fn restarts(&self) -> ElectionResult<Option<usize>> {
        if self._restarts.is_some() {
            read_js_int(&self._restarts).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn naming_timeout_seconds(&self) -> ElectionResult<Option<usize>> {
        if self._naming_timeout_seconds.is_some() {
            read_js_int(&self._naming_timeout_seconds).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: OutputSettings,
    pub students: Vec<StudentEntry>,
    #[serde(default)]
    pub votes: Vec<VoteEntry>,
    #[serde(rename = "voteFileSources", default)]
    pub vote_file_sources: Vec<VoteFileSource>,
    pub rules: ElectionRules,
}

pub fn read_config(path: &str) -> ElectionResult<ElectionConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: ElectionConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(config)
}

pub fn read_summary(path: &str) -> ElectionResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    debug!("read_summary: {:?}", js);
    Ok(js)
}

// Numbers may be written as JSON numbers or as strings.
fn read_js_int(x: &Option<JSValue>) -> ElectionResult<usize> {
    match x {
        Some(JSValue::Number(n)) => n.as_u64().map(|x| x as usize).context(ParsingJsonNumberSnafu {
            content: n.to_string(),
        }),
        Some(JSValue::String(s)) => s
            .trim()
            .parse::<usize>()
            .ok()
            .context(ParsingJsonNumberSnafu { content: s.clone() }),
        other => None.context(ParsingJsonNumberSnafu {
            content: format!("{:?}", other),
        }),
    }
}
