//! JSON decoding for the REST payloads and live log frames.
//!
//! The backend has shipped two payload shapes over time (`org` vs `organisation`, `took` vs
//! `duration`, step log under `build` vs `log`, ids present or not). Payloads decode into
//! intermediate wire structs first and are then converted, filling in identifiers the way
//! the engine expects them: repository id defaults to `org/name`, build id to the build
//! number, step id to the step name.

use crate::error::{EngineError, EngineResult};
use crate::model::{Build, LogBuffer, RepoId, Repository, RepositoryDetail, Service, Step};
use crate::status::Status;
use serde::{Deserialize, Deserializer};

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

fn check_response_size(json: &str) -> EngineResult<()> {
    if json.len() > MAX_RESPONSE_SIZE {
        return Err(EngineError::Decode(format!(
            "Response too large ({:.1} MB, max {} MB)",
            json.len() as f64 / (1024.0 * 1024.0),
            MAX_RESPONSE_SIZE / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Strings, numbers and booleans are kept as text; `null` and absence become empty.
fn opaque_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// -- Intermediate wire structs --

#[derive(Deserialize, Debug)]
struct WireRepo {
    #[serde(default, deserialize_with = "opaque_text")]
    id: String,
    #[serde(default, alias = "organisation")]
    org: String,
    name: String,
    #[serde(default, deserialize_with = "opaque_text")]
    url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    builds: Vec<WireBuild>,
}

#[derive(Deserialize, Debug)]
struct WireBuild {
    #[serde(default, deserialize_with = "opaque_text")]
    id: String,
    #[serde(default)]
    number: Option<u64>,
    #[serde(default, deserialize_with = "opaque_text")]
    timestamp: String,
    #[serde(default)]
    status: Status,
    #[serde(default, deserialize_with = "null_as_default")]
    success: bool,
    #[serde(default, deserialize_with = "opaque_text")]
    coverage: String,
    #[serde(default, alias = "duration", deserialize_with = "opaque_text")]
    took: String,
    #[serde(default, deserialize_with = "null_as_default")]
    committers: Vec<String>,
    #[serde(default, deserialize_with = "opaque_text")]
    commit: String,
    #[serde(default, deserialize_with = "null_as_default")]
    steps: Vec<WireStep>,
    #[serde(default, deserialize_with = "null_as_default")]
    services: Vec<WireService>,
}

#[derive(Deserialize, Debug)]
struct WireStep {
    #[serde(default, deserialize_with = "opaque_text")]
    id: String,
    name: String,
    #[serde(default)]
    status: Status,
    #[serde(default, alias = "exitCode")]
    exitcode: Option<i32>,
    #[serde(default, alias = "log", deserialize_with = "opaque_text")]
    build: String,
}

#[derive(Deserialize, Debug)]
struct WireService {
    name: String,
    #[serde(default, deserialize_with = "opaque_text")]
    log: String,
}

impl WireRepo {
    fn into_repository(self) -> (Repository, Vec<WireBuild>) {
        let id = if self.id.is_empty() {
            format!("{}/{}", self.org, self.name)
        } else {
            self.id
        };
        let repo = Repository {
            id,
            org: self.org,
            name: self.name,
            url: self.url,
        };
        (repo, self.builds)
    }
}

impl WireBuild {
    fn into_build(self, repo_id: &RepoId, detail_loaded: bool) -> Build {
        let number = self
            .number
            .or_else(|| self.id.parse().ok())
            .unwrap_or_default();
        let id = if self.id.is_empty() {
            number.to_string()
        } else {
            self.id
        };
        let steps = self
            .steps
            .into_iter()
            .map(|s| s.into_step(&id))
            .collect();
        Build {
            id,
            number,
            repo_id: repo_id.clone(),
            timestamp: self.timestamp,
            coverage: self.coverage,
            duration: self.took,
            status: self.status,
            success: self.success,
            committers: self.committers,
            commit: self.commit,
            steps,
            services: self
                .services
                .into_iter()
                .map(|s| Service {
                    name: s.name,
                    output: LogBuffer::from_log(&s.log),
                })
                .collect(),
            detail_loaded,
            selected: false,
        }
    }
}

impl WireStep {
    fn into_step(self, build_id: &str) -> Step {
        let id = if self.id.is_empty() {
            self.name.clone()
        } else {
            self.id
        };
        Step {
            id,
            name: self.name,
            build_id: build_id.to_string(),
            status: self.status,
            exit_code: self.exitcode,
            output: LogBuffer::from_log(&self.build),
            selected: false,
        }
    }
}

// -- Public decoding API --

/// `GET /repos`
pub fn parse_repos(json: &str) -> EngineResult<Vec<Repository>> {
    check_response_size(json)?;
    let repos: Vec<WireRepo> = serde_json::from_str(json)?;
    Ok(repos
        .into_iter()
        .map(|r| r.into_repository().0)
        .collect())
}

/// `GET /repo/{org}/{name}`
pub fn parse_repo_detail(json: &str) -> EngineResult<RepositoryDetail> {
    check_response_size(json)?;
    let wire: WireRepo = serde_json::from_str(json)?;
    let (repository, builds) = wire.into_repository();
    let builds = builds
        .into_iter()
        .map(|b| b.into_build(&repository.id, false))
        .collect();
    Ok(RepositoryDetail { repository, builds })
}

/// `GET /repo/{org}/{name}/builds`
pub fn parse_builds(json: &str, repo_id: &RepoId) -> EngineResult<Vec<Build>> {
    check_response_size(json)?;
    let builds: Option<Vec<WireBuild>> = serde_json::from_str(json)?;
    Ok(builds
        .unwrap_or_default()
        .into_iter()
        .map(|b| b.into_build(repo_id, false))
        .collect())
}

/// `GET /repo/{org}/{name}/build/{id}`; the result carries steps with their full logs.
pub fn parse_build(json: &str, repo_id: &RepoId) -> EngineResult<Build> {
    check_response_size(json)?;
    let wire: WireBuild = serde_json::from_str(json)?;
    Ok(wire.into_build(repo_id, true))
}

/// One live log frame: `{"Step": <step name>, "Line": <text>}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "Step")]
    pub step: String,
    #[serde(rename = "Line")]
    pub line: String,
}

pub fn parse_log_event(frame: &str) -> EngineResult<LogEvent> {
    serde_json::from_str(frame).map_err(|e| EngineError::Decode(format!("log frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_repos_with_and_without_id() {
        let json = r#"[
            {"id": "1", "org": "acme", "name": "core"},
            {"organisation": "acme", "name": "web", "url": "https://github.com/acme/web"}
        ]"#;
        let repos = parse_repos(json).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].id, "1");
        assert_eq!(repos[0].slug(), "acme/core");
        assert_eq!(repos[1].id, "acme/web");
        assert_eq!(repos[1].url, "https://github.com/acme/web");
    }

    #[test]
    fn parse_builds_summaries() {
        let json = r#"[
            {"id": "b1", "status": "Running", "timestamp": "2024-01-01T00:00:00"},
            {"number": 41, "status": "done", "success": true, "coverage": 87.5,
             "took": "2m 3s", "committers": ["soren"], "commit": "abc123",
             "timestamp": "2023-12-31T23:00:00Z"}
        ]"#;
        let builds = parse_builds(json, &"1".to_string()).unwrap();
        assert_eq!(builds[0].id, "b1");
        assert_eq!(builds[0].status, Status::Running);
        assert_eq!(builds[0].repo_id, "1");
        assert!(!builds[0].detail_loaded);
        assert_eq!(builds[1].id, "41");
        assert_eq!(builds[1].number, 41);
        assert_eq!(builds[1].status, Status::Done);
        assert!(builds[1].success);
        assert_eq!(builds[1].coverage, "87.5");
        assert_eq!(builds[1].duration, "2m 3s");
        assert_eq!(builds[1].committers, vec!["soren".to_string()]);
    }

    #[test]
    fn parse_builds_accepts_null_list() {
        assert!(parse_builds("null", &"1".to_string()).unwrap().is_empty());
    }

    #[test]
    fn parse_build_detail_with_steps() {
        let json = r#"{
            "id": "b1", "number": 3, "status": "Running", "timestamp": "2024-01-01T00:00:00",
            "duration": "12s",
            "steps": [
                {"name": "checkout", "status": "Done", "exitcode": 0, "build": "cloned\n"},
                {"id": "s1", "name": "test", "status": "Running", "exitcode": null, "build": ""}
            ]
        }"#;
        let build = parse_build(json, &"1".to_string()).unwrap();
        assert!(build.detail_loaded);
        assert_eq!(build.duration, "12s");
        assert_eq!(build.steps.len(), 2);
        assert_eq!(build.steps[0].id, "checkout");
        assert_eq!(build.steps[0].build_id, "b1");
        assert_eq!(build.steps[0].exit_code, Some(0));
        assert_eq!(build.steps[0].output.visible_text(), "cloned\n");
        assert_eq!(build.steps[1].id, "s1");
        assert_eq!(build.steps[1].exit_code, None);
        assert!(build.steps[1].output.is_empty());
    }

    #[test]
    fn parse_build_services_and_null_list() {
        let json = r#"{
            "id": "b1", "status": "Done",
            "services": [{"name": "postgres", "log": "\u001b[32mready\u001b[0m\n"}]
        }"#;
        let build = parse_build(json, &"1".to_string()).unwrap();
        assert_eq!(build.services.len(), 1);
        assert_eq!(build.services[0].name, "postgres");
        assert_eq!(build.services[0].output.visible_text(), "ready\n");

        let bare = parse_build(r#"{"id": "b2", "services": null}"#, &"1".to_string()).unwrap();
        assert!(bare.services.is_empty());
    }

    #[test]
    fn parse_build_id_falls_back_to_number() {
        let build = parse_build(r#"{"number": 12, "status": "Done"}"#, &"r".to_string()).unwrap();
        assert_eq!(build.id, "12");
        assert!(build.steps.is_empty());
    }

    #[test]
    fn parse_repo_detail_carries_builds() {
        let json = r#"{"org": "acme", "name": "core", "url": "u",
            "builds": [{"number": 1, "status": "Done", "success": false}]}"#;
        let detail = parse_repo_detail(json).unwrap();
        assert_eq!(detail.repository.id, "acme/core");
        assert_eq!(detail.builds.len(), 1);
        assert_eq!(detail.builds[0].repo_id, "acme/core");
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = parse_repos("[{").unwrap_err();
        assert_eq!(err.error_code(), "engine.decode");
        let err = parse_build(r#"{"steps": [{"status": "Done"}]}"#, &"r".to_string()).unwrap_err();
        assert_eq!(err.error_code(), "engine.decode");
    }

    #[test]
    fn oversized_response_is_rejected() {
        let huge = " ".repeat(MAX_RESPONSE_SIZE + 1);
        assert!(matches!(parse_repos(&huge), Err(EngineError::Decode(_))));
    }

    #[test]
    fn log_event_shape() {
        let event = parse_log_event(r#"{"Step":"test","Line":"PASS\n"}"#).unwrap();
        assert_eq!(
            event,
            LogEvent {
                step: "test".into(),
                line: "PASS\n".into()
            }
        );
        assert!(parse_log_event(r#"{"step":"test","line":"x"}"#).is_err());
        assert!(parse_log_event("not json").is_err());
    }
}
