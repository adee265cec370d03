use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{ScoreItem, DIARY_DATE_FORMAT};
use crate::providers::Fetcher;
use crate::snapshot::{ScoreMultiset, Snapshot};

pub const DEFAULT_DIARY_BASE_URL: &str = "https://sosh.mon-ra.ru/rest";

const USER_AGENT: &str = concat!("diary-grade-notifier/", env!("CARGO_PKG_VERSION"));

/// Authenticated diary session for one owner: the `sessionid` cookie plus the
/// upstream pupil id of each of their children.
#[derive(Clone)]
pub struct DiarySession {
    cookie: String,
    pupils: BTreeMap<i32, i64>,
}

impl DiarySession {
    pub fn new(cookie: impl Into<String>, pupils: BTreeMap<i32, i64>) -> Self {
        Self {
            cookie: cookie.into(),
            pupils,
        }
    }

    pub fn pupil_id(&self, child_index: i32) -> Option<i64> {
        self.pupils.get(&child_index).copied()
    }
}

impl fmt::Debug for DiarySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiarySession")
            .field("cookie", &"<redacted>")
            .field("pupils", &self.pupils)
            .finish()
    }
}

pub struct DiaryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiaryClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build diary HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for DiaryClient {
    async fn fetch(
        &self,
        session: &DiarySession,
        child_index: i32,
        today: NaiveDate,
    ) -> Result<Snapshot, FetchError> {
        let pupil_id = session.pupil_id(child_index).ok_or_else(|| {
            FetchError::Malformed(format!("no pupil registered for child {child_index}"))
        })?;
        let form = [
            ("pupil_id", pupil_id.to_string()),
            ("date", today.format(DIARY_DATE_FORMAT).to_string()),
            ("subject", String::new()),
        ];

        debug!(pupil_id, "requesting lessons_scores");
        let response = self
            .http
            .post(format!("{}/lessons_scores", self.base_url))
            .header(header::COOKIE, format!("sessionid={}", session.cookie))
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("bad status {status}")));
        }

        let body = response.text().await.map_err(transport_error)?;
        parse_lessons_scores(&body)
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::Malformed(err.to_string())
    } else {
        FetchError::Transient(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct LessonsScores {
    #[serde(default)]
    subperiod: Option<String>,
    #[serde(default)]
    data: Option<HashMap<String, Vec<ScoreEntry>>>,
}

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    date: String,
    #[serde(default)]
    marks: HashMap<String, Vec<String>>,
}

/// Normalizes a `lessons_scores` response body into a snapshot.
pub fn parse_lessons_scores(body: &str) -> Result<Snapshot, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| FetchError::Malformed(format!("response is not JSON: {err}")))?;

    if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
        return Err(FetchError::Malformed(format!("upstream error {error}")));
    }
    if value.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(FetchError::Malformed(
            "response is not marked successful".to_string(),
        ));
    }

    let scores: LessonsScores = serde_json::from_value(value)
        .map_err(|err| FetchError::Malformed(format!("unexpected lessons_scores shape: {err}")))?;

    let mut counts = ScoreMultiset::new();
    for (subject, entries) in scores.data.unwrap_or_default() {
        for entry in entries {
            let date = parse_diary_date(&entry.date)?;
            for (label, values) in entry.marks {
                for value in values {
                    counts.insert(ScoreItem::new(subject.clone(), date, label.clone(), value));
                }
            }
        }
    }

    Ok(Snapshot::new(counts, scores.subperiod))
}

pub fn parse_diary_date(raw: &str) -> Result<NaiveDate, FetchError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DIARY_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| FetchError::Malformed(format!("unrecognised date {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;

    fn sept(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
    }

    #[test]
    fn normalizes_scores_with_multiplicity() {
        let body = r#"{
            "success": true,
            "subperiod": "1 четверть",
            "data": {
                "Math": [
                    {"date": "01.09.2024", "marks": {"HW1": ["5", "5", "4"]}},
                    {"date": "2024-09-03", "marks": {"Test": ["3"]}}
                ],
                "Art": [{"date": "02.09.2024", "marks": {}}]
            }
        }"#;

        let snapshot = parse_lessons_scores(body).unwrap();
        assert_eq!(snapshot.period_label(), Some("1 четверть"));
        assert_eq!(
            snapshot
                .counts()
                .count(&ScoreItem::new("Math", sept(1), "HW1", "5")),
            2
        );
        assert_eq!(
            snapshot
                .counts()
                .count(&ScoreItem::new("Math", sept(3), "Test", "3")),
            1
        );
        assert_eq!(snapshot.counts().len(), 4);
    }

    #[test]
    fn null_data_is_an_empty_snapshot() {
        let snapshot =
            parse_lessons_scores(r#"{"success": true, "kind": "Каникулы", "subperiod": null, "data": null}"#)
                .unwrap();
        assert!(snapshot.counts().is_empty());
        assert_eq!(snapshot.period_label(), None);
    }

    #[test]
    fn upstream_error_is_malformed() {
        let err = parse_lessons_scores(r#"{"error": "Произошла непредвиденная ошибка"}"#).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }

    #[test]
    fn unsuccessful_response_is_malformed() {
        let err = parse_lessons_scores(r#"{"success": false}"#).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = parse_lessons_scores("<html>maintenance</html>").unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let err = parse_lessons_scores(r#"{"success": true, "data": {"Math": "5"}}"#).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }

    #[test]
    fn bad_date_is_malformed() {
        let body = r#"{"success": true, "data": {"Math": [{"date": "yesterday", "marks": {"HW": ["5"]}}]}}"#;
        let err = parse_lessons_scores(body).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }

    #[test]
    fn session_debug_hides_cookie() {
        let session = DiarySession::new("secret-cookie", BTreeMap::from([(0, 4242)]));
        assert_eq!(session.pupil_id(0), Some(4242));
        assert_eq!(session.pupil_id(1), None);
        assert!(!format!("{session:?}").contains("secret-cookie"));
    }
}
