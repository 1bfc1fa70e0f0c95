use regex::Regex;
use tracing::warn;
use url::{ParseError, Url};

use super::error::{PipelineError, PipelineResult};

/// `SS`, `MM:SS` or `HH:MM:SS`, each optionally with a fractional part.
const TIMESTAMP_PATTERN: &str = r"^(?:(?:\d+:)?\d{1,2}:)?\d+(?:\.\d+)?$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    url: Url,
    raw_url: String,
    trim: Option<TrimRange>,
}

impl PipelineRequest {
    /// Parses the command arguments. A URL typed without a scheme is read as
    /// `https://`. A single trim bound is ignored; the clip is only trimmed
    /// when both are given.
    pub fn parse(url: &str, start: Option<&str>, end: Option<&str>) -> PipelineResult<Self> {
        let raw_url = url.trim().to_string();
        let parsed = parse_url(&raw_url)?;
        let trim = match (non_empty(start), non_empty(end)) {
            (Some(start), Some(end)) => Some(TrimRange {
                start: validate_timestamp(start)?,
                end: validate_timestamp(end)?,
            }),
            (None, None) => None,
            (start, end) => {
                warn!(?start, ?end, "ignoring trim with a single bound");
                None
            }
        };
        Ok(Self {
            url: parsed,
            raw_url,
            trim,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL exactly as the user sent it; the logical name is derived from
    /// this form.
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn trim(&self) -> Option<&TrimRange> {
        self.trim.as_ref()
    }
}

fn parse_url(raw: &str) -> PipelineResult<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{raw}"))
            .map_err(|err| PipelineError::InvalidUrl(err.to_string())),
        Err(err) => Err(PipelineError::InvalidUrl(err.to_string())),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn validate_timestamp(value: &str) -> PipelineResult<String> {
    let valid = Regex::new(TIMESTAMP_PATTERN)
        .map(|pattern| pattern.is_match(value))
        .unwrap_or(false);
    if valid {
        Ok(value.to_string())
    } else {
        Err(PipelineError::InvalidTimestamp(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_bounds_make_a_trim_range() {
        let request =
            PipelineRequest::parse("https://example.org/v", Some("01:30"), Some("02:00")).unwrap();
        assert_eq!(
            request.trim(),
            Some(&TrimRange {
                start: "01:30".into(),
                end: "02:00".into()
            })
        );
    }

    #[test]
    fn single_bound_is_ignored() {
        let start_only = PipelineRequest::parse("https://example.org/v", Some("10"), None).unwrap();
        assert!(start_only.trim().is_none());
        let end_only = PipelineRequest::parse("https://example.org/v", None, Some("20")).unwrap();
        assert!(end_only.trim().is_none());
        let blank_start =
            PipelineRequest::parse("https://example.org/v", Some("  "), Some("20")).unwrap();
        assert!(blank_start.trim().is_none());
    }

    #[test]
    fn accepted_timestamp_forms() {
        for value in ["5", "90.5", "1:30", "01:30", "1:02:03", "01:02:03.250"] {
            assert!(validate_timestamp(value).is_ok(), "{value} should be accepted");
        }
        for value in ["abc", "1:", ":30", "-5", "01:30; rm -rf /"] {
            assert!(validate_timestamp(value).is_err(), "{value} should be rejected");
        }
    }

    #[test]
    fn malformed_timestamp_is_rejected_when_trimming() {
        let err = PipelineRequest::parse("https://example.org/v", Some("soon"), Some("later"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTimestamp(value) if value == "soon"));
    }

    #[test]
    fn unparseable_url_uses_original_wording() {
        let err = PipelineRequest::parse("not a url", None, None).unwrap_err();
        assert!(err.to_string().starts_with("could not parse url: "));
    }

    #[test]
    fn scheme_less_url_defaults_to_https() {
        let request = PipelineRequest::parse(" youtu.be/dQw4w9WgXcQ ", None, None).unwrap();
        assert_eq!(request.url().as_str(), "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(request.raw_url(), "youtu.be/dQw4w9WgXcQ");

        let watch = PipelineRequest::parse("youtube.com/watch?v=abc", None, None).unwrap();
        assert_eq!(watch.url().host_str(), Some("youtube.com"));
        assert_eq!(watch.url().query(), Some("v=abc"));
    }
}
