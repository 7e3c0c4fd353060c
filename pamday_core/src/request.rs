use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::error::ConfigurationError;

/// The day to process and where its inputs live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DayRequest {
    date: NaiveDate,
    json_base_dir: PathBuf,
    audio_base_dir: Option<PathBuf>,
    audio_path_prefix: String,
}

impl DayRequest {
    /// Build a request, rejecting dates that do not exist on the calendar.
    pub fn new<P: Into<PathBuf>>(
        year: i32,
        month: u32,
        day: u32,
        json_base_dir: P,
        audio_base_dir: Option<PathBuf>,
        audio_path_prefix: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(ConfigurationError::InvalidDate { year, month, day })?;

        Ok(Self {
            date,
            json_base_dir: json_base_dir.into(),
            audio_base_dir,
            audio_path_prefix: audio_path_prefix.into(),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn json_base_dir(&self) -> &Path {
        &self.json_base_dir
    }

    pub fn audio_base_dir(&self) -> Option<&Path> {
        self.audio_base_dir.as_deref()
    }

    pub fn audio_path_prefix(&self) -> &str {
        &self.audio_path_prefix
    }

    /// Midnight UTC at the start of the requested day.
    pub fn day_start(&self) -> DateTime<Utc> {
        self.date.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Midnight UTC at the start of the following day (exclusive bound).
    pub fn day_end(&self) -> DateTime<Utc> {
        let next = self
            .date
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX);
        next.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Whether `instant` falls in `[day_start, day_end)`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.day_start() && instant < self.day_end()
    }

    /// Apply the audio path prefix to `path`.
    ///
    /// The prefix is prepended verbatim so that absolute paths can be
    /// relocated under a mount point, e.g. `/Volumes` + `/PAM_Archive/x.wav`.
    pub fn prefixed(&self, path: &Path) -> PathBuf {
        prefix_path(&self.audio_path_prefix, path)
    }

    /// The directory scanned for audio recordings, with the prefix applied.
    pub fn audio_search_dir(&self) -> Option<PathBuf> {
        self.audio_base_dir.as_deref().map(|dir| self.prefixed(dir))
    }
}

/// Where the inputs of every day live.
///
/// Turns a calendar date into a [`DayRequest`] for the same layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputLayout {
    pub json_base_dir: PathBuf,
    pub audio_base_dir: Option<PathBuf>,
    pub audio_path_prefix: String,
}

impl InputLayout {
    pub fn new<P: Into<PathBuf>>(json_base_dir: P) -> Self {
        Self {
            json_base_dir: json_base_dir.into(),
            audio_base_dir: None,
            audio_path_prefix: String::new(),
        }
    }

    pub fn audio_base_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.audio_base_dir = Some(dir.into());
        self
    }

    pub fn audio_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.audio_path_prefix = prefix.into();
        self
    }

    pub fn request(&self, year: i32, month: u32, day: u32) -> Result<DayRequest, ConfigurationError> {
        DayRequest::new(
            year,
            month,
            day,
            self.json_base_dir.clone(),
            self.audio_base_dir.clone(),
            self.audio_path_prefix.clone(),
        )
    }
}

pub(crate) fn prefix_path(prefix: &str, path: &Path) -> PathBuf {
    if prefix.is_empty() {
        return path.to_path_buf();
    }
    let mut joined = std::ffi::OsString::from(prefix);
    joined.push(path.as_os_str());
    PathBuf::from(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(prefix: &str) -> DayRequest {
        DayRequest::new(2022, 9, 2, "json", Some(PathBuf::from("/PAM/wav")), prefix).unwrap()
    }

    #[test]
    fn rejects_impossible_dates() {
        let err = DayRequest::new(2022, 2, 30, "json", None, "").unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidDate {
                year: 2022,
                month: 2,
                day: 30
            }
        ));
        assert!(DayRequest::new(2022, 13, 1, "json", None, "").is_err());
    }

    #[test]
    fn day_bounds_are_half_open() {
        let req = request("");
        assert_eq!(
            req.day_start(),
            Utc.with_ymd_and_hms(2022, 9, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(
            req.day_end(),
            Utc.with_ymd_and_hms(2022, 9, 3, 0, 0, 0).unwrap()
        );
        assert!(req.contains(req.day_start()));
        assert!(!req.contains(req.day_end()));
    }

    #[test]
    fn day_end_rolls_over_month_and_year() {
        let req = DayRequest::new(2022, 12, 31, "json", None, "").unwrap();
        assert_eq!(
            req.day_end(),
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn layout_builds_requests_for_any_day() {
        let layout = InputLayout::new("json")
            .audio_base_dir("/PAM/wav")
            .audio_path_prefix("/Volumes");
        let req = layout.request(2022, 9, 2).unwrap();
        assert_eq!(req, request("/Volumes"));
        assert!(layout.request(2022, 9, 31).is_err());
    }

    #[test]
    fn prefix_is_prepended_verbatim() {
        assert_eq!(
            request("/Volumes").audio_search_dir(),
            Some(PathBuf::from("/Volumes/PAM/wav"))
        );
        assert_eq!(
            request("").audio_search_dir(),
            Some(PathBuf::from("/PAM/wav"))
        );
    }
}
