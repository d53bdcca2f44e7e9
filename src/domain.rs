use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::date::{UNKNOWN, normalize_year};
use crate::error::FeedError;

pub const UNTITLED: &str = "Untitled";

/// One normalized item from the source collection.
///
/// `year` is derived from `date` when the record is built and is never
/// recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub object_type: String,
    pub title: String,
    pub date: String,
    pub year: Option<i32>,
    pub place: String,
    pub artist: String,
    pub image_url: String,
}

impl Record {
    /// Builds a record from source fields, applying sentinels and deriving the year.
    pub fn from_source(fields: SourceFields) -> Self {
        let date = fields.date.unwrap_or_else(|| UNKNOWN.to_string());
        let year = normalize_year(&date);
        Self {
            id: fields.id.unwrap_or_default(),
            object_type: fields.object_type.unwrap_or_else(|| UNKNOWN.to_string()),
            title: fields.title.unwrap_or_else(|| UNTITLED.to_string()),
            date,
            year,
            place: fields.place.unwrap_or_else(|| UNKNOWN.to_string()),
            artist: fields.artist.unwrap_or_else(|| UNKNOWN.to_string()),
            image_url: fields.image_url.unwrap_or_default(),
        }
    }
}

/// Raw, possibly absent fields of one source item.
#[derive(Debug, Clone, Default)]
pub struct SourceFields {
    pub id: Option<String>,
    pub object_type: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub place: Option<String>,
    pub artist: Option<String>,
    pub image_url: Option<String>,
}

/// Inclusive, 1-based range of API pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    start: u32,
    end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Result<Self, FeedError> {
        if start == 0 || end < start {
            return Err(FeedError::InvalidPageRange(format!("{start}-{end}")));
        }
        Ok(Self { start, end })
    }

    pub fn single(page: u32) -> Result<Self, FeedError> {
        Self::new(page, page)
    }

    /// The first `count` pages.
    pub fn first(count: u32) -> Result<Self, FeedError> {
        Self::new(1, count)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn page_count(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PageRange {
    type Err = FeedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || FeedError::InvalidPageRange(value.to_string());
        let parse = |part: &str| part.trim().parse::<u32>().map_err(|_| invalid());
        let (start, end) = match trimmed.split_once("..").or_else(|| trimmed.split_once('-')) {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let page = parse(trimmed)?;
                (page, page)
            }
        };
        Self::new(start, end).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn record_defaults_to_sentinels() {
        let record = Record::from_source(SourceFields::default());
        assert_eq!(record.id, "");
        assert_eq!(record.title, "Untitled");
        assert_eq!(record.object_type, "Unknown");
        assert_eq!(record.date, "Unknown");
        assert_eq!(record.year, None);
        assert_eq!(record.image_url, "");
    }

    #[test]
    fn record_derives_year() {
        let record = Record::from_source(SourceFields {
            date: Some("1880-1910".to_string()),
            ..SourceFields::default()
        });
        assert_eq!(record.year, Some(1880));
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = Record::from_source(SourceFields::default());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("objectType").is_some());
        assert!(json.get("imageUrl").is_some());
        assert!(json["year"].is_null());
    }

    #[test]
    fn parse_page_ranges() {
        assert_eq!("3".parse::<PageRange>().unwrap(), PageRange::new(3, 3).unwrap());
        assert_eq!("2-5".parse::<PageRange>().unwrap(), PageRange::new(2, 5).unwrap());
        assert_eq!("2..5".parse::<PageRange>().unwrap().page_count(), 4);
    }

    #[test]
    fn reject_invalid_page_ranges() {
        assert_matches!("0".parse::<PageRange>(), Err(FeedError::InvalidPageRange(_)));
        assert_matches!("5-2".parse::<PageRange>(), Err(FeedError::InvalidPageRange(_)));
        assert_matches!("abc".parse::<PageRange>(), Err(FeedError::InvalidPageRange(_)));
    }
}
