//! Repository rows: the per-line record carried from a staged CSV into storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntakeError;

/// One CSV record as read from the staged file. Every column is optional so
/// that validation can name the missing field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub stars: Option<String>,
}

/// A validated row, ready to become a stored [`Repo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRepo {
    pub github_id: Option<i64>,
    pub name: String,
    pub owner: String,
    pub stars: i64,
}

impl TryFrom<RawRow> for NewRepo {
    type Error = IntakeError;

    /// Numeric fields must parse exactly; a bad value rejects the row rather
    /// than being stored as zero.
    fn try_from(raw: RawRow) -> Result<Self, Self::Error> {
        let name = required_text(raw.name, "name")?;
        let owner = required_text(raw.owner, "owner")?;

        let stars_raw = required_text(raw.stars, "stars")?;
        let stars = parse_integer(&stars_raw, "stars")?;

        let github_id = match raw.id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(v) => Some(parse_integer(v, "id")?),
        };

        Ok(Self {
            github_id,
            name,
            owner,
            stars,
        })
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, IntakeError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(IntakeError::InvalidRow(format!("missing {field}"))),
    }
}

fn parse_integer(value: &str, field: &str) -> Result<i64, IntakeError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| IntakeError::InvalidRow(format!("{field} is not an integer: {value:?}")))
}

/// Stored repository record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub id: i64,
    pub github_id: Option<i64>,
    pub name: String,
    pub owner: String,
    pub stars: i64,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, owner: &str, stars: &str) -> RawRow {
        RawRow {
            id: None,
            name: Some(name.into()),
            owner: Some(owner.into()),
            stars: Some(stars.into()),
        }
    }

    #[test]
    fn well_formed_row_converts_exactly() {
        let repo = NewRepo::try_from(raw("r1", "o1", "42")).unwrap();
        assert_eq!(
            repo,
            NewRepo {
                github_id: None,
                name: "r1".into(),
                owner: "o1".into(),
                stars: 42
            }
        );
    }

    #[test]
    fn non_numeric_stars_rejected_not_zeroed() {
        let err = NewRepo::try_from(raw("r1", "o1", "lots")).unwrap_err();
        assert!(matches!(err, IntakeError::InvalidRow(ref m) if m.contains("stars")));
    }

    #[test]
    fn negative_stars_kept_as_parsed() {
        let repo = NewRepo::try_from(raw("r1", "o1", "-3")).unwrap();
        assert_eq!(repo.stars, -3);
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(NewRepo::try_from(raw("r1", "o1", "42abc")).is_err());
        assert!(NewRepo::try_from(raw("r1", "o1", "4.2")).is_err());
    }

    #[test]
    fn surrounding_whitespace_tolerated() {
        let repo = NewRepo::try_from(raw(" r1 ", "o1", " 7 ")).unwrap();
        assert_eq!(repo.name, "r1");
        assert_eq!(repo.stars, 7);
    }

    #[test]
    fn missing_owner_rejected() {
        let mut row = raw("r1", "", "1");
        row.owner = None;
        assert!(NewRepo::try_from(row).is_err());
    }

    #[test]
    fn optional_github_id_must_be_numeric_when_present() {
        let mut row = raw("r1", "o1", "1");
        row.id = Some("123".into());
        assert_eq!(NewRepo::try_from(row.clone()).unwrap().github_id, Some(123));

        row.id = Some("abc".into());
        assert!(NewRepo::try_from(row).is_err());
    }
}
