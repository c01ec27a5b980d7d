use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::constants::{MAX_NAME_CHARS, has_content, is_valid_coordinate};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Seeker,
    Helper,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Seeker => "seeker",
            Role::Helper => "helper",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seeker" => Ok(Role::Seeker),
            "helper" => Ok(Role::Helper),
            other => Err(CoreError::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// A point on the globe in degrees. Profiles hold `Option<Location>`; a
/// missing location is never represented as (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> CoreResult<Self> {
        let location = Self { latitude, longitude };
        location.validate()?;
        Ok(location)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if is_valid_coordinate(self.latitude, self.longitude) {
            Ok(())
        } else {
            Err(CoreError::validation(format!(
                "coordinates out of range: ({}, {})",
                self.latitude, self.longitude
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub gender: Option<String>,
    pub languages: Vec<String>,
    pub location: Option<Location>,
    pub is_available: bool,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn presence(&self) -> UserPresence {
        UserPresence {
            user_id: self.id,
            role: self.role,
            is_available: self.is_available,
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }

    pub fn speaks(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }
}

/// The connectivity slice of a profile that presence subscribers care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: Uuid,
    pub role: Role,
    pub is_available: bool,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Registration data. The id comes from the identity provider.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub gender: Option<String>,
    pub languages: Vec<String>,
    pub location: Option<Location>,
}

impl NewProfile {
    pub fn validate(&self) -> CoreResult<()> {
        if !has_content(&self.name) {
            return Err(CoreError::validation("name must not be empty"));
        }
        if self.name.chars().count() > MAX_NAME_CHARS {
            return Err(CoreError::validation(format!(
                "name exceeds {} characters",
                MAX_NAME_CHARS
            )));
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }

    /// Builds the stored record. Every account starts offline and seekers are
    /// never available.
    pub fn into_profile(self, now: DateTime<Utc>) -> Profile {
        Profile {
            id: self.id,
            name: self.name.trim().to_string(),
            role: self.role,
            gender: self.gender.filter(|g| has_content(g)),
            languages: self.languages,
            location: self.location,
            is_available: false,
            is_online: false,
            last_seen: now,
            created_at: now,
        }
    }
}

/// A single owner-initiated change to a profile's presence fields. Every
/// patch refreshes `last_seen`, which is what subscribers order by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresencePatch {
    Online(bool),
    Available(bool),
    Location(Option<Location>),
}

impl PresencePatch {
    pub fn apply(&self, profile: &mut Profile, now: DateTime<Utc>) {
        match *self {
            PresencePatch::Online(online) => profile.is_online = online,
            PresencePatch::Available(available) => {
                profile.is_available = available && profile.role == Role::Helper
            }
            PresencePatch::Location(location) => profile.location = location,
        }
        profile.last_seen = now;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileFilter {
    pub user_id: Option<Uuid>,
    pub role: Option<Role>,
}

impl ProfileFilter {
    pub fn helpers() -> Self {
        Self { user_id: None, role: Some(Role::Helper) }
    }

    pub fn matches(&self, profile: &Profile) -> bool {
        self.user_id.is_none_or(|id| id == profile.id)
            && self.role.is_none_or(|role| role == profile.role)
    }
}

/// Row shape of the `profiles` table.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub gender: Option<String>,
    pub languages: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_available: bool,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = CoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location { latitude, longitude }),
            _ => None,
        };

        Ok(Profile {
            id: row.id,
            name: row.name,
            role: row.role.parse()?,
            gender: row.gender,
            languages: row.languages,
            location,
            is_available: row.is_available,
            is_online: row.is_online,
            last_seen: row.last_seen,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_profile(role: Role) -> NewProfile {
        NewProfile {
            id: Uuid::new_v4(),
            name: "  Asha ".to_string(),
            role,
            gender: Some("".to_string()),
            languages: vec!["Hindi".to_string(), "English".to_string()],
            location: None,
        }
    }

    #[test]
    fn test_location_rejects_out_of_range() {
        assert!(Location::new(19.07, 72.87).is_ok());
        assert!(Location::new(91.0, 0.0).is_err());
        assert!(Location::new(0.0, -180.5).is_err());
        assert!(Location::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_into_profile_starts_offline_and_trims() {
        let profile = new_profile(Role::Helper).into_profile(Utc::now());
        assert_eq!(profile.name, "Asha");
        assert_eq!(profile.gender, None);
        assert!(!profile.is_online);
        assert!(!profile.is_available);
        assert!(profile.speaks("english"));
    }

    #[test]
    fn test_available_patch_ignored_for_seekers() {
        let now = Utc::now();
        let mut seeker = new_profile(Role::Seeker).into_profile(now);
        PresencePatch::Available(true).apply(&mut seeker, now);
        assert!(!seeker.is_available);

        let mut helper = new_profile(Role::Helper).into_profile(now);
        PresencePatch::Available(true).apply(&mut helper, now);
        assert!(helper.is_available);
    }

    #[test]
    fn test_row_without_both_coordinates_has_no_location() {
        let now = Utc::now();
        let row = ProfileRow {
            id: Uuid::new_v4(),
            name: "Ravi".to_string(),
            role: "helper".to_string(),
            gender: None,
            languages: vec![],
            latitude: Some(19.0),
            longitude: None,
            is_available: true,
            is_online: true,
            last_seen: now,
            created_at: now,
        };
        let profile = Profile::try_from(row).unwrap();
        assert_eq!(profile.location, None);
        assert_eq!(profile.role, Role::Helper);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut payload = new_profile(Role::Seeker);
        payload.name = "   ".to_string();
        assert!(matches!(payload.validate(), Err(CoreError::Validation(_))));
    }
}
