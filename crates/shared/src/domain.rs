use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_newtype!(LocationId);
id_newtype!(NotificationId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Town,
    City,
    #[serde(rename = "County/Region")]
    CountyRegion,
    Country,
    Continent,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Town,
        Category::City,
        Category::CountyRegion,
        Category::Country,
        Category::Continent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Town => "Town",
            Category::City => "City",
            Category::CountyRegion => "County/Region",
            Category::Country => "Country",
            Category::Continent => "Continent",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown location category '{0}' (expected one of Town, City, County/Region, Country, Continent)")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Category::ALL
            .into_iter()
            .find(|category| {
                category.as_str().eq_ignore_ascii_case(trimmed)
                    || (*category == Category::CountyRegion
                        && (trimmed.eq_ignore_ascii_case("county")
                            || trimmed.eq_ignore_ascii_case("region")))
            })
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// The form data a user submits to create a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLocation {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub description: String,
}

/// A create command once the backend has accepted it and assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLocationCommand {
    pub id: LocationId,
    pub name: String,
    pub category: Category,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl CreateLocationCommand {
    pub fn accept(payload: CreateLocation, id: LocationId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: payload.name,
            category: payload.category,
            description: payload.description,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl Action {
    pub fn redirect(location_id: LocationId) -> Self {
        Self {
            kind: "redirect".into(),
            data: serde_json::Value::String(format!("./{location_id}")),
        }
    }
}

/// Confirmation emitted once a command has been processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<LocationId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Notification {
    pub fn new(correlation_id: Option<LocationId>) -> Self {
        Self {
            id: NotificationId::new_v4(),
            correlation_id,
            created_at: Utc::now(),
            errors: Vec::new(),
            actions: Vec::new(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
