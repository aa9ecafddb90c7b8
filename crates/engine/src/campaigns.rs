//! Campaigns table.
//!
//! Campaign content is managed elsewhere; the engine only reads `status` and
//! maintains `current_minor`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl TryFrom<&str> for CampaignStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(EngineError::InvalidState(format!(
                "unknown campaign status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub title: String,
    pub status: CampaignStatus,
    pub goal_minor: i64,
    /// Sum of net amounts of completed donations.
    pub current_minor: i64,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(id: String, title: String, goal_minor: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            status: CampaignStatus::Active,
            goal_minor,
            current_minor: 0,
            created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    pub status: String,
    pub goal_minor: i64,
    pub current_minor: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::donations::Entity")]
    Donations,
}

impl Related<super::donations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Donations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Campaign> for ActiveModel {
    fn from(value: &Campaign) -> Self {
        Self {
            id: ActiveValue::Set(value.id.clone()),
            title: ActiveValue::Set(value.title.clone()),
            status: ActiveValue::Set(value.status.as_str().to_string()),
            goal_minor: ActiveValue::Set(value.goal_minor),
            current_minor: ActiveValue::Set(value.current_minor),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for Campaign {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            title: model.title,
            status: CampaignStatus::try_from(model.status.as_str())?,
            goal_minor: model.goal_minor,
            current_minor: model.current_minor,
            created_at: model.created_at,
        })
    }
}
