use sea_orm::{ConnectionTrait, QueryFilter, prelude::*, sea_query::Expr};
use tracing::error;

use crate::{Campaign, CampaignStatus, EngineError, ResultEngine, campaigns};

use super::Engine;

impl Engine {
    /// Return a campaign snapshot from DB.
    pub async fn campaign(&self, campaign_id: &str) -> ResultEngine<Campaign> {
        let model = campaigns::Entity::find_by_id(campaign_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;
        Campaign::try_from(model)
    }

    /// Add a completed donation's net amount to its campaign.
    ///
    /// Must run inside the transaction that moved the donation to `completed`:
    /// the increment is a single SQL expression, and a missing campaign aborts
    /// the caller's transaction.
    pub(super) async fn record_completed_donation<C: ConnectionTrait>(
        &self,
        db: &C,
        campaign_id: &str,
        amount_minor: i64,
    ) -> ResultEngine<()> {
        let res = campaigns::Entity::update_many()
            .col_expr(
                campaigns::Column::CurrentMinor,
                Expr::col(campaigns::Column::CurrentMinor).add(amount_minor),
            )
            .filter(campaigns::Column::Id.eq(campaign_id.to_string()))
            .exec(db)
            .await?;
        if res.rows_affected == 0 {
            error!(campaign_id = %campaign_id, "completed donation references a missing campaign");
            return Err(EngineError::CampaignNotFound(campaign_id.to_string()));
        }
        Ok(())
    }

    pub(super) async fn require_active_campaign<C: ConnectionTrait>(
        &self,
        db: &C,
        campaign_id: &str,
    ) -> ResultEngine<Campaign> {
        let model = campaigns::Entity::find_by_id(campaign_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;
        let campaign = Campaign::try_from(model)?;
        if campaign.status != CampaignStatus::Active {
            return Err(EngineError::CampaignInactive(format!(
                "{} is {}",
                campaign.id,
                campaign.status.as_str()
            )));
        }
        Ok(campaign)
    }
}
