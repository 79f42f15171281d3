use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::Set;

use crate::entities::workers;
use crate::Result;

impl workers::Model {
    /// Idempotent upsert keyed on `(puid, worker_id)`; name and agent are
    /// last-write-wins.
    #[tracing::instrument(skip(db))]
    pub async fn upsert(
        db: &impl ConnectionTrait,
        puid: i32,
        worker_id: i64,
        name: &str,
        agent: &str,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        let record = workers::ActiveModel {
            puid: Set(puid),
            worker_id: Set(worker_id),
            name: Set(name.to_owned()),
            agent: Set(agent.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        workers::Entity::insert(record)
            .on_conflict(
                OnConflict::columns([workers::Column::Puid, workers::Column::WorkerId])
                    .update_columns([
                        workers::Column::Name,
                        workers::Column::Agent,
                        workers::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        Ok(())
    }

    pub async fn find(
        db: &impl ConnectionTrait,
        puid: i32,
        worker_id: i64,
    ) -> Result<Option<workers::Model>> {
        Ok(workers::Entity::find_by_id((puid, worker_id)).one(db).await?)
    }
}
