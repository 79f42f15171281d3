use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Worker::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Worker::Puid).integer().not_null())
                    .col(ColumnDef::new(Worker::WorkerId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Worker::Name)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Worker::Agent)
                            .string_len(30)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Worker::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Worker::UpdatedAt).timestamp().not_null())
                    .primary_key(
                        Index::create()
                            .col(Worker::Puid)
                            .col(Worker::WorkerId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WorkerIndex::Name.to_string())
                    .table(Worker::Table)
                    .col(Worker::Name)
                    .take(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WorkerIndex::UpdatedAt.to_string())
                    .table(Worker::Table)
                    .col(Worker::UpdatedAt)
                    .take(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Worker::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Worker {
    #[sea_orm(iden = "workers")]
    Table,
    Puid,
    WorkerId,
    Name,
    Agent,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum WorkerIndex {
    #[sea_orm(iden = "idx_workers_name")]
    Name,
    #[sea_orm(iden = "idx_workers_updated_at")]
    UpdatedAt,
}
