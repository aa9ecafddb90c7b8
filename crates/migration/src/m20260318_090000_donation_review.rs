use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Donations {
    Table,
    NeedsReview,
    ReviewNote,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // SQLite accepts a single column change per ALTER TABLE.
        manager
            .alter_table(
                Table::alter()
                    .table(Donations::Table)
                    .add_column(
                        ColumnDef::new(Donations::NeedsReview)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Donations::Table)
                    .add_column(ColumnDef::new(Donations::ReviewNote).string())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Donations::Table)
                    .drop_column(Donations::ReviewNote)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Donations::Table)
                    .drop_column(Donations::NeedsReview)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
