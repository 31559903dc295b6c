use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Registered OAuth2 clients
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Client::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Client::Secret))
                    .col(string_null(Client::Name))
                    .col(
                        text(Client::RedirectUris)
                            .comment("JSON array of registered redirect URIs"),
                    )
                    .col(
                        timestamp_with_time_zone(Client::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Client::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Client {
    Table,
    Id,
    Secret,
    Name,
    RedirectUris,
    CreatedAt,
}
