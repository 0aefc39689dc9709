use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(KvEntry::Table)
                    .if_not_exists()
                    .col(string_len(KvEntry::Bucket, 64))
                    .col(string_len(KvEntry::Key, 512))
                    .col(text(KvEntry::Value))
                    .col(
                        timestamp_with_time_zone(KvEntry::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_kv_entry")
                            .col(KvEntry::Bucket)
                            .col(KvEntry::Key),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(KvEntry::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum KvEntry {
    Table,
    Bucket,
    Key,
    Value,
    UpdatedAt,
}
