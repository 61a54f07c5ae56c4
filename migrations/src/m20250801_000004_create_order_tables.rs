use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250801_000004_create_order_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Orders::OrderNumber)
                            .string_len(20)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                    .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                    .col(
                        ColumnDef::new(Orders::PaymentStatus)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Orders::PaymentMethod).string_len(20).null())
                    .col(ColumnDef::new(Orders::Subtotal).decimal_len(19, 4).not_null())
                    .col(ColumnDef::new(Orders::Tax).decimal_len(19, 4).not_null())
                    .col(ColumnDef::new(Orders::Shipping).decimal_len(19, 4).not_null())
                    .col(ColumnDef::new(Orders::Total).decimal_len(19, 4).not_null())
                    .col(
                        ColumnDef::new(Orders::Currency)
                            .string_len(3)
                            .not_null()
                            .default("usd"),
                    )
                    .col(
                        ColumnDef::new(Orders::GatewayPaymentId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::GatewayCustomerId)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(Orders::ReceiptUrl).string_len(1024).null())
                    .col(ColumnDef::new(Orders::ShippingAddress).json().null())
                    .col(ColumnDef::new(Orders::BillingAddress).json().null())
                    .col(
                        ColumnDef::new(Orders::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::RefundedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(OrderItems::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(OrderItems::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(OrderItems::UnitPrice)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(OrderItems::VariantName)
                            .string_len(100)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OrderItems::VariantValue)
                            .string_len(100)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OrderItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_items_order")
                            .from(OrderItems::Table, OrderItems::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderStatusHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderStatusHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OrderStatusHistory::OrderId).uuid().not_null())
                    .col(
                        ColumnDef::new(OrderStatusHistory::Status)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderStatusHistory::Notes).text().null())
                    .col(ColumnDef::new(OrderStatusHistory::ChangedBy).uuid().null())
                    .col(
                        ColumnDef::new(OrderStatusHistory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_status_history_order")
                            .from(OrderStatusHistory::Table, OrderStatusHistory::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderSequences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderSequences::Day)
                            .string_len(8)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OrderSequences::Counter)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderSequences::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderStatusHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Orders {
    Table,
    Id,
    OrderNumber,
    UserId,
    Status,
    PaymentStatus,
    PaymentMethod,
    Subtotal,
    Tax,
    Shipping,
    Total,
    Currency,
    GatewayPaymentId,
    GatewayCustomerId,
    ReceiptUrl,
    ShippingAddress,
    BillingAddress,
    DeliveredAt,
    CancelledAt,
    RefundedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum OrderItems {
    Table,
    Id,
    OrderId,
    ProductId,
    Name,
    UnitPrice,
    Quantity,
    VariantName,
    VariantValue,
    CreatedAt,
}

#[derive(Iden)]
enum OrderStatusHistory {
    Table,
    Id,
    OrderId,
    Status,
    Notes,
    ChangedBy,
    CreatedAt,
}

#[derive(Iden)]
enum OrderSequences {
    Table,
    Day,
    Counter,
}
