use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_cart_items_table::Migration),
            Box::new(m20240101_000003_create_orders_table::Migration),
            Box::new(m20240101_000004_create_order_items_table::Migration),
            Box::new(m20240101_000005_create_payments_table::Migration),
            Box::new(m20240101_000006_create_payment_methods_table::Migration),
        ]
    }
}

// Tables owned by the catalog and identity systems. Created here so the
// service can run standalone and in tests.
mod m20240101_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CustomerProfiles::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CustomerProfiles::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerProfiles::Owner)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(CustomerProfiles::Email).string().not_null())
                        .col(ColumnDef::new(CustomerProfiles::ShippingAddress).text().null())
                        .col(ColumnDef::new(CustomerProfiles::BillingAddress).text().null())
                        .col(
                            ColumnDef::new(CustomerProfiles::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerProfiles::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShippingMethods::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShippingMethods::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShippingMethods::Name).string().not_null())
                        .col(ColumnDef::new(ShippingMethods::Description).text().null())
                        .col(
                            ColumnDef::new(ShippingMethods::Price)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShippingMethods::EstimatedDeliveryTime)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ShippingMethods::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShippingMethods::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CustomerProfiles::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Price,
        Stock,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CustomerProfiles {
        Table,
        Id,
        Owner,
        Email,
        ShippingAddress,
        BillingAddress,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ShippingMethods {
        Table,
        Id,
        Name,
        Description,
        Price,
        EstimatedDeliveryTime,
        IsActive,
    }
}

mod m20240101_000002_create_cart_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_cart_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // No foreign key to products: a product removed from the catalog
            // must leave the cart readable so the line can be shown as unavailable.
            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::Owner).string().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_cart_items_owner_product")
                        .table(CartItems::Table)
                        .col(CartItems::Owner)
                        .col(CartItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        Owner,
        ProductId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_orders_table"
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
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::Owner).string().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::BillingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingMethodId).uuid().null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Orders::Tax)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(
                            ColumnDef::new(Orders::IsPaid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_owner")
                        .table(Orders::Table)
                        .col(Orders::Owner)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        Owner,
        Status,
        ShippingAddress,
        BillingAddress,
        PaymentMethod,
        ShippingMethodId,
        Subtotal,
        Tax,
        ShippingCost,
        TotalAmount,
        Notes,
        IsPaid,
        PaidAt,
        PaymentReference,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_order_items_table {
    use super::m20240101_000003_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::Price).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(OrderItems::Discount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
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
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductName,
        Quantity,
        Price,
        Discount,
        CreatedAt,
    }
}

mod m20240101_000005_create_payments_table {
    use super::m20240101_000003_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Payments::OrderId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Payments::Currency).string().not_null())
                        .col(ColumnDef::new(Payments::Status).string().not_null())
                        .col(ColumnDef::new(Payments::TransactionId).string().null())
                        .col(
                            ColumnDef::new(Payments::PaymentReference)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::GatewayResponse).json().null())
                        .col(
                            ColumnDef::new(Payments::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_status")
                        .table(Payments::Table)
                        .col(Payments::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        PaymentMethod,
        Amount,
        Currency,
        Status,
        TransactionId,
        PaymentReference,
        GatewayResponse,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000006_create_payment_methods_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    const DEFAULT_METHODS: &[(&str, &str, &str)] = &[
        ("credit_card", "Card", "Visa, Mastercard and Verve cards"),
        ("paypal", "PayPal", "Pay with a PayPal balance"),
        ("bank_transfer", "Bank transfer", "Direct transfer to the store account"),
    ];

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_payment_methods_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentMethods::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentMethods::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentMethods::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PaymentMethods::Name).string().not_null())
                        .col(
                            ColumnDef::new(PaymentMethods::Description)
                                .text()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(PaymentMethods::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(PaymentMethods::AdditionalInfo).json().null())
                        .to_owned(),
                )
                .await?;

            let mut insert = Query::insert();
            insert.into_table(PaymentMethods::Table).columns([
                PaymentMethods::Id,
                PaymentMethods::Code,
                PaymentMethods::Name,
                PaymentMethods::Description,
                PaymentMethods::IsActive,
            ]);
            for (code, name, description) in DEFAULT_METHODS {
                insert
                    .values([
                        uuid::Uuid::new_v4().into(),
                        (*code).into(),
                        (*name).into(),
                        (*description).into(),
                        true.into(),
                    ])
                    .map_err(|e| DbErr::Migration(e.to_string()))?;
            }
            manager.exec_stmt(insert.to_owned()).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentMethods {
        Table,
        Id,
        Code,
        Name,
        Description,
        IsActive,
        AdditionalInfo,
    }
}
