use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_recipe_tables::Migration),
            Box::new(m20240301_000002_create_finished_goods_tables::Migration),
            Box::new(m20240301_000003_create_wip_tables::Migration),
            Box::new(m20240301_000004_create_purchase_order_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_recipe_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_recipe_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Recipes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Recipes::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Recipes::Name).string().not_null())
                        .col(ColumnDef::new(Recipes::YieldQuantity).decimal().null())
                        .col(ColumnDef::new(Recipes::YieldUnit).string().null())
                        .col(
                            ColumnDef::new(Recipes::IsSoldProduct)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Recipes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Recipes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryItems::Name).string().not_null())
                        .col(ColumnDef::new(InventoryItems::Unit).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::QuantityOnHand)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::QuantityAllocated)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryItems::LinkedRecipeId).integer().null())
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_items_linked_recipe_id")
                                .from(InventoryItems::Table, InventoryItems::LinkedRecipeId)
                                .to(Recipes::Table, Recipes::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Ingredients::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Ingredients::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Ingredients::RecipeId).integer().not_null())
                        .col(ColumnDef::new(Ingredients::InventoryItemId).integer().null())
                        .col(ColumnDef::new(Ingredients::SubRecipeId).integer().null())
                        .col(ColumnDef::new(Ingredients::Quantity).decimal().not_null())
                        .col(ColumnDef::new(Ingredients::Unit).string().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_ingredients_recipe_id")
                                .from(Ingredients::Table, Ingredients::RecipeId)
                                .to(Recipes::Table, Recipes::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_ingredients_inventory_item_id")
                                .from(Ingredients::Table, Ingredients::InventoryItemId)
                                .to(InventoryItems::Table, InventoryItems::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_ingredients_sub_recipe_id")
                                .from(Ingredients::Table, Ingredients::SubRecipeId)
                                .to(Recipes::Table, Recipes::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_ingredients_recipe_id")
                        .table(Ingredients::Table)
                        .col(Ingredients::RecipeId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryAdjustments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryAdjustments::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryAdjustments::InventoryItemId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryAdjustments::AdjustmentQuantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryAdjustments::NewQuantityOnHand)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryAdjustments::Reason).string().not_null())
                        .col(
                            ColumnDef::new(InventoryAdjustments::PurchaseOrderId)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryAdjustments::WipBatchId).integer().null())
                        .col(
                            ColumnDef::new(InventoryAdjustments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_adjustments_item_id")
                                .from(
                                    InventoryAdjustments::Table,
                                    InventoryAdjustments::InventoryItemId,
                                )
                                .to(InventoryItems::Table, InventoryItems::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_adjustments_item_created")
                        .table(InventoryAdjustments::Table)
                        .col(InventoryAdjustments::InventoryItemId)
                        .col(InventoryAdjustments::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryAdjustments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Ingredients::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Recipes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Recipes {
        Table,
        Id,
        Name,
        YieldQuantity,
        YieldUnit,
        IsSoldProduct,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum InventoryItems {
        Table,
        Id,
        Name,
        Unit,
        QuantityOnHand,
        QuantityAllocated,
        LinkedRecipeId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Ingredients {
        Table,
        Id,
        RecipeId,
        InventoryItemId,
        SubRecipeId,
        Quantity,
        Unit,
    }

    #[derive(DeriveIden)]
    enum InventoryAdjustments {
        Table,
        Id,
        InventoryItemId,
        AdjustmentQuantity,
        NewQuantityOnHand,
        Reason,
        PurchaseOrderId,
        WipBatchId,
        CreatedAt,
    }
}

mod m20240301_000002_create_finished_goods_tables {
    use super::m20240301_000001_create_recipe_tables::Recipes;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_finished_goods_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Locations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Locations::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Locations::Name)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::RecipeId).integer().not_null())
                        .col(
                            ColumnDef::new(Products::Sku)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::ProductName).string().not_null())
                        .col(ColumnDef::new(Products::JarsPerBatch).decimal().null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_recipe_id")
                                .from(Products::Table, Products::RecipeId)
                                .to(Recipes::Table, Recipes::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockMinimums::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMinimums::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockMinimums::ProductId).integer().not_null())
                        .col(ColumnDef::new(StockMinimums::LocationId).integer().not_null())
                        .col(
                            ColumnDef::new(StockMinimums::MinJars)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_minimums_product_id")
                                .from(StockMinimums::Table, StockMinimums::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_minimums_location_id")
                                .from(StockMinimums::Table, StockMinimums::LocationId)
                                .to(Locations::Table, Locations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_minimums_product_location")
                        .table(StockMinimums::Table)
                        .col(StockMinimums::ProductId)
                        .col(StockMinimums::LocationId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(LocationStock::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LocationStock::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(LocationStock::ProductId).integer().not_null())
                        .col(ColumnDef::new(LocationStock::LocationId).integer().not_null())
                        .col(
                            ColumnDef::new(LocationStock::Quantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(LocationStock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_location_stock_product_id")
                                .from(LocationStock::Table, LocationStock::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_location_stock_location_id")
                                .from(LocationStock::Table, LocationStock::LocationId)
                                .to(Locations::Table, Locations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_location_stock_product_location")
                        .table(LocationStock::Table)
                        .col(LocationStock::ProductId)
                        .col(LocationStock::LocationId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LocationStock::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockMinimums::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Locations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Locations {
        Table,
        Id,
        Name,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        RecipeId,
        Sku,
        ProductName,
        JarsPerBatch,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum StockMinimums {
        Table,
        Id,
        ProductId,
        LocationId,
        MinJars,
    }

    #[derive(DeriveIden)]
    enum LocationStock {
        Table,
        Id,
        ProductId,
        LocationId,
        Quantity,
        UpdatedAt,
    }
}

mod m20240301_000003_create_wip_tables {
    use super::m20240301_000001_create_recipe_tables::{InventoryItems, Recipes};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_wip_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WipBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WipBatches::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(WipBatches::RecipeId).integer().not_null())
                        .col(ColumnDef::new(WipBatches::BatchType).string().not_null())
                        .col(ColumnDef::new(WipBatches::Status).string().not_null())
                        .col(ColumnDef::new(WipBatches::ProductId).integer().null())
                        .col(ColumnDef::new(WipBatches::LocationId).integer().null())
                        .col(ColumnDef::new(WipBatches::InventoryItemId).integer().null())
                        .col(ColumnDef::new(WipBatches::TargetQuantity).decimal().null())
                        .col(ColumnDef::new(WipBatches::ActualYield).decimal().null())
                        .col(ColumnDef::new(WipBatches::ActualYieldUnit).string().null())
                        .col(
                            ColumnDef::new(WipBatches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WipBatches::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wip_batches_recipe_id")
                                .from(WipBatches::Table, WipBatches::RecipeId)
                                .to(Recipes::Table, Recipes::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wip_batches_status")
                        .table(WipBatches::Table)
                        .col(WipBatches::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WipAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WipAllocations::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(WipAllocations::WipBatchId).integer().not_null())
                        .col(
                            ColumnDef::new(WipAllocations::InventoryItemId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WipAllocations::QuantityAllocated)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WipAllocations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WipAllocations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wip_allocations_batch_id")
                                .from(WipAllocations::Table, WipAllocations::WipBatchId)
                                .to(WipBatches::Table, WipBatches::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wip_allocations_item_id")
                                .from(WipAllocations::Table, WipAllocations::InventoryItemId)
                                .to(InventoryItems::Table, InventoryItems::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wip_allocations_batch_item")
                        .table(WipAllocations::Table)
                        .col(WipAllocations::WipBatchId)
                        .col(WipAllocations::InventoryItemId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WipAllocations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(WipBatches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WipBatches {
        Table,
        Id,
        RecipeId,
        BatchType,
        Status,
        ProductId,
        LocationId,
        InventoryItemId,
        TargetQuantity,
        ActualYield,
        ActualYieldUnit,
        CreatedAt,
        CompletedAt,
    }

    #[derive(DeriveIden)]
    enum WipAllocations {
        Table,
        Id,
        WipBatchId,
        InventoryItemId,
        QuantityAllocated,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_purchase_order_tables {
    use super::m20240301_000001_create_recipe_tables::InventoryItems;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_purchase_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::SupplierName).string().null())
                        .col(ColumnDef::new(PurchaseOrders::Status).string().not_null())
                        .col(ColumnDef::new(PurchaseOrders::OrderDate).date().null())
                        .col(ColumnDef::new(PurchaseOrders::Notes).text().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::ReceivedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::PurchaseOrderId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::InventoryItemId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::QuantityOrdered)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderItems::UnitCost).decimal().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_order_id")
                                .from(
                                    PurchaseOrderItems::Table,
                                    PurchaseOrderItems::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_item_id")
                                .from(
                                    PurchaseOrderItems::Table,
                                    PurchaseOrderItems::InventoryItemId,
                                )
                                .to(InventoryItems::Table, InventoryItems::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_order_items_order_id")
                        .table(PurchaseOrderItems::Table)
                        .col(PurchaseOrderItems::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        SupplierName,
        Status,
        OrderDate,
        Notes,
        ReceivedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderItems {
        Table,
        Id,
        PurchaseOrderId,
        InventoryItemId,
        QuantityOrdered,
        UnitCost,
    }
}
