use std::sync::Arc;

use crate::{
    config::PlanningConfig,
    db::DbPool,
    events::EventSender,
    services::{
        bom::BomService, inventory::InventoryService, purchase_orders::PurchaseOrderService,
        recipes::RecipeService, requirements::RequirementsService, stock::StockService,
        wip::WipService,
    },
};

/// Builds services that share one pool and one event channel.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    planning: PlanningConfig,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, planning: PlanningConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            planning,
        }
    }

    pub fn bom_service(&self) -> BomService {
        BomService::new(self.db_pool.clone())
    }

    pub fn recipe_service(&self) -> RecipeService {
        RecipeService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn inventory_service(&self) -> InventoryService {
        InventoryService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn stock_service(&self) -> StockService {
        StockService::new(self.db_pool.clone())
    }

    pub fn requirements_service(&self) -> RequirementsService {
        RequirementsService::new(self.db_pool.clone(), self.planning.clone())
    }

    pub fn wip_service(&self) -> WipService {
        WipService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn purchase_order_service(&self) -> PurchaseOrderService {
        PurchaseOrderService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    pub fn event_sender(&self) -> &Arc<EventSender> {
        &self.event_sender
    }
}

/// Every service, ready to hand to a caller.
#[derive(Clone)]
pub struct ServiceContainer {
    pub bom: Arc<BomService>,
    pub recipes: Arc<RecipeService>,
    pub inventory: Arc<InventoryService>,
    pub stock: Arc<StockService>,
    pub requirements: Arc<RequirementsService>,
    pub wip: Arc<WipService>,
    pub purchase_orders: Arc<PurchaseOrderService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            bom: Arc::new(factory.bom_service()),
            recipes: Arc::new(factory.recipe_service()),
            inventory: Arc::new(factory.inventory_service()),
            stock: Arc::new(factory.stock_service()),
            requirements: Arc::new(factory.requirements_service()),
            wip: Arc::new(factory.wip_service()),
            purchase_orders: Arc::new(factory.purchase_order_service()),
        }
    }
}
