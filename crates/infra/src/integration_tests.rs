//! Integration tests for the full consistency pipeline.
//!
//! Tests: Aggregate → OutboxPublisher → OutboxProcessor → EventBus → Handlers
//! → InventoryService → LockSweeper
//!
//! Verifies:
//! - Order and receipt events reach inventory exactly once
//! - Undeliverable rows go DEAD and come back through the admin surface
//! - Cancellation and lock expiry never double-release a lock
//! - Tenant isolation is preserved

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use tradeflow_core::{
        AggregateId, AggregateRoot, PartyId, PendingEvents, ProductId, TenantId, UnitConversion,
        WarehouseId,
    };
    use tradeflow_events::EventBus;
    use tradeflow_inventory::{
        IncreaseStock, InventoryCommand, InventoryEvent, InventoryItem, SetThresholds,
        SourceType, StockSource,
    };
    use tradeflow_purchasing::{
        self as purchasing, CreatePurchaseOrder, CreatePurchaseReturn, PurchaseOrder,
        PurchaseOrderCommand, PurchaseOrderId, PurchaseOrderStatus, PurchaseReturn,
        PurchaseReturnCommand, PurchaseReturnId, ReceiveGoods, ReceiveLine, ShipReturn,
    };
    use tradeflow_sales::{
        self as sales, CancelOrder, CreateSalesOrder, CreateSalesReturn, SalesOrder,
        SalesOrderCommand, SalesOrderEvent, SalesOrderId, SalesOrderStatus, SalesReturn,
        SalesReturnCommand, SalesReturnId, SalesReturnStatus, Transition,
    };
    use uuid::Uuid;

    use crate::config::PipelineConfig;
    use crate::outbox::{
        EventRegistry, OutboxError, OutboxProcessorConfig, OutboxRepository, OutboxStatus,
        TradeEvent,
    };
    use crate::persistence::InMemoryDatabase;
    use crate::pipeline::Pipeline;

    struct World {
        pipeline: Pipeline<InMemoryDatabase>,
        tenant: TenantId,
        warehouse: WarehouseId,
        product: ProductId,
    }

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn world_with(config: PipelineConfig) -> World {
        let pipeline = Pipeline::build(InMemoryDatabase::new(), &config).unwrap();
        World {
            pipeline,
            tenant: test_tenant_id(),
            warehouse: WarehouseId::new(),
            product: ProductId::new(),
        }
    }

    fn world() -> World {
        let w = world_with(PipelineConfig::default());
        w.pipeline.bus().start().unwrap();
        w
    }

    impl World {
        /// Process until the outbox has nothing left to claim.
        fn drain(&self, now: DateTime<Utc>) {
            for _ in 0..20 {
                let report = self.pipeline.processor().process_batch(now).unwrap();
                if report.claimed == 0 {
                    return;
                }
            }
            panic!("outbox did not drain");
        }

        fn seed_stock(&self, quantity: Decimal) {
            let tenant = self.tenant;
            self.pipeline
                .inventory()
                .execute_or_create(self.tenant, self.warehouse, self.product, |_| {
                    InventoryCommand::IncreaseStock(IncreaseStock {
                        tenant_id: tenant,
                        reference: "opening-balance".to_string(),
                        quantity,
                        unit_cost: dec!(40),
                        batch: None,
                        source: StockSource::new(SourceType::PurchaseOrder, Uuid::now_v7(), 1),
                        occurred_at: Utc::now(),
                    })
                })
                .unwrap();
        }

        fn stock(&self) -> InventoryItem {
            self.pipeline
                .inventory()
                .find(self.tenant, self.warehouse, self.product)
                .unwrap()
                .expect("inventory item")
        }

        fn save_sales(&self, order: &mut SalesOrder) {
            self.pipeline
                .publisher()
                .save(self.pipeline.database(), order)
                .unwrap();
        }

        fn save_purchase(&self, order: &mut PurchaseOrder) {
            self.pipeline
                .publisher()
                .save(self.pipeline.database(), order)
                .unwrap();
        }

        fn count_events(&self, event_type: &str) -> usize {
            self.pipeline
                .database()
                .outbox_entries()
                .unwrap()
                .iter()
                .filter(|e| e.event_type == event_type)
                .count()
        }

        /// Draft order with one line, warehouse set.
        fn draft_sales_order(&self, quantity: Decimal, unit_price: Decimal) -> SalesOrder {
            let id = SalesOrderId(AggregateId::new());
            let mut order = SalesOrder::empty(id);
            let now = Utc::now();
            order
                .execute(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                    tenant_id: self.tenant,
                    order_id: id,
                    order_number: "SO-1001".to_string(),
                    customer_id: PartyId::new(),
                    customer_name: "Northwind".to_string(),
                    occurred_at: now,
                }))
                .unwrap();
            order
                .execute(&SalesOrderCommand::AddItem(sales::AddItem {
                    tenant_id: self.tenant,
                    product_id: self.product,
                    product_name: "Widget".to_string(),
                    product_code: "W-1".to_string(),
                    conversion: UnitConversion::base("pcs"),
                    quantity,
                    unit_price,
                    occurred_at: now,
                }))
                .unwrap();
            order
                .execute(&SalesOrderCommand::SetWarehouse(sales::SetWarehouse {
                    tenant_id: self.tenant,
                    warehouse_id: self.warehouse,
                    occurred_at: now,
                }))
                .unwrap();
            order
        }

        fn transition(&self, at: DateTime<Utc>) -> Transition {
            Transition {
                tenant_id: self.tenant,
                occurred_at: at,
            }
        }

        /// Confirmed purchase order for `quantity` units at cost 5.
        fn confirmed_purchase_order(&self, quantity: Decimal) -> PurchaseOrder {
            let id = PurchaseOrderId(AggregateId::new());
            let mut order = PurchaseOrder::empty(id);
            let now = Utc::now();
            let commands = [
                PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    tenant_id: self.tenant,
                    order_id: id,
                    order_number: "PO-2001".to_string(),
                    supplier_id: PartyId::new(),
                    supplier_name: "Contoso".to_string(),
                    occurred_at: now,
                }),
                PurchaseOrderCommand::AddItem(purchasing::AddItem {
                    tenant_id: self.tenant,
                    product_id: self.product,
                    product_name: "Widget".to_string(),
                    product_code: "W-1".to_string(),
                    conversion: UnitConversion::base("pcs"),
                    quantity,
                    unit_cost: dec!(5),
                    occurred_at: now,
                }),
                PurchaseOrderCommand::SetWarehouse(purchasing::SetWarehouse {
                    tenant_id: self.tenant,
                    warehouse_id: self.warehouse,
                    occurred_at: now,
                }),
                PurchaseOrderCommand::ConfirmOrder(purchasing::ConfirmOrder {
                    tenant_id: self.tenant,
                    occurred_at: now,
                }),
            ];
            for command in &commands {
                order.execute(command).unwrap();
            }
            order
        }

        fn receive(&self, order: &mut PurchaseOrder, quantity: Decimal) {
            order
                .execute(&PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
                    tenant_id: self.tenant,
                    lines: vec![ReceiveLine::new(self.product, quantity)],
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            self.save_purchase(order);
        }
    }

    #[test]
    fn sales_order_locks_then_deducts_stock() {
        let w = world();
        w.seed_stock(dec!(50));
        let t0 = Utc::now();

        let mut order = w.draft_sales_order(dec!(10), dec!(100));
        let emitted = order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(t0)))
            .unwrap();
        assert_eq!(emitted, 1);
        assert!(matches!(
            order.pending_events().last(),
            Some(SalesOrderEvent::OrderConfirmed(_))
        ));
        assert_eq!(order.payable_amount(), dec!(1000));
        w.save_sales(&mut order);
        w.drain(t0);

        let stock = w.stock();
        assert_eq!(stock.available_quantity(), dec!(40));
        assert_eq!(stock.locked_quantity(), dec!(10));
        let reference =
            StockSource::new(SourceType::SalesOrder, order.id_typed().0, 1).lock_reference();
        assert!(stock.lock(&reference).is_some());

        order
            .execute(&SalesOrderCommand::ShipOrder(w.transition(t0 + Duration::minutes(5))))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(t0 + Duration::minutes(5));

        let stock = w.stock();
        assert_eq!(stock.available_quantity(), dec!(40));
        assert_eq!(stock.locked_quantity(), dec!(0));
        assert_eq!(stock.total_quantity(), dec!(40));
        assert!(stock.lock(&reference).is_none());
        assert!(stock.is_lock_deducted(&reference));

        order
            .execute(&SalesOrderCommand::CompleteOrder(w.transition(t0 + Duration::hours(1))))
            .unwrap();
        w.save_sales(&mut order);
        assert_eq!(order.status(), SalesOrderStatus::Completed);
        assert!(order.status().is_terminal());
        assert!(order
            .execute(&SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id: w.tenant,
                reason: "too late".to_string(),
                occurred_at: Utc::now(),
            }))
            .is_err());
    }

    #[test]
    fn purchase_receipts_accumulate_stock() {
        let w = world();
        let mut order = w.confirmed_purchase_order(dec!(10));
        w.save_purchase(&mut order);

        w.receive(&mut order, dec!(6));
        assert_eq!(order.status(), PurchaseOrderStatus::PartialReceived);
        w.drain(Utc::now());
        assert_eq!(w.stock().available_quantity(), dec!(6));
        assert_eq!(w.stock().unit_cost(), dec!(5));

        w.receive(&mut order, dec!(4));
        assert_eq!(order.status(), PurchaseOrderStatus::Completed);
        w.drain(Utc::now());
        assert_eq!(w.stock().available_quantity(), dec!(10));
    }

    #[test]
    fn undeliverable_entry_goes_dead_and_is_requeued() {
        let config = PipelineConfig::default()
            .with_outbox(OutboxProcessorConfig::default().with_max_retries(2));
        // Bus left stopped: every publish fails.
        let w = world_with(config);
        let mut order = w.draft_sales_order(dec!(1), dec!(10));
        w.save_sales(&mut order);
        let entries = w.pipeline.database().outbox_entries().unwrap();
        assert!(entries.iter().all(|e| e.max_retries == 2));
        let created = entries.len() as u64;

        let t0 = Utc::now();
        let first = w.pipeline.processor().process_batch(t0).unwrap();
        assert_eq!(first.failed as u64, created);
        let second = w
            .pipeline
            .processor()
            .process_batch(t0 + Duration::hours(1))
            .unwrap();
        assert_eq!(second.dead as u64, created);

        let admin = w.pipeline.admin();
        let stats = admin.stats().unwrap();
        assert_eq!(stats.dead, created);
        assert_eq!(
            stats.pending + stats.processing + stats.sent + stats.failed + stats.dead,
            stats.total
        );
        let page = admin.list_dead(1, 100).unwrap();
        assert_eq!(page.total, created);
        assert!(page.entries.iter().all(|e| e.retry_count == 2));
        assert!(page.entries[0].last_error.as_deref().unwrap().contains("not running"));

        assert_eq!(admin.retry_all().unwrap(), created);
        let requeued = admin.get(page.entries[0].id).unwrap();
        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert_eq!(requeued.retry_count, 0);
        assert!(requeued.last_error.is_none());

        w.pipeline.bus().start().unwrap();
        w.drain(t0 + Duration::hours(2));
        let stats = admin.stats().unwrap();
        assert_eq!(stats.sent, stats.total);

        // A delivered row is not retryable and stays as it is.
        let sent = w.pipeline.database().get(requeued.id).unwrap().unwrap();
        let err = admin.retry(sent.id).unwrap_err();
        assert!(matches!(err, OutboxError::NotDead { status: OutboxStatus::Sent, .. }));
        assert_eq!(w.pipeline.database().get(sent.id).unwrap().unwrap(), sent);
    }

    #[test]
    fn cancellation_after_expiry_releases_once() {
        let w = world();
        w.seed_stock(dec!(20));
        let t0 = Utc::now();

        let mut order = w.draft_sales_order(dec!(5), dec!(10));
        order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(t0)))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(t0);
        assert_eq!(w.stock().locked_quantity(), dec!(5));

        let stats = w.pipeline.sweeper().sweep(t0 + Duration::minutes(31)).unwrap();
        assert_eq!(stats.found, 1);
        assert_eq!(stats.released, 1);

        order
            .execute(&SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id: w.tenant,
                reason: "customer changed their mind".to_string(),
                occurred_at: t0 + Duration::minutes(35),
            }))
            .unwrap();
        assert!(matches!(
            order.pending_events().last(),
            Some(SalesOrderEvent::OrderCancelled(e)) if e.was_confirmed
        ));
        w.save_sales(&mut order);
        w.drain(t0 + Duration::minutes(35));

        let stock = w.stock();
        assert_eq!(stock.available_quantity(), dec!(20));
        assert_eq!(stock.locked_quantity(), dec!(0));
        assert_eq!(w.count_events(InventoryEvent::LOCK_EXPIRED), 1);
        assert_eq!(w.count_events(InventoryEvent::STOCK_UNLOCKED), 0);
    }

    #[test]
    fn cancellation_before_expiry_wins_over_sweeper() {
        let w = world();
        w.seed_stock(dec!(20));
        let t0 = Utc::now();

        let mut order = w.draft_sales_order(dec!(5), dec!(10));
        order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(t0)))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(t0);

        order
            .execute(&SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id: w.tenant,
                reason: "duplicate".to_string(),
                occurred_at: t0 + Duration::minutes(1),
            }))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(t0 + Duration::minutes(1));

        let stats = w.pipeline.sweeper().sweep(t0 + Duration::hours(1)).unwrap();
        assert_eq!(stats.found, 0);
        assert_eq!(w.stock().available_quantity(), dec!(20));
        assert_eq!(w.count_events(InventoryEvent::STOCK_UNLOCKED), 1);
        assert_eq!(w.count_events(InventoryEvent::LOCK_EXPIRED), 0);
    }

    #[test]
    fn redelivered_events_do_not_double_apply() {
        let w = world();
        let mut receipt = w.confirmed_purchase_order(dec!(10));
        w.save_purchase(&mut receipt);
        w.receive(&mut receipt, dec!(10));

        let mut order = w.draft_sales_order(dec!(3), dec!(10));
        order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(Utc::now())))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(Utc::now());
        assert_eq!(w.stock().available_quantity(), dec!(7));

        // Replay every delivered row straight onto the bus.
        let registry = EventRegistry::<TradeEvent>::trade();
        let delivered: Vec<_> = w
            .pipeline
            .database()
            .outbox_entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.status == OutboxStatus::Sent)
            .map(|e| registry.decode(&e).unwrap())
            .collect();
        w.pipeline.bus().publish(&delivered).unwrap();
        w.pipeline.bus().publish(&delivered).unwrap();

        let stock = w.stock();
        assert_eq!(stock.available_quantity(), dec!(7));
        assert_eq!(stock.locked_quantity(), dec!(3));
        // One receipt, one lock.
        assert_eq!(stock.movements().len(), 2);
        assert_eq!(stock.active_locks().count(), 1);
    }

    #[test]
    fn shipment_below_minimum_raises_alert() {
        let w = world();
        w.seed_stock(dec!(10));
        let tenant = w.tenant;
        w.pipeline
            .inventory()
            .execute_existing(w.tenant, w.warehouse, w.product, |_| {
                InventoryCommand::SetThresholds(SetThresholds {
                    tenant_id: tenant,
                    min_quantity: dec!(8),
                    max_quantity: dec!(100),
                    occurred_at: Utc::now(),
                })
            })
            .unwrap()
            .unwrap();
        let t0 = Utc::now();

        let mut order = w.draft_sales_order(dec!(5), dec!(10));
        order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(t0)))
            .unwrap();
        order
            .execute(&SalesOrderCommand::ShipOrder(w.transition(t0)))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(t0);

        assert_eq!(w.stock().total_quantity(), dec!(5));
        assert!(w.stock().is_below_minimum());
        assert_eq!(w.count_events(InventoryEvent::BELOW_THRESHOLD), 1);
        assert_eq!(w.pipeline.thresholds().alerts(), 1);
    }

    #[test]
    fn completed_sales_return_restores_stock() {
        let w = world();
        w.seed_stock(dec!(20));
        let t0 = Utc::now();

        let mut order = w.draft_sales_order(dec!(5), dec!(60));
        order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(t0)))
            .unwrap();
        order
            .execute(&SalesOrderCommand::ShipOrder(w.transition(t0)))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(t0);
        assert_eq!(w.stock().available_quantity(), dec!(15));

        let id = SalesReturnId(AggregateId::new());
        let mut ret = SalesReturn::empty(id);
        let now = Utc::now();
        let commands = [
            SalesReturnCommand::Create(
                CreateSalesReturn::from_order(&order, id, "SR-1", "damaged", now).unwrap(),
            ),
            SalesReturnCommand::AddItem(sales::AddReturnItem::from_order_item(
                w.tenant,
                &order.items()[0],
                dec!(2),
                now,
            )),
            SalesReturnCommand::SetWarehouse(sales::SetReturnWarehouse {
                tenant_id: w.tenant,
                warehouse_id: w.warehouse,
                occurred_at: now,
            }),
            SalesReturnCommand::Submit(sales::ReturnTransition {
                tenant_id: w.tenant,
                occurred_at: now,
            }),
            SalesReturnCommand::Approve(sales::ApproveReturn {
                tenant_id: w.tenant,
                note: None,
                occurred_at: now,
            }),
            SalesReturnCommand::Receive(sales::ReturnTransition {
                tenant_id: w.tenant,
                occurred_at: now,
            }),
            SalesReturnCommand::Complete(sales::ReturnTransition {
                tenant_id: w.tenant,
                occurred_at: now,
            }),
        ];
        for command in &commands {
            ret.execute(command).unwrap();
        }
        assert_eq!(ret.status(), SalesReturnStatus::Completed);
        w.pipeline
            .publisher()
            .save(w.pipeline.database(), &mut ret)
            .unwrap();
        w.drain(now);

        let stock = w.stock();
        assert_eq!(stock.available_quantity(), dec!(17));
        // Restocked at the item's existing valuation.
        assert_eq!(stock.unit_cost(), dec!(40));
    }

    #[test]
    fn shipped_purchase_return_decreases_stock() {
        let w = world();
        let mut order = w.confirmed_purchase_order(dec!(10));
        w.save_purchase(&mut order);
        w.receive(&mut order, dec!(10));
        w.drain(Utc::now());

        let id = PurchaseReturnId(AggregateId::new());
        let mut ret = PurchaseReturn::empty(id);
        let now = Utc::now();
        let commands = [
            PurchaseReturnCommand::Create(
                CreatePurchaseReturn::from_order(&order, id, "PR-1", "defective", now).unwrap(),
            ),
            PurchaseReturnCommand::AddItem(purchasing::AddReturnItem::from_order_item(
                w.tenant,
                &order.items()[0],
                dec!(4),
                now,
            )),
            PurchaseReturnCommand::SetWarehouse(purchasing::SetReturnWarehouse {
                tenant_id: w.tenant,
                warehouse_id: w.warehouse,
                occurred_at: now,
            }),
            PurchaseReturnCommand::Submit(purchasing::ReturnTransition {
                tenant_id: w.tenant,
                occurred_at: now,
            }),
            PurchaseReturnCommand::Approve(purchasing::ApproveReturn {
                tenant_id: w.tenant,
                note: Some("ok".to_string()),
                occurred_at: now,
            }),
            PurchaseReturnCommand::Ship(ShipReturn {
                tenant_id: w.tenant,
                tracking_number: Some("TRK-9".to_string()),
                occurred_at: now,
            }),
        ];
        for command in &commands {
            ret.execute(command).unwrap();
        }
        w.pipeline
            .publisher()
            .save(w.pipeline.database(), &mut ret)
            .unwrap();
        w.drain(now);

        assert_eq!(w.stock().available_quantity(), dec!(6));
    }

    #[test]
    fn confirmation_without_stock_record_fails_only_the_handler() {
        let w = world();
        let mut order = w.draft_sales_order(dec!(2), dec!(10));
        order
            .execute(&SalesOrderCommand::ConfirmOrder(w.transition(Utc::now())))
            .unwrap();
        w.save_sales(&mut order);
        w.drain(Utc::now());

        // The handler failure is isolated: the row is still delivered.
        let stats = w.pipeline.admin().stats().unwrap();
        assert_eq!(stats.sent, stats.total);
        assert!(w
            .pipeline
            .inventory()
            .find(w.tenant, w.warehouse, w.product)
            .unwrap()
            .is_none());
    }

    #[test]
    fn tenants_do_not_share_stock() {
        let w = world();
        w.seed_stock(dec!(10));

        let other = w
            .pipeline
            .inventory()
            .find(test_tenant_id(), w.warehouse, w.product)
            .unwrap();

        assert!(other.is_none());
        assert_eq!(w.stock().version(), 2);
    }
}
