use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use rust_decimal_macros::dec;
use tradeflow_core::{AggregateId, PartyId, PendingEvents, ProductId, TenantId, UnitConversion, WarehouseId};
use tradeflow_events::EventBus;
use tradeflow_infra::outbox::{OutboxProcessorConfig, OutboxPublisher, OutboxRepository};
use tradeflow_infra::persistence::InMemoryDatabase;
use tradeflow_infra::{Pipeline, PipelineConfig};
use tradeflow_sales::{
    AddItem, CreateSalesOrder, SalesOrder, SalesOrderCommand, SalesOrderId, SetWarehouse,
};

/// Draft order with `lines` items: 2 + lines pending events.
fn draft_order(tenant_id: TenantId, lines: usize) -> SalesOrder {
    let id = SalesOrderId(AggregateId::new());
    let mut order = SalesOrder::empty(id);
    let now = Utc::now();
    order
        .execute(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
            tenant_id,
            order_id: id,
            order_number: "SO-BENCH".to_string(),
            customer_id: PartyId::new(),
            customer_name: "Bench Customer".to_string(),
            occurred_at: now,
        }))
        .unwrap();
    for _ in 0..lines {
        order
            .execute(&SalesOrderCommand::AddItem(AddItem {
                tenant_id,
                product_id: ProductId::new(),
                product_name: "Widget".to_string(),
                product_code: "W".to_string(),
                conversion: UnitConversion::base("pcs"),
                quantity: dec!(2),
                unit_price: dec!(9.99),
                occurred_at: now,
            }))
            .unwrap();
    }
    order
        .execute(&SalesOrderCommand::SetWarehouse(SetWarehouse {
            tenant_id,
            warehouse_id: WarehouseId::new(),
            occurred_at: now,
        }))
        .unwrap();
    order
}

fn bench_publisher_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_publisher_save");

    for lines in [1usize, 10, 50] {
        group.throughput(Throughput::Elements(lines as u64 + 2));
        group.bench_with_input(BenchmarkId::new("events_per_save", lines + 2), &lines, |b, &lines| {
            let db = InMemoryDatabase::new();
            let publisher = OutboxPublisher::default();
            let tenant_id = TenantId::new();
            b.iter_batched(
                || draft_order(tenant_id, lines),
                |mut order| black_box(publisher.save(&db, &mut order).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_processor_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_processor_drain");

    for rows in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("rows", rows), &rows, |b, &rows| {
            b.iter_batched(
                || {
                    let config = PipelineConfig::default()
                        .with_outbox(OutboxProcessorConfig::default().with_batch_size(rows));
                    let pipeline = Pipeline::build(InMemoryDatabase::new(), &config).unwrap();
                    pipeline.bus().start().unwrap();
                    let tenant_id = TenantId::new();
                    // 10 events per order.
                    for _ in 0..rows / 10 {
                        let mut order = draft_order(tenant_id, 8);
                        pipeline.publisher().save(pipeline.database(), &mut order).unwrap();
                    }
                    pipeline
                },
                |pipeline| {
                    let report = pipeline.processor().process_batch(Utc::now()).unwrap();
                    black_box(report.sent)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_admin_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_admin");
    let pipeline = Pipeline::build(InMemoryDatabase::new(), &PipelineConfig::default()).unwrap();
    let tenant_id = TenantId::new();
    for _ in 0..100 {
        let mut order = draft_order(tenant_id, 8);
        pipeline.publisher().save(pipeline.database(), &mut order).unwrap();
    }

    group.bench_function("stats_1000_rows", |b| {
        b.iter(|| black_box(pipeline.admin().stats().unwrap()))
    });
    group.bench_function("count_by_status_1000_rows", |b| {
        b.iter(|| black_box(pipeline.database().count_by_status().unwrap()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publisher_save,
    bench_processor_drain,
    bench_admin_stats
);
criterion_main!(benches);
