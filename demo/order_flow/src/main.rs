mod config;
use config::OrderFlowConfig;
use conduit_core::envelope::keys;
use conduit_core::pipeline::{
    parallel::status, EnrichmentFilter, FnFilter, TransformFilter, ValidationFilter,
};
use conduit_core::telemetry;
use conduit_core::{
    Broker, CommandBus, CommandHandler, CommandInvoker, ConduitError, Envelope, InMemoryTransport,
    Message, ParallelPipeline, Payload, Pipeline, Priority, Subscriber,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Logging / tracing (RUST_LOG wins over the fallback filter)
    telemetry::init_logging_with("info,conduit_core=info,order_flow=info")?;

    info!(
        target: "order_flow",
        "Starting Order Flow demo: Pipeline → CommandBus → Broker"
    );

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = OrderFlowConfig::load();
    cfg.core.validate()?;

    // 1) Intake pipeline: validate → normalize → enrich
    let intake = Pipeline::with_config("order_intake", &cfg.core)
        .with_filter(ValidationFilter::new("validate", cfg.required_fields.clone()))
        .with_filter(TransformFilter::new("normalize", |mut p: Payload| {
            if let Some(Value::String(customer)) = p.get("customer").cloned() {
                p.insert("customer".into(), json!(customer.trim().to_lowercase()));
            }
            Ok(p)
        }))
        .with_filter(
            EnrichmentFilter::new("enrich", Payload::new())
                .with_field("processor", "order_flow")
                .with_field("version", "1.0"),
        );

    // 2) Independent analyses over each accepted order
    let analyses = ParallelPipeline::new("order_analyses")
        .with_filter(FnFilter::blocking("fraud_check", |env: Envelope| {
            let amount = amount_of(&env.payload);
            if amount > 1_000.0 {
                return Err(ConduitError::Filter(format!("amount {amount} needs review")));
            }
            Ok(Some(env))
        }))
        .with_filter(FnFilter::new("vip_tag", |env: Envelope| {
            let vip = env
                .get("customer")
                .and_then(Value::as_str)
                .map(|c| c.starts_with("vip"))
                .unwrap_or(false);
            Ok(vip.then(|| env.with_priority(Priority::High).with_field("vip", true)))
        }));

    // 3) Commands: pricing and stock reservation
    let tax_rate = cfg.tax_rate;
    let orders = Arc::new(
        CommandHandler::new("OrderHandler")
            .with_fn("calcTotal", move |p: Payload| {
                let subtotal = amount_of(&p);
                Ok(json!({
                    "subtotal": subtotal,
                    "total": subtotal * (1.0 + tax_rate),
                }))
            })
            .with_async_fn("reserveStock", |p: Payload| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let qty = p.get("qty").and_then(Value::as_u64).unwrap_or(0);
                if qty > 10 {
                    return Err(ConduitError::handler(format!("only 10 in stock, {qty} requested")));
                }
                Ok(json!({ "reserved": qty }))
            })
            .with_fn("notify", |p: Payload| {
                info!(target: "order_flow", order = ?p.get("order_id"), "Customer notified");
                Ok(Value::Null)
            }),
    );
    let bus = CommandBus::new();
    for command in orders.commands() {
        bus.register_handler(command, Arc::clone(&orders));
    }
    let invoker = CommandInvoker::with_config("order_flow", &cfg.core);

    // 4) Pub/sub: billing + shipping listen on orders, crm on customers
    let transport = Arc::new(InMemoryTransport::with_config(&cfg.core));
    let broker = Arc::new(Broker::with_config(transport.clone(), &cfg.core));
    broker
        .register_subscriber(Arc::new(Subscriber::from_fn(
            "billing",
            [cfg.order_topic.as_str()],
            |msg: &Message| {
                info!(target: "order_flow", order = ?msg.payload().get("order_id"), total = ?msg.payload().get("total"), "Invoice issued");
                Ok(json!("invoiced"))
            },
        )))
        .await;
    broker
        .register_subscriber(Arc::new(Subscriber::from_async_fn(
            "shipping",
            [cfg.order_topic.as_str()],
            |msg: Message| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                info!(target: "order_flow", order = ?msg.payload().get("order_id"), "Shipment scheduled");
                Ok(json!("scheduled"))
            },
        )))
        .await;
    broker
        .register_subscriber(Arc::new(Subscriber::from_fn(
            "crm",
            ["customers"],
            |msg: &Message| {
                info!(target: "order_flow", event = ?msg.event_name(), customer = ?msg.payload().get("customer"), "Customer activity recorded");
                Ok(Value::Null)
            },
        )))
        .await;
    let consumer = broker.start_consuming().await?;

    // Drive synthetic orders through the whole flow
    let accepted = intake.process_batch(synthetic_orders(cfg.order_count)).await;
    info!(target: "order_flow", submitted = cfg.order_count, accepted = accepted.len(), "Intake finished");

    for order in accepted {
        let verdicts = analyses.execute(order.clone()).await;
        let flagged = verdicts.iter().any(|v| {
            v.metadata.get(&keys::filter_status("fraud_check")) == Some(&json!(status::BLOCKED))
                || v.metadata.get(&keys::filter_status("fraud_check")) == Some(&json!(status::FAILED))
        });
        if flagged {
            warn!(target: "order_flow", order = ?order.get("order_id"), "Order held for review");
            continue;
        }
        let order = verdicts
            .into_iter()
            .find(|v| v.get("vip").is_some())
            .unwrap_or(order);

        let priced = match bus.dispatch("calcTotal", order.payload.clone(), "order_flow").await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                error!(target: "order_flow", error = ?response.error(), "Pricing failed");
                continue;
            }
            Err(e) => {
                error!(target: "order_flow", error = %e, "Pricing not routed");
                continue;
            }
        };

        match invoker
            .invoke_command_default(&orders, "reserveStock", order.payload.clone())
            .await
        {
            Ok(response) if !response.is_success() => {
                warn!(target: "order_flow", order = ?order.get("order_id"), error = ?response.error(), "Stock reservation refused");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                error!(target: "order_flow", error = %e, "Stock reservation outcome unknown");
                continue;
            }
        }

        let mut event = order.payload.clone();
        if let Some(Value::Object(result)) = priced.result() {
            event.extend(result.clone());
        }
        let message = Message::new(
            cfg.order_topic.clone(),
            Envelope::new("order_flow")
                .with_priority(order.priority)
                .with_correlation_id(order.id())
                .with_payload(event),
        );
        broker.publish(&message).await?;

        if let Some(customer) = order.get("customer") {
            let mut activity = Payload::new();
            activity.insert("customer".into(), customer.clone());
            broker
                .publish_event("customers", "order_flow", "order_placed", activity)
                .await?;
        }

        let mut notify = Payload::new();
        if let Some(id) = order.get("order_id") {
            notify.insert("order_id".into(), id.clone());
        }
        invoker.invoke_async(Arc::clone(&orders), "notify", notify);
    }

    // Let the consumer drain, then report
    transport.close().await;
    if let Err(e) = consumer.await {
        error!(target: "order_flow", error = %e, "Consumer task failed");
    }
    let stats = broker.get_stats(&cfg.order_topic).unwrap_or_default();
    info!(
        target: "order_flow",
        published = stats.total_published,
        delivered = stats.total_delivered,
        failed = stats.failed_deliveries,
        dropped = stats.dropped_messages,
        "Order Flow demo finished"
    );
    Ok(())
}

fn amount_of(p: &Payload) -> f64 {
    let price = p.get("price").and_then(Value::as_f64).unwrap_or(0.0);
    let qty = p.get("qty").and_then(Value::as_f64).unwrap_or(0.0);
    price * qty
}

fn synthetic_orders(count: usize) -> Vec<Envelope> {
    (0..count)
        .map(|i| {
            let env = Envelope::new("storefront")
                .with_field("order_id", format!("ORD-{:04}", i + 1))
                .with_field("price", 25.0 * (i as f64 + 1.0))
                .with_field("qty", (i % 4 + 1) as u64 * 3);
            // Every fourth order arrives without a customer and is rejected at intake
            if i % 4 == 3 {
                env
            } else if i % 3 == 0 {
                env.with_field("customer", format!("  VIP-Customer-{i} "))
            } else {
                env.with_field("customer", format!("Customer-{i}"))
            }
        })
        .collect()
}
