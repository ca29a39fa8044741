use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::envelope::keys;
use conduit_core::{
    CommandBus, CommandEnvelope, CommandFunction, CommandHandler, CommandInvoker, ConduitConfig,
    ConduitError, Envelope, MessageKind, Payload, ResponseStatus, Result,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn params(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn order_handler() -> CommandHandler {
    CommandHandler::new("OrderHandler")
        .with_fn("calcTotal", |p: Payload| {
            let price = p.get("price").and_then(Value::as_i64).unwrap_or(0);
            let qty = p.get("qty").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({ "total": price * qty }))
        })
        .with_fn("reject", |_p: Payload| Err(ConduitError::handler("out of stock")))
        .with_async_fn("slow", |_p: Payload| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(json!("done"))
        })
}

// Counts calls through the trait seam directly
struct CountingCommand {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CommandFunction for CountingCommand {
    async fn invoke(&self, parameters: Payload) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Object(parameters))
    }
}

#[tokio::test]
async fn bus_dispatch_returns_handler_result() {
    let bus = CommandBus::new();
    bus.register_handler("calcTotal", Arc::new(order_handler()));

    let response = bus
        .dispatch("calcTotal", params(json!({"price": 50, "qty": 2})), "checkout")
        .await
        .unwrap();

    assert_eq!(response.status(), ResponseStatus::Success);
    assert_eq!(response.result(), Some(&json!({"total": 100})));
    assert_eq!(response.source(), "OrderHandler");
    assert_eq!(response.envelope.kind, MessageKind::Response);
    assert_eq!(response.envelope.destination.as_deref(), Some("checkout"));
    assert!(response.correlation_id().is_some());
}

#[tokio::test]
async fn bus_dispatch_without_route_raises() {
    let bus = CommandBus::new();
    bus.register_handler("calcTotal", Arc::new(order_handler()));

    let err = bus
        .dispatch("missingCmd", Payload::new(), "checkout")
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::NoHandlerRegistered(ref name) if name == "missingCmd"));
    assert_eq!(err.to_string(), "No handler registered for command 'missingCmd'");
}

#[tokio::test]
async fn routed_but_unbound_command_answers_with_error_response() {
    let bus = CommandBus::new();
    bus.register_handler("refund", Arc::new(order_handler()));

    let response = bus.dispatch("refund", Payload::new(), "checkout").await.unwrap();

    assert_eq!(response.status(), ResponseStatus::Error);
    assert_eq!(response.error(), Some("Unknown command: refund"));
    assert_eq!(response.result(), None);
}

#[tokio::test]
async fn failing_body_becomes_error_response() {
    let handler = order_handler();
    let command = CommandEnvelope::new("reject", Payload::new(), "checkout");

    let response = handler.execute_command(&command).await;

    assert!(!response.is_success());
    assert_eq!(response.error(), Some("out of stock"));
    assert_eq!(response.correlation_id(), Some(command.id()));
    assert_eq!(
        response.envelope.payload.get(keys::ERROR),
        Some(&json!("out of stock"))
    );
}

#[tokio::test]
async fn panicking_body_becomes_error_response() {
    let bus = CommandBus::new();
    let handler = Arc::new(
        CommandHandler::new("fragile")
            .with_fn("boom", |p: Payload| Ok(p["n"].clone()))
            .with_fn("ok", |_p: Payload| Ok(json!("still here"))),
    );
    bus.register_handler("boom", Arc::clone(&handler));
    bus.register_handler("ok", handler);

    let response = bus.dispatch("boom", Payload::new(), "caller").await.unwrap();

    assert_eq!(response.status(), ResponseStatus::Error);
    assert_eq!(response.source(), "fragile");
    assert!(response.error().unwrap().starts_with("Command panicked"));
    assert!(response.correlation_id().is_some());

    let response = bus.dispatch("ok", Payload::new(), "caller").await.unwrap();
    assert_eq!(response.result(), Some(&json!("still here")));
}

#[tokio::test]
async fn later_registration_wins() {
    let bus = CommandBus::new();
    let first = Arc::new(CommandHandler::new("first").with_fn("ping", |_p: Payload| Ok(json!(1))));
    let second = Arc::new(CommandHandler::new("second").with_fn("ping", |_p: Payload| Ok(json!(2))));

    bus.register_handler("ping", first);
    bus.register_handler("ping", second);

    let response = bus.dispatch("ping", Payload::new(), "test").await.unwrap();
    assert_eq!(response.result(), Some(&json!(2)));
    assert_eq!(response.source(), "second");
    assert_eq!(bus.list_commands(), vec!["ping"]);

    let handler = CommandHandler::new("rebinding").with_fn("v", |_p: Payload| Ok(json!("old")));
    handler.register_fn("v", |_p: Payload| Ok(json!("new")));
    let response = handler
        .execute_command(&CommandEnvelope::new("v", Payload::new(), "test"))
        .await;
    assert_eq!(response.result(), Some(&json!("new")));
}

#[tokio::test]
async fn listings_follow_registration_order() {
    let bus = CommandBus::new();
    let handler = Arc::new(order_handler());
    for name in ["reject", "calcTotal", "slow"] {
        bus.register_handler(name, Arc::clone(&handler));
    }
    bus.register_handler("reject", Arc::new(CommandHandler::new("refunds")));

    assert_eq!(bus.list_commands(), vec!["reject", "calcTotal", "slow"]);
    assert_eq!(handler.commands(), vec!["calcTotal", "reject", "slow"]);
    assert!(CommandBus::new().list_commands().is_empty());

    handler.register_fn("calcTotal", |_p: Payload| Ok(json!(0)));
    assert_eq!(handler.commands(), vec!["calcTotal", "reject", "slow"]);
}

#[tokio::test]
async fn registered_trait_object_receives_parameters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = CommandHandler::with_commands(
        "echo",
        [(
            "echo",
            Arc::new(CountingCommand {
                calls: Arc::clone(&calls),
            }) as Arc<dyn CommandFunction>,
        )],
    );

    let response = handler
        .execute_command(&CommandEnvelope::new("echo", params(json!({"a": [1, 2]})), "test"))
        .await;

    assert_eq!(response.result(), Some(&json!({"a": [1, 2]})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handler.has_command("echo"));
}

#[tokio::test]
async fn invoker_times_out_slow_command() {
    let invoker = CommandInvoker::new("client");
    let handler = order_handler();

    let err = invoker
        .invoke_command(&handler, "slow", Payload::new(), Duration::from_millis(50))
        .await
        .unwrap_err();

    match err {
        ConduitError::CommandTimeout {
            command,
            timeout_ms,
        } => {
            assert_eq!(command, "slow");
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn invoker_returns_response_within_deadline() {
    let invoker = CommandInvoker::new("client");
    let handler = order_handler();

    let response = invoker
        .invoke_command(
            &handler,
            "calcTotal",
            params(json!({"price": 5, "qty": 4})),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(response.result(), Some(&json!({"total": 20})));
    assert_eq!(response.envelope.destination.as_deref(), Some("client"));

    let failed = invoker
        .invoke_command(&handler, "nope", Payload::new(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(failed.error(), Some("Unknown command: nope"));
}

#[tokio::test]
async fn invoker_uses_configured_default_timeout() {
    let config = ConduitConfig {
        command_timeout_ms: 20,
        ..ConduitConfig::default()
    };
    let invoker = CommandInvoker::with_config("client", &config);
    assert_eq!(invoker.default_timeout(), Duration::from_millis(20));

    let err = invoker
        .invoke_command_default(&order_handler(), "slow", Payload::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConduitError::CommandTimeout { timeout_ms: 20, .. }));
}

#[tokio::test]
async fn invoke_async_returns_id_and_runs_in_background() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(CommandHandler::new("notifier").with_fn("notify", move |p: Payload| {
        tx.send(p.clone())
            .map_err(|e| ConduitError::handler(e.to_string()))?;
        Ok(Value::Null)
    }));

    let invoker = CommandInvoker::default();
    let id = invoker.invoke_async(handler, "notify", params(json!({"user": "u-1"})));
    assert!(!id.is_empty());

    let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("command should run")
        .expect("channel open");
    assert_eq!(seen.get("user"), Some(&json!("u-1")));
}

#[tokio::test]
async fn process_message_decodes_plain_envelopes() {
    let handler = order_handler();

    let command = CommandEnvelope::new("calcTotal", params(json!({"price": 3, "qty": 3})), "queue");
    let command_id = command.id().to_string();
    let response = handler.process_message(command.into_envelope()).await;
    assert_eq!(response.result(), Some(&json!({"total": 9})));
    assert_eq!(response.correlation_id(), Some(command_id.as_str()));

    let event = Envelope::new("queue").with_field("command_name", "calcTotal");
    let response = handler.process_message(event).await;
    assert_eq!(response.status(), ResponseStatus::Error);
    assert!(response.error().unwrap().contains("is not a command"));
}

#[tokio::test]
async fn dispatch_envelope_keeps_caller_identity() {
    let bus = CommandBus::new();
    bus.register_handler("calcTotal", Arc::new(order_handler()));
    let command = CommandEnvelope::new("calcTotal", params(json!({"price": 1, "qty": 1})), "cart");

    let response = bus.dispatch_envelope(command.clone()).await.unwrap();

    assert_eq!(response.correlation_id(), Some(command.id()));
    assert_eq!(response.envelope.destination.as_deref(), Some("cart"));
}

#[tokio::test]
async fn concurrent_dispatch_through_shared_bus() {
    let bus = Arc::new(CommandBus::new());
    bus.register_handler("calcTotal", Arc::new(order_handler()));

    let mut tasks = tokio::task::JoinSet::new();
    for qty in 1..=20 {
        let bus = Arc::clone(&bus);
        tasks.spawn(async move {
            let response = bus
                .dispatch("calcTotal", params(json!({"price": 10, "qty": qty})), "load")
                .await
                .unwrap();
            (qty, response)
        });
    }

    let mut seen = 0;
    while let Some(joined) = tasks.join_next().await {
        let (qty, response) = joined.unwrap();
        assert_eq!(response.result(), Some(&json!({"total": 10 * qty})));
        seen += 1;
    }
    assert_eq!(seen, 20);
}
