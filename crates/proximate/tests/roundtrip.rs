//! End-to-end round trips between two connections over an in-memory channel.

use proximate::{
    registry, wrap, ByHandle, ByteBuf, DecodeCx, EncodeCx, Object, ProximateError,
    ProximateResult, Protocol, Transferable, Value, WrapOptions,
};
use proximate_channel::pair;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

fn identity() -> Object {
    Object::function(|mut args| async move { Ok(args.remove(0)) })
}

#[tokio::test]
async fn test_primary_call() {
    let (a, b) = pair();
    let receiver = Value::Object(identity());
    let _server = wrap(a, WrapOptions::new().receiver(receiver.clone()));
    let proxy = wrap(b, WrapOptions::new());

    let out = proxy.call(vec![Value::Int(42)]).await.unwrap();
    assert_eq!(out, Value::Int(42));

    proxy.close().await.unwrap();
    // The handshake drained the primary registration.
    assert!(registry().id_of(&receiver).is_none());
}

#[tokio::test]
async fn test_roundtrip_primitives() {
    let (a, b) = pair();
    let _server = wrap(a, WrapOptions::new().receiver(identity()));
    let proxy = wrap(b, WrapOptions::new());

    for v in [
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(-7),
        Value::Float(2.5),
        Value::Str("hello".to_string()),
        Value::Str(String::new()),
    ] {
        let out = proxy.call(vec![v.clone()]).await.unwrap();
        assert_eq!(out, v);
    }
}

#[tokio::test]
async fn test_roundtrip_compounds() {
    let (a, b) = pair();
    let _server = wrap(a, WrapOptions::new().receiver(identity()));
    let proxy = wrap(b, WrapOptions::new());

    let compound = Value::Map(BTreeMap::from([
        (
            "list".to_string(),
            Value::List(vec![Value::Int(1), Value::Str("two".to_string()), Value::Null]),
        ),
        (
            "nested".to_string(),
            Value::Map(BTreeMap::from([("ok".to_string(), Value::Bool(true))])),
        ),
    ]));
    let out = proxy.call(vec![compound.clone()]).await.unwrap();
    assert_eq!(out, compound);
}

#[tokio::test]
async fn test_nested_get() {
    let (a, b) = pair();
    let receiver = Object::new().with_slot("value", 42i64).with_slot(
        "foo",
        Value::Map(BTreeMap::from([(
            "bar".to_string(),
            Value::Str("baz".to_string()),
        )])),
    );
    let _server = wrap(a, WrapOptions::new().receiver(receiver));
    let proxy = wrap(b, WrapOptions::new());

    assert_eq!(proxy.get("value").fetch().await.unwrap(), Value::Int(42));
    assert_eq!(
        proxy.get("foo").get("bar").fetch().await.unwrap(),
        Value::Str("baz".to_string())
    );
    // Missing members read as null, like the host language's undefined.
    assert_eq!(proxy.get("missing").fetch().await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_write_then_read() {
    let (a, b) = pair();
    let receiver = Object::new().with_slot("value", 42i64);
    let _server = wrap(a, WrapOptions::new().receiver(receiver.clone()));
    let proxy = wrap(b, WrapOptions::new());

    proxy.set("value", 21i64).await.unwrap();
    assert_eq!(proxy.get("value").fetch().await.unwrap(), Value::Int(21));
    // The live receiver object itself was mutated.
    assert_eq!(receiver.slot("value").unwrap(), Value::Int(21));
}

#[tokio::test]
async fn test_write_through_nested_object() {
    let (a, b) = pair();
    let child = Object::new().with_slot("x", 1i64);
    let receiver = Object::new().with_slot("child", child.clone());
    let _server = wrap(a, WrapOptions::new().receiver(receiver));
    let proxy = wrap(b, WrapOptions::new());

    proxy.get("child").set("x", 9i64).await.unwrap();
    assert_eq!(
        proxy.get("child").get("x").fetch().await.unwrap(),
        Value::Int(9)
    );
    assert_eq!(child.slot("x").unwrap(), Value::Int(9));
}

#[tokio::test]
async fn test_error_roundtrip() {
    let (a, b) = pair();
    let receiver = Object::function(|_args| async move {
        Err::<Value, _>(ProximateError::Remote {
            message: "x is not defined".to_string(),
            stack: Some("ReferenceError: x is not defined\n    at apply".to_string()),
        })
    });
    let _server = wrap(a, WrapOptions::new().receiver(receiver));
    let proxy = wrap(b, WrapOptions::new());

    let err = proxy.call(vec![]).await.unwrap_err();
    match err {
        ProximateError::Remote { message, stack } => {
            assert_eq!(message, "x is not defined");
            assert_eq!(
                stack.as_deref(),
                Some("ReferenceError: x is not defined\n    at apply")
            );
        }
        other => panic!("Expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invoking_non_function_rejects() {
    let (a, b) = pair();
    let _server = wrap(
        a,
        WrapOptions::new().receiver(Object::new().with_slot("value", 1i64)),
    );
    let proxy = wrap(b, WrapOptions::new());

    let err = proxy.get("value").call(vec![]).await.unwrap_err();
    match err {
        ProximateError::Remote { message, .. } => {
            assert!(message.contains("Not callable"), "{message}");
        }
        other => panic!("Expected remote not-callable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pass_function_by_handle() {
    let (a, b) = pair();
    let _server = wrap(
        a,
        WrapOptions::new()
            .receiver(identity())
            .protocol("fn", Arc::new(ByHandle::callables())),
    );
    let proxy = wrap(
        b,
        WrapOptions::new().protocol("fn", Arc::new(ByHandle::callables())),
    );

    let f = Object::function(|_args| async move { Ok(Value::Int(91)) });
    let g = proxy.call(vec![Value::Object(f)]).await.unwrap();
    assert!(g.as_handle().is_some());
    assert_eq!(g.invoke(vec![]).await.unwrap(), Value::Int(91));
}

#[tokio::test]
async fn test_handle_argument_reaches_peer_function() {
    let (a, b) = pair();
    // The receiver invokes whatever callable it is handed.
    let receiver = Object::function(|mut args| async move {
        let callback = args.remove(0);
        callback.invoke(vec![Value::Int(20)]).await
    });
    let _server = wrap(
        a,
        WrapOptions::new()
            .receiver(receiver)
            .protocol("fn", Arc::new(ByHandle::callables())),
    );
    let proxy = wrap(
        b,
        WrapOptions::new().protocol("fn", Arc::new(ByHandle::callables())),
    );

    let double = Object::function(|mut args| async move {
        let n = args.remove(0).as_int().unwrap_or(0);
        Ok(Value::Int(n * 2))
    });
    let out = proxy.call(vec![Value::Object(double)]).await.unwrap();
    assert_eq!(out, Value::Int(40));
}

#[tokio::test]
async fn test_unknown_protocol_rejects() {
    let (a, b) = pair();
    // Only the caller knows the "fn" key; the peer must reject the payload.
    let _server = wrap(a, WrapOptions::new().receiver(identity()));
    let proxy = wrap(
        b,
        WrapOptions::new().protocol("fn", Arc::new(ByHandle::callables())),
    );

    let f = Object::function(|_args| async move { Ok(Value::Null) });
    let err = proxy.call(vec![Value::Object(f)]).await.unwrap_err();
    match err {
        ProximateError::Remote { message, .. } => {
            assert!(message.contains("Unknown protocol"), "{message}");
        }
        other => panic!("Expected remote unknown-protocol, got {other:?}"),
    }
}

#[tokio::test]
async fn test_uncloneable_argument_fails_locally() {
    let (a, b) = pair();
    let _server = wrap(a, WrapOptions::new().receiver(identity()));
    let proxy = wrap(b, WrapOptions::new());

    // No protocol claims a live object, so serialization must refuse it.
    let err = proxy
        .call(vec![Value::Object(Object::new())])
        .await
        .unwrap_err();
    assert!(matches!(err, ProximateError::NotCloneable));
}

/// Transfer-optimized byte-buffer protocol: the payload references a slot in
/// the message's transfer list and the buffer is detached from the sender.
struct BufferTransfer;

impl Protocol for BufferTransfer {
    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Bytes(_))
    }

    fn serialize(&self, value: Value, cx: &mut EncodeCx) -> ProximateResult<JsonValue> {
        let Value::Bytes(buf) = value else {
            return Err(ProximateError::MalformedPayload(
                "buffer protocol over a non-buffer value".into(),
            ));
        };
        let slot = cx.transfer(Transferable::Buffer(buf.detach()));
        Ok(json!({ "slot": slot }))
    }

    fn deserialize(&self, data: JsonValue, cx: &mut DecodeCx<'_>) -> ProximateResult<Value> {
        let slot = data
            .get("slot")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| ProximateError::MalformedPayload("missing buffer slot".into()))?;
        match cx.take_transfer(slot as usize) {
            Some(Transferable::Buffer(bytes)) => Ok(Value::Bytes(ByteBuf::new(bytes))),
            None => Err(ProximateError::MalformedPayload(
                "buffer transfer not present".into(),
            )),
        }
    }
}

#[tokio::test]
async fn test_transferable_buffer_detaches() {
    let (a, b) = pair();
    let _server = wrap(
        a,
        WrapOptions::new()
            .receiver(identity())
            .protocol("buffer", Arc::new(BufferTransfer)),
    );
    let proxy = wrap(
        b,
        WrapOptions::new().protocol("buffer", Arc::new(BufferTransfer)),
    );

    let buf = ByteBuf::new(vec![1, 2, 3, 4, 5]);
    let out = proxy.call(vec![Value::Bytes(buf.clone())]).await.unwrap();
    // The original buffer was detached by the transfer...
    assert_eq!(buf.len(), 0);
    // ...and the received copy carries the original bytes.
    match out {
        Value::Bytes(received) => assert_eq!(received.bytes(), vec![1, 2, 3, 4, 5]),
        other => panic!("Expected bytes, got {other:?}"),
    }
}
