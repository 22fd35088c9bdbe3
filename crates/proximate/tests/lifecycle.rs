//! Reference-count lifecycle: release, revocation, and the closing handshake.

use proximate::{
    registry, wrap, ByHandle, Object, ProximateError, Value, WrapOptions,
};
use proximate_channel::pair;
use std::sync::Arc;
use std::time::Duration;

fn identity() -> Object {
    Object::function(|mut args| async move { Ok(args.remove(0)) })
}

fn by_handle() -> Arc<ByHandle> {
    Arc::new(ByHandle::callables())
}

#[tokio::test]
async fn test_release_semantics() {
    let (a, b) = pair();
    let _server = wrap(
        a,
        WrapOptions::new()
            .receiver(identity())
            .protocol("fn", by_handle()),
    );
    let proxy = wrap(b, WrapOptions::new().protocol("fn", by_handle()));

    let f = Object::function(|_args| async move { Ok(Value::Int(91)) });
    let f_value = Value::Object(f);
    let g = proxy.call(vec![f_value.clone()]).await.unwrap();
    assert_eq!(g.invoke(vec![]).await.unwrap(), Value::Int(91));
    assert!(registry().id_of(&f_value).is_some());

    let handle = g.as_handle().unwrap().clone();
    handle.release().await.unwrap();
    // A released handle rejects locally, whatever the peer still holds.
    assert!(matches!(
        handle.call(vec![]).await,
        Err(ProximateError::Released)
    ));
    // Release is idempotent per-handle.
    handle.release().await.unwrap();

    // After the closing handshake, the registration introduced for f is
    // drained on both sides.
    proxy.close().await.unwrap();
    assert!(registry().id_of(&f_value).is_none());
}

#[tokio::test]
async fn test_revoked_receiver_rejects() {
    let (a, b) = pair();
    let exposed = Object::function(|_args| async move { Ok(Value::Int(5)) });
    let exposed_value = Value::Object(exposed);
    let offered = exposed_value.clone();
    let receiver = Object::function(move |_args| {
        let offered = offered.clone();
        async move { Ok(offered) }
    });
    let _server = wrap(
        a,
        WrapOptions::new()
            .receiver(receiver)
            .protocol("fn", by_handle()),
    );
    let proxy = wrap(b, WrapOptions::new().protocol("fn", by_handle()));

    let g = proxy.call(vec![]).await.unwrap();
    assert_eq!(g.invoke(vec![]).await.unwrap(), Value::Int(5));

    registry().revoke_all(&exposed_value);
    let err = g.invoke(vec![]).await.unwrap_err();
    match err {
        ProximateError::Remote { message, .. } => {
            assert!(message.contains("Unknown receiver"), "{message}");
        }
        other => panic!("Expected remote unknown-receiver, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_rejects_in_flight_requests() {
    let (a, b) = pair();
    let receiver = Object::function(|_args| async move {
        futures_never().await;
        Ok(Value::Null)
    });
    let _server = wrap(a, WrapOptions::new().receiver(receiver));
    let proxy = wrap(b, WrapOptions::new());

    let pending_proxy = proxy.clone();
    let in_flight = tokio::spawn(async move { pending_proxy.call(vec![]).await });
    // Let the request reach the peer before closing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    proxy.close().await.unwrap();
    let outcome = in_flight.await.unwrap();
    assert!(matches!(outcome, Err(ProximateError::ConnectionClosed)));
}

async fn futures_never() {
    futures::future::pending::<()>().await
}

#[tokio::test]
async fn test_registry_shared_across_connections() {
    let (a1, b1) = pair();
    let (a2, b2) = pair();
    let _server1 = wrap(
        a1,
        WrapOptions::new()
            .receiver(identity())
            .protocol("fn", by_handle()),
    );
    let _server2 = wrap(
        a2,
        WrapOptions::new()
            .receiver(identity())
            .protocol("fn", by_handle()),
    );
    let proxy1 = wrap(b1, WrapOptions::new().protocol("fn", by_handle()));
    let proxy2 = wrap(b2, WrapOptions::new().protocol("fn", by_handle()));

    // Offering the same object over two connections shares one entry.
    let shared = Value::Object(Object::function(|_args| async move { Ok(Value::Int(1)) }));
    let g1 = proxy1.call(vec![shared.clone()]).await.unwrap();
    let g2 = proxy2.call(vec![shared.clone()]).await.unwrap();
    let id = registry().id_of(&shared).expect("shared object registered");
    assert_eq!(registry().count(&id), 2);
    assert_eq!(g1.invoke(vec![]).await.unwrap(), Value::Int(1));
    assert_eq!(g2.invoke(vec![]).await.unwrap(), Value::Int(1));

    // Each handshake drains its own connection's share.
    proxy1.close().await.unwrap();
    assert_eq!(registry().count(&id), 1);
    proxy2.close().await.unwrap();
    assert!(!registry().contains(&id));
}

#[tokio::test]
async fn test_release_of_member_handle_is_local() {
    let (a, b) = pair();
    let _server = wrap(
        a,
        WrapOptions::new().receiver(Object::new().with_slot("value", 3i64)),
    );
    let proxy = wrap(b, WrapOptions::new());

    let member = proxy.get("value");
    member.release().await.unwrap();
    // The member handle is poisoned locally; the primary is untouched.
    assert!(matches!(
        member.fetch().await,
        Err(ProximateError::Released)
    ));
    assert_eq!(proxy.get("value").fetch().await.unwrap(), Value::Int(3));
}

#[tokio::test]
async fn test_close_is_idempotent_and_drains_primary() {
    let (a, b) = pair();
    let receiver = Value::Object(Object::new().with_slot("value", 1i64));
    let _server = wrap(a, WrapOptions::new().receiver(receiver.clone()));
    let proxy = wrap(b, WrapOptions::new());

    assert_eq!(proxy.get("value").fetch().await.unwrap(), Value::Int(1));
    assert!(registry().id_of(&receiver).is_some());

    proxy.close().await.unwrap();
    assert!(registry().id_of(&receiver).is_none());
    // Second close is a no-op.
    proxy.close().await.unwrap();
    // Operations after close reject.
    assert!(matches!(
        proxy.get("value").fetch().await,
        Err(ProximateError::ConnectionClosed)
    ));
}
