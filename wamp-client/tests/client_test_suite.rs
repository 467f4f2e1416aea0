//! End-to-end scenarios against the in-process test router.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinSet;
use wamp_client::{Args, CallOutcome, Client, Error, Kwargs, uris};
use wamp_types::codes;

use crate::setup::{TestRouter, wait_until};


#[tokio::test(flavor = "multi_thread")]
async fn begin_yields_a_session_id() {
    let router = TestRouter::start().await;
    let client = Client::connect(router.peer_config()).await.unwrap();
    let session_id = client.session_id().expect("session is established");
    assert!(session_id > 0);
    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn call_returns_the_callees_result() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register("get_date", Arc::new(|_args, _kwargs| Ok(json!("2016-01-01"))))
        .await
        .unwrap();

    let caller = Client::connect(router.peer_config()).await.unwrap();
    let outcome = caller.call("get_date", Args::new(), Kwargs::new()).await.unwrap();
    assert_eq!(outcome.value(), Some(&json!("2016-01-01")));

    caller.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_without_a_registration_returns_none() {
    let router = TestRouter::start().await;
    let client = Client::connect(router.peer_config()).await.unwrap();
    assert_eq!(client.get_registration_lookup("spam").await.unwrap(), None);
    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_after_register_returns_the_recorded_id() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    let registration_id = service
        .register("spam", Arc::new(|_args, _kwargs| Ok(json!("eggs and ham"))))
        .await
        .unwrap();
    assert_eq!(service.session().registration("spam"), Some(registration_id));

    let client = Client::connect(router.peer_config()).await.unwrap();
    assert_eq!(
        client.get_registration_lookup("spam").await.unwrap(),
        Some(registration_id)
    );

    client.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn fetching_a_missing_registration_is_an_error_value() {
    let router = TestRouter::start().await;
    let client = Client::connect(router.peer_config()).await.unwrap();

    match client.get_registration("spam").await.unwrap() {
        CallOutcome::Error(error) => {
            assert_eq!(error.request_type, codes::CALL);
            assert_eq!(error.error, uris::ERROR_NO_SUCH_REGISTRATION);
            assert_eq!(
                error.args,
                vec![json!("no registration with ID spam exists on this dealer")]
            );
        }
        CallOutcome::Result(result) => panic!("expected an error, got {result:?}"),
    }

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn get_registration_returns_the_detail_record() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    let registration_id = service
        .register("spam", Arc::new(|_args, _kwargs| Ok(json!("eggs and ham"))))
        .await
        .unwrap();

    let client = Client::connect(router.peer_config()).await.unwrap();
    let outcome = client.get_registration(registration_id).await.unwrap();
    let info = outcome.value().expect("registration detail").clone();
    assert_eq!(info["id"], json!(registration_id));
    assert_eq!(info["uri"], json!("spam"));
    assert_eq!(info["match"], json!("exact"));
    assert_eq!(info["invoke"], json!("single"));
    assert!(info["created"].is_string());

    client.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn on_create_fires_when_a_registration_appears() {
    let router = TestRouter::start().await;
    let meta_client = Client::connect(router.peer_config()).await.unwrap();
    let on_create_calls = Arc::new(AtomicUsize::new(0));
    meta_client
        .subscribe(uris::registration::ON_CREATE, {
            let on_create_calls = Arc::clone(&on_create_calls);
            Arc::new(move |_args, _kwargs| {
                on_create_calls.fetch_add(1, Ordering::Relaxed);
            })
        })
        .await
        .unwrap();
    assert_eq!(on_create_calls.load(Ordering::Relaxed), 0);

    let callee = Client::connect(router.peer_config()).await.unwrap();
    callee
        .register("foo", Arc::new(|_args, _kwargs| Ok(Value::Null)))
        .await
        .unwrap();

    wait_until("the on_create handler has fired", || {
        on_create_calls.load(Ordering::Relaxed) >= 1
    })
    .await;

    callee.close().await;
    meta_client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn on_unregister_fires_when_the_callee_leaves() {
    let router = TestRouter::start().await;
    let meta_client = Client::connect(router.peer_config()).await.unwrap();
    let on_unregister_calls = Arc::new(AtomicUsize::new(0));
    meta_client
        .subscribe(uris::registration::ON_UNREGISTER, {
            let on_unregister_calls = Arc::clone(&on_unregister_calls);
            Arc::new(move |_args, _kwargs| {
                on_unregister_calls.fetch_add(1, Ordering::Relaxed);
            })
        })
        .await
        .unwrap();

    let callee = Client::connect(router.peer_config()).await.unwrap();
    callee
        .register("foo", Arc::new(|_args, _kwargs| Ok(Value::Null)))
        .await
        .unwrap();
    callee.close().await;

    wait_until("the on_unregister handler has fired", || {
        on_unregister_calls.load(Ordering::Relaxed) >= 1
    })
    .await;

    meta_client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn count_callees_for_a_single_registration() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    let registration_id = service
        .register("spam", Arc::new(|_args, _kwargs| Ok(json!("spam"))))
        .await
        .unwrap();

    let client = Client::connect(router.peer_config()).await.unwrap();
    assert_eq!(client.count_callees(registration_id).await.unwrap(), 1);
    let callees = client.list_callees(registration_id).await.unwrap();
    assert_eq!(callees, vec![service.session_id().unwrap()]);

    client.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_list_grows_with_registrations() {
    let router = TestRouter::start().await;
    let client = Client::connect(router.peer_config()).await.unwrap();
    let list = client.get_registration_list().await.unwrap();
    assert_eq!(list["exact"], json!([]));

    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register("get_date", Arc::new(|_args, _kwargs| Ok(json!("2016-01-01"))))
        .await
        .unwrap();

    let list = client.get_registration_list().await.unwrap();
    assert_eq!(list["exact"].as_array().unwrap().len(), 1);

    service.close().await;
    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ticket_challenge_is_answered() {
    let router = TestRouter::with_ticket(Some("open sesame")).await;
    let config = router
        .peer_config()
        .with_on_challenge(Arc::new(|_authmethod, _extra| "open sesame".to_owned()));
    let client = Client::connect(config).await.unwrap();
    assert!(client.session_id().is_some());
    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn challenge_without_a_handler_fails() {
    let router = TestRouter::with_ticket(Some("open sesame")).await;
    let err = Client::connect(router.peer_config()).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_rejected_ticket_aborts_establishment() {
    let router = TestRouter::with_ticket(Some("open sesame")).await;
    let config = router
        .peer_config()
        .with_on_challenge(Arc::new(|_authmethod, _extra| "wrong".to_owned()));
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn calling_an_unregistered_procedure_is_an_error_value() {
    let router = TestRouter::start().await;
    let client = Client::connect(router.peer_config()).await.unwrap();
    let outcome = client.call("nope", Args::new(), Kwargs::new()).await.unwrap();
    let error = outcome.as_error().expect("the dealer knows no such procedure");
    assert_eq!(error.error, uris::ERROR_NO_SUCH_PROCEDURE);
    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_failing_invocation_handler_surfaces_as_an_error_value() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register(
            "explode",
            Arc::new(|_args, _kwargs| Err("the hamster fell off the wheel".to_owned())),
        )
        .await
        .unwrap();

    let caller = Client::connect(router.peer_config()).await.unwrap();
    let outcome = caller.call("explode", Args::new(), Kwargs::new()).await.unwrap();
    let error = outcome.as_error().expect("handler failure becomes ERROR");
    assert_eq!(error.error, uris::ERROR_RUNTIME_ERROR);
    assert_eq!(error.args, vec![json!("the hamster fell off the wheel")]);

    caller.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn events_reach_the_subscriber() {
    let router = TestRouter::start().await;
    let subscriber = Client::connect(router.peer_config()).await.unwrap();
    let received = Arc::new(Mutex::new(Vec::<Args>::new()));
    subscriber
        .subscribe("com.example.temperature", {
            let received = Arc::clone(&received);
            Arc::new(move |args, _kwargs| received.lock().unwrap().push(args))
        })
        .await
        .unwrap();

    let publisher = Client::connect(router.peer_config()).await.unwrap();
    publisher
        .publish("com.example.temperature", vec![json!(21.5)], Kwargs::new())
        .await
        .unwrap();

    wait_until("the event has been delivered", || {
        !received.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(received.lock().unwrap()[0], vec![json!(21.5)]);

    publisher.close().await;
    subscriber.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn acknowledged_publish_returns_a_publication_id() {
    let router = TestRouter::start().await;
    let publisher = Client::connect(router.peer_config()).await.unwrap();
    let publication_id = publisher
        .publish_acknowledged("com.example.news", vec![json!("extra extra")], Kwargs::new())
        .await
        .unwrap();
    assert!(publication_id > 0);
    publisher.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unregister_removes_the_registration() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register("spam", Arc::new(|_args, _kwargs| Ok(json!("spam"))))
        .await
        .unwrap();

    let client = Client::connect(router.peer_config()).await.unwrap();
    assert!(client.get_registration_lookup("spam").await.unwrap().is_some());

    service.unregister("spam").await.unwrap();
    assert_eq!(service.session().registration("spam"), None);
    assert_eq!(client.get_registration_lookup("spam").await.unwrap(), None);

    let err = service.unregister("spam").await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");

    client.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_stops_event_delivery() {
    let router = TestRouter::start().await;
    let subscriber = Client::connect(router.peer_config()).await.unwrap();
    let received = Arc::new(AtomicUsize::new(0));
    subscriber
        .subscribe("com.example.ticks", {
            let received = Arc::clone(&received);
            Arc::new(move |_args, _kwargs| {
                received.fetch_add(1, Ordering::Relaxed);
            })
        })
        .await
        .unwrap();

    let publisher = Client::connect(router.peer_config()).await.unwrap();
    publisher
        .publish("com.example.ticks", Args::new(), Kwargs::new())
        .await
        .unwrap();
    wait_until("the first event has been delivered", || {
        received.load(Ordering::Relaxed) == 1
    })
    .await;

    subscriber.unsubscribe("com.example.ticks").await.unwrap();
    publisher
        .publish_acknowledged("com.example.ticks", Args::new(), Kwargs::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(received.load(Ordering::Relaxed), 1);

    publisher.close().await;
    subscriber.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_reply_timeout_releases_only_that_waiter() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register(
            "slow",
            Arc::new(|_args, _kwargs| {
                std::thread::sleep(Duration::from_secs(1));
                Ok(Value::Null)
            }),
        )
        .await
        .unwrap();
    service
        .register("fast", Arc::new(|_args, _kwargs| Ok(json!("pong"))))
        .await
        .unwrap();

    let config = router
        .peer_config()
        .with_reply_timeout(Duration::from_millis(300));
    let caller = Client::connect(config).await.unwrap();

    let err = caller
        .call("slow", Args::new(), Kwargs::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "got {err:?}");

    // wait out the slow handler so its late RESULT reaches the dispatcher
    // (and is dropped there); the session itself survives
    tokio::time::sleep(Duration::from_secs(1)).await;
    let outcome = caller.call("fast", Args::new(), Kwargs::new()).await.unwrap();
    assert_eq!(outcome.value(), Some(&json!("pong")));

    caller.close().await;
    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_an_unclosed_client_releases_the_socket() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register("ephemeral", Arc::new(|_args, _kwargs| Ok(Value::Null)))
        .await
        .unwrap();

    let client = Client::connect(router.peer_config()).await.unwrap();
    assert!(
        client
            .get_registration_lookup("ephemeral")
            .await
            .unwrap()
            .is_some()
    );

    drop(service);

    // the router notices the dead socket and clears the registration
    let lookup = || async {
        client
            .get_registration_lookup("ephemeral")
            .await
            .unwrap()
            .is_none()
    };
    for _ in 0..50 {
        if lookup().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(lookup().await, "the registration should be gone");

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_calls_correlate_to_their_own_waiters() {
    let router = TestRouter::start().await;
    let service = Client::connect(router.peer_config()).await.unwrap();
    service
        .register(
            "echo",
            Arc::new(|args, _kwargs| Ok(args.first().cloned().unwrap_or(Value::Null))),
        )
        .await
        .unwrap();

    let caller = Arc::new(Client::connect(router.peer_config()).await.unwrap());
    let mut calls = JoinSet::new();
    for i in 0..8u64 {
        let caller = Arc::clone(&caller);
        calls.spawn(async move {
            let outcome = caller
                .call("echo", vec![json!(i)], Kwargs::new())
                .await
                .unwrap();
            (i, outcome)
        });
    }
    while let Some(result) = calls.join_next().await {
        let (i, outcome) = result.unwrap();
        assert_eq!(outcome.value(), Some(&json!(i)));
    }

    service.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent_at_the_session_level() {
    let router = TestRouter::start().await;
    let client = Client::connect(router.peer_config()).await.unwrap();
    let mut session = wamp_client::Session::new(router.peer_config());
    session.begin().await.unwrap();
    assert!(session.id().is_some());
    session.end().await;
    assert_eq!(session.id(), None);
    assert_eq!(session.phase(), wamp_client::Phase::Closed);
    session.end().await;
    assert_eq!(session.phase(), wamp_client::Phase::Closed);
    client.close().await;
}
