// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Response cache tests through the runtime pipeline.

use runtime::{
    AddressableReference, BincodeCloner, CacheSpec, Error, Handler, HandlerContext,
    InterfaceId, Message, MethodId, Pipeline, Reply, ResponseCache, Runtime,
    RuntimeConfig, Task, Value,
};

use parking_lot::Mutex;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

const QUOTE: MethodId = 7;

/// Remote service stub. Replies stay pending until the test resolves them.
#[derive(Default)]
pub struct RemoteQuotes {
    writes: AtomicUsize,
    pending: Mutex<Vec<Task<Reply>>>,
}

impl RemoteQuotes {
    fn resolve(&self, value: Value) {
        for task in self.pending.lock().drain(..) {
            task.succeed(Arc::new(value.clone()));
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Handler for RemoteQuotes {
    fn write(&self, _ctx: &HandlerContext, _message: Message) -> Result<Task<Reply>, Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let reply = Task::new();
        self.pending.lock().push(reply.clone());
        Ok(reply)
    }
}

fn setup() -> (Runtime, Arc<RemoteQuotes>) {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime
        .cache()
        .register(InterfaceId::new("Quotes"), QUOTE, CacheSpec::default());
    let remote = Arc::new(RemoteQuotes::default());
    runtime.pipeline().add_last("remote", remote.clone()).unwrap();
    (runtime, remote)
}

fn quote() -> Value {
    Value::object(
        "Quote",
        [("symbol", Value::from("EUR")), ("price", Value::Int(100))],
    )
}

#[tokio::test]
async fn test_concurrent_identical_calls_collapse() {
    let (runtime, remote) = setup();
    let eur = AddressableReference::new("Quotes", "eur");

    let first = runtime.invoke(eur.clone(), QUOTE, vec![Value::from("spot")]);
    let second = runtime.invoke(eur.clone(), QUOTE, vec![Value::from("spot")]);
    assert_eq!(remote.writes(), 1);

    remote.resolve(quote());
    assert_eq!(first.await, Ok(Arc::new(quote())));
    assert_eq!(second.await, Ok(Arc::new(quote())));

    // Served from the cache until the reference is flushed.
    runtime
        .invoke(eur.clone(), QUOTE, vec![Value::from("spot")])
        .await
        .unwrap();
    assert_eq!(remote.writes(), 1);

    assert_eq!(runtime.flush(&eur), 1);
    let third = runtime.invoke(eur, QUOTE, vec![Value::from("spot")]);
    assert_eq!(remote.writes(), 2);
    remote.resolve(Value::Int(1));
    assert_eq!(third.await, Ok(Arc::new(Value::Int(1))));
}

#[tokio::test]
async fn test_uncached_methods_always_go_downstream() {
    let (runtime, remote) = setup();
    let eur = AddressableReference::new("Quotes", "eur");
    runtime.invoke(eur.clone(), QUOTE + 1, vec![]);
    runtime.invoke(eur.clone(), QUOTE + 1, vec![]);
    runtime.invoke_one_way(eur, QUOTE, vec![]);
    assert_eq!(remote.writes(), 3);
    assert!(runtime.cache().is_empty());
}

#[tokio::test]
async fn test_failed_computation_is_a_miss() {
    let (runtime, remote) = setup();
    let eur = AddressableReference::new("Quotes", "eur");
    let failing = runtime.invoke(eur.clone(), QUOTE, vec![]);
    for task in remote.pending.lock().drain(..) {
        task.fail(Error::Timeout);
    }
    assert_eq!(failing.await, Err(Error::Timeout));

    let retry = runtime.invoke(eur, QUOTE, vec![]);
    assert_eq!(remote.writes(), 2);
    remote.resolve(Value::Int(3));
    assert_eq!(retry.await, Ok(Arc::new(Value::Int(3))));
}

#[tokio::test]
async fn test_mutating_a_reply_does_not_leak_to_other_callers() {
    let (runtime, remote) = setup();
    let eur = AddressableReference::new("Quotes", "eur");

    let first = runtime.invoke(eur.clone(), QUOTE, vec![]);
    let second = runtime.invoke(eur.clone(), QUOTE, vec![]);
    remote.resolve(quote());

    let mut mine = first.await.unwrap();
    Arc::get_mut(&mut mine)
        .and_then(|quote| quote.field_mut("price"))
        .map(|price| *price = Value::Int(1))
        .unwrap();
    assert_eq!(mine.field("price"), Some(&Value::Int(1)));

    let theirs = second.await.unwrap();
    assert_eq!(theirs.field("price"), Some(&Value::Int(100)));
    let later = runtime.invoke(eur, QUOTE, vec![]).await.unwrap();
    assert_eq!(later.field("price"), Some(&Value::Int(100)));
}

#[tokio::test]
async fn test_immutable_replies_are_shared() {
    let (runtime, remote) = setup();
    runtime.cache().immutability().register("Quote");
    let eur = AddressableReference::new("Quotes", "eur");

    let first = runtime.invoke(eur.clone(), QUOTE, vec![]);
    let second = runtime.invoke(eur, QUOTE, vec![]);
    remote.resolve(quote());
    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// Terminal stage answering every write with the same object.
struct Fixed;

impl Handler for Fixed {
    fn write(&self, _ctx: &HandlerContext, _message: Message) -> Result<Task<Reply>, Error> {
        Ok(Task::completed(Arc::new(quote())))
    }
}

#[tokio::test]
async fn test_bincode_cloner_and_expiry() {
    let cache = Arc::new(ResponseCache::with_cloner(Arc::new(BincodeCloner)));
    cache.register(
        InterfaceId::new("Quotes"),
        QUOTE,
        CacheSpec {
            ttl: Duration::from_millis(20),
            max_entries: 4,
        },
    );
    let pipeline = Pipeline::new();
    pipeline.add_last("cache", cache.clone()).unwrap();
    pipeline.add_last("fixed", Arc::new(Fixed)).unwrap();

    let call = || {
        pipeline.write(Message::Invocation(runtime::Invocation::new(
            AddressableReference::new("Quotes", "eur"),
            QUOTE,
            vec![],
        )))
    };
    let a = call().await.unwrap();
    let b = call().await.unwrap();
    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    // Expired entries are replaced, not duplicated.
    call().await.unwrap();
    assert_eq!(cache.len(), 1);
}
