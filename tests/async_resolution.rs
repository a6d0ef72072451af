use ferrous_refs::{async_trait, AsyncFactory, Container, DiError, DiResult, Provider, Token};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Pool {
    serial: usize,
}

fn slow_pool(calls: &Arc<AtomicUsize>) -> Provider<Pool> {
    let calls = Arc::clone(calls);
    Provider::async_factory(move |_c| {
        let calls = Arc::clone(&calls);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Pool {
                serial: calls.fetch_add(1, Ordering::SeqCst) + 1,
            })
        }
    })
}

#[tokio::test]
async fn concurrent_resolves_share_one_build() {
    let pool = Token::<Pool>::new("POOL");
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    container.register(&pool, slow_pool(&calls)).unwrap();

    let (a, b, c) = tokio::join!(
        container.resolve_async(&pool),
        container.resolve_async(&pool),
        container.resolve_async(&pool)
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_share_one_build() {
    let pool = Token::<Pool>::new("POOL");
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    container.register(&pool, slow_pool(&calls)).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let container = container.clone();
            tokio::spawn(async move { container.resolve_async(&pool).await.map(|p| p.serial) })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scoped_async_builds_once_per_scope() {
    let pool = Token::<Pool>::new("POOL");
    let calls = Arc::new(AtomicUsize::new(0));
    let root = Container::new();
    root.register(&pool, slow_pool(&calls).scoped()).unwrap();

    let a = root.create_scope().unwrap();
    let b = root.create_scope().unwrap();
    let (a1, a2, b1) = tokio::join!(a.resolve_async(&pool), a.resolve_async(&pool), b.resolve_async(&pool));
    let (a1, a2, b1) = (a1.unwrap(), a2.unwrap(), b1.unwrap());

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_async_is_not_serialized() {
    let ticket = Token::<usize>::new("TICKET");
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let (gate, counter) = (Arc::clone(&barrier), Arc::clone(&calls));
    container
        .register(
            &ticket,
            Provider::async_factory(move |_c| {
                let gate = Arc::clone(&gate);
                let counter = Arc::clone(&counter);
                async move {
                    // both builds must be in flight at once to get past this
                    gate.wait().await;
                    Ok(counter.fetch_add(1, Ordering::SeqCst))
                }
            })
            .transient(),
        )
        .unwrap();

    let both = async { tokio::join!(container.resolve_async(&ticket), container.resolve_async(&ticket)) };
    let (a, b) = tokio::time::timeout(Duration::from_secs(5), both).await.expect("transient builds deadlocked");
    let mut values = vec![*a.unwrap(), *b.unwrap()];
    values.sort_unstable();
    assert_eq!(values, vec![0, 1]);
}

#[tokio::test]
async fn sync_resolve_of_async_provider_fails() {
    let pool = Token::<Pool>::new("POOL");
    let alias = Token::<Pool>::new("POOL_ALIAS");
    let container = Container::new();
    container.register(&pool, slow_pool(&Arc::default())).unwrap();
    container.register(&alias, Provider::alias(&pool)).unwrap();

    assert!(matches!(container.resolve(&pool), Err(DiError::AsyncProviderMismatch("POOL"))));
    assert!(matches!(container.resolve(&alias), Err(DiError::AsyncProviderMismatch("POOL"))));

    let via_alias = container.resolve_async(&alias).await.unwrap();
    assert!(Arc::ptr_eq(&via_alias, &container.resolve_async(&pool).await.unwrap()));
    // still async-only after caching
    assert!(container.resolve(&pool).is_err());
}

#[tokio::test]
async fn resolve_async_serves_sync_providers() {
    let port = Token::<u16>::new("PORT");
    let container = Container::new();
    container.register(&port, Provider::value(8080)).unwrap();
    assert_eq!(*container.resolve_async(&port).await.unwrap(), 8080);

    let missing = Token::<u16>::new("MISSING");
    assert!(matches!(container.resolve_async(&missing).await, Err(DiError::ServiceNotFound(_))));
}

#[tokio::test]
async fn async_self_dependency_is_a_cycle() {
    let a = Token::<u32>::new("A");
    let container = Container::new();
    container
        .register(
            &a,
            Provider::async_factory(move |c: Container| async move { Ok::<_, DiError>(*c.resolve_async(&a).await? + 1) }),
        )
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), container.resolve_async(&a))
        .await
        .expect("self dependency deadlocked");
    match outcome {
        Err(DiError::CircularDependency(path)) => assert_eq!(path, vec!["A", "A"]),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn async_mutual_dependency_is_a_cycle() {
    let a = Token::<u32>::new("A");
    let b = Token::<u32>::new("B");
    let container = Container::new();
    container
        .register(&a, Provider::async_factory(move |c: Container| async move { Ok::<_, DiError>(*c.resolve_async(&b).await?) }))
        .unwrap();
    container
        .register(&b, Provider::async_factory(move |c: Container| async move { Ok::<_, DiError>(*c.resolve_async(&a).await?) }))
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), container.resolve_async(&a))
        .await
        .expect("mutual dependency deadlocked");
    match outcome {
        Err(DiError::CircularDependency(path)) => assert_eq!(path, vec!["A", "B", "A"]),
        other => panic!("unexpected: {:?}", other),
    }
    // the failed build left nothing cached and no chain behind
    assert!(matches!(
        container.resolve_async(&b).await,
        Err(DiError::CircularDependency(path)) if path == vec!["B", "A", "B"]
    ));
}

#[tokio::test]
async fn async_factory_can_depend_on_sync_services() {
    struct Client {
        url: Arc<String>,
    }
    let url = Token::<String>::new("URL");
    let client = Token::<Client>::new("CLIENT");
    let root = Container::new();
    root.register(&url, Provider::value("https://api.local".to_string())).unwrap();
    root.register(
        &client,
        Provider::async_factory(move |c: Container| async move {
            tokio::task::yield_now().await;
            Ok::<_, DiError>(Client { url: c.resolve(&url)? })
        }),
    )
    .unwrap();

    let child = root.create_scope().unwrap();
    assert_eq!(*child.resolve_async(&client).await.unwrap().url, "https://api.local");
    assert!(Arc::ptr_eq(
        &child.resolve_async(&client).await.unwrap(),
        &root.resolve_async(&client).await.unwrap()
    ));
}

#[tokio::test]
async fn failed_async_build_is_retried() {
    let flaky = Token::<String>::new("FLAKY");
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let container = Container::new();
    container
        .register(
            &flaky,
            Provider::async_factory(move |_c| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(DiError::factory("FLAKY", "handshake timed out"))
                    } else {
                        Ok(format!("attempt {attempt}"))
                    }
                }
            }),
        )
        .unwrap();

    assert!(matches!(container.resolve_async(&flaky).await, Err(DiError::Factory { .. })));
    assert_eq!(*container.resolve_async(&flaky).await.unwrap(), "attempt 1");
    assert_eq!(*container.resolve_async(&flaky).await.unwrap(), "attempt 1");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

struct Handshake {
    peer: String,
}

struct HandshakeFactory {
    peer: &'static str,
}

#[async_trait]
impl AsyncFactory<Handshake> for HandshakeFactory {
    async fn create(&self, _container: Container) -> DiResult<Handshake> {
        tokio::task::yield_now().await;
        Ok(Handshake { peer: self.peer.to_string() })
    }
}

#[tokio::test]
async fn trait_factories_and_async_refs() {
    let handshake = Token::<Handshake>::new("HANDSHAKE");
    let container = Container::new();
    container
        .register(&handshake, Provider::from_async(HandshakeFactory { peer: "node-1" }).scoped())
        .unwrap();

    let scope = container.create_scope().unwrap();
    let handle = scope.acquire_ref_async(&handshake).await.unwrap();
    assert_eq!(handle.current().unwrap().peer, "node-1");
    assert_eq!(scope.refs().ref_count(&handshake), 1);

    scope.dispose();
    assert!(!handle.is_alive());
    assert!(matches!(scope.resolve_async(&handshake).await, Err(DiError::ContextDisposed(_))));
}
