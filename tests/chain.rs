use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use layerline::{Chain, Error, Layer, Run, middleware};
use parking_lot::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn delegate<I: Send + 'static, O: Send + 'static>() -> Layer<I, O> {
    Layer::new().on_request(|run: Run<I, O>| async move { run.advance().await })
}

fn suffix(tag: &'static str) -> impl Fn(String) -> std::future::Ready<String> + Send + Sync + 'static {
    move |v: String| std::future::ready(v + tag)
}

// --- Resolution and the response phase ---

#[tokio::test]
async fn single_layer_resolves_then_responds() {
    init_tracing();
    let chain = Chain::new().register(
        Layer::new()
            .on_request(|run: Run<i32>| async move {
                let input = run.input().unwrap_or_default();
                run.resolve(input + 1);
            })
            .on_response(|v: i32| async move { v + 20 }),
    );

    assert_eq!(chain.invoke(1).unwrap().await.unwrap(), 22);
}

#[tokio::test]
async fn response_handlers_run_backwards_from_the_resolving_layer() {
    init_tracing();
    let chain = Chain::<(), String>::new()
        .register(delegate().on_response(suffix(" one")))
        .register(
            Layer::new()
                .on_request(|run: Run<(), String>| async move { run.resolve("ok".to_owned()) })
                .on_response(suffix(" two")),
        )
        .register(delegate().on_response(suffix(" three")))
        .register(delegate().on_response(suffix(" NOPE")));

    assert_eq!(chain.invoke(()).unwrap().await.unwrap(), "ok two one");
}

#[tokio::test]
async fn layers_without_a_response_handler_leave_the_value_alone() {
    let chain = Chain::<(), String>::new()
        .register(delegate().on_response(suffix(" outer")))
        .register(delegate())
        .register(Layer::new())
        .register(middleware::fallback("inner".to_owned()));

    assert_eq!(chain.invoke(()).unwrap().await.unwrap(), "inner outer");
}

#[tokio::test]
async fn later_layers_never_see_a_resolved_request() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let chain = Chain::<u8>::new()
        .register(Layer::new().on_request(|run: Run<u8>| async move { run.resolve(1) }))
        .register(Layer::new().on_request(move |run: Run<u8>| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { run.resolve(2) }
        }));

    assert_eq!(chain.invoke(0).unwrap().await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn input_and_output_types_may_differ() {
    let chain = Chain::<u32, String>::new()
        .register(
            Layer::new()
                .on_request(|run: Run<u32, String>| async move {
                    let doubled = run.input().unwrap_or_default() * 2;
                    assert_eq!(run.replace_input(doubled), Ok(Some(21)));
                    run.advance().await;
                })
                .on_response(|s: String| async move { format!("[{s}]") }),
        )
        .register(Layer::new().on_request(|run: Run<u32, String>| async move {
            let input = run.input().unwrap_or_default();
            run.resolve(input.to_string());
        }));

    assert_eq!(chain.invoke(21).unwrap().await.unwrap(), "[42]");
}

// --- Failure paths ---

#[tokio::test]
async fn exhausted_chain_fails_with_not_processable() {
    init_tracing();
    let chain = Chain::<u8>::new().register(delegate()).register(delegate());

    let err = chain.invoke(0).unwrap().await.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(err.to_string(), "the input is not processable");
}

#[test]
fn chain_without_request_handlers_fails_synchronously() {
    let chain = Chain::<u8>::new()
        .register(Layer::new())
        .register(Layer::new().on_response(|v: u8| async move { v }));

    let err = chain.invoke(0).unwrap_err();
    assert!(matches!(err, Error::NoRequestHandlers));
    assert_eq!(err.to_string(), "this chain cannot handle requests");

    assert!(matches!(Chain::<u8>::new().invoke(0), Err(Error::NoRequestHandlers)));
}

#[derive(Debug, thiserror::Error)]
#[error("backend unavailable: {0}")]
struct BackendDown(&'static str);

#[tokio::test]
async fn rejection_reaches_the_caller_verbatim_and_skips_responses() {
    let responses = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&responses);

    let chain = Chain::<u8>::new()
        .register(delegate().on_response(move |v: u8| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { v }
        }))
        .register(Layer::new().on_request(|run: Run<u8>| async move {
            run.reject(BackendDown("db-1"));
        }));

    let err = chain.invoke(0).unwrap().await.unwrap_err();
    assert_eq!(err.to_string(), "backend unavailable: db-1");

    let original = err.into_rejection().unwrap();
    assert_eq!(original.downcast_ref::<BackendDown>().unwrap().0, "db-1");
    assert_eq!(responses.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn returning_err_from_a_request_handler_rejects() {
    let chain = Chain::<&'static str, u64>::new().register(Layer::new().on_request(
        |run: Run<&'static str, u64>| async move {
            let n: u64 = run.input().unwrap_or_default().parse()?;
            run.resolve(n);
            Ok::<_, std::num::ParseIntError>(())
        },
    ));

    assert_eq!(chain.invoke("12").unwrap().await.unwrap(), 12);

    let err = chain.invoke("twelve").unwrap().await.unwrap_err();
    assert_eq!(err.to_string(), "invalid digit found in string");
}

#[tokio::test]
async fn dropping_every_handle_abandons_the_run() {
    let chain = Chain::<u8>::new().register(Layer::new().on_request(|_run: Run<u8>| async {}));

    let err = chain.invoke(0).unwrap().await.unwrap_err();
    assert!(matches!(err, Error::Abandoned));
}

// --- Settlement latch ---

#[tokio::test]
async fn only_the_first_settlement_counts() {
    let chain = Chain::<u8>::new()
        .register(Layer::new().on_request(|run: Run<u8>| async move {
            run.resolve(1);
            run.resolve(2);
            run.reject("ignored");
            run.advance().await;
            assert_eq!(run.index(), Some(0));
        }))
        .register(Layer::new().on_request(|run: Run<u8>| async move { run.resolve(3) }));

    assert_eq!(chain.invoke(0).unwrap().await.unwrap(), 1);
}

#[tokio::test]
async fn rejection_after_resolution_is_dropped() {
    let chain = Chain::<u8>::new().register(Layer::new().on_request(|run: Run<u8>| async move {
        run.resolve(5);
        Err::<(), _>("too late")
    }));

    assert_eq!(chain.invoke(0).unwrap().await.unwrap(), 5);
}

#[tokio::test]
async fn a_rejection_is_not_overturned_by_a_later_resolve() {
    let chain = Chain::<u8>::new().register(Layer::new().on_request(|run: Run<u8>| async move {
        run.reject("first");
        run.resolve(1);
    }));

    let err = chain.invoke(0).unwrap().await.unwrap_err();
    assert_eq!(err.to_string(), "first");
}

#[tokio::test]
async fn exhaustion_beats_a_delayed_resolve() {
    let late = Arc::new(Mutex::new(None));
    let parked = Arc::clone(&late);

    let chain = Chain::<u8>::new()
        .register(Layer::new().on_request(move |run: Run<u8>| {
            let parked = Arc::clone(&parked);
            async move {
                let delayed = run.clone();
                *parked.lock() = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    delayed.resolve(9);
                    delayed.is_settled()
                }));
                run.advance().await;
            }
        }))
        .register(delegate());

    let err = chain.invoke(0).unwrap().await.unwrap_err();
    assert!(matches!(err, Error::Exhausted));

    // The delayed resolve still lands on the run, which stays exhausted.
    let task = late.lock().take().unwrap();
    assert!(task.await.unwrap());
}

// --- Asynchronous layers ---

#[tokio::test]
async fn layers_may_settle_after_suspending() {
    let chain = Chain::<u64>::new()
        .register(delegate().on_response(|v: u64| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            v + 1
        }))
        .register(Layer::new().on_request(|run: Run<u64>| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let input = run.input().unwrap_or_default();
            run.resolve(input * 3);
        }));

    assert_eq!(chain.invoke(4).unwrap().await.unwrap(), 13);
}

#[tokio::test]
async fn layers_may_settle_from_a_detached_task() {
    let chain = Chain::<u8>::new()
        .register(delegate().on_response(|v: u8| async move { v * 2 }))
        .register(Layer::new().on_request(|run: Run<u8>| async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                run.resolve(21);
            });
        }));

    assert_eq!(chain.invoke(0).unwrap().await.unwrap(), 42);
}

#[tokio::test]
async fn a_parked_run_waits_until_someone_settles_it() {
    let parked: Arc<Mutex<Option<Run<u8>>>> = Arc::default();
    let slot = Arc::clone(&parked);

    let chain = Chain::<u8>::new().register(Layer::new().on_request(move |run: Run<u8>| {
        *slot.lock() = Some(run);
        async {}
    }));

    let outcome = tokio::spawn(chain.invoke(0).unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!outcome.is_finished());

    let run = parked.lock().take().unwrap();
    run.resolve(9);
    assert_eq!(outcome.await.unwrap().unwrap(), 9);
}

#[tokio::test]
async fn a_layer_may_keep_working_after_it_resolves() {
    let chain = Chain::<u8>::new().register(Layer::new().on_request(|run: Run<u8>| async move {
        run.resolve(1);
        std::future::pending::<()>().await;
    }));

    let outcome = tokio::time::timeout(Duration::from_secs(1), chain.invoke(0).unwrap()).await;
    assert_eq!(outcome.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn concurrent_invocations_do_not_interfere() {
    let chain = Arc::new(
        Chain::<u64>::named("squares")
            .register(middleware::trace("outer"))
            .register(Layer::new().on_request(|run: Run<u64>| async move {
                let input = run.input().unwrap_or_default();
                tokio::time::sleep(Duration::from_millis(20 - input)).await;
                run.resolve(input * input);
            })),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..10u64 {
        let chain = Arc::clone(&chain);
        tasks.spawn(async move { (n, chain.invoke(n).unwrap().await.unwrap()) });
    }

    while let Some(joined) = tasks.join_next().await {
        let (n, squared) = joined.unwrap();
        assert_eq!(squared, n * n);
    }
}

#[tokio::test]
async fn settling_deep_in_the_chain_stops_outer_layers_mid_walk() {
    let after_advance = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&after_advance);

    let chain = Chain::<u8>::new()
        .register(Layer::new().on_request(move |run: Run<u8>| {
            let counter = Arc::clone(&counter);
            async move {
                run.advance().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .register(Layer::new().on_request(|run: Run<u8>| async move {
            run.resolve(4);
            std::future::pending::<()>().await;
        }));

    let outcome = tokio::time::timeout(Duration::from_secs(1), chain.invoke(0).unwrap()).await;
    assert_eq!(outcome.unwrap().unwrap(), 4);
    assert_eq!(after_advance.load(Ordering::SeqCst), 0);
}

// --- Registration ---

#[tokio::test]
async fn registration_appends_in_order_and_allows_duplicates() {
    let exclaim = Layer::<(), String>::new().on_response(suffix("!"));

    let mut chain = Chain::new();
    chain.push(exclaim.clone()).push(exclaim);
    chain.push(middleware::fallback("hi".to_owned()));

    assert_eq!(chain.len(), 3);
    assert_eq!(chain.invoke(()).unwrap().await.unwrap(), "hi!!");
}

#[tokio::test]
async fn a_dropped_outcome_runs_no_layer() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let chain = Chain::<u8>::new().register(Layer::new().on_request(move |run: Run<u8>| {
        seen.fetch_add(1, Ordering::SeqCst);
        async move { run.resolve(1) }
    }));

    let outcome = chain.invoke(0).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(outcome);
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(chain.invoke(0).unwrap().await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invoking_snapshots_the_layers() {
    let mut chain = Chain::<u8>::new();
    chain.push(delegate());

    let outcome = chain.invoke(0).unwrap();
    chain.push(middleware::fallback(1));

    assert!(outcome.await.unwrap_err().is_exhausted());
    assert_eq!(chain.invoke(0).unwrap().await.unwrap(), 1);
}

// --- Cache in front of a backend ---

#[derive(Debug, Clone, PartialEq)]
struct User {
    id: u32,
    name: String,
}

#[derive(Default)]
struct CacheLayer {
    cache: Mutex<HashMap<u32, User>>,
    count: AtomicUsize,
}

impl CacheLayer {
    fn layer(self: &Arc<Self>) -> Layer<u32, User> {
        let on_request = Arc::clone(self);
        let on_response = Arc::clone(self);

        Layer::new()
            .on_request(move |run: Run<u32, User>| {
                let this = Arc::clone(&on_request);
                async move {
                    this.count.fetch_add(1, Ordering::SeqCst);
                    let id = run.input().unwrap_or_default();
                    let hit = this.cache.lock().get(&id).cloned();
                    match hit {
                        Some(user) => run.resolve(user),
                        None => run.advance().await,
                    }
                }
            })
            .on_response(move |user: User| {
                on_response.cache.lock().insert(user.id, user.clone());
                std::future::ready(user)
            })
    }
}

#[derive(Default)]
struct BackendLayer {
    count: AtomicUsize,
}

impl BackendLayer {
    fn layer(self: &Arc<Self>) -> Layer<u32, User> {
        let this = Arc::clone(self);
        Layer::new().on_request(move |run: Run<u32, User>| {
            this.count.fetch_add(1, Ordering::SeqCst);
            async move {
                let id = run.input().unwrap_or_default();
                run.resolve(User { id, name: "John Doe".to_owned() });
            }
        })
    }
}

#[tokio::test]
async fn cache_hit_skips_the_backend() {
    init_tracing();
    let cache = Arc::new(CacheLayer::default());
    let backend = Arc::new(BackendLayer::default());

    let chain = Chain::named("users").register(cache.layer()).register(backend.layer());
    let expected = User { id: 123, name: "John Doe".to_owned() };

    assert_eq!(chain.invoke(123).unwrap().await.unwrap(), expected);
    assert_eq!(chain.invoke(123).unwrap().await.unwrap(), expected);

    assert_eq!(cache.count.load(Ordering::SeqCst), 2);
    assert_eq!(backend.count.load(Ordering::SeqCst), 1);
}
