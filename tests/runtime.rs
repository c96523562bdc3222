use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use appvisor::{
    Config, Controller, Event, HandlerFn, Job, Phase, Priority, RuntimeError, Signals,
    StorageAction, StorageEngine, StorageError, SubscriberId, TaskError, topics,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

enum Tag {
    Set(&'static str, u32),
    Get(&'static str),
    Reject,
}

impl StorageAction for Tag {
    fn name(&self) -> &'static str {
        match self {
            Tag::Set(..) => "set_tag",
            Tag::Get(_) => "get_tag",
            Tag::Reject => "reject",
        }
    }
}

#[derive(Default)]
struct Tags {
    rows: HashMap<&'static str, u32>,
}

#[async_trait]
impl StorageEngine for Tags {
    type Action = Tag;
    type Output = Option<u32>;

    async fn read(&mut self, action: Tag, _priority: Priority) -> Result<Option<u32>, StorageError> {
        match action {
            Tag::Get(key) => Ok(self.rows.get(key).copied()),
            other => Err(StorageError::failed(other.name(), "not a read")),
        }
    }

    async fn write(
        &mut self,
        action: Tag,
        _priority: Priority,
        _synchronous: bool,
        _interrupt: &CancellationToken,
    ) -> Result<Option<u32>, StorageError> {
        match action {
            Tag::Set(key, value) => Ok(self.rows.insert(key, value)),
            other => Err(StorageError::failed(other.name(), "rejected")),
        }
    }

    fn is_first_start(&self) -> bool {
        self.rows.is_empty()
    }
}

fn headless(cfg: Config) -> Arc<Controller<Tags>> {
    Controller::builder(
        Config {
            no_daemons: true,
            ..cfg
        },
        Tags::default(),
    )
    .build()
}

#[tokio::test]
async fn writes_complete_before_drain_and_storage_closes_with_model() {
    init_tracing();
    let ctl = headless(Config::default());

    let done = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&done);
    ctl.subscribe(
        SubscriberId::next(),
        "tags.written",
        HandlerFn::arc("completion", move |ev: &Event| {
            if let Some(key) = ev.payload::<&'static str>() {
                sink.lock().push(*key);
            }
            Ok(())
        }),
    );

    ctl.init_model().unwrap();
    ctl.init_view().unwrap();
    assert!(ctl.is_first_start());

    let keys = ["a", "b", "c", "d", "e"];
    let mut handles = Vec::new();
    for (n, key) in keys.iter().enumerate() {
        handles.push((*key, ctl.write(Tag::Set(*key, n as u32)).unwrap()));
    }
    for (key, handle) in handles {
        handle.await.unwrap();
        ctl.publish(Event::new("tags.written").with_payload(key));
    }

    ctl.wait_until_events_drained().await.unwrap();
    assert_eq!(*done.lock(), keys.to_vec());

    ctl.shutdown_view().await;
    ctl.shutdown_model().await;
    assert_eq!(ctl.phase(), Phase::ModelShutdown);

    let err = ctl.read(Tag::Get("a")).await.unwrap_err();
    assert!(matches!(err, RuntimeError::ShutdownInProgress { .. }));
}

#[tokio::test]
async fn synchronous_write_is_visible_to_next_read() {
    let ctl = headless(Config::default());
    ctl.init_model().unwrap();

    assert_eq!(ctl.write_synchronous(Tag::Set("k", 7)).await.unwrap(), None);
    assert_eq!(ctl.read(Tag::Get("k")).await.unwrap(), Some(7));

    let err = ctl.write_synchronous(Tag::Reject).await.unwrap_err();
    match err {
        RuntimeError::Storage(e) => assert_eq!(e.action(), "reject"),
        other => panic!("unexpected error: {other}"),
    }
    ctl.shutdown_model().await;
}

#[tokio::test]
async fn failed_async_write_is_reported_on_the_bus() {
    let ctl = headless(Config::default());
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    ctl.subscribe(
        SubscriberId::next(),
        topics::WRITE_FAILED,
        HandlerFn::arc("failures", move |ev: &Event| {
            if let Some(err) = ev.payload::<StorageError>() {
                sink.lock().push(err.action());
            }
            Ok(())
        }),
    );
    ctl.init_model().unwrap();
    ctl.init_view().unwrap();

    // Dropped handle: the failure still has to surface.
    drop(ctl.write(Tag::Reject).unwrap());
    ctl.write_synchronous(Tag::Set("barrier", 0)).await.unwrap();

    ctl.wait_until_events_drained().await.unwrap();
    assert_eq!(*failures.lock(), vec!["reject"]);

    ctl.shutdown_view().await;
    ctl.shutdown_model().await;
}

#[tokio::test]
async fn pool_fails_fast_at_cap() {
    let ctl = headless(Config {
        worker_cap: 2,
        ..Config::default()
    });
    ctl.init_model().unwrap();
    ctl.init_view().unwrap();

    let gate = Arc::new(Semaphore::new(0));
    for n in 0..2 {
        let gate = Arc::clone(&gate);
        ctl.call_to_worker(Job::new(format!("hold-{n}"), move || async move {
            let _permit = gate.acquire().await;
            Ok::<_, TaskError>(())
        }))
        .unwrap();
    }

    let err = ctl
        .call_to_worker(Job::new("overflow", || async { Ok::<_, TaskError>(()) }))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ResourceExhausted { cap: 2 }));

    gate.add_permits(2);
    ctl.shutdown_view().await;
    assert_eq!(ctl.pool().worker_count(), 0);
    ctl.shutdown_model().await;
}

#[tokio::test]
async fn jobs_on_one_worker_run_in_submission_order() {
    let ctl = headless(Config::default());
    ctl.init_model().unwrap();
    ctl.init_view().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let push = |n: u32| {
        let order = Arc::clone(&order);
        Job::new(format!("step-{n}"), move || async move {
            tokio::time::sleep(Duration::from_millis(u64::from(5 - n))).await;
            order.lock().push(n);
            Ok::<_, TaskError>(())
        })
    };

    let worker = ctl.call_to_worker(push(1)).unwrap();
    ctl.call_to_worker_on(worker, push(2)).unwrap();
    ctl.call_to_worker_on(worker, push(3)).unwrap();

    let (tx, rx) = oneshot::channel();
    ctl.call_to_worker_on(
        worker,
        Job::new("done", move || async move {
            let _ = tx.send(());
            Ok::<_, TaskError>(())
        }),
    )
    .unwrap();
    rx.await.unwrap();

    assert_eq!(*order.lock(), vec![1, 2, 3]);
    ctl.shutdown_view().await;
    ctl.shutdown_model().await;
}

#[test]
fn wake_from_sleep_opens_grace_window() {
    let cfg = Config::default();
    let signals = Signals::new(&cfg);
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    assert!(!signals.sleep_check_at(t0));
    assert!(signals.sleep_check_at(t0 + Duration::from_secs(700)));
    assert!(signals.sleep_check_at(t0 + Duration::from_secs(700 + 120)));
    assert!(!signals.sleep_check_at(t0 + Duration::from_secs(700 + 181)));
}
